//! Normative EBNF printer. [crate::ir::Grammar] already implements
//! [std::fmt::Display] in exactly this shape; this module exists so callers
//! reach for `ebnf::print_grammar` symmetrically with `ebnf::parse_grammar`.
use crate::ir::Grammar;

pub fn print_grammar(grammar: &Grammar) -> String {
    grammar.to_string()
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_grammar;
    use super::*;

    #[test]
    fn round_trips_through_parse_and_print() {
        let text = "root ::= \"a\" \"b\"\n";
        let grammar = parse_grammar(text).unwrap();
        let printed = print_grammar(&grammar);
        let reparsed = parse_grammar(&printed).unwrap();
        assert_eq!(print_grammar(&reparsed), printed);
    }
}
