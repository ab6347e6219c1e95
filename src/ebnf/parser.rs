//! Hand-rolled recursive-descent parser for the extended EBNF surface (spec
//! §3.2): `name ::= alt | alt`, string terminals, bracketed char classes,
//! `?`/`*`/`+`/`{m,n}` quantifiers, `(= seq)` lookahead, parenthesized
//! grouping, and the textual `TagDispatch(...)` construct.
use crate::error::GrammarError;
use crate::ir::{CharClass, Element, Grammar, RuleBody, RuleId, Sequence, TagDispatch};
use crate::util::{Code, Log};

type PResult<T> = Result<T, GrammarError>;

/// Parse a complete EBNF text into a [Grammar], rooted at the first rule
/// defined in the text.
pub fn parse_grammar(text: &str) -> PResult<Grammar> {
    let mut parser = Parser::new(text);
    parser.parse_grammar()
}

/// Same as [parse_grammar], but traces each rule parsed (or the position a
/// parse failed at) through [Log], gated by `log`'s level.
pub fn parse_grammar_with_log(text: &str, log: Log<String>) -> PResult<Grammar> {
    let mut parser = Parser::new(text);
    parser.debug = log;
    parser.parse_grammar()
}

struct Parser<'c> {
    code: Code<'c>,
    chars: Vec<(usize, char)>,
    i: usize,
    len: usize,
    grammar: Grammar,
    first_rule: Option<RuleId>,
    debug: Log<String>,
}

impl<'c> Parser<'c> {
    fn new(text: &'c str) -> Self {
        Self {
            code: Code::new(text.as_bytes()),
            chars: text.char_indices().collect(),
            i: 0,
            len: text.len(),
            grammar: Grammar::bare(),
            first_rule: None,
            debug: Log::None,
        }
    }

    fn pos(&self) -> usize {
        self.chars.get(self.i).map(|(b, _)| *b).unwrap_or(self.len)
    }

    fn err(&self, message: impl Into<String>) -> GrammarError {
        GrammarError::grammar_parse(&self.code, self.pos(), message)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).map(|(_, c)| *c)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.i += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.i += 1;
        }
    }

    fn eof(&self) -> bool {
        self.i >= self.chars.len()
    }

    fn expect_char(&mut self, expected: char) -> PResult<()> {
        match self.advance() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.err(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.err(format!("expected '{expected}', found end of input"))),
        }
    }

    fn expect_str(&mut self, expected: &str) -> PResult<()> {
        for c in expected.chars() {
            self.expect_char(c)?;
        }
        Ok(())
    }

    fn try_consume_str(&mut self, expected: &str) -> bool {
        let start = self.i;
        for c in expected.chars() {
            if self.peek() != Some(c) {
                self.i = start;
                return false;
            }
            self.i += 1;
        }
        true
    }

    fn parse_identifier(&mut self) -> PResult<String> {
        let start = self.i;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => self.i += 1,
            _ => return Err(self.err("expected an identifier")),
        }
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.i += 1;
        }
        Ok(self.chars[start..self.i].iter().map(|(_, c)| *c).collect())
    }

    fn parse_number(&mut self) -> PResult<usize> {
        let start = self.i;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.i += 1;
        }
        if start == self.i {
            return Err(self.err("expected a number"));
        }
        let text: String = self.chars[start..self.i].iter().map(|(_, c)| *c).collect();
        text.parse::<usize>().map_err(|_| self.err("number out of range"))
    }

    fn parse_bool(&mut self) -> PResult<bool> {
        if self.try_consume_str("true") {
            Ok(true)
        } else if self.try_consume_str("false") {
            Ok(false)
        } else {
            Err(self.err("expected 'true' or 'false'"))
        }
    }

    fn parse_grammar(&mut self) -> PResult<Grammar> {
        self.skip_ws();
        while !self.eof() {
            let start = self.pos();
            if let Err(err) = self.parse_rule() {
                self.debug.log_failure(&self.code, start, &err.to_string());
                return Err(err);
            }
            self.skip_ws();
        }
        if let Some(root) = self.first_rule {
            self.grammar.set_root(root);
        } else {
            return Err(self.err("grammar text defines no rules"));
        }
        Ok(std::mem::replace(&mut self.grammar, Grammar::bare()))
    }

    fn parse_rule(&mut self) -> PResult<()> {
        let start = self.pos();
        let name = self.parse_identifier()?;
        self.skip_ws();
        self.expect_str("::=")?;
        self.skip_ws();
        let body = self.parse_alternation()?;
        let id = self.grammar.declare_rule(&name);
        self.grammar.set_body(id, body);
        self.first_rule.get_or_insert(id);
        self.debug.log_success(&self.code, start, self.pos());
        Ok(())
    }

    fn parse_alternation(&mut self) -> PResult<RuleBody> {
        let mut alternatives = vec![self.parse_sequence()?];
        loop {
            self.skip_ws();
            if self.peek() == Some('|') {
                self.i += 1;
                self.skip_ws();
                alternatives.push(self.parse_sequence()?);
            } else {
                break;
            }
        }
        Ok(RuleBody::new(alternatives))
    }

    /// A sequence runs until `|`, `)`, end of input, or the start of the next
    /// `identifier ::=` rule header.
    fn parse_sequence(&mut self) -> PResult<Sequence> {
        let mut seq = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some('|') | Some(')') => break,
                Some(c) if c.is_alphabetic() || c == '_' => {
                    if self.looks_like_rule_header() {
                        break;
                    }
                    seq.push(self.parse_element()?);
                }
                _ => seq.push(self.parse_element()?),
            }
        }
        Ok(seq)
    }

    /// Lookahead to distinguish a bare nonterminal reference inside a
    /// sequence from the start of the grammar's next `name ::= ...` rule.
    fn looks_like_rule_header(&self) -> bool {
        let mut j = self.i;
        while matches!(self.chars.get(j), Some((_, c)) if c.is_alphanumeric() || *c == '_') {
            j += 1;
        }
        let mut k = j;
        while matches!(self.chars.get(k), Some((_, c)) if c.is_whitespace()) {
            k += 1;
        }
        matches!(self.chars.get(k), Some((_, ':'))) && matches!(self.chars.get(k + 1), Some((_, ':'))) && matches!(self.chars.get(k + 2), Some((_, '=')))
    }

    fn parse_element(&mut self) -> PResult<Element> {
        let atom = self.parse_atom()?;
        self.parse_quantifier(atom)
    }

    fn parse_quantifier(&mut self, atom: Element) -> PResult<Element> {
        match self.peek() {
            Some('?') => {
                self.i += 1;
                Ok(atom.repeat(0, Some(1)))
            }
            Some('*') => {
                self.i += 1;
                Ok(atom.repeat(0, None))
            }
            Some('+') => {
                self.i += 1;
                Ok(atom.repeat(1, None))
            }
            Some('{') => {
                self.i += 1;
                self.skip_ws();
                let min = self.parse_number()?;
                self.skip_ws();
                let max = if self.peek() == Some(',') {
                    self.i += 1;
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        None
                    } else {
                        Some(self.parse_number()?)
                    }
                } else {
                    Some(min)
                };
                self.skip_ws();
                self.expect_char('}')?;
                Ok(atom.repeat(min, max))
            }
            _ => Ok(atom),
        }
    }

    fn parse_atom(&mut self) -> PResult<Element> {
        match self.peek() {
            Some('"') => self.parse_terminal(),
            Some('[') => self.parse_char_class(),
            Some('(') => self.parse_parenthesized(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_identifier_atom(),
            Some(c) => Err(self.err(format!("unexpected character '{c}'"))),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn parse_identifier_atom(&mut self) -> PResult<Element> {
        let name = self.parse_identifier()?;
        if name == "TagDispatch" {
            return self.parse_tag_dispatch();
        }
        let id = self.grammar.declare_rule(&name);
        Ok(Element::NonterminalRef(id))
    }

    fn parse_parenthesized(&mut self) -> PResult<Element> {
        self.i += 1; // '('
        self.skip_ws();
        if self.peek() == Some('=') {
            self.i += 1;
            self.skip_ws();
            let seq = self.parse_sequence()?;
            self.skip_ws();
            self.expect_char(')')?;
            return Ok(Element::Lookahead(seq));
        }
        let body = self.parse_alternation()?;
        self.skip_ws();
        self.expect_char(')')?;
        if body.alternatives.len() == 1 {
            let only = body.alternatives.into_iter().next().unwrap();
            if only.len() == 1 {
                return Ok(only.into_iter().next().unwrap());
            }
            let name = self.grammar.fresh_name("group");
            let id = self.grammar.add_rule(name, RuleBody::single(only));
            return Ok(Element::NonterminalRef(id));
        }
        let name = self.grammar.fresh_name("group");
        let id = self.grammar.add_rule(name, body);
        Ok(Element::NonterminalRef(id))
    }

    fn parse_escape(&mut self) -> PResult<char> {
        match self.advance() {
            Some('"') => Ok('"'),
            Some('\\') => Ok('\\'),
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some(']') => Ok(']'),
            Some('-') => Ok('-'),
            Some('^') => Ok('^'),
            Some('x') => self.parse_hex_escape(2),
            Some('u') => self.parse_hex_escape(4),
            Some(c) => Err(self.err(format!("unknown escape '\\{c}'"))),
            None => Err(self.err("unterminated escape sequence")),
        }
    }

    fn parse_hex_escape(&mut self, digits: usize) -> PResult<char> {
        let start = self.i;
        for _ in 0..digits {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => self.i += 1,
                _ => return Err(self.err("invalid hex escape")),
            }
        }
        let text: String = self.chars[start..self.i].iter().map(|(_, c)| *c).collect();
        let cp = u32::from_str_radix(&text, 16).map_err(|_| self.err("invalid hex escape"))?;
        char::from_u32(cp).ok_or_else(|| self.err("hex escape is not a valid code point"))
    }

    fn parse_terminal(&mut self) -> PResult<Element> {
        self.expect_char('"')?;
        let mut s = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.i += 1;
                    break;
                }
                Some('\\') => {
                    self.i += 1;
                    s.push(self.parse_escape()?);
                }
                Some(c) => {
                    s.push(c);
                    self.i += 1;
                }
                None => return Err(self.err("unterminated string terminal")),
            }
        }
        Ok(Element::Terminal(s.into_bytes()))
    }

    fn parse_quoted_string(&mut self) -> PResult<Vec<u8>> {
        match self.parse_terminal()? {
            Element::Terminal(bytes) => Ok(bytes),
            _ => unreachable!(),
        }
    }

    fn parse_char_class(&mut self) -> PResult<Element> {
        self.expect_char('[')?;
        let negated = if self.peek() == Some('^') {
            self.i += 1;
            true
        } else {
            false
        };
        let mut ranges = Vec::new();
        loop {
            match self.peek() {
                Some(']') => {
                    self.i += 1;
                    break;
                }
                None => return Err(self.err("unterminated character class")),
                _ => {
                    let lo = self.parse_class_char()?;
                    if self.peek() == Some('-') && self.peek_at(1) != Some(']') {
                        self.i += 1;
                        let hi = self.parse_class_char()?;
                        ranges.push((lo, hi));
                    } else {
                        ranges.push((lo, lo));
                    }
                }
            }
        }
        Ok(Element::CharClass(CharClass::new(ranges, negated)))
    }

    fn parse_class_char(&mut self) -> PResult<u32> {
        match self.advance() {
            Some('\\') => Ok(self.parse_escape()? as u32),
            Some(c) => Ok(c as u32),
            None => Err(self.err("unterminated character class")),
        }
    }

    fn parse_string_tuple(&mut self) -> PResult<Vec<Vec<u8>>> {
        self.expect_char('(')?;
        self.skip_ws();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.i += 1;
                break;
            }
            items.push(self.parse_quoted_string()?);
            self.skip_ws();
            if self.peek() == Some(',') {
                self.i += 1;
            }
        }
        Ok(items)
    }

    fn parse_tag_dispatch(&mut self) -> PResult<Element> {
        self.skip_ws();
        self.expect_char('(')?;
        let mut triggers = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('(') => {
                    self.i += 1;
                    self.skip_ws();
                    let prefix = self.parse_quoted_string()?;
                    self.skip_ws();
                    self.expect_char(',')?;
                    self.skip_ws();
                    let body_name = self.parse_identifier()?;
                    let body_id = self.grammar.declare_rule(&body_name);
                    self.skip_ws();
                    self.expect_char(')')?;
                    triggers.push((prefix, body_id));
                    self.skip_ws();
                    if self.peek() == Some(',') {
                        self.i += 1;
                    }
                }
                _ => break,
            }
        }
        let mut stop_eos = false;
        let mut stop_strs = Vec::new();
        let mut loop_after_dispatch = false;
        let mut excludes = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.i += 1;
                break;
            }
            let key = self.parse_identifier()?;
            self.skip_ws();
            self.expect_char('=')?;
            self.skip_ws();
            match key.as_str() {
                "stop_eos" => stop_eos = self.parse_bool()?,
                "stop_str" => stop_strs = self.parse_string_tuple()?,
                "loop_after_dispatch" => loop_after_dispatch = self.parse_bool()?,
                "excludes" => excludes = self.parse_string_tuple()?,
                other => return Err(self.err(format!("unknown TagDispatch field '{other}'"))),
            }
            self.skip_ws();
            if self.peek() == Some(',') {
                self.i += 1;
            }
        }
        Ok(Element::TagDispatch(TagDispatch {
            triggers,
            stop_eos,
            stop_strs,
            loop_after_dispatch,
            excludes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_reference_grammar() {
        let text = "root ::= rule1 rule2\nrule1 ::= (rule2|rule3) \"a\"\nrule2 ::= \"b\"\nrule3 ::= \"c\"";
        let grammar = parse_grammar(text).expect("valid grammar");
        assert!(grammar.rule_id("root").is_some());
        assert!(grammar.rule_id("rule1").is_some());
        assert!(grammar.rule_id("rule3").is_some());
    }

    #[test]
    fn parses_repetition_and_char_class() {
        let text = "root ::= rule{2,3}\nrule ::= \"a\"|[bc]{4,}";
        let grammar = parse_grammar(text).expect("valid grammar");
        let rule = grammar.rule(grammar.rule_id("rule").unwrap());
        assert_eq!(rule.body.alternatives.len(), 2);
    }

    #[test]
    fn parses_tag_dispatch() {
        let text = "root ::= TagDispatch((\"<a>\", body), stop_eos=true, stop_str=(\"</a>\"), loop_after_dispatch=false, excludes=())\nbody ::= \"x\"";
        let grammar = parse_grammar(text).expect("valid grammar");
        let root = grammar.rule(grammar.root());
        match &root.body.alternatives[0][0] {
            Element::TagDispatch(dispatch) => {
                assert_eq!(dispatch.triggers.len(), 1);
                assert!(dispatch.stop_eos);
            }
            other => panic!("expected TagDispatch, got {other:?}"),
        }
    }

    #[test]
    fn reports_position_on_malformed_input() {
        let err = parse_grammar("root ::= \"unterminated").unwrap_err();
        match err {
            GrammarError::GrammarParseError { .. } => {}
            other => panic!("expected GrammarParseError, got {other}"),
        }
    }

    #[test]
    fn logged_parse_traces_success_and_failure_without_changing_the_result() {
        let text = "root ::= \"a\"";
        let ok = parse_grammar_with_log(text, Log::Verbose(String::new()));
        assert!(ok.is_ok());

        let err = parse_grammar_with_log("root ::= \"unterminated", Log::Verbose(String::new()));
        assert!(err.is_err());
    }
}
