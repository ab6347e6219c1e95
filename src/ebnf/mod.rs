//! Text front-end and back-end for the grammar IR (spec §3.2).
mod parser;
mod printer;

pub use parser::{parse_grammar, parse_grammar_with_log};
pub use printer::print_grammar;
