//! External lowerings (spec §3 "External lowerings", C3): pure functions
//! that turn a regex pattern or a JSON Schema into a grammar fragment.
//! Treated as black-box collaborators by the rest of the pipeline — only
//! their start-nonterminal contract is consumed by the compiler.
pub mod json_schema;
pub mod regex;

pub use json_schema::{json_schema_to_ebnf, JsonSchemaContext, Style};
pub use regex::regex_to_ebnf;
