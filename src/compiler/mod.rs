//! The structural-tag compiler and its cache-backed entry points (spec
//! §4.3/§6.2, C6).
pub mod grammar_compiler;
pub mod structural_tag_compiler;

pub use grammar_compiler::{compile_ebnf, compile_format, compile_json_schema, compile_structural_tag, CompiledGrammar};
