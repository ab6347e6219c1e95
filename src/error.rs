//! Stable, user-visible error surface for the whole pipeline (spec §7).
//!
//! Every fallible boundary in this crate returns [GrammarError]. The six
//! variants carry the exact prefixes a caller can match on, mirroring how
//! the teacher kept `ProductionError`/`ParseError` small and `Display`-driven
//! rather than reaching for a `thiserror`-style derive macro.
use crate::util::{Code, Position};
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone)]
pub enum GrammarError {
    /// Malformed structural-tag JSON input.
    JsonParseError(String),
    /// Shape/type/emptiness violation of the structural-tag surface (spec §6.1).
    StructuralTagValidationError(String),
    /// EBNF text failed to parse; `position` is where the parser gave up.
    GrammarParseError { message: String, position: Position },
    /// Lowering failed after validation (analyzer/converter rules, spec §4.1/§4.3).
    CompilationError(String),
    /// An integer bound in a JSON schema exceeds the signed 64-bit range.
    OverflowError(String),
    /// Misuse of the matcher (e.g. `accept_token` after termination).
    RuntimeMatcherError(String),
}

impl GrammarError {
    pub fn grammar_parse(code: &Code, pointer: usize, message: impl Into<String>) -> Self {
        GrammarError::GrammarParseError {
            message: message.into(),
            position: code.obtain_position(pointer),
        }
    }

    pub fn compilation(message: impl Into<String>) -> Self {
        GrammarError::CompilationError(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GrammarError::StructuralTagValidationError(message.into())
    }
}

impl Display for GrammarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::JsonParseError(msg) => write!(f, "JsonParseError: {msg}"),
            GrammarError::StructuralTagValidationError(msg) => {
                write!(f, "StructuralTagValidationError: {msg}")
            }
            GrammarError::GrammarParseError { message, position } => {
                write!(f, "GrammarParseError: {message} at {position}")
            }
            GrammarError::CompilationError(msg) => {
                write!(f, "CompilationError: Invalid structural tag error: {msg}")
            }
            GrammarError::OverflowError(msg) => write!(f, "OverflowError: {msg}"),
            GrammarError::RuntimeMatcherError(msg) => write!(f, "RuntimeMatcherError: {msg}"),
        }
    }
}

impl std::error::Error for GrammarError {}

impl From<serde_json::Error> for GrammarError {
    fn from(err: serde_json::Error) -> Self {
        GrammarError::JsonParseError(format!("Failed to parse JSON: {err}"))
    }
}
