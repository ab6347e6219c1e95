//! Small ambient utilities shared across the crate: source position tracking
//! for grammar-parse error messages, and a hand-rolled debug log level gate.
mod code;
mod logger;
mod position;

use once_cell::unsync::OnceCell;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
/// The line and column information at a byte offset.
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A wrapper around the raw input bytes, with lazily computed line-break
/// offsets used to translate a byte pointer into a [Position].
pub struct Code<'c> {
    pub value: &'c [u8],
    line_breaks: OnceCell<Vec<usize>>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// Debug log levels, gated by `cfg(debug_assertions)`. Each level implies
/// everything above it in the ladder is also printed.
pub enum Log<T> {
    None,
    Default(T),
    Success(T),
    Result(T),
    Verbose(T),
}
