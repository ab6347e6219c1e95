//! The incremental byte/token matcher: thread-based epsilon-NFA simulation
//! over the grammar IR, plus the public, vocabulary-aware matcher API
//! (spec §4.4/§4.5, C8).
pub mod grammar_matcher;
pub mod state;

pub use grammar_matcher::GrammarMatcher;
pub use state::MatcherState;
