//! Process-wide, read-mostly caches (spec §5).
//!
//! These generalize the teacher's single-threaded packrat [Cache]-by-pointer
//! idea (memorize a parsed result once, reuse it at the same position) into
//! two process-wide stores keyed by content fingerprint instead of a cursor
//! position: a compiled-grammar cache, and a rule-level token-acceptance
//! cache. Both are guarded by a reader/writer lock rather than `OnceCell`,
//! since unlike a single parse run they are shared across matcher instances
//! and threads.
use crate::ir::grammar::Grammar;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A content fingerprint, used as a cache key. See [Grammar::fingerprint]
/// and [crate::vocab::tokenizer_info::TokenizerInfo::fingerprint].
pub type Fingerprint = u64;

static GRAMMAR_CACHE: Lazy<RwLock<HashMap<Fingerprint, Arc<Grammar>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Look up a compiled grammar by fingerprint, building and inserting it on
/// a miss. `build` only runs while holding the write lock, and only once
/// per fingerprint for the process lifetime (value stability after insertion).
pub fn get_or_compile_grammar(fingerprint: Fingerprint, build: impl FnOnce() -> Grammar) -> Arc<Grammar> {
    if let Some(existing) = GRAMMAR_CACHE.read().unwrap().get(&fingerprint) {
        return existing.clone();
    }
    let mut guard = GRAMMAR_CACHE.write().unwrap();
    guard
        .entry(fingerprint)
        .or_insert_with(|| Arc::new(build()))
        .clone()
}

/// Evict everything. Exposed mainly for tests that want a clean cache.
pub fn clear_grammar_cache() {
    GRAMMAR_CACHE.write().unwrap().clear();
}

/// A rule-level token-acceptance partition: which token ids are accepted
/// purely because of the active nonterminal, independent of the rest of the
/// matcher stack (spec §4.6 point 3). Stored as a packed bitmask, one bit
/// per token id, LSB-first within a 32-bit word (same layout as the
/// public bitmask in [crate::bitmask]).
pub type RuleAcceptance = Arc<Vec<u32>>;

static RULE_CACHE: Lazy<RwLock<HashMap<(Fingerprint, usize), RuleAcceptance>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Look up (or lazily compute and insert) the rule-level acceptance
/// partition for `rule_id` under the vocabulary identified by
/// `tokenizer_fingerprint`.
pub fn get_or_compute_rule_acceptance(
    tokenizer_fingerprint: Fingerprint,
    rule_id: usize,
    build: impl FnOnce() -> Vec<u32>,
) -> RuleAcceptance {
    let key = (tokenizer_fingerprint, rule_id);
    if let Some(existing) = RULE_CACHE.read().unwrap().get(&key) {
        return existing.clone();
    }
    let mut guard = RULE_CACHE.write().unwrap();
    guard
        .entry(key)
        .or_insert_with(|| Arc::new(build()))
        .clone()
}

pub fn clear_rule_cache() {
    RULE_CACHE.write().unwrap().clear();
}

/// A context-signature acceptance partition (spec §4.6 point 2): all live
/// matcher positions, not just the top-of-stack nonterminal, keyed by a
/// cheap structural signature of the current thread set. Distinct from
/// [RULE_CACHE], which only ever looks at one rule in isolation.
static CONTEXT_CACHE: Lazy<RwLock<HashMap<(Fingerprint, u64), RuleAcceptance>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

pub fn get_or_compute_context_partition(
    tokenizer_fingerprint: Fingerprint,
    signature: u64,
    build: impl FnOnce() -> Vec<u32>,
) -> RuleAcceptance {
    let key = (tokenizer_fingerprint, signature);
    if let Some(existing) = CONTEXT_CACHE.read().unwrap().get(&key) {
        return existing.clone();
    }
    let mut guard = CONTEXT_CACHE.write().unwrap();
    guard
        .entry(key)
        .or_insert_with(|| Arc::new(build()))
        .clone()
}

pub fn clear_context_cache() {
    CONTEXT_CACHE.write().unwrap().clear();
}

/// Caches a [crate::compiler::grammar_compiler::CompiledGrammar] by a
/// fingerprint of its *input* (the schema or structural-tag text), so a
/// repeated `compile_json_schema`/`compile_structural_tag` call with the
/// same input skips lowering entirely rather than only deduplicating the
/// resulting [Grammar] as [get_or_compile_grammar] does.
static COMPILED_CACHE: Lazy<RwLock<HashMap<Fingerprint, crate::compiler::grammar_compiler::CompiledGrammar>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

pub fn peek_compiled(input_fingerprint: Fingerprint) -> Option<crate::compiler::grammar_compiler::CompiledGrammar> {
    COMPILED_CACHE.read().unwrap().get(&input_fingerprint).cloned()
}

pub fn remember_compiled(input_fingerprint: Fingerprint, compiled: crate::compiler::grammar_compiler::CompiledGrammar) {
    COMPILED_CACHE.write().unwrap().insert(input_fingerprint, compiled);
}

pub fn clear_compiled_cache() {
    COMPILED_CACHE.write().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_cache_builds_once() {
        clear_grammar_cache();
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let build = || {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Grammar::new()
        };
        let _a = get_or_compile_grammar(42, build);
        let _b = get_or_compile_grammar(42, build);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
