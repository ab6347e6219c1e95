//! Partitions a vocabulary into accepted/rejected token ids for a given
//! matcher context, backed by the process-wide context-signature cache
//! (spec §4.6 points 1-3, C9).
use super::tokenizer_info::TokenizerInfo;
use super::trie::TrieCursor;
use crate::cache::{self, RuleAcceptance};
use crate::ir::{Grammar, RuleId};
use crate::matcher::state::MatcherState;
use std::sync::Arc;

/// Depth-first walk of the trie in lockstep with the matcher: advance by a
/// byte, recurse into the matching subtree only if the matcher still
/// admits it, then roll back before trying the next sibling byte. Marks
/// every token id whose full byte string the matcher admits.
fn walk(state: &mut MatcherState, cursor: TrieCursor<'_>, mark: &mut dyn FnMut(i32)) {
    for &id in cursor.terminal_tokens() {
        mark(id);
    }
    for (byte, child) in cursor.children() {
        if state.advance(byte) {
            walk(state, child, mark);
            state.rollback(1);
        }
    }
}

fn pack_bits(vocab_size: usize, mark_all: impl FnOnce(&mut dyn FnMut(i32))) -> Vec<u32> {
    let mut bits = vec![0u32; vocab_size.div_ceil(32)];
    let mut mark = |id: i32| {
        let id = id as usize;
        if id < vocab_size {
            bits[id / 32] |= 1 << (id % 32);
        }
    };
    mark_all(&mut mark);
    bits
}

/// The packed accept-bitset (one bit per normal token id, same layout as
/// [crate::bitmask::TokenBitmask]) for the *current* state of `state`
/// against `tokenizer`'s vocabulary, reusing a cached partition when this
/// exact configuration (spec's "context class") has been seen before.
///
/// Leaves `state` unchanged: every `advance` performed during the walk is
/// undone via `rollback` before returning.
pub fn accept_bits(state: &mut MatcherState, tokenizer: &TokenizerInfo) -> RuleAcceptance {
    let signature = state.signature();
    let vocab_size = tokenizer.vocab_size();
    cache::get_or_compute_context_partition(tokenizer.fingerprint(), signature, || {
        pack_bits(vocab_size, |mark| walk(state, tokenizer.trie().walk(), mark))
    })
}

/// The accept-bitset for `rule_id` considered in isolation from the rest of
/// the matcher stack (spec §4.6 point 3): a throwaway matcher is rooted
/// directly at `rule_id`, so the result only reflects what that one
/// nonterminal alone would admit. Reused across any grammar that shares the
/// same rule body content and the same tokenizer.
pub fn rule_level_accept_bits(grammar: &Grammar, rule_id: RuleId, tokenizer: &TokenizerInfo) -> RuleAcceptance {
    cache::get_or_compute_rule_acceptance(tokenizer.fingerprint(), rule_id, || {
        let mut isolated = grammar.clone();
        isolated.set_root(rule_id);
        let mut state = MatcherState::new(Arc::new(isolated));
        let vocab_size = tokenizer.vocab_size();
        pack_bits(vocab_size, |mark| walk(&mut state, tokenizer.trie().walk(), mark))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::rule::Element;
    use crate::ir::RuleBody;
    use crate::vocab::tokenizer_info::TokenKind;

    fn literal_grammar(text: &str) -> Arc<Grammar> {
        let mut g = Grammar::bare();
        let id = g.add_rule("root", RuleBody::single(vec![Element::terminal(text)]));
        g.set_root(id);
        Arc::new(g)
    }

    fn tokenizer(words: &[&str]) -> TokenizerInfo {
        let vocab = words
            .iter()
            .enumerate()
            .map(|(i, w)| (i as u32, TokenKind::Normal(w.as_bytes().to_vec())))
            .collect();
        TokenizerInfo::from_huggingface_like(vocab, Some(vec![]), false)
    }

    #[test]
    fn only_tokens_consistent_with_the_literal_are_accepted() {
        let grammar = literal_grammar("cat");
        let mut state = MatcherState::new(grammar);
        let tok = tokenizer(&["cat", "dog", "ca"]);
        let bits = rule_level_accept_bits(state.grammar(), state.grammar().root(), &tok);
        let accepted: Vec<usize> = (0..tok.vocab_size()).filter(|&id| (bits[id / 32] >> (id % 32)) & 1 == 1).collect();
        assert!(accepted.contains(&0));
        assert!(accepted.contains(&2));
        assert!(!accepted.contains(&1));
    }

    #[test]
    fn accept_bits_leaves_the_matcher_state_unchanged() {
        let grammar = literal_grammar("ab");
        let mut state = MatcherState::new(grammar);
        let tok = tokenizer(&["a", "b"]);
        let _ = accept_bits(&mut state, &tok);
        assert!(state.advance(b'a'));
        assert!(state.advance(b'b'));
        assert!(state.can_accept());
    }
}
