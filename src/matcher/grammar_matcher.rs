//! The public, stateful grammar matcher (spec §4.5, C8): wraps
//! [MatcherState] with token-level operations and vocabulary-aware bitmask
//! emission. Method names are grounded in
//! `trymirai-xgrammar-rs/src/matcher/grammar_matcher.rs`'s
//! `GrammarMatcher` (`accept_token`, `accept_string`,
//! `fill_next_token_bitmask`, `find_jump_forward_string`, `rollback`,
//! `is_terminated`, `reset`, `stop_token_ids`), reimplemented over the
//! in-process [MatcherState] instead of an FFI handle.
use super::state::MatcherState;
use crate::bitmask::TokenBitmask;
use crate::compiler::grammar_compiler::CompiledGrammar;
use crate::vocab::{analysis, TokenKind, TokenizerInfo};
use std::sync::Arc;

pub struct GrammarMatcher {
    state: MatcherState,
    tokenizer: Arc<TokenizerInfo>,
    stop_token_ids: Vec<i32>,
    terminate_without_stop_token: bool,
    /// Byte length consumed per accepted token, most recent last; lets
    /// `rollback(n)` convert a token count into the byte count
    /// [MatcherState::rollback] actually understands.
    token_byte_lengths: Vec<usize>,
    terminated: bool,
}

impl GrammarMatcher {
    /// Construct a matcher from a compiled grammar and the vocabulary it
    /// will be asked to mask. `override_stop_tokens`, if given, replaces
    /// the tokenizer's own special-token-derived stop set.
    pub fn new(
        compiled_grammar: &CompiledGrammar,
        tokenizer: Arc<TokenizerInfo>,
        override_stop_tokens: Option<Vec<i32>>,
        terminate_without_stop_token: bool,
    ) -> Self {
        let stop_token_ids = override_stop_tokens.unwrap_or_else(|| tokenizer.stop_token_ids().to_vec());
        GrammarMatcher {
            state: MatcherState::new(compiled_grammar.grammar_arc()),
            tokenizer,
            stop_token_ids,
            terminate_without_stop_token,
            token_byte_lengths: Vec::new(),
            terminated: false,
        }
    }

    /// Accept one token and update the matcher's state. Returns `false`
    /// (state untouched) if the token does not match the grammar, the
    /// matcher has already terminated, the id is out of range, or the
    /// token is a special token that isn't a configured stop token.
    pub fn accept_token(&mut self, token_id: i32) -> bool {
        if self.terminated {
            return false;
        }
        if self.stop_token_ids.contains(&token_id) {
            if !self.state.can_accept() {
                return false;
            }
            self.token_byte_lengths.push(0);
            self.terminated = true;
            return true;
        }
        let Some(bytes) = self.tokenizer.bytes_of(token_id) else { return false };
        if !self.state.advance_string(bytes) {
            return false;
        }
        self.token_byte_lengths.push(bytes.len());
        if self.terminate_without_stop_token && self.state.is_terminated() {
            self.terminated = true;
        }
        true
    }

    /// Accept a string directly, bypassing tokenization. Counted as one
    /// step for rollback purposes, mirroring the teacher's "whole string
    /// is one step" contract.
    pub fn accept_string(&mut self, input: &str) -> bool {
        if self.terminated {
            return false;
        }
        if !self.state.advance_string(input.as_bytes()) {
            return false;
        }
        self.token_byte_lengths.push(input.len());
        if self.terminate_without_stop_token && self.state.is_terminated() {
            self.terminated = true;
        }
        true
    }

    /// Fill `bitmask`'s row `row` with the accept/reject partition for the
    /// next token. Does not mutate matcher state. Returns whether the mask
    /// is non-trivial (some token is rejected) and so needs to be applied.
    pub fn fill_next_token_bitmask(&mut self, bitmask: &mut TokenBitmask, row: usize) -> bool {
        if self.terminated {
            bitmask.fill_row_from_accepted(row, std::iter::empty());
            return true;
        }
        let accept_bits = analysis::accept_bits(&mut self.state, &self.tokenizer);
        let mut any_rejected = false;
        for (word_index, word) in bitmask.row_mut(row).iter_mut().enumerate() {
            let accepted_word = accept_bits.get(word_index).copied().unwrap_or(0);
            if accepted_word != u32::MAX {
                any_rejected = true;
            }
            *word = accepted_word;
        }
        let can_stop = self.state.can_accept();
        for &id in &self.stop_token_ids {
            if can_stop && (id as usize) < bitmask.vocab_size() {
                bitmask.set_accept(row, id as usize, true);
            }
        }
        for (id, kind) in self.tokenizer.decoded_vocab().iter().enumerate() {
            if matches!(kind, TokenKind::Special) && !self.stop_token_ids.contains(&(id as i32)) {
                bitmask.set_accept(row, id, false);
                any_rejected = true;
            }
        }
        any_rejected
    }

    /// The longest byte string guaranteed to conform to the grammar from
    /// the current state, decoded lossily as UTF-8 per spec §4.5.
    pub fn find_jump_forward_string(&mut self) -> String {
        self.state.find_jump_forward_string()
    }

    /// Undo the last `num_tokens` accepted tokens (or strings).
    pub fn rollback(&mut self, num_tokens: usize) {
        let mut bytes = 0;
        for _ in 0..num_tokens {
            let Some(len) = self.token_byte_lengths.pop() else { break };
            bytes += len;
        }
        self.state.rollback(bytes);
        self.terminated = false;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.token_byte_lengths.clear();
        self.terminated = false;
    }

    pub fn stop_token_ids(&self) -> &[i32] {
        &self.stop_token_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::grammar_compiler::compile_ebnf;

    fn tokenizer(words: &[(&str, bool)]) -> Arc<TokenizerInfo> {
        let vocab = words
            .iter()
            .enumerate()
            .map(|(i, (w, special))| {
                let kind = if *special { TokenKind::Special } else { TokenKind::Normal(w.as_bytes().to_vec()) };
                (i as u32, kind)
            })
            .collect();
        Arc::new(TokenizerInfo::from_huggingface_like(vocab, None, false))
    }

    #[test]
    fn accepts_tokens_that_spell_out_the_grammar() {
        let compiled = compile_ebnf("root ::= \"ok\"").unwrap();
        let tok = tokenizer(&[("o", false), ("k", false), ("<eos>", true)]);
        let stop = tok.special_token_ids().to_vec();
        let mut matcher = GrammarMatcher::new(&compiled, tok, Some(stop), false);
        assert!(matcher.accept_token(0));
        assert!(!matcher.is_terminated());
        assert!(matcher.accept_token(1));
        assert!(matcher.accept_token(2));
        assert!(matcher.is_terminated());
    }

    #[test]
    fn rejects_a_token_that_does_not_match() {
        let compiled = compile_ebnf("root ::= \"ok\"").unwrap();
        let tok = tokenizer(&[("o", false), ("z", false)]);
        let mut matcher = GrammarMatcher::new(&compiled, tok, Some(vec![]), false);
        assert!(matcher.accept_token(0));
        assert!(!matcher.accept_token(1));
    }

    #[test]
    fn rollback_undoes_accepted_tokens() {
        let compiled = compile_ebnf("root ::= \"ok\"").unwrap();
        let tok = tokenizer(&[("o", false), ("k", false)]);
        let mut matcher = GrammarMatcher::new(&compiled, tok, Some(vec![]), false);
        matcher.accept_token(0);
        matcher.accept_token(1);
        matcher.rollback(1);
        assert!(matcher.accept_token(1));
    }

    #[test]
    fn fill_next_token_bitmask_rejects_mismatched_tokens() {
        let compiled = compile_ebnf("root ::= \"ok\"").unwrap();
        let tok = tokenizer(&[("o", false), ("z", false)]);
        let mut matcher = GrammarMatcher::new(&compiled, tok, Some(vec![]), false);
        let mut mask = TokenBitmask::new_all_true(1, 2);
        let needs_apply = matcher.fill_next_token_bitmask(&mut mask, 0);
        assert!(needs_apply);
        assert!(mask.accepts(0, 0));
        assert!(!mask.accepts(0, 1));
    }
}
