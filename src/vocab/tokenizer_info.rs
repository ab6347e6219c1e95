//! Tokenizer metadata, consumed as already-decoded `(token_id, bytes)`
//! pairs per the external contract (spec §6.3, C9). Tokenizer *loading* is
//! out of scope: nothing here parses a `tokenizer.json` or fetches a vocab
//! file; `from_huggingface_like` only assembles a `TokenizerInfo` from data
//! the caller already decoded.
use crate::cache::Fingerprint;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A single vocabulary entry: either a normal token decoding to bytes that
/// may appear in matcher output, or a special/meta token that is never fed
/// to the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Normal(Vec<u8>),
    Special,
}

/// Vocabulary metadata for a fixed set of `(token_id, bytes_or_special)`
/// entries (spec §6.3). Immutable once built; cheap to clone (an `Arc`
/// around the trie would only help once a metrics-scale vocab shows up as
/// a bottleneck, not attempted here).
#[derive(Debug, Clone)]
pub struct TokenizerInfo {
    decoded_vocab: Vec<TokenKind>,
    stop_token_ids: Vec<i32>,
    special_token_ids: Vec<i32>,
    add_prefix_space: bool,
    trie: super::trie::TokenTrie,
}

impl TokenizerInfo {
    /// Build from a list of `(token_id, kind)` pairs, exactly as a caller
    /// would assemble from a HuggingFace-style `tokenizer.json`'s already
    /// decoded vocabulary (the parsing of that file itself is the caller's
    /// job, not this crate's).
    pub fn from_huggingface_like(
        encoded_vocab: Vec<(u32, TokenKind)>,
        stop_token_ids: Option<Vec<i32>>,
        add_prefix_space: bool,
    ) -> Self {
        let vocab_size = encoded_vocab.iter().map(|(id, _)| *id as usize + 1).max().unwrap_or(0);
        let mut decoded_vocab = vec![TokenKind::Special; vocab_size];
        let mut trie = super::trie::TokenTrie::new();
        let mut special_token_ids = Vec::new();
        for (id, kind) in encoded_vocab {
            match &kind {
                TokenKind::Normal(bytes) => trie.insert(bytes, id as i32),
                TokenKind::Special => special_token_ids.push(id as i32),
            }
            decoded_vocab[id as usize] = kind;
        }
        special_token_ids.sort_unstable();
        let stop_token_ids = stop_token_ids.unwrap_or_else(|| special_token_ids.clone());
        TokenizerInfo { decoded_vocab, stop_token_ids, special_token_ids, add_prefix_space, trie }
    }

    pub fn vocab_size(&self) -> usize {
        self.decoded_vocab.len()
    }

    pub fn add_prefix_space(&self) -> bool {
        self.add_prefix_space
    }

    pub fn decoded_vocab(&self) -> &[TokenKind] {
        &self.decoded_vocab
    }

    pub fn bytes_of(&self, token_id: i32) -> Option<&[u8]> {
        match self.decoded_vocab.get(token_id as usize)? {
            TokenKind::Normal(bytes) => Some(bytes.as_slice()),
            TokenKind::Special => None,
        }
    }

    pub fn stop_token_ids(&self) -> &[i32] {
        &self.stop_token_ids
    }

    pub fn special_token_ids(&self) -> &[i32] {
        &self.special_token_ids
    }

    pub(crate) fn trie(&self) -> &super::trie::TokenTrie {
        &self.trie
    }

    /// A stable content fingerprint, used alongside a grammar's own
    /// fingerprint to key the rule-level acceptance cache (spec §4.6 point
    /// 3): the same rule can be compiled against two different
    /// vocabularies and must not share acceptance partitions between them.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        self.add_prefix_space.hash(&mut hasher);
        self.stop_token_ids.hash(&mut hasher);
        for kind in &self.decoded_vocab {
            match kind {
                TokenKind::Normal(bytes) => {
                    0u8.hash(&mut hasher);
                    bytes.hash(&mut hasher);
                }
                TokenKind::Special => 1u8.hash(&mut hasher),
            }
        }
        hasher.finish()
    }

    /// A short human-readable summary, grounded in the teacher pack's
    /// `DumpMetadata`-style debug helper.
    pub fn dump_metadata(&self) -> String {
        format!(
            "vocab_size={} stop_tokens={} special_tokens={} add_prefix_space={}",
            self.vocab_size(),
            self.stop_token_ids.len(),
            self.special_token_ids.len(),
            self.add_prefix_space
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_tokens_are_looked_up_by_bytes_special_ones_are_not() {
        let info = TokenizerInfo::from_huggingface_like(
            vec![(0, TokenKind::Normal(b"a".to_vec())), (1, TokenKind::Special)],
            None,
            false,
        );
        assert_eq!(info.bytes_of(0), Some(b"a".as_slice()));
        assert_eq!(info.bytes_of(1), None);
        assert_eq!(info.special_token_ids(), &[1]);
        assert_eq!(info.stop_token_ids(), &[1]);
    }

    #[test]
    fn fingerprint_is_stable_across_equal_vocabularies() {
        let build = || {
            TokenizerInfo::from_huggingface_like(
                vec![(0, TokenKind::Normal(b"x".to_vec())), (1, TokenKind::Normal(b"y".to_vec()))],
                Some(vec![5]),
                true,
            )
        };
        assert_eq!(build().fingerprint(), build().fingerprint());
    }
}
