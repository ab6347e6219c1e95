//! `regex_to_ebnf`: lowers the practical regex subset used by JSON-schema
//! `pattern` constraints (and standalone `Regex` structural-tag nodes) into
//! a grammar fragment (spec §3 "External lowerings", C3).
//!
//! Supported: literals, `.`, bracket classes with ranges/negation/shorthand
//! escapes (`\d \w \s \D \W \S`), grouping, alternation, `* + ? {m,n}`, and
//! anchors `^`/`$` (accepted, not separately enforced — the whole fragment
//! is always matched end to end, mirroring how `regex::bytes::Regex` is
//! used elsewhere in the pack). Backreferences and lookaround are rejected.
use crate::error::GrammarError;
use crate::ir::{CharClass, Element, Grammar, RuleBody, RuleId, Sequence};

type PResult<T> = Result<T, GrammarError>;

pub fn regex_to_ebnf(pattern: &str, grammar: &mut Grammar) -> PResult<RuleId> {
    let mut parser = RegexParser {
        chars: pattern.chars().collect(),
        i: 0,
        grammar,
    };
    let body = parser.parse_alt()?;
    if parser.i != parser.chars.len() {
        return Err(GrammarError::compilation(format!(
            "trailing characters in regex pattern at position {}",
            parser.i
        )));
    }
    let name = parser.grammar.fresh_name("regex");
    Ok(parser.grammar.add_rule(name, body))
}

struct RegexParser<'g> {
    chars: Vec<char>,
    i: usize,
    grammar: &'g mut Grammar,
}

impl<'g> RegexParser<'g> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.i += 1;
        }
        c
    }

    fn parse_alt(&mut self) -> PResult<RuleBody> {
        let mut alternatives = vec![self.parse_concat()?];
        while self.peek() == Some('|') {
            self.i += 1;
            alternatives.push(self.parse_concat()?);
        }
        Ok(RuleBody::new(alternatives))
    }

    fn parse_concat(&mut self) -> PResult<Sequence> {
        let mut seq = Vec::new();
        loop {
            match self.peek() {
                None | Some('|') | Some(')') => break,
                Some('^') | Some('$') => {
                    self.i += 1;
                }
                _ => seq.push(self.parse_repeat()?),
            }
        }
        Ok(seq)
    }

    fn parse_repeat(&mut self) -> PResult<Element> {
        let atom = self.parse_atom()?;
        self.parse_quantifier(atom)
    }

    fn parse_quantifier(&mut self, atom: Element) -> PResult<Element> {
        match self.peek() {
            Some('?') => {
                self.i += 1;
                Ok(atom.opt())
            }
            Some('*') => {
                self.i += 1;
                Ok(atom.star())
            }
            Some('+') => {
                self.i += 1;
                Ok(atom.plus())
            }
            Some('{') => {
                let Some((min, max, consumed)) = self.try_parse_bound_quantifier() else {
                    return Ok(atom);
                };
                self.i += consumed;
                Ok(atom.repeat(min, max))
            }
            _ => Ok(atom),
        }
    }

    /// `{m}`, `{m,}`, `{m,n}`. Returns `None` (leaving position untouched)
    /// if what follows `{` isn't a well-formed bound, in which case `{` is
    /// just a literal brace.
    fn try_parse_bound_quantifier(&self) -> Option<(usize, Option<usize>, usize)> {
        let mut j = self.i + 1;
        let start = j;
        while matches!(self.chars.get(j), Some(c) if c.is_ascii_digit()) {
            j += 1;
        }
        if j == start {
            return None;
        }
        let min: usize = self.chars[start..j].iter().collect::<String>().parse().ok()?;
        let max = if self.chars.get(j) == Some(&',') {
            j += 1;
            let max_start = j;
            while matches!(self.chars.get(j), Some(c) if c.is_ascii_digit()) {
                j += 1;
            }
            if j == max_start {
                None
            } else {
                Some(self.chars[max_start..j].iter().collect::<String>().parse().ok()?)
            }
        } else {
            Some(min)
        };
        if self.chars.get(j) != Some(&'}') {
            return None;
        }
        j += 1;
        Some((min, max, j - self.i))
    }

    fn parse_atom(&mut self) -> PResult<Element> {
        match self.peek() {
            Some('.') => {
                self.i += 1;
                Ok(Element::CharClass(CharClass::new(
                    vec![(0, 0x09), (0x0B, 0x10FFFF)],
                    false,
                )))
            }
            Some('[') => self.parse_bracket_class(),
            Some('(') => self.parse_group(),
            Some('\\') => {
                self.i += 1;
                self.parse_escape_atom()
            }
            Some(c) => {
                self.i += 1;
                Ok(Element::terminal(c.to_string()))
            }
            None => Err(GrammarError::compilation("unexpected end of regex pattern")),
        }
    }

    fn parse_group(&mut self) -> PResult<Element> {
        self.i += 1; // '('
        if self.peek() == Some('?') {
            match self.peek_at(1) {
                Some(':') => {
                    self.i += 2;
                }
                Some('=') | Some('!') => {
                    return Err(GrammarError::compilation("lookaround is not supported in regex patterns"));
                }
                Some('<') => {
                    if matches!(self.peek_at(2), Some('=') | Some('!')) {
                        return Err(GrammarError::compilation("lookaround is not supported in regex patterns"));
                    }
                    // named group `(?<name>...)` or `(?P<name>...)`: skip to matching '>'.
                    while !matches!(self.peek(), Some('>') | None) {
                        self.i += 1;
                    }
                    self.i += 1;
                }
                _ => {
                    if self.peek_at(1) == Some('P') && self.peek_at(2) == Some('<') {
                        self.i += 3;
                        while !matches!(self.peek(), Some('>') | None) {
                            self.i += 1;
                        }
                        self.i += 1;
                    }
                }
            }
        }
        let body = self.parse_alt()?;
        if self.advance() != Some(')') {
            return Err(GrammarError::compilation("unbalanced parenthesis in regex pattern"));
        }
        if body.alternatives.len() == 1 {
            let only = body.alternatives.into_iter().next().unwrap();
            if only.len() == 1 {
                return Ok(only.into_iter().next().unwrap());
            }
            let name = self.grammar.fresh_name("regex_group");
            let id = self.grammar.add_rule(name, RuleBody::single(only));
            return Ok(Element::nt(id));
        }
        let name = self.grammar.fresh_name("regex_group");
        let id = self.grammar.add_rule(name, body);
        Ok(Element::nt(id))
    }

    fn parse_escape_atom(&mut self) -> PResult<Element> {
        match self.advance() {
            Some(c) if matches!(c, 'd' | 'D' | 'w' | 'W' | 's' | 'S') => {
                Ok(Element::CharClass(shorthand_class(c)))
            }
            Some('b') | Some('B') => Err(GrammarError::compilation(
                "word-boundary anchors are not supported in regex patterns",
            )),
            Some(c) if c.is_ascii_digit() => Err(GrammarError::compilation(
                "backreferences are not supported in regex patterns",
            )),
            Some(c) => Ok(Element::terminal(unescape_char(c).to_string())),
            None => Err(GrammarError::compilation("trailing backslash in regex pattern")),
        }
    }

    fn parse_bracket_class(&mut self) -> PResult<Element> {
        self.i += 1; // '['
        let negated = if self.peek() == Some('^') {
            self.i += 1;
            true
        } else {
            false
        };
        let mut ranges = Vec::new();
        let mut first = true;
        loop {
            match self.peek() {
                Some(']') if !first => {
                    self.i += 1;
                    break;
                }
                None => return Err(GrammarError::compilation("unterminated character class in regex pattern")),
                Some('\\') => {
                    self.i += 1;
                    match self.advance() {
                        Some(c) if matches!(c, 'd' | 'D' | 'w' | 'W' | 's' | 'S') => {
                            ranges.extend(shorthand_class(c).ranges);
                        }
                        Some(c) => {
                            let lo = unescape_char(c) as u32;
                            ranges.push(self.maybe_range(lo)?);
                        }
                        None => return Err(GrammarError::compilation("trailing backslash in character class")),
                    }
                }
                Some(c) => {
                    self.i += 1;
                    ranges.push(self.maybe_range(c as u32)?);
                }
            }
            first = false;
        }
        Ok(Element::CharClass(CharClass::new(ranges, negated)))
    }

    fn maybe_range(&mut self, lo: u32) -> PResult<(u32, u32)> {
        if self.peek() == Some('-') && self.peek_at(1) != Some(']') && self.peek_at(1).is_some() {
            self.i += 1;
            let hi = match self.advance() {
                Some('\\') => match self.advance() {
                    Some(c) => unescape_char(c) as u32,
                    None => return Err(GrammarError::compilation("trailing backslash in character class")),
                },
                Some(c) => c as u32,
                None => return Err(GrammarError::compilation("unterminated character class in regex pattern")),
            };
            Ok((lo, hi))
        } else {
            Ok((lo, lo))
        }
    }
}

fn unescape_char(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'f' => '\u{0C}',
        'v' => '\u{0B}',
        '0' => '\0',
        other => other,
    }
}

fn shorthand_class(c: char) -> CharClass {
    match c {
        'd' => CharClass::new(vec![(b'0' as u32, b'9' as u32)], false),
        'D' => CharClass::new(vec![(b'0' as u32, b'9' as u32)], true),
        'w' => CharClass::new(
            vec![(b'a' as u32, b'z' as u32), (b'A' as u32, b'Z' as u32), (b'0' as u32, b'9' as u32), (b'_' as u32, b'_' as u32)],
            false,
        ),
        'W' => CharClass::new(
            vec![(b'a' as u32, b'z' as u32), (b'A' as u32, b'Z' as u32), (b'0' as u32, b'9' as u32), (b'_' as u32, b'_' as u32)],
            true,
        ),
        's' => CharClass::new(
            vec![(b' ' as u32, b' ' as u32), (b'\t' as u32, b'\r' as u32)],
            false,
        ),
        'S' => CharClass::new(
            vec![(b' ' as u32, b' ' as u32), (b'\t' as u32, b'\r' as u32)],
            true,
        ),
        _ => unreachable!("shorthand_class called with non-shorthand char"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_literal_concatenation() {
        let mut grammar = Grammar::new();
        let id = regex_to_ebnf("abc", &mut grammar).unwrap();
        grammar.set_root(id);
        assert_eq!(grammar.rule(id).body.alternatives[0].len(), 3);
    }

    #[test]
    fn lowers_alternation_and_group_repetition() {
        let mut grammar = Grammar::new();
        let id = regex_to_ebnf("(ab|cd)+", &mut grammar).unwrap();
        grammar.set_root(id);
        assert_eq!(grammar.rule(id).body.alternatives.len(), 1);
    }

    #[test]
    fn lowers_digit_shorthand_and_bound_quantifier() {
        let mut grammar = Grammar::new();
        let id = regex_to_ebnf("\\d{2,4}", &mut grammar).unwrap();
        grammar.set_root(id);
        match &grammar.rule(id).body.alternatives[0][0] {
            Element::Repetition { min, max, .. } => {
                assert_eq!(*min, 2);
                assert_eq!(*max, Some(4));
            }
            other => panic!("expected a repetition, got {other:?}"),
        }
    }

    #[test]
    fn rejects_lookaround() {
        let mut grammar = Grammar::new();
        assert!(regex_to_ebnf("(?=abc)", &mut grammar).is_err());
    }

    #[test]
    fn rejects_backreferences() {
        let mut grammar = Grammar::new();
        assert!(regex_to_ebnf("(a)\\1", &mut grammar).is_err());
    }
}
