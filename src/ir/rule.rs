//! Rule bodies: sequences, alternation, repetition, lookahead and the
//! extended TagDispatch construct (spec §3.1, §4.4).
use super::char_class::CharClass;
use std::fmt::{self, Formatter};

pub type RuleId = usize;

/// One element of a [Sequence].
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// A byte-string literal.
    Terminal(Vec<u8>),
    /// A Unicode character class, matching exactly one code point.
    CharClass(CharClass),
    /// A reference to another rule by id.
    NonterminalRef(RuleId),
    /// `child{min,max}`. `max = None` means unbounded.
    Repetition {
        child: Box<Element>,
        min: usize,
        max: Option<usize>,
    },
    /// A positive lookahead `(= seq)`; never consumes input, only valid at
    /// the tail of a [Sequence].
    Lookahead(Sequence),
    /// The extended dispatch-on-trigger construct (spec §4.4).
    TagDispatch(TagDispatch),
}

/// An ordered list of elements, conceptually concatenated.
pub type Sequence = Vec<Element>;

/// `(triggers, stop_eos, stop_strs, loop_after_dispatch, excludes)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TagDispatch {
    /// `(prefix, body nonterminal)`, tried in order.
    pub triggers: Vec<(Vec<u8>, RuleId)>,
    pub stop_eos: bool,
    pub stop_strs: Vec<Vec<u8>>,
    pub loop_after_dispatch: bool,
    pub excludes: Vec<Vec<u8>>,
}

/// An alternation of [Sequence]s.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleBody {
    pub alternatives: Vec<Sequence>,
}

impl RuleBody {
    pub fn new(alternatives: Vec<Sequence>) -> Self {
        Self { alternatives }
    }

    pub fn single(seq: Sequence) -> Self {
        Self::new(vec![seq])
    }

    pub fn empty() -> Self {
        Self::new(vec![Vec::new()])
    }
}

/// A named production of the grammar.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub body: RuleBody,
}

impl Element {
    pub fn terminal(bytes: impl Into<Vec<u8>>) -> Self {
        Element::Terminal(bytes.into())
    }

    pub fn nt(id: RuleId) -> Self {
        Element::NonterminalRef(id)
    }

    pub fn repeat(self, min: usize, max: Option<usize>) -> Self {
        Element::Repetition {
            child: Box::new(self),
            min,
            max,
        }
    }

    pub fn opt(self) -> Self {
        self.repeat(0, Some(1))
    }

    pub fn star(self) -> Self {
        self.repeat(0, None)
    }

    pub fn plus(self) -> Self {
        self.repeat(1, None)
    }
}

fn escape_terminal(bytes: &[u8], f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "\"")?;
    for &b in bytes {
        match b {
            b'"' => write!(f, "\\\"")?,
            b'\\' => write!(f, "\\\\")?,
            b'\n' => write!(f, "\\n")?,
            b'\r' => write!(f, "\\r")?,
            b'\t' => write!(f, "\\t")?,
            0x20..=0x7E => write!(f, "{}", b as char)?,
            _ => write!(f, "\\x{b:02X}")?,
        }
    }
    write!(f, "\"")
}

impl Element {
    pub(crate) fn display(&self, f: &mut Formatter<'_>, names: &dyn Fn(RuleId) -> String) -> fmt::Result {
        match self {
            Element::Terminal(bytes) => escape_terminal(bytes, f),
            Element::CharClass(class) => write!(f, "{class}"),
            Element::NonterminalRef(id) => write!(f, "{}", names(*id)),
            Element::Repetition { child, min, max } => {
                child.display(f, names)?;
                match (*min, *max) {
                    (0, Some(1)) => write!(f, "?"),
                    (0, None) => write!(f, "*"),
                    (1, None) => write!(f, "+"),
                    (m, None) => write!(f, "{{{m},}}"),
                    (m, Some(n)) if m == n => write!(f, "{{{m}}}"),
                    (m, Some(n)) => write!(f, "{{{m},{n}}}"),
                }
            }
            Element::Lookahead(seq) => {
                write!(f, "(= ")?;
                display_sequence(seq, f, names)?;
                write!(f, ")")
            }
            Element::TagDispatch(dispatch) => dispatch.display(f, names),
        }
    }
}

fn display_sequence(seq: &Sequence, f: &mut Formatter<'_>, names: &dyn Fn(RuleId) -> String) -> fmt::Result {
    if seq.is_empty() {
        return write!(f, "\"\"");
    }
    for (i, el) in seq.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        el.display(f, names)?;
    }
    Ok(())
}

impl TagDispatch {
    fn display(&self, f: &mut Formatter<'_>, names: &dyn Fn(RuleId) -> String) -> fmt::Result {
        write!(f, "TagDispatch(")?;
        for (prefix, body) in &self.triggers {
            write!(f, "(")?;
            escape_terminal(prefix, f)?;
            write!(f, ", {})", names(*body))?;
            write!(f, ", ")?;
        }
        write!(f, "stop_eos={}, stop_str=(", self.stop_eos)?;
        for (i, s) in self.stop_strs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            escape_terminal(s, f)?;
        }
        write!(
            f,
            "), loop_after_dispatch={}, excludes=(",
            self.loop_after_dispatch
        )?;
        for (i, s) in self.excludes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            escape_terminal(s, f)?;
        }
        write!(f, "))")
    }
}

pub(crate) fn display_rule_body(
    body: &RuleBody,
    f: &mut Formatter<'_>,
    names: &dyn Fn(RuleId) -> String,
) -> fmt::Result {
    for (i, seq) in body.alternatives.iter().enumerate() {
        if i > 0 {
            write!(f, " | ")?;
        }
        display_sequence(seq, f, names)?;
    }
    Ok(())
}
