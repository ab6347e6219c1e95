//! The byte-level matcher engine (spec §4.4/§4.5, C8): a set of live
//! "threads", each a call stack of [Frame]s over the grammar arena,
//! advanced one byte at a time. Plays the role of the spec's "stack of
//! stacks" using independent per-thread stacks (forked by
//! `Vec::clone` at every branch point) rather than a shared
//! graph-structured stack — simpler to implement correctly, at the cost of
//! sharing no structure between threads that happen to agree on a suffix.
//! Acceptable at the scale these grammars run at; noted in DESIGN.md.
use crate::ir::rule::{Element, TagDispatch};
use crate::ir::{Grammar, RuleId, Sequence};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SeqRef {
    Named(RuleId, usize),
    Inline(Rc<Sequence>),
}

impl SeqRef {
    fn elements<'a>(&'a self, grammar: &'a Grammar) -> &'a [Element] {
        match self {
            SeqRef::Named(id, alt) => &grammar.rule(*id).body.alternatives[*alt],
            SeqRef::Inline(seq) => seq.as_slice(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sub {
    None,
    Term(usize),
    Class(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SeqFrame {
    seq: SeqRef,
    pos: usize,
    sub: Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RepFrame {
    child: Rc<Element>,
    min: usize,
    max: Option<usize>,
    count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DispatchFrame {
    dispatch: Rc<TagDispatch>,
    buf: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Seq(SeqFrame),
    Rep(RepFrame),
    Dispatch(DispatchFrame),
}

pub(crate) type GuardId = usize;

#[derive(Debug, Clone)]
pub(crate) struct Thread {
    frames: Vec<Frame>,
    pending_guards: Vec<GuardId>,
}

impl Thread {
    fn is_accepted(&self) -> bool {
        self.frames.is_empty()
    }
}

/// One thread per alternative of the root rule, exactly as if the root were
/// entered through a [NonterminalRef](Element::NonterminalRef) from an empty
/// caller frame.
fn initial_threads(grammar: &Grammar) -> Vec<Thread> {
    let empty = Thread { frames: Vec::new(), pending_guards: Vec::new() };
    push_rule_alternatives(&empty, grammar.root(), grammar)
}

#[derive(Debug)]
enum GuardState {
    Alive(Vec<Thread>),
    Satisfied,
    Dead,
}

#[derive(Debug, Default)]
pub(crate) struct GuardPool {
    guards: Vec<GuardState>,
}

impl GuardPool {
    /// Spawns a guard and runs its initial epsilon closure so its thread(s)
    /// are already sitting at a byte boundary (blocked on a terminal/class,
    /// or accepted) by the time the first `step_byte` call reaches it.
    fn spawn(&mut self, seq: Sequence, grammar: &Grammar) -> GuardId {
        let id = self.guards.len();
        let thread = Thread {
            frames: vec![Frame::Seq(SeqFrame { seq: SeqRef::Inline(Rc::new(seq)), pos: 0, sub: Sub::None })],
            pending_guards: Vec::new(),
        };
        let closed = close_thread_no_guards(thread, grammar);
        let state = if closed.iter().any(Thread::is_accepted) {
            GuardState::Satisfied
        } else if closed.is_empty() {
            GuardState::Dead
        } else {
            GuardState::Alive(closed)
        };
        self.guards.push(state);
        id
    }

    fn is_dead(&self, id: GuardId) -> bool {
        matches!(self.guards[id], GuardState::Dead)
    }

    fn is_satisfied(&self, id: GuardId) -> bool {
        matches!(self.guards[id], GuardState::Satisfied)
    }

    fn step_byte(&mut self, grammar: &Grammar, byte: u8) {
        for state in self.guards.iter_mut() {
            if let GuardState::Alive(threads) = state {
                let mut next = Vec::new();
                for thread in threads.drain(..) {
                    if let Some(advanced) = advance_thread(thread, grammar, byte) {
                        next.extend(close_thread_no_guards(advanced, grammar));
                    }
                }
                if next.iter().any(Thread::is_accepted) {
                    *state = GuardState::Satisfied;
                } else if next.is_empty() {
                    *state = GuardState::Dead;
                } else {
                    *state = GuardState::Alive(next);
                }
            }
        }
    }
}

/// A guard's own assertion body is validated (spec §3.1) to never contain a
/// `TagDispatch`, so it can never itself need a nested guard pool; a
/// throwaway pool is used purely to satisfy [close_thread]'s signature.
fn close_thread_no_guards(thread: Thread, grammar: &Grammar) -> Vec<Thread> {
    let mut scratch = GuardPool::default();
    close_thread(thread, grammar, &mut scratch)
}

enum StepResult {
    Dead,
    Blocked(Thread),
    Accepted(Thread),
    More(Vec<Thread>),
}

fn classify(dispatch: &TagDispatch, buf: &[u8]) -> Classification {
    if dispatch.stop_strs.iter().any(|s| s == buf) {
        return Classification::Stop;
    }
    if dispatch.excludes.iter().any(|s| s == buf) {
        return Classification::Reject;
    }
    for (prefix, body) in &dispatch.triggers {
        if buf == prefix.as_slice() {
            return Classification::Trigger(*body);
        }
    }
    Classification::Continue
}

enum Classification {
    Stop,
    Reject,
    Trigger(RuleId),
    Continue,
}

fn is_prefix_of_something(dispatch: &TagDispatch, buf: &[u8]) -> bool {
    dispatch.triggers.iter().any(|(p, _)| p.starts_with(buf))
        || dispatch.stop_strs.iter().any(|s| s.starts_with(buf))
        || dispatch.excludes.iter().any(|s| s.starts_with(buf))
}

fn push_rule_alternatives(th: &Thread, rule: RuleId, grammar: &Grammar) -> Vec<Thread> {
    let alt_count = grammar.rule(rule).body.alternatives.len();
    (0..alt_count)
        .map(|alt| {
            let mut forked = th.clone();
            forked.frames.push(Frame::Seq(SeqFrame { seq: SeqRef::Named(rule, alt), pos: 0, sub: Sub::None }));
            forked
        })
        .collect()
}

fn step(mut th: Thread, grammar: &Grammar, guards: &mut GuardPool) -> StepResult {
    let Some(top) = th.frames.last().cloned() else {
        return StepResult::Accepted(th);
    };
    match top {
        Frame::Seq(mut sf) => {
            let elems_len = sf.seq.elements(grammar).len();
            if sf.pos >= elems_len {
                th.frames.pop();
                return StepResult::More(vec![th]);
            }
            let element = sf.seq.elements(grammar)[sf.pos].clone();
            match element {
                Element::Terminal(bytes) => {
                    if bytes.is_empty() {
                        sf.pos += 1;
                        *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                        StepResult::More(vec![th])
                    } else {
                        sf.sub = Sub::Term(0);
                        *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                        StepResult::Blocked(th)
                    }
                }
                Element::CharClass(_) => {
                    sf.sub = Sub::Class(Vec::new());
                    *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                    StepResult::Blocked(th)
                }
                Element::NonterminalRef(id) => {
                    sf.pos += 1;
                    *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                    if grammar.rule(id).body.alternatives.is_empty() {
                        return StepResult::Dead;
                    }
                    StepResult::More(push_rule_alternatives(&th, id, grammar))
                }
                Element::Repetition { child, min, max } => {
                    sf.pos += 1;
                    *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                    let mut out = Vec::new();
                    if min == 0 {
                        out.push(th.clone());
                    }
                    if max.map_or(true, |m| m > 0) {
                        let mut entered = th.clone();
                        entered.frames.push(Frame::Rep(RepFrame { child: Rc::new((*child).clone()), min, max, count: 0 }));
                        entered.frames.push(Frame::Seq(SeqFrame {
                            seq: SeqRef::Inline(Rc::new(vec![(*child).clone()])),
                            pos: 0,
                            sub: Sub::None,
                        }));
                        out.push(entered);
                    }
                    if out.is_empty() {
                        StepResult::Dead
                    } else {
                        StepResult::More(out)
                    }
                }
                Element::Lookahead(seq) => {
                    sf.pos += 1;
                    *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                    let gid = guards.spawn(seq, grammar);
                    th.pending_guards.push(gid);
                    StepResult::More(vec![th])
                }
                Element::TagDispatch(dispatch) => {
                    sf.pos += 1;
                    *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                    let dispatch = Rc::new(dispatch);
                    match classify(&dispatch, &[]) {
                        Classification::Stop => StepResult::More(vec![th]),
                        Classification::Reject => StepResult::Dead,
                        Classification::Continue => {
                            th.frames.push(Frame::Dispatch(DispatchFrame { dispatch, buf: Vec::new() }));
                            StepResult::Blocked(th)
                        }
                        Classification::Trigger(_) => unreachable!("a trigger prefix can't be empty"),
                    }
                }
            }
        }
        Frame::Rep(mut rf) => {
            rf.count += 1;
            let mut out = Vec::new();
            if rf.count >= rf.min {
                let mut stop_th = th.clone();
                stop_th.frames.pop();
                out.push(stop_th);
            }
            if rf.max.map_or(true, |m| rf.count < m) {
                let mut again = th.clone();
                *again.frames.last_mut().unwrap() = Frame::Rep(rf.clone());
                again.frames.push(Frame::Seq(SeqFrame {
                    seq: SeqRef::Inline(Rc::new(vec![(*rf.child).clone()])),
                    pos: 0,
                    sub: Sub::None,
                }));
                out.push(again);
            }
            if out.is_empty() {
                StepResult::Dead
            } else {
                StepResult::More(out)
            }
        }
        // By the time a thread reaches `step` with `Dispatch` on top, every
        // actual transition (Stop/Reject/Trigger/Continue) for the byte that
        // put it there was already decided by `advance_thread`/
        // `advance_thread_multi` — this only runs for a *freshly (re)entered*
        // dispatch, i.e. right after `loop_after_dispatch` pushes a
        // cleared-buffer continuation frame following a triggered body. It
        // must not re-derive a verdict from a buffer it didn't consume a
        // byte for, so it simply re-applies `classify` to whatever buffer is
        // actually there (idempotent for a Continue-state buffer) rather
        // than clearing or unconditionally popping it.
        Frame::Dispatch(df) => match classify(&df.dispatch, &df.buf) {
            Classification::Stop => {
                th.frames.pop();
                StepResult::More(vec![th])
            }
            Classification::Reject => StepResult::Dead,
            Classification::Continue => StepResult::Blocked(th),
            Classification::Trigger(_) => {
                unreachable!("advance_thread_multi consumes a trigger before step() sees this frame")
            }
        },
    }
}

pub(crate) fn close_thread(th: Thread, grammar: &Grammar, guards: &mut GuardPool) -> Vec<Thread> {
    let mut pending = vec![th];
    let mut out = Vec::new();
    while let Some(t) = pending.pop() {
        match step(t, grammar, guards) {
            StepResult::Dead => {}
            StepResult::Blocked(t) => out.push(t),
            StepResult::Accepted(t) => out.push(t),
            StepResult::More(ts) => pending.extend(ts),
        }
    }
    out
}

/// UTF-8 continuation-byte count implied by a leading byte, or `None` if
/// `lead` can't start a valid sequence.
fn utf8_seq_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

fn decode_code_point(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.chars().next().map(|c| c as u32)
}

/// Advances a single thread whose top frame is blocked on `byte`, without
/// running the epsilon closure afterward (the caller does that).
fn advance_thread(mut th: Thread, grammar: &Grammar, byte: u8) -> Option<Thread> {
    match th.frames.last().cloned()? {
        Frame::Seq(mut sf) => match sf.sub.clone() {
            Sub::Term(off) => {
                let Element::Terminal(bytes) = &sf.seq.elements(grammar)[sf.pos] else { unreachable!() };
                if bytes[off] != byte {
                    return None;
                }
                if off + 1 == bytes.len() {
                    sf.pos += 1;
                    sf.sub = Sub::None;
                } else {
                    sf.sub = Sub::Term(off + 1);
                }
                *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                Some(th)
            }
            Sub::Class(mut partial) => {
                let Element::CharClass(class) = &sf.seq.elements(grammar)[sf.pos] else { unreachable!() };
                if partial.is_empty() {
                    utf8_seq_len(byte)?;
                } else {
                    if !(0x80..=0xBF).contains(&byte) {
                        return None;
                    }
                }
                partial.push(byte);
                let expected = utf8_seq_len(partial[0])?;
                if partial.len() < expected {
                    sf.sub = Sub::Class(partial);
                    *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                    return Some(th);
                }
                let cp = decode_code_point(&partial)?;
                if !class.contains(cp) {
                    return None;
                }
                sf.pos += 1;
                sf.sub = Sub::None;
                *th.frames.last_mut().unwrap() = Frame::Seq(sf);
                Some(th)
            }
            Sub::None => None,
        },
        Frame::Dispatch(mut df) => {
            df.buf.push(byte);
            while !df.buf.is_empty() && !is_prefix_of_something(&df.dispatch, &df.buf) {
                df.buf.remove(0);
            }
            match classify(&df.dispatch, &df.buf) {
                Classification::Reject => None,
                Classification::Stop => {
                    th.frames.pop();
                    Some(th)
                }
                Classification::Trigger(body) => {
                    th.frames.pop();
                    if df.dispatch.loop_after_dispatch {
                        th.frames.push(Frame::Dispatch(DispatchFrame { dispatch: df.dispatch.clone(), buf: Vec::new() }));
                    }
                    let forks = push_rule_alternatives(&th, body, grammar);
                    // advance_thread only ever returns one thread; the other
                    // alternatives are picked up by advance_thread_multi, which
                    // handles a triggering Dispatch frame directly instead of
                    // delegating here.
                    th.frames = forks.into_iter().next().map(|t| t.frames).unwrap_or_default();
                    Some(th)
                }
                Classification::Continue => {
                    *th.frames.last_mut().unwrap() = Frame::Dispatch(df);
                    Some(th)
                }
            }
        }
        Frame::Rep(_) => None,
    }
}

/// Like [advance_thread], but returns every resulting thread (a triggered
/// dispatch can fork over the body rule's alternatives).
fn advance_thread_multi(th: Thread, grammar: &Grammar, byte: u8) -> Vec<Thread> {
    if let Frame::Dispatch(df) = th.frames.last().unwrap().clone() {
        let mut buf = df.buf.clone();
        buf.push(byte);
        while !buf.is_empty() && !is_prefix_of_something(&df.dispatch, &buf) {
            buf.remove(0);
        }
        match classify(&df.dispatch, &buf) {
            Classification::Reject => return Vec::new(),
            Classification::Stop => {
                let mut t = th;
                t.frames.pop();
                return vec![t];
            }
            Classification::Trigger(body) => {
                let mut t = th;
                t.frames.pop();
                if df.dispatch.loop_after_dispatch {
                    // Re-enter FREE-text scanning once the triggered body
                    // below completes, instead of falling through to
                    // whatever frame sits under the dispatch.
                    t.frames.push(Frame::Dispatch(DispatchFrame { dispatch: df.dispatch.clone(), buf: Vec::new() }));
                }
                return push_rule_alternatives(&t, body, grammar);
            }
            Classification::Continue => {
                let mut t = th;
                let mut new_df = df;
                new_df.buf = buf;
                *t.frames.last_mut().unwrap() = Frame::Dispatch(new_df);
                return vec![t];
            }
        }
    }
    advance_thread(th, grammar, byte).into_iter().collect()
}

pub struct MatcherState {
    grammar: Arc<Grammar>,
    threads: Vec<Thread>,
    guards: GuardPool,
    history: Vec<(Vec<Thread>, Vec<GuardState>)>,
    max_history: usize,
}

impl MatcherState {
    pub fn new(grammar: Arc<Grammar>) -> Self {
        let mut guards = GuardPool::default();
        let threads = initial_threads(&grammar)
            .into_iter()
            .flat_map(|t| close_thread(t, &grammar, &mut guards))
            .collect();
        MatcherState {
            grammar,
            threads,
            guards,
            history: Vec::new(),
            max_history: 4096,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn can_accept(&self) -> bool {
        self.threads.iter().any(|t| t.is_accepted() && t.pending_guards.is_empty())
    }

    pub fn is_terminated(&self) -> bool {
        !self.threads.is_empty() && self.threads.iter().all(|t| t.is_accepted() && t.pending_guards.is_empty())
    }

    /// Advance by one byte. Leaves state untouched and returns `false` if no
    /// live thread accepts `byte`.
    pub fn advance(&mut self, byte: u8) -> bool {
        let mut next = Vec::new();
        for th in &self.threads {
            for advanced in advance_thread_multi(th.clone(), &self.grammar, byte) {
                next.extend(close_thread(advanced, &self.grammar, &mut self.guards));
            }
        }
        if next.is_empty() {
            return false;
        }
        self.guards.step_byte(&self.grammar, byte);
        next.retain(|t| !t.pending_guards.iter().any(|g| self.guards.is_dead(*g)));
        if next.is_empty() {
            return false;
        }
        for t in next.iter_mut() {
            t.pending_guards.retain(|g| !self.guards.is_satisfied(*g));
        }
        let previous_threads = std::mem::replace(&mut self.threads, next);
        let previous_guards = self.guards.guards.clone();
        self.history.push((previous_threads, previous_guards));
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }
        true
    }

    /// Attempts to advance by every byte of `bytes`, atomically: on any
    /// rejection the state is left exactly as it was before the call.
    pub fn advance_string(&mut self, bytes: &[u8]) -> bool {
        let snapshot_threads = self.threads.clone();
        let snapshot_guards = self.guards.guards.clone();
        let snapshot_history_len = self.history.len();
        for &byte in bytes {
            if !self.advance(byte) {
                self.threads = snapshot_threads;
                self.guards.guards = snapshot_guards;
                self.history.truncate(snapshot_history_len);
                return false;
            }
        }
        true
    }

    /// Undo the last `n` bytes, clamped to the retained history.
    pub fn rollback(&mut self, n: usize) {
        for _ in 0..n {
            let Some((threads, guards)) = self.history.pop() else { break };
            self.threads = threads;
            self.guards.guards = guards;
        }
    }

    pub fn reset(&mut self) {
        let mut guards = GuardPool::default();
        self.threads = initial_threads(&self.grammar)
            .into_iter()
            .flat_map(|t| close_thread(t, &self.grammar, &mut guards))
            .collect();
        self.guards = guards;
        self.history.clear();
    }

    /// The single byte every live thread is currently forced to accept, if
    /// any.
    fn forced_next_byte(&self) -> Option<u8> {
        if self.threads.is_empty() {
            return None;
        }
        let mut forced: Option<u8> = None;
        for th in &self.threads {
            let b = forced_byte_for(th, &self.grammar)?;
            match forced {
                None => forced = Some(b),
                Some(existing) if existing != b => return None,
                _ => {}
            }
        }
        forced
    }

    /// The longest byte string that is forced regardless of what the
    /// caller feeds afterward, capped to avoid looping forever on a cyclic
    /// grammar. Returned as a (lossily decoded) `String` per spec §4.5.
    pub fn find_jump_forward_string(&self) -> String {
        const CAP: usize = 4096;
        let mut probe = MatcherState {
            grammar: self.grammar.clone(),
            threads: self.threads.clone(),
            guards: GuardPool { guards: self.guards.guards.clone() },
            history: Vec::new(),
            max_history: 0,
        };
        let mut out = Vec::new();
        while out.len() < CAP {
            let Some(b) = probe.forced_next_byte() else { break };
            if !probe.advance(b) {
                break;
            }
            out.push(b);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    pub(crate) fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub(crate) fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// A cheap, stable key for the current configuration, used by
    /// `vocab::analysis` to cache accepted-token sets across calls that
    /// land on the same live set of positions.
    pub(crate) fn signature(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        for th in &self.threads {
            th.frames.hash_into(&mut hasher);
            th.pending_guards.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl Clone for GuardState {
    fn clone(&self) -> Self {
        match self {
            GuardState::Alive(t) => GuardState::Alive(t.clone()),
            GuardState::Satisfied => GuardState::Satisfied,
            GuardState::Dead => GuardState::Dead,
        }
    }
}

impl Clone for GuardPool {
    fn clone(&self) -> Self {
        GuardPool { guards: self.guards.clone() }
    }
}

/// Only reports a forced byte for the narrow shapes where it's cheap and
/// unambiguous to compute: mid-terminal, or a charclass that denotes
/// exactly one code point. Anything else (wide charclasses, dispatch FREE
/// runs) conservatively reports "not forced", which only ever makes
/// `find_jump_forward_string` shorter than the true maximum, never wrong.
fn forced_byte_for(th: &Thread, grammar: &Grammar) -> Option<u8> {
    match th.frames.last()? {
        Frame::Seq(sf) => match &sf.sub {
            Sub::Term(off) => {
                let Element::Terminal(bytes) = &sf.seq.elements(grammar)[sf.pos] else { return None };
                bytes.get(*off).copied()
            }
            Sub::Class(partial) => {
                let Element::CharClass(class) = &sf.seq.elements(grammar)[sf.pos] else { return None };
                if class.negated || class.ranges.len() != 1 {
                    return None;
                }
                let (lo, hi) = class.ranges[0];
                if lo != hi {
                    return None;
                }
                let mut buf = [0u8; 4];
                let encoded = char::from_u32(lo)?.encode_utf8(&mut buf);
                encoded.as_bytes().get(partial.len()).copied()
            }
            Sub::None => None,
        },
        _ => None,
    }
}

trait HashInto {
    fn hash_into(&self, hasher: &mut std::collections::hash_map::DefaultHasher);
}

impl HashInto for Vec<Frame> {
    fn hash_into(&self, hasher: &mut std::collections::hash_map::DefaultHasher) {
        use std::hash::{Hash, Hasher};
        self.len().hash(hasher);
        for frame in self {
            match frame {
                Frame::Seq(sf) => {
                    0u8.hash(hasher);
                    match &sf.seq {
                        SeqRef::Named(id, alt) => {
                            0u8.hash(hasher);
                            id.hash(hasher);
                            alt.hash(hasher);
                        }
                        SeqRef::Inline(seq) => {
                            1u8.hash(hasher);
                            format!("{seq:?}").hash(hasher);
                        }
                    }
                    sf.pos.hash(hasher);
                    match &sf.sub {
                        Sub::None => 0u8.hash(hasher),
                        Sub::Term(off) => {
                            1u8.hash(hasher);
                            off.hash(hasher);
                        }
                        Sub::Class(partial) => {
                            2u8.hash(hasher);
                            partial.hash(hasher);
                        }
                    }
                }
                Frame::Rep(rf) => {
                    1u8.hash(hasher);
                    format!("{:?}", rf.child).hash(hasher);
                    rf.min.hash(hasher);
                    rf.max.hash(hasher);
                    rf.count.hash(hasher);
                }
                Frame::Dispatch(df) => {
                    2u8.hash(hasher);
                    format!("{:?}", df.dispatch).hash(hasher);
                    df.buf.hash(hasher);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Grammar, RuleBody};

    fn literal_grammar(text: &str) -> Arc<Grammar> {
        let mut g = Grammar::bare();
        let id = g.add_rule("root", RuleBody::single(vec![Element::terminal(text)]));
        g.set_root(id);
        Arc::new(g)
    }

    #[test]
    fn accepts_an_exact_literal() {
        let grammar = literal_grammar("abc");
        let mut state = MatcherState::new(grammar);
        assert!(state.advance(b'a'));
        assert!(state.advance(b'b'));
        assert!(!state.can_accept());
        assert!(state.advance(b'c'));
        assert!(state.can_accept());
        assert!(state.is_terminated());
    }

    #[test]
    fn rejects_a_wrong_byte_without_mutating_state() {
        let grammar = literal_grammar("ab");
        let mut state = MatcherState::new(grammar);
        assert!(state.advance(b'a'));
        assert!(!state.advance(b'z'));
        assert!(state.advance(b'b'));
        assert!(state.is_terminated());
    }

    #[test]
    fn rollback_restores_a_previous_position() {
        let grammar = literal_grammar("ab");
        let mut state = MatcherState::new(grammar);
        state.advance(b'a');
        state.rollback(1);
        assert!(!state.can_accept());
        assert!(state.advance(b'a'));
        assert!(state.advance(b'b'));
        assert!(state.can_accept());
    }

    #[test]
    fn star_repetition_accepts_zero_or_many() {
        let mut g = Grammar::bare();
        let id = g.add_rule("root", RuleBody::single(vec![Element::terminal("a").star()]));
        g.set_root(id);
        let mut state = MatcherState::new(Arc::new(g));
        assert!(state.can_accept());
        assert!(state.advance(b'a'));
        assert!(state.can_accept());
        assert!(state.advance(b'a'));
        assert!(state.can_accept());
    }

    #[test]
    fn tag_dispatch_free_text_runs_until_stop_string() {
        let mut g = Grammar::bare();
        let dispatch = TagDispatch {
            triggers: Vec::new(),
            stop_eos: false,
            stop_strs: vec![b"STOP".to_vec()],
            loop_after_dispatch: false,
            excludes: Vec::new(),
        };
        let id = g.add_rule("root", RuleBody::single(vec![Element::TagDispatch(dispatch)]));
        g.set_root(id);
        let mut state = MatcherState::new(Arc::new(g));
        for b in b"hello world" {
            assert!(state.advance(*b));
            assert!(!state.can_accept());
        }
        assert!(state.advance_string(b"STOP"));
        assert!(state.can_accept());
    }

    /// Spec §8.2 scenario 4 (sequential tool calls): a looping `TagDispatch`
    /// must admit a second trigger firing after the first triggered body
    /// completes, not terminate the moment one body finishes.
    #[test]
    fn tag_dispatch_loops_back_to_free_text_after_a_trigger_fires() {
        let mut g = Grammar::bare();
        let body = g.add_rule("body", RuleBody::single(vec![Element::terminal("x")]));
        let dispatch = TagDispatch {
            triggers: vec![(b"<a>".to_vec(), body)],
            stop_eos: false,
            stop_strs: vec![b"STOP".to_vec()],
            loop_after_dispatch: true,
            excludes: Vec::new(),
        };
        let root = g.add_rule("root", RuleBody::single(vec![Element::TagDispatch(dispatch)]));
        g.set_root(root);
        let mut state = MatcherState::new(Arc::new(g));
        assert!(state.advance_string(b"<a>x"));
        assert!(!state.is_terminated(), "a looping dispatch must not terminate after only one trigger fires");
        assert!(state.advance_string(b"<a>x"), "a second trigger must fire after looping back to FREE text");
        assert!(!state.is_terminated());
        assert!(state.advance_string(b"STOP"));
        assert!(state.is_terminated());
    }

    #[test]
    fn find_jump_forward_string_returns_the_forced_literal_prefix() {
        let grammar = literal_grammar("hello");
        let state = MatcherState::new(grammar);
        assert_eq!(state.find_jump_forward_string(), "hello");
    }
}
