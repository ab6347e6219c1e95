//! Grammar optimizer (spec §4.7, C7): dead-code elimination, inlining of
//! single-use single-alternative nonterminals, and a narrow lookahead-fusion
//! pass, run once after compilation and before a grammar is handed to the
//! matcher.
use crate::ir::rule::{Element, Sequence};
use crate::ir::{Grammar, RuleBody, RuleId};
use std::collections::HashMap;

/// Run every pass to a fixpoint-free single pass each, in the order that
/// makes later passes most effective: fusing redundant lookaheads first
/// (it only deletes elements, never changes reachability), then inlining
/// single-use rules (which can turn a formerly multi-use rule into an
/// unreachable one), then dead-code elimination last.
pub fn optimize(grammar: &Grammar) -> Grammar {
    let fused = fuse_lookaheads(grammar);
    let inlined = inline_single_use(&fused);
    eliminate_dead_code(&inlined)
}

/// Drops a `Lookahead` element immediately followed, in the same
/// [Sequence], by a [Element::Terminal] equal to the lookahead's own
/// trailing terminal. This is the one shape the compiler ever emits
/// (`qwen_xml` parameter content boundaries: `(= [ \n\t]* "</parameter>")
/// "</parameter>"`) — the literal match right after the assertion already
/// enforces it, so tracking it twice buys nothing.
fn fuse_lookaheads(grammar: &Grammar) -> Grammar {
    let mut out = grammar.clone();
    for id in 0..out.len() {
        for seq in out.rule_mut(id).body.alternatives.iter_mut() {
            fuse_sequence(seq);
        }
    }
    out
}

fn fuse_sequence(seq: &mut Sequence) {
    let mut i = 0;
    while i < seq.len() {
        let redundant = match (seq.get(i), seq.get(i + 1)) {
            (Some(Element::Lookahead(la)), Some(Element::Terminal(next))) => match la.last() {
                Some(Element::Terminal(last)) => last == next,
                _ => false,
            },
            _ => false,
        };
        if redundant {
            seq.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Inlines any non-root rule that (a) is referenced by exactly one
/// [Element::NonterminalRef] across the whole grammar and (b) has a body
/// of exactly one alternative, splicing its sequence in place of the
/// reference. Rules with more than one alternative aren't inlined: the IR
/// has no "grouped alternation" element to substitute them with, only a
/// flat [Sequence].
fn inline_single_use(grammar: &Grammar) -> Grammar {
    let mut out = grammar.clone();
    loop {
        let counts = reference_counts(&out);
        let root = out.root();
        let candidate = out
            .rules()
            .iter()
            .find(|r| r.id != root && counts.get(&r.id).copied().unwrap_or(0) == 1 && r.body.alternatives.len() == 1)
            .map(|r| r.id);
        let Some(id) = candidate else { break };
        let replacement = out.rule(id).body.alternatives[0].clone();
        for rule_id in 0..out.len() {
            for seq in out.rule_mut(rule_id).body.alternatives.iter_mut() {
                splice_reference(seq, id, &replacement);
            }
        }
    }
    out
}

fn splice_reference(seq: &mut Sequence, target: RuleId, replacement: &Sequence) {
    let mut i = 0;
    while i < seq.len() {
        if matches!(&seq[i], Element::NonterminalRef(id) if *id == target) {
            seq.splice(i..i + 1, replacement.iter().cloned());
            i += replacement.len();
        } else {
            if let Element::Repetition { child, .. } = &mut seq[i] {
                splice_in_element(child, target, replacement);
            }
            if let Element::Lookahead(inner) = &mut seq[i] {
                splice_reference(inner, target, replacement);
            }
            i += 1;
        }
    }
}

fn splice_in_element(el: &mut Element, target: RuleId, replacement: &Sequence) {
    // A Repetition's child can't itself be spliced away (it's a single
    // Element, not a Sequence slot) — but if it directly names the target,
    // and the target's replacement is a single element, the substitution is
    // still sound; a multi-element replacement can't fit a single-child
    // slot, so leave the reference alone (eliminate_dead_code will still
    // drop it if it becomes genuinely unreachable is wrong here — this just
    // conservatively skips rewriting to avoid shape loss).
    if let Element::NonterminalRef(id) = el {
        if *id == target && replacement.len() == 1 {
            *el = replacement[0].clone();
        }
    }
}

fn reference_counts(grammar: &Grammar) -> HashMap<RuleId, usize> {
    let mut counts = HashMap::new();
    for rule in grammar.rules() {
        for seq in &rule.body.alternatives {
            for el in seq {
                count_element(el, &mut counts);
            }
        }
    }
    counts
}

fn count_element(el: &Element, counts: &mut HashMap<RuleId, usize>) {
    match el {
        Element::NonterminalRef(id) => *counts.entry(*id).or_insert(0) += 1,
        Element::Repetition { child, .. } => count_element(child, counts),
        Element::Lookahead(seq) => seq.iter().for_each(|e| count_element(e, counts)),
        Element::TagDispatch(dispatch) => {
            for (_, id) in &dispatch.triggers {
                *counts.entry(*id).or_insert(0) += 1;
            }
        }
        Element::Terminal(_) | Element::CharClass(_) => {}
    }
}

/// Drops every rule not reachable from the root, renumbering the survivors
/// so [RuleId]s stay dense.
fn eliminate_dead_code(grammar: &Grammar) -> Grammar {
    let root = grammar.root();
    let mut stack = vec![root];
    let mut seen = vec![false; grammar.len()];
    seen[root] = true;
    while let Some(id) = stack.pop() {
        for seq in &grammar.rule(id).body.alternatives {
            for el in seq {
                collect_refs(el, &mut |target| {
                    if !seen[target] {
                        seen[target] = true;
                        stack.push(target);
                    }
                });
            }
        }
    }
    let mut mapping: HashMap<RuleId, RuleId> = HashMap::new();
    let mut out = Grammar::bare();
    for rule in grammar.rules() {
        if seen[rule.id] {
            mapping.insert(rule.id, out.declare_rule(&rule.name));
        }
    }
    for rule in grammar.rules() {
        if seen[rule.id] {
            let body = remap_body(&rule.body, &mapping);
            out.set_body(mapping[&rule.id], body);
        }
    }
    out.set_root(mapping[&root]);
    out
}

fn collect_refs(el: &Element, visit: &mut impl FnMut(RuleId)) {
    match el {
        Element::NonterminalRef(id) => visit(*id),
        Element::Repetition { child, .. } => collect_refs(child, visit),
        Element::Lookahead(seq) => seq.iter().for_each(|e| collect_refs(e, visit)),
        Element::TagDispatch(dispatch) => dispatch.triggers.iter().for_each(|(_, id)| visit(*id)),
        Element::Terminal(_) | Element::CharClass(_) => {}
    }
}

fn remap_body(body: &RuleBody, mapping: &HashMap<RuleId, RuleId>) -> RuleBody {
    RuleBody::new(body.alternatives.iter().map(|seq| remap_sequence(seq, mapping)).collect())
}

fn remap_sequence(seq: &Sequence, mapping: &HashMap<RuleId, RuleId>) -> Sequence {
    seq.iter().map(|el| remap_element(el, mapping)).collect()
}

fn remap_element(el: &Element, mapping: &HashMap<RuleId, RuleId>) -> Element {
    match el {
        Element::Terminal(bytes) => Element::Terminal(bytes.clone()),
        Element::CharClass(class) => Element::CharClass(class.clone()),
        Element::NonterminalRef(id) => Element::NonterminalRef(mapping[id]),
        Element::Repetition { child, min, max } => Element::Repetition {
            child: Box::new(remap_element(child, mapping)),
            min: *min,
            max: *max,
        },
        Element::Lookahead(seq) => Element::Lookahead(remap_sequence(seq, mapping)),
        Element::TagDispatch(dispatch) => Element::TagDispatch(crate::ir::rule::TagDispatch {
            triggers: dispatch.triggers.iter().map(|(p, id)| (p.clone(), mapping[id])).collect(),
            stop_eos: dispatch.stop_eos,
            stop_strs: dispatch.stop_strs.clone(),
            loop_after_dispatch: dispatch.loop_after_dispatch,
            excludes: dispatch.excludes.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::rule::Element as El;

    #[test]
    fn dead_code_elimination_drops_unreferenced_rules() {
        let mut g = Grammar::bare();
        let unused = g.add_rule("unused", RuleBody::single(vec![El::terminal("x")]));
        let root = g.add_rule("root", RuleBody::single(vec![El::terminal("y")]));
        g.set_root(root);
        let _ = unused;
        let optimized = eliminate_dead_code(&g);
        assert_eq!(optimized.len(), 1);
    }

    #[test]
    fn single_use_single_alt_rule_is_inlined() {
        let mut g = Grammar::bare();
        let leaf = g.add_rule("leaf", RuleBody::single(vec![El::terminal("x")]));
        let root = g.add_rule("root", RuleBody::single(vec![El::nt(leaf)]));
        g.set_root(root);
        let optimized = optimize(&g);
        assert_eq!(optimized.len(), 1);
        assert_eq!(optimized.rule(optimized.root()).body.alternatives[0], vec![El::terminal("x")]);
    }

    #[test]
    fn multi_use_rule_is_kept() {
        let mut g = Grammar::bare();
        let leaf = g.add_rule("leaf", RuleBody::single(vec![El::terminal("x")]));
        let root = g.add_rule("root", RuleBody::single(vec![El::nt(leaf), El::nt(leaf)]));
        g.set_root(root);
        let optimized = optimize(&g);
        assert_eq!(optimized.len(), 2);
    }

    #[test]
    fn redundant_lookahead_before_identical_terminal_is_fused() {
        let mut g = Grammar::bare();
        let root = g.add_rule(
            "root",
            RuleBody::single(vec![
                El::Lookahead(vec![El::terminal("</x>")]),
                El::terminal("</x>"),
            ]),
        );
        g.set_root(root);
        let optimized = fuse_lookaheads(&g);
        assert_eq!(optimized.rule(root).body.alternatives[0].len(), 1);
    }
}
