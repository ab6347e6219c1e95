//! Grammar combinators (spec §4.2, C5): `union`/`concat` over whole
//! grammars, and the `splice` primitive they share with anywhere a foreign
//! grammar fragment needs folding into a larger one (`schema::json_schema`
//! and `schema::regex`'s callers, an embedded `Grammar(ebnf)` node, a
//! `TagDispatch` body).
use crate::ir::rule::{Element, Sequence, TagDispatch};
use crate::ir::{Grammar, RuleBody, RuleId};
use std::collections::HashMap;

/// Copies every rule of `src` into `dest` under collision-free names,
/// remapping every internal [RuleId] reference, and returns the id in
/// `dest` corresponding to `src`'s root. The rule named `"root"` is always
/// renamed to `root_name` regardless of whether `dest` already has a rule
/// by that name, matching spec §4.2 ("existing `root` rules become
/// `root_1 … root_k`; no other renaming is permitted").
pub fn splice(dest: &mut Grammar, src: &Grammar, root_name: &str) -> RuleId {
    let mut mapping: HashMap<RuleId, RuleId> = HashMap::new();
    for rule in src.rules() {
        let name = if rule.id == src.root() {
            root_name.to_string()
        } else if dest.rule_id(&rule.name).is_some() {
            dest.fresh_name(&rule.name)
        } else {
            rule.name.clone()
        };
        mapping.insert(rule.id, dest.declare_rule(&name));
    }
    for rule in src.rules() {
        let body = remap_body(&rule.body, &mapping);
        dest.set_body(mapping[&rule.id], body);
    }
    mapping[&src.root()]
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
        Element::TagDispatch(dispatch) => Element::TagDispatch(TagDispatch {
            triggers: dispatch
                .triggers
                .iter()
                .map(|(prefix, body)| (prefix.clone(), mapping[body]))
                .collect(),
            stop_eos: dispatch.stop_eos,
            stop_strs: dispatch.stop_strs.clone(),
            loop_after_dispatch: dispatch.loop_after_dispatch,
            excludes: dispatch.excludes.clone(),
        }),
    }
}

/// `union(G1…Gk)`: a new grammar whose root alternates over each input's
/// (renamed) root.
pub fn union(grammars: &[Grammar]) -> Grammar {
    let mut dest = Grammar::bare();
    let mut alternatives = Vec::with_capacity(grammars.len());
    for (i, grammar) in grammars.iter().enumerate() {
        let root_name = format!("root_{}", i + 1);
        let root_id = splice(&mut dest, grammar, &root_name);
        alternatives.push(vec![Element::nt(root_id)]);
    }
    let root = dest.add_rule("root", RuleBody::new(alternatives));
    dest.set_root(root);
    dest
}

/// `concat(G1…Gk)`: a new grammar whose root is the concatenation, in
/// order, of each input's (renamed) root.
pub fn concat(grammars: &[Grammar]) -> Grammar {
    let mut dest = Grammar::bare();
    let mut seq = Vec::with_capacity(grammars.len());
    for (i, grammar) in grammars.iter().enumerate() {
        let root_name = format!("root_{}", i + 1);
        let root_id = splice(&mut dest, grammar, &root_name);
        seq.push(Element::nt(root_id));
    }
    let root = dest.add_rule("root", RuleBody::single(seq));
    dest.set_root(root);
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::rule::RuleBody as RB;

    fn leaf_grammar(terminal: &str) -> Grammar {
        let mut g = Grammar::new();
        let id = g.add_rule("item", RB::single(vec![Element::terminal(terminal)]));
        g.set_root(id);
        g
    }

    #[test]
    fn union_alternates_over_inputs() {
        let g = union(&[leaf_grammar("a"), leaf_grammar("b")]);
        assert_eq!(g.rule(g.root()).body.alternatives.len(), 2);
        assert!(g.rule_id("root_1").is_some());
        assert!(g.rule_id("root_2").is_some());
    }

    #[test]
    fn concat_chains_roots_in_order() {
        let g = concat(&[leaf_grammar("a"), leaf_grammar("b")]);
        let body = &g.rule(g.root()).body.alternatives[0];
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn colliding_nonterminal_names_are_renamed() {
        let g = union(&[leaf_grammar("a"), leaf_grammar("b")]);
        assert!(g.rule_id("item").is_some());
        assert!(g.rule_id("item_1").is_some());
    }
}
