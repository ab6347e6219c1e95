//! The grammar arena: a flat table of [Rule]s addressed by [RuleId], plus a
//! designated root and fresh-name generation for combinator output (spec
//! §3.1, §4.2).
use super::rule::{display_rule_body, Rule, RuleBody, RuleId};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<Rule>,
    name_to_id: HashMap<String, RuleId>,
    root: RuleId,
    fresh_counter: u64,
}

impl Grammar {
    /// An empty grammar with a single placeholder root rule named `root`.
    pub fn new() -> Self {
        let mut grammar = Self::bare();
        let root = grammar.add_rule("root", RuleBody::empty());
        grammar.root = root;
        grammar
    }

    /// A grammar with no rules at all, not even a placeholder root. Used by
    /// the EBNF parser, which assigns the root once it has seen the text's
    /// first rule, and by front-ends that always declare every rule they
    /// need before returning.
    pub(crate) fn bare() -> Self {
        Self {
            rules: Vec::new(),
            name_to_id: HashMap::new(),
            root: 0,
            fresh_counter: 0,
        }
    }

    /// Insert a rule under `name`, returning its fresh id. If `name` is
    /// already taken, a disambiguated variant is used instead (see
    /// [Grammar::fresh_name]) so callers never silently overwrite a rule.
    pub fn add_rule(&mut self, name: impl Into<String>, body: RuleBody) -> RuleId {
        let mut name = name.into();
        if self.name_to_id.contains_key(&name) {
            name = self.fresh_name(&name);
        }
        let id = self.rules.len();
        self.name_to_id.insert(name.clone(), id);
        self.rules.push(Rule { id, name, body });
        id
    }

    /// Return the id of the rule named `name`, declaring an empty
    /// placeholder rule under that name if it doesn't exist yet. Used by the
    /// EBNF parser to support forward references (a nonterminal can be
    /// mentioned before its own `::=` line is reached).
    pub fn declare_rule(&mut self, name: &str) -> RuleId {
        if let Some(id) = self.name_to_id.get(name) {
            return *id;
        }
        self.add_rule(name, RuleBody::empty())
    }

    /// Overwrite the body of an already-declared rule. Used once the parser
    /// reaches a forward-declared rule's own definition.
    pub fn set_body(&mut self, id: RuleId, body: RuleBody) {
        self.rules[id].body = body;
    }

    /// Generate a name derived from `base` that is not yet used in this
    /// grammar, by appending an increasing numeric suffix. Used by the
    /// combinators to splice foreign grammar fragments without collision.
    pub fn fresh_name(&mut self, base: &str) -> String {
        loop {
            self.fresh_counter += 1;
            let candidate = format!("{base}_{}", self.fresh_counter);
            if !self.name_to_id.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn set_root(&mut self, id: RuleId) {
        self.root = id;
    }

    pub fn root(&self) -> RuleId {
        self.root
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub fn rule_mut(&mut self, id: RuleId) -> &mut Rule {
        &mut self.rules[id]
    }

    pub fn rule_id(&self, name: &str) -> Option<RuleId> {
        self.name_to_id.get(name).copied()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rule_name(&self, id: RuleId) -> String {
        self.rules
            .get(id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| format!("<missing:{id}>"))
    }

    /// A stable content hash of the full rule table and root, used as a
    /// cache key by [crate::cache::get_or_compile_grammar]. Two grammars
    /// with the same fingerprint are expected (not merely hoped) to be
    /// structurally identical: callers that build grammars deterministically
    /// from the same structural-tag input will get the same fingerprint.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.root.hash(&mut hasher);
        for rule in &self.rules {
            rule.name.hash(&mut hasher);
            rule.body.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Render the grammar as an indented tree rooted at [Grammar::root],
    /// following each nonterminal reference once per occurrence. Generalizes
    /// the teacher's `ASTNode::print`, which walked a parsed syntax tree the
    /// same way with the same crate.
    pub fn print_tree(&self) -> String {
        let root = GrammarNode {
            rules: self.rules.clone(),
            id: self.root,
        };
        let mut buf: Vec<u8> = Vec::new();
        ptree::write_tree(&root, &mut buf).expect("writing to an in-memory buffer cannot fail");
        String::from_utf8(buf).expect("ptree output is always valid UTF-8")
    }

}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule {
    fn body_display(&self, grammar: &Grammar) -> String {
        struct Wrap<'a>(&'a RuleBody, &'a Grammar);
        impl Display for Wrap<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                display_rule_body(self.0, f, &|id| self.1.rule_name(id))
            }
        }
        Wrap(&self.body, grammar).to_string()
    }
}

impl Display for Grammar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            writeln!(f, "{} ::= {}", rule.name, rule.body_display(self))?;
        }
        Ok(())
    }
}

/// A cloned-arena view used so [ptree] can walk grammar nodes without
/// borrowing the whole [Grammar]. Cheap relative to the compiled grammars
/// this is used to debug-print, which are small by construction.
#[derive(Clone)]
pub struct GrammarNode {
    rules: Vec<Rule>,
    id: RuleId,
}

impl ptree::TreeItem for GrammarNode {
    type Child = GrammarNode;

    fn write_self<W: std::io::Write>(&self, f: &mut W, style: &ptree::Style) -> std::io::Result<()> {
        write!(f, "{}", style.paint(&self.rules[self.id].name))
    }

    fn children(&self) -> std::borrow::Cow<[Self::Child]> {
        use super::rule::Element;
        fn collect(el: &Element, out: &mut Vec<RuleId>) {
            match el {
                Element::NonterminalRef(id) => out.push(*id),
                Element::Repetition { child, .. } => collect(child, out),
                Element::Lookahead(seq) => seq.iter().for_each(|e| collect(e, out)),
                Element::TagDispatch(dispatch) => {
                    out.extend(dispatch.triggers.iter().map(|(_, id)| *id))
                }
                Element::Terminal(_) | Element::CharClass(_) => {}
            }
        }
        let mut out = Vec::new();
        for seq in &self.rules[self.id].body.alternatives {
            for el in seq {
                collect(el, &mut out);
            }
        }
        std::borrow::Cow::Owned(
            out.into_iter()
                .map(|id| GrammarNode {
                    rules: self.rules.clone(),
                    id,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::char_class::CharClass;
    use super::super::rule::Element;

    #[test]
    fn fresh_name_avoids_collisions() {
        let mut grammar = Grammar::new();
        let a = grammar.add_rule("item", RuleBody::empty());
        let b = grammar.add_rule("item", RuleBody::empty());
        assert_ne!(a, b);
        assert_eq!(grammar.rule(b).name, "item_1");
    }

    #[test]
    fn fingerprint_is_deterministic_for_equal_grammars() {
        let build = || {
            let mut g = Grammar::new();
            let digit = g.add_rule("digit", RuleBody::single(vec![Element::CharClass(CharClass::new(vec![(b'0' as u32, b'9' as u32)], false))]));
            g.set_root(digit);
            g
        };
        assert_eq!(build().fingerprint(), build().fingerprint());
    }

    #[test]
    fn print_tree_follows_nonterminal_refs() {
        let mut grammar = Grammar::new();
        let leaf = grammar.add_rule("leaf", RuleBody::single(vec![Element::terminal("x")]));
        let root = grammar.add_rule("start", RuleBody::single(vec![Element::nt(leaf)]));
        grammar.set_root(root);
        let tree = grammar.print_tree();
        assert!(tree.contains("start"));
        assert!(tree.contains("leaf"));
    }
}
