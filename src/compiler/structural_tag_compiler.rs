//! Structural-tag compiler (spec §4.3, C6): lowers a validated
//! [AnnotatedFormat] tree into a single [Grammar]. `OuterEnd` threading was
//! already computed bottom-up by `structural_tag::validate`
//! ([Attrs::end_set]) — this pass just reads it back off each node rather
//! than recomputing it.
use crate::config;
use crate::error::GrammarError;
use crate::ir::rule::TagDispatch;
use crate::ir::{Element, Grammar, RuleBody, RuleId};
use crate::schema::{json_schema_to_ebnf, regex_to_ebnf, JsonSchemaContext, Style};
use crate::structural_tag::{AnnotatedFormat, AnnotatedTag};

/// Lowers `annotated` into a fresh [Grammar] rooted at its translation.
pub fn compile(annotated: &AnnotatedFormat) -> Result<Grammar, GrammarError> {
    let mut grammar = Grammar::bare();
    let root = lower(annotated, &mut grammar, 0)?;
    grammar.set_root(root);
    Ok(grammar)
}

fn check_depth(depth: usize) -> Result<(), GrammarError> {
    if depth as i32 > config::get_max_recursion_depth() {
        return Err(GrammarError::compilation("structural tag nesting exceeds the configured recursion depth"));
    }
    Ok(())
}

fn lower(format: &AnnotatedFormat, grammar: &mut Grammar, depth: usize) -> Result<RuleId, GrammarError> {
    check_depth(depth)?;
    match format {
        AnnotatedFormat::ConstString { value, .. } => {
            let name = grammar.fresh_name("const_string");
            Ok(grammar.add_rule(name, RuleBody::single(vec![Element::terminal(value.as_bytes())])))
        }
        AnnotatedFormat::JsonSchema { json_schema, style, .. } => {
            json_schema_to_ebnf(json_schema, *style, &JsonSchemaContext::default(), grammar)
        }
        AnnotatedFormat::QwenXmlParameter { json_schema, .. } => {
            json_schema_to_ebnf(json_schema, Style::QwenXml, &JsonSchemaContext::default(), grammar)
        }
        AnnotatedFormat::AnyText { excludes, attrs } => {
            let dispatch = TagDispatch {
                triggers: Vec::new(),
                stop_eos: attrs.end_set.is_empty(),
                stop_strs: attrs.end_set.iter().map(|s| s.as_bytes().to_vec()).collect(),
                loop_after_dispatch: false,
                excludes: excludes.iter().map(|s| s.as_bytes().to_vec()).collect(),
            };
            let name = grammar.fresh_name("any_text");
            Ok(grammar.add_rule(name, RuleBody::single(vec![Element::TagDispatch(dispatch)])))
        }
        AnnotatedFormat::Grammar { ebnf, .. } => {
            let parsed = crate::ebnf::parse_grammar(ebnf)?;
            let name = grammar.fresh_name("embedded_grammar");
            Ok(crate::combinators::splice(grammar, &parsed, &name))
        }
        // `excludes` isn't enforced for standalone `Regex` nodes: unlike
        // `AnyText`, a regex's content is already fully bounded by the
        // pattern rather than running as free text, so there is no FREE
        // substate for a TagDispatch's exclude check to attach to.
        AnnotatedFormat::Regex { pattern, .. } => regex_to_ebnf(pattern, grammar),
        AnnotatedFormat::Sequence { elements, .. } => {
            let mut seq = Vec::with_capacity(elements.len());
            for element in elements {
                seq.push(Element::nt(lower(element, grammar, depth + 1)?));
            }
            let name = grammar.fresh_name("sequence");
            Ok(grammar.add_rule(name, RuleBody::single(seq)))
        }
        AnnotatedFormat::Or { elements, .. } => {
            let mut alts = Vec::with_capacity(elements.len());
            for element in elements {
                alts.push(vec![Element::nt(lower(element, grammar, depth + 1)?)]);
            }
            let name = grammar.fresh_name("or");
            Ok(grammar.add_rule(name, RuleBody::new(alts)))
        }
        AnnotatedFormat::Tag(tag) => lower_tag(tag, grammar, depth + 1),
        AnnotatedFormat::TriggeredTags {
            triggers,
            tags,
            at_least_one,
            stop_after_first,
            excludes,
            attrs,
        } => lower_triggered_tags(triggers, tags, *at_least_one, *stop_after_first, excludes, &attrs.end_set, grammar, depth + 1),
        AnnotatedFormat::TagsWithSeparator {
            tags,
            separator,
            at_least_one,
            stop_after_first,
            attrs,
        } => lower_tags_with_separator(tags, separator, *at_least_one, *stop_after_first, &attrs.end_set, grammar, depth + 1),
    }
}

fn push_end(seq: &mut Vec<Element>, end: &[String], grammar: &mut Grammar) {
    if end.len() == 1 {
        if !end[0].is_empty() {
            seq.push(Element::terminal(end[0].as_bytes()));
        }
    } else {
        seq.push(Element::nt(lower_end_alternation(end, grammar)));
    }
}

/// One alternative per entry of `end`; an empty entry becomes the empty
/// alternative (spec §9 open question: "no terminator at all" is
/// representable this way).
fn lower_end_alternation(end: &[String], grammar: &mut Grammar) -> RuleId {
    let alts = end
        .iter()
        .map(|s| if s.is_empty() { Vec::new() } else { vec![Element::terminal(s.as_bytes())] })
        .collect();
    let name = grammar.fresh_name("tag_end");
    grammar.add_rule(name, RuleBody::new(alts))
}

fn lower_tag(tag: &AnnotatedTag, grammar: &mut Grammar, depth: usize) -> Result<RuleId, GrammarError> {
    let content_id = lower(&tag.content, grammar, depth)?;
    let mut seq = vec![Element::terminal(tag.begin.as_bytes()), Element::nt(content_id)];
    push_end(&mut seq, &tag.end, grammar);
    let name = grammar.fresh_name("tag");
    Ok(grammar.add_rule(name, RuleBody::single(seq)))
}

/// An alternation over every tag's *full* lowering (`begin content end`),
/// used wherever a `Tag` set is consumed without trigger dispatch:
/// `stop_after_first=true` variants, and the mandatory first occurrence of
/// an `at_least_one=true`, `stop_after_first=false` `TriggeredTags`.
fn lower_full_tag_or(tags: &[AnnotatedTag], grammar: &mut Grammar, depth: usize) -> Result<RuleId, GrammarError> {
    let mut alts = Vec::with_capacity(tags.len());
    for tag in tags {
        let content_id = lower(&tag.content, grammar, depth)?;
        let mut seq = vec![Element::terminal(tag.begin.as_bytes()), Element::nt(content_id)];
        push_end(&mut seq, &tag.end, grammar);
        alts.push(seq);
    }
    let name = grammar.fresh_name("tag_choice");
    Ok(grammar.add_rule(name, RuleBody::new(alts)))
}

fn build_trigger_dispatch(
    triggers: &[String],
    tags: &[AnnotatedTag],
    excludes: &[String],
    stop_strs: &[String],
    loop_after_dispatch: bool,
    grammar: &mut Grammar,
    depth: usize,
) -> Result<TagDispatch, GrammarError> {
    let mut trigger_groups = Vec::with_capacity(triggers.len());
    for trigger in triggers {
        let matching: Vec<&AnnotatedTag> = tags.iter().filter(|tag| tag.begin.starts_with(trigger.as_str())).collect();
        let mut alts = Vec::with_capacity(matching.len());
        for tag in matching {
            let suffix = &tag.begin[trigger.len()..];
            let content_id = lower(&tag.content, grammar, depth)?;
            let mut seq = Vec::new();
            if !suffix.is_empty() {
                seq.push(Element::terminal(suffix));
            }
            seq.push(Element::nt(content_id));
            push_end(&mut seq, &tag.end, grammar);
            alts.push(seq);
        }
        let name = grammar.fresh_name("trigger_group");
        let group_id = grammar.add_rule(name, RuleBody::new(alts));
        trigger_groups.push((trigger.as_bytes().to_vec(), group_id));
    }
    Ok(TagDispatch {
        triggers: trigger_groups,
        stop_eos: stop_strs.is_empty(),
        stop_strs: stop_strs.iter().map(|s| s.as_bytes().to_vec()).collect(),
        loop_after_dispatch,
        excludes: excludes.iter().map(|s| s.as_bytes().to_vec()).collect(),
    })
}

fn lower_triggered_tags(
    triggers: &[String],
    tags: &[AnnotatedTag],
    at_least_one: bool,
    stop_after_first: bool,
    excludes: &[String],
    end_set: &[String],
    grammar: &mut Grammar,
    depth: usize,
) -> Result<RuleId, GrammarError> {
    if stop_after_first {
        let choice_id = lower_full_tag_or(tags, grammar, depth)?;
        if at_least_one {
            return Ok(choice_id);
        }
        let name = grammar.fresh_name("triggered_tags");
        return Ok(grammar.add_rule(name, RuleBody::single(vec![Element::nt(choice_id).opt()])));
    }
    let dispatch = build_trigger_dispatch(triggers, tags, excludes, end_set, true, grammar, depth)?;
    let dispatch_name = grammar.fresh_name("triggered_tags_dispatch");
    let dispatch_id = grammar.add_rule(dispatch_name, RuleBody::single(vec![Element::TagDispatch(dispatch)]));
    if at_least_one {
        let first_id = lower_full_tag_or(tags, grammar, depth)?;
        let name = grammar.fresh_name("triggered_tags");
        Ok(grammar.add_rule(name, RuleBody::single(vec![Element::nt(first_id), Element::nt(dispatch_id)])))
    } else {
        Ok(dispatch_id)
    }
}

fn lower_tags_with_separator(
    tags: &[AnnotatedTag],
    separator: &str,
    at_least_one: bool,
    stop_after_first: bool,
    end_set: &[String],
    grammar: &mut Grammar,
    depth: usize,
) -> Result<RuleId, GrammarError> {
    let choice_id = lower_full_tag_or(tags, grammar, depth)?;
    if stop_after_first {
        if at_least_one {
            return Ok(choice_id);
        }
        let name = grammar.fresh_name("tags_with_separator");
        return Ok(grammar.add_rule(name, RuleBody::single(vec![Element::nt(choice_id).opt()])));
    }
    let tail_name = grammar.fresh_name("tags_list_tail");
    let tail_id = grammar.declare_rule(&tail_name);
    let mut continuation_alts = vec![vec![Element::terminal(separator.as_bytes()), Element::nt(tail_id)]];
    if !end_set.is_empty() {
        continuation_alts.push(vec![Element::nt(lower_end_alternation(end_set, grammar))]);
    }
    continuation_alts.push(Vec::new());
    let continuation_name = grammar.fresh_name("tags_list_continuation");
    let continuation_id = grammar.add_rule(continuation_name, RuleBody::new(continuation_alts));
    grammar.set_body(tail_id, RuleBody::single(vec![Element::nt(choice_id), Element::nt(continuation_id)]));
    if at_least_one {
        Ok(tail_id)
    } else {
        let name = grammar.fresh_name("tags_with_separator");
        Ok(grammar.add_rule(name, RuleBody::single(vec![Element::nt(tail_id).opt()])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structural_tag::{validate, Format, TagFormat};

    fn compile_format(format: &Format) -> Grammar {
        let annotated = validate(format).unwrap();
        compile(&annotated).unwrap()
    }

    #[test]
    fn const_string_lowers_to_a_single_terminal() {
        let grammar = compile_format(&Format::ConstString { value: "ok".into() });
        let body = &grammar.rule(grammar.root()).body;
        assert_eq!(body.alternatives, vec![vec![Element::terminal("ok")]]);
    }

    #[test]
    fn sequence_chains_its_elements() {
        let format = Format::Sequence {
            elements: vec![Format::ConstString { value: "a".into() }, Format::ConstString { value: "b".into() }],
        };
        let grammar = compile_format(&format);
        assert_eq!(grammar.rule(grammar.root()).body.alternatives[0].len(), 2);
    }

    #[test]
    fn or_produces_one_alternative_per_branch() {
        let format = Format::Or {
            elements: vec![Format::ConstString { value: "a".into() }, Format::ConstString { value: "b".into() }],
        };
        let grammar = compile_format(&format);
        assert_eq!(grammar.rule(grammar.root()).body.alternatives.len(), 2);
    }

    #[test]
    fn tag_with_single_end_appends_its_literal() {
        let format = Format::Tag(TagFormat {
            begin: "<a>".into(),
            content: Box::new(Format::ConstString { value: "x".into() }),
            end: vec!["</a>".into()],
        });
        let grammar = compile_format(&format);
        let seq = &grammar.rule(grammar.root()).body.alternatives[0];
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[0], Element::terminal("<a>"));
        assert_eq!(seq[2], Element::terminal("</a>"));
    }

    #[test]
    fn any_text_lowers_to_a_tag_dispatch_with_no_triggers() {
        let format = Format::Tag(TagFormat {
            begin: "<a>".into(),
            content: Box::new(Format::AnyText { excludes: Vec::new() }),
            end: vec!["</a>".into()],
        });
        let grammar = compile_format(&format);
        let content_rule = &grammar.rule(grammar.root()).body.alternatives[0][1];
        let Element::NonterminalRef(id) = content_rule else { panic!("expected a nonterminal ref") };
        let body = &grammar.rule(*id).body.alternatives[0];
        match &body[0] {
            Element::TagDispatch(dispatch) => {
                assert!(dispatch.triggers.is_empty());
                assert_eq!(dispatch.stop_strs, vec![b"</a>".to_vec()]);
            }
            other => panic!("expected TagDispatch, got {other:?}"),
        }
    }

    #[test]
    fn triggered_tags_stop_after_first_desugars_to_a_plain_choice() {
        let format = Format::TriggeredTags {
            triggers: vec!["<a".into()],
            tags: vec![TagFormat {
                begin: "<a>".into(),
                content: Box::new(Format::ConstString { value: "x".into() }),
                end: vec!["</a>".into()],
            }],
            at_least_one: true,
            stop_after_first: true,
            excludes: Vec::new(),
        };
        let grammar = compile_format(&format);
        assert_eq!(grammar.rule(grammar.root()).body.alternatives.len(), 1);
        assert!(!matches!(
            grammar.rule(grammar.root()).body.alternatives[0][0],
            Element::TagDispatch(_)
        ));
    }

    #[test]
    fn triggered_tags_looping_form_uses_tag_dispatch() {
        let format = Format::TriggeredTags {
            triggers: vec!["<a".into()],
            tags: vec![TagFormat {
                begin: "<a>".into(),
                content: Box::new(Format::ConstString { value: "x".into() }),
                end: vec!["</a>".into()],
            }],
            at_least_one: false,
            stop_after_first: false,
            excludes: Vec::new(),
        };
        let grammar = compile_format(&format);
        assert!(matches!(
            grammar.rule(grammar.root()).body.alternatives[0][0],
            Element::TagDispatch(_)
        ));
    }

    #[test]
    fn tags_with_separator_builds_a_recursive_list() {
        let format = Format::TagsWithSeparator {
            tags: vec![TagFormat {
                begin: "<a>".into(),
                content: Box::new(Format::ConstString { value: "x".into() }),
                end: vec!["</a>".into()],
            }],
            separator: ",".into(),
            at_least_one: true,
            stop_after_first: false,
        };
        let grammar = compile_format(&format);
        // root == tail rule: tag_choice followed by a continuation rule.
        assert_eq!(grammar.rule(grammar.root()).body.alternatives[0].len(), 2);
    }
}
