//! Structural-tag validator/analyzer (spec §4.1, C4): well-formedness
//! checks plus the bottom-up `bounded` / `end_set` / `contains_unlimited_text`
//! annotation pass (spec §3.3) that the compiler (C6) consumes.
use super::tree::{Format, TagFormat};
use crate::error::GrammarError;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct Attrs {
    pub bounded: bool,
    pub end_set: Vec<String>,
    pub contains_unlimited_text: bool,
}

#[derive(Debug, Clone)]
pub enum AnnotatedFormat {
    ConstString {
        value: String,
        attrs: Attrs,
    },
    JsonSchema {
        json_schema: Value,
        style: crate::schema::Style,
        attrs: Attrs,
    },
    QwenXmlParameter {
        json_schema: Value,
        attrs: Attrs,
    },
    AnyText {
        excludes: Vec<String>,
        attrs: Attrs,
    },
    Grammar {
        ebnf: String,
        attrs: Attrs,
    },
    Regex {
        pattern: String,
        excludes: Vec<String>,
        attrs: Attrs,
    },
    Sequence {
        elements: Vec<AnnotatedFormat>,
        attrs: Attrs,
    },
    Or {
        elements: Vec<AnnotatedFormat>,
        attrs: Attrs,
    },
    Tag(AnnotatedTag),
    TriggeredTags {
        triggers: Vec<String>,
        tags: Vec<AnnotatedTag>,
        at_least_one: bool,
        stop_after_first: bool,
        excludes: Vec<String>,
        attrs: Attrs,
    },
    TagsWithSeparator {
        tags: Vec<AnnotatedTag>,
        separator: String,
        at_least_one: bool,
        stop_after_first: bool,
        attrs: Attrs,
    },
}

#[derive(Debug, Clone)]
pub struct AnnotatedTag {
    pub begin: String,
    pub content: Box<AnnotatedFormat>,
    pub end: Vec<String>,
    pub attrs: Attrs,
}

impl AnnotatedFormat {
    pub fn attrs(&self) -> &Attrs {
        match self {
            AnnotatedFormat::ConstString { attrs, .. }
            | AnnotatedFormat::JsonSchema { attrs, .. }
            | AnnotatedFormat::QwenXmlParameter { attrs, .. }
            | AnnotatedFormat::AnyText { attrs, .. }
            | AnnotatedFormat::Grammar { attrs, .. }
            | AnnotatedFormat::Regex { attrs, .. }
            | AnnotatedFormat::Sequence { attrs, .. }
            | AnnotatedFormat::Or { attrs, .. }
            | AnnotatedFormat::TriggeredTags { attrs, .. }
            | AnnotatedFormat::TagsWithSeparator { attrs, .. } => attrs,
            AnnotatedFormat::Tag(tag) => &tag.attrs,
        }
    }
}

pub fn validate(format: &Format) -> Result<AnnotatedFormat, GrammarError> {
    validate_node(format, &[])
}

/// Pure, context-independent: whether N's language runs on forever absent
/// an outer terminator. Does not depend on `outer_end`.
fn contains_unlimited_text(format: &Format) -> bool {
    match format {
        Format::AnyText { .. } => true,
        Format::TriggeredTags { stop_after_first, .. } => !stop_after_first,
        Format::TagsWithSeparator { stop_after_first, .. } => !stop_after_first,
        Format::Sequence { elements } => elements.last().map(contains_unlimited_text).unwrap_or(false),
        Format::Or { elements } => elements.first().map(contains_unlimited_text).unwrap_or(false),
        _ => false,
    }
}

/// The finite set of literal strings that could start N, when determinate.
/// `None` means N's first bytes aren't expressible as a literal set (a
/// schema-shaped or free-text node) — used to thread a `Sequence` element's
/// effective end_set from its immediate right sibling.
fn literal_starts(format: &Format) -> Option<Vec<String>> {
    match format {
        Format::ConstString { value } => Some(vec![value.clone()]),
        Format::Tag(tag) => Some(vec![tag.begin.clone()]),
        Format::Sequence { elements } => elements.first().and_then(literal_starts),
        Format::Or { elements } => {
            let mut starts = Vec::new();
            for e in elements {
                starts.extend(literal_starts(e)?);
            }
            Some(starts)
        }
        Format::TriggeredTags { tags, .. } | Format::TagsWithSeparator { tags, .. } => {
            Some(tags.iter().map(|t| t.begin.clone()).collect())
        }
        _ => None,
    }
}

fn check_non_empty(list: &[String], field: &str, node: &str) -> Result<(), GrammarError> {
    if list.iter().any(String::is_empty) {
        return Err(GrammarError::validation(format!("every entry of '{node}.{field}' must be non-empty")));
    }
    Ok(())
}

fn validate_node(format: &Format, outer_end: &[String]) -> Result<AnnotatedFormat, GrammarError> {
    let unlimited = contains_unlimited_text(format);
    let bounded = !unlimited || !outer_end.is_empty();
    let attrs = Attrs {
        bounded,
        end_set: outer_end.to_vec(),
        contains_unlimited_text: unlimited,
    };

    match format {
        Format::ConstString { value } => Ok(AnnotatedFormat::ConstString {
            value: value.clone(),
            attrs,
        }),
        Format::JsonSchema { json_schema, style } => Ok(AnnotatedFormat::JsonSchema {
            json_schema: json_schema.clone(),
            style: *style,
            attrs,
        }),
        Format::QwenXmlParameter { json_schema } => Ok(AnnotatedFormat::QwenXmlParameter {
            json_schema: json_schema.clone(),
            attrs,
        }),
        Format::AnyText { excludes } => {
            check_non_empty(excludes, "excludes", "any_text")?;
            Ok(AnnotatedFormat::AnyText {
                excludes: excludes.clone(),
                attrs,
            })
        }
        Format::Grammar { ebnf } => Ok(AnnotatedFormat::Grammar { ebnf: ebnf.clone(), attrs }),
        Format::Regex { pattern, excludes } => {
            check_non_empty(excludes, "excludes", "regex")?;
            Ok(AnnotatedFormat::Regex {
                pattern: pattern.clone(),
                excludes: excludes.clone(),
                attrs,
            })
        }
        Format::Sequence { elements } => {
            let mut annotated = Vec::with_capacity(elements.len());
            let last = elements.len().saturating_sub(1);
            for (i, element) in elements.iter().enumerate() {
                let child_outer = if i == last {
                    outer_end.to_vec()
                } else {
                    literal_starts(&elements[i + 1]).unwrap_or_else(|| {
                        if i + 1 == last {
                            outer_end.to_vec()
                        } else {
                            Vec::new()
                        }
                    })
                };
                let child = validate_node(element, &child_outer)?;
                if i != last && !child.attrs().bounded {
                    return Err(GrammarError::validation(
                        "'sequence': every element except the last must be bounded",
                    ));
                }
                annotated.push(child);
            }
            Ok(AnnotatedFormat::Sequence { elements: annotated, attrs })
        }
        Format::Or { elements } => {
            let annotated: Vec<AnnotatedFormat> = elements
                .iter()
                .map(|e| validate_node(e, outer_end))
                .collect::<Result<_, _>>()?;
            let all_bounded = annotated.iter().all(|c| c.attrs().bounded);
            let all_unbounded = annotated.iter().all(|c| !c.attrs().bounded);
            if !all_bounded && !all_unbounded {
                return Err(GrammarError::validation(
                    "'or': either all branches must be bounded or all unbounded",
                ));
            }
            Ok(AnnotatedFormat::Or { elements: annotated, attrs })
        }
        Format::Tag(tag) => Ok(AnnotatedFormat::Tag(validate_tag(tag, outer_end)?)),
        Format::TriggeredTags {
            triggers,
            tags,
            at_least_one,
            stop_after_first,
            excludes,
        } => {
            check_non_empty(triggers, "triggers", "triggered_tags")?;
            check_non_empty(excludes, "excludes", "triggered_tags")?;
            // `outer_end` only becomes this node's `TagDispatch::stop_strs` when
            // `stop_after_first=false` (see `compiler::lower_triggered_tags`);
            // in the `stop_after_first=true` desugaring no dispatch is built, so
            // there is nothing for a trigger to collide with.
            let dispatch_stop_strs: &[String] = if *stop_after_first { &[] } else { outer_end };
            validate_trigger_prefixes(triggers, tags, dispatch_stop_strs)?;
            let tag_outer = if *stop_after_first { outer_end.to_vec() } else { Vec::new() };
            let annotated_tags: Vec<AnnotatedTag> = tags
                .iter()
                .map(|t| validate_tag(t, &tag_outer))
                .collect::<Result<_, _>>()?;
            Ok(AnnotatedFormat::TriggeredTags {
                triggers: triggers.clone(),
                tags: annotated_tags,
                at_least_one: *at_least_one,
                stop_after_first: *stop_after_first,
                excludes: excludes.clone(),
                attrs,
            })
        }
        Format::TagsWithSeparator {
            tags,
            separator,
            at_least_one,
            stop_after_first,
        } => {
            let tag_outer = if *stop_after_first { outer_end.to_vec() } else { Vec::new() };
            let annotated_tags: Vec<AnnotatedTag> = tags
                .iter()
                .map(|t| validate_tag(t, &tag_outer))
                .collect::<Result<_, _>>()?;
            Ok(AnnotatedFormat::TagsWithSeparator {
                tags: annotated_tags,
                separator: separator.clone(),
                at_least_one: *at_least_one,
                stop_after_first: *stop_after_first,
                attrs,
            })
        }
    }
}

fn validate_tag(tag: &TagFormat, outer_end: &[String]) -> Result<AnnotatedTag, GrammarError> {
    if tag.begin.is_empty() {
        return Err(GrammarError::validation("'tag.begin' must be non-empty"));
    }
    let empty_count = tag.end.iter().filter(|s| s.is_empty()).count();
    if tag.end.len() - empty_count < tag.end.len() && empty_count > 1 {
        return Err(GrammarError::validation("'tag.end' may contain at most one empty string"));
    }
    let content_unlimited = contains_unlimited_text(&tag.content);
    let has_non_empty_end = tag.end.iter().any(|s| !s.is_empty());
    if content_unlimited && !has_non_empty_end {
        return Err(GrammarError::validation(
            "'tag.content' is unbounded-right and 'tag.end' has no non-empty terminator",
        ));
    }
    let content = Box::new(validate_node(&tag.content, &tag.end)?);
    let attrs = Attrs {
        bounded: true,
        end_set: outer_end.to_vec(),
        contains_unlimited_text: false,
    };
    Ok(AnnotatedTag {
        begin: tag.begin.clone(),
        content,
        end: tag.end.clone(),
        attrs,
    })
}

/// Spec §3.1: within one `TagDispatch` node, triggers must be pairwise
/// non-prefix-comparable, and no trigger may equal (or prefix-overlap) a
/// `stop_str`. `stop_strs` is empty when this trigger set never becomes a
/// `TagDispatch` (the `stop_after_first=true` desugaring).
fn validate_trigger_prefixes(triggers: &[String], tags: &[TagFormat], stop_strs: &[String]) -> Result<(), GrammarError> {
    for tag in tags {
        let matches = triggers.iter().filter(|t| tag.begin.starts_with(t.as_str())).count();
        if matches != 1 {
            return Err(GrammarError::validation(format!(
                "'triggered_tags': tag.begin '{}' must be prefixed by exactly one trigger, found {matches}",
                tag.begin
            )));
        }
    }
    for (i, a) in triggers.iter().enumerate() {
        for b in &triggers[i + 1..] {
            if a.starts_with(b.as_str()) || b.starts_with(a.as_str()) {
                return Err(GrammarError::validation(format!(
                    "'triggered_tags': triggers '{a}' and '{b}' must be pairwise non-prefix-comparable"
                )));
            }
        }
    }
    for trigger in triggers {
        for stop in stop_strs {
            if trigger.starts_with(stop.as_str()) || stop.starts_with(trigger.as_str()) {
                return Err(GrammarError::validation(format!(
                    "'triggered_tags': trigger '{trigger}' must not overlap with stop string '{stop}'"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structural_tag::tree::Format;

    #[test]
    fn bounded_const_string_needs_no_outer_end() {
        let format = Format::ConstString { value: "x".into() };
        let annotated = validate(&format).unwrap();
        assert!(annotated.attrs().bounded);
        assert!(!annotated.attrs().contains_unlimited_text);
    }

    #[test]
    fn unbounded_any_text_without_outer_end_is_rejected_inside_tag() {
        let tag = Format::Tag(TagFormat {
            begin: "<x>".into(),
            content: Box::new(Format::AnyText { excludes: Vec::new() }),
            end: vec!["".into()],
        });
        let err = validate(&tag).unwrap_err();
        assert!(matches!(err, GrammarError::StructuralTagValidationError(_)));
    }

    #[test]
    fn bounded_any_text_with_real_end_string_is_accepted() {
        let tag = Format::Tag(TagFormat {
            begin: "<x>".into(),
            content: Box::new(Format::AnyText { excludes: Vec::new() }),
            end: vec!["</x>".into()],
        });
        let annotated = validate(&tag).unwrap();
        assert!(annotated.attrs().bounded);
    }

    #[test]
    fn sequence_requires_non_last_elements_bounded() {
        let seq = Format::Sequence {
            elements: vec![
                Format::AnyText { excludes: Vec::new() },
                Format::ConstString { value: "tail".into() },
            ],
        };
        assert!(validate(&seq).is_err());
    }

    #[test]
    fn or_rejects_mixed_boundedness() {
        let or = Format::Or {
            elements: vec![
                Format::ConstString { value: "a".into() },
                Format::AnyText { excludes: Vec::new() },
            ],
        };
        assert!(validate(&or).is_err());
    }

    #[test]
    fn triggered_tags_requires_unique_trigger_prefix() {
        let format = Format::TriggeredTags {
            triggers: vec!["<a>".into(), "<b>".into()],
            tags: vec![TagFormat {
                begin: "<c>".into(),
                content: Box::new(Format::ConstString { value: "x".into() }),
                end: vec!["</c>".into()],
            }],
            at_least_one: false,
            stop_after_first: false,
            excludes: Vec::new(),
        };
        assert!(validate(&format).is_err());
    }

    /// Spec §8.3 boundary case: "Single-character trigger equals stop_str
    /// ⇒ compile-time error." The trailing `ConstString` gives the
    /// `triggered_tags` node an outer end set of `["<"]`, which collides
    /// with its own single-character trigger.
    #[test]
    fn single_char_trigger_equal_to_stop_str_is_rejected() {
        let format = Format::Sequence {
            elements: vec![
                Format::TriggeredTags {
                    triggers: vec!["<".into()],
                    tags: vec![TagFormat {
                        begin: "<a>".into(),
                        content: Box::new(Format::ConstString { value: "x".into() }),
                        end: vec!["</a>".into()],
                    }],
                    at_least_one: false,
                    stop_after_first: false,
                    excludes: Vec::new(),
                },
                Format::ConstString { value: "<".into() },
            ],
        };
        let err = validate(&format).unwrap_err();
        assert!(matches!(err, GrammarError::StructuralTagValidationError(_)));
    }
}
