//! The structural-tag data model (spec §3.2) and its JSON surface (spec
//! §6.1), grounded in `original_source/python/xgrammar/structural_tag.py`'s
//! Pydantic models. Parsed by hand rather than via `#[derive(Deserialize)]`
//! so that an unrecognized `"type"` produces the exact
//! `"Format type not recognized: …"` message spec §6.1 names, and so a
//! malformed nested `Format` reports which node was at fault.
use crate::error::GrammarError;
use crate::schema::Style;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum Format {
    ConstString {
        value: String,
    },
    JsonSchema {
        json_schema: Value,
        style: Style,
    },
    QwenXmlParameter {
        json_schema: Value,
    },
    AnyText {
        excludes: Vec<String>,
    },
    Grammar {
        ebnf: String,
    },
    Regex {
        pattern: String,
        excludes: Vec<String>,
    },
    Sequence {
        elements: Vec<Format>,
    },
    Or {
        elements: Vec<Format>,
    },
    Tag(TagFormat),
    TriggeredTags {
        triggers: Vec<String>,
        tags: Vec<TagFormat>,
        at_least_one: bool,
        stop_after_first: bool,
        excludes: Vec<String>,
    },
    TagsWithSeparator {
        tags: Vec<TagFormat>,
        separator: String,
        at_least_one: bool,
        stop_after_first: bool,
    },
}

#[derive(Debug, Clone)]
pub struct TagFormat {
    pub begin: String,
    pub content: Box<Format>,
    pub end: Vec<String>,
}

fn get_str<'v>(obj: &'v Value, field: &str, node: &str) -> Result<&'v str, GrammarError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GrammarError::validation(format!("'{node}' is missing required string field '{field}'")))
}

fn get_str_owned(obj: &Value, field: &str, node: &str) -> Result<String, GrammarError> {
    get_str(obj, field, node).map(str::to_string)
}

fn get_non_empty_str(obj: &Value, field: &str, node: &str) -> Result<String, GrammarError> {
    let s = get_str_owned(obj, field, node)?;
    if s.is_empty() {
        return Err(GrammarError::validation(format!("'{node}.{field}' must be non-empty")));
    }
    Ok(s)
}

fn get_str_list(obj: &Value, field: &str, node: &str) -> Result<Vec<String>, GrammarError> {
    match obj.get(field) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| GrammarError::validation(format!("'{node}.{field}' must be a list of strings")))
            })
            .collect(),
        Some(_) => Err(GrammarError::validation(format!("'{node}.{field}' must be a list of strings"))),
    }
}

fn get_non_empty_str_list(obj: &Value, field: &str, node: &str) -> Result<Vec<String>, GrammarError> {
    let list = get_str_list(obj, field, node)?;
    if list.is_empty() {
        return Err(GrammarError::validation(format!("'{node}.{field}' must be a non-empty list")));
    }
    Ok(list)
}

fn get_bool_default(obj: &Value, field: &str, default: bool) -> bool {
    obj.get(field).and_then(Value::as_bool).unwrap_or(default)
}

fn get_format_list(obj: &Value, field: &str, node: &str) -> Result<Vec<Format>, GrammarError> {
    match obj.get(field) {
        Some(Value::Array(items)) if !items.is_empty() => items.iter().map(Format::from_value).collect(),
        Some(Value::Array(_)) => Err(GrammarError::validation(format!("'{node}.{field}' must be a non-empty list"))),
        _ => Err(GrammarError::validation(format!("'{node}' is missing required field '{field}'"))),
    }
}

fn get_tag_format_list(obj: &Value, field: &str, node: &str) -> Result<Vec<TagFormat>, GrammarError> {
    match obj.get(field) {
        Some(Value::Array(items)) if !items.is_empty() => items.iter().map(TagFormat::from_value).collect(),
        Some(Value::Array(_)) => Err(GrammarError::validation(format!("'{node}.{field}' must be a non-empty list"))),
        _ => Err(GrammarError::validation(format!("'{node}' is missing required field '{field}'"))),
    }
}

impl TagFormat {
    fn from_value(value: &Value) -> Result<Self, GrammarError> {
        let begin = get_non_empty_str(value, "begin", "tag")?;
        let content_value = value
            .get("content")
            .ok_or_else(|| GrammarError::validation("'tag' is missing required field 'content'"))?;
        let content = Box::new(Format::from_value(content_value)?);
        let end = match value.get("end") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => {
                if items.is_empty() {
                    return Err(GrammarError::validation("'tag.end' array must be non-empty"));
                }
                let strings: Vec<String> = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).ok_or_else(|| GrammarError::validation("'tag.end' entries must be strings")))
                    .collect::<Result<_, _>>()?;
                let empty_count = strings.iter().filter(|s| s.is_empty()).count();
                if empty_count > 1 {
                    return Err(GrammarError::validation(
                        "'tag.end' may contain at most one empty string",
                    ));
                }
                strings
            }
            _ => return Err(GrammarError::validation("'tag' is missing required field 'end'")),
        };
        Ok(TagFormat { begin, content, end })
    }
}

impl Format {
    pub fn from_json(text: &str) -> Result<Format, GrammarError> {
        let value: Value = serde_json::from_str(text)?;
        let format_value = value
            .get("format")
            .ok_or_else(|| GrammarError::validation("structural tag JSON is missing required field 'format'"))?;
        Format::from_value(format_value)
    }

    pub fn from_value(value: &Value) -> Result<Format, GrammarError> {
        let obj = value
            .as_object()
            .ok_or_else(|| GrammarError::validation("a structural tag format must be a JSON object"))?;
        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GrammarError::validation("structural tag format is missing required string field 'type'"))?;
        match type_name {
            "const_string" => Ok(Format::ConstString {
                value: get_non_empty_str(value, "value", "const_string")?,
            }),
            "json_schema" => {
                let json_schema = value
                    .get("json_schema")
                    .cloned()
                    .ok_or_else(|| GrammarError::validation("'json_schema' is missing required field 'json_schema'"))?;
                let style = match value.get("style").and_then(Value::as_str) {
                    Some(s) => Style::parse(s)?,
                    None => Style::Json,
                };
                Ok(Format::JsonSchema { json_schema, style })
            }
            "qwen_xml_parameter" => Ok(Format::QwenXmlParameter {
                json_schema: value
                    .get("json_schema")
                    .cloned()
                    .ok_or_else(|| GrammarError::validation("'qwen_xml_parameter' is missing required field 'json_schema'"))?,
            }),
            "any_text" => Ok(Format::AnyText {
                excludes: get_str_list(value, "excludes", "any_text")?,
            }),
            "grammar" => Ok(Format::Grammar {
                ebnf: get_str_owned(value, "grammar", "grammar")?,
            }),
            "regex" => Ok(Format::Regex {
                pattern: get_str_owned(value, "pattern", "regex")?,
                excludes: get_str_list(value, "excludes", "regex")?,
            }),
            "sequence" => Ok(Format::Sequence {
                elements: get_format_list(value, "elements", "sequence")?,
            }),
            "or" => Ok(Format::Or {
                elements: get_format_list(value, "elements", "or")?,
            }),
            "tag" => Ok(Format::Tag(TagFormat::from_value(value)?)),
            "triggered_tags" => Ok(Format::TriggeredTags {
                triggers: get_non_empty_str_list(value, "triggers", "triggered_tags")?,
                tags: get_tag_format_list(value, "tags", "triggered_tags")?,
                at_least_one: get_bool_default(value, "at_least_one", false),
                stop_after_first: get_bool_default(value, "stop_after_first", false),
                excludes: get_str_list(value, "excludes", "triggered_tags")?,
            }),
            "tags_with_separator" => Ok(Format::TagsWithSeparator {
                tags: get_tag_format_list(value, "tags", "tags_with_separator")?,
                separator: get_str_owned(value, "separator", "tags_with_separator")?,
                at_least_one: get_bool_default(value, "at_least_one", false),
                stop_after_first: get_bool_default(value, "stop_after_first", false),
            }),
            other => Err(GrammarError::validation(format!("Format type not recognized: {other}"))),
        }
    }
}

/// One entry of the deprecated `{"begin", "schema", "end"}` legacy shape,
/// paired with a top-level `triggers` list (spec's `StructuralTagItem`).
#[derive(Debug, Clone)]
pub struct LegacyItem {
    pub begin: String,
    pub schema: Value,
    pub end: String,
}

/// Desugars a legacy `(items, triggers)` pair into a single
/// `TriggeredTagsFormat` (`at_least_one=false, stop_after_first=false`),
/// matching `StructuralTag::from_legacy_structural_tag`.
pub fn from_legacy_items(items: Vec<LegacyItem>, triggers: Vec<String>) -> Format {
    let tags = items
        .into_iter()
        .map(|item| TagFormat {
            begin: item.begin,
            content: Box::new(Format::JsonSchema {
                json_schema: item.schema,
                style: Style::Json,
            }),
            end: vec![item.end],
        })
        .collect();
    Format::TriggeredTags {
        triggers,
        tags,
        at_least_one: false,
        stop_after_first: false,
        excludes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_const_string() {
        let json = r#"{"type": "structural_tag", "format": {"type": "const_string", "value": "x"}}"#;
        let format = Format::from_json(json).unwrap();
        assert!(matches!(format, Format::ConstString { value } if value == "x"));
    }

    #[test]
    fn rejects_unknown_type() {
        let json = r#"{"type": "structural_tag", "format": {"type": "bogus"}}"#;
        let err = Format::from_json(json).unwrap_err();
        match err {
            GrammarError::StructuralTagValidationError(msg) => assert!(msg.contains("Format type not recognized")),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn legacy_items_desugar_to_triggered_tags() {
        let items = vec![LegacyItem {
            begin: "<function=f>".into(),
            schema: serde_json::json!({"type": "object"}),
            end: "</function>".into(),
        }];
        let format = from_legacy_items(items, vec!["<function=".into()]);
        assert!(matches!(format, Format::TriggeredTags { .. }));
    }
}
