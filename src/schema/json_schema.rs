//! `json_schema_to_ebnf`: lowers a JSON Schema (plus the Qwen XML function-
//! calling dialect) into a grammar fragment (spec §3 "External lowerings",
//! C3; style/ctx shape grounded in `original_source/python/xgrammar/structural_tag.py`'s
//! `JsonSchemaFormat`/`QwenXmlParameterFormat`).
use super::regex::regex_to_ebnf;
use crate::error::GrammarError;
use crate::ir::{CharClass, Element, Grammar, RuleBody, RuleId};
use serde_json::Value;

/// How the schema's content is rendered (spec §3.2's `style` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Json,
    QwenXml,
}

impl Style {
    pub fn parse(s: &str) -> Result<Self, GrammarError> {
        match s {
            "json" => Ok(Style::Json),
            "qwen_xml" => Ok(Style::QwenXml),
            other => Err(GrammarError::validation(format!("unknown json_schema style '{other}'"))),
        }
    }
}

/// Ambient lowering options threaded through recursive calls.
#[derive(Debug, Clone)]
pub struct JsonSchemaContext {
    /// Number of spaces of pretty-print indent, if the grammar should
    /// require a specific layout. `None` means whitespace is accepted but
    /// not required in any specific amount.
    pub indent: Option<usize>,
    /// When true, objects without an explicit `additionalProperties` are
    /// closed (extra keys rejected) rather than open.
    pub strict: bool,
}

impl Default for JsonSchemaContext {
    fn default() -> Self {
        Self {
            indent: None,
            strict: true,
        }
    }
}

const MIN_I64: i64 = i64::MIN;
const MAX_I64: i64 = i64::MAX;

pub fn json_schema_to_ebnf(
    schema: &Value,
    style: Style,
    ctx: &JsonSchemaContext,
    grammar: &mut Grammar,
) -> Result<RuleId, GrammarError> {
    lower(schema, style, ctx, grammar)
}

fn lower(schema: &Value, style: Style, ctx: &JsonSchemaContext, grammar: &mut Grammar) -> Result<RuleId, GrammarError> {
    match schema {
        Value::Bool(true) => Ok(any_json_value(grammar)),
        Value::Bool(false) => {
            let name = grammar.fresh_name("unsatisfiable");
            Ok(grammar.add_rule(name, RuleBody::new(Vec::new())))
        }
        Value::Object(obj) => lower_object_schema(obj, style, ctx, grammar),
        other => Err(GrammarError::validation(format!(
            "json schema must be a boolean or an object, got {other}"
        ))),
    }
}

fn lower_object_schema(
    obj: &serde_json::Map<String, Value>,
    style: Style,
    ctx: &JsonSchemaContext,
    grammar: &mut Grammar,
) -> Result<RuleId, GrammarError> {
    if let Some(enum_values) = obj.get("enum").and_then(Value::as_array) {
        return Ok(lower_enum(enum_values, grammar));
    }
    if let Some(const_value) = obj.get("const") {
        return Ok(lower_const(const_value, grammar));
    }
    if let Some(variants) = obj.get("anyOf").or_else(|| obj.get("oneOf")).and_then(Value::as_array) {
        return lower_union(variants, style, ctx, grammar);
    }

    let type_name = obj.get("type").and_then(Value::as_str);
    match type_name {
        Some("object") if style == Style::QwenXml => lower_qwen_xml_object(obj, ctx, grammar),
        Some("object") => lower_json_object(obj, ctx, grammar),
        Some("array") => lower_json_array(obj, ctx, grammar),
        Some("string") => lower_string(obj, grammar),
        Some("integer") => lower_integer(obj, grammar),
        Some("number") => lower_number(obj, grammar),
        Some("boolean") => Ok(boolean_rule(grammar)),
        Some("null") => Ok(null_rule(grammar)),
        Some(other) => Err(GrammarError::validation(format!("unsupported json schema type '{other}'"))),
        None => Ok(any_json_value(grammar)),
    }
}

fn lower_enum(values: &[Value], grammar: &mut Grammar) -> RuleId {
    let alternatives = values
        .iter()
        .map(|v| vec![Element::terminal(v.to_string())])
        .collect();
    let name = grammar.fresh_name("enum");
    grammar.add_rule(name, RuleBody::new(alternatives))
}

fn lower_const(value: &Value, grammar: &mut Grammar) -> RuleId {
    let name = grammar.fresh_name("const");
    grammar.add_rule(name, RuleBody::single(vec![Element::terminal(value.to_string())]))
}

fn lower_union(
    variants: &[Value],
    style: Style,
    ctx: &JsonSchemaContext,
    grammar: &mut Grammar,
) -> Result<RuleId, GrammarError> {
    let mut alternatives = Vec::with_capacity(variants.len());
    for variant in variants {
        let id = lower(variant, style, ctx, grammar)?;
        alternatives.push(vec![Element::nt(id)]);
    }
    let name = grammar.fresh_name("union");
    Ok(grammar.add_rule(name, RuleBody::new(alternatives)))
}

fn ws_rule(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_ws") {
        return id;
    }
    let class = Element::CharClass(CharClass::new(
        vec![(b' ' as u32, b' ' as u32), (b'\t' as u32, b'\t' as u32), (b'\n' as u32, b'\n' as u32), (b'\r' as u32, b'\r' as u32)],
        false,
    ));
    grammar.add_rule("json_ws", RuleBody::single(vec![class.star()]))
}

fn string_rule(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_string") {
        return id;
    }
    let id = grammar.declare_rule("json_string");
    let unescaped = Element::CharClass(CharClass::new(vec![(0x20, 0x21), (0x23, 0x5B), (0x5D, 0x10FFFF)], false));
    let hex = Element::CharClass(CharClass::new(vec![(b'0' as u32, b'9' as u32), (b'a' as u32, b'f' as u32), (b'A' as u32, b'F' as u32)], false));
    let escape = vec![
        Element::terminal("\\"),
        Element::CharClass(CharClass::new(
            vec![(b'"' as u32, b'"' as u32), (b'\\' as u32, b'\\' as u32), (b'/' as u32, b'/' as u32), (b'b' as u32, b'b' as u32), (b'f' as u32, b'f' as u32), (b'n' as u32, b'n' as u32), (b'r' as u32, b'r' as u32), (b't' as u32, b't' as u32)],
            false,
        )),
    ];
    let unicode_escape = vec![Element::terminal("\\u"), hex.clone().repeat(4, Some(4))];
    let char_group = grammar.fresh_name("json_string_char");
    let char_id = grammar.add_rule(
        char_group,
        RuleBody::new(vec![vec![unescaped], escape, unicode_escape]),
    );
    grammar.set_body(
        id,
        RuleBody::single(vec![Element::terminal("\""), Element::nt(char_id).star(), Element::terminal("\"")]),
    );
    id
}

fn number_rule(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_number") {
        return id;
    }
    let digit = || Element::CharClass(CharClass::new(vec![(b'0' as u32, b'9' as u32)], false));
    let nonzero_digit = || Element::CharClass(CharClass::new(vec![(b'1' as u32, b'9' as u32)], false));
    let int_part = grammar.fresh_name("json_int_part");
    let int_id = grammar.add_rule(
        int_part,
        RuleBody::new(vec![vec![Element::terminal("0")], vec![nonzero_digit(), digit().star()]]),
    );
    let frac = vec![Element::terminal("."), digit().plus()];
    let exp = vec![
        Element::CharClass(CharClass::new(vec![(b'e' as u32, b'e' as u32), (b'E' as u32, b'E' as u32)], false)),
        Element::CharClass(CharClass::new(vec![(b'+' as u32, b'+' as u32), (b'-' as u32, b'-' as u32)], false)).opt(),
        digit().plus(),
    ];
    let frac_group = grammar.fresh_name("json_frac");
    let frac_id = grammar.add_rule(frac_group, RuleBody::new(vec![frac]));
    let exp_group = grammar.fresh_name("json_exp");
    let exp_id = grammar.add_rule(exp_group, RuleBody::new(vec![exp]));
    grammar.add_rule(
        "json_number",
        RuleBody::single(vec![
            Element::terminal("-").opt(),
            Element::nt(int_id),
            Element::nt(frac_id).opt(),
            Element::nt(exp_id).opt(),
        ]),
    )
}

fn boolean_rule(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_boolean") {
        return id;
    }
    grammar.add_rule(
        "json_boolean",
        RuleBody::new(vec![vec![Element::terminal("true")], vec![Element::terminal("false")]]),
    )
}

fn null_rule(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_null") {
        return id;
    }
    grammar.add_rule("json_null", RuleBody::single(vec![Element::terminal("null")]))
}

/// The full unconstrained JSON value grammar, used for a bare `true` schema
/// and for `additionalProperties`/`items` left unspecified.
fn any_json_value(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_value") {
        return id;
    }
    let value_id = grammar.declare_rule("json_value");
    let object_id = any_json_object(grammar);
    let array_id = any_json_array(grammar);
    let string_id = string_rule(grammar);
    let number_id = number_rule(grammar);
    let boolean_id = boolean_rule(grammar);
    let null_id = null_rule(grammar);
    grammar.set_body(
        value_id,
        RuleBody::new(vec![
            vec![Element::nt(object_id)],
            vec![Element::nt(array_id)],
            vec![Element::nt(string_id)],
            vec![Element::nt(number_id)],
            vec![Element::nt(boolean_id)],
            vec![Element::nt(null_id)],
        ]),
    );
    value_id
}

fn any_json_object(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_object") {
        return id;
    }
    let object_id = grammar.declare_rule("json_object");
    let ws = ws_rule(grammar);
    let string_id = string_rule(grammar);
    let value_id = grammar.declare_rule("json_value");
    let member_name = grammar.fresh_name("json_member");
    let member_id = grammar.add_rule(
        member_name,
        RuleBody::single(vec![
            Element::nt(string_id),
            Element::nt(ws),
            Element::terminal(":"),
            Element::nt(ws),
            Element::nt(value_id),
        ]),
    );
    let sep_member_name = grammar.fresh_name("json_member_sep");
    let sep_member_id = grammar.add_rule(
        sep_member_name,
        RuleBody::single(vec![Element::nt(ws), Element::terminal(","), Element::nt(ws), Element::nt(member_id)]),
    );
    let tail_name = grammar.fresh_name("json_members");
    let tail_id = grammar.add_rule(
        tail_name,
        RuleBody::single(vec![Element::nt(member_id), Element::nt(sep_member_id).star()]),
    );
    grammar.set_body(
        object_id,
        RuleBody::new(vec![vec![
            Element::terminal("{"),
            Element::nt(ws),
            Element::nt(tail_id).opt(),
            Element::nt(ws),
            Element::terminal("}"),
        ]]),
    );
    object_id
}

fn any_json_array(grammar: &mut Grammar) -> RuleId {
    if let Some(id) = grammar.rule_id("json_array") {
        return id;
    }
    let array_id = grammar.declare_rule("json_array");
    let ws = ws_rule(grammar);
    let value_id = grammar.declare_rule("json_value");
    build_array_body(grammar, array_id, ws, value_id);
    array_id
}

fn build_array_body(grammar: &mut Grammar, array_id: RuleId, ws: RuleId, item_id: RuleId) {
    let sep_item_name = grammar.fresh_name("json_array_sep_item");
    let sep_item_id = grammar.add_rule(
        sep_item_name,
        RuleBody::single(vec![Element::nt(ws), Element::terminal(","), Element::nt(ws), Element::nt(item_id)]),
    );
    let tail_name = grammar.fresh_name("json_array_items");
    let tail_id = grammar.add_rule(
        tail_name,
        RuleBody::single(vec![Element::nt(item_id), Element::nt(sep_item_id).star()]),
    );
    grammar.set_body(
        array_id,
        RuleBody::new(vec![vec![
            Element::terminal("["),
            Element::nt(ws),
            Element::nt(tail_id).opt(),
            Element::nt(ws),
            Element::terminal("]"),
        ]]),
    );
}

fn lower_json_object(
    obj: &serde_json::Map<String, Value>,
    ctx: &JsonSchemaContext,
    grammar: &mut Grammar,
) -> Result<RuleId, GrammarError> {
    let ws = ws_rule(grammar);
    let properties = obj.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut member_elements: Vec<Element> = Vec::new();
    if let Some(properties) = properties {
        let mut first = true;
        for (name, prop_schema) in properties {
            let value_id = lower(prop_schema, Style::Json, ctx, grammar)?;
            let key = serde_json::Value::String(name.clone()).to_string();
            let member_name = grammar.fresh_name("json_member");
            let member_seq = vec![
                Element::terminal(key),
                Element::nt(ws),
                Element::terminal(":"),
                Element::nt(ws),
                Element::nt(value_id),
            ];
            let member_id = grammar.add_rule(member_name, RuleBody::single(member_seq));
            let comma_prefix = if first {
                Vec::new()
            } else {
                vec![Element::nt(ws), Element::terminal(",")]
            };
            let mut entry_seq = comma_prefix;
            entry_seq.push(Element::nt(ws));
            entry_seq.push(Element::nt(member_id));
            let entry_id = make_entry_rule(grammar, entry_seq);
            let entry_element = if required.contains(&name.as_str()) {
                Element::nt(entry_id)
            } else {
                Element::nt(entry_id).opt()
            };
            member_elements.push(entry_element);
            first = false;
        }
    }

    let allow_additional = obj
        .get("additionalProperties")
        .map(|v| !matches!(v, Value::Bool(false)))
        .unwrap_or(!ctx.strict);
    if allow_additional {
        let additional_schema = obj.get("additionalProperties").filter(|v| !v.is_boolean());
        let value_id = match additional_schema {
            Some(schema) => lower(schema, Style::Json, ctx, grammar)?,
            None => any_json_value(grammar),
        };
        let string_id = string_rule(grammar);
        let tail_member = grammar.fresh_name("json_extra_member");
        let tail_member_id = grammar.add_rule(
            tail_member,
            RuleBody::single(vec![
                Element::nt(string_id),
                Element::nt(ws),
                Element::terminal(":"),
                Element::nt(ws),
                Element::nt(value_id),
            ]),
        );
        let tail_seq_name = grammar.fresh_name("json_extra_members");
        let sep_tail_name = grammar.fresh_name("json_extra_member_sep");
        let sep_tail_id = grammar.add_rule(
            sep_tail_name,
            RuleBody::single(vec![Element::nt(ws), Element::terminal(","), Element::nt(ws), Element::nt(tail_member_id)]),
        );
        let tail_seq_id = grammar.add_rule(
            tail_seq_name,
            RuleBody::single(vec![Element::nt(ws), Element::terminal(","), Element::nt(ws), Element::nt(tail_member_id), Element::nt(sep_tail_id).star()]),
        );
        member_elements.push(Element::nt(tail_seq_id).opt());
    }

    let mut body = vec![Element::terminal("{"), Element::nt(ws)];
    body.extend(member_elements);
    body.push(Element::nt(ws));
    body.push(Element::terminal("}"));
    let name = grammar.fresh_name("json_schema_object");
    Ok(grammar.add_rule(name, RuleBody::single(body)))
}

fn make_entry_rule(grammar: &mut Grammar, seq: Vec<Element>) -> RuleId {
    let name = grammar.fresh_name("json_entry");
    grammar.add_rule(name, RuleBody::single(seq))
}

fn lower_json_array(
    obj: &serde_json::Map<String, Value>,
    ctx: &JsonSchemaContext,
    grammar: &mut Grammar,
) -> Result<RuleId, GrammarError> {
    let ws = ws_rule(grammar);
    let item_id = match obj.get("items") {
        Some(items_schema) => lower(items_schema, Style::Json, ctx, grammar)?,
        None => any_json_value(grammar),
    };
    let array_name = grammar.fresh_name("json_schema_array");
    let array_id = grammar.declare_rule(&array_name);
    build_array_body(grammar, array_id, ws, item_id);
    Ok(array_id)
}

fn lower_string(obj: &serde_json::Map<String, Value>, grammar: &mut Grammar) -> Result<RuleId, GrammarError> {
    if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
        let content_id = regex_to_ebnf(pattern, grammar)?;
        let name = grammar.fresh_name("json_pattern_string");
        return Ok(grammar.add_rule(
            name,
            RuleBody::single(vec![Element::terminal("\""), Element::nt(content_id), Element::terminal("\"")]),
        ));
    }
    let min_length = obj.get("minLength").and_then(Value::as_u64).unwrap_or(0) as usize;
    let max_length = obj.get("maxLength").and_then(Value::as_u64).map(|n| n as usize);
    if min_length == 0 && max_length.is_none() {
        return Ok(string_rule(grammar));
    }
    let char_class = Element::CharClass(CharClass::new(vec![(0x20, 0x21), (0x23, 0x5B), (0x5D, 0x10FFFF)], false));
    let name = grammar.fresh_name("json_bounded_string");
    Ok(grammar.add_rule(
        name,
        RuleBody::single(vec![
            Element::terminal("\""),
            char_class.repeat(min_length, max_length),
            Element::terminal("\""),
        ]),
    ))
}

fn validate_i64_bound(value: &Value, field: &str) -> Result<i64, GrammarError> {
    let n = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| GrammarError::validation(format!("'{field}' must be an integer")))?;
    let exact = value.as_f64().unwrap_or(n as f64);
    if exact < MIN_I64 as f64 || exact > MAX_I64 as f64 {
        return Err(GrammarError::OverflowError(format!(
            "'{field}' bound {exact} exceeds the signed 64-bit integer range"
        )));
    }
    Ok(n)
}

/// Validates `minimum`/`maximum`/`exclusiveMinimum`/`exclusiveMaximum` fit
/// the signed 64-bit range (raising [GrammarError::OverflowError] per spec
/// §7/§8.3 otherwise) but does not yet constrain the grammar to the exact
/// numeric range — see the "Open Question decisions" note in DESIGN.md.
fn lower_integer(obj: &serde_json::Map<String, Value>, grammar: &mut Grammar) -> Result<RuleId, GrammarError> {
    for field in ["minimum", "maximum", "exclusiveMinimum", "exclusiveMaximum"] {
        if let Some(v) = obj.get(field) {
            validate_i64_bound(v, field)?;
        }
    }
    let digit = Element::CharClass(CharClass::new(vec![(b'0' as u32, b'9' as u32)], false));
    let name = grammar.fresh_name("json_integer");
    Ok(grammar.add_rule(
        name,
        RuleBody::single(vec![Element::terminal("-").opt(), digit.plus()]),
    ))
}

fn lower_number(obj: &serde_json::Map<String, Value>, grammar: &mut Grammar) -> Result<RuleId, GrammarError> {
    if let Some(v) = obj.get("minimum") {
        let _ = validate_i64_bound(v, "minimum")?;
    }
    if let Some(v) = obj.get("maximum") {
        let _ = validate_i64_bound(v, "maximum")?;
    }
    Ok(number_rule(grammar))
}

/// `style="qwen_xml"` for an object schema: one `<parameter=NAME>content</parameter>`
/// block per declared property (spec §4 implementation notes; docstring
/// example `<parameter=name>Bob</parameter><parameter=age>100</parameter>`
/// in the grounding source).
fn lower_qwen_xml_object(
    obj: &serde_json::Map<String, Value>,
    ctx: &JsonSchemaContext,
    grammar: &mut Grammar,
) -> Result<RuleId, GrammarError> {
    let properties = obj.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = properties else {
        return Ok(any_json_value(grammar));
    };

    let mut elements = Vec::new();
    for (name, prop_schema) in properties {
        let content_id = lower(prop_schema, Style::Json, ctx, grammar)?;
        let lookahead = Element::Lookahead(vec![
            Element::CharClass(CharClass::new(vec![(b' ' as u32, b' ' as u32), (b'\n' as u32, b'\n' as u32), (b'\t' as u32, b'\t' as u32)], false)).star(),
            Element::terminal("</parameter>"),
        ]);
        let seq = vec![
            Element::terminal(format!("<parameter={name}>")),
            Element::nt(content_id),
            lookahead,
            Element::terminal("</parameter>"),
        ];
        let tag_name = grammar.fresh_name("qwen_xml_parameter");
        let tag_id = grammar.add_rule(tag_name, RuleBody::single(seq));
        let element = if required.contains(&name.as_str()) {
            Element::nt(tag_id)
        } else {
            Element::nt(tag_id).opt()
        };
        elements.push(element);
    }
    let name = grammar.fresh_name("qwen_xml_parameters");
    Ok(grammar.add_rule(name, RuleBody::single(elements)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lowers_simple_object_schema() {
        let schema = json!({
            "type": "object",
            "properties": { "name": {"type": "string"}, "age": {"type": "integer"} },
            "required": ["name"],
        });
        let mut grammar = Grammar::new();
        let ctx = JsonSchemaContext::default();
        let id = json_schema_to_ebnf(&schema, Style::Json, &ctx, &mut grammar).unwrap();
        grammar.set_root(id);
        assert!(!grammar.rule(id).body.alternatives.is_empty());
    }

    #[test]
    fn integer_bound_within_range_compiles() {
        let schema = json!({"type": "integer", "minimum": i64::MIN, "maximum": i64::MAX});
        let mut grammar = Grammar::new();
        let ctx = JsonSchemaContext::default();
        assert!(json_schema_to_ebnf(&schema, Style::Json, &ctx, &mut grammar).is_ok());
    }

    #[test]
    fn integer_bound_beyond_i64_overflows() {
        let schema = json!({"type": "integer", "minimum": -9223372036854775809.0_f64});
        let mut grammar = Grammar::new();
        let ctx = JsonSchemaContext::default();
        let err = json_schema_to_ebnf(&schema, Style::Json, &ctx, &mut grammar).unwrap_err();
        match err {
            GrammarError::OverflowError(_) => {}
            other => panic!("expected OverflowError, got {other}"),
        }
    }

    #[test]
    fn bool_false_schema_is_unsatisfiable() {
        let mut grammar = Grammar::new();
        let ctx = JsonSchemaContext::default();
        let id = json_schema_to_ebnf(&Value::Bool(false), Style::Json, &ctx, &mut grammar).unwrap();
        assert!(grammar.rule(id).body.alternatives.is_empty());
    }

    #[test]
    fn qwen_xml_style_emits_parameter_tags() {
        let schema = json!({
            "type": "object",
            "properties": { "name": {"type": "string"} },
            "required": ["name"],
        });
        let mut grammar = Grammar::new();
        let ctx = JsonSchemaContext::default();
        let id = json_schema_to_ebnf(&schema, Style::QwenXml, &ctx, &mut grammar).unwrap();
        grammar.set_root(id);
        let printed = grammar.to_string();
        assert!(printed.contains("<parameter=name>"));
    }
}
