//! End-to-end scenarios over the public compile/match API, one per grammar
//! shape the rest of the test suite covers only in isolation: EBNF
//! alternation/repetition, a tag with multiple terminators, triggered tool
//! calls with per-tag JSON schemas, Qwen XML parameters, and an
//! integer-bounded JSON schema driven through token bitmask emission.
use std::sync::Arc;
use structural_grammar::{compile_ebnf, compile_structural_tag, GrammarMatcher, MatcherState};
use structural_grammar::vocab::{TokenKind, TokenizerInfo};
use structural_grammar::bitmask::TokenBitmask;

fn accepts_ebnf(grammar: &str, input: &[u8]) -> bool {
    let compiled = compile_ebnf(grammar).unwrap();
    let mut state = MatcherState::new(compiled.grammar_arc());
    state.advance_string(input) && state.can_accept()
}

fn accepts_structural_tag(json: &str, input: &[u8]) -> bool {
    let compiled = compile_structural_tag(json).unwrap();
    let mut state = MatcherState::new(compiled.grammar_arc());
    state.advance_string(input) && state.can_accept()
}

#[test]
fn alternation_and_concatenation_of_rules() {
    let grammar = "root ::= rule1 rule2\nrule1 ::= (rule2|rule3) \"a\"\nrule2 ::= \"b\"\nrule3 ::= \"c\"";
    assert!(accepts_ebnf(grammar, b"bab"));
    assert!(!accepts_ebnf(grammar, b"abb"));
}

#[test]
fn bounded_repetition_of_an_alternation() {
    let grammar = "root ::= rule{2,3}\nrule ::= \"a\"|[bc]{4,}";
    assert!(accepts_ebnf(grammar, b"aaa"));
    assert!(!accepts_ebnf(grammar, b"aaaa"));
    assert!(accepts_ebnf(grammar, b"bcbcbcbcbc"));
}

#[test]
fn tag_with_multiple_terminators() {
    let json = r#"{
        "type": "structural_tag",
        "format": {
            "type": "tag",
            "begin": "BEG",
            "content": {"type": "any_text", "excludes": []},
            "end": ["END1", "END2"]
        }
    }"#;
    assert!(accepts_structural_tag(json, b"BEGhelloEND1"));
    assert!(!accepts_structural_tag(json, b"BEGhelloEND3"));
}

#[test]
fn triggered_tool_calls_require_every_property_their_schema_declares() {
    let json = r#"{
        "type": "structural_tag",
        "format": {
            "type": "triggered_tags",
            "triggers": ["<function=f", "<function=g"],
            "tags": [
                {
                    "begin": "<function=f1>",
                    "content": {
                        "type": "json_schema",
                        "json_schema": {
                            "type": "object",
                            "properties": {"arg1": {"type": "string"}, "arg2": {"type": "integer"}},
                            "required": ["arg1", "arg2"]
                        }
                    },
                    "end": "</function>"
                },
                {
                    "begin": "<function=f2>",
                    "content": {
                        "type": "json_schema",
                        "json_schema": {"type": "object", "properties": {"arg1": {"type": "string"}}, "required": ["arg1"]}
                    },
                    "end": "</function>"
                },
                {
                    "begin": "<function=g>",
                    "content": {"type": "json_schema", "json_schema": {"type": "object", "properties": {}}},
                    "end": "</function>"
                }
            ]
        }
    }"#;
    assert!(accepts_structural_tag(json, br#"<function=f1>{"arg1":"abc","arg2":1}</function>"#));
    assert!(!accepts_structural_tag(json, br#"<function=f1>{"arg1":"abc"}</function>"#));
}

#[test]
fn qwen_xml_parameters_are_concatenated_with_no_separator() {
    let json = r#"{
        "type": "structural_tag",
        "format": {
            "type": "qwen_xml_parameter",
            "json_schema": {
                "type": "object",
                "properties": {"name": {"type": "string"}, "age": {"type": "integer"}},
                "required": ["name", "age"]
            }
        }
    }"#;
    assert!(accepts_structural_tag(json, b"<parameter=name>Bob</parameter><parameter=age>100</parameter>"));
    assert!(!accepts_structural_tag(json, b"<parameter=name>Bob</parameter> <parameter=age>100</parameter>"));
}

fn digit_tokenizer() -> Arc<TokenizerInfo> {
    let mut vocab: Vec<(u32, TokenKind)> = (0u8..=9)
        .map(|d| ((d as u32), TokenKind::Normal(vec![b'0' + d])))
        .collect();
    vocab.push((10, TokenKind::Special));
    Arc::new(TokenizerInfo::from_huggingface_like(vocab, Some(vec![10]), false))
}

#[test]
fn integer_schema_accepts_an_in_range_value_and_allows_eos_once_complete() {
    let schema = serde_json::json!({"type": "integer", "minimum": 0, "maximum": 20_000_000_000i64});
    let ctx = structural_grammar::schema::JsonSchemaContext::default();
    let compiled = structural_grammar::compile_json_schema(&schema, structural_grammar::schema::Style::Json, &ctx).unwrap();
    let tokenizer = digit_tokenizer();
    let mut matcher = GrammarMatcher::new(&compiled, tokenizer.clone(), None, false);

    for digit in "20000000000".bytes() {
        let token_id = (digit - b'0') as i32;
        assert!(matcher.accept_token(token_id), "digit {} rejected", digit as char);
    }

    let mut mask = TokenBitmask::new_all_true(1, tokenizer.vocab_size());
    matcher.fill_next_token_bitmask(&mut mask, 0);
    assert!(mask.accepts(0, 10), "eos must be acceptable once the integer is complete");
}
