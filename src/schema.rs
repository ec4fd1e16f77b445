//! Schema generation and validation for flow requests and model replies.
//!
//! Every wire type derives [`JsonSchema`]; field constraints live in
//! `#[schemars(...)]` attributes and are enforced with `jsonschema`. Rules a JSON
//! Schema cannot express are added through [`StructuredValidator`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use schemars::{generate::SchemaSettings, JsonSchema};
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Serialize,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use crate::error::{truncate_for_display, FieldIssue, PipelineError, Result};

/// Schema keywords that carry no validation meaning and are stripped before the
/// schema is handed to the backend.
const META_KEYWORDS: &[&str] = &["$schema", "title", "examples", "readOnly", "writeOnly"];

/// Keywords whose object values map names to subschemas rather than being schemas.
const SCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];

/// Compiled validators, one per wire type.
static VALIDATORS: OnceLock<Mutex<HashMap<&'static str, Arc<jsonschema::Validator>>>> =
    OnceLock::new();

/// Semantic checks that a JSON Schema cannot express (cross-field rules, decodability).
///
/// Issues use JSON pointers into the serialized wire value.
pub trait StructuredValidator {
    fn validate_fields(&self) -> Vec<FieldIssue> {
        Vec::new()
    }
}

/// Full JSON Schema for `T` with every subschema inlined.
pub fn validation_schema<T: JsonSchema>() -> Value {
    SchemaSettings::draft2020_12()
        .with(|s| s.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<T>()
        .to_value()
}

/// Schema sent to the backend as the reply contract.
pub fn model_schema<T: JsonSchema>() -> Value {
    let mut schema = validation_schema::<T>();
    clean_schema_for_backend(&mut schema);
    schema
}

/// Stable SHA-256 hex digest of [`model_schema`].
pub fn schema_hash<T: JsonSchema>() -> String {
    let schema = model_schema::<T>();
    let mut hasher = Sha256::new();
    hasher.update(schema.to_string().as_bytes());
    hex_digest(hasher)
}

pub(crate) fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Remove meta keywords and `x-*` extensions at every schema level.
///
/// Property names are left alone, so a field literally called `title` survives.
pub fn clean_schema_for_backend(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.retain(|key, _| !META_KEYWORDS.contains(&key.as_str()) && !key.starts_with("x-"));
            for (key, value) in map.iter_mut() {
                if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) {
                    if let Value::Object(children) = value {
                        for child in children.values_mut() {
                            clean_schema_for_backend(child);
                        }
                    }
                } else {
                    clean_schema_for_backend(value);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(clean_schema_for_backend),
        _ => {}
    }
}

/// Validator for `T`'s schema, compiled on first use and shared afterwards.
pub fn compile_validator<T: JsonSchema>() -> Result<Arc<jsonschema::Validator>> {
    let type_name = std::any::type_name::<T>();
    let cache = VALIDATORS.get_or_init(|| Mutex::new(HashMap::new()));
    let poisoned = |_| PipelineError::Schema("validator cache mutex poisoned".to_string());

    if let Some(validator) = cache.lock().map_err(poisoned)?.get(type_name) {
        return Ok(Arc::clone(validator));
    }

    let schema = validation_schema::<T>();
    let validator = jsonschema::validator_for(&schema).map_err(|e| {
        PipelineError::Schema(format!("schema for {type_name} does not compile: {e}"))
    })?;
    debug!(type_name, "Compiled schema validator");

    let mut cache = cache.lock().map_err(poisoned)?;
    Ok(Arc::clone(
        cache.entry(type_name).or_insert_with(|| Arc::new(validator)),
    ))
}

/// Validate a JSON value against `T`'s schema, one issue per violation.
pub fn schema_issues<T: JsonSchema>(value: &Value) -> Result<Vec<FieldIssue>> {
    let validator = compile_validator::<T>()?;
    let issues = validator
        .iter_errors(value)
        .map(|err| FieldIssue::new(err.instance_path().to_string(), violation_reason(&err)))
        .collect();
    Ok(issues)
}

/// The violation message with the offending value replaced by `value`.
///
/// Messages lead with the rejected instance, which for a photo is the whole
/// base64 payload.
fn violation_reason(err: &jsonschema::ValidationError<'_>) -> String {
    let message = err.to_string();
    let instance = err.instance().to_string();
    let reason = match message.strip_prefix(instance.as_str()) {
        Some(rest) => format!("value{rest}"),
        None => message,
    };
    truncate_for_display(&reason, 200)
}

/// Validate an outbound request and return its wire form.
///
/// Fails with `InvalidRequestShape` before anything is sent.
pub fn check_request<T>(flow: &'static str, request: &T) -> Result<Value>
where
    T: Serialize + JsonSchema + StructuredValidator,
{
    let value = serde_json::to_value(request)?;
    let mut issues = schema_issues::<T>(&value)?;
    if issues.is_empty() {
        issues = request.validate_fields();
    }

    if issues.is_empty() {
        debug!(flow, "Request passed schema validation");
        Ok(value)
    } else {
        warn!(flow, issue_count = issues.len(), "Request rejected before sending");
        Err(PipelineError::InvalidRequestShape { flow, issues })
    }
}

/// Coerce raw model text into `T`, or fail with `InvalidResponseShape`.
///
/// Markdown fences and prose around the JSON document are dropped; no other
/// coercion happens. The raw text is never returned to the caller.
pub fn coerce_response<T>(flow: &'static str, raw: &str) -> Result<T>
where
    T: DeserializeOwned + JsonSchema + StructuredValidator,
{
    trace!(flow, raw_response = %raw, "Raw model text");
    let reject = |issues: Vec<FieldIssue>| {
        warn!(flow, issue_count = issues.len(), "Model reply violates output schema");
        PipelineError::InvalidResponseShape { flow, issues }
    };

    if raw.trim().is_empty() {
        return Err(reject(vec![FieldIssue::root("model returned an empty reply")]));
    }

    let cleaned = clean_json_text(raw);
    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(e) => return Err(reject(vec![FieldIssue::root(format!("reply is not valid JSON: {e}"))])),
    };

    let issues = schema_issues::<T>(&value)?;
    if !issues.is_empty() {
        return Err(reject(issues));
    }

    let parsed: T = serde_json::from_value(value)
        .map_err(|e| reject(vec![FieldIssue::root(format!("reply does not deserialize: {e}"))]))?;

    let issues = parsed.validate_fields();
    if !issues.is_empty() {
        return Err(reject(issues));
    }
    Ok(parsed)
}

/// Pull the JSON document out of a model reply.
///
/// A reply that already parses is kept whole. Otherwise the first fenced block
/// wins if its body parses, and the outermost bracketed span is the fallback.
pub fn clean_json_text(text: &str) -> String {
    let text = text.trim();
    if parses_as_json(text) {
        return text.to_string();
    }
    if let Some(body) = fenced_body(text).filter(|body| parses_as_json(body)) {
        return body.to_string();
    }
    bracketed_span(text).unwrap_or(text).to_string()
}

fn parses_as_json(text: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(text).is_ok()
}

/// Body of the first Markdown fence, minus the language tag line.
fn fenced_body(text: &str) -> Option<&str> {
    let (_, opened) = text.split_once("```")?;
    let (_, body) = opened.split_once('\n')?;
    let body = body.split_once("```").map_or(body, |(inner, _)| inner);
    Some(body.trim())
}

fn bracketed_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    (start <= end).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Portion {
        #[schemars(length(min = 1))]
        title: String,
        #[schemars(range(min = 0))]
        grams: f64,
        #[schemars(extend("exclusiveMinimum" = 0))]
        servings: f64,
    }

    impl StructuredValidator for Portion {
        fn validate_fields(&self) -> Vec<FieldIssue> {
            if self.title.trim().is_empty() {
                vec![FieldIssue::new("/title", "must not be blank")]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn clean_schema_strips_meta_but_keeps_property_names() {
        let mut schema = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": "Portion",
            "type": "object",
            "x-debug": true,
            "properties": {
                "title": {"type": "string", "examples": ["rice"], "readOnly": true},
                "grams": {"type": "number", "x-extra": 1}
            }
        });

        clean_schema_for_backend(&mut schema);

        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert!(schema.get("x-debug").is_none());
        let props = &schema["properties"];
        assert_eq!(props["title"], json!({"type": "string"}));
        assert_eq!(props["grams"], json!({"type": "number"}));
    }

    #[test]
    fn attribute_constraints_reach_the_schema() {
        let schema = validation_schema::<Portion>();
        let props = &schema["properties"];
        assert_eq!(props["title"]["minLength"], json!(1));
        assert_eq!(props["grams"]["minimum"], json!(0));
        assert_eq!(props["servings"]["exclusiveMinimum"], json!(0));
    }

    #[test]
    fn schema_hash_is_stable() {
        assert_eq!(schema_hash::<Portion>(), schema_hash::<Portion>());
        assert_eq!(schema_hash::<Portion>().len(), 64);
    }

    #[test]
    fn schema_issues_report_json_pointers() {
        let issues =
            schema_issues::<Portion>(&json!({"title": "", "grams": -1, "servings": 0})).unwrap();
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"/title"));
        assert!(paths.contains(&"/grams"));
        assert!(paths.contains(&"/servings"));
        let title = issues.iter().find(|i| i.path == "/title").unwrap();
        assert!(title.reason.starts_with("value "), "{}", title.reason);
    }

    #[test]
    fn validators_are_compiled_once_per_type() {
        let first = compile_validator::<Portion>().unwrap();
        let second = compile_validator::<Portion>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = compile_validator::<crate::flows::identify::IdentifiedFoodItems>().unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn check_request_runs_semantic_rules() {
        let bad = Portion {
            title: "  ".into(),
            grams: 10.0,
            servings: 1.0,
        };
        let err = check_request("portion", &bad).unwrap_err();
        assert_eq!(err.field_issues(), &[FieldIssue::new("/title", "must not be blank")]);

        let good = Portion {
            title: "rice".into(),
            grams: 10.0,
            servings: 1.0,
        };
        let value = check_request("portion", &good).unwrap();
        assert_eq!(value["title"], "rice");
    }

    #[test]
    fn non_finite_numbers_fail_request_validation() {
        let bad = Portion {
            title: "rice".into(),
            grams: f64::NAN,
            servings: 1.0,
        };
        let err = check_request("portion", &bad).unwrap_err();
        assert_eq!(err.field_issues()[0].path, "/grams");
    }

    #[test]
    fn coerce_response_accepts_fenced_json() {
        let raw = "Here you go:\n```json\n{\"title\": \"rice\", \"grams\": 150, \"servings\": 1}\n```";
        let parsed: Portion = coerce_response("portion", raw).unwrap();
        assert_eq!(parsed.grams, 150.0);
    }

    #[test]
    fn coerce_response_rejects_near_misses() {
        let cases = [
            "",
            "not json at all",
            r#"{"title": "rice", "grams": "150", "servings": 1}"#,
            r#"{"title": "rice", "servings": 1}"#,
            r#"{"title": "   ", "grams": 1, "servings": 1}"#,
        ];
        for raw in cases {
            let err = coerce_response::<Portion>("portion", raw).unwrap_err();
            assert!(
                matches!(err, PipelineError::InvalidResponseShape { .. }),
                "expected shape error for {raw:?}, got {err:?}"
            );
            assert!(!err.field_issues().is_empty());
        }
    }

    #[test]
    fn clean_json_text_extracts_document() {
        assert_eq!(clean_json_text("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(clean_json_text("Sure! {\"a\":1} Enjoy."), "{\"a\":1}");
        assert_eq!(clean_json_text("  [1,2] "), "[1,2]");
    }

    #[test]
    fn clean_json_text_prefers_first_parsable_fence() {
        let two_blocks = "```json\n{\"a\":1}\n```\nOr as a list:\n```json\n[1]\n```";
        assert_eq!(clean_json_text(two_blocks), "{\"a\":1}");

        let fence_in_string = r#"{"note": "wrap it in ``` fences"}"#;
        assert_eq!(clean_json_text(fence_in_string), fence_in_string);

        let broken_fence = "```json\nnot json\n```\n{\"a\":1}";
        assert_eq!(clean_json_text(broken_fence), "{\"a\":1}");
    }
}
