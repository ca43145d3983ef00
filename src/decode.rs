//! Raw JSON to validated records.
//!
//! Decoding happens in two steps. [`validate`] walks the raw value against a
//! [`Schema`] and builds a normalized copy that holds exactly the declared
//! fields, with absent optional fields replaced by their defaults. Serde then
//! turns the normalized copy into the typed record.
//!
//! Required fields are strict: a missing one fails with a [`KeyDiff`] of the
//! provided and expected keys. Optional fields are lenient: a value of the
//! wrong type, nested records included, is reported as a [`ShapeMismatch`]
//! and replaced by the default. List fields are the exception: anything but
//! a list or `null` fails the decode. Fields that are known to
//! change type between server versions are declared as [`Kind::Any`] and kept
//! verbatim.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::schema::{Field, Kind, Record, Schema};

/// Keys a raw object carried compared with the keys a schema declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDiff {
    pub provided: BTreeSet<String>,
    pub expected: BTreeSet<String>,
    pub required: BTreeSet<String>,
}

impl KeyDiff {
    fn new(object: &Map<String, Value>, schema: &Schema) -> Self {
        Self {
            provided: object.keys().cloned().collect(),
            expected: schema.keys().into_iter().map(String::from).collect(),
            required: schema.required_keys().into_iter().map(String::from).collect(),
        }
    }

    /// Required keys the payload did not carry.
    pub fn missing(&self) -> Vec<&str> {
        self.required
            .difference(&self.provided)
            .map(String::as_str)
            .collect()
    }

    /// Declared keys the payload did not carry, required or not.
    pub fn absent(&self) -> Vec<&str> {
        self.expected
            .difference(&self.provided)
            .map(String::as_str)
            .collect()
    }

    /// Keys the payload carried that the schema does not declare.
    pub fn unexpected(&self) -> Vec<&str> {
        self.provided
            .difference(&self.expected)
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Display for KeyDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "provided data has keys:")?;
        for key in &self.provided {
            writeln!(f, "  {key}")?;
        }
        writeln!(f, "schema expects:")?;
        for key in &self.expected {
            let marker = if self.required.contains(key) { "" } else { " (optional)" };
            writeln!(f, "  {key}{marker}")?;
        }
        writeln!(f, "expected but not provided:")?;
        for key in self.absent() {
            writeln!(f, "    {key}")?;
        }
        write!(f, "provided but not expected:")?;
        for key in self.unexpected() {
            write!(f, "\n    {key}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{path}: {schema} is missing required fields: {}\n{diff}", .diff.missing().join(", "))]
    MissingFields {
        schema: &'static str,
        path: String,
        diff: KeyDiff,
    },

    #[error("{path}: {schema} expects an object, got {found}")]
    NotAnObject {
        schema: &'static str,
        path: String,
        found: &'static str,
    },

    #[error("{path}: expected a list of {schema}, got {found}")]
    NotAList {
        schema: &'static str,
        path: String,
        found: &'static str,
    },

    #[error("{path}: required field of {schema} must be {expected}, got {found}")]
    TypeMismatch {
        schema: &'static str,
        path: String,
        expected: String,
        found: &'static str,
    },

    #[error("{path}: {source}")]
    Deserialize {
        path: String,
        source: serde_json::Error,
    },
}

/// An optional field whose runtime value did not match its declared kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub schema: &'static str,
    pub path: String,
    pub expected: String,
    pub found: &'static str,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: optional field of {} should be {}, but is {}",
            self.path, self.schema, self.expected, self.found
        )
    }
}

/// Result of [`validate`]: the normalized value plus every lenient mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub value: Value,
    pub mismatches: Vec<ShapeMismatch>,
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Validates `raw` against `schema` and returns the normalized copy.
///
/// Pure: the input is never modified and the result only depends on `raw`
/// and `schema`.
pub fn validate(schema: &'static Schema, raw: &Value) -> Result<Validated, DecodeError> {
    let mut mismatches = Vec::new();
    let value = normalize_record(schema, raw, "$", &mut mismatches)?;
    Ok(Validated { value, mismatches })
}

fn normalize_record(
    schema: &'static Schema,
    raw: &Value,
    path: &str,
    mismatches: &mut Vec<ShapeMismatch>,
) -> Result<Value, DecodeError> {
    let object = raw.as_object().ok_or_else(|| DecodeError::NotAnObject {
        schema: schema.name(),
        path: path.to_string(),
        found: json_type(raw),
    })?;

    if schema
        .fields()
        .iter()
        .any(|field| field.required && !object.contains_key(field.key))
    {
        return Err(DecodeError::MissingFields {
            schema: schema.name(),
            path: path.to_string(),
            diff: KeyDiff::new(object, schema),
        });
    }

    let mut normalized = Map::new();
    for field in schema.fields() {
        let value = match object.get(field.key) {
            Some(value) => {
                let field_path = format!("{path}.{}", field.key);
                normalize_field(schema, field, value, &field_path, mismatches)?
            }
            None => field.default_value(),
        };
        normalized.insert(field.key.to_string(), value);
    }
    Ok(Value::Object(normalized))
}

fn normalize_field(
    schema: &'static Schema,
    field: &Field,
    value: &Value,
    path: &str,
    mismatches: &mut Vec<ShapeMismatch>,
) -> Result<Value, DecodeError> {
    match (field.kind, value) {
        (Kind::List(_), Value::Null) => Ok(field.default_value()),
        (Kind::List(nested), Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| normalize_record(nested, item, &format!("{path}[{i}]"), mismatches))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (Kind::List(nested), other) => Err(DecodeError::NotAList {
            schema: nested.name(),
            path: path.to_string(),
            found: json_type(other),
        }),
        (_, Value::Null) if !field.required => Ok(Value::Null),
        (kind, _) if !kind.accepts(value) && !field.required => {
            mismatches.push(ShapeMismatch {
                schema: schema.name(),
                path: path.to_string(),
                expected: kind.to_string(),
                found: json_type(value),
            });
            Ok(field.default_value())
        }
        (Kind::Record(nested), _) => normalize_record(nested, value, path, mismatches),
        (kind, _) if kind.accepts(value) => Ok(value.clone()),
        (kind, _) => Err(DecodeError::TypeMismatch {
            schema: schema.name(),
            path: path.to_string(),
            expected: kind.to_string(),
            found: json_type(value),
        }),
    }
}

/// Turns raw JSON into records.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    shape_check: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self { shape_check: true }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled (the default), optional fields with unexpected types are
    /// logged as warnings. They are replaced by their defaults either way.
    pub fn shape_check(mut self, enabled: bool) -> Self {
        self.shape_check = enabled;
        self
    }

    pub fn decode_one<T: Record>(&self, raw: &Value) -> Result<T, DecodeError> {
        self.decode_at(raw, "$")
    }

    /// Decodes a list of records. `None` and `null` mean "no items" and
    /// decode to an empty list. One malformed element fails the whole list.
    pub fn decode_many<T: Record>(&self, raw: Option<&Value>) -> Result<Vec<T>, DecodeError> {
        match raw {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.decode_at(item, &format!("$[{i}]")))
                .collect(),
            Some(other) => Err(DecodeError::NotAList {
                schema: T::schema().name(),
                path: "$".to_string(),
                found: json_type(other),
            }),
        }
    }

    pub(crate) fn decode_at<T: Record>(&self, raw: &Value, path: &str) -> Result<T, DecodeError> {
        let mut mismatches = Vec::new();
        let value = normalize_record(T::schema(), raw, path, &mut mismatches)?;
        if self.shape_check {
            for mismatch in &mismatches {
                warn!("{mismatch}");
            }
        }
        serde_json::from_value(value).map_err(|source| DecodeError::Deserialize {
            path: path.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::record;
    use serde_json::json;

    record! {
        struct File: FILE = "test.file" {
            optional filename: Option<String> => Kind::Str,
            optional filesize: Option<i64> => Kind::Int,
        }
    }

    record! {
        struct Area: AREA = "test.area" {
            required area: String => Kind::Str,
            optional files: Vec<File> => Kind::List(&FILE),
        }
    }

    record! {
        struct Grader: GRADER = "test.grader" {
            required id: i64 => Kind::Int,
            optional name: Option<String> => Kind::Str,
        }
    }

    record! {
        struct Graded: GRADED = "test.graded" {
            required id: i64 => Kind::Int,
            optional grader: Option<Grader> => Kind::Record(&GRADER),
            optional attempts: Option<i64> => Kind::Int,
            optional files: Vec<File> => Kind::List(&FILE),
        }
    }

    record! {
        struct Owned: OWNED = "test.owned" {
            required id: i64 => Kind::Int,
            required owner: Grader => Kind::Record(&GRADER),
        }
    }

    record! {
        struct Sub: SUB = "test.sub" {
            required id: i64 => Kind::Int,
            required status: String => Kind::Str,
            required areas: Vec<Area> => Kind::List(&AREA),
            optional latest: Option<i64> => Kind::Int,
            optional score: Option<f64> => Kind::Float,
        }
    }

    #[test]
    fn test_decode_nested_and_drop_extra_keys() {
        let raw = json!({
            "id": 7,
            "status": "submitted",
            "extra": "dropped",
            "areas": [{"area": "submission_files", "files": [{"filename": "a.pdf", "filesize": 12, "mimetype": "x"}]}]
        });
        let sub: Sub = Decoder::new().decode_one(&raw).unwrap();
        assert_eq!(sub.id, 7);
        assert_eq!(sub.latest, None);
        assert_eq!(sub.areas[0].files[0].filename.as_deref(), Some("a.pdf"));

        let back = serde_json::to_value(&sub).unwrap();
        assert!(back.get("extra").is_none());
        assert_eq!(back["areas"][0]["files"][0].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_required_field_reports_key_diff() {
        let raw = json!({"id": 1, "state": "new", "areas": []});
        let err = Decoder::new().decode_one::<Sub>(&raw).unwrap_err();
        match &err {
            DecodeError::MissingFields { schema, path, diff } => {
                assert_eq!(*schema, "test.sub");
                assert_eq!(path, "$");
                assert_eq!(diff.missing(), vec!["status"]);
                assert_eq!(diff.unexpected(), vec!["state"]);
                assert_eq!(diff.absent(), vec!["latest", "score", "status"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("missing required fields: status"));
        assert!(message.contains("provided but not expected:\n    state"));
    }

    #[test]
    fn test_missing_field_in_nested_record_has_path() {
        let raw = json!({"id": 1, "status": "new", "areas": [{"area": "a"}, {"files": []}]});
        let err = Decoder::new().decode_one::<Sub>(&raw).unwrap_err();
        match err {
            DecodeError::MissingFields { schema, path, .. } => {
                assert_eq!(schema, "test.area");
                assert_eq!(path, "$.areas[1]");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_null_list_decodes_empty() {
        let raw = json!({"id": 1, "status": "new", "areas": null});
        let sub: Sub = Decoder::new().decode_one(&raw).unwrap();
        assert!(sub.areas.is_empty());
    }

    #[test]
    fn test_non_list_value_for_list_field_fails() {
        let raw = json!({"id": 1, "status": "new", "areas": {"area": "x"}});
        let err = Decoder::new().decode_one::<Sub>(&raw).unwrap_err();
        assert!(matches!(err, DecodeError::NotAList { schema: "test.area", found: "object", .. }));
    }

    #[test]
    fn test_optional_type_mismatch_is_lenient() {
        let raw = json!({"id": 1, "status": "new", "areas": [], "latest": "yes", "score": 3});
        let validated = validate(&SUB, &raw).unwrap();
        assert_eq!(validated.mismatches.len(), 1);
        assert_eq!(validated.mismatches[0].path, "$.latest");
        assert_eq!(validated.mismatches[0].found, "string");
        assert_eq!(validated.value["latest"], Value::Null);

        let sub: Sub = Decoder::new().shape_check(false).decode_one(&raw).unwrap();
        assert_eq!(sub.latest, None);
        assert_eq!(sub.score, Some(3.0));
    }

    #[test]
    fn test_required_type_mismatch_is_fatal() {
        let raw = json!({"id": "1", "status": "new", "areas": []});
        let err = Decoder::new().decode_one::<Sub>(&raw).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { found: "string", .. }));
    }

    #[test]
    fn test_decode_many() {
        let decoder = Decoder::new();
        assert!(decoder.decode_many::<Area>(None).unwrap().is_empty());
        assert!(decoder.decode_many::<Area>(Some(&Value::Null)).unwrap().is_empty());

        let areas: Vec<Area> = decoder
            .decode_many(Some(&json!([{"area": "b"}, {"area": "a"}])))
            .unwrap();
        assert_eq!(areas[0].area, "b");
        assert_eq!(areas[1].area, "a");

        let err = decoder.decode_many::<Area>(Some(&json!({"area": "a"}))).unwrap_err();
        assert!(matches!(err, DecodeError::NotAList { .. }));

        let err = decoder
            .decode_many::<Area>(Some(&json!([{"area": "a"}, {}])))
            .unwrap_err();
        assert!(matches!(err, DecodeError::MissingFields { ref path, .. } if path == "$[1]"));
    }

    #[test]
    fn test_validate_does_not_touch_input() {
        let raw = json!({"id": 1, "status": "new", "areas": null, "x": 1});
        let copy = raw.clone();
        let first = validate(&SUB, &raw).unwrap();
        let second = validate(&SUB, &raw).unwrap();
        assert_eq!(raw, copy);
        assert_eq!(first, second);
    }

    #[test]
    fn test_optional_record_present_absent_and_null() {
        let decoder = Decoder::new();
        let graded: Graded = decoder
            .decode_one(&json!({"id": 1, "grader": {"id": 2, "name": "Grace"}}))
            .unwrap();
        assert_eq!(
            graded.grader,
            Some(Grader {
                id: 2,
                name: Some("Grace".to_string())
            })
        );

        let graded: Graded = decoder.decode_one(&json!({"id": 1})).unwrap();
        assert_eq!(graded.grader, None);

        let graded: Graded = decoder.decode_one(&json!({"id": 1, "grader": null})).unwrap();
        assert_eq!(graded.grader, None);
    }

    #[test]
    fn test_optional_record_of_wrong_type_is_lenient() {
        let raw = json!({"id": 1, "grader": "oops"});
        let validated = validate(&GRADED, &raw).unwrap();
        assert_eq!(validated.mismatches.len(), 1);
        assert_eq!(validated.mismatches[0].path, "$.grader");
        assert_eq!(validated.mismatches[0].expected, "record test.grader");
        assert_eq!(validated.mismatches[0].found, "string");
        assert_eq!(validated.value["grader"], Value::Null);

        let graded: Graded = Decoder::new().decode_one(&raw).unwrap();
        assert_eq!(graded.grader, None);
    }

    #[test]
    fn test_optional_list_of_wrong_type_is_fatal() {
        let err = Decoder::new()
            .decode_one::<Graded>(&json!({"id": 1, "files": 3}))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::NotAList { schema: "test.file", ref path, found: "int" } if path == "$.files"
        ));
    }

    #[test]
    fn test_missing_field_in_optional_record_has_path() {
        let raw = json!({"id": 1, "grader": {"name": "Grace"}});
        let err = Decoder::new().decode_one::<Graded>(&raw).unwrap_err();
        match &err {
            DecodeError::MissingFields { schema, path, diff } => {
                assert_eq!(*schema, "test.grader");
                assert_eq!(path, "$.grader");
                assert_eq!(diff.missing(), vec!["id"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_required_record_of_wrong_type_is_fatal() {
        let err = Decoder::new()
            .decode_one::<Owned>(&json!({"id": 1, "owner": "oops"}))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::NotAnObject { schema: "test.grader", ref path, found: "string" } if path == "$.owner"
        ));
    }

    #[test]
    fn test_int_out_of_range() {
        let raw = json!({"id": 1, "attempts": u64::MAX});
        let validated = validate(&GRADED, &raw).unwrap();
        assert_eq!(validated.mismatches.len(), 1);
        assert_eq!(validated.mismatches[0].path, "$.attempts");
        let graded: Graded = Decoder::new().decode_one(&raw).unwrap();
        assert_eq!(graded.attempts, None);

        let err = Decoder::new()
            .decode_one::<Graded>(&json!({"id": u64::MAX}))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TypeMismatch { ref path, found: "int", .. } if path == "$.id"
        ));
    }
}
