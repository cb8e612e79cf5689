//! Structural matcher for contract comparison.
//!
//! A [`Matcher`] tree describes the shape a consumer requires from a value.
//! Comparison is a single recursive function over a closed tagged union: new
//! matcher kinds extend the enum and [`Matcher::compare`], nothing else.
//!
//! The module is pure and keeps no shared state, so concurrent evaluation
//! from the mock server's request handlers needs no locking.

use regex::Regex;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value, json};
use std::collections::BTreeMap;

use crate::error::{ContractError, ContractResult};

/// Reason code attached to every [`Mismatch`].
///
/// Structural codes come from matcher comparison; the remaining codes are
/// produced by the verifier when an interaction fails before or during the
/// HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MismatchReason {
    /// Actual value differs from the exact expected value
    ValueMismatch,
    /// Actual value has a different primitive kind than expected
    KindMismatch,
    /// Actual string does not fully match the expected pattern
    RegexMismatch,
    /// An expected key or element is missing
    KeyMissing,
    /// A key declared absent is present
    UnexpectedKey,
    /// Sequence lengths differ for a positional comparison
    LengthMismatch,
    /// Sequence has fewer elements than the declared minimum
    MinCountNotMet,
    /// No handler registered for a provider state
    MissingStateHandler,
    /// A provider state handler reported a setup failure
    StateSetupFailed,
    /// Transport failure reaching the provider
    NetworkError,
    /// State setup or network call exceeded its time budget
    Timeout,
}

/// A single structural discrepancy between expected and actual.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    /// Dot/index path into the compared structure, rooted at `$`
    pub path: String,
    /// Expected value or matcher rendering
    pub expected: Value,
    /// Observed value (`null` when nothing was observed)
    pub actual: Value,
    /// Reason code
    pub reason: MismatchReason,
}

impl Mismatch {
    /// Create a mismatch at the given path.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        expected: Value,
        actual: Value,
        reason: MismatchReason,
    ) -> Self {
        Self {
            path: path.into(),
            expected,
            actual,
            reason,
        }
    }
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, got {} ({:?})",
            self.path, self.expected, self.actual, self.reason
        )
    }
}

/// Rule describing how flexibly an actual value may differ from an example
/// while still satisfying the contract.
///
/// `Map` and `Seq` are the structural nodes: a matcher tree mirrors the shape
/// of the value it will be compared against. Every non-exact leaf carries an
/// example used to materialize concrete requests and responses.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Value must be identical (numbers by numeric equality, `10 == 10.0`)
    Exact(Value),
    /// Value must have the same primitive kind as the example
    Type {
        /// Example value defining the expected kind
        example: Value,
    },
    /// Value must be a string fully matching the pattern
    Regex {
        /// Anchored-on-compare regular expression
        pattern: String,
        /// Example used only when synthesizing requests
        example: String,
    },
    /// Value must be a sequence of at least `min` elements, each satisfying
    /// the element matcher
    EachLike {
        /// Matcher applied independently to every element
        element: Box<Matcher>,
        /// Minimum number of elements
        min: usize,
    },
    /// Key or field must not be present
    Absent,
    /// Mapping: expected keys are required (unless `Absent`), extra actual
    /// keys are ignored
    Map(BTreeMap<String, Matcher>),
    /// Positional, length-sensitive sequence
    Seq(Vec<Matcher>),
}

impl Matcher {
    /// Build an exact matcher, normalizing container literals into `Map` /
    /// `Seq` nodes with exact leaves so trees round-trip through the
    /// canonical format unchanged.
    #[must_use]
    pub fn exact(value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::exact(v)))
                    .collect(),
            ),
            Value::Array(items) => Self::Seq(items.into_iter().map(Self::exact).collect()),
            scalar => Self::Exact(scalar),
        }
    }

    /// Build a type-only matcher from an example value.
    #[must_use]
    pub fn type_of(example: impl Into<Value>) -> Self {
        Self::Type {
            example: example.into(),
        }
    }

    /// Build a regex matcher, validating the pattern eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidRegex`] if the pattern does not compile.
    pub fn regex(pattern: impl Into<String>, example: impl Into<String>) -> ContractResult<Self> {
        let pattern = pattern.into();
        compile_anchored(&pattern)?;
        Ok(Self::Regex {
            pattern,
            example: example.into(),
        })
    }

    /// Build an each-like matcher over a sequence.
    #[must_use]
    pub fn each_like(element: Self, min: usize) -> Self {
        Self::EachLike {
            element: Box::new(element),
            min,
        }
    }

    /// Build a mapping node from key/matcher pairs.
    #[must_use]
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, m)| (k.into(), m)).collect())
    }

    /// Materialize a concrete example value for this matcher.
    ///
    /// Returns `None` for [`Matcher::Absent`]; absent entries are dropped
    /// from materialized mappings.
    #[must_use]
    pub fn example(&self) -> Option<Value> {
        match self {
            Self::Exact(value) => Some(value.clone()),
            Self::Type { example } => Some(example.clone()),
            Self::Regex { example, .. } => Some(Value::String(example.clone())),
            Self::EachLike { element, min } => {
                let Some(sample) = element.example() else {
                    return Some(Value::Array(Vec::new()));
                };
                let count = (*min).max(1);
                Some(Value::Array(vec![sample; count]))
            }
            Self::Absent => None,
            Self::Map(entries) => {
                let fields: JsonMap<String, Value> = entries
                    .iter()
                    .filter_map(|(k, m)| m.example().map(|v| (k.clone(), v)))
                    .collect();
                Some(Value::Object(fields))
            }
            Self::Seq(items) => Some(Value::Array(
                items.iter().filter_map(Self::example).collect(),
            )),
        }
    }

    /// Compare an actual value against this matcher tree.
    ///
    /// Returns the ordered list of mismatches; an empty list is a match.
    /// Shape mismatches are reported, never panicked on.
    #[must_use]
    pub fn compare(&self, actual: &Value) -> Vec<Mismatch> {
        let mut mismatches = Vec::new();
        self.compare_at("$", actual, &mut mismatches);
        mismatches
    }

    /// Check whether an actual value satisfies this matcher tree.
    #[must_use]
    pub fn matches(&self, actual: &Value) -> bool {
        self.compare(actual).is_empty()
    }

    fn compare_at(&self, path: &str, actual: &Value, out: &mut Vec<Mismatch>) {
        match self {
            Self::Exact(expected) => {
                if !values_equal(expected, actual) {
                    out.push(Mismatch::new(
                        path,
                        expected.clone(),
                        actual.clone(),
                        MismatchReason::ValueMismatch,
                    ));
                }
            }
            Self::Type { example } => {
                if value_kind(example) != value_kind(actual) {
                    out.push(Mismatch::new(
                        path,
                        self.render(),
                        actual.clone(),
                        MismatchReason::KindMismatch,
                    ));
                }
            }
            Self::Regex { pattern, .. } => {
                let matched = match (compile_anchored(pattern), actual.as_str()) {
                    (Ok(re), Some(s)) => re.is_match(s),
                    _ => false,
                };
                if !matched {
                    out.push(Mismatch::new(
                        path,
                        self.render(),
                        actual.clone(),
                        MismatchReason::RegexMismatch,
                    ));
                }
            }
            Self::EachLike { element, min } => match actual.as_array() {
                None => out.push(Mismatch::new(
                    path,
                    self.render(),
                    actual.clone(),
                    MismatchReason::KindMismatch,
                )),
                Some(items) => {
                    if items.len() < *min {
                        out.push(Mismatch::new(
                            path,
                            self.render(),
                            json!(items.len()),
                            MismatchReason::MinCountNotMet,
                        ));
                    }
                    for (i, item) in items.iter().enumerate() {
                        element.compare_at(&format!("{path}[{i}]"), item, out);
                    }
                }
            },
            Self::Absent => {
                // Only reachable when compared against a present value: the
                // containing Map handles the absent-and-missing case.
                out.push(Mismatch::new(
                    path,
                    self.render(),
                    actual.clone(),
                    MismatchReason::UnexpectedKey,
                ));
            }
            Self::Map(entries) => match actual.as_object() {
                None => out.push(Mismatch::new(
                    path,
                    self.render(),
                    actual.clone(),
                    MismatchReason::KindMismatch,
                )),
                Some(fields) => {
                    for (key, matcher) in entries {
                        let child_path = format!("{path}.{key}");
                        match (matcher, fields.get(key)) {
                            (Self::Absent, None) => {}
                            (_, Some(value)) => matcher.compare_at(&child_path, value, out),
                            (_, None) => out.push(Mismatch::new(
                                child_path,
                                matcher.render(),
                                Value::Null,
                                MismatchReason::KeyMissing,
                            )),
                        }
                    }
                    // Extra actual keys are ignored: the contract states the
                    // minimum shape the consumer needs.
                }
            },
            Self::Seq(items) => match actual.as_array() {
                None => out.push(Mismatch::new(
                    path,
                    self.render(),
                    actual.clone(),
                    MismatchReason::KindMismatch,
                )),
                Some(values) => {
                    if items.len() != values.len() {
                        out.push(Mismatch::new(
                            path,
                            json!(items.len()),
                            json!(values.len()),
                            MismatchReason::LengthMismatch,
                        ));
                    }
                    for (i, (matcher, value)) in items.iter().zip(values.iter()).enumerate() {
                        matcher.compare_at(&format!("{path}[{i}]"), value, out);
                    }
                }
            },
        }
    }

    /// Canonical JSON rendering of this matcher tree.
    ///
    /// Literals stay literal; flexible leaves become `{"match": ...}` nodes.
    #[must_use]
    pub fn render(&self) -> Value {
        match self {
            Self::Exact(value) => value.clone(),
            Self::Type { example } => json!({"match": "type", "example": example}),
            Self::Regex { pattern, example } => {
                json!({"match": "regex", "pattern": pattern, "example": example})
            }
            Self::EachLike { element, min } => {
                json!({"match": "eachLike", "example": element.render(), "min": min})
            }
            Self::Absent => json!({"match": "absent"}),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, m)| (k.clone(), m.render()))
                    .collect(),
            ),
            Self::Seq(items) => Value::Array(items.iter().map(Self::render).collect()),
        }
    }

    /// Parse a matcher tree from its canonical JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Parse`] for malformed matcher nodes and
    /// [`ContractError::InvalidRegex`] for uncompilable patterns.
    pub fn from_canonical(value: Value) -> ContractResult<Self> {
        match value {
            Value::Object(map) if matcher_tag(&map).is_some() => {
                let tag = matcher_tag(&map).unwrap_or_default();
                match tag.as_str() {
                    "type" => {
                        let example = map.get("example").cloned().ok_or_else(|| {
                            ContractError::parse("type matcher requires an example")
                        })?;
                        Ok(Self::Type { example })
                    }
                    "regex" => {
                        let pattern = map
                            .get("pattern")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                ContractError::parse("regex matcher requires a pattern")
                            })?
                            .to_string();
                        let example = map
                            .get("example")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                ContractError::parse("regex matcher requires a string example")
                            })?
                            .to_string();
                        Self::regex(pattern, example)
                    }
                    "eachLike" => {
                        let element = map.get("example").cloned().ok_or_else(|| {
                            ContractError::parse("eachLike matcher requires an example element")
                        })?;
                        let min = map
                            .get("min")
                            .map_or(Some(1), Value::as_u64)
                            .ok_or_else(|| {
                                ContractError::parse("eachLike min must be a non-negative integer")
                            })?;
                        Ok(Self::each_like(
                            Self::from_canonical(element)?,
                            usize::try_from(min).unwrap_or(usize::MAX),
                        ))
                    }
                    "absent" => Ok(Self::Absent),
                    other => Err(ContractError::parse(format!(
                        "unknown matcher kind: {other}"
                    ))),
                }
            }
            Value::Object(map) => {
                let mut entries = BTreeMap::new();
                for (key, child) in map {
                    entries.insert(key, Self::from_canonical(child)?);
                }
                Ok(Self::Map(entries))
            }
            Value::Array(items) => Ok(Self::Seq(
                items
                    .into_iter()
                    .map(Self::from_canonical)
                    .collect::<ContractResult<Vec<_>>>()?,
            )),
            scalar => Ok(Self::Exact(scalar)),
        }
    }
}

impl Serialize for Matcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.render().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Matcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_canonical(value).map_err(D::Error::custom)
    }
}

/// The `match` tag of an explicit matcher node.
///
/// A string-valued `match` key is reserved by the canonical format; an
/// unknown tag is a parse error rather than silently treated as data.
fn matcher_tag(map: &JsonMap<String, Value>) -> Option<String> {
    map.get("match").and_then(Value::as_str).map(ToString::to_string)
}

fn compile_anchored(pattern: &str) -> ContractResult<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| ContractError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Primitive kind of a JSON value, as compared by type-only matchers.
#[must_use]
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Value equality with canonical numeric comparison: `10` equals `10.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        _ => a == b,
    }
}

#[allow(clippy::float_cmp, reason = "Canonical numeric equality is exact by definition.")]
fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_scalar_match() {
        let matcher = Matcher::exact(json!("WELCOME10"));
        assert!(matcher.matches(&json!("WELCOME10")));
        assert!(!matcher.matches(&json!("WELCOME20")));
    }

    #[test]
    fn test_exact_numeric_equality_across_representations() {
        let matcher = Matcher::exact(json!(10));
        assert!(matcher.matches(&json!(10)));
        assert!(matcher.matches(&json!(10.0)));

        let mismatches = matcher.compare(&json!("10"));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].reason, MismatchReason::ValueMismatch);
    }

    #[test]
    fn test_type_only_accepts_same_kind() {
        let matcher = Matcher::type_of(json!("example"));
        assert!(matcher.matches(&json!("anything else")));
        assert!(!matcher.matches(&json!(42)));

        let matcher = Matcher::type_of(json!({"a": 1}));
        assert!(matcher.matches(&json!({"entirely": "different"})));
        assert!(!matcher.matches(&json!([1, 2])));

        let matcher = Matcher::type_of(Value::Null);
        assert!(matcher.matches(&Value::Null));
        assert!(!matcher.matches(&json!(0)));
    }

    #[test]
    fn test_regex_full_match_only() {
        let matcher = Matcher::regex("u-[0-9]+", "u-123").unwrap();
        assert!(matcher.matches(&json!("u-42")));
        // Partial matches must be rejected.
        assert!(!matcher.matches(&json!("prefix u-42 suffix")));
        assert!(!matcher.matches(&json!(42)));
    }

    #[test]
    fn test_regex_invalid_pattern_rejected_eagerly() {
        let err = Matcher::regex("[", "x").unwrap_err();
        assert!(matches!(err, ContractError::InvalidRegex { .. }));
    }

    #[test]
    fn test_each_like_min_count_and_element_matching() {
        let matcher = Matcher::each_like(Matcher::type_of(json!(1)), 2);
        assert!(matcher.matches(&json!([1, 2, 3])));

        let mismatches = matcher.compare(&json!([1]));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].reason, MismatchReason::MinCountNotMet);

        // Every element is checked independently.
        let mismatches = matcher.compare(&json!([1, "two", 3]));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].path, "$[1]");
    }

    #[test]
    fn test_map_extra_keys_ignored_missing_keys_reported() {
        let matcher = Matcher::exact(json!({"userId": "u-123"}));
        assert!(matcher.matches(&json!({"userId": "u-123", "extra": true})));

        let mismatches = matcher.compare(&json!({}));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].path, "$.userId");
        assert_eq!(mismatches[0].reason, MismatchReason::KeyMissing);
    }

    #[test]
    fn test_absent_key() {
        let matcher = Matcher::object([("legacyField", Matcher::Absent)]);
        assert!(matcher.matches(&json!({})));
        assert!(matcher.matches(&json!({"other": 1})));

        let mismatches = matcher.compare(&json!({"legacyField": 1}));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].reason, MismatchReason::UnexpectedKey);
    }

    #[test]
    fn test_positional_sequence_is_length_sensitive() {
        let matcher = Matcher::exact(json!([1, 2]));
        assert!(matcher.matches(&json!([1, 2])));

        let mismatches = matcher.compare(&json!([1, 2, 3]));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].reason, MismatchReason::LengthMismatch);
    }

    #[test]
    fn test_shape_mismatch_is_reported_not_panicked() {
        let matcher = Matcher::exact(json!({"a": {"b": 1}}));
        let mismatches = matcher.compare(&json!("not an object"));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].reason, MismatchReason::KindMismatch);
    }

    #[test]
    fn test_nested_paths_use_dot_index_notation() {
        let matcher = Matcher::exact(json!({"items": [{"id": 1}]}));
        let mismatches = matcher.compare(&json!({"items": [{"id": 2}]}));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].path, "$.items[0].id");
    }

    #[test]
    fn test_example_materialization() {
        let matcher = Matcher::object([
            ("id", Matcher::regex("u-[0-9]+", "u-123").unwrap()),
            ("count", Matcher::type_of(json!(5))),
            ("gone", Matcher::Absent),
            ("tags", Matcher::each_like(Matcher::exact(json!("a")), 2)),
        ]);
        let example = matcher.example().unwrap();
        assert_eq!(
            example,
            json!({"id": "u-123", "count": 5, "tags": ["a", "a"]})
        );
    }

    #[test]
    fn test_canonical_roundtrip() {
        let matcher = Matcher::object([
            ("exact", Matcher::exact(json!(7))),
            ("typed", Matcher::type_of(json!("s"))),
            ("pattern", Matcher::regex("[A-Z]+", "ABC").unwrap()),
            ("list", Matcher::each_like(Matcher::type_of(json!(1)), 3)),
            ("gone", Matcher::Absent),
        ]);
        let rendered = serde_json::to_value(&matcher).unwrap();
        let restored: Matcher = serde_json::from_value(rendered).unwrap();
        assert_eq!(matcher, restored);
    }

    #[test]
    fn test_literal_leaves_stay_literal_in_canonical_form() {
        let matcher = Matcher::exact(json!({"userId": "u-123", "code": "WELCOME10"}));
        let rendered = serde_json::to_value(&matcher).unwrap();
        assert_eq!(rendered, json!({"userId": "u-123", "code": "WELCOME10"}));
    }

    #[test]
    fn test_unknown_matcher_kind_rejected() {
        let result = Matcher::from_canonical(json!({"match": "fuzzy", "example": 1}));
        assert!(result.is_err());
        // An object with a non-matcher "match" key is plain data, not a node.
        let matcher = Matcher::from_canonical(json!({"match": 3})).unwrap();
        assert!(matcher.matches(&json!({"match": 3})));
    }
}
