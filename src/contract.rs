//! Contract document model.
//!
//! A [`Contract`] is an ordered collection of interactions between one
//! consumer and one provider. It is built transiently by a consumer test,
//! persisted by the store, and replayed read-only by the verifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{ContractError, ContractResult};
use crate::matcher::{Matcher, Mismatch};

/// A participant in a contract (consumer or provider).
///
/// Serialized transparently as its name, per the canonical file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Participant {
    /// Participant name
    pub name: String,
}

impl Participant {
    /// Create a new participant.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A named precondition the provider must establish before an interaction's
/// request is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderState {
    /// State name, resolved to a caller-supplied handler at verification time
    pub name: String,
    /// Parameters passed to the handler
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl ProviderState {
    /// Create a provider state with no parameters.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Expected HTTP request in an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method
    pub method: String,
    /// Request path, literal or pattern
    pub path: Matcher,
    /// Expected headers (names compared case-insensitively)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Matcher>,
    /// Expected query parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Matcher>,
    /// Expected body matcher tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Matcher>,
}

impl Request {
    /// Create a request expectation with a literal path.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: Matcher::Exact(Value::String(path.into())),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
        }
    }

    /// Use a matcher (e.g. a regex) for the path.
    #[must_use]
    pub fn with_path(mut self, path: Matcher) -> Self {
        self.path = path;
        self
    }

    /// Add an expected header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, matcher: Matcher) -> Self {
        self.headers.insert(name.into(), matcher);
        self
    }

    /// Add an expected query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, matcher: Matcher) -> Self {
        self.query.insert(name.into(), matcher);
        self
    }

    /// Set the expected body.
    #[must_use]
    pub fn with_body(mut self, body: Matcher) -> Self {
        self.body = Some(body);
        self
    }

    /// Compare an observed request against this expectation.
    ///
    /// An empty result is a match. Extra actual headers and query parameters
    /// are ignored; the contract states the minimum the consumer needs.
    #[must_use]
    pub fn mismatches(&self, actual: &ActualRequest) -> Vec<Mismatch> {
        let mut out = Vec::new();

        let expected_method = Matcher::Exact(Value::String(self.method.to_uppercase()));
        for mut m in expected_method.compare(&Value::String(actual.method.to_uppercase())) {
            m.path = "$.method".to_string();
            out.push(m);
        }

        for mut m in self.path.compare(&Value::String(actual.path.clone())) {
            m.path = "$.path".to_string();
            out.push(m);
        }

        compare_named(&self.query, "$.query", &mut out, |name| {
            actual
                .query
                .get(name)
                .map(|v| Value::String(v.clone()))
        });

        compare_named(&self.headers, "$.headers", &mut out, |name| {
            actual.header(name).map(|v| Value::String(v.to_string()))
        });

        if let Some(expected_body) = &self.body {
            match &actual.body {
                Some(actual_body) => {
                    for mut m in expected_body.compare(actual_body) {
                        m.path = prefix_body_path(&m.path);
                        out.push(m);
                    }
                }
                None => out.push(Mismatch::new(
                    "$.body",
                    expected_body.render(),
                    Value::Null,
                    crate::matcher::MismatchReason::KeyMissing,
                )),
            }
        }

        out
    }

    /// Materialize a concrete request from the matcher examples.
    #[must_use]
    pub fn materialize(&self) -> ConcreteRequest {
        let path = self
            .path
            .example()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_else(|| "/".to_string());
        let query = materialize_named(&self.query);
        let mut headers = materialize_named(&self.headers);
        let body = self.body.as_ref().and_then(Matcher::example);
        if body.is_some() && !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        ConcreteRequest {
            method: self.method.clone(),
            path,
            query,
            headers,
            body,
        }
    }
}

/// Expected HTTP response in an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Expected status (usually exact)
    pub status: Matcher,
    /// Expected headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Matcher>,
    /// Expected body matcher tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Matcher>,
}

impl Response {
    /// Create a response expectation with an exact status.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status: Matcher::Exact(Value::from(status)),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Add an expected header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, matcher: Matcher) -> Self {
        self.headers.insert(name.into(), matcher);
        self
    }

    /// Set the expected body.
    #[must_use]
    pub fn with_body(mut self, body: Matcher) -> Self {
        self.body = Some(body);
        self
    }

    /// Compare an observed response against this expectation.
    #[must_use]
    pub fn mismatches(&self, actual: &ActualResponse) -> Vec<Mismatch> {
        let mut out = Vec::new();

        for mut m in self.status.compare(&Value::from(actual.status)) {
            m.path = "$.status".to_string();
            out.push(m);
        }

        compare_named(&self.headers, "$.headers", &mut out, |name| {
            actual.header(name).map(|v| Value::String(v.to_string()))
        });

        if let Some(expected_body) = &self.body {
            match &actual.body {
                Some(actual_body) => {
                    for mut m in expected_body.compare(actual_body) {
                        m.path = prefix_body_path(&m.path);
                        out.push(m);
                    }
                }
                None => out.push(Mismatch::new(
                    "$.body",
                    expected_body.render(),
                    Value::Null,
                    crate::matcher::MismatchReason::KeyMissing,
                )),
            }
        }

        out
    }

    /// Materialize a concrete response from the matcher examples.
    #[must_use]
    pub fn materialize(&self) -> ConcreteResponse {
        let status = self
            .status
            .example()
            .and_then(|v| v.as_u64())
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(200);
        let mut headers = materialize_named(&self.headers);
        let body = self.body.as_ref().and_then(Matcher::example);
        if body.is_some() && !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        ConcreteResponse {
            status,
            headers,
            body,
        }
    }
}

/// An observed HTTP request, as seen by the mock server.
#[derive(Debug, Clone, Default)]
pub struct ActualRequest {
    /// HTTP method
    pub method: String,
    /// Request path (no query string)
    pub path: String,
    /// Decoded query parameters
    pub query: BTreeMap<String, String>,
    /// Headers as received
    pub headers: Vec<(String, String)>,
    /// Parsed body, if any
    pub body: Option<Value>,
}

impl ActualRequest {
    /// Look up a header value, case-insensitively by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An observed HTTP response, as seen by the verifier.
#[derive(Debug, Clone)]
pub struct ActualResponse {
    /// Status code
    pub status: u16,
    /// Headers as received
    pub headers: Vec<(String, String)>,
    /// Parsed body, if any
    pub body: Option<Value>,
}

impl ActualResponse {
    /// Look up a header value, case-insensitively by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A concrete request synthesized from matcher examples.
#[derive(Debug, Clone)]
pub struct ConcreteRequest {
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Headers
    pub headers: Vec<(String, String)>,
    /// JSON body, if any
    pub body: Option<Value>,
}

/// A concrete response synthesized from matcher examples.
#[derive(Debug, Clone)]
pub struct ConcreteResponse {
    /// Status code
    pub status: u16,
    /// Headers
    pub headers: Vec<(String, String)>,
    /// JSON body, if any
    pub body: Option<Value>,
}

/// One expected request/response exchange, with optional preconditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique description within the contract
    pub description: String,
    /// Provider states to establish before the request is sent
    #[serde(
        rename = "providerStates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub provider_states: Vec<ProviderState>,
    /// Expected request
    pub request: Request,
    /// Expected response
    pub response: Response,
}

impl Interaction {
    /// Create an interaction.
    #[must_use]
    pub fn new(description: impl Into<String>, request: Request, response: Response) -> Self {
        Self {
            description: description.into(),
            provider_states: Vec::new(),
            request,
            response,
        }
    }

    /// Add a provider-state precondition.
    #[must_use]
    pub fn given(mut self, state: ProviderState) -> Self {
        self.provider_states.push(state);
        self
    }
}

/// A contract between one consumer and one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Consumer participant
    pub consumer: Participant,
    /// Provider participant
    pub provider: Participant,
    /// Ordered interactions
    pub interactions: Vec<Interaction>,
}

impl Contract {
    /// Create an empty contract.
    #[must_use]
    pub fn new(consumer: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            consumer: Participant::new(consumer),
            provider: Participant::new(provider),
            interactions: Vec::new(),
        }
    }

    /// Append an interaction, enforcing description uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::DuplicateDescription`] if the description is
    /// already present in this document.
    pub fn add_interaction(&mut self, interaction: Interaction) -> ContractResult<()> {
        if self
            .interactions
            .iter()
            .any(|i| i.description == interaction.description)
        {
            return Err(ContractError::DuplicateDescription(
                interaction.description,
            ));
        }
        self.interactions.push(interaction);
        Ok(())
    }

    /// Validate document invariants (unique descriptions).
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::DuplicateDescription`] on the first collision.
    pub fn validate(&self) -> ContractResult<()> {
        let mut seen = std::collections::HashSet::new();
        for interaction in &self.interactions {
            if !seen.insert(interaction.description.as_str()) {
                return Err(ContractError::DuplicateDescription(
                    interaction.description.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Parse a contract from its canonical JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Parse`] for malformed documents; never
    /// fabricates an empty contract.
    pub fn from_json(data: &[u8]) -> ContractResult<Self> {
        let contract: Self =
            serde_json::from_slice(data).map_err(|e| ContractError::parse(e.to_string()))?;
        contract.validate()?;
        Ok(contract)
    }

    /// Render the contract in canonical pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Serialization`] if rendering fails.
    pub fn to_json(&self) -> ContractResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Compare declared name→matcher entries against a lookup into the actual
/// request or response. Used for both headers and query parameters.
fn compare_named(
    expected: &BTreeMap<String, Matcher>,
    prefix: &str,
    out: &mut Vec<Mismatch>,
    lookup: impl Fn(&str) -> Option<Value>,
) {
    for (name, matcher) in expected {
        let child_path = format!("{prefix}.{name}");
        match (matcher, lookup(name)) {
            (Matcher::Absent, None) => {}
            (_, Some(value)) => {
                for mut m in matcher.compare(&value) {
                    m.path.clone_from(&child_path);
                    out.push(m);
                }
            }
            (_, None) => out.push(Mismatch::new(
                child_path,
                matcher.render(),
                Value::Null,
                crate::matcher::MismatchReason::KeyMissing,
            )),
        }
    }
}

fn materialize_named(expected: &BTreeMap<String, Matcher>) -> Vec<(String, String)> {
    expected
        .iter()
        .filter_map(|(name, matcher)| {
            matcher
                .example()
                .map(|value| (name.clone(), value_to_plain_string(&value)))
        })
        .collect()
}

/// Render a JSON value as a header/query string without surrounding quotes.
fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rebase a body-relative matcher path (`$...`) under `$.body`.
fn prefix_body_path(path: &str) -> String {
    format!("$.body{}", path.trim_start_matches('$'))
}

/// Interpret an observed HTTP payload: empty is no body, JSON is parsed,
/// anything else is compared as a string.
pub(crate) fn parse_payload(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice(bytes)
        .ok()
        .or_else(|| Some(Value::String(String::from_utf8_lossy(bytes).into_owned())))
}
