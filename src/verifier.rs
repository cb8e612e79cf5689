//! Provider-side verification.
//!
//! Replays a contract's interactions against a live provider endpoint and
//! aggregates per-interaction results. One interaction's failure never
//! prevents evaluation of the rest: the report's value is diagnosing every
//! breakage in a single pass. No retries are performed anywhere; a retry
//! could mask a genuine contract violation and belongs to the caller.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::contract::{ActualResponse, ConcreteRequest, Contract, Interaction, parse_payload};
use crate::error::{ContractError, ContractResult};
use crate::matcher::{Mismatch, MismatchReason};

/// Parameters of a provider state, as recorded in the contract.
pub type StateParams = BTreeMap<String, Value>;

/// Outcome of provider-state setup: `Err` carries the failure description.
pub type StateSetupResult = Result<(), String>;

/// Provider-side fixture setup for a named state.
///
/// Implemented automatically for synchronous closures; implement the trait
/// directly when setup needs to await (database fixtures and the like).
pub trait ProviderStateHandler: Send + Sync {
    /// Establish the state described by `params`.
    fn setup<'a>(
        &'a self,
        params: &'a StateParams,
    ) -> Pin<Box<dyn Future<Output = StateSetupResult> + Send + 'a>>;
}

/// Synchronous closures run on the blocking pool so the step budget applies
/// to them the same as to async handlers.
impl<F> ProviderStateHandler for F
where
    F: Fn(&StateParams) -> StateSetupResult + Clone + Send + Sync + 'static,
{
    fn setup<'a>(
        &'a self,
        params: &'a StateParams,
    ) -> Pin<Box<dyn Future<Output = StateSetupResult> + Send + 'a>> {
        let setup = self.clone();
        let params = params.clone();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || setup(&params)).await {
                Ok(result) => result,
                Err(e) => Err(format!("state setup task failed: {e}")),
            }
        })
    }
}

/// Explicit state-name → handler mapping.
///
/// The verifier never relies on ambient registration: the full set of
/// required handlers is inspectable through [`StateHandlers::names`].
#[derive(Default)]
pub struct StateHandlers {
    handlers: HashMap<String, Box<dyn ProviderStateHandler>>,
}

impl std::fmt::Debug for StateHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandlers")
            .field("names", &self.names())
            .finish()
    }
}

impl StateHandlers {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a state name.
    #[must_use]
    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: impl ProviderStateHandler + 'static,
    ) -> Self {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    /// Register a synchronous setup closure for a state name.
    #[must_use]
    pub fn register_fn(
        self,
        name: impl Into<String>,
        setup: impl Fn(&StateParams) -> StateSetupResult + Clone + Send + Sync + 'static,
    ) -> Self {
        self.register(name, setup)
    }

    /// Look up the handler for a state name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn ProviderStateHandler> {
        self.handlers.get(name).map(Box::as_ref)
    }

    /// Names of all registered handlers.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Base URL of the provider under verification
    pub base_url: String,
    /// Budget for each state setup and each network call (default: 10s)
    pub interaction_timeout: Duration,
    /// Deadline for the whole verification run (default: 60s)
    pub run_deadline: Duration,
}

impl VerifierConfig {
    /// Create a config with default time budgets.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            interaction_timeout: Duration::from_secs(10),
            run_deadline: Duration::from_secs(60),
        }
    }

    /// Set the per-step time budget.
    #[must_use]
    pub const fn with_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.interaction_timeout = timeout;
        self
    }

    /// Set the overall run deadline.
    #[must_use]
    pub const fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }
}

/// Result of replaying one interaction.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    /// Interaction description
    pub description: String,
    /// Whether the interaction was satisfied
    pub passed: bool,
    /// Ordered mismatches, empty when passed
    pub mismatches: Vec<Mismatch>,
}

/// Aggregate verification outcome, one result per interaction in document
/// order.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    /// Per-interaction results
    pub results: Vec<VerificationResult>,
}

impl VerificationReport {
    /// True iff every interaction passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Results of failed interactions.
    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Replays a contract against a live provider and reports per-interaction
/// results. The loaded contract is only ever read.
#[derive(Debug)]
pub struct Verifier {
    config: VerifierConfig,
    base_url: Url,
    client: Client,
    handlers: StateHandlers,
}

impl Verifier {
    /// Create a verifier.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Config`] for an unparseable base URL and
    /// [`ContractError::Http`] if the HTTP client cannot be built.
    pub fn new(config: VerifierConfig, handlers: StateHandlers) -> ContractResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ContractError::config(format!("invalid base URL: {e}")))?;
        let client = Client::builder()
            .timeout(config.interaction_timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self {
            config,
            base_url,
            client,
            handlers,
        })
    }

    /// Replay every interaction in document order and aggregate the results.
    #[instrument(
        skip(self, contract),
        fields(consumer = %contract.consumer.name, provider = %contract.provider.name)
    )]
    pub async fn verify(&self, contract: &Contract) -> VerificationReport {
        let deadline = Instant::now() + self.config.run_deadline;
        let mut results = Vec::with_capacity(contract.interactions.len());
        for interaction in &contract.interactions {
            let result = self.verify_interaction(interaction, deadline).await;
            if result.passed {
                debug!(description = %result.description, "Interaction verified");
            } else {
                warn!(
                    description = %result.description,
                    mismatches = result.mismatches.len(),
                    "Interaction failed verification"
                );
            }
            results.push(result);
        }
        let report = VerificationReport { results };
        info!(
            passed = report.passed(),
            failed = report.failures().count(),
            total = report.results.len(),
            "Verification run complete"
        );
        report
    }

    async fn verify_interaction(
        &self,
        interaction: &Interaction,
        deadline: Instant,
    ) -> VerificationResult {
        // Provider states first; any failure isolates to this interaction.
        for state in &interaction.provider_states {
            let Some(handler) = self.handlers.get(&state.name) else {
                return failed(
                    interaction,
                    state_mismatch(&state.name, "no handler registered", MismatchReason::MissingStateHandler),
                );
            };
            let Some(budget) = step_budget(deadline, self.config.interaction_timeout) else {
                return failed(
                    interaction,
                    state_mismatch(&state.name, "run deadline exceeded", MismatchReason::Timeout),
                );
            };
            match timeout(budget, handler.setup(&state.params)).await {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => {
                    return failed(
                        interaction,
                        state_mismatch(&state.name, &reason, MismatchReason::StateSetupFailed),
                    );
                }
                Err(_) => {
                    return failed(
                        interaction,
                        state_mismatch(&state.name, "state setup timed out", MismatchReason::Timeout),
                    );
                }
            }
        }

        let concrete = interaction.request.materialize();
        let Some(budget) = step_budget(deadline, self.config.interaction_timeout) else {
            return failed(
                interaction,
                request_mismatch(&concrete, "run deadline exceeded", MismatchReason::Timeout),
            );
        };

        let actual = match timeout(budget, self.send(&concrete)).await {
            Ok(Ok(actual)) => actual,
            Ok(Err(mismatch)) => return failed(interaction, mismatch),
            Err(_) => {
                return failed(
                    interaction,
                    request_mismatch(&concrete, "request timed out", MismatchReason::Timeout),
                );
            }
        };

        let mismatches = interaction.response.mismatches(&actual);
        VerificationResult {
            description: interaction.description.clone(),
            passed: mismatches.is_empty(),
            mismatches,
        }
    }

    /// Send a materialized request; transport problems become a single
    /// mismatch rather than an error.
    async fn send(&self, concrete: &ConcreteRequest) -> Result<ActualResponse, Mismatch> {
        let method = reqwest::Method::from_bytes(concrete.method.as_bytes()).map_err(|e| {
            request_mismatch(concrete, &e.to_string(), MismatchReason::NetworkError)
        })?;
        let mut url = self.base_url.join(&concrete.path).map_err(|e| {
            request_mismatch(concrete, &e.to_string(), MismatchReason::NetworkError)
        })?;
        if !concrete.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                concrete.query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            );
        }

        let mut request = self.client.request(method, url);
        for (name, value) in &concrete.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &concrete.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                MismatchReason::Timeout
            } else {
                MismatchReason::NetworkError
            };
            request_mismatch(concrete, &e.to_string(), reason)
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().await.map_err(|e| {
            request_mismatch(concrete, &e.to_string(), MismatchReason::NetworkError)
        })?;
        Ok(ActualResponse {
            status,
            headers,
            body: parse_payload(&bytes),
        })
    }
}

/// Remaining budget for one step, bounded by both the per-step timeout and
/// the run deadline. `None` once the deadline has passed.
fn step_budget(deadline: Instant, interaction_timeout: Duration) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        None
    } else {
        Some(remaining.min(interaction_timeout))
    }
}

fn failed(interaction: &Interaction, mismatch: Mismatch) -> VerificationResult {
    VerificationResult {
        description: interaction.description.clone(),
        passed: false,
        mismatches: vec![mismatch],
    }
}

fn state_mismatch(state_name: &str, detail: &str, reason: MismatchReason) -> Mismatch {
    Mismatch::new(
        "$.providerStates",
        Value::String(state_name.to_string()),
        Value::String(detail.to_string()),
        reason,
    )
}

fn request_mismatch(concrete: &ConcreteRequest, detail: &str, reason: MismatchReason) -> Mismatch {
    Mismatch::new(
        "$.request",
        Value::String(format!("{} {}", concrete.method, concrete.path)),
        Value::String(detail.to_string()),
        reason,
    )
}
