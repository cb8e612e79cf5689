//! Consumer-side mock server.
//!
//! Serves a contract's interactions over an ephemeral HTTP listener so the
//! consumer's real client code can be driven against it. Matching is pure;
//! the hit counters and fault list are the only shared mutable state and sit
//! behind a single mutex.

use axum::Router;
use axum::body::Body;
use axum::extract::{Request as AxumRequest, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response as AxumResponse};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::contract::{ActualRequest, ConcreteResponse, Contract};
use crate::error::{ContractError, ContractResult};
use crate::matcher::Mismatch;

const BODY_LIMIT: usize = 4 * 1024 * 1024;

/// The closest non-matching interaction for an unmatched request.
#[derive(Debug, Clone, Serialize)]
pub struct ClosestCandidate {
    /// Description of the nearest interaction
    pub description: String,
    /// Why it did not match
    pub mismatches: Vec<Mismatch>,
}

/// A fault recorded while the mock server was running.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MockFault {
    /// A request matched no interaction
    #[serde(rename_all = "camelCase")]
    Unmatched {
        /// Request method
        method: String,
        /// Request path
        path: String,
        /// Closest candidate diff, if any interaction came close
        closest: Option<ClosestCandidate>,
    },
    /// A request matched more than one interaction (authoring defect)
    #[serde(rename_all = "camelCase")]
    Ambiguous {
        /// Request method
        method: String,
        /// Request path
        path: String,
        /// Descriptions of every matching interaction
        candidates: Vec<String>,
    },
}

/// Teardown verdict returned by [`MockServer::stop`].
#[derive(Debug, Clone, Serialize)]
pub struct MockServerVerdict {
    /// Interactions whose hit counter stayed at zero
    pub unexercised: Vec<String>,
    /// Faults recorded while serving
    pub faults: Vec<MockFault>,
}

impl MockServerVerdict {
    /// Success only if every interaction was exercised and no faults occurred.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.unexercised.is_empty() && self.faults.is_empty()
    }
}

#[derive(Debug)]
struct Recorder {
    hits: Vec<u64>,
    faults: Vec<MockFault>,
}

#[derive(Debug)]
struct MockState {
    contract: Contract,
    recorder: Mutex<Recorder>,
}

impl MockState {
    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ephemeral HTTP responder driven by a contract.
#[derive(Debug)]
pub struct MockServer {
    base_url: String,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Bind an ephemeral listener and start serving the contract.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::DuplicateDescription`] for an ill-formed
    /// document and [`ContractError::Startup`] if the listener cannot bind.
    pub async fn start(contract: Contract) -> ContractResult<Self> {
        contract.validate()?;

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| ContractError::startup(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ContractError::startup(e.to_string()))?;

        let hits = vec![0; contract.interactions.len()];
        let state = Arc::new(MockState {
            contract,
            recorder: Mutex::new(Recorder {
                hits,
                faults: Vec::new(),
            }),
        });

        let app = Router::new()
            .fallback(handle_request)
            .with_state(Arc::clone(&state));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(error) = server.await {
                warn!(%error, "Mock server terminated abnormally");
            }
        });

        info!(%addr, "Mock server started");
        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Base URL of the running listener.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Tear down the listener and return the verdict.
    pub async fn stop(mut self) -> MockServerVerdict {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        let recorder = self.state.recorder();
        let unexercised: Vec<String> = self
            .state
            .contract
            .interactions
            .iter()
            .zip(recorder.hits.iter())
            .filter(|(_, hits)| **hits == 0)
            .map(|(interaction, _)| interaction.description.clone())
            .collect();
        let verdict = MockServerVerdict {
            unexercised,
            faults: recorder.faults.clone(),
        };
        info!(passed = verdict.passed(), faults = verdict.faults.len(), "Mock server stopped");
        verdict
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle_request(
    State(state): State<Arc<MockState>>,
    request: AxumRequest,
) -> AxumResponse {
    let (parts, body) = request.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, BODY_LIMIT).await else {
        return diagnostic(StatusCode::INTERNAL_SERVER_ERROR, &json!({"error": "failed to read request body"}));
    };
    let actual = to_actual(&parts, &bytes);

    let evaluations: Vec<(usize, Vec<Mismatch>)> = state
        .contract
        .interactions
        .iter()
        .enumerate()
        .map(|(index, interaction)| (index, interaction.request.mismatches(&actual)))
        .collect();
    let matching: Vec<usize> = evaluations
        .iter()
        .filter(|(_, mismatches)| mismatches.is_empty())
        .map(|(index, _)| *index)
        .collect();

    match matching.as_slice() {
        [index] => {
            let interaction = &state.contract.interactions[*index];
            debug!(description = %interaction.description, "Request matched interaction");
            {
                let mut recorder = state.recorder();
                recorder.hits[*index] += 1;
            }
            build_response(&interaction.response.materialize())
        }
        [] => {
            let closest = evaluations
                .iter()
                .min_by_key(|(_, mismatches)| mismatches.len())
                .map(|(index, mismatches)| ClosestCandidate {
                    description: state.contract.interactions[*index].description.clone(),
                    mismatches: mismatches.clone(),
                });
            warn!(method = %actual.method, path = %actual.path, "Unmatched request");
            let fault = MockFault::Unmatched {
                method: actual.method.clone(),
                path: actual.path.clone(),
                closest,
            };
            let body = json!({"error": "unmatched request", "fault": &fault});
            state.recorder().faults.push(fault);
            diagnostic(StatusCode::INTERNAL_SERVER_ERROR, &body)
        }
        many => {
            let candidates: Vec<String> = many
                .iter()
                .map(|index| state.contract.interactions[*index].description.clone())
                .collect();
            warn!(
                method = %actual.method,
                path = %actual.path,
                ?candidates,
                "Ambiguous request matches multiple interactions"
            );
            let fault = MockFault::Ambiguous {
                method: actual.method.clone(),
                path: actual.path.clone(),
                candidates,
            };
            let body = json!({"error": "ambiguous request", "fault": &fault});
            state.recorder().faults.push(fault);
            diagnostic(StatusCode::INTERNAL_SERVER_ERROR, &body)
        }
    }
}

fn to_actual(parts: &Parts, bytes: &[u8]) -> ActualRequest {
    let query: BTreeMap<String, String> = parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();
    let headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    ActualRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query,
        headers,
        body: crate::contract::parse_payload(bytes),
    }
}

fn build_response(concrete: &ConcreteResponse) -> AxumResponse {
    let status =
        StatusCode::from_u16(concrete.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &concrete.headers {
        builder = builder.header(name, value);
    }
    let bytes = concrete
        .body
        .as_ref()
        .and_then(|body| serde_json::to_vec(body).ok())
        .unwrap_or_default();
    builder.body(Body::from(bytes)).map_or_else(
        |error| {
            diagnostic(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"error": format!("invalid response specification: {error}")}),
            )
        },
        |response| response,
    )
}

fn diagnostic(status: StatusCode, body: &Value) -> AxumResponse {
    (status, axum::Json(body.clone())).into_response()
}
