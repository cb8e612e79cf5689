//! Consumer-driven contract matching and verification engine.
//!
//! A consumer records the request/response interactions it depends on as a
//! [`Contract`], proves the contract is internally satisfiable by driving its
//! real client code against a [`MockServer`], and persists it through the
//! [`ContractStore`]. The provider later loads the contract and replays it
//! against a live instance with the [`Verifier`], producing a per-interaction
//! [`VerificationReport`].
//!
//! The engine performs no retries and never reorders interactions; hosting
//! the provider, rendering reports, and broker transport belong to the
//! caller.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod contract;
pub mod error;
pub mod matcher;
pub mod mock_server;
pub mod store;
pub mod verifier;

pub use contract::{Contract, Interaction, Participant, ProviderState, Request, Response};
pub use error::{ContractError, ContractResult};
pub use matcher::{Matcher, Mismatch, MismatchReason};
pub use mock_server::{ClosestCandidate, MockFault, MockServer, MockServerVerdict};
pub use store::{ContractStore, SaveStrategy, StoreConfig};
pub use verifier::{
    ProviderStateHandler, StateHandlers, StateParams, StateSetupResult, VerificationReport,
    VerificationResult, Verifier, VerifierConfig,
};
