//! # tollgate-contracts
//!
//! Shared types, configuration, and error contracts for Tollgate.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions, configuration resolution, and error
//! types.

pub mod config;
pub mod enforcement;
pub mod error;
pub mod event;
pub mod policy;
pub mod request;

pub use config::{ClientConfig, Settings};
pub use enforcement::EnforcementMode;
pub use error::{TollgateError, TollgateResult};
pub use event::{AgentIdentity, Event, EventType};
pub use policy::{Decision, EvaluationResult, Policy, PolicySet};
pub use request::{ActionType, RequestContext};
