//! # tollgate-telemetry
//!
//! Event delivery and fleet presence for Tollgate.
//!
//! - [`EventClient`]: queue + background batch flush with re-enqueue on
//!   failure, optional fleet registration and heartbeat. Implements
//!   [`EventSink`](tollgate_core::traits::EventSink).
//! - [`ApiClient`]: the bearer-authenticated JSON transport everything else
//!   posts through. Implements [`Transport`](tollgate_core::traits::Transport).
//!
//! Remote paths used, relative to the configured base URL:
//!
//! | Path | Use |
//! |---|---|
//! | `POST /agents` | manual agent registration |
//! | `POST /agents/{id}/events` | batched events |
//! | `POST /fleet/register` | fleet auto-registration |
//! | `POST /fleet/{id}/heartbeat` | liveness |

pub mod client;
pub mod fleet;
pub mod http;

pub use client::EventClient;
pub use fleet::{NetworkInfo, ProcessInfo};
pub use http::ApiClient;
