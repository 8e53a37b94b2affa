//! # tollgate-core
//!
//! The enforcement runtime for Tollgate.
//!
//! This crate provides:
//! - The four seam traits (`PolicyDecider`, `PolicySource`, `EventSink`, `Transport`)
//! - The `Enforcer` that turns an evaluation into block / warn / log behaviour
//! - The generic interception contract (`CallSite`, `Interceptor`, `InstallGuard`)
//! - Shutdown signalling shared by every background loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tollgate_core::{Enforcer, CallSite, Interceptor};
//!
//! let site = Arc::new(CallSite::new("tool.run", run_tool));
//! let gate = Interceptor::new(site.clone(), Arc::new(enforcer), extract_tool);
//! let _guard = gate.scoped()?;
//! site.invoke(&args)?;
//! ```

pub mod enforcer;
pub mod intercept;
pub mod lifecycle;
pub mod traits;

pub use enforcer::Enforcer;
pub use intercept::{CallSite, Handler, InstallGuard, Interceptor, ResponseInspector, TargetExtractor};
pub use lifecycle::{join_with_timeout, Shutdown};
pub use traits::{EventSink, PolicyDecider, PolicySource, Transport};
