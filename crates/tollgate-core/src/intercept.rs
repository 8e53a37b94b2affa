//! The call-boundary interception contract.
//!
//! Rust has no live rebinding of third-party methods, so a guarded call
//! site is an explicit integration point: the host application routes the
//! call through a `CallSite`, and an `Interceptor` swaps the site's handler
//! for a gated wrapper on `install()` and puts the original back on
//! `uninstall()`. Transparent patching of arbitrary library internals is not
//! attempted; each framework integration owns its own `CallSite`.
//!
//! The wrapped handler runs:
//!
//!   extract(args) → [None? → original] → Enforcer::check → original
//!                 → inspect(args, response) → Enforcer::check per finding
//!
//! A `None` from the extractor bypasses the gate entirely (excluded hosts).

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use tollgate_contracts::{
    error::{TollgateError, TollgateResult},
    request::RequestContext,
};

use crate::enforcer::Enforcer;

/// The implementation behind a call site.
pub type Handler<A, R> = Arc<dyn Fn(&A) -> TollgateResult<R> + Send + Sync>;

/// A named, swappable call boundary.
pub struct CallSite<A, R> {
    name: String,
    handler: RwLock<Handler<A, R>>,
}

impl<A, R> CallSite<A, R> {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&A) -> TollgateResult<R> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: RwLock::new(Arc::new(handler)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run whatever handler is currently attached.
    ///
    /// The handler is cloned out of the lock first so a concurrent
    /// `install()` never waits on an in-flight call.
    pub fn invoke(&self, args: &A) -> TollgateResult<R> {
        let handler = self.current();
        handler(args)
    }

    pub fn current(&self) -> Handler<A, R> {
        self.handler.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Attach `handler`, returning the one it replaced.
    pub fn replace(&self, handler: Handler<A, R>) -> Handler<A, R> {
        let mut slot = self.handler.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *slot, handler)
    }

    /// Attach `handler` only if `expected` is still the current handler.
    ///
    /// Returns `false`, leaving the site untouched, when something else has
    /// been attached since.
    pub fn replace_if_current(&self, expected: &Handler<A, R>, handler: Handler<A, R>) -> bool {
        let mut slot = self.handler.write().unwrap_or_else(|e| e.into_inner());
        if !same_handler(&slot, expected) {
            return false;
        }
        *slot = handler;
        true
    }
}

/// Identity of the closure behind two handles, ignoring vtable pointers.
fn same_handler<A, R>(a: &Handler<A, R>, b: &Handler<A, R>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// What `install()` swapped: the handler it found and the wrapper it left.
struct Installed<A, R> {
    original: Handler<A, R>,
    gated: Handler<A, R>,
}

/// Derives the request context of a call from its arguments.
///
/// Returning `None` lets the call through without evaluation.
pub trait TargetExtractor<A>: Send + Sync {
    fn extract(&self, args: &A) -> Option<RequestContext>;
}

impl<A, F> TargetExtractor<A> for F
where
    F: Fn(&A) -> Option<RequestContext> + Send + Sync,
{
    fn extract(&self, args: &A) -> Option<RequestContext> {
        self(args)
    }
}

/// Finds further actions embedded in a response (model tool-use requests).
pub trait ResponseInspector<A, R>: Send + Sync {
    fn inspect(&self, args: &A, response: &R) -> Vec<RequestContext>;
}

impl<A, R, F> ResponseInspector<A, R> for F
where
    F: Fn(&A, &R) -> Vec<RequestContext> + Send + Sync,
{
    fn inspect(&self, args: &A, response: &R) -> Vec<RequestContext> {
        self(args, response)
    }
}

/// Gates one `CallSite` with an `Enforcer`.
pub struct Interceptor<A, R> {
    site: Arc<CallSite<A, R>>,
    enforcer: Arc<Enforcer>,
    extractor: Arc<dyn TargetExtractor<A>>,
    inspector: Option<Arc<dyn ResponseInspector<A, R>>>,
    installed: Mutex<Option<Installed<A, R>>>,
}

impl<A, R> Interceptor<A, R>
where
    A: 'static,
    R: 'static,
{
    pub fn new(
        site: Arc<CallSite<A, R>>,
        enforcer: Arc<Enforcer>,
        extractor: impl TargetExtractor<A> + 'static,
    ) -> Self {
        Self {
            site,
            enforcer,
            extractor: Arc::new(extractor),
            inspector: None,
            installed: Mutex::new(None),
        }
    }

    /// Also enforce every action the inspector finds in a response.
    pub fn with_inspector(mut self, inspector: impl ResponseInspector<A, R> + 'static) -> Self {
        self.inspector = Some(Arc::new(inspector));
        self
    }

    pub fn site(&self) -> &Arc<CallSite<A, R>> {
        &self.site
    }

    pub fn enforcer(&self) -> &Arc<Enforcer> {
        &self.enforcer
    }

    pub fn is_installed(&self) -> bool {
        self.installed.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Replace the site's handler with the gated wrapper.
    ///
    /// Returns `TollgateError::AlreadyInstalled` on a second call.
    pub fn install(&self) -> TollgateResult<()> {
        let mut installed = self.installed.lock().unwrap_or_else(|e| e.into_inner());
        if installed.is_some() {
            return Err(TollgateError::AlreadyInstalled {
                site: self.site.name().to_string(),
            });
        }

        let inner = self.site.current();
        let enforcer = Arc::clone(&self.enforcer);
        let extractor = Arc::clone(&self.extractor);
        let inspector = self.inspector.clone();

        let gated: Handler<A, R> = Arc::new(move |args: &A| {
            let Some(ctx) = extractor.extract(args) else {
                return inner(args);
            };
            enforcer.check(&ctx)?;

            let response = inner(args)?;

            if let Some(inspector) = &inspector {
                for found in inspector.inspect(args, &response) {
                    debug!(action = %found.action_type, target = %found.target, "checking action found in response");
                    enforcer.check(&found)?;
                }
            }
            Ok(response)
        });

        let original = self.site.replace(Arc::clone(&gated));
        *installed = Some(Installed { original, gated });
        info!(site = %self.site.name(), mode = %self.enforcer.mode(), "interceptor installed");
        Ok(())
    }

    /// Put the original handler back.
    ///
    /// Interceptors on one site must come off in reverse install order.
    /// Returns `TollgateError::NotInstalled` if `install()` has not run and
    /// `TollgateError::Shadowed` if a later interceptor still wraps this
    /// one; in both cases the site is left as it was.
    pub fn uninstall(&self) -> TollgateResult<()> {
        let mut installed = self.installed.lock().unwrap_or_else(|e| e.into_inner());
        let Some(current) = installed.as_ref() else {
            return Err(TollgateError::NotInstalled {
                site: self.site.name().to_string(),
            });
        };
        if !self.site.replace_if_current(&current.gated, Arc::clone(&current.original)) {
            return Err(TollgateError::Shadowed {
                site: self.site.name().to_string(),
            });
        }
        *installed = None;
        info!(site = %self.site.name(), "interceptor uninstalled");
        Ok(())
    }

    /// Install now and uninstall when the returned guard drops.
    pub fn scoped(&self) -> TollgateResult<InstallGuard<'_, A, R>> {
        self.install()?;
        Ok(InstallGuard { interceptor: self })
    }

    /// Run `f` with the interceptor installed, uninstalling afterwards even
    /// if `f` panics.
    pub fn with_installed<T>(&self, f: impl FnOnce() -> T) -> TollgateResult<T> {
        let _guard = self.scoped()?;
        Ok(f())
    }
}

/// Keeps an interceptor installed for its own lifetime.
pub struct InstallGuard<'a, A: 'static, R: 'static> {
    interceptor: &'a Interceptor<A, R>,
}

impl<A: 'static, R: 'static> Drop for InstallGuard<'_, A, R> {
    fn drop(&mut self) {
        // Fails if the gate was removed by hand inside the scope, or if a
        // later interceptor outlives this guard; either way the site stays
        // consistent.
        if let Err(e) = self.interceptor.uninstall() {
            debug!(error = %e, "scoped interceptor not uninstalled");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
