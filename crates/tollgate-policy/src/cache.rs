//! Self-refreshing, fail-open policy cache.
//!
//! The cache publishes a `CacheState` snapshot through an `ArcSwap`: readers
//! take a snapshot per evaluation and never see a half-built evaluator, the
//! refresh path builds a complete new state and swaps it in.
//!
//! Trust is bounded by `stale_ttl`. Once the last successful refresh is older
//! than that, every evaluation allows with a reason naming the staleness,
//! whatever the compiled rules would have said.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use tollgate_contracts::{
    config::ClientConfig,
    policy::{EvaluationResult, PolicySet},
    request::RequestContext,
};
use tollgate_core::{
    enforcer::NO_POLICY_CACHE,
    lifecycle::{join_with_timeout, Shutdown},
    traits::{PolicyDecider, PolicySource},
};

use crate::engine::CompiledEvaluator;

const REFRESH_THREAD: &str = "tollgate-policy-refresh";

/// How long `stop()` waits for an in-flight refresh to finish.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What a single `refresh_once()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetched content hashed the same; only the refresh time moved.
    Unchanged,
    /// A new evaluator was compiled and published.
    Rebuilt,
    /// The fetch failed; nothing changed.
    Failed,
    /// The cache has no source.
    Disabled,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub policy_count: usize,
    pub rule_count: usize,
    pub skipped_rules: usize,
    pub rebuilds: u64,
    pub hash: Option<String>,
    pub last_refresh_age: Option<Duration>,
    pub stale: bool,
}

struct CacheState {
    evaluator: Arc<CompiledEvaluator>,
    /// `None` before the first compile and after `invalidate()`.
    hash: Option<String>,
    last_refresh: Option<Instant>,
}

struct Inner {
    source: Option<Arc<dyn PolicySource>>,
    state: ArcSwap<CacheState>,
    /// Serialises writers; readers go straight to `state`.
    refresh_lock: Mutex<()>,
    stale_ttl: Duration,
    rebuilds: AtomicU64,
    shutdown: Shutdown,
}

impl Inner {
    fn refresh_once(&self) -> RefreshOutcome {
        let Some(source) = &self.source else {
            return RefreshOutcome::Disabled;
        };
        let _writer = self.refresh_lock.lock().unwrap_or_else(|e| e.into_inner());

        let policies = match source.fetch_policies() {
            Ok(policies) => policies,
            Err(e) => {
                warn!(error = %e, "policy refresh failed; keeping current evaluator");
                return RefreshOutcome::Failed;
            }
        };

        let set = PolicySet::new(policies);
        let current = self.state.load();

        if current.hash.as_deref() == Some(set.hash()) {
            self.state.store(Arc::new(CacheState {
                evaluator: Arc::clone(&current.evaluator),
                hash: current.hash.clone(),
                last_refresh: Some(Instant::now()),
            }));
            debug!(hash = %set.hash(), "policy set unchanged");
            return RefreshOutcome::Unchanged;
        }

        let evaluator = CompiledEvaluator::compile(&set);
        info!(
            hash = %set.hash(),
            policies = set.len(),
            rules = evaluator.rule_count(),
            skipped = evaluator.skipped_count(),
            "policy evaluator rebuilt"
        );
        self.state.store(Arc::new(CacheState {
            evaluator: Arc::new(evaluator),
            hash: Some(set.hash().to_string()),
            last_refresh: Some(Instant::now()),
        }));
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        RefreshOutcome::Rebuilt
    }

    fn is_stale(&self, state: &CacheState) -> bool {
        match state.last_refresh {
            Some(at) => at.elapsed() > self.stale_ttl,
            None => true,
        }
    }
}

/// Keeps a `CompiledEvaluator` current against a `PolicySource`.
///
/// Construct with a source to get an eager first refresh plus a background
/// refresh thread; construct without one for a permanent allow-all that
/// spawns nothing.
pub struct PolicyCache {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PolicyCache {
    /// Build the cache, refresh once synchronously, and start the refresh
    /// loop.
    pub fn new(source: Option<Arc<dyn PolicySource>>, refresh_interval: Duration, stale_ttl: Duration) -> Self {
        let background = source.is_some();
        let inner = Arc::new(Inner {
            source,
            state: ArcSwap::from_pointee(CacheState {
                evaluator: Arc::new(CompiledEvaluator::allow_all()),
                hash: None,
                last_refresh: None,
            }),
            refresh_lock: Mutex::new(()),
            stale_ttl,
            rebuilds: AtomicU64::new(0),
            shutdown: Shutdown::new(),
        });

        let cache = Self {
            inner,
            worker: Mutex::new(None),
        };
        if !background {
            debug!("policy cache created without a source; allowing everything");
            return cache;
        }

        cache.inner.refresh_once();

        let inner = Arc::clone(&cache.inner);
        let spawned = std::thread::Builder::new()
            .name(REFRESH_THREAD.to_string())
            .spawn(move || {
                while !inner.shutdown.wait(refresh_interval) {
                    inner.refresh_once();
                }
                debug!("policy refresh loop stopped");
            });
        match spawned {
            Ok(handle) => {
                *cache.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
            }
            Err(e) => warn!(error = %e, "could not start policy refresh thread; cache will not refresh"),
        }
        cache
    }

    /// Timings from a resolved client configuration.
    pub fn from_config(source: Option<Arc<dyn PolicySource>>, config: &ClientConfig) -> Self {
        Self::new(source, config.refresh_interval, config.stale_ttl)
    }

    /// A cache with no source. Allows everything, starts nothing.
    pub fn disabled() -> Self {
        Self::new(None, Duration::ZERO, Duration::ZERO)
    }

    pub fn evaluate(&self, ctx: &RequestContext) -> EvaluationResult {
        if self.inner.source.is_none() {
            return EvaluationResult::allow(NO_POLICY_CACHE);
        }

        let state = self.inner.state.load();
        if self.inner.is_stale(&state) {
            let reason = match state.last_refresh {
                Some(at) => format!(
                    "Policy cache is stale (last refresh {:.1}s ago); failing open",
                    at.elapsed().as_secs_f64()
                ),
                None => "Policy cache is stale (never refreshed); failing open".to_string(),
            };
            debug!(action = %ctx.action_type, target = %ctx.target, "stale cache, allowing");
            return EvaluationResult::allow(reason);
        }

        state.evaluator.evaluate(ctx)
    }

    /// Fetch, and recompile if the content changed. Never fails.
    pub fn refresh_once(&self) -> RefreshOutcome {
        self.inner.refresh_once()
    }

    /// Forget the stored hash so the next refresh recompiles.
    ///
    /// The current evaluator and refresh time are kept.
    pub fn invalidate(&self) {
        let _writer = self.inner.refresh_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.inner.state.load();
        self.inner.state.store(Arc::new(CacheState {
            evaluator: Arc::clone(&current.evaluator),
            hash: None,
            last_refresh: current.last_refresh,
        }));
        debug!("policy cache invalidated");
    }

    /// Stop the refresh loop. Safe to call more than once.
    pub fn stop(&self) {
        if self.inner.shutdown.trigger() {
            debug!("stopping policy cache");
        }
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            join_with_timeout(handle, STOP_TIMEOUT, REFRESH_THREAD);
        }
    }

    /// The evaluator currently published.
    pub fn current_evaluator(&self) -> Arc<CompiledEvaluator> {
        Arc::clone(&self.inner.state.load().evaluator)
    }

    /// Hash of the policy set behind the current evaluator.
    pub fn current_hash(&self) -> Option<String> {
        self.inner.state.load().hash.clone()
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        self.inner.state.load().last_refresh
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.source.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.load();
        CacheStats {
            policy_count: state.evaluator.policy_count(),
            rule_count: state.evaluator.rule_count(),
            skipped_rules: state.evaluator.skipped_count(),
            rebuilds: self.inner.rebuilds.load(Ordering::Relaxed),
            hash: state.hash.clone(),
            last_refresh_age: state.last_refresh.map(|at| at.elapsed()),
            stale: self.inner.source.is_some() && self.inner.is_stale(&state),
        }
    }
}

impl PolicyDecider for PolicyCache {
    fn evaluate(&self, ctx: &RequestContext) -> EvaluationResult {
        PolicyCache::evaluate(self, ctx)
    }
}

impl Drop for PolicyCache {
    fn drop(&mut self) {
        self.stop();
    }
}
