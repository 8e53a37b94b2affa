//! Tollgate demo CLI
//!
//! Loads a local policy bundle and exercises the enforcement pipeline:
//! rule compilation, the policy cache, every interception gate and the
//! telemetry sink.
//!
//! Usage:
//!   cargo run -p tollgate-demo -- validate --bundle demo/policies/bundle.toml
//!   cargo run -p tollgate-demo -- evaluate --bundle demo/policies/bundle.toml --url https://pastebin.com/x
//!   cargo run -p tollgate-demo -- evaluate --bundle demo/policies/bundle.toml --action tool_call --target run_shell
//!   cargo run -p tollgate-demo -- run --bundle demo/policies/bundle.toml --mode warn --redact
//!
//! `run --telemetry` posts events to the backend configured by the
//! `TOLLGATE_*` environment variables instead of printing them.

mod console;
mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate_contracts::{
    config::{ClientConfig, Settings},
    enforcement::EnforcementMode,
    error::{TollgateError, TollgateResult},
    event::EventType,
    request::RequestContext,
};
use tollgate_core::traits::{EventSink, PolicyDecider, PolicySource};
use tollgate_policy::{BundlePolicySource, PolicyCache};
use tollgate_telemetry::EventClient;

use console::ConsoleSink;
use scenario::Scenario;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Tollgate: runtime policy enforcement for AI agents.
#[derive(Parser)]
#[command(
    name = "tollgate-demo",
    about = "Tollgate policy enforcement demo",
    long_about = "Compiles a policy bundle and runs requests through the Tollgate\n\
                  gates, showing decisions, enforcement modes and emitted events."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a bundle and report what was loaded.
    Validate {
        #[arg(long)]
        bundle: PathBuf,
    },
    /// Evaluate a single request against a bundle.
    Evaluate {
        #[arg(long)]
        bundle: PathBuf,
        /// Outbound URL; builds an `http` request.
        #[arg(long, conflicts_with_all = ["action", "target"])]
        url: Option<String>,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Action type for call-level requests (tool_call, llm_call, ...).
        #[arg(long, requires = "target")]
        action: Option<String>,
        #[arg(long)]
        target: Option<String>,
        /// Extra request attributes as key=value.
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
    },
    /// Run the scripted agent session through every gate.
    Run {
        #[arg(long)]
        bundle: PathBuf,
        /// block, warn or log.
        #[arg(long, default_value = "block")]
        mode: EnforcementMode,
        /// Attach PII-redacted message text to model events.
        #[arg(long)]
        redact: bool,
        /// Send events to the configured backend.
        #[arg(long)]
        telemetry: bool,
        /// Settings file (TOML); environment variables fill the gaps.
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

fn parse_attr(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for per-evaluation output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Validate { bundle } => validate(bundle),
        Command::Evaluate {
            bundle,
            url,
            method,
            action,
            target,
            attrs,
        } => evaluate(bundle, url, method, action, target, attrs),
        Command::Run {
            bundle,
            mode,
            redact,
            telemetry,
            settings,
        } => run(bundle, mode, redact, telemetry, settings),
    };

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        std::process::exit(1);
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn load_cache(bundle: &Path, refresh_interval: Duration, stale_ttl: Duration) -> TollgateResult<PolicyCache> {
    let source: Arc<dyn PolicySource> = Arc::new(BundlePolicySource::from_file(bundle)?);
    Ok(PolicyCache::new(Some(source), refresh_interval, stale_ttl))
}

fn validate(bundle: PathBuf) -> TollgateResult<()> {
    let cache = load_cache(&bundle, Duration::from_secs(60), Duration::from_secs(300))?;
    let stats = cache.stats();
    cache.stop();

    println!("Bundle:   {}", bundle.display());
    println!("Policies: {} enabled", stats.policy_count);
    println!("Rules:    {} compiled, {} skipped", stats.rule_count, stats.skipped_rules);
    println!("Hash:     {}", stats.hash.as_deref().unwrap_or("-"));
    if stats.skipped_rules > 0 {
        println!("\nSkipped rules are logged at WARN; rerun with RUST_LOG=warn to see them.");
    }
    Ok(())
}

fn evaluate(
    bundle: PathBuf,
    url: Option<String>,
    method: String,
    action: Option<String>,
    target: Option<String>,
    attrs: Vec<(String, String)>,
) -> TollgateResult<()> {
    let mut ctx = match (url, action, target) {
        (Some(url), _, _) => RequestContext::http(&url, &method.to_uppercase()),
        (None, Some(action), Some(target)) => RequestContext::action(action, target),
        _ => return Err(TollgateError::config("pass either --url or --action with --target")),
    };
    for (key, value) in attrs {
        ctx = ctx.with_attribute(key, value);
    }

    let cache = load_cache(&bundle, Duration::from_secs(60), Duration::from_secs(300))?;
    let result = cache.evaluate(&ctx);
    cache.stop();

    println!("Action:   {}", ctx.action_type.as_str());
    println!("Target:   {}", ctx.target);
    println!("Decision: {:?}", result.decision);
    println!("Reason:   {}", result.reason);
    if let Some(policy_id) = &result.policy_id {
        println!("Policy:   {}", policy_id);
    }
    Ok(())
}

fn run(
    bundle: PathBuf,
    mode: EnforcementMode,
    redact: bool,
    telemetry: bool,
    settings: Option<PathBuf>,
) -> TollgateResult<()> {
    let config = if telemetry { Some(resolve_config(settings)?) } else { None };
    let exclude_patterns = config.as_ref().map(|c| c.exclude_patterns.clone()).unwrap_or_default();

    let (refresh, stale) = config
        .as_ref()
        .map(|c| (c.refresh_interval, c.stale_ttl))
        .unwrap_or((Duration::from_secs(60), Duration::from_secs(300)));
    let cache = Arc::new(load_cache(&bundle, refresh, stale)?);
    let decider: Arc<dyn PolicyDecider> = cache.clone();

    let console = Arc::new(ConsoleSink::default());
    let client = match config {
        Some(config) => {
            let agent_name = config.agent_name.clone();
            let client = Arc::new(EventClient::new(config)?);
            if client.agent_id().is_none() {
                let id = client.register_agent(&agent_name, Some("tollgate-demo"), serde_json::json!({}))?;
                info!(agent_id = %id, "registered demo agent");
            }
            Some(client)
        }
        None => None,
    };
    let sink: Arc<dyn EventSink> = match &client {
        Some(client) => client.clone(),
        None => console.clone(),
    };

    let summary = Scenario::new(decider, sink, mode, redact, exclude_patterns).run()?;

    println!("\nSummary");
    println!("  passed:  {}", summary.passed);
    println!("  blocked: {}", summary.blocked);
    match &client {
        Some(client) => {
            println!("  events pending before close: {}", client.pending());
            client.close();
        }
        None => {
            println!("  violation events: {}", console.count(EventType::PolicyViolation));
            println!("  model events:     {}", console.count(EventType::LlmInvoke));
        }
    }

    let stats = cache.stats();
    println!(
        "  cache: {} policies, {} rules, {} rebuild(s)",
        stats.policy_count, stats.rule_count, stats.rebuilds
    );
    cache.stop();
    Ok(())
}

fn resolve_config(settings: Option<PathBuf>) -> TollgateResult<ClientConfig> {
    let settings = match settings {
        Some(path) => Settings::from_file(&path)?,
        None => Settings::default(),
    };
    settings.resolve_from_process_env()
}
