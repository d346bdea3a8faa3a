//! Startup assembly: validate config, load the playbook, wire injected
//! backends into the shared state, and run the server with its
//! background sweeps.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};

use rtc_domain::config::{Config, ConfigSeverity};
use rtc_playbook::{IntentClassifier, Playbook, PlaybookEngine};
use rtc_providers::RetryPolicy;
use rtc_sessions::SessionRegistry;

use crate::hooks::{HookBus, HookObserver, TracingObserver};
use crate::runtime::cancel::CancelMap;
use crate::runtime::tools::ToolRegistry;
use crate::runtime::SessionCommand;
use crate::state::{AppState, ConnectionMap, ProviderSet};
use crate::transport::PeerTransport;

/// Everything an embedder injects. `Default` gives a bare server: no
/// backends, no tools, no playbook — useful for `config validate` and
/// protocol-level testing.
#[derive(Default)]
pub struct Bootstrap {
    pub providers: ProviderSet,
    pub tools: ToolRegistry,
    /// Pre-built engine (with registered predicates/hooks); when `None`,
    /// `playbook.path` from the config is loaded instead.
    pub playbook: Option<PlaybookEngine>,
    pub classifier: Option<Arc<dyn IntentClassifier>>,
    pub peer: Option<Arc<dyn PeerTransport>>,
    /// Observers appended after the default tracing observer.
    pub observers: Vec<Box<dyn HookObserver>>,
}

/// Validate the config and assemble the shared state.
pub fn build_state(config: Config, parts: Bootstrap) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Playbook ─────────────────────────────────────────────────────
    let playbook = match parts.playbook {
        Some(engine) => Some(engine),
        None => match &config.playbook.path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading playbook {}", path.display()))?;
                let pb: Playbook = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing playbook {}", path.display()))?;
                Some(PlaybookEngine::new(pb))
            }
            None => None,
        },
    };
    let playbook = match playbook {
        Some(engine) => {
            let issues = engine.validate();
            if !issues.is_empty() {
                for issue in &issues {
                    tracing::error!("playbook: {issue}");
                }
                anyhow::bail!("playbook validation failed with {} issue(s)", issues.len());
            }
            tracing::info!(
                playbook_id = %engine.playbook().id,
                stages = engine.playbook().stages.len(),
                transitions = engine.playbook().transitions.len(),
                "playbook loaded"
            );
            Some(Arc::new(engine))
        }
        None => None,
    };

    // ── Observability ────────────────────────────────────────────────
    let mut observers: Vec<Box<dyn HookObserver>> = vec![Box::new(TracingObserver)];
    observers.extend(parts.observers);
    let hooks = HookBus::new(observers);

    // ── Sessions ─────────────────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new(&config.session));
    tracing::info!(
        ttl_secs = config.session.ttl_secs,
        history_limit = config.session.history_limit,
        "session registry ready"
    );

    // ── Providers ────────────────────────────────────────────────────
    for (name, missing) in [
        ("STT", parts.providers.stt.is_none()),
        ("LLM", parts.providers.llm.is_none()),
        ("TTS", parts.providers.tts.is_none()),
    ] {
        if missing {
            tracing::warn!(
                "no {name} provider injected — the gateway will run but turns \
                 needing it will fail"
            );
        }
    }

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.server.api_token_env, "API bearer-token auth enabled");
            Some(Arc::new(Sha256::digest(token.as_bytes()).to_vec()))
        }
        _ => {
            tracing::warn!(
                env_var = %config.server.api_token_env,
                "API bearer-token auth DISABLED — set the env var to enable"
            );
            None
        }
    };

    let retry = RetryPolicy::from(&config.llm.retry);

    Ok(AppState {
        config: Arc::new(config),
        providers: parts.providers,
        retry,
        registry,
        connections: Arc::new(ConnectionMap::default()),
        cancel_map: Arc::new(CancelMap::new()),
        tools: Arc::new(parts.tools),
        playbook,
        classifier: parts.classifier,
        hooks,
        peer: parts.peer,
        api_token_hash,
    })
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    spawn_eviction_sweep(state.clone());

    let cors_layer = build_cors_layer(&state.config.server.cors);
    let max_concurrent = state.config.server.max_concurrent;

    // ── Rate-limit layer (per-IP token bucket via governor) ──────────
    let governor_layer = state.config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );
        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });

    let router = crate::api::router()
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = match governor_layer {
        Some(gov) => router.layer(gov).with_state(state.clone()),
        None => router.with_state(state.clone()),
    };

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "llmrtc listening");

    axum::serve(listener, app).await.context("axum server error")
}

/// Periodic TTL sweep: evict idle sessions (never one with a running
/// turn) and tear down their runtimes.
fn spawn_eviction_sweep(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            state.config.session.evict_interval_secs,
        ));
        loop {
            interval.tick().await;
            let cancel_map = state.cancel_map.clone();
            let evicted = state
                .registry
                .evict_expired(|id| cancel_map.is_running(id));
            for id in evicted {
                if let Some(link) = state.connections.remove(&id) {
                    let _ = link.cmd_tx.send(SessionCommand::Close);
                    link.mux.unbind_reliable();
                    link.mux.unbind_media();
                }
            }
        }
    });
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a `:*` port wildcard (e.g. `http://localhost:*`),
/// expanded into a predicate matching any numeric port on that host. A
/// literal `"*"` allows all origins (not recommended).
fn build_cors_layer(cors: &rtc_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            // The remainder after the prefix must be digits only, so
            // "http://localhost:3000.evil.com" cannot sneak through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
