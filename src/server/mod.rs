pub mod handlers;
pub mod router;
pub mod state;

use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::config::{GateConfig, TokenBackend};
use crate::error::{GateError, Result};
use crate::pipeline::GatePipeline;
use crate::policy::PolicyEngine;
use crate::proxy::ProxyService;
use crate::safety::{SafetyFilter, SafetyMode};
use crate::token::{MemoryTokenStore, RemoteTokenStore, TokenStore};

pub use state::AppState;

/// Wire up all subsystems from the loaded configuration.
pub async fn build_state(config: GateConfig) -> Result<AppState> {
    let config = Arc::new(config);

    let policy = PolicyEngine::load(&config.policy_path)?;
    tracing::info!(version = policy.version(), "Loaded policy document");

    let store: Arc<dyn TokenStore> = match config.token_backend {
        TokenBackend::Memory => {
            let store = MemoryTokenStore::new(config.token_ttl);
            store.spawn_sweeper();
            Arc::new(store)
        }
        TokenBackend::Remote => {
            let url = config.remote_url.as_deref().ok_or_else(|| {
                GateError::Config("REMOTE_URL is required for the remote backend".to_string())
            })?;
            let key = config.encryption_key.as_deref().ok_or_else(|| {
                GateError::Config("ENCRYPTION_KEY is required for the remote backend".to_string())
            })?;
            Arc::new(RemoteTokenStore::connect(url, key).await?)
        }
    };
    tracing::info!(backend = config.token_backend.as_str(), "Token store ready");

    let pipeline = Arc::new(GatePipeline::new(&config, policy, store)?);
    let audit = Arc::new(AuditLogger::new(&config.audit_path, &config.siem).await?);
    let safety = Arc::new(SafetyFilter::new(SafetyMode::parse(&config.safety_mode))?);
    let proxy = Arc::new(ProxyService::new(
        pipeline.clone(),
        audit.clone(),
        config.clone(),
        safety.clone(),
    )?);

    Ok(AppState {
        pipeline,
        audit,
        config,
        proxy,
        safety,
    })
}

/// Start the HTTP server with the given configuration.
pub async fn start(config: GateConfig) -> Result<()> {
    let bind_addr = config.bind_address();
    let state = build_state(config).await?;
    let app = router::build(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| GateError::Config(format!("Failed to bind to {bind_addr}: {e}")))?;

    tracing::info!("Server listening on {bind_addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| GateError::Config(format!("Server error: {e}")))?;

    Ok(())
}
