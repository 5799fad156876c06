use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::config::GateConfig;
use crate::pipeline::GatePipeline;
use crate::proxy::ProxyService;
use crate::safety::SafetyFilter;

/// Shared application state accessible to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GatePipeline>,
    pub audit: Arc<AuditLogger>,
    pub config: Arc<GateConfig>,
    pub proxy: Arc<ProxyService>,
    pub safety: Arc<SafetyFilter>,
}
