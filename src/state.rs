use crate::admission::AdmissionControl;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;

// app's shared state
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub trust_forwarded_for: bool, // key clients by X-Forwarded-For
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn admission(&self) -> &Arc<AdmissionControl> {
        self.orchestrator.admission()
    }
}
