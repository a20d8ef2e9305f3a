use std::sync::Arc;

use credential_core::CredentialOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CredentialOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<CredentialOrchestrator>) -> Self {
        Self { orchestrator }
    }
}
