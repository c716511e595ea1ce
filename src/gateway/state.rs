use std::sync::Arc;

use crate::identity::IdentityAuthority;
use crate::ledger::TransferEngine;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TransferEngine>,
    /// Build revision reported by `/health`
    pub version: &'static str,
}

impl AppState {
    pub fn new(engine: Arc<TransferEngine>) -> Self {
        Self {
            engine,
            version: env!("GIT_HASH"),
        }
    }

    pub fn identity(&self) -> &Arc<dyn IdentityAuthority> {
        self.engine.identity()
    }
}
