//! Shared state for the ambient routes (health, readiness).

use crate::config::ModelRegistry;
use crate::query::Repository;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub models: Arc<ModelRegistry>,
}
