use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::{Conductor, ConductorId};

/// Application-scoped values built once at startup and handed to whoever
/// needs them.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    conductors: Arc<HashMap<ConductorId, Conductor>>,
}

impl AppContext {
    pub fn new(config: AppConfig, conductors: Vec<Conductor>) -> Self {
        Self {
            config: Arc::new(config),
            conductors: Arc::new(conductors.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub fn conductor(&self, id: &ConductorId) -> Option<&Conductor> {
        self.conductors.get(id)
    }

    pub fn conductor_name(&self, id: &ConductorId) -> String {
        self.conductor(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn roster_len(&self) -> usize {
        self.conductors.len()
    }
}
