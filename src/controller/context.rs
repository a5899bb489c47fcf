use std::sync::Arc;

use crate::config::CoordinatorTuning;
use crate::controller::error::BackoffConfig;
use crate::health::HealthState;
use crate::store::ObjectStore;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// API access for every object the controller reads or writes
    pub store: Arc<dyn ObjectStore>,
    /// Metrics sink, absent in tests
    pub health_state: Option<Arc<HealthState>>,
    /// Operator-wide coordination constants
    pub tuning: CoordinatorTuning,
    pub backoff: BackoffConfig,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, tuning: CoordinatorTuning) -> Self {
        Self {
            store,
            health_state: None,
            tuning,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_health(mut self, health_state: Option<Arc<HealthState>>) -> Self {
        self.health_state = health_state;
        self
    }
}
