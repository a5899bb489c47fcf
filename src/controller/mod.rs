pub mod context;
pub mod error;
pub mod reconciler;
pub mod status;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{FINALIZER, RESYNC_INTERVAL, error_policy, reconcile};
pub use status::{ConditionBuilder, StatusManager, spec_changed};
pub use validation::{MAX_REPLICAS, MIN_REPLICAS, validate_spec};
