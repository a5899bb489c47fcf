pub mod access_secret;
pub mod common;
pub mod hpa;
pub mod vpa;

pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference, role_labels, standard_labels};
