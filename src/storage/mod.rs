//! Settings and profile persistence.
//!
//! Handles saving and loading the settings document to/from disk,
//! including tolerant loading of partially valid documents.

pub mod defaults;
pub mod profiles;
pub mod types;

// Re-export commonly used items
pub use defaults::{load_document, sanitize};
pub use profiles::*;
pub use types::*;
