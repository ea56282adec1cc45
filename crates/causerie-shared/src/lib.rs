//! # causerie-shared
//!
//! Domain models, configuration, and guest-session identity shared by the
//! Causerie widget crates.
//!
//! Every model struct derives `Serialize`/`Deserialize` with field names
//! matching the hosted row tables, so rows deserialize directly without a
//! mapping layer.

pub mod config;
pub mod constants;
pub mod models;
pub mod session;

mod error;

pub use config::WidgetConfig;
pub use error::{ValidationError, WidgetError};
pub use models::*;
pub use session::SessionFile;
