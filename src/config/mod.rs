// This module re-exports the config pieces so callers can do
// "use crate::config::*;"
pub mod config;
pub mod identity;
pub mod logging;
pub mod store;

pub use config::*;
pub use identity::*;
pub use logging::*;
pub use store::*;
