pub mod cancel;
pub mod http_helpers;
pub mod log_throttle;
pub mod logger;

pub use cancel::cancellable;
pub use http_helpers::{ensure_online, response_text};
