pub mod authenticator;
pub mod persistence;
pub mod retry;

pub use authenticator::Authenticator;
pub use persistence::AuthStateFile;
pub use retry::AuthRetryExecutor;
