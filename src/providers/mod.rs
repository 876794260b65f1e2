pub mod base;
pub mod firebase_provider;

// Re-export from base.rs so we can do "use crate::providers::*;"
pub use base::*;
pub use firebase_provider::FirebaseIdentityProvider;
