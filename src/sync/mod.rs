pub mod modlist_store;
pub mod ownership;

pub use modlist_store::ModlistStore;
pub use ownership::OwnershipRegistry;
