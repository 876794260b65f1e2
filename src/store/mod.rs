pub mod base;
pub mod emulator;
pub mod realtime_database;

// Re-export the primary store items so code outside can do
// "use crate::store::{BackingStore, create_store};"
pub use base::{create_store, BackingStore, DbPath, MultiPathUpdate};
pub use emulator::Emulator;
pub use realtime_database::RealtimeDatabase;
