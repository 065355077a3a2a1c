pub mod in_memory;
pub mod sqlite_store;

pub use in_memory::InMemoryVerdictStore;
pub use sqlite_store::SqliteVerdictStore;
