//! Shared services built on the database layer

mod store;

pub use store::OfflineStore;
