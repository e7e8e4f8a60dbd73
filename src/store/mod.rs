pub mod engine;
pub mod envelope;
pub mod persistence;
pub mod schema;

pub use engine::{Database, LocalStore};
pub use envelope::Envelope;
pub use persistence::Persistence;
pub use schema::{IndexName, KeyValue, StoreKey, StoreName};
