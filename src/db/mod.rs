// Relational price history
pub mod sqlite;

pub use sqlite::SqlitePriceStore;
