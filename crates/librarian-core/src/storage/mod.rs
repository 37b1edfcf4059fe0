pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::IndexRecord;
pub use sqlite::Database;

/// File name of the output index inside the library root.
pub const INDEX_FILE_NAME: &str = "library_index.sqlite";
