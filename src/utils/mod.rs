pub mod errors;

pub use errors::{CatalogError, CatalogResult, ErrorClass, classify_message};
