pub mod http;
pub mod traits;

pub use http::HttpCatalogBackend;
pub use http::errors::ApiError;
pub use http::types::{CatalogResponse, ServiceReport, StatusReport};
pub use traits::{CatalogBackend, CatalogMode, CatalogQuery};
