use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! impl_key_type {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Key under which retries, fallback data and recovery state are tracked
impl_key_type!(OperationId);

// Stable identity of a media item across merges
impl_key_type!(ItemKey);

impl OperationId {
    pub const LOCAL_CATALOG: &'static str = "catalog.local";
    pub const UNIFIED_CATALOG: &'static str = "catalog.unified";

    pub fn local_catalog() -> Self {
        Self::new(Self::LOCAL_CATALOG)
    }

    pub fn unified_catalog() -> Self {
        Self::new(Self::UNIFIED_CATALOG)
    }
}

impl ItemKey {
    pub fn from_id(id: &str) -> Self {
        Self(format!("id:{}", id))
    }

    pub fn from_path(path: &str) -> Self {
        Self(format!("path:{}", path))
    }

    pub fn from_name(normalized: &str) -> Self {
        Self(format!("name:{}", normalized))
    }
}
