mod identifiers;
pub mod loading;
pub mod media_item;
pub mod status;

pub use identifiers::{ItemKey, OperationId};
pub use loading::{
    LoadErrorEntry, LoadingState, PerformanceMetrics, Phase, SourceProgress, SourceState,
};
pub use media_item::{Availability, MediaItem, MediaType, normalize_title};
pub use status::{
    ConnectivityMode, OverallHealth, ProbeMethod, ServiceName, ServiceStatus, SystemHealth,
};
