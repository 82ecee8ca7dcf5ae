pub mod probes;
pub mod registry;

pub use probes::{
    DirectHttpProbe, DnsCheck, EndpointServiceProbe, HttpCheck, NetworkProbe, ReachabilityCheck,
    ServiceProbe, TcpCheck,
};
pub use registry::{CheckOptions, ServiceStatusRegistry, StatusSettings};
