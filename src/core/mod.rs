mod model;
mod result;

pub use model::{
    Stage, HostStatus, DnsRecords, OpenPort, DiscoveredHost, Technology,
    SecurityHeaders, TlsInfo, LiveService, DiscoveryChannel, DiscoveredUrl,
    FormField, FormRecord, PathParameter, TimelineEvent, Infrastructure,
};
pub use result::{RunResult, RunMetadata, Statistics};
