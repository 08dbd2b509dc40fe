mod backends;
mod client;
mod result;
mod transport;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub use backends::{HttpTransport, StubTransport};
pub use client::{
    Completion, DetectionClient, DispatchPhase, InFlightFlag, StagingTimer, StagingWait,
    DEFAULT_STAGING_DELAY,
};
pub use result::{Classification, ThreatLabel, DANGEROUS_LABEL};
pub use transport::DetectionTransport;

/// Build the transport for an endpoint: `stub://...` or `http(s)://...`.
pub fn transport_for_endpoint(
    endpoint: &str,
    timeout: Duration,
) -> Result<Arc<dyn DetectionTransport>> {
    if endpoint.starts_with("stub://") {
        return Ok(Arc::new(StubTransport::from_endpoint(endpoint)?));
    }
    Ok(Arc::new(HttpTransport::new(endpoint, timeout)?))
}
