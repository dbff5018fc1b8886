//! Fan-out aggregation
//!
//! Issues every resource fetch for a range concurrently and assembles the
//! results by key. A failing resource becomes an empty payload; it never
//! cancels its siblings and never fails the batch.

use futures_util::future::join_all;
use tracing::{error, info};

use crate::fetcher::ResourceSource;
use crate::types::{DateRange, RawPayloadMap, ResourceKind};

/// Fetch all eleven resource kinds for `range`.
///
/// Total API unavailability still yields a map with every kind present, each
/// mapped to an empty payload.
pub async fn aggregate<S: ResourceSource + ?Sized>(source: &S, range: DateRange) -> RawPayloadMap {
    let fetches = ResourceKind::ALL.iter().map(|kind| async move {
        let result = source.fetch(*kind, range).await;
        (*kind, result)
    });

    let mut map = RawPayloadMap::new();
    let mut failures = 0usize;
    for (kind, result) in join_all(fetches).await {
        match result {
            Ok(payload) => map.insert(kind, payload),
            Err(e) => {
                failures += 1;
                error!(resource = %kind, error = %e, "Error fetching {kind} data");
                map.mark_failed(kind);
            }
        }
    }

    info!(
        range = %range,
        failures,
        "Fetched {} of {} resources",
        ResourceKind::ALL.len() - failures,
        ResourceKind::ALL.len()
    );
    map
}
