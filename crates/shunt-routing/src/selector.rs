//! The destination selector variant.

use shunt_core::Endpoint;

use crate::dest_cache::CacheDestinations;
use crate::destination::{ConnectOutcome, StaticDestinations};
use crate::error::SelectResult;

/// Where a route's backends come from.
///
/// A tagged variant rather than a trait object: the strategy is fixed
/// per route at configuration time and there are exactly two.
#[derive(Debug)]
pub enum DestinationSelector {
    Static(StaticDestinations),
    MetadataCache(CacheDestinations),
}

impl DestinationSelector {
    /// Yield the next backend address for an incoming connection.
    pub async fn next_backend(&self) -> SelectResult<Endpoint> {
        match self {
            DestinationSelector::Static(dest) => dest.next(),
            DestinationSelector::MetadataCache(dest) => dest.next().await,
        }
    }

    /// Report how dialing a previously yielded endpoint went.
    pub fn report_connect_result(&self, endpoint: &Endpoint, outcome: ConnectOutcome) {
        match self {
            DestinationSelector::Static(dest) => dest.report_connect_result(endpoint, outcome),
            DestinationSelector::MetadataCache(dest) => {
                dest.report_connect_result(endpoint, outcome)
            }
        }
    }

    /// Upper bound on how many distinct backends are worth trying for
    /// one client connection.
    pub fn attempt_cap(&self) -> usize {
        match self {
            DestinationSelector::Static(dest) => dest.len().max(1),
            DestinationSelector::MetadataCache(dest) => dest.candidate_count().max(1),
        }
    }
}
