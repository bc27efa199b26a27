//! Store selection.
//!
//! A [`Resolver`] is an ordered list of families plus a retry policy. It
//! holds no stores: every [`Resolver::resolve`] builds fresh ones, so no
//! descriptor cache outlives the tree it was read from.

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::fetcher::Fetcher;
use crate::retry::RetryPolicy;
use crate::store::{DistroFamily, Store, StoreContext};

#[derive(Debug, Clone)]
pub struct Resolver {
    families: Vec<DistroFamily>,
    retry: RetryPolicy,
}

impl Resolver {
    pub fn new(families: Vec<DistroFamily>, retry: RetryPolicy) -> Self {
        Self { families, retry }
    }

    /// All known families in their standard probe order.
    pub fn standard(retry: RetryPolicy) -> Self {
        Self::new(DistroFamily::STANDARD_ORDER.to_vec(), retry)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::standard(RetryPolicy::from(&config.retry))
    }

    pub fn families(&self) -> &[DistroFamily] {
        &self.families
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// First store, in declared order, that recognizes the tree. With a
    /// `filter`, only that family is tried.
    pub fn resolve(
        &self,
        fetcher: &mut dyn Fetcher,
        ctx: &StoreContext,
        filter: Option<DistroFamily>,
    ) -> Result<Box<dyn Store>> {
        let candidates = self
            .families
            .iter()
            .copied()
            .filter(|f| filter.map_or(true, |wanted| wanted == *f));

        for family in candidates {
            let mut store = family.store(ctx);
            debug!(family = %family, "probing");
            let probed = self
                .retry
                .run(family.name(), || store.is_valid_store(fetcher));
            match probed {
                Ok(true) => {
                    info!(family = %family, location = %fetcher.location(), "install tree recognized");
                    return Ok(store);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(family = %family, error = %e, "probe failed; trying next family");
                }
            }
        }

        Err(FetchError::NoMatchingStore {
            location: fetcher.location().to_string(),
        })
    }
}
