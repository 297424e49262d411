//! Per-search context.
//!
//! A [`Session`] holds what one search produced. Display tables are derived
//! from it on demand, so changing the period never leaves stale counts behind.

use crate::aggregate::{self, AggregateTables, PeriodFilter, RollingFrame};
use crate::equation::SearchEquation;
use crate::error::{FetchAborted, ScopusError};
use crate::record::ResultSet;
use crate::scopus::ScopusClient;
use tracing::info;

#[derive(Debug)]
pub struct Session {
    equation: SearchEquation,
    requested: usize,
    results: ResultSet,
    /// Set when the fetch stopped on an API error
    fetch_error: Option<ScopusError>,
    period: Option<PeriodFilter>,
}

impl Session {
    /// Wrap an already fetched result set.
    pub fn new(equation: SearchEquation, requested: usize, results: ResultSet) -> Self {
        Self {
            equation,
            requested,
            results,
            fetch_error: None,
            period: None,
        }
    }

    /// Run the query and keep whatever came back, including a partial result.
    pub async fn fetch(client: &ScopusClient, equation: SearchEquation, requested: usize) -> Self {
        match client.search_all(&equation, requested).await {
            Ok(results) => Self::new(equation, requested, results),
            Err(FetchAborted { partial, error }) => {
                info!(kept = partial.len(), error = %error, "Keeping partial results");
                Self {
                    fetch_error: Some(error),
                    ..Self::new(equation, requested, partial)
                }
            }
        }
    }

    pub fn equation(&self) -> &SearchEquation {
        &self.equation
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn fetch_error(&self) -> Option<&ScopusError> {
        self.fetch_error.as_ref()
    }

    /// Fetched fewer records than requested because of an error.
    pub fn is_partial(&self) -> bool {
        self.fetch_error.is_some()
    }

    pub fn period(&self) -> Option<&PeriodFilter> {
        self.period.as_ref()
    }

    pub fn set_period(&mut self, period: Option<PeriodFilter>) {
        self.period = period;
    }

    /// Tables for the active period.
    pub fn tables(&self) -> AggregateTables {
        aggregate::build(&self.results, self.period.as_ref())
    }

    /// Tables for an explicit period, ignoring the active one.
    pub fn tables_for(&self, period: Option<&PeriodFilter>) -> AggregateTables {
        aggregate::build(&self.results, period)
    }

    /// Animation frames for the active period.
    pub fn frames(&self, window: usize) -> Vec<RollingFrame> {
        aggregate::rolling_frames(&self.results, self.period.as_ref(), window)
    }
}
