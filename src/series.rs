use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;
use crate::smooth;

/// One dated observation. `None` marks a day the source reported nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl TimeSeriesPoint {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        Self { date, value }
    }
}

/// A per-entity series of observations, ordered by date from construction.
/// Smoothing is position-sensitive, so ordering is enforced here rather than
/// at each call site.
#[derive(Debug, Clone)]
pub struct EntitySeries {
    entity: String,
    metric: String,
    points: Vec<TimeSeriesPoint>,
}

impl EntitySeries {
    pub fn new(
        entity: impl Into<String>,
        metric: impl Into<String>,
        mut points: Vec<TimeSeriesPoint>,
    ) -> Result<Self, EtlError> {
        let entity = entity.into();
        let metric = metric.into();
        points.sort_by_key(|point| point.date);
        for pair in points.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(EtlError::DuplicateObservation {
                    series: format!("{entity}/{metric}"),
                    date: pair[0].date,
                });
            }
        }
        Ok(Self {
            entity,
            metric,
            points,
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|point| point.date).collect()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|point| point.value).collect()
    }

    /// Zero-fills gaps and smooths in place order: the pass applied to
    /// prevalence series before publication.
    pub fn smoothed(&self, sigma: f64) -> Vec<f64> {
        smooth::gaussian_smooth(&smooth::fill_missing(&self.values()), sigma)
    }

    /// Treats the series as cumulative, converts to daily increments, then
    /// smooths: the pass applied to policy-tracker case/death counts.
    pub fn daily_smoothed(&self, sigma: f64) -> Vec<f64> {
        smooth::gaussian_smooth(&smooth::daily_from_cumulative(&self.values()), sigma)
    }

    /// Zero-fills, takes a trailing mean over `window` days, then smooths:
    /// the pass applied to lineage prevalence in the risk table.
    pub fn rolling_smoothed(&self, window: usize, sigma: f64) -> Vec<f64> {
        let filled = smooth::fill_missing(&self.values());
        smooth::gaussian_smooth(&smooth::trailing_mean(&filled, window), sigma)
    }
}
