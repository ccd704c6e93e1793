use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::{Lineage, LocationId};
use crate::error::EtlError;

pub const DEFAULT_BASE_URL: &str = "https://api.outbreak.info/genomics";

/// One day of prevalence for a single queried lineage.
#[derive(Debug, Clone, Deserialize)]
pub struct PrevalencePoint {
    pub date: NaiveDate,
    #[serde(default)]
    pub proportion: Option<f64>,
}

/// One (day, lineage) observation from the all-lineages endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LineagePrevalencePoint {
    pub date: NaiveDate,
    pub lineage: String,
    #[serde(default)]
    pub prevalence_rolling: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

pub trait GenomicsApi: Send + Sync {
    fn prevalence_by_location(
        &self,
        location: &LocationId,
        lineage: &Lineage,
    ) -> Result<Vec<PrevalencePoint>, EtlError>;

    fn all_lineage_prevalence(
        &self,
        location: &LocationId,
        ndays: usize,
    ) -> Result<Vec<LineagePrevalencePoint>, EtlError>;
}

#[derive(Clone)]
pub struct OutbreakHttpClient {
    client: Client,
    base_url: String,
}

impl OutbreakHttpClient {
    pub fn new() -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("outbreak-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::SourceUnavailable {
                    url: DEFAULT_BASE_URL.to_string(),
                    reason: err.to_string(),
                })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EtlError::SourceUnavailable {
                url: DEFAULT_BASE_URL.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    fn prevalence_url(&self, location: &LocationId, lineage: &Lineage) -> String {
        format!(
            "{}/prevalence-by-location?location_id={location}&pangolin_lineage={lineage}",
            self.base_url
        )
    }

    fn all_lineages_url(&self, location: &LocationId, ndays: usize) -> String {
        format!(
            "{}/prevalence-by-location-all-lineages?location_id={location}&ndays={ndays}",
            self.base_url
        )
    }

    fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, EtlError> {
        let unavailable = |reason: String| EtlError::SourceUnavailable {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("status {}", response.status().as_u16())));
        }
        let body = response.text().map_err(|err| unavailable(err.to_string()))?;
        parse_envelope(url, &body)
    }
}

fn parse_envelope<T: DeserializeOwned>(url: &str, body: &str) -> Result<Vec<T>, EtlError> {
    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|err| EtlError::SourceUnavailable {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
    if !envelope.success {
        return Err(EtlError::SourceUnavailable {
            url: url.to_string(),
            reason: "api reported success=false".to_string(),
        });
    }
    Ok(envelope.results)
}

impl GenomicsApi for OutbreakHttpClient {
    fn prevalence_by_location(
        &self,
        location: &LocationId,
        lineage: &Lineage,
    ) -> Result<Vec<PrevalencePoint>, EtlError> {
        self.fetch(&self.prevalence_url(location, lineage))
    }

    fn all_lineage_prevalence(
        &self,
        location: &LocationId,
        ndays: usize,
    ) -> Result<Vec<LineagePrevalencePoint>, EtlError> {
        self.fetch(&self.all_lineages_url(location, ndays))
    }
}
