use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::warn;

use crate::error::EtlError;

pub const OXCGRT_LATEST_URL: &str =
    "https://raw.githubusercontent.com/OxCGRT/covid-policy-tracker/master/data/OxCGRT_latest.csv";

pub const NAT_TOTAL: &str = "NAT_TOTAL";
pub const STATE_TOTAL: &str = "STATE_TOTAL";

/// The policy-tracker columns this pipeline consumes. Region codes stay
/// text so values with leading zeros survive intact.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRow {
    pub country_name: String,
    pub country_code: String,
    pub region_name: Option<String>,
    pub region_code: Option<String>,
    pub jurisdiction: String,
    pub date: NaiveDate,
    pub confirmed_cases: Option<f64>,
    pub confirmed_deaths: Option<f64>,
}

impl PolicyRow {
    pub fn is_national(&self) -> bool {
        self.jurisdiction == NAT_TOTAL
    }

    pub fn is_state(&self) -> bool {
        self.jurisdiction == STATE_TOTAL
    }
}

#[derive(Debug, Deserialize)]
struct PolicyRowWire {
    #[serde(rename = "CountryName")]
    country_name: String,
    #[serde(rename = "CountryCode")]
    country_code: String,
    #[serde(rename = "RegionName")]
    region_name: Option<String>,
    #[serde(rename = "RegionCode")]
    region_code: Option<String>,
    #[serde(rename = "Jurisdiction")]
    jurisdiction: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "ConfirmedCases")]
    confirmed_cases: Option<f64>,
    #[serde(rename = "ConfirmedDeaths")]
    confirmed_deaths: Option<f64>,
}

pub trait PolicyFeed: Send + Sync {
    fn fetch_policy_rows(&self) -> Result<Vec<PolicyRow>, EtlError>;
}

#[derive(Clone)]
pub struct OxcgrtHttpClient {
    client: Client,
}

impl OxcgrtHttpClient {
    pub fn new() -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("outbreak-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::SourceUnavailable {
                    url: OXCGRT_LATEST_URL.to_string(),
                    reason: err.to_string(),
                })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| EtlError::SourceUnavailable {
                url: OXCGRT_LATEST_URL.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl PolicyFeed for OxcgrtHttpClient {
    fn fetch_policy_rows(&self) -> Result<Vec<PolicyRow>, EtlError> {
        let unavailable = |reason: String| EtlError::SourceUnavailable {
            url: OXCGRT_LATEST_URL.to_string(),
            reason,
        };
        let response = self
            .client
            .get(OXCGRT_LATEST_URL)
            .send()
            .map_err(|err| unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("status {}", response.status().as_u16())));
        }
        let body = response.text().map_err(|err| unavailable(err.to_string()))?;
        parse_policy_csv(&body)
    }
}

/// Parses the policy-tracker CSV, ignoring the many indicator columns this
/// pipeline does not use. Rows that fail to parse are dropped with a
/// warning; only a fully unusable body is an error.
pub fn parse_policy_csv(body: &str) -> Result<Vec<PolicyRow>, EtlError> {
    let unavailable = |reason: String| EtlError::SourceUnavailable {
        url: OXCGRT_LATEST_URL.to_string(),
        reason,
    };
    let mut rows = Vec::new();
    let mut dropped = 0usize;
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    for wire in reader.deserialize::<PolicyRowWire>() {
        let wire = match wire {
            Ok(wire) => wire,
            Err(_) => {
                dropped += 1;
                continue;
            }
        };
        let Ok(date) = NaiveDate::parse_from_str(wire.date.trim(), "%Y%m%d") else {
            dropped += 1;
            continue;
        };
        rows.push(PolicyRow {
            country_name: wire.country_name,
            country_code: wire.country_code,
            region_name: wire.region_name.filter(|name| !name.is_empty()),
            region_code: wire.region_code.filter(|code| !code.is_empty()),
            jurisdiction: wire.jurisdiction,
            date,
            confirmed_cases: wire.confirmed_cases,
            confirmed_deaths: wire.confirmed_deaths,
        });
    }
    if dropped > 0 {
        warn!(dropped, "dropped unparseable policy-tracker rows");
    }
    if rows.is_empty() {
        return Err(unavailable("no usable rows in policy-tracker csv".to_string()));
    }
    Ok(rows)
}
