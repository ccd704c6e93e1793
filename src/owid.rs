use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::EtlError;

const OWID_BASE_URL: &str =
    "https://raw.githubusercontent.com/owid/covid-19-data/master/public/data/vaccinations";

/// The OWID vaccination tables this pipeline mirrors into the raw area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaccinationTable {
    Countries,
    AgeGroup,
    Manufacturers,
    UsStates,
    Locations,
}

impl VaccinationTable {
    /// Object name under the dated partition, as consumed downstream.
    pub fn object_name(&self) -> &'static str {
        match self {
            VaccinationTable::Countries => "countries",
            VaccinationTable::AgeGroup => "age_group",
            VaccinationTable::Manufacturers => "manufacturers",
            VaccinationTable::UsStates => "us_states",
            VaccinationTable::Locations => "locations",
        }
    }

    pub fn url(&self) -> String {
        let file = match self {
            VaccinationTable::Countries => "vaccinations.csv",
            VaccinationTable::AgeGroup => "vaccinations-by-age-group.csv",
            VaccinationTable::Manufacturers => "vaccinations-by-manufacturer.csv",
            VaccinationTable::UsStates => "us_state_vaccinations.csv",
            VaccinationTable::Locations => "locations.csv",
        };
        format!("{OWID_BASE_URL}/{file}")
    }
}

/// Push schedule for the vaccination tables. The locations table changes
/// rarely and is mirrored on its own weekly cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    pub fn tables(&self) -> &'static [VaccinationTable] {
        match self {
            Cadence::Daily => &[
                VaccinationTable::Countries,
                VaccinationTable::AgeGroup,
                VaccinationTable::Manufacturers,
                VaccinationTable::UsStates,
            ],
            Cadence::Weekly => &[VaccinationTable::Locations],
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Cadence::Daily => "raw/vaccinations/daily",
            Cadence::Weekly => "raw/vaccinations/weekly",
        }
    }
}

pub trait VaccinationFeed: Send + Sync {
    /// Fetches one table, validated as CSV, byte-identical to the source.
    fn fetch_table(&self, table: VaccinationTable) -> Result<Vec<u8>, EtlError>;
}

#[derive(Clone)]
pub struct OwidHttpClient {
    client: Client,
}

impl OwidHttpClient {
    pub fn new() -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("outbreak-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::SourceUnavailable {
                    url: OWID_BASE_URL.to_string(),
                    reason: err.to_string(),
                })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EtlError::SourceUnavailable {
                url: OWID_BASE_URL.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl VaccinationFeed for OwidHttpClient {
    fn fetch_table(&self, table: VaccinationTable) -> Result<Vec<u8>, EtlError> {
        let url = table.url();
        let unavailable = |reason: String| EtlError::SourceUnavailable {
            url: url.clone(),
            reason,
        };
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("status {}", response.status().as_u16())));
        }
        let body = response
            .bytes()
            .map_err(|err| unavailable(err.to_string()))?
            .to_vec();
        validate_csv(&url, &body)?;
        Ok(body)
    }
}

/// Checks a fetched document actually parses as CSV with a header and at
/// least one record, so truncated or HTML error bodies never reach storage.
pub fn validate_csv(url: &str, body: &[u8]) -> Result<usize, EtlError> {
    let unavailable = |reason: String| EtlError::SourceUnavailable {
        url: url.to_string(),
        reason,
    };
    let mut reader = csv::Reader::from_reader(body);
    let header_len = reader
        .headers()
        .map_err(|err| unavailable(err.to_string()))?
        .len();
    if header_len < 2 {
        return Err(unavailable("missing csv header".to_string()));
    }
    let mut rows = 0usize;
    for record in reader.records() {
        record.map_err(|err| unavailable(err.to_string()))?;
        rows += 1;
    }
    if rows == 0 {
        return Err(unavailable("csv body has no records".to_string()));
    }
    Ok(rows)
}
