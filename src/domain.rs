use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

static LINEAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{1,3}(\.\d+)*$").unwrap());

/// A Pango lineage designation, stored uppercase (e.g. `B.1.1.7`, `AY.4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lineage(String);

impl Lineage {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Lineage {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !LINEAGE_RE.is_match(&normalized) {
            return Err(EtlError::InvalidLineage(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// ISO 3166-1 alpha-2 country code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alpha2(String);

impl Alpha2 {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alpha2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Alpha2 {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid =
            normalized.len() == 2 && normalized.chars().all(|ch| ch.is_ascii_uppercase());
        if !is_valid {
            return Err(EtlError::InvalidAlpha2(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// ISO 3166-1 alpha-3 country code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alpha3(String);

impl Alpha3 {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alpha3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Alpha3 {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid =
            normalized.len() == 3 && normalized.chars().all(|ch| ch.is_ascii_uppercase());
        if !is_valid {
            return Err(EtlError::InvalidAlpha3(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

static SUBDIVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}-[A-Z0-9]{1,3}$").unwrap());

/// ISO 3166-2 subdivision code (e.g. `US-CA`, `IN-MH`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubdivisionCode(String);

impl SubdivisionCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubdivisionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubdivisionCode {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !SUBDIVISION_RE.is_match(&normalized) {
            return Err(EtlError::InvalidSubdivision(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Location identifier accepted by the genomics API: a country alone or a
/// country qualified by one of its subdivisions (`USA` vs `USA_US-CA`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationId {
    Country(Alpha3),
    Subdivision(Alpha3, SubdivisionCode),
}

impl LocationId {
    pub fn country(alpha3: Alpha3) -> Self {
        LocationId::Country(alpha3)
    }

    pub fn subdivision(alpha3: Alpha3, code: SubdivisionCode) -> Self {
        LocationId::Subdivision(alpha3, code)
    }

    pub fn alpha3(&self) -> &Alpha3 {
        match self {
            LocationId::Country(alpha3) => alpha3,
            LocationId::Subdivision(alpha3, _) => alpha3,
        }
    }

    /// The short code a row of output is labelled with: the subdivision code
    /// when present, otherwise the country alpha-3.
    pub fn label(&self) -> &str {
        match self {
            LocationId::Country(alpha3) => alpha3.as_str(),
            LocationId::Subdivision(_, code) => code.as_str(),
        }
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationId::Country(alpha3) => write!(f, "{alpha3}"),
            LocationId::Subdivision(alpha3, code) => write!(f, "{alpha3}_{code}"),
        }
    }
}
