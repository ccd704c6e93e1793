use std::collections::HashMap;
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;

use crate::domain::{Alpha2, Alpha3, SubdivisionCode};
use crate::error::EtlError;

const COUNTRIES_CSV: &str = include_str!("../data/iso3166_countries.csv");
const SUBDIVISIONS_CSV: &str = include_str!("../data/iso3166_subdivisions.csv");

#[derive(Debug, Clone)]
pub struct CountryRecord {
    pub name: String,
    pub alpha2: Alpha2,
    pub alpha3: Alpha3,
}

#[derive(Debug, Clone)]
pub struct SubdivisionRecord {
    pub code: SubdivisionCode,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct CountryRow {
    name: String,
    alpha2: String,
    alpha3: String,
}

#[derive(Debug, Deserialize)]
struct SubdivisionRow {
    country: String,
    code: String,
    name: String,
}

/// Country and subdivision lookup built from the bundled ISO 3166 tables.
/// Parsed once at startup, read-only afterwards.
#[derive(Debug)]
pub struct Directory {
    countries: Vec<CountryRecord>,
    index: HashMap<String, usize>,
    subdivisions: HashMap<String, Vec<SubdivisionRecord>>,
}

impl Directory {
    pub fn bundled() -> Result<Self, EtlError> {
        Self::parse(COUNTRIES_CSV, SUBDIVISIONS_CSV)
    }

    fn parse(countries_csv: &str, subdivisions_csv: &str) -> Result<Self, EtlError> {
        let mut countries = Vec::new();
        let mut index = HashMap::new();
        let mut reader = csv::Reader::from_reader(countries_csv.as_bytes());
        for row in reader.deserialize() {
            let row: CountryRow =
                row.map_err(|err| EtlError::Reference(format!("country table: {err}")))?;
            let record = CountryRecord {
                alpha2: row.alpha2.parse()?,
                alpha3: row.alpha3.parse()?,
                name: row.name,
            };
            let position = countries.len();
            index.insert(record.name.to_lowercase(), position);
            index.insert(record.alpha2.as_str().to_lowercase(), position);
            index.insert(record.alpha3.as_str().to_lowercase(), position);
            countries.push(record);
        }

        let mut subdivisions: HashMap<String, Vec<SubdivisionRecord>> = HashMap::new();
        let mut reader = csv::Reader::from_reader(subdivisions_csv.as_bytes());
        for row in reader.deserialize() {
            let row: SubdivisionRow =
                row.map_err(|err| EtlError::Reference(format!("subdivision table: {err}")))?;
            let country: Alpha2 = row.country.parse()?;
            subdivisions
                .entry(country.as_str().to_string())
                .or_default()
                .push(SubdivisionRecord {
                    code: row.code.parse()?,
                    name: row.name,
                });
        }

        Ok(Self {
            countries,
            index,
            subdivisions,
        })
    }

    /// Looks a country up by official name, alpha-2, or alpha-3,
    /// case-insensitively.
    pub fn resolve(&self, query: &str) -> Result<&CountryRecord, EtlError> {
        self.index
            .get(&query.trim().to_lowercase())
            .map(|position| &self.countries[*position])
            .ok_or_else(|| EtlError::UnknownLocation(query.to_string()))
    }

    /// Subdivision codes of a country; empty for countries the bundled table
    /// has no entries for, which downstream treats as country-level only.
    pub fn subdivisions_of(&self, alpha2: &Alpha2) -> &[SubdivisionRecord] {
        self.subdivisions
            .get(alpha2.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

}

#[derive(Debug, Deserialize)]
struct PopulationRow {
    #[serde(rename = "CountryCode")]
    country_code: String,
    #[serde(rename = "Population")]
    population: Option<f64>,
}

/// Country population reference loaded from the configured CSV. Duplicate
/// codes keep the largest figure.
#[derive(Debug, Default)]
pub struct PopulationTable {
    by_alpha3: HashMap<String, f64>,
}

impl PopulationTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Utf8Path) -> Result<Self, EtlError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, EtlError> {
        let mut by_alpha3: HashMap<String, f64> = HashMap::new();
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        for row in reader.deserialize() {
            let row: PopulationRow =
                row.map_err(|err| EtlError::Reference(format!("population table: {err}")))?;
            let Some(population) = row.population else {
                continue;
            };
            let code = row.country_code.trim().to_uppercase();
            by_alpha3
                .entry(code)
                .and_modify(|existing| *existing = existing.max(population))
                .or_insert(population);
        }
        Ok(Self { by_alpha3 })
    }

    pub fn population_of(&self, alpha3: &Alpha3) -> Option<f64> {
        self.by_alpha3.get(alpha3.as_str()).copied()
    }
}
