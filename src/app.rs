use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::align::{DateSpine, EntityMeta, WideTable};
use crate::domain::{Alpha3, Lineage, LocationId};
use crate::error::EtlError;
use crate::families::{aggregate, stock_rules};
use crate::outbreak::{GenomicsApi, LineagePrevalencePoint};
use crate::owid::{Cadence, VaccinationFeed};
use crate::oxford::{PolicyFeed, PolicyRow};
use crate::partition::{self, DEFAULT_LOOKBACK_DAYS};
use crate::reference::{Directory, PopulationTable};
use crate::series::{EntitySeries, TimeSeriesPoint};
use crate::smooth;
use crate::storage::ObjectStore;
use crate::writer::{
    CsvDocument, WriteOutcome, stack_family_tables, stack_wide_tables, write_csv_object,
};

pub const VARIANT_PREFIX: &str = "interim/variants";
pub const POLICY_PREFIX: &str = "processed/oxford_all";
pub const RISK_TABLE_KEY: &str = "processed/risk-calculator-data/OxCGRT_latest.csv";
pub const FAMILY_TABLE_KEY: &str = "processed/risk-calculator-data/variant_families.csv";
pub const US_CASES_DEATHS_KEY: &str =
    "processed/risk-calculator-data/USStates_confirmed_cases_deaths.csv";

const VARIANT_SIGMA: f64 = 7.0;
const POLICY_SIGMA: f64 = 7.0;
const RISK_ROLLING_WINDOW: usize = 14;
const RISK_SIGMA: f64 = 5.0;

/// Prefixes whose latest date partition can be mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTopic {
    Variants,
    VaccinationsDaily,
    VaccinationsWeekly,
    Policy,
}

impl DownloadTopic {
    pub fn prefix(&self) -> &'static str {
        match self {
            DownloadTopic::Variants => "interim/variants",
            DownloadTopic::VaccinationsDaily => "raw/vaccinations/daily",
            DownloadTopic::VaccinationsWeekly => "raw/vaccinations/weekly",
            DownloadTopic::Policy => "processed/oxford_all",
        }
    }
}

#[derive(Debug, Default)]
pub struct PushReport {
    pub written: Vec<String>,
    pub rejected: Vec<String>,
    pub skipped: Vec<String>,
}

impl PushReport {
    fn record(&mut self, key: &str, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => self.written.push(key.to_string()),
            WriteOutcome::Skipped => self.skipped.push(key.to_string()),
            WriteOutcome::Rejected(_) => self.rejected.push(key.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct VariantPush {
    pub key: String,
    pub outcome: WriteOutcome,
    pub missing_locations: Vec<String>,
}

#[derive(Debug, Default)]
pub struct VariantBatchSummary {
    pub countries: usize,
    pub pushes: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub struct RiskTableReport {
    pub entities: usize,
    pub skipped: Vec<String>,
    pub table: WriteOutcome,
    pub families: WriteOutcome,
}

#[derive(Debug)]
pub struct DownloadReport {
    pub date: NaiveDate,
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
}

/// The pipeline itself, generic over its collaborators so every operation
/// runs against mocks in tests and HTTP clients plus a real bucket in
/// production.
pub struct App<G: GenomicsApi, V: VaccinationFeed, P: PolicyFeed, S: ObjectStore> {
    genomics: G,
    vaccinations: V,
    policy: P,
    store: S,
    directory: Directory,
    population: PopulationTable,
}

impl<G: GenomicsApi, V: VaccinationFeed, P: PolicyFeed, S: ObjectStore> App<G, V, P, S> {
    pub fn new(
        genomics: G,
        vaccinations: V,
        policy: P,
        store: S,
        directory: Directory,
        population: PopulationTable,
    ) -> Self {
        Self {
            genomics,
            vaccinations,
            policy,
            store,
            directory,
            population,
        }
    }

    /// Per-subdivision prevalence for one lineage, smoothed and stacked into
    /// one object. Subdivisions without data are reported, never fatal.
    pub fn variant_series_by_subdivision(
        &self,
        country: &str,
        lineage: &Lineage,
        date: NaiveDate,
    ) -> Result<VariantPush, EtlError> {
        let record = self.directory.resolve(country)?;
        let mut document = CsvDocument::new(variant_columns());
        let mut missing = Vec::new();
        for subdivision in self.directory.subdivisions_of(&record.alpha2) {
            let location =
                LocationId::subdivision(record.alpha3.clone(), subdivision.code.clone());
            match self.fetch_prevalence_series(&location, lineage) {
                Ok(series) if series.is_empty() => missing.push(subdivision.code.to_string()),
                Ok(series) => append_variant_rows(&mut document, &series, lineage),
                Err(err) if err.is_entity_fault() => {
                    warn!(location = %location, error = %err, "skipping subdivision");
                    missing.push(subdivision.code.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        let key = variant_object_key(date, lineage, &record.alpha3, false);
        let outcome = write_csv_object(&self.store, &key, &document)?;
        Ok(VariantPush {
            key,
            outcome,
            missing_locations: missing,
        })
    }

    /// Country-level prevalence for one lineage.
    pub fn variant_series_for_country(
        &self,
        country: &str,
        lineage: &Lineage,
        date: NaiveDate,
    ) -> Result<VariantPush, EtlError> {
        let record = self.directory.resolve(country)?;
        let location = LocationId::country(record.alpha3.clone());
        let series = self.fetch_prevalence_series(&location, lineage)?;
        let mut document = CsvDocument::new(variant_columns());
        append_variant_rows(&mut document, &series, lineage);
        let key = variant_object_key(date, lineage, &record.alpha3, true);
        let outcome = write_csv_object(&self.store, &key, &document)?;
        Ok(VariantPush {
            key,
            outcome,
            missing_locations: Vec::new(),
        })
    }

    /// Lineages circulating in a country over the trailing window, most
    /// sampled first. The API's `other` bucket is not a lineage and is
    /// dropped.
    pub fn discover_lineages(
        &self,
        country: &str,
        ndays: usize,
    ) -> Result<Vec<Lineage>, EtlError> {
        let record = self.directory.resolve(country)?;
        let location = LocationId::country(record.alpha3.clone());
        let points = self.genomics.all_lineage_prevalence(&location, ndays)?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for point in &points {
            *counts.entry(point.lineage.clone()).or_default() += 1;
        }
        counts.remove("other");

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut lineages = Vec::new();
        for (name, _) in ranked {
            match name.parse::<Lineage>() {
                Ok(lineage) => lineages.push(lineage),
                Err(err) => warn!(lineage = %name, error = %err, "dropping unusable lineage code"),
            }
        }
        Ok(lineages)
    }

    /// The scheduled variant run: discovers lineages per country and pushes
    /// subdivision plus country series for each. One bad country or lineage
    /// never stops the batch.
    pub fn push_all_variants(
        &self,
        countries: &[String],
        ndays: usize,
        date: NaiveDate,
    ) -> Result<VariantBatchSummary, EtlError> {
        let mut summary = VariantBatchSummary::default();
        for country in countries {
            let record = match self.directory.resolve(country) {
                Ok(record) => record,
                Err(err) if err.is_entity_fault() => {
                    warn!(country, error = %err, "skipping unresolved country");
                    summary.skipped.push(country.clone());
                    continue;
                }
                Err(err) => return Err(err),
            };
            let lineages = match self.discover_lineages(country, ndays) {
                Ok(lineages) => lineages,
                Err(err) if err.is_entity_fault() => {
                    warn!(country, error = %err, "skipping country without lineage data");
                    summary.skipped.push(country.clone());
                    continue;
                }
                Err(err) => return Err(err),
            };
            summary.countries += 1;
            let has_subdivisions = !self.directory.subdivisions_of(&record.alpha2).is_empty();
            for lineage in &lineages {
                if has_subdivisions {
                    match self.variant_series_by_subdivision(country, lineage, date) {
                        Ok(push) => {
                            if push.outcome == WriteOutcome::Written {
                                summary.pushes += 1;
                            }
                        }
                        Err(err) if err.is_entity_fault() => {
                            warn!(country, lineage = %lineage, error = %err, "subdivision push failed");
                        }
                        Err(err) => return Err(err),
                    }
                }
                match self.variant_series_for_country(country, lineage, date) {
                    Ok(push) => {
                        if push.outcome == WriteOutcome::Written {
                            summary.pushes += 1;
                        }
                    }
                    Err(err) if err.is_entity_fault() => {
                        warn!(country, lineage = %lineage, error = %err, "country push failed");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(summary)
    }

    /// Mirrors the vaccination tables of one cadence into the raw area,
    /// byte-identical to the source.
    pub fn push_vaccinations(
        &self,
        cadence: Cadence,
        date: NaiveDate,
    ) -> Result<PushReport, EtlError> {
        let mut report = PushReport::default();
        for table in cadence.tables() {
            let body = match self.vaccinations.fetch_table(*table) {
                Ok(body) => body,
                Err(err) if err.is_entity_fault() => {
                    warn!(table = table.object_name(), error = %err, "skipping unavailable table");
                    report.skipped.push(table.object_name().to_string());
                    continue;
                }
                Err(err) => return Err(err),
            };
            let key = format!("{}/{}/{}", cadence.prefix(), date, table.object_name());
            let response = self.store.put(&key, &body)?;
            if response.is_success() {
                info!(key, bytes = body.len(), "mirrored vaccination table");
                report.written.push(key);
            } else {
                warn!(key, status = response.status, "put rejected");
                report.rejected.push(key);
            }
        }
        Ok(report)
    }

    /// Splits the policy tracker into national and state partitions, derives
    /// smoothed daily cases/deaths per jurisdiction, and writes both.
    pub fn push_policy_series(&self, date: NaiveDate) -> Result<PushReport, EtlError> {
        let rows = self.policy.fetch_policy_rows()?;
        let mut report = PushReport::default();

        let mut national_groups: BTreeMap<String, Vec<&PolicyRow>> = BTreeMap::new();
        for row in rows.iter().filter(|row| row.is_national()) {
            national_groups
                .entry(row.country_code.clone())
                .or_default()
                .push(row);
        }
        let mut national_document = CsvDocument::new(policy_columns());
        for (code, group) in &national_groups {
            if let Err(err) = append_policy_group(&mut national_document, group) {
                if err.is_entity_fault() {
                    warn!(group = %code, error = %err, "skipping policy group");
                    report.skipped.push(code.clone());
                } else {
                    return Err(err);
                }
            }
        }
        let national_key = format!("{POLICY_PREFIX}/{date}/national");
        report.record(
            &national_key,
            write_csv_object(&self.store, &national_key, &national_document)?,
        );

        let mut state_groups: BTreeMap<(String, String), Vec<&PolicyRow>> = BTreeMap::new();
        for row in rows.iter().filter(|row| row.is_state()) {
            let Some(region_code) = &row.region_code else {
                continue;
            };
            state_groups
                .entry((row.country_code.clone(), region_code.clone()))
                .or_default()
                .push(row);
        }
        let mut states_document = CsvDocument::new(policy_columns());
        for ((country_code, region_code), group) in &state_groups {
            if let Err(err) = append_policy_group(&mut states_document, group) {
                if err.is_entity_fault() {
                    warn!(country = %country_code, region = %region_code, error = %err, "skipping policy group");
                    report.skipped.push(format!("{country_code}/{region_code}"));
                } else {
                    return Err(err);
                }
            }
        }
        let states_key = format!("{POLICY_PREFIX}/{date}/states");
        report.record(
            &states_key,
            write_csv_object(&self.store, &states_key, &states_document)?,
        );

        Ok(report)
    }

    /// US-state cumulative cases/deaths, smoothed without differencing, as
    /// the downstream risk calculator consumes them.
    pub fn push_us_cases_deaths(&self) -> Result<PushReport, EtlError> {
        let rows = self.policy.fetch_policy_rows()?;
        let record = self.directory.resolve("US")?;
        // The policy tracker writes region codes with an underscore where
        // ISO 3166-2 uses a hyphen.
        let region_codes: HashSet<String> = self
            .directory
            .subdivisions_of(&record.alpha2)
            .iter()
            .map(|subdivision| subdivision.code.as_str().replace('-', "_"))
            .collect();

        let mut groups: BTreeMap<String, Vec<&PolicyRow>> = BTreeMap::new();
        for row in &rows {
            let Some(region_code) = &row.region_code else {
                continue;
            };
            if region_codes.contains(region_code) {
                groups.entry(region_code.clone()).or_default().push(row);
            }
        }

        let mut report = PushReport::default();
        let mut document = CsvDocument::new(us_cases_deaths_columns());
        for (code, group) in &groups {
            if let Err(err) = append_us_cases_deaths_group(&mut document, group) {
                if err.is_entity_fault() {
                    warn!(region = %code, error = %err, "skipping state");
                    report.skipped.push(code.clone());
                } else {
                    return Err(err);
                }
            }
        }
        report.record(
            US_CASES_DEATHS_KEY,
            write_csv_object(&self.store, US_CASES_DEATHS_KEY, &document)?,
        );
        Ok(report)
    }

    /// Builds the per-country (and configured per-subdivision) wide tables
    /// of smoothed lineage prevalence over one date spine, stacks them into
    /// the risk-calculator input, and derives the variant-family totals.
    pub fn build_risk_table(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        subdivision_countries: &[String],
    ) -> Result<RiskTableReport, EtlError> {
        let spine = DateSpine::new(start, end)?;
        let ndays = spine.len();
        let policy_rows = self.policy.fetch_policy_rows()?;

        let mut seen = HashSet::new();
        let mut countries: Vec<(String, String)> = Vec::new();
        for row in &policy_rows {
            if seen.insert(row.country_code.clone()) {
                countries.push((row.country_code.clone(), row.country_name.clone()));
            }
        }

        let mut tables = Vec::new();
        let mut skipped = Vec::new();
        for (code, name) in &countries {
            match self.country_risk_table(code, name, &spine, ndays) {
                Ok(table) => tables.push(table),
                Err(err) if err.is_entity_fault() => {
                    warn!(country = %code, error = %err, "skipping country");
                    skipped.push(code.clone());
                }
                Err(err) => return Err(err),
            }
        }

        for country in subdivision_countries {
            match self.subdivision_risk_tables(country, &spine, ndays) {
                Ok((subdivision_tables, subdivision_skips)) => {
                    tables.extend(subdivision_tables);
                    skipped.extend(subdivision_skips);
                }
                Err(err) if err.is_entity_fault() => {
                    warn!(country, error = %err, "skipping subdivision country");
                    skipped.push(country.clone());
                }
                Err(err) => return Err(err),
            }
        }

        let document = stack_wide_tables(&tables);
        let table = write_csv_object(&self.store, RISK_TABLE_KEY, &document)?;

        let rules = stock_rules();
        let family_tables: Vec<_> = tables
            .iter()
            .map(|wide| aggregate(wide, &rules))
            .collect();
        let families_document = stack_family_tables(&family_tables);
        let families = write_csv_object(&self.store, FAMILY_TABLE_KEY, &families_document)?;

        Ok(RiskTableReport {
            entities: tables.len(),
            skipped,
            table,
            families,
        })
    }

    /// Mirrors the most recent date partition of a topic into the local
    /// store, flattening each key to its last two segments.
    pub fn download_latest<M: ObjectStore + ?Sized>(
        &self,
        topic: DownloadTopic,
        mirror: &M,
        today: NaiveDate,
    ) -> Result<DownloadReport, EtlError> {
        let index =
            partition::resolve_latest(&self.store, topic.prefix(), today, DEFAULT_LOOKBACK_DAYS)?;
        let mut fetched = Vec::new();
        let mut skipped = Vec::new();
        for key in &index.keys {
            let body = match self.store.get(key) {
                Ok(body) => body,
                Err(err) => {
                    warn!(key, error = %err, "failed to fetch object");
                    skipped.push(key.clone());
                    continue;
                }
            };
            let local_key = format!("{}/{}", topic.prefix(), local_object_name(key));
            let response = mirror.put(&local_key, &body)?;
            if response.is_success() {
                fetched.push(local_key);
            } else {
                warn!(key, status = response.status, "mirror put rejected");
                skipped.push(key.clone());
            }
        }
        info!(
            topic = topic.prefix(),
            date = %index.date,
            objects = fetched.len(),
            "downloaded latest partition"
        );
        Ok(DownloadReport {
            date: index.date,
            fetched,
            skipped,
        })
    }

    fn fetch_prevalence_series(
        &self,
        location: &LocationId,
        lineage: &Lineage,
    ) -> Result<EntitySeries, EtlError> {
        let points = self.genomics.prevalence_by_location(location, lineage)?;
        let points = points
            .into_iter()
            .map(|point| TimeSeriesPoint::new(point.date, point.proportion))
            .collect();
        EntitySeries::new(location.label(), "prevalence", points)
    }

    fn country_risk_table(
        &self,
        code: &str,
        name: &str,
        spine: &DateSpine,
        ndays: usize,
    ) -> Result<WideTable, EtlError> {
        let alpha3: Alpha3 = code.parse()?;
        let location = LocationId::country(alpha3.clone());
        let points = self.genomics.all_lineage_prevalence(&location, ndays)?;
        let meta = EntityMeta::new(code, name, self.population.population_of(&alpha3));
        lineage_wide_table(meta, spine, &points, code)
    }

    fn subdivision_risk_tables(
        &self,
        country: &str,
        spine: &DateSpine,
        ndays: usize,
    ) -> Result<(Vec<WideTable>, Vec<String>), EtlError> {
        let record = self.directory.resolve(country)?;
        let mut tables = Vec::new();
        let mut skipped = Vec::new();
        for subdivision in self.directory.subdivisions_of(&record.alpha2) {
            let location =
                LocationId::subdivision(record.alpha3.clone(), subdivision.code.clone());
            let points = match self.genomics.all_lineage_prevalence(&location, ndays) {
                Ok(points) => points,
                Err(err) if err.is_entity_fault() => {
                    warn!(location = %location, error = %err, "skipping subdivision");
                    skipped.push(subdivision.code.to_string());
                    continue;
                }
                Err(err) => return Err(err),
            };
            let meta =
                EntityMeta::new(subdivision.code.as_str(), subdivision.name.clone(), None);
            match lineage_wide_table(meta, spine, &points, subdivision.code.as_str()) {
                Ok(table) => tables.push(table),
                Err(err) if err.is_entity_fault() => {
                    warn!(location = %location, error = %err, "skipping subdivision");
                    skipped.push(subdivision.code.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        Ok((tables, skipped))
    }
}

fn string_columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn variant_columns() -> Vec<String> {
    string_columns(&["date", "location", "lineage", "prevalence", "Smooth7"])
}

fn policy_columns() -> Vec<String> {
    string_columns(&[
        "CountryName",
        "CountryCode",
        "RegionName",
        "RegionCode",
        "Jurisdiction",
        "Date",
        "ConfirmedCases",
        "ConfirmedDeaths",
        "DailyCases",
        "DailyDeaths",
        "SmoothDailyCases7",
        "SmoothDailyDeaths7",
    ])
}

fn us_cases_deaths_columns() -> Vec<String> {
    string_columns(&[
        "Date",
        "RegionCode",
        "RegionName",
        "ConfirmedCases",
        "ConfirmedDeaths",
        "Smooth7ConfirmedCases",
        "Smooth7ConfirmedDeaths",
    ])
}

fn optional_cell(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

fn variant_object_key(
    date: NaiveDate,
    lineage: &Lineage,
    alpha3: &Alpha3,
    country_level: bool,
) -> String {
    let suffix = if country_level {
        "_lineage_data_country.csv"
    } else {
        "_lineage_data.csv"
    };
    format!("{VARIANT_PREFIX}/{date}/{lineage}/{alpha3}/{lineage}{suffix}")
}

/// Local file name for a downloaded object: its last two key segments
/// joined by an underscore.
fn local_object_name(key: &str) -> String {
    let segments: Vec<&str> = key.split('/').collect();
    let tail = segments.len().saturating_sub(2);
    segments[tail..].join("_")
}

fn append_variant_rows(document: &mut CsvDocument, series: &EntitySeries, lineage: &Lineage) {
    let smoothed = series.smoothed(VARIANT_SIGMA);
    for (point, smooth_value) in series.points().iter().zip(smoothed) {
        document.push_row(vec![
            point.date.to_string(),
            series.entity().to_string(),
            lineage.as_str().to_string(),
            optional_cell(point.value),
            smooth_value.to_string(),
        ]);
    }
}

fn append_policy_group(document: &mut CsvDocument, rows: &[&PolicyRow]) -> Result<(), EtlError> {
    let first = rows[0];
    let entity = first
        .region_code
        .clone()
        .unwrap_or_else(|| first.country_code.clone());

    let cases = EntitySeries::new(
        entity.clone(),
        "ConfirmedCases",
        rows.iter()
            .map(|row| TimeSeriesPoint::new(row.date, row.confirmed_cases))
            .collect(),
    )?;
    let deaths = EntitySeries::new(
        entity,
        "ConfirmedDeaths",
        rows.iter()
            .map(|row| TimeSeriesPoint::new(row.date, row.confirmed_deaths))
            .collect(),
    )?;

    let daily_cases = smooth::daily_from_cumulative(&cases.values());
    let daily_deaths = smooth::daily_from_cumulative(&deaths.values());
    let smooth_cases = smooth::gaussian_smooth(&daily_cases, POLICY_SIGMA);
    let smooth_deaths = smooth::gaussian_smooth(&daily_deaths, POLICY_SIGMA);

    let mut ordered = rows.to_vec();
    ordered.sort_by_key(|row| row.date);
    for (position, row) in ordered.iter().enumerate() {
        document.push_row(vec![
            row.country_name.clone(),
            row.country_code.clone(),
            row.region_name.clone().unwrap_or_default(),
            row.region_code.clone().unwrap_or_default(),
            row.jurisdiction.clone(),
            row.date.to_string(),
            optional_cell(row.confirmed_cases),
            optional_cell(row.confirmed_deaths),
            daily_cases[position].to_string(),
            daily_deaths[position].to_string(),
            smooth_cases[position].to_string(),
            smooth_deaths[position].to_string(),
        ]);
    }
    Ok(())
}

fn append_us_cases_deaths_group(
    document: &mut CsvDocument,
    rows: &[&PolicyRow],
) -> Result<(), EtlError> {
    let first = rows[0];
    let entity = first
        .region_code
        .clone()
        .unwrap_or_else(|| first.country_code.clone());

    let cases = EntitySeries::new(
        entity.clone(),
        "ConfirmedCases",
        rows.iter()
            .map(|row| TimeSeriesPoint::new(row.date, row.confirmed_cases))
            .collect(),
    )?;
    let deaths = EntitySeries::new(
        entity,
        "ConfirmedDeaths",
        rows.iter()
            .map(|row| TimeSeriesPoint::new(row.date, row.confirmed_deaths))
            .collect(),
    )?;

    let smooth_cases = cases.smoothed(POLICY_SIGMA);
    let smooth_deaths = deaths.smoothed(POLICY_SIGMA);

    let mut ordered = rows.to_vec();
    ordered.sort_by_key(|row| row.date);
    for (position, row) in ordered.iter().enumerate() {
        document.push_row(vec![
            row.date.to_string(),
            row.region_code.clone().unwrap_or_default(),
            row.region_name.clone().unwrap_or_default(),
            optional_cell(row.confirmed_cases),
            optional_cell(row.confirmed_deaths),
            smooth_cases[position].to_string(),
            smooth_deaths[position].to_string(),
        ]);
    }
    Ok(())
}

fn lineage_wide_table(
    meta: EntityMeta,
    spine: &DateSpine,
    points: &[LineagePrevalencePoint],
    entity: &str,
) -> Result<WideTable, EtlError> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<TimeSeriesPoint>> = HashMap::new();
    for point in points {
        if !grouped.contains_key(&point.lineage) {
            order.push(point.lineage.clone());
        }
        grouped
            .entry(point.lineage.clone())
            .or_default()
            .push(TimeSeriesPoint::new(point.date, point.prevalence_rolling));
    }

    let mut table = WideTable::new(meta, spine.clone());
    for lineage in order {
        let points = grouped.remove(&lineage).unwrap_or_default();
        let series = EntitySeries::new(entity, &lineage, points)?;
        let smoothed = series.rolling_smoothed(RISK_ROLLING_WINDOW, RISK_SIGMA);
        let joined: Vec<(NaiveDate, f64)> =
            series.dates().into_iter().zip(smoothed).collect();
        table = table.merge_lineage(format!("prevalence_gaussian5_{lineage}"), &joined)?;
    }
    Ok(table)
}
