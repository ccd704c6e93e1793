use std::collections::{HashMap, HashSet};

use assert_matches::assert_matches;
use chrono::NaiveDate;

use outbreak_etl::app::{
    App, DownloadTopic, FAMILY_TABLE_KEY, RISK_TABLE_KEY, US_CASES_DEATHS_KEY,
};
use outbreak_etl::domain::{Lineage, LocationId};
use outbreak_etl::error::EtlError;
use outbreak_etl::outbreak::{GenomicsApi, LineagePrevalencePoint, PrevalencePoint};
use outbreak_etl::owid::{Cadence, VaccinationFeed, VaccinationTable};
use outbreak_etl::oxford::{PolicyFeed, PolicyRow};
use outbreak_etl::reference::{Directory, PopulationTable};
use outbreak_etl::storage::{MemoryStore, ObjectStore};
use outbreak_etl::writer::WriteOutcome;

fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, month, day).unwrap()
}

#[derive(Default)]
struct MockGenomics {
    /// (location query value, lineage) -> points. Unknown pairs answer with
    /// zero rows, the way an empty but successful envelope does.
    prevalence: HashMap<(String, String), Vec<PrevalencePoint>>,
    /// location query value -> per-lineage points. Unknown locations fail
    /// the way a success=false envelope does.
    all: HashMap<String, Vec<LineagePrevalencePoint>>,
}

impl MockGenomics {
    fn with_prevalence(
        mut self,
        location: &str,
        lineage: &str,
        points: Vec<PrevalencePoint>,
    ) -> Self {
        self.prevalence
            .insert((location.to_string(), lineage.to_string()), points);
        self
    }

    fn with_all(mut self, location: &str, points: Vec<LineagePrevalencePoint>) -> Self {
        self.all.insert(location.to_string(), points);
        self
    }
}

impl GenomicsApi for MockGenomics {
    fn prevalence_by_location(
        &self,
        location: &LocationId,
        lineage: &Lineage,
    ) -> Result<Vec<PrevalencePoint>, EtlError> {
        Ok(self
            .prevalence
            .get(&(location.to_string(), lineage.as_str().to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn all_lineage_prevalence(
        &self,
        location: &LocationId,
        _ndays: usize,
    ) -> Result<Vec<LineagePrevalencePoint>, EtlError> {
        self.all
            .get(&location.to_string())
            .cloned()
            .ok_or_else(|| EtlError::SourceUnavailable {
                url: format!("mock://{location}"),
                reason: "api reported success=false".to_string(),
            })
    }
}

#[derive(Default)]
struct MockVaccinations {
    bodies: HashMap<&'static str, Vec<u8>>,
    failing: HashSet<&'static str>,
}

impl MockVaccinations {
    fn with_table(mut self, name: &'static str, body: &[u8]) -> Self {
        self.bodies.insert(name, body.to_vec());
        self
    }

    fn with_failure(mut self, name: &'static str) -> Self {
        self.failing.insert(name);
        self
    }
}

impl VaccinationFeed for MockVaccinations {
    fn fetch_table(&self, table: VaccinationTable) -> Result<Vec<u8>, EtlError> {
        let name = table.object_name();
        if self.failing.contains(name) {
            return Err(EtlError::SourceUnavailable {
                url: format!("mock://{name}"),
                reason: "status 503".to_string(),
            });
        }
        self.bodies
            .get(name)
            .cloned()
            .ok_or_else(|| EtlError::SourceUnavailable {
                url: format!("mock://{name}"),
                reason: "status 404".to_string(),
            })
    }
}

struct MockPolicy {
    rows: Vec<PolicyRow>,
}

impl PolicyFeed for MockPolicy {
    fn fetch_policy_rows(&self) -> Result<Vec<PolicyRow>, EtlError> {
        Ok(self.rows.clone())
    }
}

fn national_row(
    name: &str,
    code: &str,
    date: NaiveDate,
    cases: Option<f64>,
    deaths: Option<f64>,
) -> PolicyRow {
    PolicyRow {
        country_name: name.to_string(),
        country_code: code.to_string(),
        region_name: None,
        region_code: None,
        jurisdiction: "NAT_TOTAL".to_string(),
        date,
        confirmed_cases: cases,
        confirmed_deaths: deaths,
    }
}

fn state_row(
    country_name: &str,
    country_code: &str,
    region_name: &str,
    region_code: &str,
    date: NaiveDate,
    cases: Option<f64>,
    deaths: Option<f64>,
) -> PolicyRow {
    PolicyRow {
        country_name: country_name.to_string(),
        country_code: country_code.to_string(),
        region_name: Some(region_name.to_string()),
        region_code: Some(region_code.to_string()),
        jurisdiction: "STATE_TOTAL".to_string(),
        date,
        confirmed_cases: cases,
        confirmed_deaths: deaths,
    }
}

fn app_with(
    genomics: MockGenomics,
    vaccinations: MockVaccinations,
    policy: MockPolicy,
    store: MemoryStore,
) -> App<MockGenomics, MockVaccinations, MockPolicy, MemoryStore> {
    App::new(
        genomics,
        vaccinations,
        policy,
        store,
        Directory::bundled().unwrap(),
        PopulationTable::parse("CountryCode,Population\nUSA,331000000\n").unwrap(),
    )
}

fn no_policy() -> MockPolicy {
    MockPolicy { rows: Vec::new() }
}

fn constant_prevalence(days: u32, value: f64) -> Vec<PrevalencePoint> {
    (1..=days)
        .map(|offset| PrevalencePoint {
            date: day(3, offset),
            proportion: Some(value),
        })
        .collect()
}

#[test]
fn country_variant_push_writes_the_partitioned_object() {
    let store = MemoryStore::new();
    let genomics =
        MockGenomics::default().with_prevalence("USA", "B.1.1.7", constant_prevalence(20, 0.25));
    let app = app_with(
        genomics,
        MockVaccinations::default(),
        no_policy(),
        store.clone(),
    );

    let lineage: Lineage = "B.1.1.7".parse().unwrap();
    let push = app
        .variant_series_for_country("United States of America", &lineage, day(7, 1))
        .unwrap();

    assert_eq!(push.outcome, WriteOutcome::Written);
    assert_eq!(
        push.key,
        "interim/variants/2021-07-01/B.1.1.7/USA/B.1.1.7_lineage_data_country.csv"
    );

    let body = String::from_utf8(store.object(&push.key).unwrap()).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines[0], "date,location,lineage,prevalence,Smooth7");
    assert_eq!(lines.len(), 21);

    let first: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(first[0], "2021-03-01");
    assert_eq!(first[1], "USA");
    assert_eq!(first[2], "B.1.1.7");
    assert_eq!(first[3], "0.25");
    // A constant series survives gaussian smoothing unchanged.
    let smoothed: f64 = first[4].parse().unwrap();
    assert!((smoothed - 0.25).abs() < 1e-9);
}

#[test]
fn country_variant_push_with_no_data_skips_the_put() {
    let store = MemoryStore::new();
    let app = app_with(
        MockGenomics::default(),
        MockVaccinations::default(),
        no_policy(),
        store.clone(),
    );

    let lineage: Lineage = "P.1".parse().unwrap();
    let push = app
        .variant_series_for_country("Brazil", &lineage, day(7, 1))
        .unwrap();
    assert_eq!(push.outcome, WriteOutcome::Skipped);
    assert!(store.is_empty());
}

#[test]
fn subdivision_push_stacks_available_states_and_reports_the_rest() {
    let store = MemoryStore::new();
    let genomics = MockGenomics::default()
        .with_prevalence("CAN_CA-ON", "B.1.1.7", constant_prevalence(3, 0.4))
        .with_prevalence("CAN_CA-QC", "B.1.1.7", constant_prevalence(2, 0.1));
    let app = app_with(
        genomics,
        MockVaccinations::default(),
        no_policy(),
        store.clone(),
    );

    let lineage: Lineage = "B.1.1.7".parse().unwrap();
    let push = app
        .variant_series_by_subdivision("Canada", &lineage, day(7, 1))
        .unwrap();

    assert_eq!(push.outcome, WriteOutcome::Written);
    assert_eq!(
        push.key,
        "interim/variants/2021-07-01/B.1.1.7/CAN/B.1.1.7_lineage_data.csv"
    );
    // 13 provinces and territories, two with data.
    assert_eq!(push.missing_locations.len(), 11);

    let body = String::from_utf8(store.object(&push.key).unwrap()).unwrap();
    let rows: Vec<&str> = body.lines().skip(1).collect();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows.iter().filter(|row| row.contains("CA-ON")).count(), 3);
    assert_eq!(rows.iter().filter(|row| row.contains("CA-QC")).count(), 2);
}

#[test]
fn discover_lineages_ranks_by_sample_count_and_drops_other() {
    let mut points = Vec::new();
    for offset in 1..=4 {
        points.push(LineagePrevalencePoint {
            date: day(5, offset),
            lineage: "ay.4".to_string(),
            prevalence_rolling: Some(0.2),
        });
    }
    for offset in 1..=2 {
        points.push(LineagePrevalencePoint {
            date: day(5, offset),
            lineage: "b.1.1.7".to_string(),
            prevalence_rolling: Some(0.5),
        });
    }
    points.push(LineagePrevalencePoint {
        date: day(5, 1),
        lineage: "other".to_string(),
        prevalence_rolling: Some(0.3),
    });

    let app = app_with(
        MockGenomics::default().with_all("GBR", points),
        MockVaccinations::default(),
        no_policy(),
        MemoryStore::new(),
    );

    let lineages = app.discover_lineages("United Kingdom", 120).unwrap();
    let names: Vec<&str> = lineages.iter().map(|lineage| lineage.as_str()).collect();
    assert_eq!(names, vec!["AY.4", "B.1.1.7"]);
}

#[test]
fn batch_push_skips_bad_countries_and_keeps_going() {
    let store = MemoryStore::new();
    let genomics = MockGenomics::default()
        .with_all(
            "IND",
            vec![LineagePrevalencePoint {
                date: day(5, 1),
                lineage: "b.1.617.2".to_string(),
                prevalence_rolling: Some(0.6),
            }],
        )
        .with_prevalence("IND", "B.1.617.2", constant_prevalence(5, 0.6));
    let app = app_with(
        genomics,
        MockVaccinations::default(),
        no_policy(),
        store.clone(),
    );

    let countries = vec![
        "Atlantis".to_string(),
        "France".to_string(),
        "India".to_string(),
    ];
    let summary = app.push_all_variants(&countries, 120, day(7, 1)).unwrap();

    // Atlantis never resolves; France resolves but has no lineage data.
    assert_eq!(summary.skipped, vec!["Atlantis", "France"]);
    assert_eq!(summary.countries, 1);
    assert_eq!(summary.pushes, 1);
    assert_eq!(
        store.keys(),
        vec!["interim/variants/2021-07-01/B.1.617.2/IND/B.1.617.2_lineage_data_country.csv"]
    );
}

#[test]
fn vaccination_push_mirrors_tables_byte_identical() {
    let store = MemoryStore::new();
    let countries = b"location,date,total_vaccinations\nAlbania,2021-01-10,128\n";
    let vaccinations = MockVaccinations::default()
        .with_table("countries", countries)
        .with_table("age_group", b"location,date,people\nUS,2021-01-10,5\n")
        .with_table("manufacturers", b"location,vaccine\nUS,Moderna\n")
        .with_failure("us_states");
    let app = app_with(
        MockGenomics::default(),
        vaccinations,
        no_policy(),
        store.clone(),
    );

    let report = app.push_vaccinations(Cadence::Daily, day(7, 1)).unwrap();
    assert_eq!(report.written.len(), 3);
    assert_eq!(report.skipped, vec!["us_states"]);
    assert!(report.rejected.is_empty());

    assert_eq!(
        store
            .object("raw/vaccinations/daily/2021-07-01/countries")
            .unwrap(),
        countries
    );
    assert!(
        store
            .object("raw/vaccinations/daily/2021-07-01/us_states")
            .is_none()
    );
}

#[test]
fn policy_push_splits_jurisdictions_and_diffs_before_smoothing() {
    let store = MemoryStore::new();
    let cumulative = [10.0, 15.0, 15.0, 22.0];
    let mut rows: Vec<PolicyRow> = cumulative
        .iter()
        .enumerate()
        .map(|(offset, total)| {
            national_row(
                "United States",
                "USA",
                day(1, offset as u32 + 1),
                Some(*total),
                Some(total / 10.0),
            )
        })
        .collect();
    rows.push(state_row(
        "United States",
        "USA",
        "Virginia",
        "US_VA",
        day(1, 1),
        Some(350000.0),
        Some(5000.0),
    ));

    let app = app_with(
        MockGenomics::default(),
        MockVaccinations::default(),
        MockPolicy { rows },
        store.clone(),
    );

    let report = app.push_policy_series(day(7, 1)).unwrap();
    assert_eq!(report.written.len(), 2);
    assert!(report.skipped.is_empty());

    let national = String::from_utf8(
        store
            .object("processed/oxford_all/2021-07-01/national")
            .unwrap(),
    )
    .unwrap();
    let lines: Vec<&str> = national.lines().collect();
    assert!(lines[0].starts_with("CountryName,CountryCode,"));
    assert_eq!(lines.len(), 5);

    // DailyCases is the diff of the cumulative column, first element zeroed.
    let daily: Vec<&str> = lines[1..]
        .iter()
        .map(|line| line.split(',').nth(8).unwrap())
        .collect();
    assert_eq!(daily, vec!["0", "5", "0", "7"]);

    let states = String::from_utf8(
        store
            .object("processed/oxford_all/2021-07-01/states")
            .unwrap(),
    )
    .unwrap();
    assert_eq!(states.lines().count(), 2);
    assert!(states.contains("US_VA"));
}

#[test]
fn us_cases_deaths_push_keeps_only_known_state_codes() {
    let store = MemoryStore::new();
    let rows = vec![
        state_row(
            "United States",
            "USA",
            "Virginia",
            "US_VA",
            day(1, 1),
            Some(100.0),
            Some(2.0),
        ),
        state_row(
            "United States",
            "USA",
            "Virginia",
            "US_VA",
            day(1, 2),
            Some(150.0),
            Some(3.0),
        ),
        // A Brazilian state row must not leak into the US table.
        state_row(
            "Brazil",
            "BRA",
            "Rondonia",
            "01",
            day(1, 1),
            Some(9.0),
            Some(1.0),
        ),
    ];
    let app = app_with(
        MockGenomics::default(),
        MockVaccinations::default(),
        MockPolicy { rows },
        store.clone(),
    );

    let report = app.push_us_cases_deaths().unwrap();
    assert_eq!(report.written, vec![US_CASES_DEATHS_KEY]);

    let body = String::from_utf8(store.object(US_CASES_DEATHS_KEY).unwrap()).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(
        lines[0],
        "Date,RegionCode,RegionName,ConfirmedCases,ConfirmedDeaths,Smooth7ConfirmedCases,Smooth7ConfirmedDeaths"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("2021-01-01,US_VA,Virginia,100,2,"));
    assert!(!body.contains("Rondonia"));
}

#[test]
fn risk_table_build_writes_wide_and_family_tables() {
    let store = MemoryStore::new();
    let points = vec![
        LineagePrevalencePoint {
            date: day(6, 1),
            lineage: "b.1.1.7".to_string(),
            prevalence_rolling: Some(0.5),
        },
        LineagePrevalencePoint {
            date: day(6, 2),
            lineage: "b.1.1.7".to_string(),
            prevalence_rolling: Some(0.4),
        },
        LineagePrevalencePoint {
            date: day(6, 1),
            lineage: "ay.4".to_string(),
            prevalence_rolling: Some(0.2),
        },
    ];
    let rows = vec![national_row(
        "United States",
        "USA",
        day(6, 1),
        Some(100.0),
        Some(1.0),
    )];
    let app = app_with(
        MockGenomics::default().with_all("USA", points),
        MockVaccinations::default(),
        MockPolicy { rows },
        store.clone(),
    );

    let report = app.build_risk_table(day(6, 1), day(6, 3), &[]).unwrap();
    assert_eq!(report.entities, 1);
    assert!(report.skipped.is_empty());
    assert_eq!(report.table, WriteOutcome::Written);
    assert_eq!(report.families, WriteOutcome::Written);

    let table = String::from_utf8(store.object(RISK_TABLE_KEY).unwrap()).unwrap();
    let header = table.lines().next().unwrap();
    assert_eq!(
        header,
        "Date,CountryCode,CountryName,Population,prevalence_gaussian5_b.1.1.7,prevalence_gaussian5_ay.4"
    );
    // One row per spine date, population resolved from the reference table.
    assert_eq!(table.lines().count(), 4);
    assert!(table.contains("USA,United States,331000000"));

    let families = String::from_utf8(store.object(FAMILY_TABLE_KEY).unwrap()).unwrap();
    assert_eq!(
        families.lines().next().unwrap(),
        "Date,CountryCode,CountryName,Alpha,Beta,Gamma,Delta"
    );
    assert_eq!(families.lines().count(), 4);
}

#[test]
fn risk_table_skips_countries_without_genomics_data() {
    let store = MemoryStore::new();
    let rows = vec![
        national_row("United States", "USA", day(6, 1), Some(100.0), Some(1.0)),
        national_row("France", "FRA", day(6, 1), Some(50.0), Some(1.0)),
    ];
    let app = app_with(
        MockGenomics::default().with_all(
            "USA",
            vec![LineagePrevalencePoint {
                date: day(6, 1),
                lineage: "b.1.1.7".to_string(),
                prevalence_rolling: Some(0.5),
            }],
        ),
        MockVaccinations::default(),
        MockPolicy { rows },
        store.clone(),
    );

    let report = app.build_risk_table(day(6, 1), day(6, 2), &[]).unwrap();
    assert_eq!(report.entities, 1);
    assert_eq!(report.skipped, vec!["FRA"]);
}

#[test]
fn download_latest_mirrors_the_most_recent_partition() {
    let store = MemoryStore::new();
    store
        .put(
            "interim/variants/2021-07-05/B.1.1.7/USA/B.1.1.7_lineage_data.csv",
            b"csv-body",
        )
        .unwrap();
    store
        .put(
            "interim/variants/2021-07-02/B.1.1.7/USA/B.1.1.7_lineage_data.csv",
            b"stale",
        )
        .unwrap();
    let app = app_with(
        MockGenomics::default(),
        MockVaccinations::default(),
        no_policy(),
        store,
    );

    let mirror = MemoryStore::new();
    let report = app
        .download_latest(DownloadTopic::Variants, &mirror, day(7, 10))
        .unwrap();

    assert_eq!(report.date, day(7, 5));
    assert_eq!(
        report.fetched,
        vec!["interim/variants/USA_B.1.1.7_lineage_data.csv"]
    );
    assert_eq!(
        mirror
            .object("interim/variants/USA_B.1.1.7_lineage_data.csv")
            .unwrap(),
        b"csv-body"
    );
}

#[test]
fn download_with_nothing_in_the_window_reports_partition_not_found() {
    let app = app_with(
        MockGenomics::default(),
        MockVaccinations::default(),
        no_policy(),
        MemoryStore::new(),
    );
    let mirror = MemoryStore::new();
    let err = app
        .download_latest(DownloadTopic::Policy, &mirror, day(7, 10))
        .unwrap_err();
    assert_matches!(err, EtlError::PartitionNotFound { days_checked: 10, .. });
    assert!(mirror.is_empty());
}
