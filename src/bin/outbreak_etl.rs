use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use outbreak_etl::app::{App, DownloadTopic};
use outbreak_etl::config::RunConfig;
use outbreak_etl::error::EtlError;
use outbreak_etl::outbreak::OutbreakHttpClient;
use outbreak_etl::owid::{Cadence, OwidHttpClient};
use outbreak_etl::oxford::OxcgrtHttpClient;
use outbreak_etl::reference::{Directory, PopulationTable};
use outbreak_etl::s3::S3Store;
use outbreak_etl::storage::{LocalDirStore, ObjectStore};

#[derive(Parser)]
#[command(name = "outbreak-etl")]
#[command(about = "Scheduled ETL for COVID-19 surveillance data")]
#[command(version, author)]
struct Cli {
    /// Write to a local directory mirror instead of the configured bucket.
    #[arg(long, global = true, value_name = "DIR")]
    local: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Discover lineages per country and push prevalence series")]
    Variants(VariantsArgs),
    #[command(about = "Mirror the OWID vaccination tables into the raw area")]
    Vaccinations(VaccinationsArgs),
    #[command(about = "Split and smooth the policy tracker into national/state partitions")]
    Policy,
    #[command(about = "Push smoothed US-state cumulative cases and deaths")]
    UsCasesDeaths,
    #[command(about = "Build the risk-calculator wide table and variant-family totals")]
    RiskTable(RiskTableArgs),
    #[command(about = "Mirror the latest date partition of a topic locally")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct VariantsArgs {
    /// Countries to process, by name or ISO code.
    #[arg(long = "country", required = true)]
    countries: Vec<String>,

    /// Trailing window for lineage discovery.
    #[arg(long, default_value_t = 180)]
    ndays: usize,

    /// Partition date, defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Args)]
struct VaccinationsArgs {
    #[arg(value_enum)]
    cadence: CadenceArg,

    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Args)]
struct RiskTableArgs {
    #[arg(long)]
    start: NaiveDate,

    #[arg(long)]
    end: NaiveDate,

    /// Countries whose subdivisions get their own rows.
    #[arg(long = "subdivision-country")]
    subdivision_countries: Vec<String>,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(value_enum)]
    topic: TopicArg,

    /// Root of the local mirror the partition is copied into.
    #[arg(long, default_value = "data")]
    into: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CadenceArg {
    Daily,
    Weekly,
}

impl From<CadenceArg> for Cadence {
    fn from(arg: CadenceArg) -> Self {
        match arg {
            CadenceArg::Daily => Cadence::Daily,
            CadenceArg::Weekly => Cadence::Weekly,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TopicArg {
    Variants,
    VaccinationsDaily,
    VaccinationsWeekly,
    Policy,
}

impl From<TopicArg> for DownloadTopic {
    fn from(arg: TopicArg) -> Self {
        match arg {
            TopicArg::Variants => DownloadTopic::Variants,
            TopicArg::VaccinationsDaily => DownloadTopic::VaccinationsDaily,
            TopicArg::VaccinationsWeekly => DownloadTopic::VaccinationsWeekly,
            TopicArg::Policy => DownloadTopic::Policy,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(etl) = report.downcast_ref::<EtlError>() {
            return ExitCode::from(map_exit_code(etl));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EtlError) -> u8 {
    match error {
        EtlError::MissingConfig(_) | EtlError::InvalidConfig { .. } => 2,
        EtlError::UnknownLocation(_) => 2,
        EtlError::SourceUnavailable { .. }
        | EtlError::PartitionNotFound { .. }
        | EtlError::Storage(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Cli { local, command } = Cli::parse();
    let config = RunConfig::from_env().into_diagnostic()?;

    match local {
        Some(root) => run_command(command, LocalDirStore::new(root), &config),
        None => {
            let settings = config.require_storage().into_diagnostic()?;
            let store = S3Store::open(settings).into_diagnostic()?;
            run_command(command, store, &config)
        }
    }
}

fn run_command<S: ObjectStore>(
    command: Commands,
    store: S,
    config: &RunConfig,
) -> miette::Result<()> {
    let directory = Directory::bundled().into_diagnostic()?;
    let population = match &config.population_file {
        Some(path) => PopulationTable::load(path).into_diagnostic()?,
        None => PopulationTable::empty(),
    };
    let genomics = OutbreakHttpClient::new().into_diagnostic()?;
    let vaccinations = OwidHttpClient::new().into_diagnostic()?;
    let policy = OxcgrtHttpClient::new().into_diagnostic()?;
    let app = App::new(genomics, vaccinations, policy, store, directory, population);

    let today = Local::now().date_naive();
    match command {
        Commands::Variants(args) => {
            let date = args.date.unwrap_or(today);
            let summary = app
                .push_all_variants(&args.countries, args.ndays, date)
                .into_diagnostic()?;
            println!(
                "{} countries processed, {} objects written, {} skipped",
                summary.countries,
                summary.pushes,
                summary.skipped.len()
            );
        }
        Commands::Vaccinations(args) => {
            let date = args.date.unwrap_or(today);
            let report = app
                .push_vaccinations(args.cadence.into(), date)
                .into_diagnostic()?;
            println!(
                "{} tables mirrored, {} rejected, {} skipped",
                report.written.len(),
                report.rejected.len(),
                report.skipped.len()
            );
        }
        Commands::Policy => {
            let report = app.push_policy_series(today).into_diagnostic()?;
            println!(
                "{} objects written, {} groups skipped",
                report.written.len(),
                report.skipped.len()
            );
        }
        Commands::UsCasesDeaths => {
            let report = app.push_us_cases_deaths().into_diagnostic()?;
            println!(
                "{} objects written, {} states skipped",
                report.written.len(),
                report.skipped.len()
            );
        }
        Commands::RiskTable(args) => {
            let report = app
                .build_risk_table(args.start, args.end, &args.subdivision_countries)
                .into_diagnostic()?;
            println!(
                "{} entities in table ({:?} / families {:?}), {} skipped",
                report.entities,
                report.table,
                report.families,
                report.skipped.len()
            );
        }
        Commands::Download(args) => {
            let mirror = LocalDirStore::new(args.into);
            let report = app
                .download_latest(args.topic.into(), &mirror, today)
                .into_diagnostic()?;
            println!(
                "partition {}: {} objects mirrored, {} skipped",
                report.date,
                report.fetched.len(),
                report.skipped.len()
            );
        }
    }
    Ok(())
}
