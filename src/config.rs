use camino::Utf8PathBuf;

use crate::error::EtlError;

pub const ENV_ACCESS_KEY: &str = "OUTBREAK_S3_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "OUTBREAK_S3_SECRET_KEY";
pub const ENV_BUCKET: &str = "OUTBREAK_S3_BUCKET";
pub const ENV_ENDPOINT: &str = "OUTBREAK_S3_ENDPOINT";
pub const ENV_REGION: &str = "OUTBREAK_S3_REGION";
pub const ENV_POPULATION_FILE: &str = "OUTBREAK_POPULATION_FILE";

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

/// Everything the process reads from its environment, captured once at
/// startup. Nothing else in the pipeline touches `std::env`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub storage: Option<StorageSettings>,
    pub population_file: Option<Utf8PathBuf>,
}

impl RunConfig {
    pub fn from_env() -> Result<Self, EtlError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any name -> value lookup. Blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let access_key = get(ENV_ACCESS_KEY);
        let secret_key = get(ENV_SECRET_KEY);
        let bucket = get(ENV_BUCKET);

        let storage = match (access_key, secret_key, bucket) {
            (None, None, None) => None,
            (Some(access_key), Some(secret_key), Some(bucket)) => Some(StorageSettings {
                access_key,
                secret_key,
                bucket,
                region: get(ENV_REGION).unwrap_or_else(|| DEFAULT_REGION.to_string()),
                endpoint: get(ENV_ENDPOINT),
            }),
            (access_key, secret_key, bucket) => {
                let missing = if access_key.is_none() {
                    ENV_ACCESS_KEY
                } else if secret_key.is_none() {
                    ENV_SECRET_KEY
                } else {
                    debug_assert!(bucket.is_none());
                    ENV_BUCKET
                };
                return Err(EtlError::MissingConfig(missing.to_string()));
            }
        };

        Ok(Self {
            storage,
            population_file: get(ENV_POPULATION_FILE).map(Utf8PathBuf::from),
        })
    }

    pub fn require_storage(&self) -> Result<&StorageSettings, EtlError> {
        self.storage
            .as_ref()
            .ok_or_else(|| EtlError::MissingConfig(ENV_BUCKET.to_string()))
    }
}
