use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::config::StorageSettings;
use crate::error::EtlError;
use crate::storage::{ObjectStore, PutResponse};

/// S3-compatible bucket behind the `ObjectStore` seam. Custom endpoints
/// (MinIO and friends) use path-style addressing.
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn open(settings: &StorageSettings) -> Result<Self, EtlError> {
        let credentials = Credentials::new(
            Some(&settings.access_key),
            Some(&settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|err| EtlError::Storage(format!("credentials: {err}")))?;

        let region = match &settings.endpoint {
            Some(endpoint) => Region::Custom {
                region: settings.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => settings
                .region
                .parse()
                .map_err(|err| EtlError::Storage(format!("region: {err}")))?,
        };

        let mut bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|err| EtlError::Storage(err.to_string()))?;
        if settings.endpoint.is_some() {
            bucket = bucket.with_path_style();
        }
        Ok(Self { bucket })
    }
}

impl ObjectStore for S3Store {
    fn put(&self, key: &str, body: &[u8]) -> Result<PutResponse, EtlError> {
        let response = self
            .bucket
            .put_object_blocking(key, body)
            .map_err(|err| EtlError::Storage(format!("put {key}: {err}")))?;
        Ok(PutResponse {
            status: response.status_code(),
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, EtlError> {
        let response = self
            .bucket
            .get_object_blocking(key)
            .map_err(|err| EtlError::Storage(format!("get {key}: {err}")))?;
        if !(200..300).contains(&response.status_code()) {
            return Err(EtlError::Storage(format!(
                "get {key}: status {}",
                response.status_code()
            )));
        }
        Ok(response.bytes().to_vec())
    }

    /// One capped list request; callers probing for partition presence never
    /// need more than the first page.
    fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<String>, EtlError> {
        let (page, _status) = self
            .bucket
            .list_page_blocking(prefix.to_string(), None, None, None, Some(max_keys))
            .map_err(|err| EtlError::Storage(format!("list {prefix}: {err}")))?;
        Ok(page
            .contents
            .into_iter()
            .map(|object| object.key)
            .take(max_keys)
            .collect())
    }
}
