//! Cloud Storage bucket handles
//!
//! Resolving a bucket is local: [`Storage::bucket`] and
//! [`Storage::default_bucket`] never touch the network, and a [`Bucket`] may
//! name a bucket that does not exist. The first remote call is
//! [`Bucket::metadata`].
//!
//! # REST Reference
//! - Buckets: <https://cloud.google.com/storage/docs/json_api/v1/buckets/get>
//! - Objects: <https://cloud.google.com/storage/docs/json_api/v1/objects/get>

use crate::credentials::AccessTokenProvider;
use crate::error::FirebaseError;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cloud Storage JSON API host
pub const STORAGE_URL: &str = "https://storage.googleapis.com";

/// Cloud Storage client scoped to one app
///
/// # Example
/// ```no_run
/// # async fn example(app: firebase_admin_rs::App) -> Result<(), firebase_admin_rs::FirebaseError> {
/// let storage = app.storage()?;
/// let bucket = storage.default_bucket()?;
/// println!("default bucket: {}", bucket.name());
///
/// let other = storage.bucket("my-custom-bucket")?;
/// let metadata = other.metadata().await?;
/// println!("{} lives in {:?}", metadata.name, metadata.location);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    default_bucket: Option<String>,
    base_url: Url,
    http: reqwest::Client,
    tokens: Arc<AccessTokenProvider>,
    timeout: Duration,
}

impl Storage {
    #[cfg(test)]
    pub(crate) fn is_same_client(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Build a client; `emulator_host` (e.g. `localhost:9199`) replaces the
    /// production host
    pub(crate) fn new(
        default_bucket: Option<String>,
        emulator_host: Option<&str>,
        http: reqwest::Client,
        tokens: Arc<AccessTokenProvider>,
        timeout: Duration,
    ) -> Result<Self, FirebaseError> {
        let base = match emulator_host {
            None => STORAGE_URL.to_string(),
            Some(host) => format!("http://{}", host),
        };
        let base_url = match Url::parse(&base) {
            Err(e) => {
                return Err(FirebaseError::config(format!(
                    "invalid storage host {:?}: {}",
                    base, e
                )))
            }
            Ok(url) => url,
        };

        Ok(Self {
            inner: Arc::new(StorageInner {
                default_bucket: default_bucket.filter(|b| !b.is_empty()),
                base_url,
                http,
                tokens,
                timeout,
            }),
        })
    }

    /// Handle to the bucket named in the app options
    ///
    /// Fails with `Config` when the app was initialized without a default
    /// bucket.
    pub fn default_bucket(&self) -> Result<Bucket, FirebaseError> {
        let Some(name) = self.inner.default_bucket.as_deref() else {
            return Err(FirebaseError::config(
                "no default bucket configured: set storage_bucket in the app options",
            ));
        };
        self.bucket(name)
    }

    /// Handle to a bucket by name
    ///
    /// A leading `gs://` is accepted and dropped. The bucket is not checked
    /// for existence.
    pub fn bucket(&self, name: &str) -> Result<Bucket, FirebaseError> {
        let name = name.strip_prefix("gs://").unwrap_or(name).trim_end_matches('/');
        if name.is_empty() {
            return Err(FirebaseError::invalid_argument(
                "bucket name must be a non-empty string",
            ));
        }
        if name.contains('/') {
            return Err(FirebaseError::invalid_argument(format!(
                "bucket name must not contain '/': {:?}",
                name
            )));
        }
        Ok(Bucket {
            name: name.to_string(),
            storage: self.clone(),
        })
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("default_bucket", &self.inner.default_bucket)
            .field("base_url", &self.inner.base_url.as_str())
            .finish()
    }
}

/// Named reference to a storage bucket
#[derive(Clone)]
pub struct Bucket {
    name: String,
    storage: Storage,
}

/// Subset of the bucket resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    /// Bucket name
    pub name: String,
    /// Location, e.g. `US-CENTRAL1`
    pub location: Option<String>,
    /// Default storage class
    pub storage_class: Option<String>,
    /// Owning project number
    pub project_number: Option<String>,
    /// Creation time
    pub time_created: Option<DateTime<Utc>>,
    /// Last metadata change
    pub updated: Option<DateTime<Utc>>,
}

impl Bucket {
    /// Bucket name without any `gs://` prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `gs://` URI of the bucket
    pub fn uri(&self) -> String {
        format!("gs://{}", self.name)
    }

    fn resource_url(&self) -> Url {
        let mut url = self.storage.inner.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().extend(["storage", "v1", "b", self.name.as_str()]);
        }
        url
    }

    /// Media download URL of an object in this bucket
    ///
    /// Built locally; the object is not checked for existence. Downloads need
    /// an authorized request unless the object is public.
    pub fn object_url(&self, path: &str) -> Result<String, FirebaseError> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(FirebaseError::invalid_argument(
                "object path must be a non-empty string",
            ));
        }

        let mut url = self.resource_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            // One segment: slashes in the object name get percent-encoded
            segments.push("o").push(path);
        }
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url.to_string())
    }

    /// Fetch the bucket resource
    ///
    /// Fails with `NotFound` when the bucket does not exist.
    pub async fn metadata(&self) -> Result<BucketMetadata, FirebaseError> {
        let inner = &self.storage.inner;
        debug!(bucket = %self.name, "fetching bucket metadata");

        let request = async {
            let bearer = inner.tokens.token().await?;
            let response = inner
                .http
                .get(self.resource_url())
                .bearer_auth(bearer)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                let message = body["error"]["message"].as_str().unwrap_or_default();
                return Err(FirebaseError::from_response(status, message));
            }

            Ok::<_, FirebaseError>(response.json::<BucketMetadata>().await?)
        };

        match tokio::time::timeout(inner.timeout, request).await {
            Err(_) => Err(FirebaseError::Timeout(format!(
                "bucket metadata did not complete within {:?}",
                inner.timeout
            ))),
            Ok(result) => result,
        }
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(default_bucket: Option<&str>, emulator: Option<&str>) -> Storage {
        Storage::new(
            default_bucket.map(str::to_string),
            emulator,
            reqwest::Client::new(),
            Arc::new(AccessTokenProvider::fixed("owner")),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_default_bucket_requires_config() {
        let unconfigured = storage(None, None);
        assert!(matches!(unconfigured.default_bucket(), Err(FirebaseError::Config(_))));

        let configured = storage(Some("demo.appspot.com"), None);
        assert_eq!(configured.default_bucket().unwrap().name(), "demo.appspot.com");
    }

    #[test]
    fn test_bucket_names() {
        let storage = storage(None, None);
        assert_eq!(storage.bucket("gs://my-bucket").unwrap().name(), "my-bucket");
        assert_eq!(storage.bucket("my-bucket").unwrap().uri(), "gs://my-bucket");
        assert!(matches!(storage.bucket(""), Err(FirebaseError::InvalidArgument(_))));
        assert!(matches!(storage.bucket("gs://"), Err(FirebaseError::InvalidArgument(_))));
        assert!(storage.bucket("a/b").is_err());
    }

    #[test]
    fn test_object_url_encodes_path() {
        let bucket = storage(None, None).bucket("my-bucket").unwrap();
        assert_eq!(
            bucket.object_url("images/cat photo.png").unwrap(),
            "https://storage.googleapis.com/storage/v1/b/my-bucket/o/images%2Fcat%20photo.png?alt=media"
        );
        assert!(bucket.object_url("").is_err());
    }

    #[test]
    fn test_emulator_host() {
        let bucket = storage(None, Some("localhost:9199")).bucket("b").unwrap();
        assert!(bucket
            .object_url("x")
            .unwrap()
            .starts_with("http://localhost:9199/storage/v1/b/b/o/x"));
    }

    #[test]
    fn test_invalid_emulator_host() {
        let result = Storage::new(
            None,
            Some("not a host"),
            reqwest::Client::new(),
            Arc::new(AccessTokenProvider::fixed("owner")),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(FirebaseError::Config(_))));
    }

    #[tokio::test]
    async fn test_metadata_unreachable() {
        let bucket = storage(None, Some("127.0.0.1:1")).bucket("b").unwrap();
        assert!(matches!(
            bucket.metadata().await,
            Err(FirebaseError::ServiceUnavailable(_))
        ));
    }
}
