//! Firebase App
//!
//! An [`App`] holds resolved credentials and project configuration, and hands
//! out the service clients that use them. Apps are independent values: there
//! is no process-wide registry, and several apps with different credentials
//! can live side by side.
//!
//! # REST Reference
//! - Admin SDK setup: <https://firebase.google.com/docs/admin/setup#initialize-sdk>

use crate::auth::backend::AuthBackend;
use crate::auth::rest::{CustomTokenSigner, RestBackend};
use crate::auth::Auth;
use crate::credentials::{AccessTokenProvider, CredentialSource, Credentials};
use crate::error::FirebaseError;
use crate::storage::Storage;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Name of an app created without an explicit name
pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// Environment variable holding app options as JSON, or a path to a JSON file
pub const FIREBASE_CONFIG_ENV: &str = "FIREBASE_CONFIG";

/// Environment variable pointing the auth client at the Auth emulator
pub const AUTH_EMULATOR_HOST_ENV: &str = "FIREBASE_AUTH_EMULATOR_HOST";

/// Environment variable pointing the storage client at the Storage emulator
pub const STORAGE_EMULATOR_HOST_ENV: &str = "FIREBASE_STORAGE_EMULATOR_HOST";

/// Firebase App configuration options
///
/// Every field has a usable default; an app with default options takes its
/// project id from the credentials or the environment.
///
/// # Example
/// ```
/// use firebase_admin_rs::AppOptions;
///
/// let options = AppOptions {
///     project_id: Some("my-project-id".to_string()),
///     storage_bucket: Some("my-project-id.appspot.com".to_string()),
///     ..Default::default()
/// };
/// assert_eq!(options.app_name, "[DEFAULT]");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppOptions {
    /// Google Cloud project ID
    pub project_id: Option<String>,
    /// Bucket returned by [`Storage::default_bucket`]
    pub storage_bucket: Option<String>,
    /// Service account used to sign custom tokens through IAM when the
    /// credentials carry no private key
    pub service_account_id: Option<String>,
    /// Label used in logs
    #[serde(skip)]
    pub app_name: String,
    /// Deadline for each remote call
    #[serde(skip)]
    pub request_timeout: Duration,
    /// `host:port` of the Auth emulator
    #[serde(skip)]
    pub auth_emulator_host: Option<String>,
    /// `host:port` of the Storage emulator
    #[serde(skip)]
    pub storage_emulator_host: Option<String>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            project_id: None,
            storage_bucket: None,
            service_account_id: None,
            app_name: DEFAULT_APP_NAME.to_string(),
            request_timeout: crate::auth::auth::DEFAULT_REQUEST_TIMEOUT,
            auth_emulator_host: None,
            storage_emulator_host: None,
        }
    }
}

impl AppOptions {
    /// Options from `FIREBASE_CONFIG` and the emulator host variables
    ///
    /// `FIREBASE_CONFIG` is either a JSON object or the path of a file
    /// containing one, with the keys `projectId`, `storageBucket` and
    /// `serviceAccountId`. Unset variables leave the defaults in place.
    pub fn from_env() -> Result<Self, FirebaseError> {
        let mut options = match non_empty_env(FIREBASE_CONFIG_ENV) {
            None => Self::default(),
            Some(raw) => Self::from_firebase_config(&raw)?,
        };
        options.auth_emulator_host = non_empty_env(AUTH_EMULATOR_HOST_ENV);
        options.storage_emulator_host = non_empty_env(STORAGE_EMULATOR_HOST_ENV);
        Ok(options)
    }

    /// Parse a `FIREBASE_CONFIG` value: inline JSON or a file path
    pub fn from_firebase_config(raw: &str) -> Result<Self, FirebaseError> {
        let raw = raw.trim();
        let json = if raw.starts_with('{') {
            raw.to_string()
        } else {
            match std::fs::read_to_string(raw) {
                Err(e) => {
                    return Err(FirebaseError::config(format!(
                        "failed to read {} file {:?}: {}",
                        FIREBASE_CONFIG_ENV, raw, e
                    )))
                }
                Ok(contents) => contents,
            }
        };

        serde_json::from_str(&json).map_err(|e| {
            FirebaseError::config(format!("{} is not a valid JSON object: {}", FIREBASE_CONFIG_ENV, e))
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Firebase App instance
///
/// Cheap to clone; clones share credentials and the cached service clients.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    options: AppOptions,
    credentials: Arc<Credentials>,
    project_id: Option<String>,
    http: reqwest::Client,
    tokens: Arc<AccessTokenProvider>,
    auth: OnceCell<Auth>,
    storage: OnceCell<Storage>,
}

impl App {
    /// Resolve credentials and create an app
    ///
    /// Fails with `Config` when the credentials cannot be loaded or parsed.
    /// Nothing is fetched from the network.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), firebase_admin_rs::FirebaseError> {
    /// use firebase_admin_rs::{App, AppOptions, CredentialSource};
    ///
    /// // Service account key file
    /// let app = App::initialize(
    ///     CredentialSource::ServiceAccountFile("path/to/serviceAccountKey.json".into()),
    ///     AppOptions::default(),
    /// )
    /// .await?;
    ///
    /// // Application default credentials, options from FIREBASE_CONFIG
    /// let app = App::initialize(CredentialSource::ApplicationDefault, AppOptions::from_env()?).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn initialize(source: CredentialSource, options: AppOptions) -> Result<Self, FirebaseError> {
        let credentials = Arc::new(Credentials::resolve(&source).await?);

        let http = match reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
        {
            Err(e) => {
                return Err(FirebaseError::config(format!(
                    "failed to create HTTP client: {}",
                    e
                )))
            }
            Ok(client) => client,
        };

        let project_id = options
            .project_id
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| credentials.project_id().map(str::to_string))
            .or_else(|| non_empty_env("GOOGLE_CLOUD_PROJECT"))
            .or_else(|| non_empty_env("GCLOUD_PROJECT"));

        debug!(
            app = %options.app_name,
            project_id = ?project_id,
            "initialized app"
        );

        Ok(Self {
            inner: Arc::new(AppInner {
                tokens: Arc::new(AccessTokenProvider::new(credentials.clone(), http.clone())),
                options,
                credentials,
                project_id,
                http,
                auth: OnceCell::new(),
                storage: OnceCell::new(),
            }),
        })
    }

    /// App name, `"[DEFAULT]"` unless set in the options
    pub fn name(&self) -> &str {
        &self.inner.options.app_name
    }

    /// Options the app was created with
    pub fn options(&self) -> &AppOptions {
        &self.inner.options
    }

    /// Resolved project id
    pub fn project_id(&self) -> Option<&str> {
        self.inner.project_id.as_deref()
    }

    /// Resolved credentials
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// Authentication client for this app
    ///
    /// Built on first use and shared afterwards. Fails with
    /// `ServiceUnavailable` when no project id could be determined.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example(app: firebase_admin_rs::App) -> Result<(), firebase_admin_rs::FirebaseError> {
    /// let auth = app.auth()?;
    /// let user = auth.get_user("some-uid").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn auth(&self) -> Result<Auth, FirebaseError> {
        self.inner.auth.get_or_try_init(|| self.build_auth()).cloned()
    }

    fn build_auth(&self) -> Result<Auth, FirebaseError> {
        let inner = &self.inner;
        let Some(project_id) = inner.project_id.as_deref() else {
            return Err(FirebaseError::ServiceUnavailable(
                "auth requires a project id: set project_id in the app options, use a service \
                 account key, or set GOOGLE_CLOUD_PROJECT"
                    .to_string(),
            ));
        };

        let backend: Arc<dyn AuthBackend> = match inner.options.auth_emulator_host.as_deref() {
            Some(host) => {
                debug!(app = %self.name(), host = %host, "using auth emulator");
                Arc::new(RestBackend::emulator(project_id, host, inner.http.clone()))
            }
            None => Arc::new(RestBackend::new(
                project_id,
                inner.http.clone(),
                inner.tokens.clone(),
                self.custom_token_signer(),
            )),
        };

        Ok(Auth::with_backend(backend).with_timeout(inner.options.request_timeout))
    }

    fn custom_token_signer(&self) -> CustomTokenSigner {
        if let Some(sa) = self.inner.credentials.service_account() {
            return CustomTokenSigner::ServiceAccount(sa.clone());
        }
        match self.inner.options.service_account_id.as_deref() {
            Some(id) if !id.is_empty() => CustomTokenSigner::Iam {
                service_account_id: id.to_string(),
            },
            _ => CustomTokenSigner::Unavailable,
        }
    }

    /// Cloud Storage client for this app
    ///
    /// Built on first use and shared afterwards. Fails with `Config` when the
    /// storage emulator host is not a valid host.
    pub fn storage(&self) -> Result<Storage, FirebaseError> {
        self.inner
            .storage
            .get_or_try_init(|| {
                let inner = &self.inner;
                let emulator = inner.options.storage_emulator_host.as_deref();
                let tokens = match emulator {
                    Some(_) => Arc::new(AccessTokenProvider::fixed("owner")),
                    None => inner.tokens.clone(),
                };
                Storage::new(
                    inner.options.storage_bucket.clone(),
                    emulator,
                    inner.http.clone(),
                    tokens,
                    inner.options.request_timeout,
                )
            })
            .cloned()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name())
            .field("project_id", &self.project_id())
            .field("credentials", &self.inner.credentials)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    async fn refresh_token_app(options: AppOptions) -> App {
        App::initialize(
            CredentialSource::RefreshTokenFile(fixture("refresh_token.json")),
            options,
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_default_options() {
        let options = AppOptions::default();
        assert_eq!(options.app_name, DEFAULT_APP_NAME);
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert!(options.project_id.is_none());
    }

    #[test]
    fn test_firebase_config_inline_json() {
        let options = AppOptions::from_firebase_config(
            r#"{"projectId": "p1", "storageBucket": "p1.appspot.com", "databaseURL": "ignored"}"#,
        )
        .unwrap();
        assert_eq!(options.project_id.as_deref(), Some("p1"));
        assert_eq!(options.storage_bucket.as_deref(), Some("p1.appspot.com"));
        assert_eq!(options.app_name, DEFAULT_APP_NAME);
    }

    #[test]
    fn test_firebase_config_errors() {
        assert!(matches!(
            AppOptions::from_firebase_config("{not json"),
            Err(FirebaseError::Config(_))
        ));
        assert!(matches!(
            AppOptions::from_firebase_config("/definitely/missing/config.json"),
            Err(FirebaseError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_service_account_project_id() {
        let app = App::initialize(
            CredentialSource::ServiceAccountFile(fixture("service_account.json")),
            AppOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(app.project_id(), Some("mock-project-id"));
        assert_eq!(app.name(), DEFAULT_APP_NAME);
        assert!(app.credentials().service_account().is_some());
    }

    #[tokio::test]
    async fn test_options_project_id_wins() {
        let app = App::initialize(
            CredentialSource::ServiceAccountFile(fixture("service_account.json")),
            AppOptions {
                project_id: Some("explicit".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(app.project_id(), Some("explicit"));
        assert_eq!(app.auth().unwrap().project_id(), "explicit");
    }

    #[tokio::test]
    async fn test_bad_credentials_file() {
        let result = App::initialize(
            CredentialSource::ServiceAccountFile(fixture("refresh_token.json")),
            AppOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(FirebaseError::Config(_))));
    }

    #[tokio::test]
    async fn test_apps_are_independent() {
        let first = refresh_token_app(AppOptions {
            project_id: Some("first".to_string()),
            app_name: "first".to_string(),
            ..Default::default()
        })
        .await;
        let second = refresh_token_app(AppOptions {
            project_id: Some("second".to_string()),
            app_name: "second".to_string(),
            ..Default::default()
        })
        .await;

        assert_eq!(first.auth().unwrap().project_id(), "first");
        assert_eq!(second.auth().unwrap().project_id(), "second");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clients_built_once_under_concurrent_access() {
        let app = refresh_token_app(AppOptions {
            project_id: Some("p".to_string()),
            ..Default::default()
        })
        .await;

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let app = app.clone();
                tokio::spawn(async move { (app.auth().unwrap(), app.storage().unwrap()) })
            })
            .collect();
        let mut clients = Vec::new();
        for task in tasks {
            clients.push(task.await.unwrap());
        }

        let (auth, storage) = (app.auth().unwrap(), app.storage().unwrap());
        assert!(clients.iter().all(|(a, _)| a.is_same_client(&auth)));
        assert!(clients.iter().all(|(_, s)| s.is_same_client(&storage)));
    }

    #[tokio::test]
    async fn test_storage_default_bucket() {
        let app = refresh_token_app(AppOptions {
            project_id: Some("p".to_string()),
            storage_bucket: Some("p.appspot.com".to_string()),
            ..Default::default()
        })
        .await;
        let storage = app.storage().unwrap();
        assert_eq!(storage.default_bucket().unwrap().name(), "p.appspot.com");

        let app = refresh_token_app(AppOptions::default()).await;
        assert!(matches!(
            app.storage().unwrap().default_bucket(),
            Err(FirebaseError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_emulator_custom_token_offline() {
        let app = refresh_token_app(AppOptions {
            project_id: Some("demo-project".to_string()),
            auth_emulator_host: Some("127.0.0.1:1".to_string()),
            ..Default::default()
        })
        .await;
        let token = app.auth().unwrap().create_custom_token("some-uid").await.unwrap();
        assert!(token.ends_with('.'));
    }

    #[tokio::test]
    async fn test_refresh_token_cannot_mint() {
        let app = refresh_token_app(AppOptions {
            project_id: Some("p".to_string()),
            ..Default::default()
        })
        .await;
        assert!(matches!(
            app.auth().unwrap().create_custom_token("some-uid").await,
            Err(FirebaseError::Config(_))
        ));
    }
}
