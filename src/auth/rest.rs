//! Identity Toolkit REST backend
//!
//! Talks to the Identity Toolkit v1 admin API, or to the Auth emulator when
//! an emulator host is configured.
//!
//! # REST Reference
//! - `projects.accounts`: <https://cloud.google.com/identity-platform/docs/reference/rest/v1/projects.accounts>
//! - `accounts:batchGet`: <https://cloud.google.com/identity-platform/docs/reference/rest/v1/projects.accounts/batchGet>
//! - IAM `signBlob`: <https://cloud.google.com/iam/docs/reference/credentials/rest/v1/projects.serviceAccounts/signBlob>

use crate::auth::backend::AuthBackend;
use async_trait::async_trait;
use crate::auth::token::{
    encode_unsigned, map_jwt_error, parse_unverified, signing_input, CustomTokenClaims, JwtHeader,
    VerifiedToken, ID_TOKEN_ISSUER_PREFIX,
};
use crate::auth::types::{
    Claims, UserInfo, UserKey, UserMetadata, UserPage, UserRecord, UserToCreate, UserToUpdate,
};
use crate::credentials::{AccessTokenProvider, ServiceAccount};
use crate::error::{FirebaseError, TokenError};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com/v1";

/// Public keys for ID token signatures
pub const ID_TOKEN_KEYS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Issuer used for unsigned emulator custom tokens
const EMULATOR_SIGNER: &str = "firebase-auth-emulator@example.com";

/// Key set lifetime when the response carries no `max-age`
const DEFAULT_KEYS_MAX_AGE_SECS: i64 = 3600;

/// How custom tokens get signed
#[derive(Debug, Clone)]
pub enum CustomTokenSigner {
    /// Locally, with a service-account private key (RS256)
    ServiceAccount(ServiceAccount),
    /// Remotely, through IAM `signBlob` as the given service account
    Iam {
        /// Service account email
        service_account_id: String,
    },
    /// Unsigned, for the Auth emulator
    Emulator,
    /// No way to sign; minting fails with `Config`
    Unavailable,
}

/// Identity Toolkit backend
pub struct RestBackend {
    project_id: String,
    project_url: String,
    http: reqwest::Client,
    tokens: Arc<AccessTokenProvider>,
    signer: CustomTokenSigner,
    emulator: bool,
    keys: PublicKeyCache,
}

impl RestBackend {
    /// Backend for a real project
    pub fn new(
        project_id: impl Into<String>,
        http: reqwest::Client,
        tokens: Arc<AccessTokenProvider>,
        signer: CustomTokenSigner,
    ) -> Self {
        let project_id = project_id.into();
        Self {
            project_url: format!("{}/projects/{}", IDENTITY_TOOLKIT_URL, project_id),
            project_id,
            http,
            tokens,
            signer,
            emulator: false,
            keys: PublicKeyCache::new(ID_TOKEN_KEYS_URL),
        }
    }

    /// Backend for the Auth emulator at `host` (e.g. `localhost:9099`)
    ///
    /// The emulator accepts unsigned tokens and the fixed `owner` bearer token.
    pub fn emulator(project_id: impl Into<String>, host: &str, http: reqwest::Client) -> Self {
        let project_id = project_id.into();
        Self {
            project_url: format!(
                "http://{}/identitytoolkit.googleapis.com/v1/projects/{}",
                host, project_id
            ),
            project_id,
            http,
            tokens: Arc::new(AccessTokenProvider::fixed("owner")),
            signer: CustomTokenSigner::Emulator,
            emulator: true,
            keys: PublicKeyCache::new(ID_TOKEN_KEYS_URL),
        }
    }

    /// Send an authorized request and decode the JSON answer
    async fn send<R: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<R, FirebaseError> {
        let bearer = self.tokens.token().await?;
        let response = request.bearer_auth(bearer).send().await?;

        // Handle error responses first
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body["error"]["message"].as_str().unwrap_or_default();
            return Err(FirebaseError::from_response(status, message));
        }

        Ok(response.json().await?)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, action: &str, body: &B) -> Result<R, FirebaseError> {
        let url = format!("{}/{}", self.project_url, action);
        self.send(self.http.post(url).json(body)).await
    }

    async fn sign_with_iam(
        &self,
        service_account_id: &str,
        mut claims: CustomTokenClaims,
    ) -> Result<String, FirebaseError> {
        claims.iss = service_account_id.to_string();
        claims.sub = service_account_id.to_string();
        let header = JwtHeader {
            alg: "RS256".to_string(),
            kid: None,
            typ: Some("JWT".to_string()),
        };
        let input = signing_input(&header, &claims)?;

        let url = format!(
            "{}/projects/-/serviceAccounts/{}:signBlob",
            IAM_CREDENTIALS_URL, service_account_id
        );
        let response: SignBlobResponse = self
            .send(self.http.post(url).json(&serde_json::json!({
                "payload": STANDARD.encode(input.as_bytes())
            })))
            .await?;

        let signature = STANDARD.decode(response.signed_blob.as_bytes()).map_err(|e| {
            FirebaseError::backend("MALFORMED_RESPONSE", format!("signedBlob is not base64: {}", e))
        })?;
        Ok(format!("{}.{}", input, URL_SAFE_NO_PAD.encode(signature)))
    }

    async fn verify_signed(&self, token: &str) -> Result<VerifiedToken, FirebaseError> {
        let jwt = parse_unverified(token)?;

        if self.emulator {
            let claims: VerifiedToken = jwt.claims()?;
            claims.check_claims(&self.project_id, Utc::now())?;
            return Ok(claims);
        }

        if jwt.header.alg != "RS256" {
            return Err(TokenError::Malformed(format!(
                "expected RS256 signing algorithm but got {:?}",
                jwt.header.alg
            ))
            .into());
        }
        let Some(kid) = jwt.header.kid.as_deref() else {
            return Err(TokenError::Malformed("token has no \"kid\" header".to_string()).into());
        };

        let keys = self.keys.get(&self.http).await?;
        let Some(jwk) = keys.find(kid) else {
            return Err(TokenError::InvalidSignature.into());
        };
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| FirebaseError::backend("INVALID_PUBLIC_KEY", e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[format!("{}{}", ID_TOKEN_ISSUER_PREFIX, self.project_id)]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);

        let data = decode::<VerifiedToken>(token, &key, &validation).map_err(map_jwt_error)?;
        data.claims.check_claims(&self.project_id, Utc::now())?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("project_id", &self.project_id)
            .field("project_url", &self.project_url)
            .field("emulator", &self.emulator)
            .finish()
    }
}

#[async_trait]
impl AuthBackend for RestBackend {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn get_user(&self, key: UserKey) -> Result<UserRecord, FirebaseError> {
        let body = match &key {
            UserKey::Uid(uid) => serde_json::json!({ "localId": [uid] }),
            UserKey::Email(email) => serde_json::json!({ "email": [email] }),
            UserKey::PhoneNumber(phone) => serde_json::json!({ "phoneNumber": [phone] }),
        };
        let response: LookupResponse = self.post("accounts:lookup", &body).await?;
        match response.users.into_iter().next() {
            None => Err(FirebaseError::NotFound(format!("no user record found for {}", key))),
            Some(user) => user.into_record(),
        }
    }

    async fn create_user(&self, user: UserToCreate) -> Result<String, FirebaseError> {
        let response: CreateResponse = self.post("accounts", &CreateRequest::from(user)).await?;
        Ok(response.local_id)
    }

    async fn update_user(&self, uid: String, update: UserToUpdate) -> Result<(), FirebaseError> {
        let request = UpdateRequest::new(uid, update)?;
        let _: serde_json::Value = self.post("accounts:update", &request).await?;
        Ok(())
    }

    async fn delete_user(&self, uid: String) -> Result<(), FirebaseError> {
        let _: serde_json::Value = self
            .post("accounts:delete", &serde_json::json!({ "localId": uid }))
            .await?;
        Ok(())
    }

    async fn list_users(&self, page_size: usize, page_token: Option<String>) -> Result<UserPage, FirebaseError> {
        let url = format!("{}/accounts:batchGet", self.project_url);
        let mut query = vec![("maxResults", page_size.to_string())];
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            query.push(("nextPageToken", token));
        }

        let response: BatchGetResponse = self.send(self.http.get(url).query(&query)).await?;
        let users = response
            .users
            .into_iter()
            .map(RestUser::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UserPage {
            users,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn sign_custom_token(&self, mut claims: CustomTokenClaims) -> Result<String, FirebaseError> {
        match &self.signer {
            CustomTokenSigner::Unavailable => Err(FirebaseError::config(
                "cannot mint custom tokens: use service account credentials or set service_account_id",
            )),
            CustomTokenSigner::Emulator => {
                claims.iss = EMULATOR_SIGNER.to_string();
                claims.sub = EMULATOR_SIGNER.to_string();
                encode_unsigned(&claims)
            }
            CustomTokenSigner::ServiceAccount(sa) => {
                claims.iss = sa.client_email().to_string();
                claims.sub = sa.client_email().to_string();
                sa.sign(&claims)
            }
            CustomTokenSigner::Iam { service_account_id } => {
                self.sign_with_iam(service_account_id, claims).await
            }
        }
    }

    async fn verify_id_token(&self, token: String) -> Result<VerifiedToken, FirebaseError> {
        self.verify_signed(&token).await
    }
}

/// Published signing keys, cached for the `max-age` the endpoint advertises
struct PublicKeyCache {
    url: String,
    cached: RwLock<Option<(JwkSet, DateTime<Utc>)>>,
}

impl PublicKeyCache {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cached: RwLock::new(None),
        }
    }

    async fn get(&self, http: &reqwest::Client) -> Result<JwkSet, FirebaseError> {
        let now = Utc::now();
        if let Some((keys, expires_at)) = self.cached.read().await.as_ref() {
            if *expires_at > now {
                return Ok(keys.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some((keys, expires_at)) = cached.as_ref() {
            if *expires_at > Utc::now() {
                return Ok(keys.clone());
            }
        }
        match self.fetch(http).await {
            Err(e) => {
                // A stale set still verifies tokens signed before rotation
                let Some((keys, _)) = cached.as_ref() else {
                    return Err(e);
                };
                warn!(error = %e, "failed to refresh ID token public keys, using stale set");
                Ok(keys.clone())
            }
            Ok((keys, max_age)) => {
                *cached = Some((keys.clone(), now + chrono::Duration::seconds(max_age)));
                Ok(keys)
            }
        }
    }

    async fn fetch(&self, http: &reqwest::Client) -> Result<(JwkSet, i64), FirebaseError> {
        debug!(url = %self.url, "fetching ID token public keys");
        let response = http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(FirebaseError::from_status(
                response.status().as_u16(),
                "failed to fetch ID token public keys",
            ));
        }
        let max_age = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(DEFAULT_KEYS_MAX_AGE_SECS);
        let keys: JwkSet = response.json().await?;
        Ok((keys, max_age))
    }
}

fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|seconds| seconds.trim().parse().ok())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<RestUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<RestUser>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    local_id: String,
}

/// `UserInfo` resource as returned by Identity Toolkit
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestUser {
    local_id: String,
    email: Option<String>,
    phone_number: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    email_verified: bool,
    custom_attributes: Option<String>,
    valid_since: Option<String>,
    created_at: Option<String>,
    last_login_at: Option<String>,
    #[serde(default)]
    provider_user_info: Vec<RestProviderInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestProviderInfo {
    provider_id: String,
    raw_id: Option<String>,
    display_name: Option<String>,
    email: Option<String>,
    phone_number: Option<String>,
    photo_url: Option<String>,
}

impl RestUser {
    fn into_record(self) -> Result<UserRecord, FirebaseError> {
        let custom_claims = match self.custom_attributes.as_deref() {
            None | Some("") => Claims::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                FirebaseError::backend(
                    "MALFORMED_RESPONSE",
                    format!("customAttributes of {} are not a JSON object: {}", self.local_id, e),
                )
            })?,
        };
        let millis = |raw: &Option<String>| -> i64 {
            raw.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0)
        };

        Ok(UserRecord {
            tokens_valid_after_millis: millis(&self.valid_since) * 1000,
            metadata: UserMetadata {
                creation_timestamp: millis(&self.created_at),
                last_sign_in_timestamp: millis(&self.last_login_at),
            },
            provider_data: self
                .provider_user_info
                .into_iter()
                .map(|p| UserInfo {
                    uid: p.raw_id.unwrap_or_default(),
                    display_name: p.display_name,
                    email: p.email,
                    phone_number: p.phone_number,
                    photo_url: p.photo_url,
                    provider_id: p.provider_id,
                })
                .collect(),
            uid: self.local_id,
            email: self.email,
            phone_number: self.phone_number,
            display_name: self.display_name,
            photo_url: self.photo_url,
            disabled: self.disabled,
            email_verified: self.email_verified,
            custom_claims,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    local_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disabled: Option<bool>,
}

impl From<UserToCreate> for CreateRequest {
    fn from(user: UserToCreate) -> Self {
        Self {
            local_id: user.uid,
            email: user.email,
            phone_number: user.phone_number,
            display_name: user.display_name,
            photo_url: user.photo_url,
            password: user.password,
            email_verified: user.email_verified,
            disabled: user.disabled,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    local_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disable_user: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_attributes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_since: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    delete_attribute: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    delete_provider: Vec<&'static str>,
}

impl UpdateRequest {
    /// Empty strings become deletions instead of values
    fn new(uid: String, update: UserToUpdate) -> Result<Self, FirebaseError> {
        let mut request = Self {
            local_id: uid,
            email: update.email,
            phone_number: None,
            display_name: None,
            photo_url: None,
            password: update.password,
            email_verified: update.email_verified,
            disable_user: update.disabled,
            custom_attributes: None,
            valid_since: update.valid_since.map(|s| s.to_string()),
            delete_attribute: vec![],
            delete_provider: vec![],
        };

        match update.display_name {
            Some(name) if name.is_empty() => request.delete_attribute.push("DISPLAY_NAME"),
            other => request.display_name = other,
        }
        match update.photo_url {
            Some(url) if url.is_empty() => request.delete_attribute.push("PHOTO_URL"),
            other => request.photo_url = other,
        }
        match update.phone_number {
            Some(phone) if phone.is_empty() => request.delete_provider.push("phone"),
            other => request.phone_number = other,
        }
        if let Some(claims) = update.custom_claims {
            let serialized = serde_json::to_string(&claims).map_err(|e| {
                FirebaseError::invalid_argument(format!("custom claims are not serializable: {}", e))
            })?;
            request.custom_attributes = Some(serialized);
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Answer every request on a local port with `status` and `body`
    ///
    /// Returns the host and a count of requests served.
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nCache-Control: public, max-age=600\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (host, served)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    async fn get_user_answered_with(status: &'static str, body: &'static str) -> FirebaseError {
        let (host, _) = serve(status, body).await;
        let backend = RestBackend::emulator("demo-project", &host, reqwest::Client::new());
        backend
            .get_user(UserKey::Uid("uid-1".to_string()))
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_concurrent_key_refresh_fetches_once() {
        let (host, served) = serve("200 OK", r#"{"keys":[]}"#).await;
        let cache = PublicKeyCache::new(format!("http://{}/keys", host));
        let http = reqwest::Client::new();

        let results = futures::future::join_all((0..8).map(|_| cache.get(&http))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(served.load(Ordering::SeqCst), 1);

        // Still fresh
        cache.get(&http).await.unwrap();
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gateway_deadline_is_timeout() {
        let err = get_user_answered_with(
            "504 Gateway Timeout",
            r#"{"error":{"code":504,"message":"DEADLINE_EXCEEDED"}}"#,
        )
        .await;
        assert!(matches!(err, FirebaseError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_code_on_5xx_is_service_unavailable() {
        let err = get_user_answered_with(
            "503 Service Unavailable",
            r#"{"error":{"code":503,"message":"BACKEND_OVERLOADED"}}"#,
        )
        .await;
        assert!(matches!(err, FirebaseError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_prose_message_keeps_status() {
        let err = get_user_answered_with(
            "401 Unauthorized",
            r#"{"error":{"code":401,"message":"Request had invalid authentication credentials. Expected OAuth 2 access token."}}"#,
        )
        .await;
        assert_eq!(
            err,
            FirebaseError::Backend {
                code: "HTTP_401".to_string(),
                message: "Request had invalid authentication credentials. Expected OAuth 2 access token."
                    .to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_error_code_with_detail() {
        let err = get_user_answered_with(
            "400 Bad Request",
            r#"{"error":{"code":400,"message":"INVALID_PHONE_NUMBER : TOO_SHORT"}}"#,
        )
        .await;
        assert_eq!(err, FirebaseError::InvalidArgument("TOO_SHORT".to_string()));
    }

    #[test]
    fn test_update_request_clears_empty_fields() {
        let update = UserToUpdate::new()
            .display_name("")
            .photo_url("")
            .phone_number("")
            .email("new@example.com");
        let body = serde_json::to_value(UpdateRequest::new("uid-1".to_string(), update).unwrap()).unwrap();

        assert_eq!(body["localId"], json!("uid-1"));
        assert_eq!(body["email"], json!("new@example.com"));
        assert_eq!(body["deleteAttribute"], json!(["DISPLAY_NAME", "PHOTO_URL"]));
        assert_eq!(body["deleteProvider"], json!(["phone"]));
        assert!(body.get("displayName").is_none());
        assert!(body.get("phoneNumber").is_none());
    }

    #[test]
    fn test_update_request_omits_absent_fields() {
        let update = UserToUpdate::new().disabled(false);
        let body = serde_json::to_value(UpdateRequest::new("uid-1".to_string(), update).unwrap()).unwrap();
        assert_eq!(body, json!({"localId": "uid-1", "disableUser": false}));
    }

    #[test]
    fn test_update_request_serializes_claims() {
        let mut claims = Claims::new();
        claims.insert("admin".to_string(), json!(true));
        let update = UserToUpdate::new().custom_claims(claims);
        let body = serde_json::to_value(UpdateRequest::new("u".to_string(), update).unwrap()).unwrap();
        assert_eq!(body["customAttributes"], json!("{\"admin\":true}"));

        let update = UserToUpdate::new().custom_claims(Claims::new());
        let body = serde_json::to_value(UpdateRequest::new("u".to_string(), update).unwrap()).unwrap();
        assert_eq!(body["customAttributes"], json!("{}"));
    }

    #[test]
    fn test_create_request_layout() {
        let user = UserToCreate::new()
            .uid("some-uid")
            .email("user@example.com")
            .email_verified(false);
        let body = serde_json::to_value(CreateRequest::from(user)).unwrap();
        assert_eq!(
            body,
            json!({"localId": "some-uid", "email": "user@example.com", "emailVerified": false})
        );
    }

    #[test]
    fn test_rest_user_into_record() {
        let user: RestUser = serde_json::from_value(json!({
            "localId": "uid-1",
            "email": "user@example.com",
            "emailVerified": true,
            "displayName": "John Doe",
            "customAttributes": "{\"admin\":true}",
            "validSince": "1700000000",
            "createdAt": "1600000000000",
            "lastLoginAt": "1650000000000",
            "providerUserInfo": [
                {"providerId": "password", "rawId": "user@example.com", "email": "user@example.com"}
            ]
        }))
        .unwrap();

        let record = user.into_record().unwrap();
        assert_eq!(record.uid, "uid-1");
        assert!(record.email_verified);
        assert!(!record.disabled);
        assert_eq!(record.custom_claims.get("admin"), Some(&json!(true)));
        assert_eq!(record.tokens_valid_after_millis, 1_700_000_000_000);
        assert_eq!(record.metadata.creation_timestamp, 1_600_000_000_000);
        assert_eq!(record.provider_data[0].provider_id, "password");
    }

    #[test]
    fn test_rest_user_bad_claims() {
        let user: RestUser = serde_json::from_value(json!({
            "localId": "uid-1",
            "customAttributes": "[1, 2]"
        }))
        .unwrap();
        assert!(matches!(user.into_record(), Err(FirebaseError::Backend { .. })));
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("public, max-age=19302, must-revalidate"), Some(19302));
        assert_eq!(parse_max_age("no-cache"), None);
    }

    #[tokio::test]
    async fn test_unreachable_emulator_is_service_unavailable() {
        let backend = RestBackend::emulator("demo-project", "127.0.0.1:1", reqwest::Client::new());
        let result = backend.get_user(UserKey::Uid("uid".to_string())).await;
        assert!(matches!(result, Err(FirebaseError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unsigned_custom_token_for_emulator() {
        let backend = RestBackend::emulator("demo-project", "127.0.0.1:1", reqwest::Client::new());
        let token = backend
            .sign_custom_token(CustomTokenClaims::new("", "some-uid", None, Utc::now()))
            .await
            .unwrap();
        let jwt = parse_unverified(&token).unwrap();
        assert_eq!(jwt.header.alg, "none");
        assert_eq!(jwt.payload["uid"], json!("some-uid"));
        assert_eq!(jwt.payload["iss"], json!(EMULATOR_SIGNER));
    }

    #[tokio::test]
    async fn test_unavailable_signer_is_config_error() {
        let backend = RestBackend::new(
            "demo-project",
            reqwest::Client::new(),
            Arc::new(AccessTokenProvider::fixed("token")),
            CustomTokenSigner::Unavailable,
        );
        let result = backend
            .sign_custom_token(CustomTokenClaims::new("", "some-uid", None, Utc::now()))
            .await;
        assert!(matches!(result, Err(FirebaseError::Config(_))));
    }

    #[tokio::test]
    async fn test_emulator_accepts_unsigned_id_token() {
        let backend = RestBackend::emulator("demo-project", "127.0.0.1:1", reqwest::Client::new());
        let now = Utc::now().timestamp();
        let token = encode_unsigned(&json!({
            "sub": "uid-1",
            "iss": "https://securetoken.google.com/demo-project",
            "aud": "demo-project",
            "iat": now,
            "exp": now + 3600,
            "auth_time": now,
            "firebase": {"sign_in_provider": "custom"}
        }))
        .unwrap();
        let verified = backend.verify_id_token(token).await.unwrap();
        assert_eq!(verified.uid, "uid-1");
    }
}
