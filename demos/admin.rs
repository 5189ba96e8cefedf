//! Admin snippets: app setup, custom tokens, ID token verification, users
//!
//! ```bash
//! # Against a project, with a service account key
//! GOOGLE_APPLICATION_CREDENTIALS=path/to/serviceAccountKey.json cargo run --example admin
//!
//! # Against the Auth emulator
//! FIREBASE_AUTH_EMULATOR_HOST=localhost:9099 FIREBASE_CONFIG='{"projectId":"demo-project"}' \
//!     cargo run --example admin
//!
//! # Fully offline, in-process backend
//! cargo run --example admin -- --offline
//! ```

use firebase_admin_rs::auth::memory::MemoryBackend;
use firebase_admin_rs::{
    App, AppOptions, Auth, CredentialSource, FirebaseError, UserToCreate, UserToUpdate,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn initialize_app_with_service_account(path: &str) -> Result<App, FirebaseError> {
    App::initialize(
        CredentialSource::ServiceAccountFile(path.into()),
        AppOptions::from_env()?,
    )
    .await
}

async fn initialize_app_with_refresh_token(path: &str) -> Result<App, FirebaseError> {
    let options = AppOptions {
        project_id: Some("my-project-id".to_string()),
        ..AppOptions::from_env()?
    };
    App::initialize(CredentialSource::RefreshTokenFile(path.into()), options).await
}

async fn initialize_app_default() -> Result<App, FirebaseError> {
    App::initialize(CredentialSource::ApplicationDefault, AppOptions::from_env()?).await
}

async fn access_services_multiple_apps(default_app: &App) -> Result<Auth, FirebaseError> {
    let other_app = App::initialize(
        CredentialSource::ServiceAccountFile("service-account-other.json".into()),
        AppOptions {
            app_name: "other".to_string(),
            ..AppOptions::from_env()?
        },
    )
    .await?;

    let _default_client = default_app.auth()?;
    other_app.auth()
}

async fn create_custom_token(auth: &Auth) -> Result<String, FirebaseError> {
    let token = auth.create_custom_token("some-uid").await?;
    info!("Got custom token: {}", token);
    Ok(token)
}

async fn create_custom_token_with_claims(auth: &Auth) -> Result<String, FirebaseError> {
    let mut claims = serde_json::Map::new();
    claims.insert("premiumAccount".to_string(), json!(true));

    let token = auth.create_custom_token_with_claims("some-uid", claims).await?;
    info!("Got custom token: {}", token);
    Ok(token)
}

async fn verify_id_token(auth: &Auth, id_token: &str) {
    match auth.verify_id_token(id_token).await {
        Err(e) => error!("error verifying ID token: {}", e),
        Ok(token) => info!("Verified ID token: {:?}", token),
    }
}

async fn manage_users(auth: &Auth) -> Result<(), FirebaseError> {
    let user = auth
        .create_user(
            UserToCreate::new()
                .email("user@example.com")
                .email_verified(false)
                .phone_number("+15555550100")
                .password("secretPassword")
                .display_name("John Doe")
                .photo_url("http://www.example.com/12345678/photo.png")
                .disabled(false),
        )
        .await?;
    info!("Successfully created user: {}", user.uid);

    let user = auth
        .update_user(&user.uid, UserToUpdate::new().email_verified(true).photo_url(""))
        .await?;
    info!("Successfully updated user: {:?}", user);

    let mut claims = serde_json::Map::new();
    claims.insert("admin".to_string(), json!(true));
    auth.set_custom_user_claims(&user.uid, Some(claims)).await?;

    let mut pager = auth.list_users(None);
    while let Some(listed) = pager.next().await? {
        info!("Read user: {} claims={:?}", listed.uid, listed.custom_claims);
    }

    auth.delete_user(&user.uid).await?;
    info!("Successfully deleted user");
    Ok(())
}

async fn run_offline() -> Result<(), FirebaseError> {
    let backend = Arc::new(MemoryBackend::new("demo-project"));
    let auth = Auth::with_backend(backend.clone());

    create_custom_token(&auth).await?;
    let token = create_custom_token_with_claims(&auth).await?;

    // Stand-in for the client SDK signing in with the custom token
    let id_token = backend.exchange_custom_token(&token).await?;
    verify_id_token(&auth, &id_token).await;
    verify_id_token(&auth, "some-token").await;

    manage_users(&auth).await
}

async fn run_online() -> Result<(), FirebaseError> {
    let app = match std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        Ok(path) if !path.is_empty() => initialize_app_with_service_account(&path).await?,
        _ => match std::env::var("FIREBASE_REFRESH_TOKEN_FILE") {
            Ok(path) if !path.is_empty() => initialize_app_with_refresh_token(&path).await?,
            _ => initialize_app_default().await?,
        },
    };
    info!("Initialized app {:?}", app);

    if std::path::Path::new("service-account-other.json").exists() {
        let other = access_services_multiple_apps(&app).await?;
        info!("Second app scoped to {}", other.project_id());
    }

    let auth = app.auth()?;
    if let Err(e) = create_custom_token(&auth).await {
        error!("Error in create_custom_token: {}", e);
    }
    if let Err(e) = create_custom_token_with_claims(&auth).await {
        error!("Error in create_custom_token_with_claims: {}", e);
    }
    verify_id_token(&auth, "some-token").await;

    if let Ok(bucket) = app.storage().and_then(|s| s.default_bucket()) {
        info!("Default bucket: {}", bucket.uri());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let offline = std::env::args().any(|arg| arg == "--offline");
    let result = if offline {
        run_offline().await
    } else {
        run_online().await
    };

    if let Err(e) = result {
        error!("error running admin demo: {}", e);
        std::process::exit(1);
    }
}
