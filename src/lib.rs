//! Firebase Admin for Rust
//!
//! Server-side client for Firebase Authentication and Cloud Storage: custom
//! token minting, ID token verification, user management, custom claims,
//! paginated user listing and bucket resolution.
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), firebase_admin_rs::FirebaseError> {
//! use firebase_admin_rs::{App, AppOptions, CredentialSource};
//!
//! let app = App::initialize(
//!     CredentialSource::ServiceAccountFile("path/to/serviceAccountKey.json".into()),
//!     AppOptions::default(),
//! )
//! .await?;
//!
//! let auth = app.auth()?;
//! let token = auth.create_custom_token("some-uid").await?;
//! println!("Got custom token: {}", token);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod credentials;
pub mod error;

// Auth module
pub mod auth {
    //! Firebase Authentication

    pub mod auth;
    pub mod backend;
    pub mod memory;
    pub mod pager;
    pub mod rest;
    pub mod token;
    pub mod types;

    pub use auth::Auth;
    pub use pager::UserPager;
}

// Storage module
pub mod storage {
    //! Cloud Storage

    pub mod storage;

    pub use storage::{Bucket, BucketMetadata, Storage};
}

// Re-exports for convenience
pub use app::{App, AppOptions};
pub use credentials::CredentialSource;
pub use error::{FirebaseError, TokenError};

// Auth re-exports
pub use auth::token::VerifiedToken;
pub use auth::types::{Claims, UserPage, UserRecord, UserToCreate, UserToUpdate};
pub use auth::{Auth, UserPager};

// Storage re-exports
pub use storage::{Bucket, Storage};
