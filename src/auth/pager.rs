//! Paginated user listing
//!
//! [`UserPager`] walks every user of a project. It offers two views over one
//! cursor: record at a time ([`UserPager::next`] or
//! [`UserPager::into_stream`]) and page at a time ([`UserPager::next_page`]).

use crate::auth::auth::Auth;
use crate::auth::types::{UserPage, UserRecord, MAX_LIST_USERS_RESULTS};
use crate::error::FirebaseError;
use async_stream::stream;
use futures::Stream;
use std::collections::VecDeque;
use tracing::warn;

/// Position in a backend listing
///
/// A failed fetch leaves the position untouched, so the same page can be
/// requested again.
#[derive(Debug, Clone)]
pub(crate) struct PageCursor {
    auth: Auth,
    next_token: Option<String>,
    exhausted: bool,
}

impl PageCursor {
    pub(crate) fn new(auth: Auth, page_token: Option<String>) -> Self {
        Self {
            auth,
            next_token: page_token.filter(|t| !t.is_empty()),
            exhausted: false,
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the page at the current position and advance past it
    pub(crate) async fn fetch(&mut self, page_size: usize) -> Result<UserPage, FirebaseError> {
        if self.exhausted {
            return Ok(UserPage::default());
        }

        let page = self.auth.fetch_page(page_size, self.next_token.clone()).await?;
        if page.users.is_empty() && page.next_page_token.is_some() {
            warn!(page_size, "backend returned an empty page with a continuation token");
        }

        self.next_token = page.next_page_token.clone();
        self.exhausted = self.next_token.is_none();
        Ok(page)
    }
}

/// Lazy iterator over all users
///
/// Obtained from [`Auth::list_users`]. Records come in backend order; nothing
/// is fetched until the first call.
///
/// Use either view, not both: once [`next`](Self::next) has been called,
/// [`next_page`](Self::next_page) fails with `InvalidArgument`, because a
/// backend page token cannot point into a partly consumed page.
///
/// # Example
/// ```no_run
/// # async fn example(auth: firebase_admin_rs::Auth) -> Result<(), firebase_admin_rs::FirebaseError> {
/// // Record at a time
/// let mut users = auth.list_users(None);
/// while let Some(user) = users.next().await? {
///     println!("Read user: {}", user.uid);
/// }
///
/// // Page at a time
/// let mut pages = auth.list_users(None);
/// loop {
///     let page = pages.next_page(100).await?;
///     for user in &page.users {
///         println!("Read user: {}", user.uid);
///     }
///     if page.next_page_token.is_none() {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct UserPager {
    cursor: PageCursor,
    buffer: VecDeque<UserRecord>,
    flat_started: bool,
}

impl UserPager {
    pub(crate) fn new(auth: Auth, page_token: Option<String>) -> Self {
        Self {
            cursor: PageCursor::new(auth, page_token),
            buffer: VecDeque::new(),
            flat_started: false,
        }
    }

    /// Next user, or `None` once every user has been returned
    pub async fn next(&mut self) -> Result<Option<UserRecord>, FirebaseError> {
        self.flat_started = true;
        loop {
            if let Some(user) = self.buffer.pop_front() {
                return Ok(Some(user));
            }
            if self.cursor.is_exhausted() {
                return Ok(None);
            }
            let page = self.cursor.fetch(MAX_LIST_USERS_RESULTS).await?;
            self.buffer.extend(page.users);
        }
    }

    /// Next page of at most `page_size` users
    ///
    /// `page_size` must be in `1..=1000`. Past the end, returns an empty page
    /// without a token.
    pub async fn next_page(&mut self, page_size: usize) -> Result<UserPage, FirebaseError> {
        // Reject mixed use first
        if self.flat_started {
            return Err(FirebaseError::invalid_argument(
                "next_page cannot be called after next on the same pager",
            ));
        }
        self.cursor.fetch(page_size).await
    }

    /// Consume the pager as a stream of users
    ///
    /// The stream ends after the last user or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<UserRecord, FirebaseError>> + Send {
        let mut pager = self;
        stream! {
            loop {
                match pager.next().await {
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(user)) => yield Ok(user),
                }
            }
        }
    }
}
