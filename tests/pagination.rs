//! Listing tests: record-at-a-time and page-at-a-time views must agree

use firebase_admin_rs::auth::memory::MemoryBackend;
use firebase_admin_rs::{Auth, FirebaseError, UserToCreate};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;

const PAGE_SIZE: usize = 7;

async fn populated(count: usize) -> Auth {
    let auth = Auth::with_backend(Arc::new(MemoryBackend::new("pagination-test")));
    for i in 0..count {
        auth.create_user(
            UserToCreate::new()
                .uid(format!("uid-{:04}", i))
                .email(format!("user{}@example.com", i)),
        )
        .await
        .expect("Failed to create user");
    }
    auth
}

async fn collect_flat(auth: &Auth) -> Vec<String> {
    let mut pager = auth.list_users(None);
    let mut uids = vec![];
    while let Some(user) = pager.next().await.expect("Failed to list users") {
        uids.push(user.uid);
    }
    uids
}

async fn collect_paged(auth: &Auth, page_size: usize) -> (Vec<String>, usize) {
    let mut pager = auth.list_users(None);
    let mut uids = vec![];
    let mut pages = 0;
    loop {
        let page = pager.next_page(page_size).await.expect("Failed to list page");
        assert!(page.users.len() <= page_size);
        pages += 1;
        uids.extend(page.users.into_iter().map(|u| u.uid));
        if page.next_page_token.is_none() {
            break;
        }
    }
    (uids, pages)
}

async fn assert_views_agree(count: usize) {
    let auth = populated(count).await;

    let flat = collect_flat(&auth).await;
    let (paged, _) = collect_paged(&auth, PAGE_SIZE).await;

    let unique: BTreeSet<&String> = flat.iter().collect();
    assert_eq!(unique.len(), flat.len(), "flat view returned duplicates");
    assert_eq!(flat.len(), count);
    assert_eq!(flat, paged);
}

/// Test: zero users is an empty sequence, not an error
#[tokio::test]
async fn test_no_users() {
    assert_views_agree(0).await;

    let auth = populated(0).await;
    let (uids, pages) = collect_paged(&auth, PAGE_SIZE).await;
    assert!(uids.is_empty());
    assert_eq!(pages, 1);
}

/// Test: a single user
#[tokio::test]
async fn test_one_user() {
    assert_views_agree(1).await;
}

/// Test: three page boundaries at page size 7
#[tokio::test]
async fn test_three_boundaries() {
    assert_views_agree(3 * PAGE_SIZE + 1).await;

    let auth = populated(3 * PAGE_SIZE + 1).await;
    let (_, pages) = collect_paged(&auth, PAGE_SIZE).await;
    assert_eq!(pages, 4);
}

/// Test: exact multiple of the page size ends without an empty trailing page
#[tokio::test]
async fn test_exact_multiple() {
    let auth = populated(2 * PAGE_SIZE).await;
    let (uids, pages) = collect_paged(&auth, PAGE_SIZE).await;
    assert_eq!(uids.len(), 2 * PAGE_SIZE);
    assert_eq!(pages, 2);
}

/// Test: stream view yields the same users
#[tokio::test]
async fn test_stream_view() {
    let auth = populated(10).await;
    let streamed: Vec<String> = auth
        .list_users(None)
        .into_stream()
        .map(|user| user.expect("Failed to stream user").uid)
        .collect()
        .await;
    assert_eq!(streamed, collect_flat(&auth).await);
}

/// Test: listing reflects deletes between runs
#[tokio::test]
async fn test_listing_after_delete() {
    let auth = populated(5).await;
    auth.delete_user("uid-0002").await.unwrap();

    let uids = collect_flat(&auth).await;
    assert_eq!(uids.len(), 4);
    assert!(!uids.contains(&"uid-0002".to_string()));
}

/// Test: garbage page tokens are rejected by the backend
#[tokio::test]
async fn test_invalid_page_token() {
    let auth = populated(2).await;
    let mut pager = auth.list_users(Some("%%% not a token %%%"));
    assert!(matches!(
        pager.next_page(PAGE_SIZE).await,
        Err(FirebaseError::InvalidArgument(_))
    ));
}
