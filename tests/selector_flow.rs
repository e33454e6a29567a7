mod common;

use std::sync::{Arc, Mutex};

use fetchcache::cache::{
    EqualityChecker, FetchCache, FetchOptions, RequestKey, SelectedValues, compute_key,
};
use serde_json::json;
use tokio::sync::mpsc;

use common::FakeClient;

const FIRST: &str = "https://api.example.com/first";
const SECOND: &str = "https://api.example.com/second";

fn hash_of(url: &str) -> String {
    compute_key(&RequestKey::from(url), &FetchOptions::new())
        .expect("key computed")
        .hash()
        .expect("request")
        .to_string()
}

fn client() -> FakeClient {
    FakeClient::new()
        .respond(FIRST, 200, r#"{"n":1}"#)
        .respond(SECOND, 200, r#"{"n":2}"#)
}

#[tokio::test]
async fn watch_sees_loading_then_data() {
    let cache = FetchCache::builder()
        .fetch_client(client())
        .build()
        .expect("cache should build");
    let key = RequestKey::from(FIRST);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let watch = cache
        .watch(&key, &FetchOptions::new(), move |values: &SelectedValues| {
            sink.lock().expect("test lock").push(values.clone());
        })
        .expect("key computed");

    cache
        .server_fetch(&key, &FetchOptions::new())
        .await
        .expect("fetch should settle");

    let seen = seen.lock().expect("test lock");
    assert_eq!(seen.len(), 2);
    assert!(seen[0].loading);
    assert!(!seen[1].loading);
    assert_eq!(
        seen[1].data.as_ref().map(|payload| payload.body.clone()),
        Some(json!({ "n": 1 }))
    );
    assert_eq!(watch.current(), seen[1]);
}

#[tokio::test]
async fn unrelated_hashes_do_not_wake_a_watch() {
    let cache = FetchCache::builder()
        .fetch_client(client())
        .build()
        .expect("cache should build");
    let (tx, mut rx) = mpsc::unbounded_channel::<SelectedValues>();
    let _watch = cache
        .watch(&RequestKey::from(FIRST), &FetchOptions::new(), move |values| {
            let _ = tx.send(values.clone());
        })
        .expect("key computed");

    cache
        .server_fetch(&RequestKey::from(SECOND), &FetchOptions::new())
        .await
        .expect("fetch should settle");

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn switching_keys_never_leaks_previous_data() {
    let cache = FetchCache::builder()
        .fetch_client(client())
        .build()
        .expect("cache should build");
    cache
        .server_fetch(&RequestKey::from(FIRST), &FetchOptions::new())
        .await
        .expect("fetch should settle");

    let watch = cache
        .selector()
        .watch(Some(hash_of(FIRST)), |_: &SelectedValues| {});
    assert!(watch.current().data.is_some());

    watch.set_hash(Some(hash_of(SECOND)));
    assert!(watch.current().is_idle());

    cache
        .server_fetch(&RequestKey::from(SECOND), &FetchOptions::new())
        .await
        .expect("fetch should settle");
    assert_eq!(
        watch.current().data.map(|payload| payload.body),
        Some(json!({ "n": 2 }))
    );
}

#[tokio::test]
async fn equality_checker_controls_wakeups() {
    let data_only: EqualityChecker = Arc::new(|previous: &SelectedValues, next: &SelectedValues| {
        previous.data == next.data
    });
    let cache = FetchCache::builder()
        .fetch_client(client())
        .equality_checker(data_only)
        .build()
        .expect("cache should build");

    let wakeups = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&wakeups);
    let _watch = cache
        .watch(&RequestKey::from(FIRST), &FetchOptions::new(), move |_| {
            *counter.lock().expect("test lock") += 1;
        })
        .expect("key computed");

    cache
        .server_fetch(&RequestKey::from(FIRST), &FetchOptions::new())
        .await
        .expect("fetch should settle");

    assert_eq!(*wakeups.lock().expect("test lock"), 1);
}
