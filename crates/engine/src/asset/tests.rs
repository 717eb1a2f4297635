use std::sync::Arc;
use std::time::Duration;

use assetry_client::fetch::mock::{MockResponse, MockTransport};
use assetry_client::{FetchConfig, Transport};
use assetry_core::{StoreRegistry, StoreTarget};
use tokio::time::Instant;

use super::*;
use crate::test_support::setup;

const GIF: &str = "https://media.example.com/party.gif";

struct Fixture {
    mock: Arc<MockTransport>,
    client: Arc<FetchClient>,
    registry: Arc<StoreRegistry>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    fn new(target: StoreTarget) -> Self {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let mock = MockTransport::new();
        let transport: Arc<dyn Transport> = mock.clone();
        let config = FetchConfig { download_dir: dir.path().join("downloads"), ..Default::default() };
        Self {
            mock,
            client: Arc::new(FetchClient::with_transport(config, transport)),
            registry: StoreRegistry::new(target),
            _dir: dir,
        }
    }

    fn cache(&self, category: &str) -> AssetCache {
        AssetCache::new(Arc::clone(&self.client), self.registry.store(category), None)
    }

    fn cache_with_retry(&self, category: &str, retry: RetryPolicy) -> AssetCache {
        AssetCache::new(Arc::clone(&self.client), self.registry.store(category), Some(retry))
    }

    fn download_dir(&self) -> &std::path::Path {
        &self.client.config().download_dir
    }
}

fn gif() -> MockResponse {
    MockResponse::ok(&b"GIF89a"[..])
        .with_header("Content-Type", "image/gif")
        .with_delay(Duration::from_millis(20))
}

#[tokio::test]
async fn test_concurrent_gets_share_one_fetch() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, gif());
    let cache = fx.cache("gifs");

    let (a, b, c) = tokio::join!(cache.get(GIF, None), cache.get(GIF, None), cache.get(GIF, None));
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a.resource().content_type(), Some("image/gif"));
    assert_eq!(fx.mock.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_failures_share_one_error() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, MockResponse::status(500).with_delay(Duration::from_millis(20)));
    let cache = fx.cache("gifs");

    let (a, b) = tokio::join!(cache.get(GIF, None), cache.get(GIF, None));
    assert!(matches!(a, Err(Error::HttpStatus { status: 500, .. })));
    assert!(matches!(b, Err(Error::HttpStatus { status: 500, .. })));
    assert_eq!(fx.mock.call_count(), 1);
    assert!(cache.handle(GIF).is_none());
    assert!(!cache.inner.in_flight.contains(&CacheKey::parse(GIF).unwrap()));
}

#[tokio::test]
async fn test_resolved_key_needs_no_io() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, gif());
    let cache = fx.cache("gifs");

    let first = cache.get(GIF, None).await.unwrap();
    // the stored entry is gone, so only the handle map can answer
    fx.registry.store("gifs").delete(&CacheKey::parse(GIF).unwrap()).await.unwrap();

    let again = cache.get(" https://MEDIA.example.com/party.gif#loop ", None).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(fx.mock.call_count(), 1);
    assert_eq!(cache.handle_count(), 1);
}

#[tokio::test]
async fn test_new_instance_is_served_from_store() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, gif());

    let first = fx.cache("gifs").get(GIF, None).await.unwrap();
    let second = fx.cache("gifs").get(GIF, None).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(first.resource(), second.resource());
    assert_eq!(fx.mock.call_count(), 1);
}

#[tokio::test]
async fn test_origin_no_store_is_refetched() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, gif().with_header("Cache-Control", "no-store"));

    fx.cache("images").get(GIF, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    fx.cache("images").get(GIF, None).await.unwrap();

    assert_eq!(fx.mock.call_count(), 2);
}

#[tokio::test]
async fn test_force_cache_overrides_no_store() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, gif().with_header("Cache-Control", "no-store"));

    fx.cache("video").with_force_cache().get(GIF, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    fx.cache("video").get(GIF, None).await.unwrap();

    assert_eq!(fx.mock.call_count(), 1);
}

#[tokio::test]
async fn test_untrusted_sequential_instances_fetch_twice() {
    let fx = Fixture::new(StoreTarget::Untrusted);
    fx.mock.enqueue(GIF, gif());

    fx.cache("gifs").get(GIF, None).await.unwrap();
    fx.cache("gifs").get(GIF, None).await.unwrap();

    assert_eq!(fx.mock.call_count(), 2);
}

#[tokio::test]
async fn test_untrusted_concurrent_gets_fetch_once() {
    let fx = Fixture::new(StoreTarget::Untrusted);
    fx.mock.enqueue(GIF, gif());
    let cache = fx.cache("gifs");

    let (a, b) = tokio::join!(cache.get(GIF, None), cache.get(GIF, None));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(fx.mock.call_count(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, gif());
    let cache = fx.cache("gifs");

    let first = cache.get(GIF, None).await.unwrap();
    assert!(cache.invalidate(GIF).await.unwrap());
    assert!(!cache.invalidate(GIF).await.unwrap());

    let second = cache.get(GIF, None).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(fx.mock.call_count(), 2);
}

#[tokio::test]
async fn test_invalid_key() {
    let fx = Fixture::new(StoreTarget::InMemory);
    let err = fx.cache("gifs").get("ftp://example.com/a.gif", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
    assert_eq!(fx.mock.call_count(), 0);
}

#[tokio::test]
async fn test_run_fires_one_callback_per_item() {
    let fx = Fixture::new(StoreTarget::InMemory);
    let a = "https://media.example.com/a.png";
    let b = "https://media.example.com/b.png";
    let broken = "https://media.example.com/broken.png";
    fx.mock.enqueue(a, MockResponse::ok(&b"A"[..]).with_delay(Duration::from_millis(30)));
    fx.mock.enqueue(b, MockResponse::ok(&b"B"[..]).with_delay(Duration::from_millis(10)));
    fx.mock.enqueue(broken, MockResponse::status(404));

    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let item = |key: &str, tag: &'static str| {
        let ok = Arc::clone(&events);
        let err = Arc::clone(&events);
        BatchItem::new(key)
            .on_success(move |h| ok.lock().push(format!("{tag}:ok:{}", h.resource().len())))
            .on_failure(move |e| err.lock().push(format!("{tag}:err:{}", matches!(e, Error::HttpStatus { .. }))))
    };

    let mut settled = Vec::new();
    let summary = fx
        .cache("images")
        .run_with(
            vec![item(a, "img1"), item(b, "img2"), item(broken, "img3"), item(a, "img4"), item("A.png?x", "img5")],
            None,
            |key, _| settled.push(key.to_string()),
        )
        .await;

    assert_eq!(
        summary,
        BatchSummary { keys: 4, items: 5, succeeded: 2, failed: 2, cancelled: 0 }
    );
    assert!(!summary.is_complete_success());

    let events = events.lock();
    assert_eq!(events.len(), 5);
    assert!(events.contains(&"img1:ok:1".to_string()));
    assert!(events.contains(&"img4:ok:1".to_string()));
    assert!(events.contains(&"img2:ok:1".to_string()));
    assert!(events.contains(&"img3:err:true".to_string()));
    // unscripted URL answers 404
    assert!(events.contains(&"img5:err:true".to_string()));

    // b settles before a
    let pos = |k: &str| settled.iter().position(|s| s == k).unwrap();
    assert!(pos(b) < pos(a));
    assert_eq!(fx.mock.calls_to(a), 1);
}

#[tokio::test]
async fn test_run_empty_batch() {
    let fx = Fixture::new(StoreTarget::InMemory);
    let summary = fx.cache("images").run(Vec::new(), None).await;
    assert_eq!(summary, BatchSummary::default());
    assert!(summary.is_complete_success());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_reaches_every_waiter() {
    let fx = Fixture::new(StoreTarget::Untrusted);
    fx.mock.enqueue(GIF, MockResponse::ok(&b"GIF89a"[..]).with_delay(Duration::from_secs(10)));
    let cache = fx.cache("gifs");
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        })
    };

    let (owner, waiter) = tokio::join!(cache.get(GIF, Some(token)), cache.get(GIF, None));
    assert!(owner.unwrap_err().is_cancelled());
    assert!(waiter.unwrap_err().is_cancelled());
    canceller.await.unwrap();

    // nothing was recorded, a later call starts over
    assert!(cache.handle(GIF).is_none());
    assert!(cache.get(GIF, None).await.is_ok());
    assert_eq!(fx.mock.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_joined_caller_can_stop_waiting_alone() {
    let fx = Fixture::new(StoreTarget::Untrusted);
    fx.mock.enqueue(GIF, MockResponse::ok(&b"GIF89a"[..]).with_delay(Duration::from_secs(1)));
    let cache = fx.cache("gifs");
    let token = CancellationToken::new();
    token.cancel();

    let (owner, waiter) = tokio::join!(cache.get(GIF, None), async {
        tokio::task::yield_now().await;
        cache.get(GIF, Some(token)).await
    });

    assert!(owner.is_ok());
    assert!(waiter.unwrap_err().is_cancelled());
    assert_eq!(fx.mock.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_schedule_through_cache() {
    let fx = Fixture::new(StoreTarget::Untrusted);
    fx.mock.enqueue(GIF, MockResponse::status(503));
    let cache = fx.cache_with_retry("gifs", RetryPolicy::new(3, Duration::from_millis(1000)));

    let err = cache.get(GIF, None).await.unwrap_err();
    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 4, .. }));

    let calls = fx.mock.calls();
    let first: Instant = calls[0].at;
    let offsets: Vec<_> = calls.iter().map(|c| c.at - first).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(1000),
            Duration::from_millis(3000),
            Duration::from_millis(7000),
        ]
    );
}

#[tokio::test]
async fn test_download_by_handle() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock.enqueue(GIF, gif());
    let cache = fx.cache("gifs");

    let handle = cache.get(GIF, None).await.unwrap();
    assert!(cache.download(handle.id(), "party.gif").await.unwrap());

    assert_eq!(std::fs::read(fx.download_dir().join("party.gif")).unwrap(), b"GIF89a");
    assert_eq!(fx.mock.call_count(), 1);
}

#[tokio::test]
async fn test_download_unknown_handle() {
    let fx = Fixture::new(StoreTarget::InMemory);
    let err = fx.cache("gifs").download("blob:assetry/nope", "x.gif").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_download_falls_back_to_direct_fetch() {
    let fx = Fixture::new(StoreTarget::InMemory);
    fx.mock
        .enqueue(GIF, MockResponse::status(502))
        .enqueue(GIF, MockResponse::ok(&b"GIF89a"[..]));
    let cache = fx.cache("gifs");

    assert!(cache.download(GIF, "party.gif").await.unwrap());
    assert!(fx.download_dir().join("party.gif").exists());
    assert_eq!(fx.mock.call_count(), 2);
    assert!(cache.handle(GIF).is_none());
}

#[tokio::test]
async fn test_probe() {
    let fx = Fixture::new(StoreTarget::InMemory);
    let clip = "https://media.example.com/clip.mp4";
    fx.mock.enqueue(clip, MockResponse::status(206).with_header("Content-Range", "bytes 0-1/2048"));

    let support = fx.cache("video").probe(clip).await.unwrap();
    assert_eq!(support, RangeSupport::Partial { total: Some(2048) });
}
