//! Integration tests for the built-in pipeline behaviors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use source_mediator::cache::{CacheStore, InMemoryCacheStore};
use source_mediator::pipeline::behaviors::{
    Cacheable, InvalidatesCache, RetryPolicy, Validate, ValidationErrors, Validator,
};
use source_mediator::{
    CancellationToken, Command, EmptyResolver, HandlerResult, Mediator, MediatorConfig,
    MediatorError, Query, Request,
};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[derive(Debug, thiserror::Error)]
#[error("transient failure")]
struct Transient;

struct Flaky;
impl Request for Flaky {
    type Response = u32;
}
impl Query for Flaky {}

fn flaky_mediator(calls: Arc<AtomicUsize>, fail_times: usize, policy: RetryPolicy) -> Mediator {
    Mediator::builder()
        .request_fn(move |_q: Arc<Flaky>, _ctx| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < fail_times {
                    return Err(Transient.into());
                }
                HandlerResult::Ok(attempt as u32)
            }
        })
        .unwrap()
        .retry_policy(policy)
        .with_retry(0)
        .build(Arc::new(EmptyResolver))
}

/// Retries until the handler succeeds.
#[tokio::test(start_paused = true)]
async fn test_retry_recovers() {
    let calls = counter();
    let mediator = flaky_mediator(calls.clone(), 2, RetryPolicy::default());

    let value = mediator.send_query(Flaky).await.unwrap();
    assert_eq!(value, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Gives up after `max_attempts` and returns the last error.
#[tokio::test(start_paused = true)]
async fn test_retry_gives_up() {
    let calls = counter();
    let policy = RetryPolicy {
        max_attempts: 2,
        ..RetryPolicy::default()
    };
    let mediator = flaky_mediator(calls.clone(), 10, policy);

    let err = mediator.send_query(Flaky).await.unwrap_err();
    assert!(matches!(err, MediatorError::HandlerExecution { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Cancellation during backoff ends the retry loop.
#[tokio::test(start_paused = true)]
async fn test_retry_backoff_is_cancellable() {
    let calls = counter();
    let policy = RetryPolicy {
        max_attempts: 5,
        initial_backoff_ms: 60_000,
        max_backoff_ms: 60_000,
        multiplier: 1.0,
    };
    let mediator = flaky_mediator(calls.clone(), 10, policy);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = mediator
        .send_query_with_cancellation(Flaky, token)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct CreateColor {
    name: String,
    hex: String,
}
impl Request for CreateColor {
    type Response = ();
}
impl Command for CreateColor {}

impl Validate for CreateColor {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .required("Name", &self.name)
            .max_length("Name", &self.name, 20)
            .hex_color("Hex", &self.hex)
            .finish()
    }
}

/// Invalid requests never reach the handler; validation errors are not retried.
#[tokio::test]
async fn test_validation_short_circuits() {
    let calls = counter();
    let c = calls.clone();
    let mediator = Mediator::builder()
        .command_fn(move |_cmd: Arc<CreateColor>, _ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            async { HandlerResult::Ok(()) }
        })
        .unwrap()
        .with_retry(-10)
        .with_validation::<CreateColor>(0)
        .build(Arc::new(EmptyResolver));

    let err = mediator
        .send_command(CreateColor {
            name: "".into(),
            hex: "blue".into(),
        })
        .await
        .unwrap_err();

    match err {
        MediatorError::Validation(errors) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(
                errors.for_field("Hex").collect::<Vec<_>>(),
                vec!["Color must be a valid hexadecimal code in the form '#RRGGBB'."]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    mediator
        .send_command(CreateColor {
            name: "Teal".into(),
            hex: "#008080".into(),
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ColorDto {
    id: u32,
    hex: String,
}

struct GetColor {
    id: u32,
}
impl Request for GetColor {
    type Response = ColorDto;
}
impl Query for GetColor {}

impl Cacheable for GetColor {
    fn cache_key(&self) -> Option<String> {
        Some(format!("GetColor:{}", self.id))
    }
}

struct RenameColor {
    id: u32,
}
impl Request for RenameColor {
    type Response = ();
}
impl Command for RenameColor {}

impl InvalidatesCache for RenameColor {
    fn invalidation_fragment(&self) -> Option<String> {
        Some("GetColor".to_string())
    }
}

/// Read-through cache serves repeats and is cleared by invalidating commands.
#[tokio::test]
async fn test_caching_and_invalidation() {
    let store = Arc::new(InMemoryCacheStore::new());
    let calls = counter();
    let c = calls.clone();

    let mediator = Mediator::builder()
        .request_fn(move |q: Arc<GetColor>, _ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                HandlerResult::Ok(ColorDto {
                    id: q.id,
                    hex: "#008080".into(),
                })
            }
        })
        .unwrap()
        .command_fn(|_cmd: Arc<RenameColor>, _ctx| async { HandlerResult::Ok(()) })
        .unwrap()
        .with_caching::<GetColor>(0, store.clone())
        .with_cache_invalidation::<RenameColor>(0, store.clone())
        .build(Arc::new(EmptyResolver));

    let first = mediator.send_query(GetColor { id: 1 }).await.unwrap();
    let second = mediator.send_query(GetColor { id: 1 }).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.exists("GetColor:1").await.unwrap());

    mediator.send_command(RenameColor { id: 1 }).await.unwrap();
    assert!(!store.exists("GetColor:1").await.unwrap());

    mediator.send_query(GetColor { id: 1 }).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Cached entries expire after the configured default TTL.
#[tokio::test(start_paused = true)]
async fn test_cache_uses_configured_ttl() {
    let store = Arc::new(InMemoryCacheStore::new());
    let calls = counter();
    let c = calls.clone();
    let config = MediatorConfig::from_json_str(r#"{"cache": {"default_ttl_secs": 60}}"#).unwrap();

    let mediator = Mediator::builder()
        .config(config)
        .request_fn(move |q: Arc<GetColor>, _ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                HandlerResult::Ok(ColorDto {
                    id: q.id,
                    hex: "#000000".into(),
                })
            }
        })
        .unwrap()
        .with_caching::<GetColor>(0, store.clone())
        .build(Arc::new(EmptyResolver));

    mediator.send_query(GetColor { id: 2 }).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    mediator.send_query(GetColor { id: 2 }).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    mediator.send_query(GetColor { id: 2 }).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// A TTL too large for the clock caches without expiring.
#[tokio::test]
async fn test_cache_accepts_unbounded_ttl() {
    let store = Arc::new(InMemoryCacheStore::new());
    let calls = counter();
    let c = calls.clone();
    let config =
        MediatorConfig::from_json_str(r#"{"cache": {"default_ttl_secs": 18446744073709551615}}"#)
            .unwrap();

    let mediator = Mediator::builder()
        .config(config)
        .request_fn(move |q: Arc<GetColor>, _ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                HandlerResult::Ok(ColorDto {
                    id: q.id,
                    hex: "#123456".into(),
                })
            }
        })
        .unwrap()
        .with_caching::<GetColor>(0, store.clone())
        .build(Arc::new(EmptyResolver));

    mediator.send_query(GetColor { id: 4 }).await.unwrap();
    mediator.send_query(GetColor { id: 4 }).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.exists("GetColor:4").await.unwrap());
}

/// An entry that no longer decodes is replaced instead of failing the query.
#[tokio::test]
async fn test_undecodable_cache_entry_is_replaced() {
    let store = Arc::new(InMemoryCacheStore::new());
    store
        .set("GetColor:3", bytes::Bytes::from_static(b"not json"), None)
        .await
        .unwrap();

    let mediator = Mediator::builder()
        .request_fn(|q: Arc<GetColor>, _ctx| async move {
            HandlerResult::Ok(ColorDto {
                id: q.id,
                hex: "#FFFFFF".into(),
            })
        })
        .unwrap()
        .with_caching::<GetColor>(0, store.clone())
        .build(Arc::new(EmptyResolver));

    let dto = mediator.send_query(GetColor { id: 3 }).await.unwrap();
    assert_eq!(dto.hex, "#FFFFFF");

    let cached = store.get("GetColor:3").await.unwrap().unwrap();
    let decoded: ColorDto = serde_json::from_slice(&cached).unwrap();
    assert_eq!(decoded, dto);
}

/// The logging behavior passes values and errors through unchanged.
#[tokio::test]
async fn test_logging_is_transparent() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("source_mediator=debug")
        .with_test_writer()
        .try_init();

    let mediator = Mediator::builder()
        .request_fn(|_q: Arc<Flaky>, _ctx| async { HandlerResult::Ok(5u32) })
        .unwrap()
        .command_fn(|_cmd: Arc<RenameColor>, _ctx| async {
            HandlerResult::<()>::Err(Transient.into())
        })
        .unwrap()
        .slow_threshold(Duration::from_millis(1))
        .with_logging(-100)
        .build(Arc::new(EmptyResolver));

    assert_eq!(mediator.send_query(Flaky).await.unwrap(), 5);
    let err = mediator.send_command(RenameColor { id: 1 }).await.unwrap_err();
    assert!(matches!(err, MediatorError::HandlerExecution { .. }));
}
