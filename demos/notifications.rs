//! Notification fan-out with failure aggregation.
//!
//! This example demonstrates:
//! - Several handlers for one notification, run concurrently
//! - A failing handler that does not stop the others
//! - Inspecting the aggregated failures
//! - Publishing an erased notification with `publish_any`
//!
//! ```text
//! cargo run --example notifications
//! ```

use std::sync::Arc;
use std::time::Duration;

use source_mediator::{
    CancellationToken, EmptyResolver, HandlerResult, Mediator, MediatorError, Notification,
};

#[derive(Debug)]
struct OrderPlaced {
    order_id: u64,
    total_cents: u64,
}
impl Notification for OrderPlaced {}

#[derive(Debug, thiserror::Error)]
#[error("mail server unavailable")]
struct MailDown;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "source_mediator=debug".into()),
        )
        .init();

    let mediator = Mediator::builder()
        .max_concurrent_notification_handlers(2)
        .notification_fn(|event: Arc<OrderPlaced>, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            println!("inventory reserved for order {}", event.order_id);
            HandlerResult::Ok(())
        })
        .notification_fn(|_event: Arc<OrderPlaced>, _ctx| async {
            HandlerResult::Err(MailDown.into())
        })
        .notification_fn(|event: Arc<OrderPlaced>, ctx| async move {
            println!(
                "call {} billed {}.{:02}",
                ctx.call_id(),
                event.total_cents / 100,
                event.total_cents % 100
            );
            HandlerResult::Ok(())
        })
        .build(Arc::new(EmptyResolver));

    let result = mediator
        .publish(OrderPlaced {
            order_id: 42,
            total_cents: 1999,
        })
        .await;

    match result {
        Err(MediatorError::AggregateNotification(failures)) => {
            println!(
                "{} of {} handlers failed for {}",
                failures.len(),
                failures.attempted(),
                failures.notification()
            );
            for failure in failures.failures() {
                println!("  #{} {}: {}", failure.index, failure.handler, failure.error);
            }
        }
        Err(e) => return Err(e.into()),
        Ok(()) => println!("all handlers succeeded"),
    }

    let erased: Arc<dyn std::any::Any + Send + Sync> = Arc::new(OrderPlaced {
        order_id: 43,
        total_cents: 500,
    });
    if let Err(e) = mediator.publish_any(erased, CancellationToken::new()).await {
        println!("erased publish: {e}");
    }

    Ok(())
}
