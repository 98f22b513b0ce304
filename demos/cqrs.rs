//! Color catalog - commands, queries and pipeline behaviors.
//!
//! This example demonstrates:
//! - Registering handler types resolved from a [`ServiceCollection`]
//! - Logging, retry, validation and caching behaviors
//! - Per-request scopes with `Mediator::with_resolver`
//!
//! ```text
//! RUST_LOG=source_mediator=debug cargo run --example cqrs
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use source_mediator::cache::InMemoryCacheStore;
use source_mediator::pipeline::behaviors::{
    Cacheable, InvalidatesCache, Validate, ValidationErrors, Validator,
};
use source_mediator::{
    Command, CommandHandler, DispatchContext, HandlerResult, Mediator, MediatorConfig,
    Notification, NotificationHandler, Query, Request, RequestHandler, ResolverExt,
    ServiceCollection,
};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Color {
    id: u32,
    name: String,
    hex: String,
}

/// In-memory color storage shared by all handlers.
#[derive(Default)]
struct ColorRepository {
    next_id: AtomicU32,
    colors: RwLock<HashMap<u32, Color>>,
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
            .max_length("Name", &self.name, 50)
            .hex_color("Hex", &self.hex)
            .finish()
    }
}

impl InvalidatesCache for CreateColor {
    fn invalidation_fragment(&self) -> Option<String> {
        Some("ListColors".to_string())
    }
}

struct ListColors;

impl Request for ListColors {
    type Response = Vec<Color>;
}
impl Query for ListColors {}

impl Cacheable for ListColors {
    fn cache_key(&self) -> Option<String> {
        Some("ListColors".to_string())
    }
}

#[derive(Debug)]
struct ColorCreated {
    name: String,
}
impl Notification for ColorCreated {}

struct CreateColorHandler {
    repo: Arc<ColorRepository>,
}

impl CommandHandler<CreateColor> for CreateColorHandler {
    async fn handle(&self, command: &CreateColor, _ctx: &DispatchContext) -> HandlerResult {
        let id = self.repo.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let color = Color {
            id,
            name: command.name.clone(),
            hex: command.hex.clone(),
        };
        self.repo.colors.write().await.insert(id, color);
        Ok(())
    }
}

struct ListColorsHandler {
    repo: Arc<ColorRepository>,
}

impl RequestHandler<ListColors> for ListColorsHandler {
    async fn handle(&self, _query: &ListColors, _ctx: &DispatchContext) -> HandlerResult<Vec<Color>> {
        let mut colors: Vec<Color> = self.repo.colors.read().await.values().cloned().collect();
        colors.sort_by_key(|c| c.id);
        Ok(colors)
    }
}

struct AuditLog;

impl NotificationHandler<ColorCreated> for AuditLog {
    async fn handle(&self, event: &ColorCreated, ctx: &DispatchContext) -> HandlerResult {
        tracing::info!(call_id = ctx.call_id(), name = %event.name, "Color created");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "source_mediator=debug,cqrs=info".into()),
        )
        .init();

    let config = MediatorConfig::from_json_str(
        r#"{
            "retry": { "max_attempts": 2 },
            "logging": { "slow_threshold_ms": 250 },
            "cache": { "default_ttl_secs": 30 }
        }"#,
    )?;

    let provider = ServiceCollection::new()
        .add_singleton(ColorRepository::default())
        .add_transient(|r| {
            Ok(CreateColorHandler {
                repo: r.resolve::<ColorRepository>()?,
            })
        })
        .add_transient(|r| {
            Ok(ListColorsHandler {
                repo: r.resolve::<ColorRepository>()?,
            })
        })
        .add_singleton(AuditLog)
        .build();

    let cache = Arc::new(InMemoryCacheStore::new());

    let mediator = Mediator::builder()
        .config(config)
        .command::<CreateColor, CreateColorHandler>()?
        .request::<ListColors, ListColorsHandler>()?
        .notification::<ColorCreated, AuditLog>()
        .with_logging(-100)
        .with_retry(-50)
        .with_validation::<CreateColor>(0)
        .with_cache_invalidation::<CreateColor>(10, cache.clone())
        .with_caching::<ListColors>(10, cache.clone())
        .build(Arc::new(provider.clone()));

    for (name, hex) in [("Teal", "#008080"), ("Coral", "#FF7F50")] {
        let scoped = mediator.with_resolver(Arc::new(provider.create_scope()));
        scoped
            .send_command(CreateColor {
                name: name.to_string(),
                hex: hex.to_string(),
            })
            .await?;
        scoped
            .publish(ColorCreated {
                name: name.to_string(),
            })
            .await?;
    }

    let colors = mediator.send_query(ListColors).await?;
    let cached = mediator.send_query(ListColors).await?;
    println!("{} colors ({} from cache)", colors.len(), cached.len());

    match mediator
        .send_command(CreateColor {
            name: String::new(),
            hex: "green".to_string(),
        })
        .await
    {
        Err(e) => println!("rejected: {e}"),
        Ok(()) => println!("unexpectedly accepted"),
    }

    Ok(())
}
