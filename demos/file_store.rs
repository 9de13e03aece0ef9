//! File-backed store example.
//!
//! Saves an order to a directory of JSON-lines files, drops every handle,
//! reopens the directory and loads the order back. The store's options are
//! read from JSON the way an application would embed them in its own config.
//!
//! Run with: `cargo run --example file_store --features fs`

use eventide::{
    Aggregate, AggregateState, Correlation, DomainEvent, EventRegistry, Handle, Repository, codec,
    store::{EventStore, fs},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineAdded {
    pub sku: String,
    #[serde(with = "codec::decimal")]
    pub price: Decimal,
}

impl DomainEvent for LineAdded {
    const KIND: &'static str = "order.line-added";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderPlaced;

impl DomainEvent for OrderPlaced {
    const KIND: &'static str = "order.placed";
}

#[derive(Debug, Aggregate)]
#[aggregate(events(LineAdded, OrderPlaced))]
pub struct Order {
    #[aggregate(state)]
    state: AggregateState,
    lines: Vec<String>,
    total: Decimal,
    placed: bool,
}

impl Order {
    fn new(id: &str) -> Result<Self, eventide::aggregate::ConfigurationError> {
        Ok(Self {
            state: AggregateState::new(id)?,
            lines: Vec::new(),
            total: Decimal::ZERO,
            placed: false,
        })
    }
}

impl Handle<LineAdded> for Order {
    fn handle(&mut self, event: &LineAdded) {
        self.lines.push(event.sku.clone());
        self.total += event.price;
    }
}

impl Handle<OrderPlaced> for Order {
    fn handle(&mut self, _event: &OrderPlaced) {
        self.placed = true;
    }
}

async fn open(root: &std::path::Path) -> Result<Repository<fs::Store>, Box<dyn std::error::Error>> {
    let config = serde_json::json!({ "root": root, "sync_writes": true });
    let options: fs::Options = serde_json::from_value(config)?;
    let registry = EventRegistry::new().with_aggregate::<Order>();
    Ok(Repository::new(fs::Store::open(options, registry).await?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    println!("Store root: {}", dir.path().display());

    {
        let repository = open(dir.path()).await?;
        let mut order = Order::new("order-1001")?;
        order.apply(LineAdded {
            sku: "kettle".into(),
            price: Decimal::new(2999, 2),
        });
        order.apply(LineAdded {
            sku: "filter".into(),
            price: Decimal::new(10, 0),
        });
        order.apply(OrderPlaced);
        repository
            .save(&mut order, &Correlation::default().in_conversation("checkout-77"))
            .await?;
        println!("Saved order at revision {}", order.revision());
    }

    let repository = open(dir.path()).await?;
    let mut order = Order::new("order-1001")?;
    repository.load(&mut order).await?;
    println!(
        "Reloaded: {:?}, total {}, placed: {}",
        order.lines,
        codec::decimal::format(&order.total),
        order.placed
    );

    let slice = repository.store().read_all("order-1001").await?;
    for message in &slice {
        println!("  {} {} {:?}", message.id, message.kind(), message.headers);
    }
    Ok(())
}
