//! Demonstrates optimistic concurrency control.
//!
//! Two writers load the same aggregate, both change it, and only the first
//! save succeeds. The second writer reloads and retries against fresh state,
//! which is where business rules get re-checked. Finally, a single-writer
//! stream skips the revision check entirely.
//!
//! Run with: `cargo run --example optimistic_concurrency --features test-util`

use eventide::{
    Aggregate, AggregateState, Correlation, DomainEvent, Handle, Repository,
    repository::Error,
    store::inmemory,
    test::StoreTestExt,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemRestocked {
    pub quantity: u32,
}

impl DomainEvent for ItemRestocked {
    const KIND: &'static str = "inventory.restocked";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemReserved {
    pub quantity: u32,
}

impl DomainEvent for ItemReserved {
    const KIND: &'static str = "inventory.reserved";
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("requested {requested} but only {available} available")]
    InsufficientStock { requested: u32, available: u32 },
}

#[derive(Aggregate)]
#[aggregate(events(ItemRestocked, ItemReserved))]
pub struct InventoryItem {
    #[aggregate(state)]
    state: AggregateState,
    available: u32,
}

impl InventoryItem {
    fn new(sku: &str) -> Result<Self, eventide::aggregate::ConfigurationError> {
        Ok(Self {
            state: AggregateState::new(sku)?,
            available: 0,
        })
    }

    fn restock(&mut self, quantity: u32) {
        self.apply(ItemRestocked { quantity });
    }

    fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity > self.available {
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available: self.available,
            });
        }
        self.apply(ItemReserved { quantity });
        Ok(())
    }
}

impl Handle<ItemRestocked> for InventoryItem {
    fn handle(&mut self, event: &ItemRestocked) {
        self.available += event.quantity;
    }
}

impl Handle<ItemReserved> for InventoryItem {
    fn handle(&mut self, event: &ItemReserved) {
        self.available -= event.quantity;
    }
}

type Repo = Repository<inmemory::Store>;

async fn load(repo: &Repo, sku: &str) -> Result<InventoryItem, Box<dyn std::error::Error>> {
    let mut item = InventoryItem::new(sku)?;
    repo.load(&mut item).await?;
    Ok(item)
}

/// Reserve `quantity`, reloading and retrying when another writer got there
/// first. Returns the number of attempts taken.
async fn reserve_with_retry(
    repo: &Repo,
    sku: &str,
    quantity: u32,
    max_attempts: u32,
) -> Result<u32, Box<dyn std::error::Error>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut item = load(repo, sku).await?;
        item.reserve(quantity)?;
        match repo.save(&mut item, &Correlation::default()).await {
            Ok(_) => return Ok(attempt),
            Err(err) if err.is_conflict() && attempt < max_attempts => {
                println!("   attempt {attempt} conflicted: {err}");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Optimistic Concurrency Example ===\n");
    let repo = Repository::new(inmemory::Store::new());

    let mut item = InventoryItem::new("SKU-001")?;
    item.restock(100);
    repo.save(&mut item, &Correlation::default()).await?;
    println!("1. Restocked SKU-001 with 100 units");

    println!("\n2. Two writers load revision 1 and both reserve...");
    let mut writer_a = load(&repo, "SKU-001").await?;
    let mut writer_b = load(&repo, "SKU-001").await?;
    writer_a.reserve(30)?;
    writer_b.reserve(50)?;

    repo.save(&mut writer_a, &Correlation::default()).await?;
    println!("   writer A saved, stream is at revision {}", writer_a.revision());

    match repo.save(&mut writer_b, &Correlation::default()).await {
        Err(Error::Store(eventide::store::Error::Conflict(conflict))) => {
            println!("   writer B rejected: {conflict}");
        }
        Ok(_) => println!("   writer B unexpectedly succeeded"),
        Err(err) => return Err(err.into()),
    }

    println!("\n3. Another service reserves behind our back, then we retry...");
    repo.store()
        .inject_concurrent_event("SKU-001", ItemReserved { quantity: 5 })
        .await?;
    let attempts = reserve_with_retry(&repo, "SKU-001", 10, 3).await?;
    println!("   reserved 10 units after {attempts} attempt(s)");

    let item = load(&repo, "SKU-001").await?;
    println!("   available: {} (100 - 30 - 5 - 10)", item.available);
    assert_eq!(item.available, 55);

    println!("\n4. Rules are checked against fresh state...");
    match reserve_with_retry(&repo, "SKU-001", 80, 3).await {
        Err(err) => println!("   rejected: {err}"),
        Ok(_) => println!("   unexpectedly succeeded"),
    }

    println!("\n5. A single writer can skip the revision check...");
    let mut stale = InventoryItem::new("SKU-001")?;
    stale.restock(20);
    repo.save_without_concurrency_check(&mut stale, &Correlation::default())
        .await?;
    let item = load(&repo, "SKU-001").await?;
    println!(
        "   available: {} at revision {}",
        item.available,
        item.revision()
    );

    Ok(())
}
