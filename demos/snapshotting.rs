//! Snapshotting Example
//!
//! Demonstrates how snapshots shorten loading for long-lived aggregates:
//!
//! - **Readiness**: an aggregate reports when enough events have been applied
//!   or replayed since its last snapshot
//! - **Snapshot-based loading**: restore from the latest snapshot, then replay
//!   only the events committed after it
//! - **Fallback**: aggregates without a snapshot load from their stream
//!
//! Set `RUST_LOG=eventide=debug` to watch the repository work.
//!
//! Run with: `cargo run --example snapshotting`

use eventide::{
    Aggregate, AggregateState, Correlation, DomainEvent, Handle, Repository, codec,
    snapshot::Snapshotting, store::inmemory,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// =============================================================================
// Domain Events
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointsEarned {
    #[serde(with = "codec::decimal")]
    pub amount: Decimal,
    pub reason: String,
}

impl DomainEvent for PointsEarned {
    const KIND: &'static str = "loyalty.points.earned";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointsRedeemed {
    #[serde(with = "codec::decimal")]
    pub amount: Decimal,
    pub reward: String,
}

impl DomainEvent for PointsRedeemed {
    const KIND: &'static str = "loyalty.points.redeemed";
}

// =============================================================================
// Loyalty Account Aggregate
// =============================================================================

/// A loyalty account that accumulates points over time.
///
/// Long-lived with a steady trickle of small events and a tiny state: a good
/// candidate for snapshotting.
#[derive(Debug, Aggregate)]
#[aggregate(events(PointsEarned, PointsRedeemed))]
pub struct LoyaltyAccount {
    #[aggregate(state)]
    state: AggregateState,
    balance: Decimal,
    redemptions: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoyaltySnapshot {
    #[serde(with = "codec::decimal")]
    balance: Decimal,
    redemptions: u32,
}

impl LoyaltyAccount {
    fn new(customer: &str) -> Result<Self, eventide::aggregate::ConfigurationError> {
        Ok(Self {
            state: AggregateState::with_snapshot_threshold(format!("loyalty-{customer}"), 10)?,
            balance: Decimal::ZERO,
            redemptions: 0,
        })
    }

    fn earn(&mut self, amount: Decimal, reason: &str) {
        self.apply(PointsEarned {
            amount,
            reason: reason.to_owned(),
        });
    }

    fn redeem(&mut self, amount: Decimal, reward: &str) -> Result<(), String> {
        if amount > self.balance {
            return Err(format!("cannot redeem {amount}, balance is {}", self.balance));
        }
        self.apply(PointsRedeemed {
            amount,
            reward: reward.to_owned(),
        });
        Ok(())
    }
}

impl Handle<PointsEarned> for LoyaltyAccount {
    fn handle(&mut self, event: &PointsEarned) {
        self.balance += event.amount;
    }
}

impl Handle<PointsRedeemed> for LoyaltyAccount {
    fn handle(&mut self, event: &PointsRedeemed) {
        self.balance -= event.amount;
        self.redemptions += 1;
    }
}

impl Snapshotting for LoyaltyAccount {
    type Snapshot = LoyaltySnapshot;

    fn take_snapshot(&self) -> LoyaltySnapshot {
        LoyaltySnapshot {
            balance: self.balance,
            redemptions: self.redemptions,
        }
    }

    fn restore_from_snapshot(&mut self, snapshot: LoyaltySnapshot) {
        self.balance = snapshot.balance;
        self.redemptions = snapshot.redemptions;
    }
}

type ExampleResult = Result<(), Box<dyn std::error::Error>>;
type Repo = Repository<inmemory::Store>;

/// One purchase: load the account, record the points, save, and snapshot
/// when the account says it is time.
async fn record_purchase(repo: &Repo, customer: &str, cents: i64) -> ExampleResult {
    let mut account = LoyaltyAccount::new(customer)?;
    repo.load_from_latest_snapshot_if_exists(&mut account)
        .await?;
    account.earn(Decimal::new(cents, 2), "purchase");
    if cents % 3 == 0 {
        account.redeem(Decimal::new(500, 2), "coffee")?;
    }
    repo.save(&mut account, &Correlation::default()).await?;

    if account.is_ready_for_snapshot() {
        let id = repo.save_snapshot(&mut account).await?;
        println!(
            "   snapshot {id} at revision {} (balance {})",
            account.revision(),
            codec::decimal::format(&account.balance)
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExampleResult {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("=== Snapshotting Example ===\n");
    let repo = Repository::new(inmemory::Store::new());

    println!("1. Recording 40 purchases for alice (threshold 10)...");
    for purchase in 1..=40 {
        record_purchase(&repo, "alice", 1000 + purchase * 7).await?;
    }

    println!("\n2. Loading alice from her latest snapshot...");
    let mut alice = LoyaltyAccount::new("alice")?;
    repo.load_from_latest_snapshot(&mut alice).await?;
    println!(
        "   revision {}, {} event(s) replayed after the snapshot, balance {}",
        alice.revision(),
        alice.events_since_snapshot(),
        codec::decimal::format(&alice.balance)
    );

    println!("\n3. Replaying alice's whole stream for comparison...");
    let mut replayed = LoyaltyAccount::new("alice")?;
    repo.load(&mut replayed).await?;
    println!(
        "   revision {}, {} event(s) replayed, balance {}",
        replayed.revision(),
        replayed.events_since_snapshot(),
        codec::decimal::format(&replayed.balance)
    );
    assert_eq!(alice.balance, replayed.balance);
    assert_eq!(alice.redemptions, replayed.redemptions);

    println!("\n4. Bob has too few events for a snapshot...");
    record_purchase(&repo, "bob", 1250).await?;
    let mut bob = LoyaltyAccount::new("bob")?;
    let found = repo.load_from_latest_snapshot_if_exists(&mut bob).await?;
    println!(
        "   found: {found}, revision {}, balance {}",
        bob.revision(),
        codec::decimal::format(&bob.balance)
    );

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
