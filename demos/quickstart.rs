//! A minimal example demonstrating the core concepts of event sourcing.
//!
//! Run with: `cargo run --example quickstart`

// NB: the 'ANCHOR's support embedding in mdbook in docs/ directory.

// ANCHOR: full_example
use eventide::{
    Aggregate, AggregateState, Correlation, DomainEvent, Handle, Repository, store::inmemory,
};
use serde::{Deserialize, Serialize};

// ANCHOR: events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
}

impl DomainEvent for AccountOpened {
    const KIND: &'static str = "account.opened";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsDeposited {
    pub amount: i64,
}

impl DomainEvent for FundsDeposited {
    const KIND: &'static str = "account.deposited";
}
// ANCHOR_END: events

// ANCHOR: aggregate
#[derive(Debug, Aggregate)]
#[aggregate(events(AccountOpened, FundsDeposited))]
pub struct Account {
    #[aggregate(state)]
    state: AggregateState,
    owner: Option<String>,
    balance: i64,
}

impl Account {
    pub fn new(id: &str) -> Result<Self, eventide::aggregate::ConfigurationError> {
        Ok(Self {
            state: AggregateState::new(id)?,
            owner: None,
            balance: 0,
        })
    }

    pub fn open(&mut self, owner: &str) {
        self.apply(AccountOpened {
            owner: owner.to_owned(),
        });
    }

    pub fn deposit(&mut self, amount: i64) -> Result<(), String> {
        if amount <= 0 {
            return Err("amount must be positive".into());
        }
        self.apply(FundsDeposited { amount });
        Ok(())
    }
}

impl Handle<AccountOpened> for Account {
    fn handle(&mut self, event: &AccountOpened) {
        self.owner = Some(event.owner.clone());
    }
}

impl Handle<FundsDeposited> for Account {
    fn handle(&mut self, event: &FundsDeposited) {
        self.balance += event.amount;
    }
}
// ANCHOR_END: aggregate

// ANCHOR: main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let repository = Repository::new(inmemory::Store::new());

    // Business methods record events; state is updated immediately.
    let mut account = Account::new("ACC-001")?;
    account.open("ada");
    account.deposit(100)?;
    println!(
        "Before save: revision {}, {} uncommitted",
        account.revision(),
        account.uncommitted_events().len()
    );

    let correlation = Correlation::default().caused_by("signup-form");
    repository.save(&mut account, &correlation).await?;
    println!(
        "After save: revision {}, {} uncommitted",
        account.revision(),
        account.uncommitted_events().len()
    );

    // A fresh instance rebuilds the same state by replaying the stream.
    let mut loaded = Account::new("ACC-001")?;
    repository.load(&mut loaded).await?;
    println!("Loaded {loaded:?}");
    assert_eq!(loaded.balance, 100);
    assert_eq!(loaded.owner.as_deref(), Some("ada"));

    Ok(())
}
// ANCHOR_END: main
// ANCHOR_END: full_example
