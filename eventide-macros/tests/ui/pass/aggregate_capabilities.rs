use eventide::{Aggregate, AggregateState, DomainEvent, Handle, event::Capabilities};
use serde::{Deserialize, Serialize};

pub trait Audited {
    fn actor(&self) -> &str;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundsDeposited {
    pub amount: i64,
    pub actor: String,
}

impl Audited for FundsDeposited {
    fn actor(&self) -> &str {
        &self.actor
    }
}

impl DomainEvent for FundsDeposited {
    const KIND: &'static str = "funds-deposited";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountFrozen {
    pub actor: String,
}

impl Audited for AccountFrozen {
    fn actor(&self) -> &str {
        &self.actor
    }
}

impl DomainEvent for AccountFrozen {
    const KIND: &'static str = "account-frozen";

    fn capabilities(caps: &mut Capabilities<Self>) {
        caps.add::<dyn Audited>(|event| event);
    }
}

#[derive(Aggregate)]
#[aggregate(events(FundsDeposited, AccountFrozen), capabilities(Audited))]
pub struct Account {
    #[aggregate(state)]
    state: AggregateState,
    balance: i64,
    last_actor: Option<String>,
}

impl Handle<FundsDeposited> for Account {
    fn handle(&mut self, event: &FundsDeposited) {
        self.balance += event.amount;
    }
}

impl Handle<AccountFrozen> for Account {
    fn handle(&mut self, _event: &AccountFrozen) {}
}

impl Handle<dyn Audited> for Account {
    fn handle(&mut self, event: &dyn Audited) {
        self.last_actor = Some(event.actor().to_owned());
    }
}

fn main() {
    let mut account = Account {
        state: AggregateState::new("account-1").unwrap(),
        balance: 0,
        last_actor: None,
    };
    account.apply(FundsDeposited {
        amount: 10,
        actor: "alice".into(),
    });
    assert_eq!(account.balance, 10);
    assert_eq!(account.uncommitted_events().len(), 1);
}
