use std::marker::PhantomData;

use eventide::{Aggregate, AggregateState, DomainEvent, Handle};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tagged {
    pub tag: String,
}

impl DomainEvent for Tagged {
    const KIND: &'static str = "tagged";
}

#[derive(Aggregate)]
#[aggregate(events(Tagged))]
pub struct Labelled<T>
where
    T: Send + Sync + 'static,
{
    #[aggregate(state)]
    bookkeeping: AggregateState,
    tags: Vec<String>,
    marker: PhantomData<T>,
}

impl<T: Send + Sync + 'static> Handle<Tagged> for Labelled<T> {
    fn handle(&mut self, event: &Tagged) {
        self.tags.push(event.tag.clone());
    }
}

fn main() {
    let mut labelled = Labelled::<u8> {
        bookkeeping: AggregateState::new("label-1").unwrap(),
        tags: Vec::new(),
        marker: PhantomData,
    };
    labelled.apply(Tagged { tag: "red".into() });
    assert_eq!(labelled.tags, vec!["red".to_owned()]);
    assert_eq!(labelled.stream_id(), "label-1");
}
