//! Core traits and types for the Eventide event-sourcing library.
//!
//! This crate provides the foundational abstractions for event sourcing:
//!
//! - [`aggregate`] - The aggregate engine (`Aggregate`, `AggregateState`)
//! - [`dispatch`] - Event-to-handler resolution (`Handle`, `Dispatcher`)
//! - [`event`] - Event payload traits and ids (`DomainEvent`, `EventId`)
//! - [`repository`] - Load, save and snapshot workflows (`Repository`)
//! - [`store`] - Event persistence abstraction (`EventStore`)
//! - [`snapshot`] - The snapshot protocol (`Snapshotting`, `Snapshot`)
//! - [`concurrency`] - Concurrency strategy markers (`Optimistic`, `Unchecked`)
//! - [`codec`] - Serialization helpers for serializing backends
//!
//! # Example
//!
//! ```
//! use eventide_core::{repository::Repository, store::inmemory};
//!
//! // Create an in-memory store and repository
//! let store = inmemory::Store::new();
//! let repo = Repository::new(store);
//! ```
//!
//! Most users should depend on the `eventide` crate, which re-exports these
//! types along with `#[derive(Aggregate)]`.

pub mod aggregate;
pub mod codec;
pub mod concurrency;
pub mod dispatch;
pub mod event;
pub mod repository;
pub mod snapshot;
pub mod store;
