//! Event-to-handler routing for aggregates.
//!
//! Each aggregate type declares, once, which events it reacts to by filling a
//! [`Handlers`] table in [`Aggregate::register`]. A [`Dispatcher`] built from
//! that table resolves the handler for an event type the first time it sees
//! it and caches the outcome, so applying the same event type again is a
//! single map lookup.
//!
//! Resolution order for an event of concrete type `E`:
//!
//! 1. a handler registered for `E` itself (`Handlers::event::<E>`);
//! 2. otherwise, a handler registered for one of the capabilities `E`
//!    declares in [`DomainEvent::capabilities`], taking the first capability
//!    in the event's declaration order that the aggregate handles;
//! 3. otherwise no handler. The event is still recorded and replayed but the
//!    aggregate's state does not change.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{
        Arc, OnceLock, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    aggregate::Aggregate,
    event::{Capability, DomainEvent, EventPayload},
};

/// Mutate an aggregate in response to an event.
///
/// Implement `Handle<E>` for each concrete event type, or `Handle<dyn C>` for
/// a capability trait `C` shared by several events.
///
/// ```ignore
/// impl Handle<FundsDeposited> for Account {
///     fn handle(&mut self, event: &FundsDeposited) {
///         self.balance += event.amount;
///     }
/// }
/// ```
// ANCHOR: handle_trait
pub trait Handle<E: ?Sized> {
    fn handle(&mut self, event: &E);
}
// ANCHOR_END: handle_trait

type Handler<A> = Arc<dyn Fn(&mut A, &dyn EventPayload) + Send + Sync>;

type Binder<A> = fn(&Capability) -> Option<Handler<A>>;

/// Registration table filled by [`Aggregate::register`].
pub struct Handlers<A> {
    exact: HashMap<TypeId, Handler<A>>,
    capabilities: HashMap<TypeId, Binder<A>>,
}

impl<A: 'static> Handlers<A> {
    fn new() -> Self {
        Self {
            exact: HashMap::new(),
            capabilities: HashMap::new(),
        }
    }

    /// Route events of type `E` to `A`'s `Handle<E>` implementation.
    pub fn event<E>(&mut self) -> &mut Self
    where
        E: DomainEvent,
        A: Handle<E>,
    {
        let handler: Handler<A> = Arc::new(|aggregate: &mut A, event: &dyn EventPayload| {
            if let Some(event) = event.downcast_ref::<E>() {
                Handle::<E>::handle(aggregate, event);
            }
        });
        self.exact.insert(TypeId::of::<E>(), handler);
        self
    }

    /// Route any event that declares capability `C` to `A`'s `Handle<C>`
    /// implementation, unless a more specific handler exists.
    pub fn capability<C>(&mut self) -> &mut Self
    where
        C: ?Sized + 'static,
        A: Handle<C>,
    {
        self.capabilities
            .insert(TypeId::of::<C>(), bind_capability::<A, C> as Binder<A>);
        self
    }

    fn resolve(&self, event: &dyn EventPayload) -> Option<Handler<A>> {
        if let Some(handler) = self.exact.get(&event.as_any().type_id()) {
            return Some(Arc::clone(handler));
        }
        event.capabilities().iter().find_map(|capability| {
            self.capabilities
                .get(&capability.tag())
                .and_then(|bind| bind(capability))
        })
    }
}

fn bind_capability<A, C>(capability: &Capability) -> Option<Handler<A>>
where
    A: Handle<C> + 'static,
    C: ?Sized + 'static,
{
    let view = capability.caster::<C>()?;
    Some(Arc::new(move |aggregate: &mut A, event: &dyn EventPayload| {
        if let Some(event) = (*view)(event.as_any()) {
            Handle::<C>::handle(aggregate, event);
        }
    }))
}

impl<A> fmt::Debug for Handlers<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("events", &self.exact.len())
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}

/// Resolved handler cache for one aggregate type.
pub struct Dispatcher<A> {
    handlers: Handlers<A>,
    resolved: RwLock<HashMap<TypeId, Option<Handler<A>>>>,
    resolutions: AtomicUsize,
}

type Registry = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn registry() -> &'static Registry {
    static DISPATCHERS: OnceLock<Registry> = OnceLock::new();
    DISPATCHERS.get_or_init(Registry::default)
}

impl<A: Aggregate> Dispatcher<A> {
    /// Build a dispatcher from `A`'s registrations.
    #[must_use]
    pub fn new() -> Self {
        let mut handlers = Handlers::new();
        A::register(&mut handlers);
        Self {
            handlers,
            resolved: RwLock::new(HashMap::new()),
            resolutions: AtomicUsize::new(0),
        }
    }

    /// The process-wide dispatcher for `A`, built on first use.
    pub fn shared() -> Arc<Self> {
        let key = TypeId::of::<A>();
        let existing = registry()
            .read()
            .expect("dispatcher registry lock poisoned")
            .get(&key)
            .cloned();
        let entry = match existing {
            Some(entry) => entry,
            None => {
                let built: Arc<dyn Any + Send + Sync> = Arc::new(Self::new());
                let mut dispatchers = registry()
                    .write()
                    .expect("dispatcher registry lock poisoned");
                Arc::clone(dispatchers.entry(key).or_insert(built))
            }
        };
        entry
            .downcast::<Self>()
            .unwrap_or_else(|_| unreachable!("dispatcher registry is keyed by aggregate type"))
    }

    /// Route `event` to its handler, if any.
    pub fn dispatch(&self, aggregate: &mut A, event: &dyn EventPayload) {
        if let Some(handler) = self.handler_for(event) {
            handler(aggregate, event);
        }
    }

    /// Whether `A` reacts to `event` at all.
    pub fn handles(&self, event: &dyn EventPayload) -> bool {
        self.handler_for(event).is_some()
    }

    /// Number of distinct event types resolved so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }

    fn handler_for(&self, event: &dyn EventPayload) -> Option<Handler<A>> {
        let key = event.as_any().type_id();
        if let Some(cached) = self
            .resolved
            .read()
            .expect("dispatch cache lock poisoned")
            .get(&key)
        {
            return cached.clone();
        }

        let mut resolved = self.resolved.write().expect("dispatch cache lock poisoned");
        resolved
            .entry(key)
            .or_insert_with(|| {
                self.resolutions.fetch_add(1, Ordering::Relaxed);
                let handler = self.handlers.resolve(event);
                tracing::trace!(
                    aggregate = std::any::type_name::<A>(),
                    event = event.type_name(),
                    handled = handler.is_some(),
                    "resolved event handler"
                );
                handler
            })
            .clone()
    }
}

impl<A: Aggregate> Default for Dispatcher<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers)
            .field("resolutions", &self.resolutions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
