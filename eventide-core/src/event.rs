//! Domain events and their type-erased form.
//!
//! Concrete event structs implement [`DomainEvent`]. Once applied to an
//! aggregate they travel through the engine and the stores as
//! `Arc<dyn EventPayload>`, which keeps the concrete type recoverable for
//! dispatch while letting a stream hold events of many types.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::aggregate::Aggregate;

/// Trait implemented by every concrete event type.
///
/// [`Self::KIND`] is the stable name written next to the serialized payload.
/// Serializing backends use it to route stored JSON back to the right type
/// (see [`EventRegistry`]), so it must not change once events are persisted.
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct FundsDeposited {
///     amount: i64,
/// }
///
/// impl DomainEvent for FundsDeposited {
///     const KIND: &'static str = "account.funds-deposited";
/// }
/// ```
// ANCHOR: domain_event_trait
pub trait DomainEvent: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const KIND: &'static str;

    /// Declare the capability views this event can be seen through.
    ///
    /// Aggregates may handle a capability (`Handle<dyn Audited>`) instead of
    /// every concrete event implementing it. Order matters: when an aggregate
    /// handles several of the capabilities declared here, the first declared
    /// one wins.
    ///
    /// ```ignore
    /// fn capabilities(caps: &mut Capabilities<Self>) {
    ///     caps.add::<dyn Audited>(|event| event);
    /// }
    /// ```
    fn capabilities(_caps: &mut Capabilities<Self>) {}
}
// ANCHOR_END: domain_event_trait

/// Object-safe view over an event payload.
///
/// Blanket-implemented for every [`DomainEvent`]; you should never need to
/// implement it yourself. [`RawEvent`] is the only other implementor.
pub trait EventPayload: Any + fmt::Debug + Send + Sync {
    /// Stable event name, [`DomainEvent::KIND`] for typed events.
    fn kind(&self) -> &str;

    /// Fully-qualified Rust type path of the payload.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Capability views declared by the payload type, in declaration order.
    fn capabilities(&self) -> Vec<Capability>;

    /// Serialize the payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload's `Serialize` implementation fails.
    fn to_json(&self) -> Result<Value, serde_json::Error>;
}

impl<E: DomainEvent> EventPayload for E {
    fn kind(&self) -> &str {
        E::KIND
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<E>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Capabilities::new();
        <E as DomainEvent>::capabilities(&mut caps);
        caps.entries
    }

    fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl dyn EventPayload {
    /// Returns `true` if the payload is of type `E`.
    #[must_use]
    pub fn is<E: EventPayload>(&self) -> bool {
        self.as_any().is::<E>()
    }

    /// Borrow the payload as a concrete event type.
    #[must_use]
    pub fn downcast_ref<E: EventPayload>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}

/// A payload whose kind the reading side has no registered type for.
///
/// The JSON is kept verbatim so nothing is lost; aggregates never have a
/// handler for it, so replaying one only advances the revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    kind: String,
    data: Value,
}

impl RawEvent {
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }
}

impl EventPayload for RawEvent {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn to_json(&self) -> Result<Value, serde_json::Error> {
        Ok(self.data.clone())
    }
}

/// Unique identifier of a single event.
///
/// A stream keeps at most one event per id: appending an id the stream has
/// already seen is silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero id. Never accepted by [`Aggregate::apply_with_id`].
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Type-erased function that views an event as capability `C`.
pub(crate) type Caster<C> = Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a C> + Send + Sync>;

/// Pins the closure signature so the returned borrow is tied to the input.
fn caster<C: ?Sized, F>(f: F) -> F
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a C>,
{
    f
}

/// One capability view declared by an event type.
pub struct Capability {
    tag: TypeId,
    name: &'static str,
    cast: Box<dyn Any + Send + Sync>,
}

impl Capability {
    /// Type tag of the capability (`TypeId::of::<dyn Trait>()`).
    #[must_use]
    pub const fn tag(&self) -> TypeId {
        self.tag
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn caster<C: ?Sized + 'static>(&self) -> Option<Caster<C>> {
        self.cast.downcast_ref::<Caster<C>>().cloned()
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builder passed to [`DomainEvent::capabilities`].
pub struct Capabilities<E> {
    entries: Vec<Capability>,
    _event: PhantomData<fn(&E)>,
}

impl<E: 'static> Capabilities<E> {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
            _event: PhantomData,
        }
    }

    /// Declare that `E` can be viewed as `C`.
    ///
    /// `view` is almost always the identity closure `|event| event`, relying
    /// on unsized coercion to `&dyn Trait`.
    pub fn add<C: ?Sized + 'static>(&mut self, view: fn(&E) -> &C) -> &mut Self {
        let tag = TypeId::of::<C>();
        if self.entries.iter().any(|entry| entry.tag == tag) {
            return self;
        }
        let cast: Caster<C> = Arc::new(caster(move |any| any.downcast_ref::<E>().map(view)));
        self.entries.push(Capability {
            tag,
            name: std::any::type_name::<C>(),
            cast: Box::new(cast),
        });
        self
    }
}

impl<E> fmt::Debug for Capabilities<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(Capability::name))
            .finish()
    }
}

type Decoder = fn(Value) -> Result<Arc<dyn EventPayload>, serde_json::Error>;

fn decode_as<E: DomainEvent>(data: Value) -> Result<Arc<dyn EventPayload>, serde_json::Error> {
    let event: E = serde_json::from_value(data)?;
    Ok(Arc::new(event))
}

/// Maps event kinds to their concrete types for backends that persist JSON.
///
/// Kinds without a registration decode to [`RawEvent`].
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, (Decoder, &'static str)>,
}

impl EventRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single event type under its [`DomainEvent::KIND`].
    ///
    /// If another type already claimed the kind, the first registration is
    /// kept.
    pub fn register<E: DomainEvent>(&mut self) -> &mut Self {
        let type_name = std::any::type_name::<E>();
        match self.decoders.get(E::KIND) {
            Some((_, existing)) if *existing != type_name => {
                tracing::warn!(
                    kind = E::KIND,
                    existing,
                    ignored = type_name,
                    "event kind already registered to another type"
                );
            }
            Some(_) => {}
            None => {
                self.decoders
                    .insert(E::KIND, (decode_as::<E> as Decoder, type_name));
            }
        }
        self
    }

    /// Register every event type an aggregate declares.
    pub fn register_aggregate<A: Aggregate>(&mut self) -> &mut Self {
        A::register_events(self);
        self
    }

    /// Builder-style [`Self::register_aggregate`].
    #[must_use]
    pub fn with_aggregate<A: Aggregate>(mut self) -> Self {
        self.register_aggregate::<A>();
        self
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Decode persisted JSON into a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` is registered but `data` does not
    /// deserialize into the registered type.
    pub fn decode(&self, kind: &str, data: Value) -> Result<Arc<dyn EventPayload>, serde_json::Error> {
        match self.decoders.get(kind) {
            Some((decode, _)) => decode(data),
            None => Ok(Arc::new(RawEvent::new(kind, data))),
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.decoders.keys().collect();
        kinds.sort_unstable();
        f.debug_struct("EventRegistry").field("kinds", &kinds).finish()
    }
}
