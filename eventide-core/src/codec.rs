//! Serialization helpers shared by serializing backends.
//!
//! The core itself never serializes: the in-memory store keeps payloads as
//! Rust values. Backends that write bytes go through a [`Codec`], and event
//! or snapshot types holding money-like amounts can opt into the
//! [`decimal`] wire format.

use serde::{Serialize, de::DeserializeOwned};

/// Turns values into bytes and back.
pub trait Codec: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returns the codec's error if `value` cannot be represented.
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, Self::Error>;

    /// # Errors
    ///
    /// Returns the codec's error if `data` is not a valid `T`.
    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, Self::Error>;
}

/// Compact JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(value)
    }

    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, Self::Error> {
        serde_json::from_slice(data)
    }
}

/// Serde `with` module for [`rust_decimal::Decimal`].
///
/// Whole values are written with exactly two decimal places (`10` as
/// `"10.00"`); anything else is written with the digits it needs and no
/// trailing zeros (`10.10` as `"10.1"`). Values are written as strings so no
/// precision is lost to floating point. Both strings and numbers are
/// accepted when reading.
///
/// ```
/// use rust_decimal::Decimal;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Charged {
///     #[serde(with = "eventide_core::codec::decimal")]
///     amount: Decimal,
/// }
///
/// let json = serde_json::to_string(&Charged { amount: Decimal::new(10, 0) }).unwrap();
/// assert_eq!(json, r#"{"amount":"10.00"}"#);
/// ```
pub mod decimal {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};

    /// The wire text for `value`.
    #[must_use]
    pub fn format(value: &Decimal) -> String {
        let normalized = value.normalize();
        if normalized.scale() == 0 {
            format!("{normalized:.2}")
        } else {
            normalized.to_string()
        }
    }

    /// # Errors
    ///
    /// Only errors raised by the serializer.
    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    /// # Errors
    ///
    /// Returns an error if the input is neither a decimal string nor a number.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        <Decimal as Deserialize<'de>>::deserialize(deserializer)
    }
}
