//! Field directives: write-time values resolved by the store rather than by the caller.
//!
//! A [`FieldValue`] is converted into an opaque BSON sentinel when it is written.
//! The collection layer never inspects these sentinels; they travel through the
//! encode pipeline like any other value and the backend resolves them when the
//! write is applied.
//!
//! ```ignore
//! use docsafe::value::FieldValue;
//! use bson::doc;
//!
//! wallets.update(&doc! {
//!     "id": wallet_id,
//!     "coin": FieldValue::increment(100),
//!     "touched": FieldValue::server_timestamp(),
//! }).await?;
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

/// Key marking a sentinel document as a field directive.
pub const DIRECTIVE_KEY: &str = "$fieldValue";

/// A value that the store computes at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// The store's commit time.
    ServerTimestamp,
    /// Adds the operand to the current numeric value (missing fields start at zero).
    Increment(Bson),
    /// Removes the field. Only valid in partial updates.
    Delete,
    /// Appends each element that is not already present in the array.
    ArrayUnion(Vec<Bson>),
    /// Removes every occurrence of each element from the array.
    ArrayRemove(Vec<Bson>),
}

impl FieldValue {
    pub fn server_timestamp() -> Self {
        FieldValue::ServerTimestamp
    }

    pub fn increment(operand: impl Into<Bson>) -> Self {
        FieldValue::Increment(operand.into())
    }

    pub fn delete() -> Self {
        FieldValue::Delete
    }

    pub fn array_union<V: Into<Bson>>(elements: impl IntoIterator<Item = V>) -> Self {
        FieldValue::ArrayUnion(
            elements
                .into_iter()
                .map(Into::into)
                .collect(),
        )
    }

    pub fn array_remove<V: Into<Bson>>(elements: impl IntoIterator<Item = V>) -> Self {
        FieldValue::ArrayRemove(
            elements
                .into_iter()
                .map(Into::into)
                .collect(),
        )
    }

    /// Encodes this directive as its BSON sentinel.
    pub fn to_bson(&self) -> Bson {
        let mut sentinel = Document::new();

        match self {
            FieldValue::ServerTimestamp => {
                sentinel.insert(DIRECTIVE_KEY, "serverTimestamp");
            }
            FieldValue::Increment(operand) => {
                sentinel.insert(DIRECTIVE_KEY, "increment");
                sentinel.insert("operand", operand.clone());
            }
            FieldValue::Delete => {
                sentinel.insert(DIRECTIVE_KEY, "delete");
            }
            FieldValue::ArrayUnion(elements) => {
                sentinel.insert(DIRECTIVE_KEY, "arrayUnion");
                sentinel.insert("elements", elements.clone());
            }
            FieldValue::ArrayRemove(elements) => {
                sentinel.insert(DIRECTIVE_KEY, "arrayRemove");
                sentinel.insert("elements", elements.clone());
            }
        }

        Bson::Document(sentinel)
    }

    /// Recognizes a BSON sentinel produced by [`FieldValue::to_bson`].
    ///
    /// Backends call this while applying writes; returns `None` for ordinary values.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        let sentinel = value.as_document()?;

        match sentinel.get_str(DIRECTIVE_KEY).ok()? {
            "serverTimestamp" => Some(FieldValue::ServerTimestamp),
            "increment" => sentinel
                .get("operand")
                .cloned()
                .map(FieldValue::Increment),
            "delete" => Some(FieldValue::Delete),
            "arrayUnion" => elements_of(sentinel).map(FieldValue::ArrayUnion),
            "arrayRemove" => elements_of(sentinel).map(FieldValue::ArrayRemove),
            _ => None,
        }
    }
}

fn elements_of(sentinel: &Document) -> Option<Vec<Bson>> {
    sentinel
        .get_array("elements")
        .ok()
        .cloned()
}

impl From<FieldValue> for Bson {
    fn from(value: FieldValue) -> Self {
        value.to_bson()
    }
}

impl Serialize for FieldValue {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        self.to_bson().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Bson::deserialize(deserializer)?;

        FieldValue::from_bson(&value).ok_or_else(|| D::Error::custom("not a field directive"))
    }
}

/// A record field that holds either a plain value or a [`FieldValue`] directive.
///
/// Use this in record types that need to write directives through `add`/`set`
/// while still reading back the resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Storable<V> {
    Directive(FieldValue),
    Value(V),
}

impl<V> Storable<V> {
    /// Returns the plain value, or `None` for an unresolved directive.
    pub fn value(&self) -> Option<&V> {
        match self {
            Storable::Value(value) => Some(value),
            Storable::Directive(_) => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Storable::Value(value) => Some(value),
            Storable::Directive(_) => None,
        }
    }
}

impl<V> From<FieldValue> for Storable<V> {
    fn from(directive: FieldValue) -> Self {
        Storable::Directive(directive)
    }
}
