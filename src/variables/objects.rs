//! Object type registry: maps object type names to pluggable codecs.
//!
//! Object variables carry an `objectTypeName` chosen by whoever wrote them.
//! Instead of resolving that name against some global type table, the client is
//! handed an explicit registry at configuration time. Reading an object whose
//! type name is not registered fails with `TypeError::UnknownType`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SerializationError;
use crate::variables::value::SerializationDataFormat;

/// Serializes and deserializes one object type in one or more formats.
pub trait ObjectCodec: Send + Sync {
    /// Whether this codec can handle the given format.
    fn supports(&self, format: SerializationDataFormat) -> bool;

    /// Serialize a native value. `value` is guaranteed to be of the registered type.
    fn serialize(
        &self,
        value: &(dyn Any + Send + Sync),
        format: SerializationDataFormat,
    ) -> Result<String, SerializationError>;

    /// Deserialize a payload into a native value of the registered type.
    fn deserialize(
        &self,
        payload: &str,
        format: SerializationDataFormat,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationError>;
}

/// serde_json-backed codec for `T`.
pub struct JsonObjectCodec<T> {
    type_name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonObjectCodec<T> {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            _marker: PhantomData,
        }
    }

    fn error(&self, reason: impl fmt::Display) -> SerializationError {
        SerializationError::Object {
            type_name: self.type_name.clone(),
            format: SerializationDataFormat::Json.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl<T> ObjectCodec for JsonObjectCodec<T>
where
    T: Serialize + DeserializeOwned + Any + Send + Sync,
{
    fn supports(&self, format: SerializationDataFormat) -> bool {
        format == SerializationDataFormat::Json
    }

    fn serialize(
        &self,
        value: &(dyn Any + Send + Sync),
        _format: SerializationDataFormat,
    ) -> Result<String, SerializationError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| self.error("value is not of the registered type"))?;
        serde_json::to_string(value).map_err(|e| self.error(e))
    }

    fn deserialize(
        &self,
        payload: &str,
        _format: SerializationDataFormat,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationError> {
        let value: T = serde_json::from_str(payload).map_err(|e| self.error(e))?;
        Ok(Box::new(value))
    }
}

struct RegisteredType {
    type_name: String,
    codec: Arc<dyn ObjectCodec>,
}

/// Explicit, injected registry of object types.
#[derive(Default)]
pub struct ObjectTypeRegistry {
    by_name: HashMap<String, Arc<RegisteredType>>,
    by_type: HashMap<TypeId, Arc<RegisteredType>>,
}

impl ObjectTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `type_name` with the serde_json codec.
    pub fn register_json<T>(&mut self, type_name: impl Into<String>) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        let type_name = type_name.into();
        let codec = Arc::new(JsonObjectCodec::<T>::new(type_name.clone()));
        self.register(type_name, TypeId::of::<T>(), codec)
    }

    /// Builder-style variant of [`register_json`](Self::register_json).
    pub fn with_json<T>(mut self, type_name: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.register_json::<T>(type_name);
        self
    }

    /// Register a custom codec. A later registration replaces an earlier one.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        type_id: TypeId,
        codec: Arc<dyn ObjectCodec>,
    ) -> &mut Self {
        let entry = Arc::new(RegisteredType {
            type_name: type_name.into(),
            codec,
        });
        self.by_name.insert(entry.type_name.clone(), Arc::clone(&entry));
        self.by_type.insert(type_id, entry);
        self
    }

    /// Look up a codec by object type name.
    pub fn by_name(&self, type_name: &str) -> Option<&Arc<dyn ObjectCodec>> {
        self.by_name.get(type_name).map(|entry| &entry.codec)
    }

    /// Look up the registered name and codec of a native type.
    pub fn by_type_id(&self, type_id: TypeId) -> Option<(&str, &Arc<dyn ObjectCodec>)> {
        self.by_type
            .get(&type_id)
            .map(|entry| (entry.type_name.as_str(), &entry.codec))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.by_name.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl fmt::Debug for ObjectTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ObjectTypeRegistry")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Invoice {
        number: String,
        amount: i64,
    }

    #[test]
    fn json_codec_round_trips() {
        let registry = ObjectTypeRegistry::new().with_json::<Invoice>("com.acme.Invoice");
        let (name, codec) = registry.by_type_id(TypeId::of::<Invoice>()).unwrap();
        assert_eq!(name, "com.acme.Invoice");

        let invoice = Invoice {
            number: "A-1".into(),
            amount: 42,
        };
        let payload = codec
            .serialize(&invoice, SerializationDataFormat::Json)
            .unwrap();
        assert_eq!(payload, r#"{"number":"A-1","amount":42}"#);

        let back = registry
            .by_name("com.acme.Invoice")
            .unwrap()
            .deserialize(&payload, SerializationDataFormat::Json)
            .unwrap();
        assert_eq!(back.downcast_ref::<Invoice>(), Some(&invoice));
    }

    #[test]
    fn json_codec_only_supports_json() {
        let codec = JsonObjectCodec::<Invoice>::new("Invoice");
        assert!(codec.supports(SerializationDataFormat::Json));
        assert!(!codec.supports(SerializationDataFormat::Xml));
        assert!(!codec.supports(SerializationDataFormat::Java));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let codec = JsonObjectCodec::<Invoice>::new("Invoice");
        let result = codec.deserialize("{not json", SerializationDataFormat::Json);
        assert!(matches!(result, Err(SerializationError::Object { .. })));
    }

    #[test]
    fn unknown_names_are_absent() {
        let registry = ObjectTypeRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.by_name("java.util.ArrayList").is_none());
        assert!(!registry.contains("java.util.ArrayList"));
    }
}
