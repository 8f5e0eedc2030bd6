//! Typed variable values.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Ordered mapping of variable name to typed value.
pub type VariableMap = IndexMap<String, TypedValue>;

/// Type tag of a variable value as the engine knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Short,
    Integer,
    Long,
    Double,
    String,
    Date,
    Bytes,
    Null,
    Object,
    Json,
    Xml,
}

impl ValueType {
    /// Name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Short => "Short",
            Self::Integer => "Integer",
            Self::Long => "Long",
            Self::Double => "Double",
            Self::String => "String",
            Self::Date => "Date",
            Self::Bytes => "Bytes",
            Self::Null => "Null",
            Self::Object => "Object",
            Self::Json => "Json",
            Self::Xml => "Xml",
        }
    }

    /// Parse a wire type name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let value_type = match name.trim().to_ascii_lowercase().as_str() {
            "boolean" => Self::Boolean,
            "short" => Self::Short,
            "integer" => Self::Integer,
            "long" => Self::Long,
            "double" => Self::Double,
            "string" => Self::String,
            "date" => Self::Date,
            "bytes" => Self::Bytes,
            "null" => Self::Null,
            "object" => Self::Object,
            "json" => Self::Json,
            "xml" => Self::Xml,
            _ => return None,
        };
        Some(value_type)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serialization format of an Object value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializationDataFormat {
    #[default]
    Json,
    Xml,
    Java,
}

impl SerializationDataFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::Java => "application/x-java-serialized-object",
        }
    }

    /// Accepts the mime type or the bare format name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "application/json" | "json" => Some(Self::Json),
            "application/xml" | "text/xml" | "xml" => Some(Self::Xml),
            "application/x-java-serialized-object" | "java" => Some(Self::Java),
            _ => None,
        }
    }
}

impl fmt::Display for SerializationDataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// An Object-typed value.
///
/// Holds the serialized payload as received from (or sent to) the engine, and
/// optionally the native value it was built from. Values built locally are
/// serialized through the object type registry when they are set on a task.
#[derive(Clone, Default)]
pub struct ObjectValue {
    type_name: Option<String>,
    format: SerializationDataFormat,
    serialized: Option<String>,
    native: Option<Arc<dyn Any + Send + Sync>>,
    native_type: Option<TypeId>,
    native_type_name: Option<&'static str>,
}

impl ObjectValue {
    /// Wrap a native value; it is serialized when set on a task.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            native: Some(Arc::new(value)),
            native_type: Some(TypeId::of::<T>()),
            native_type_name: Some(std::any::type_name::<T>()),
            ..Default::default()
        }
    }

    /// Object value that is already serialized.
    pub fn serialized(
        type_name: impl Into<String>,
        format: SerializationDataFormat,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            type_name: Some(type_name.into()),
            format,
            serialized: Some(payload.into()),
            ..Default::default()
        }
    }

    /// A null object. Encodes as type Null.
    pub fn null() -> Self {
        Self::default()
    }

    pub fn serialization_data_format(mut self, format: SerializationDataFormat) -> Self {
        self.format = format;
        self
    }

    pub fn object_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn format(&self) -> SerializationDataFormat {
        self.format
    }

    pub fn serialized_value(&self) -> Option<&str> {
        self.serialized.as_deref()
    }

    pub fn native_value(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.native.as_deref()
    }

    pub(crate) fn native_type(&self) -> Option<TypeId> {
        self.native_type
    }

    /// Rust type name of the wrapped native value, if any.
    pub(crate) fn native_type_name(&self) -> Option<&'static str> {
        self.native_type_name
    }

    pub fn is_null(&self) -> bool {
        self.serialized.is_none() && self.native.is_none()
    }

    pub fn is_serialized(&self) -> bool {
        self.serialized.is_some()
    }

    pub(crate) fn with_serialized(mut self, type_name: String, payload: String) -> Self {
        self.type_name = Some(type_name);
        self.serialized = Some(payload);
        self
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectValue")
            .field("type_name", &self.type_name)
            .field("format", &self.format)
            .field("serialized", &self.serialized)
            .field("has_native", &self.native.is_some())
            .finish()
    }
}

impl PartialEq for ObjectValue {
    fn eq(&self, other: &Self) -> bool {
        let same_header = self.type_name == other.type_name && self.format == other.format;
        // Serialized payloads are authoritative once both sides have one.
        if self.serialized.is_some() && other.serialized.is_some() {
            return same_header && self.serialized == other.serialized;
        }
        same_header
            && self.serialized == other.serialized
            && self.native.is_some() == other.native.is_some()
            && self.native_type == other.native_type
    }
}

/// The raw value together with its type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Short(i16),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Object(ObjectValue),
    Json(String),
    Xml(String),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Short(_) => ValueType::Short,
            Self::Integer(_) => ValueType::Integer,
            Self::Long(_) => ValueType::Long,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::Date(_) => ValueType::Date,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Object(o) if o.is_null() => ValueType::Null,
            Self::Object(_) => ValueType::Object,
            Self::Json(_) => ValueType::Json,
            Self::Xml(_) => ValueType::Xml,
        }
    }
}

/// A variable value with its type and value info.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    value: Value,
    transient: bool,
}

impl TypedValue {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            transient: false,
        }
    }

    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(Value::Boolean(value))
    }

    pub fn short(value: i16) -> Self {
        Self::new(Value::Short(value))
    }

    pub fn integer(value: i32) -> Self {
        Self::new(Value::Integer(value))
    }

    pub fn long(value: i64) -> Self {
        Self::new(Value::Long(value))
    }

    pub fn double(value: f64) -> Self {
        Self::new(Value::Double(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(Value::String(value.into()))
    }

    pub fn date(value: DateTime<Utc>) -> Self {
        Self::new(Value::Date(value))
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Self::new(Value::Bytes(value.into()))
    }

    pub fn json(value: impl Into<String>) -> Self {
        Self::new(Value::Json(value.into()))
    }

    pub fn xml(value: impl Into<String>) -> Self {
        Self::new(Value::Xml(value.into()))
    }

    pub fn object(value: ObjectValue) -> Self {
        Self::new(Value::Object(value))
    }

    /// Mark the value as transient (not persisted by the engine).
    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn is_null(&self) -> bool {
        self.value_type() == ValueType::Null
    }
}

impl From<Value> for TypedValue {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<i16> for TypedValue {
    fn from(value: i16) -> Self {
        Self::short(value)
    }
}

impl From<i32> for TypedValue {
    fn from(value: i32) -> Self {
        Self::integer(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        Self::long(value)
    }
}

impl From<f64> for TypedValue {
    fn from(value: f64) -> Self {
        Self::double(value)
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::date(value)
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(value: Vec<u8>) -> Self {
        Self::bytes(value)
    }
}

impl From<ObjectValue> for TypedValue {
    fn from(value: ObjectValue) -> Self {
        Self::object(value)
    }
}
