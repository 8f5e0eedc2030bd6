//! Conversion between native values, typed values and wire values.

use std::any::{Any, TypeId};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use serde_json::Value as Json;

use crate::engine::dto::{VariableDtoMap, VariableValueDto};
use crate::error::{Error, SerializationError, TypeError};
use crate::variables::objects::ObjectTypeRegistry;
use crate::variables::value::{
    ObjectValue, SerializationDataFormat, TypedValue, Value, ValueType, VariableMap,
};

/// Wire format for Date values, e.g. `2024-03-01T10:00:00.000+0000`.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

const TRANSIENT: &str = "transient";
const OBJECT_TYPE_NAME: &str = "objectTypeName";
const SERIALIZATION_DATA_FORMAT: &str = "serializationDataFormat";

/// Converts between native Rust values, [`TypedValue`]s and wire DTOs.
#[derive(Debug, Clone, Default)]
pub struct VariableValueCodec {
    objects: Arc<ObjectTypeRegistry>,
}

macro_rules! try_native {
    ($boxed:ident, $ty:ty, $ctor:expr) => {
        let $boxed = match $boxed.downcast::<$ty>() {
            Ok(value) => return Ok(TypedValue::new($ctor(*value))),
            Err(other) => other,
        };
    };
}

impl VariableValueCodec {
    pub fn new(objects: Arc<ObjectTypeRegistry>) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &Arc<ObjectTypeRegistry> {
        &self.objects
    }

    /// Infer a typed value from a native value's runtime type.
    pub fn infer<T: Any + Send + Sync>(&self, value: T) -> Result<TypedValue, Error> {
        if self.objects.by_type_id(TypeId::of::<T>()).is_some() {
            return self.prepare(TypedValue::object(ObjectValue::new(value)));
        }

        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
        let boxed = match boxed.downcast::<TypedValue>() {
            Ok(typed) => return self.prepare(*typed),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<ObjectValue>() {
            Ok(object) => return self.prepare(TypedValue::object(*object)),
            Err(other) => other,
        };
        let boxed = match boxed.downcast::<Value>() {
            Ok(value) => return self.prepare(TypedValue::new(*value)),
            Err(other) => other,
        };

        try_native!(boxed, bool, Value::Boolean);
        try_native!(boxed, i16, Value::Short);
        try_native!(boxed, i32, Value::Integer);
        try_native!(boxed, i64, Value::Long);
        try_native!(boxed, f64, Value::Double);
        try_native!(boxed, String, Value::String);
        try_native!(boxed, &'static str, |s: &str| Value::String(s.to_string()));
        try_native!(boxed, DateTime<Utc>, Value::Date);
        try_native!(boxed, Vec<u8>, Value::Bytes);
        try_native!(boxed, (), |_: ()| Value::Null);
        drop(boxed);

        let type_name = std::any::type_name::<T>().to_string();
        if is_unsupported_primitive(TypeId::of::<T>()) {
            Err(TypeError::UnsupportedType { type_name }.into())
        } else {
            Err(TypeError::UnknownType { type_name }.into())
        }
    }

    /// Serialize native object values through the registry; other values pass through.
    pub fn prepare(&self, typed: TypedValue) -> Result<TypedValue, Error> {
        let transient = typed.is_transient();
        match typed.into_value() {
            Value::Object(object) => Ok(TypedValue::object(self.prepare_object(object)?)
                .transient(transient)),
            other => Ok(TypedValue::new(other).transient(transient)),
        }
    }

    fn prepare_object(&self, object: ObjectValue) -> Result<ObjectValue, Error> {
        if object.is_serialized() || object.is_null() {
            return Ok(object);
        }

        let unknown = || TypeError::UnknownType {
            type_name: object
                .native_type_name()
                .unwrap_or("<unnamed>")
                .to_string(),
        };
        let type_id = object.native_type().ok_or_else(unknown)?;
        let (registered_name, codec) = self.objects.by_type_id(type_id).ok_or_else(unknown)?;
        let type_name = object
            .type_name()
            .unwrap_or(registered_name)
            .to_string();

        let format = object.format();
        if !codec.supports(format) {
            return Err(TypeError::UnsupportedFormat {
                type_name,
                format: format.to_string(),
            }
            .into());
        }

        let native = object.native_value().ok_or_else(unknown)?;
        let payload = codec.serialize(native, format)?;
        Ok(object.with_serialized(type_name, payload))
    }

    /// Read a typed value back as a native `T`.
    ///
    /// Returns `Ok(None)` for null values. Object values are deserialized through
    /// the registry; an unregistered object type name fails with `UnknownType`.
    pub fn to_native<T: Any + Clone>(
        &self,
        name: &str,
        typed: &TypedValue,
    ) -> Result<Option<T>, Error> {
        let any: &dyn Any = match typed.value() {
            Value::Null => return Ok(None),
            Value::Boolean(v) => v,
            Value::Short(v) => v,
            Value::Integer(v) => v,
            Value::Long(v) => v,
            Value::Double(v) => v,
            Value::String(v) | Value::Json(v) | Value::Xml(v) => v,
            Value::Date(v) => v,
            Value::Bytes(v) => v,
            Value::Object(object) if object.is_null() => return Ok(None),
            Value::Object(object) => return self.object_to_native(name, object).map(Some),
        };

        if let Some(value) = any.downcast_ref::<T>() {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = (typed as &dyn Any).downcast_ref::<T>() {
            return Ok(Some(value.clone()));
        }
        Err(mismatch::<T>(name, typed.value_type()).into())
    }

    fn object_to_native<T: Any + Clone>(&self, name: &str, object: &ObjectValue) -> Result<T, Error> {
        if let Some(native) = object.native_value() {
            return native
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| mismatch::<T>(name, ValueType::Object).into());
        }

        let type_name = object.type_name().unwrap_or_default();
        let codec = self
            .objects
            .by_name(type_name)
            .ok_or_else(|| TypeError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        if !codec.supports(object.format()) {
            return Err(TypeError::UnsupportedFormat {
                type_name: type_name.to_string(),
                format: object.format().to_string(),
            }
            .into());
        }

        let payload = object.serialized_value().unwrap_or_default();
        let native = codec.deserialize(payload, object.format())?;
        native
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| mismatch::<T>(name, ValueType::Object).into())
    }

    /// Encode a typed value for the wire.
    pub fn encode(&self, name: &str, typed: &TypedValue) -> Result<VariableValueDto, Error> {
        let mut info = serde_json::Map::new();
        if typed.is_transient() {
            info.insert(TRANSIENT.to_string(), Json::Bool(true));
        }

        let value = match typed.value() {
            Value::Null => Json::Null,
            Value::Boolean(v) => Json::Bool(*v),
            Value::Short(v) => Json::from(*v),
            Value::Integer(v) => Json::from(*v),
            Value::Long(v) => Json::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v).map(Json::Number).ok_or_else(
                || SerializationError::InvalidValue {
                    name: name.to_string(),
                    value_type: ValueType::Double.to_string(),
                    reason: format!("{v} cannot be represented in JSON"),
                },
            )?,
            Value::String(v) | Value::Json(v) | Value::Xml(v) => Json::String(v.clone()),
            Value::Date(v) => Json::String(format_date(v)),
            Value::Bytes(v) => Json::String(BASE64.encode(v)),
            Value::Object(object) if object.is_null() => Json::Null,
            Value::Object(object) => {
                let prepared = self.prepare_object(object.clone())?;
                let type_name = prepared.type_name().ok_or_else(|| TypeError::UnknownType {
                    type_name: "<unnamed>".to_string(),
                })?;
                info.insert(
                    OBJECT_TYPE_NAME.to_string(),
                    Json::String(type_name.to_string()),
                );
                info.insert(
                    SERIALIZATION_DATA_FORMAT.to_string(),
                    Json::String(prepared.format().mime_type().to_string()),
                );
                Json::String(prepared.serialized_value().unwrap_or_default().to_string())
            }
        };

        Ok(VariableValueDto {
            value,
            value_type: Some(typed.value_type().name().to_string()),
            value_info: (!info.is_empty()).then_some(info),
        })
    }

    pub fn encode_map(&self, variables: &VariableMap) -> Result<VariableDtoMap, Error> {
        variables
            .iter()
            .map(|(name, typed)| Ok((name.clone(), self.encode(name, typed)?)))
            .collect()
    }

    /// Decode a wire value. Object, Json and Xml payloads are checked against
    /// their declared format.
    pub fn decode(
        &self,
        name: &str,
        dto: &VariableValueDto,
    ) -> Result<TypedValue, SerializationError> {
        let info = dto.value_info.as_ref();
        let transient = info
            .and_then(|i| i.get(TRANSIENT))
            .and_then(Json::as_bool)
            .unwrap_or(false);

        let value_type = match dto.value_type.as_deref() {
            Some(type_name) => ValueType::from_name(type_name).ok_or_else(|| {
                SerializationError::UnknownValueType {
                    name: name.to_string(),
                    value_type: type_name.to_string(),
                }
            })?,
            None => infer_json_type(&dto.value),
        };

        if dto.value.is_null() {
            return Ok(TypedValue::null().transient(transient));
        }

        let invalid = |reason: &str| SerializationError::InvalidValue {
            name: name.to_string(),
            value_type: value_type.to_string(),
            reason: reason.to_string(),
        };
        let malformed = |format: &str, reason: String| SerializationError::MalformedPayload {
            name: name.to_string(),
            format: format.to_string(),
            reason,
        };

        let value = match value_type {
            ValueType::Null => Value::Null,
            ValueType::Boolean => Value::Boolean(
                dto.value.as_bool().ok_or_else(|| invalid("expected a boolean"))?,
            ),
            ValueType::Short => Value::Short(
                integral(&dto.value)
                    .and_then(|v| i16::try_from(v).ok())
                    .ok_or_else(|| invalid("expected a 16-bit integer"))?,
            ),
            ValueType::Integer => Value::Integer(
                integral(&dto.value)
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| invalid("expected a 32-bit integer"))?,
            ),
            ValueType::Long => Value::Long(
                integral(&dto.value).ok_or_else(|| invalid("expected a 64-bit integer"))?,
            ),
            ValueType::Double => Value::Double(
                dto.value.as_f64().ok_or_else(|| invalid("expected a number"))?,
            ),
            ValueType::String => Value::String(
                dto.value
                    .as_str()
                    .ok_or_else(|| invalid("expected a string"))?
                    .to_string(),
            ),
            ValueType::Date => {
                let date = match &dto.value {
                    Json::String(s) => parse_date(s),
                    Json::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
                    _ => None,
                };
                Value::Date(date.ok_or_else(|| invalid("expected a date"))?)
            }
            ValueType::Bytes => {
                let encoded = dto.value.as_str().ok_or_else(|| invalid("expected base64"))?;
                Value::Bytes(
                    BASE64
                        .decode(encoded)
                        .map_err(|e| invalid(&e.to_string()))?,
                )
            }
            ValueType::Json => {
                let payload = payload_text(&dto.value);
                validate_json(&payload).map_err(|e| malformed("application/json", e))?;
                Value::Json(payload)
            }
            ValueType::Xml => {
                let payload = dto
                    .value
                    .as_str()
                    .ok_or_else(|| invalid("expected an XML string"))?
                    .to_string();
                validate_xml(&payload).map_err(|e| malformed("application/xml", e))?;
                Value::Xml(payload)
            }
            ValueType::Object => {
                let type_name = info
                    .and_then(|i| i.get(OBJECT_TYPE_NAME))
                    .and_then(Json::as_str)
                    .ok_or_else(|| invalid("missing objectTypeName"))?;
                let format = match info
                    .and_then(|i| i.get(SERIALIZATION_DATA_FORMAT))
                    .and_then(Json::as_str)
                {
                    Some(raw) => SerializationDataFormat::from_name(raw).ok_or_else(|| {
                        invalid(&format!("unknown serialization data format '{raw}'"))
                    })?,
                    None => SerializationDataFormat::Json,
                };
                let payload = payload_text(&dto.value);
                validate_payload(&payload, format).map_err(|e| malformed(format.mime_type(), e))?;
                Value::Object(ObjectValue::serialized(type_name, format, payload))
            }
        };

        Ok(TypedValue::new(value).transient(transient))
    }

    pub fn decode_map(&self, variables: &VariableDtoMap) -> Result<VariableMap, SerializationError> {
        variables
            .iter()
            .map(|(name, dto)| Ok((name.clone(), self.decode(name, dto)?)))
            .collect()
    }
}

fn mismatch<T>(name: &str, actual: ValueType) -> TypeError {
    TypeError::Mismatch {
        name: name.to_string(),
        expected: std::any::type_name::<T>().to_string(),
        actual: actual.to_string(),
    }
}

/// Primitive Rust types with no engine value type.
fn is_unsupported_primitive(type_id: TypeId) -> bool {
    [
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
        TypeId::of::<i8>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<f32>(),
        TypeId::of::<char>(),
    ]
    .contains(&type_id)
}

fn infer_json_type(value: &Json) -> ValueType {
    match value {
        Json::Null => ValueType::Null,
        Json::Bool(_) => ValueType::Boolean,
        Json::Number(n) if n.is_i64() => match n.as_i64() {
            Some(v) if i32::try_from(v).is_ok() => ValueType::Integer,
            _ => ValueType::Long,
        },
        Json::Number(_) => ValueType::Double,
        Json::String(_) => ValueType::String,
        Json::Array(_) | Json::Object(_) => ValueType::Json,
    }
}

fn integral(value: &Json) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Payloads usually arrive as strings; inline JSON documents are re-serialized.
fn payload_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn validate_payload(payload: &str, format: SerializationDataFormat) -> Result<(), String> {
    match format {
        SerializationDataFormat::Json => validate_json(payload),
        SerializationDataFormat::Xml => validate_xml(payload),
        SerializationDataFormat::Java => BASE64
            .decode(payload)
            .map(|_| ())
            .map_err(|e| e.to_string()),
    }
}

fn validate_json(payload: &str) -> Result<(), String> {
    serde_json::from_str::<Json>(payload)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn validate_xml(payload: &str) -> Result<(), String> {
    let mut reader = quick_xml::Reader::from_str(payload);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) if depth == 0 => roots += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    match (roots, depth) {
        (0, _) => Err("no root element".to_string()),
        (_, d) if d > 0 => Err("unclosed element".to_string()),
        (1, _) => Ok(()),
        _ => Err("more than one root element".to_string()),
    }
}
