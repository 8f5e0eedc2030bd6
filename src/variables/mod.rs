//! Typed process variables.
//!
//! Core components:
//! - `value`: `TypedValue`, `Value`, `ValueType`, `ObjectValue`
//! - `objects`: explicit registry of object types and their codecs
//! - `codec`: native ⇄ typed ⇄ wire conversion

pub mod codec;
pub mod objects;
pub mod value;

pub use codec::VariableValueCodec;
pub use objects::{JsonObjectCodec, ObjectCodec, ObjectTypeRegistry};
pub use value::{ObjectValue, SerializationDataFormat, TypedValue, Value, ValueType, VariableMap};
