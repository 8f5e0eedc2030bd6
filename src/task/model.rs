//! Decoded external task and its variable accessors.

use std::any::Any;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::engine::dto::LockedExternalTaskDto;
use crate::error::{Error, SerializationError};
use crate::variables::codec::parse_date;
use crate::variables::{TypedValue, VariableMap, VariableValueCodec};

/// A task locked by this worker.
///
/// Owned by exactly one handler invocation. Variables written through the
/// `set_*` methods are kept apart from the fetched ones and take precedence
/// over them on read; `TaskService::complete` sends them back to the engine.
#[derive(Debug, Clone)]
pub struct ExternalTask {
    pub id: String,
    pub topic_name: String,
    pub worker_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub process_definition_key: Option<String>,
    pub process_definition_version_tag: Option<String>,
    pub activity_id: Option<String>,
    pub activity_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub retries: Option<i32>,
    pub priority: i64,
    pub lock_expiration_time: Option<DateTime<Utc>>,
    pub create_time: Option<DateTime<Utc>>,
    pub business_key: Option<String>,
    pub tenant_id: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    pub suspended: bool,
    pub extension_properties: HashMap<String, String>,
    received: VariableMap,
    local: VariableMap,
    codec: VariableValueCodec,
}

impl ExternalTask {
    /// Decode a fetched task. Any variable that fails to decode fails the whole task.
    pub fn decode(
        dto: LockedExternalTaskDto,
        codec: &VariableValueCodec,
    ) -> Result<Self, SerializationError> {
        let received =
            codec
                .decode_map(&dto.variables)
                .map_err(|source| SerializationError::Task {
                    task_id: dto.id.clone(),
                    source: Box::new(source),
                })?;

        let lock_expiration_time =
            task_date(&dto.id, "lockExpirationTime", dto.lock_expiration_time.as_deref());
        let create_time = task_date(&dto.id, "createTime", dto.create_time.as_deref());

        Ok(Self {
            id: dto.id,
            topic_name: dto.topic_name,
            worker_id: dto.worker_id,
            process_instance_id: dto.process_instance_id,
            process_definition_id: dto.process_definition_id,
            process_definition_key: dto.process_definition_key,
            process_definition_version_tag: dto.process_definition_version_tag,
            activity_id: dto.activity_id,
            activity_instance_id: dto.activity_instance_id,
            execution_id: dto.execution_id,
            retries: dto.retries,
            priority: dto.priority,
            lock_expiration_time,
            create_time,
            business_key: dto.business_key,
            tenant_id: dto.tenant_id,
            error_message: dto.error_message,
            error_details: dto.error_details,
            suspended: dto.suspended,
            extension_properties: dto.extension_properties.unwrap_or_default(),
            received,
            local: VariableMap::new(),
            codec: codec.clone(),
        })
    }

    /// A task with no remote state, for building tasks by hand.
    pub fn new(
        id: impl Into<String>,
        topic_name: impl Into<String>,
        codec: VariableValueCodec,
    ) -> Self {
        Self {
            id: id.into(),
            topic_name: topic_name.into(),
            worker_id: None,
            process_instance_id: None,
            process_definition_id: None,
            process_definition_key: None,
            process_definition_version_tag: None,
            activity_id: None,
            activity_instance_id: None,
            execution_id: None,
            retries: None,
            priority: 0,
            lock_expiration_time: None,
            create_time: None,
            business_key: None,
            tenant_id: None,
            error_message: None,
            error_details: None,
            suspended: false,
            extension_properties: HashMap::new(),
            received: VariableMap::new(),
            local: VariableMap::new(),
            codec,
        }
    }

    /// Seed fetched variables (used when building tasks by hand).
    pub fn with_received_variables(mut self, variables: VariableMap) -> Self {
        self.received = variables;
        self
    }

    // ── Untyped access ─────────────────────────────────────────────

    /// Read a variable as `T`. `Ok(None)` when absent or null.
    pub fn get_variable<T: Any + Clone>(&self, name: &str) -> Result<Option<T>, Error> {
        match self.get_variable_typed(name) {
            Some(typed) => self.codec.to_native(name, typed),
            None => Ok(None),
        }
    }

    /// Set a variable, inferring its type from the value's runtime type.
    pub fn set_variable<T: Any + Send + Sync>(
        &mut self,
        name: impl Into<String>,
        value: T,
    ) -> Result<(), Error> {
        let typed = self.codec.infer(value)?;
        self.local.insert(name.into(), typed);
        Ok(())
    }

    // ── Typed access ───────────────────────────────────────────────

    /// Local writes shadow fetched values of the same name.
    pub fn get_variable_typed(&self, name: &str) -> Option<&TypedValue> {
        self.local.get(name).or_else(|| self.received.get(name))
    }

    pub fn set_variable_typed(
        &mut self,
        name: impl Into<String>,
        value: TypedValue,
    ) -> Result<(), Error> {
        let typed = self.codec.prepare(value)?;
        self.local.insert(name.into(), typed);
        Ok(())
    }

    // ── Bulk access ────────────────────────────────────────────────

    /// Merged copy of fetched and local variables; local values win.
    pub fn get_all_variables_typed(&self) -> VariableMap {
        let mut merged = self.received.clone();
        for (name, value) in &self.local {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    /// Overwrite the given keys wholesale; other variables are left untouched.
    pub fn set_all_variables<K, I>(&mut self, variables: I) -> Result<(), Error>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TypedValue)>,
    {
        for (name, value) in variables {
            self.set_variable_typed(name, value)?;
        }
        Ok(())
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.local.contains_key(name) || self.received.contains_key(name)
    }

    /// Variables written during this invocation.
    pub fn local_variables(&self) -> &VariableMap {
        &self.local
    }

    /// Variables as fetched from the engine.
    pub fn received_variables(&self) -> &VariableMap {
        &self.received
    }

    pub fn codec(&self) -> &VariableValueCodec {
        &self.codec
    }
}

/// Parse an optional engine timestamp, logging values that do not parse.
fn task_date(task_id: &str, field: &str, raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = parse_date(raw);
    if parsed.is_none() {
        tracing::warn!(task_id = %task_id, field, value = %raw, "Ignoring unparsable timestamp");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::error::TypeError;
    use crate::variables::{ObjectTypeRegistry, ObjectValue, SerializationDataFormat, ValueType};

    fn codec() -> VariableValueCodec {
        VariableValueCodec::new(Arc::new(
            ObjectTypeRegistry::new().with_json::<Vec<String>>("java.util.ArrayList"),
        ))
    }

    fn fetched(variables: serde_json::Value) -> LockedExternalTaskDto {
        serde_json::from_value(json!({
            "id": "task-1",
            "topicName": "foo",
            "workerId": "worker",
            "retries": 3,
            "priority": 10,
            "businessKey": "order-7",
            "lockExpirationTime": "2024-03-01T10:00:00.000+0000",
            "variables": variables,
        }))
        .unwrap()
    }

    #[test]
    fn decodes_task_fields() {
        let task = ExternalTask::decode(fetched(json!({})), &codec()).unwrap();
        assert_eq!(task.id, "task-1");
        assert_eq!(task.topic_name, "foo");
        assert_eq!(task.retries, Some(3));
        assert_eq!(task.priority, 10);
        assert_eq!(task.business_key.as_deref(), Some("order-7"));
        assert_eq!(
            task.lock_expiration_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn unparsable_timestamp_is_dropped_without_failing_the_task() {
        let mut dto = fetched(json!({}));
        dto.lock_expiration_time = Some("yesterday".to_string());
        dto.create_time = Some("2024-02-29T08:30:00.000+0100".to_string());

        let task = ExternalTask::decode(dto, &codec()).unwrap();
        assert_eq!(task.lock_expiration_time, None);
        assert_eq!(
            task.create_time,
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 7, 30, 0).unwrap())
        );
        assert_eq!(task_date("task-1", "createTime", None), None);
    }

    #[test]
    fn set_then_get_round_trips_primitives() {
        let mut task = ExternalTask::new("t", "foo", codec());
        let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        task.set_variable("bool", true).unwrap();
        task.set_variable("short", 5i16).unwrap();
        task.set_variable("int", 5).unwrap();
        task.set_variable("long", 5i64).unwrap();
        task.set_variable("double", 5.0).unwrap();
        task.set_variable("string", "s").unwrap();
        task.set_variable("date", date).unwrap();
        task.set_variable("bytes", vec![1u8, 2, 3]).unwrap();

        assert_eq!(task.get_variable::<bool>("bool").unwrap(), Some(true));
        assert_eq!(task.get_variable::<i16>("short").unwrap(), Some(5));
        assert_eq!(task.get_variable::<i32>("int").unwrap(), Some(5));
        assert_eq!(task.get_variable::<i64>("long").unwrap(), Some(5));
        assert_eq!(task.get_variable::<f64>("double").unwrap(), Some(5.0));
        assert_eq!(
            task.get_variable::<String>("string").unwrap(),
            Some("s".to_string())
        );
        assert_eq!(task.get_variable::<DateTime<Utc>>("date").unwrap(), Some(date));
        assert_eq!(
            task.get_variable::<Vec<u8>>("bytes").unwrap(),
            Some(vec![1, 2, 3])
        );

        let types: Vec<ValueType> = task
            .local_variables()
            .values()
            .map(TypedValue::value_type)
            .collect();
        assert_eq!(
            types,
            vec![
                ValueType::Boolean,
                ValueType::Short,
                ValueType::Integer,
                ValueType::Long,
                ValueType::Double,
                ValueType::String,
                ValueType::Date,
                ValueType::Bytes,
            ]
        );
    }

    #[test]
    fn wrong_type_is_a_mismatch() {
        let mut task = ExternalTask::new("t", "foo", codec());
        task.set_variable("int", 5).unwrap();
        let err = task.get_variable::<String>("int").unwrap_err();
        assert!(matches!(err, Error::Type(TypeError::Mismatch { .. })));
        assert_eq!(task.get_variable::<String>("missing").unwrap(), None);
    }

    #[test]
    fn local_writes_merge_over_fetched_values() {
        let mut task = ExternalTask::decode(
            fetched(json!({
                "a": {"value": 1, "type": "Integer"},
                "b": {"value": 2, "type": "Integer"},
            })),
            &codec(),
        )
        .unwrap();

        task.set_all_variables([("a", TypedValue::integer(3)), ("c", TypedValue::integer(4))])
            .unwrap();

        let expected: VariableMap = [
            ("a".to_string(), TypedValue::integer(3)),
            ("b".to_string(), TypedValue::integer(2)),
            ("c".to_string(), TypedValue::integer(4)),
        ]
        .into_iter()
        .collect();
        assert_eq!(task.get_all_variables_typed(), expected);
        // The fetched map itself is untouched.
        assert_eq!(
            task.received_variables()["a"],
            TypedValue::integer(1)
        );
    }

    #[test]
    fn latest_local_write_wins_wholesale() {
        let mut task = ExternalTask::new("t", "foo", codec());
        task.set_variable_typed("x", TypedValue::string("first").transient(true))
            .unwrap();
        task.set_variable_typed("x", TypedValue::integer(2)).unwrap();

        let value = task.get_variable_typed("x").unwrap();
        assert_eq!(value, &TypedValue::integer(2));
        assert!(!value.is_transient());
    }

    #[test]
    fn object_variables_deserialize_through_registry() {
        let mut task = ExternalTask::new("t", "foo", codec());
        let list = vec!["a".to_string()];
        task.set_variable_typed(
            "list",
            TypedValue::object(
                ObjectValue::new(list.clone())
                    .serialization_data_format(SerializationDataFormat::Json),
            ),
        )
        .unwrap();

        let stored = task.get_variable_typed("list").unwrap();
        assert_eq!(stored.value_type(), ValueType::Object);
        assert_eq!(task.get_variable::<Vec<String>>("list").unwrap(), Some(list));
    }

    #[test]
    fn unsupported_object_format_is_rejected() {
        let mut task = ExternalTask::new("t", "foo", codec());
        let result = task.set_variable_typed(
            "list",
            TypedValue::object(
                ObjectValue::new(vec!["a".to_string()])
                    .serialization_data_format(SerializationDataFormat::Xml),
            ),
        );
        assert!(matches!(
            result,
            Err(Error::Type(TypeError::UnsupportedFormat { .. }))
        ));
    }

    #[test]
    fn broken_variable_fails_task_decode() {
        let result = ExternalTask::decode(
            fetched(json!({"n": {"value": "abc", "type": "Integer"}})),
            &codec(),
        );
        assert!(matches!(
            result,
            Err(SerializationError::Task { ref task_id, .. }) if task_id == "task-1"
        ));
    }
}
