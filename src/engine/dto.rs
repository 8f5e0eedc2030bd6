//! Wire types for the engine's external-task REST resources.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// A variable as it travels over the wire: `{value, type, valueInfo}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableValueDto {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_info: Option<serde_json::Map<String, serde_json::Value>>,
}

pub type VariableDtoMap = IndexMap<String, VariableValueDto>;

/// Body of `POST /external-task/fetchAndLock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAndLockRequest {
    pub worker_id: String,
    pub max_tasks: usize,
    pub use_priority: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_response_timeout: Option<u64>,
    pub topics: Vec<TopicRequest>,
}

/// One topic entry of a fetch request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRequest {
    pub topic_name: String,
    pub lock_duration: i64,
    #[serde(rename = "variables", default, skip_serializing_if = "Option::is_none")]
    pub variable_names: Option<Vec<String>>,
    #[serde(default)]
    pub local_variables: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_id_in: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_key_in: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_version_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id_in: Option<Vec<String>>,
    #[serde(default)]
    pub without_tenant_id: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_variables: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub include_extension_properties: bool,
    #[serde(default)]
    pub deserialize_values: bool,
}

/// A locked task as returned by fetch-and-lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LockedExternalTaskDto {
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
    #[serde(deserialize_with = "null_as_default")]
    pub priority: i64,
    pub lock_expiration_time: Option<String>,
    pub create_time: Option<String>,
    pub business_key: Option<String>,
    pub tenant_id: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub suspended: bool,
    pub extension_properties: Option<HashMap<String, String>>,
    #[serde(deserialize_with = "null_as_default")]
    pub variables: VariableDtoMap,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of `POST /external-task/{id}/complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub worker_id: String,
    pub variables: VariableDtoMap,
    pub local_variables: VariableDtoMap,
}

/// Body of `POST /external-task/{id}/unlock`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnlockRequest {}

/// Body of `POST /external-task/{id}/failure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRequest {
    pub worker_id: String,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    pub retries: i32,
    pub retry_timeout: i64,
    pub variables: VariableDtoMap,
    pub local_variables: VariableDtoMap,
}

/// Body of `POST /external-task/{id}/bpmnError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BpmnErrorRequest {
    pub worker_id: String,
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub variables: VariableDtoMap,
}

/// Body of `POST /external-task/{id}/extendLock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLockRequest {
    pub worker_id: String,
    pub new_duration: i64,
}

/// Error body the engine sends with non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineErrorBody {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub message: Option<String>,
}
