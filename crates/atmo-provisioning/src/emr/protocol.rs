//! EMR JSON 1.1 wire types
//!
//! Field names follow the EMR API. Timestamps arrive as fractional epoch
//! seconds.

use atmo_types::{ClusterInfo, ClusterStatus, JobflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunJobFlowRequest {
    pub name: String,
    pub release_label: String,
    pub instances: JobFlowInstances,
    pub job_flow_role: String,
    pub service_role: String,
    pub applications: Vec<Application>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configurations: Option<Value>,
    pub bootstrap_actions: Vec<BootstrapAction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    pub tags: Vec<Tag>,
    pub visible_to_all_users: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobFlowInstances {
    pub instance_groups: Vec<InstanceGroupConfig>,
    pub ec2_key_name: String,
    pub keep_job_flow_alive_when_no_steps: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceGroupConfig {
    pub name: String,
    pub market: String,
    pub instance_role: String,
    pub instance_type: String,
    pub instance_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_price: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Application {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BootstrapAction {
    pub name: String,
    pub script_bootstrap_action: ScriptBootstrapAction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScriptBootstrapAction {
    pub path: String,
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Step {
    pub name: String,
    pub action_on_failure: String,
    pub hadoop_jar_step: HadoopJarStep,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HadoopJarStep {
    pub jar: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunJobFlowResponse {
    pub job_flow_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeClusterRequest<'a> {
    pub cluster_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeClusterResponse {
    pub cluster: ClusterDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterDescription {
    pub id: String,
    pub status: ClusterStatusDescription,
    #[serde(default)]
    pub master_public_dns_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListClustersRequest {
    pub created_after: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListClustersResponse {
    #[serde(default)]
    pub clusters: Vec<ClusterSummary>,
    #[serde(default)]
    pub marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterSummary {
    pub id: String,
    pub status: ClusterStatusDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterStatusDescription {
    pub state: String,
    #[serde(default)]
    pub state_change_reason: Option<StateChangeReason>,
    pub timeline: Timeline,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateChangeReason {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Timeline {
    pub creation_date_time: f64,
    #[serde(default)]
    pub ready_date_time: Option<f64>,
    #[serde(default)]
    pub end_date_time: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddTagsRequest<'a> {
    pub resource_id: &'a str,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TerminateJobFlowsRequest<'a> {
    pub job_flow_ids: Vec<&'a str>,
}

/// Error body of a rejected request
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "__type", default)]
    pub error_type: Option<String>,
    #[serde(alias = "Message", default)]
    pub message: Option<String>,
}

impl ErrorResponse {
    /// `__type` may carry a namespace prefix (`com.amazon...#Code`)
    pub fn code(&self) -> String {
        self.error_type
            .as_deref()
            .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
            .unwrap_or_else(|| "UnknownError".to_string())
    }
}

pub fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9).round() as u32;
    DateTime::from_timestamp(whole, nanos.min(999_999_999))
}

pub fn datetime_to_epoch(datetime: DateTime<Utc>) -> f64 {
    datetime.timestamp() as f64 + datetime.timestamp_subsec_millis() as f64 / 1000.0
}

impl ClusterStatusDescription {
    pub fn into_info(self, id: String, public_address: Option<String>) -> ClusterInfo {
        let (code, message) = match self.state_change_reason {
            Some(reason) => (reason.code, reason.message),
            None => (None, None),
        };

        ClusterInfo {
            jobflow_id: JobflowId::new(id),
            state: ClusterStatus::from_remote(&self.state),
            creation_time: epoch_to_datetime(self.timeline.creation_date_time)
                .unwrap_or_else(Utc::now),
            ready_time: self.timeline.ready_date_time.and_then(epoch_to_datetime),
            end_time: self.timeline.end_date_time.and_then(epoch_to_datetime),
            public_address: public_address.filter(|a| !a.is_empty()),
            state_change_reason_code: code,
            state_change_reason_message: message,
        }
    }
}
