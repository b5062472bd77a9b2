//! Amazon EMR adapter
//!
//! Speaks the EMR JSON 1.1 protocol directly over reqwest with SigV4
//! signed requests.

mod protocol;
pub mod sigv4;

use crate::error::{ProvisioningError, Result};
use crate::provisioner::{instance_groups, ClusterProvisioner, ClusterSpec, JobStep, MarketType};
use async_trait::async_trait;
use atmo_types::{ClusterInfo, JobflowId, ResultVisibility};
use chrono::{DateTime, Utc};
use protocol::*;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const SERVICE: &str = "elasticmapreduce";
const TARGET_PREFIX: &str = "ElasticMapReduce";

/// EMR adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmrConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint override, defaults to the regional EMR endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_instance_type")]
    pub master_instance_type: String,

    #[serde(default = "default_instance_type")]
    pub worker_instance_type: String,

    /// Maximum spot price for worker nodes, in USD
    #[serde(default = "default_spot_bid_price")]
    pub spot_bid_price: String,

    /// Bucket holding bootstrap scripts, steps and the Spark configuration
    #[serde(default = "default_emr_bucket")]
    pub emr_bucket: String,

    /// Bucket holding uploaded notebooks
    #[serde(default = "default_code_bucket")]
    pub code_bucket: String,

    #[serde(default = "default_public_data_bucket")]
    pub public_data_bucket: String,

    #[serde(default = "default_private_data_bucket")]
    pub private_data_bucket: String,

    /// EC2 instance profile the cluster nodes run under
    #[serde(default = "default_instance_profile")]
    pub instance_profile: String,

    #[serde(default = "default_service_role")]
    pub service_role: String,

    /// Value of the `Application` tag
    #[serde(default = "default_application_tag")]
    pub application_tag: String,

    #[serde(default = "default_ec2_key_name")]
    pub ec2_key_name: String,

    /// Override for the Spark configuration document location
    #[serde(default)]
    pub configuration_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_instance_type() -> String {
    "c3.4xlarge".to_string()
}

fn default_spot_bid_price() -> String {
    "0.84".to_string()
}

fn default_emr_bucket() -> String {
    "atmo-emr".to_string()
}

fn default_code_bucket() -> String {
    "atmo-code".to_string()
}

fn default_public_data_bucket() -> String {
    "atmo-public-data".to_string()
}

fn default_private_data_bucket() -> String {
    "atmo-private-data".to_string()
}

fn default_instance_profile() -> String {
    "atmo-spark-instance-profile".to_string()
}

fn default_service_role() -> String {
    "EMR_DefaultRole".to_string()
}

fn default_application_tag() -> String {
    "atmo".to_string()
}

fn default_ec2_key_name() -> String {
    "atmo".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for EmrConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            master_instance_type: default_instance_type(),
            worker_instance_type: default_instance_type(),
            spot_bid_price: default_spot_bid_price(),
            emr_bucket: default_emr_bucket(),
            code_bucket: default_code_bucket(),
            public_data_bucket: default_public_data_bucket(),
            private_data_bucket: default_private_data_bucket(),
            instance_profile: default_instance_profile(),
            service_role: default_service_role(),
            application_tag: default_application_tag(),
            ec2_key_name: default_ec2_key_name(),
            configuration_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl EmrConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.{}.amazonaws.com", SERVICE, self.region))
    }

    pub fn configuration_url(&self) -> String {
        self.configuration_url.clone().unwrap_or_else(|| {
            format!(
                "https://s3-{}.amazonaws.com/{}/configuration/configuration.json",
                self.region, self.emr_bucket
            )
        })
    }

    fn data_bucket(&self, visibility: ResultVisibility) -> &str {
        match visibility {
            ResultVisibility::Private => &self.private_data_bucket,
            ResultVisibility::Public => &self.public_data_bucket,
        }
    }
}

/// AWS access credentials
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ProvisioningError::Configuration(format!("{} is not set", name)))
        };

        Ok(Self {
            access_key_id: read("AWS_ACCESS_KEY_ID")?,
            secret_access_key: read("AWS_SECRET_ACCESS_KEY")?,
            session_token: std::env::var("AWS_SESSION_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        })
    }
}

/// EMR backed [`ClusterProvisioner`]
pub struct EmrProvisioner {
    client: Client,
    config: EmrConfig,
    credentials: AwsCredentials,
    endpoint: Url,
    host: String,
}

impl EmrProvisioner {
    pub fn new(config: EmrConfig, credentials: AwsCredentials) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint()).map_err(|e| {
            ProvisioningError::Configuration(format!("invalid EMR endpoint: {}", e))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ProvisioningError::Configuration(
                    "EMR endpoint has no host".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            credentials,
            endpoint,
            host,
        })
    }

    pub fn config(&self) -> &EmrConfig {
        &self.config
    }

    /// Issue one signed action and return the raw response body
    async fn execute<B: Serialize>(&self, action: &str, body: &B) -> Result<String> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ProvisioningError::InvalidResponse(e.to_string()))?;
        let target = format!("{}.{}", TARGET_PREFIX, action);

        let signed = sigv4::sign(
            &sigv4::SigningCredentials {
                access_key_id: &self.credentials.access_key_id,
                secret_access_key: &self.credentials.secret_access_key,
                session_token: self.credentials.session_token.as_deref(),
            },
            &self.config.region,
            SERVICE,
            &sigv4::SigningRequest {
                host: &self.host,
                content_type: CONTENT_TYPE,
                target: &target,
                body: &payload,
            },
            Utc::now(),
        )?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", &target)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization)
            .body(payload);
        if let Some(token) = &signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        tracing::debug!(action = %action, "EMR request");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(text);
        }

        let error: ErrorResponse = serde_json::from_str(&text).unwrap_or(ErrorResponse {
            error_type: None,
            message: Some(text),
        });
        let code = error.code();
        let message = error.message.unwrap_or_else(|| status.to_string());
        tracing::warn!(action = %action, status = %status, code = %code, "EMR request rejected");

        if status.is_server_error() {
            return Err(ProvisioningError::Transport(format!(
                "{} ({}): {}",
                code, status, message
            )));
        }
        Err(ProvisioningError::Rejected { code, message })
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, action: &str, body: &B) -> Result<T> {
        let text = self.execute(action, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            ProvisioningError::InvalidResponse(format!("{} response: {}", action, e))
        })
    }

    /// Download the Spark configuration document passed to new clusters
    async fn fetch_configurations(&self) -> Result<serde_json::Value> {
        let url = self.config.configuration_url();
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProvisioningError::Configuration(format!(
                "cannot fetch cluster configuration from {}: {}",
                url,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    fn run_job_flow_request(
        &self,
        spec: &ClusterSpec,
        configurations: Option<serde_json::Value>,
    ) -> RunJobFlowRequest {
        let config = &self.config;

        let instance_groups = instance_groups(spec.size)
            .into_iter()
            .map(|group| {
                let (market, instance_type, bid_price) = match group.market {
                    MarketType::OnDemand => ("ON_DEMAND", &config.master_instance_type, None),
                    MarketType::Spot => (
                        "SPOT",
                        &config.worker_instance_type,
                        Some(config.spot_bid_price.clone()),
                    ),
                };
                InstanceGroupConfig {
                    name: group.name.to_string(),
                    market: market.to_string(),
                    instance_role: group.role.to_string(),
                    instance_type: instance_type.clone(),
                    instance_count: group.count,
                    bid_price,
                }
            })
            .collect();

        let mut bootstrap_args = Vec::new();
        if let Some(key) = &spec.public_key {
            bootstrap_args.push("--public-key".to_string());
            bootstrap_args.push(key.clone());
        }
        if let Some(job) = &spec.job {
            bootstrap_args.push("--timeout".to_string());
            bootstrap_args.push((job.job_timeout_hours * 60).to_string());
        }

        let steps = spec
            .job
            .as_ref()
            .map(|job| vec![self.notebook_step(&spec.identifier, job)])
            .unwrap_or_default();

        RunJobFlowRequest {
            name: uuid::Uuid::new_v4().to_string(),
            release_label: format!("emr-{}", spec.emr_release),
            instances: JobFlowInstances {
                instance_groups,
                ec2_key_name: config.ec2_key_name.clone(),
                keep_job_flow_alive_when_no_steps: spec.job.is_none(),
            },
            job_flow_role: config.instance_profile.clone(),
            service_role: config.service_role.clone(),
            applications: vec![
                Application {
                    name: "Spark".to_string(),
                },
                Application {
                    name: "Hive".to_string(),
                },
            ],
            configurations,
            bootstrap_actions: vec![BootstrapAction {
                name: "setup-atmo-cluster".to_string(),
                script_bootstrap_action: ScriptBootstrapAction {
                    path: format!("s3://{}/bootstrap/atmo.sh", config.emr_bucket),
                    args: bootstrap_args,
                },
            }],
            steps,
            tags: vec![
                Tag::new("Owner", spec.owner_email.clone()),
                Tag::new("Name", spec.identifier.clone()),
                Tag::new("Application", config.application_tag.clone()),
            ],
            visible_to_all_users: true,
        }
    }

    fn notebook_step(&self, identifier: &str, job: &JobStep) -> Step {
        let config = &self.config;
        Step {
            name: "RunNotebookStep".to_string(),
            action_on_failure: "TERMINATE_JOB_FLOW".to_string(),
            hadoop_jar_step: HadoopJarStep {
                jar: format!(
                    "s3://{}.elasticmapreduce/libs/script-runner/script-runner.jar",
                    config.region
                ),
                args: vec![
                    format!("s3://{}/steps/batch.sh", config.emr_bucket),
                    "--job-name".to_string(),
                    identifier.to_string(),
                    "--notebook".to_string(),
                    format!("s3://{}/{}", config.code_bucket, job.notebook_key),
                    "--data-bucket".to_string(),
                    config.data_bucket(job.result_visibility).to_string(),
                ],
            },
        }
    }
}

/// EMR reports unknown cluster ids as an invalid request
fn not_found_for(err: ProvisioningError, jobflow_id: &JobflowId) -> ProvisioningError {
    let missing = matches!(
        &err,
        ProvisioningError::Rejected { code, message }
            if code == "InvalidRequestException" && message.contains("not valid")
    );
    if missing {
        ProvisioningError::NotFound(jobflow_id.to_string())
    } else {
        err
    }
}

#[async_trait]
impl ClusterProvisioner for EmrProvisioner {
    async fn start(&self, spec: &ClusterSpec) -> Result<JobflowId> {
        let configurations = self.fetch_configurations().await?;
        let request = self.run_job_flow_request(spec, Some(configurations));

        let response: RunJobFlowResponse = self.call("RunJobFlow", &request).await?;
        let jobflow_id = JobflowId::new(response.job_flow_id);

        tracing::info!(
            jobflow_id = %jobflow_id,
            identifier = %spec.identifier,
            size = spec.size,
            "EMR cluster requested"
        );
        Ok(jobflow_id)
    }

    async fn info(&self, jobflow_id: &JobflowId) -> Result<ClusterInfo> {
        let response: DescribeClusterResponse = self
            .call(
                "DescribeCluster",
                &DescribeClusterRequest {
                    cluster_id: jobflow_id.as_str(),
                },
            )
            .await
            .map_err(|e| not_found_for(e, jobflow_id))?;

        let cluster = response.cluster;
        Ok(cluster
            .status
            .into_info(cluster.id, cluster.master_public_dns_name))
    }

    async fn list(&self, created_after: DateTime<Utc>) -> Result<Vec<ClusterInfo>> {
        let mut infos = Vec::new();
        let mut marker = None;

        loop {
            let response: ListClustersResponse = self
                .call(
                    "ListClusters",
                    &ListClustersRequest {
                        created_after: datetime_to_epoch(created_after),
                        marker: marker.take(),
                    },
                )
                .await?;

            infos.extend(
                response
                    .clusters
                    .into_iter()
                    .map(|summary| summary.status.into_info(summary.id, None)),
            );

            match response.marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        tracing::debug!(count = infos.len(), created_after = %created_after, "Listed EMR clusters");
        Ok(infos)
    }

    async fn rename(&self, jobflow_id: &JobflowId, new_identifier: &str) -> Result<()> {
        self.execute(
            "AddTags",
            &AddTagsRequest {
                resource_id: jobflow_id.as_str(),
                tags: vec![Tag::new("Name", new_identifier)],
            },
        )
        .await
        .map_err(|e| not_found_for(e, jobflow_id))?;
        Ok(())
    }

    async fn stop(&self, jobflow_id: &JobflowId) -> Result<()> {
        let result = self
            .execute(
                "TerminateJobFlows",
                &TerminateJobFlowsRequest {
                    job_flow_ids: vec![jobflow_id.as_str()],
                },
            )
            .await
            .map_err(|e| not_found_for(e, jobflow_id));

        match result {
            Ok(_) => {
                tracing::info!(jobflow_id = %jobflow_id, "EMR cluster termination requested");
                Ok(())
            }
            Err(ProvisioningError::NotFound(_)) => {
                tracing::debug!(jobflow_id = %jobflow_id, "Cluster already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
