//! Owner notifications
//!
//! Delivery is fire-and-forget: a failed send is logged and never retried
//! by the orchestrator. The record that triggered it is stamped as sent
//! either way, so a sweep never produces duplicates.

use async_trait::async_trait;
use atmo_types::{Cluster, SparkJob, SparkJobRun};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// One outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Delivery failure
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Transport(String),

    #[error("Delivery rejected with status {0}")]
    Rejected(u16),
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            to = ?notification.to,
            cc = ?notification.cc,
            subject = %notification.subject,
            "Notification"
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a mail relay
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}

/// Sender identity and subject decoration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Sender address, also copied on every message
    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Copy the sender address on every message
    #[serde(default = "default_cc_sender")]
    pub cc_sender: bool,
}

fn default_from_address() -> String {
    "atmo-no-reply@example.com".to_string()
}

fn default_subject_prefix() -> String {
    "[ATMO] ".to_string()
}

fn default_cc_sender() -> bool {
    true
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            subject_prefix: default_subject_prefix(),
            cc_sender: default_cc_sender(),
        }
    }
}

/// Builds owner notifications and hands them to a [`Notifier`]
#[derive(Clone)]
pub struct Mailer {
    notifier: Arc<dyn Notifier>,
    settings: NotificationSettings,
}

impl Mailer {
    pub fn new(notifier: Arc<dyn Notifier>, settings: NotificationSettings) -> Self {
        Self { notifier, settings }
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    fn message(&self, to: &str, subject: String, body: String) -> Notification {
        let cc = if self.settings.cc_sender {
            vec![self.settings.from_address.clone()]
        } else {
            Vec::new()
        };
        Notification {
            from: self.settings.from_address.clone(),
            to: vec![to.to_string()],
            cc,
            subject: format!("{}{}", self.settings.subject_prefix, subject),
            body,
        }
    }

    pub fn run_alert_message(&self, job: &SparkJob, run: &SparkJobRun) -> Notification {
        let reason = run
            .alert
            .as_ref()
            .map(|alert| alert.reason.to_string())
            .unwrap_or_else(|| "unknown reason".to_string());

        self.message(
            job.created_by.email(),
            format!("Running Spark job {} failed", job.identifier),
            format!(
                "Your scheduled Spark job \"{}\" failed.\n\n\
                 Run scheduled at: {}\n\
                 Cluster: {}\n\
                 Reason: {}\n",
                job.identifier,
                run.scheduled_at.to_rfc3339(),
                run.jobflow_id
                    .as_ref()
                    .map(|h| h.as_str())
                    .unwrap_or("not provisioned"),
                reason,
            ),
        )
    }

    pub fn job_expired_message(&self, job: &SparkJob) -> Notification {
        let ended = job
            .end_date
            .map(|end| end.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());

        self.message(
            job.created_by.email(),
            format!("Spark job {} expired", job.identifier),
            format!(
                "Your scheduled Spark job \"{}\" reached its end date ({}) and will \
                 not run again.\n\nEdit the job and move its end date to schedule it again.\n",
                job.identifier, ended,
            ),
        )
    }

    pub fn cluster_expiring_message(&self, cluster: &Cluster) -> Notification {
        let ends = cluster
            .end_date
            .map(|end| end.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());

        self.message(
            cluster.created_by.email(),
            format!("Cluster {} is expiring soon!", cluster.identifier),
            format!(
                "Your cluster \"{}\" will be terminated at {}.\n\n\
                 Extend its lifetime to keep it running.\n",
                cluster.identifier, ends,
            ),
        )
    }

    /// Send and log the outcome. Returns whether delivery succeeded.
    pub async fn deliver(&self, notification: Notification) -> bool {
        match self.notifier.send(&notification).await {
            Ok(()) => {
                tracing::debug!(to = ?notification.to, subject = %notification.subject, "Notification sent");
                true
            }
            Err(e) => {
                tracing::error!(
                    to = ?notification.to,
                    subject = %notification.subject,
                    error = %e,
                    "Failed to send notification"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmo_types::{
        AlertReason, JobInterval, ResultVisibility, SparkJobId, UserRef,
    };
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job() -> SparkJob {
        let now = Utc.with_ymd_and_hms(2016, 4, 5, 13, 25, 47).unwrap();
        SparkJob {
            id: SparkJobId::generate(),
            identifier: "test-spark-job".to_string(),
            size: 5,
            interval: JobInterval::Daily,
            job_timeout_hours: 12,
            start_date: now,
            end_date: Some(now),
            is_enabled: true,
            notebook_key: "jobs/test-spark-job/notebook.ipynb".to_string(),
            result_visibility: ResultVisibility::Private,
            emr_release: "5.2.1".to_string(),
            created_by: UserRef::new("john@example.com"),
            last_run_id: None,
            last_run_at: None,
            expired_at: None,
            expiry_mail_sent_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    fn mailer(notifier: Arc<dyn Notifier>) -> Mailer {
        Mailer::new(
            notifier,
            NotificationSettings {
                from_address: "atmo@example.com".to_string(),
                subject_prefix: "[ATMO] ".to_string(),
                cc_sender: true,
            },
        )
    }

    #[test]
    fn test_run_alert_subject_and_recipients() {
        let job = job();
        let mut run = SparkJobRun::new(job.id, job.start_date);
        run.raise_alert(
            AlertReason::ClusterFailure {
                code: "BOOTSTRAP_FAILURE".to_string(),
                message: Some("Bootstrapping steps failed.".to_string()),
            },
            job.start_date,
        );

        let message = mailer(Arc::new(LogNotifier)).run_alert_message(&job, &run);
        assert_eq!(message.subject, "[ATMO] Running Spark job test-spark-job failed");
        assert_eq!(message.from, "atmo@example.com");
        assert_eq!(message.to, vec!["john@example.com".to_string()]);
        assert_eq!(message.cc, vec!["atmo@example.com".to_string()]);
        assert!(message.body.contains("Bootstrapping steps failed."));
    }

    #[test]
    fn test_expiry_subjects() {
        let mailer = mailer(Arc::new(LogNotifier));
        assert_eq!(
            mailer.job_expired_message(&job()).subject,
            "[ATMO] Spark job test-spark-job expired"
        );
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_messages() {
        let recorder = RecordingNotifier::new();
        let mailer = mailer(Arc::new(recorder.clone()));
        assert!(mailer.deliver(mailer.job_expired_message(&job())).await);
        assert_eq!(recorder.count().await, 1);
    }

    #[tokio::test]
    async fn test_webhook_notifier_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .and(body_partial_json(serde_json::json!({
                "subject": "[ATMO] Spark job test-spark-job expired"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(
            format!("{}/notify", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        let mailer = mailer(Arc::new(notifier));
        assert!(mailer.deliver(mailer.job_expired_message(&job())).await);
    }

    #[tokio::test]
    async fn test_webhook_failure_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::new(server.uri(), Duration::from_secs(5)).unwrap();
        let mailer = mailer(Arc::new(notifier));
        assert!(!mailer.deliver(mailer.job_expired_message(&job())).await);
    }
}
