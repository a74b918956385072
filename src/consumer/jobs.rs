//! Notification job payloads and their processors.
//!
//! Jobs arrive as JSON queue messages, are decoded once, and are translated
//! into outbound envelopes for the dispatcher. Per-device delivery outcomes
//! are observed for logging only; they never change the fate of the job.

use serde::Deserialize;
use serde_json::json;

use crate::dispatch::Dispatcher;
use crate::ws::protocol::{Envelope, EnvelopeKind};

const DEFAULT_NOTIFICATION_TYPE: &str = "alert";
const DEFAULT_PRIORITY: &str = "normal";

/// Single-target notification job.
#[derive(Debug, Clone, Deserialize)]
pub struct SingleJob {
    #[serde(alias = "jobId", default)]
    pub id: Option<String>,
    #[serde(rename = "targetDevice")]
    pub target_device: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "notificationType", default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// Multi-target notification job. One template fanned out to every listed
/// device.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkJob {
    #[serde(alias = "jobId", default)]
    pub id: Option<String>,
    #[serde(rename = "targetDevices")]
    pub target_devices: Vec<String>,
    pub title: String,
    pub message: String,
    #[serde(rename = "notificationType", default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

fn notification_envelope(
    title: &str,
    message: &str,
    notification_type: Option<&str>,
    priority: Option<&str>,
    from_bulk: bool,
) -> Envelope {
    let mut data = json!({
        "title": title,
        "message": message,
        "notificationType": notification_type.unwrap_or(DEFAULT_NOTIFICATION_TYPE),
        "priority": priority.unwrap_or(DEFAULT_PRIORITY),
    });
    if from_bulk {
        data["fromBulk"] = json!(true);
    }
    Envelope::new(EnvelopeKind::Notification, data)
}

impl SingleJob {
    pub fn envelope(&self) -> Envelope {
        notification_envelope(
            &self.title,
            &self.message,
            self.notification_type.as_deref(),
            self.priority.as_deref(),
            false,
        )
    }
}

impl BulkJob {
    pub fn envelope(&self) -> Envelope {
        notification_envelope(
            &self.title,
            &self.message,
            self.notification_type.as_deref(),
            self.priority.as_deref(),
            true,
        )
    }
}

/// Deliver a single-target job. An offline device is a normal miss.
pub fn process_single(dispatcher: &Dispatcher, job: &SingleJob) {
    let delivered = dispatcher.send_to_device(&job.target_device, &job.envelope());

    if delivered {
        tracing::info!(job_id = ?job.id, device_id = %job.target_device, "Notification delivered");
    } else {
        tracing::info!(job_id = ?job.id, device_id = %job.target_device, "Device offline, notification dropped");
    }
}

/// Fan a bulk job out to every listed device. Per-device misses do not stop
/// the iteration and are not surfaced beyond the delivered count.
pub fn process_bulk(dispatcher: &Dispatcher, job: &BulkJob) {
    let envelope = job.envelope();
    let mut delivered = 0usize;

    for device_id in &job.target_devices {
        if dispatcher.send_to_device(device_id, &envelope) {
            delivered += 1;
        }
    }

    tracing::info!(
        job_id = ?job.id,
        targets = job.target_devices.len(),
        delivered = delivered,
        "Bulk job processed"
    );
}
