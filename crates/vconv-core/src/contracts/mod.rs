//! Wire contracts for the external HTTP surface.
//!
//! The upload/download surface itself lives outside this workspace; these
//! DTOs are the agreed shapes it exchanges with clients and with the core.

use serde::{Deserialize, Serialize};

use crate::domain::{ConversionOptions, Job};

/// Uniform response wrapper for every job API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine-readable error kind on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error_type: None,
        }
    }

    /// Failed response with a message and error kind.
    #[must_use]
    pub fn error(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            error_type: Some(error_type.into()),
        }
    }
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartConversionRequest {
    /// Human label; the input file name is used when absent.
    pub task_name: Option<String>,
    /// Preset selector; the default preset is used when absent.
    pub preset: Option<String>,
    /// Per-job overrides applied on top of the preset.
    #[serde(flatten)]
    pub options: ConversionOptions,
}

/// Response payload of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversionResponse {
    pub task_id: String,
    pub task_name: String,
    pub message: String,
    /// Projected encode duration in seconds, when the probe already ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<f64>,
}

/// Group membership request sent by a notification subscriber.
///
/// Heartbeats are plain `"ping"`/`"pong"` strings and need no DTO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GroupRequest {
    /// Join a named group (usually a job id).
    #[serde(rename_all = "camelCase")]
    JoinGroup { group_name: String },
    /// Leave exactly one named group.
    #[serde(rename_all = "camelCase")]
    LeaveGroup { group_name: String },
}

/// Job representation on the wire (`GET /jobs/{id}`).
///
/// Statuses are integers in wire order (`Pending=0 .. Cancelled=4`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDto {
    pub id: String,
    pub name: String,
    pub preset_name: String,
    pub status: u8,
    pub progress: u8,
    pub input_bytes: u64,
    pub output_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Job> for JobDto {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            preset_name: job.preset_name.clone(),
            status: job.status.wire_code(),
            progress: job.progress,
            input_bytes: job.input_bytes,
            output_bytes: job.output_bytes,
            duration_sec: job.duration_sec,
            current_sec: job.current_sec,
            speed: job.speed,
            eta_sec: job.eta_sec,
            error: job.error.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobStatus, NewJob};

    #[test]
    fn request_accepts_flattened_options() {
        let json = r#"{
            "taskName": "holiday",
            "preset": "Fast 1080p30",
            "videoCodec": "h264_nvenc",
            "fastStart": true
        }"#;
        let req: StartConversionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.task_name.as_deref(), Some("holiday"));
        assert_eq!(req.preset.as_deref(), Some("Fast 1080p30"));
        assert_eq!(req.options.video_codec.as_deref(), Some("h264_nvenc"));
    }

    #[test]
    fn job_dto_uses_integer_status() {
        let mut job = Job::new(NewJob {
            name: "clip".into(),
            input_path: "/in".into(),
            output_path: "/out".into(),
            input_bytes: 1,
            preset_name: "Fast 1080p30".into(),
            overrides: ConversionOptions::default(),
        });
        job.status = JobStatus::Converting;
        let dto = JobDto::from(&job);
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["status"], 1);
        assert_eq!(json["presetName"], "Fast 1080p30");
    }

    #[test]
    fn group_requests_follow_the_wire_tag() {
        let req: GroupRequest =
            serde_json::from_str(r#"{"type":"joinGroup","groupName":"job-42"}"#).unwrap();
        assert_eq!(
            req,
            GroupRequest::JoinGroup {
                group_name: "job-42".into()
            }
        );
        let json = serde_json::to_value(&GroupRequest::LeaveGroup {
            group_name: "job-42".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "leaveGroup");
        assert_eq!(json["groupName"], "job-42");
    }

    #[test]
    fn api_response_skips_absent_fields() {
        let resp = ApiResponse::ok(1u32);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("errorType").is_none());

        let resp: ApiResponse<()> = ApiResponse::error("quota exceeded", "QuotaError");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["errorType"], "QuotaError");
    }
}
