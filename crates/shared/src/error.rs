use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Network,
    Server,
    MediaAccess,
    MalformedResponse,
    Busy,
}

/// Input problems detected before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a video file first")]
    MissingFile,
    #[error("Please select the asana from the dropdown before uploading your video.")]
    MissingExpectedPose,
    #[error("'{name}' is not a video file (detected {mime_type})")]
    NotAVideo { name: String, mime_type: String },
}

/// A backend payload that parsed as JSON but breaks the result invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("{field} must be within [0, 1], got {value}")]
    ConfidenceOutOfRange { field: &'static str, value: f64 },
    #[error("accuracy_percentage must be within [0, 100], got {0}")]
    AccuracyOutOfRange(f64),
    #[error("correct_frames ({correct}) exceeds total_frames_analyzed ({total})")]
    CorrectExceedsTotal { correct: u32, total: u32 },
    #[error("frame_results has {actual} entries but total_frames_analyzed is {expected}")]
    FrameCountMismatch { expected: u32, actual: usize },
    #[error("incorrect_frames ({incorrect}) does not match total - correct ({expected})")]
    IncorrectFramesMismatch { incorrect: u32, expected: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameImageError {
    #[error("frame image is not a data URI")]
    NotDataUri,
    #[error("frame image data URI is not base64 encoded")]
    NotBase64,
    #[error("invalid base64 frame payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error! status: {status} - {body}")]
    Server { status: u16, body: String },
    #[error("{0}")]
    MediaAccess(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("an analysis request is already in flight")]
    Busy,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Network(_) => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::MediaAccess(_) => ErrorKind::MediaAccess,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::Busy => ErrorKind::Busy,
        }
    }
}

impl From<PayloadError> for AnalysisError {
    fn from(value: PayloadError) -> Self {
        Self::MalformedResponse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_message_carries_status_and_body() {
        let err = AnalysisError::Server {
            status: 500,
            body: "{\"detail\":\"Error processing video: boom\"}".into(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP error! status: 500 - {\"detail\":\"Error processing video: boom\"}"
        );
        assert_eq!(err.kind(), ErrorKind::Server);
    }

    #[test]
    fn validation_errors_keep_user_facing_wording() {
        let err = AnalysisError::from(ValidationError::MissingFile);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Please select a video file first");
    }

    #[test]
    fn payload_errors_become_malformed_responses() {
        let err = AnalysisError::from(PayloadError::CorrectExceedsTotal {
            correct: 4,
            total: 3,
        });
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert!(err.to_string().contains("correct_frames (4)"));
    }
}
