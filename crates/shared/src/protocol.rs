//! Wire format of the pose-analysis backend and validation into domain types.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{AnalysisResult, FrameResult, WebcamResult},
    error::{AnalysisError, PayloadError},
};

pub const ANALYZE_POSE_PATH: &str = "/analyze-pose";
pub const ANALYZE_WEBCAM_FRAME_PATH: &str = "/analyze-webcam-frame";
pub const HEALTH_PATH: &str = "/";

pub const VIDEO_FIELD: &str = "video";
pub const EXPECTED_POSE_FIELD: &str = "expected_pose";
pub const FRAME_FIELD: &str = "frame";
pub const WEBCAM_FRAME_FILE_NAME: &str = "webcam-capture.jpg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResultPayload {
    pub frame_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub pose_detected: String,
    pub confidence: f64,
    pub is_correct: bool,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub accuracy_percentage: f64,
    pub average_confidence: f64,
    pub total_frames_analyzed: u32,
    pub correct_frames: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incorrect_frames: Option<u32>,
    pub overall_feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_results: Option<Vec<FrameResultPayload>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebcamFrameResponse {
    pub is_correct: bool,
    pub confidence: f64,
    pub pose_class: String,
    pub feedback: String,
}

/// Body of FastAPI style error responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Extracts `detail` from an error body, falling back to the raw text.
pub fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|err| err.detail)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<f64, PayloadError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(PayloadError::ConfidenceOutOfRange { field, value })
    }
}

impl TryFrom<FrameResultPayload> for FrameResult {
    type Error = PayloadError;

    fn try_from(value: FrameResultPayload) -> Result<Self, Self::Error> {
        Ok(Self {
            frame_number: value.frame_number,
            image: value.image.filter(|image| !image.is_empty()),
            pose_detected: value.pose_detected,
            confidence: check_unit_interval("frame_results[].confidence", value.confidence)?,
            is_correct: value.is_correct,
            feedback: value.feedback,
        })
    }
}

impl TryFrom<AnalysisResponse> for AnalysisResult {
    type Error = PayloadError;

    fn try_from(value: AnalysisResponse) -> Result<Self, Self::Error> {
        let accuracy = value.accuracy_percentage;
        if !accuracy.is_finite() || !(0.0..=100.0).contains(&accuracy) {
            return Err(PayloadError::AccuracyOutOfRange(accuracy));
        }
        let average_confidence =
            check_unit_interval("average_confidence", value.average_confidence)?;

        let total = value.total_frames_analyzed;
        let correct = value.correct_frames;
        if correct > total {
            return Err(PayloadError::CorrectExceedsTotal { correct, total });
        }
        if let Some(incorrect) = value.incorrect_frames {
            if incorrect != total - correct {
                return Err(PayloadError::IncorrectFramesMismatch {
                    incorrect,
                    expected: total - correct,
                });
            }
        }

        let frame_results = match value.frame_results {
            Some(frames) => {
                if frames.len() != total as usize {
                    return Err(PayloadError::FrameCountMismatch {
                        expected: total,
                        actual: frames.len(),
                    });
                }
                frames
                    .into_iter()
                    .map(FrameResult::try_from)
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => Vec::new(),
        };

        Ok(Self {
            accuracy_percentage: accuracy,
            average_confidence,
            total_frames_analyzed: total,
            correct_frames: correct,
            overall_feedback: value.overall_feedback,
            expected_pose: value.expected_pose,
            video_name: value.video_name,
            frame_results,
        })
    }
}

impl TryFrom<WebcamFrameResponse> for WebcamResult {
    type Error = PayloadError;

    fn try_from(value: WebcamFrameResponse) -> Result<Self, Self::Error> {
        Ok(Self {
            is_correct: value.is_correct,
            confidence: check_unit_interval("confidence", value.confidence)?,
            pose_class: value.pose_class,
            feedback: value.feedback,
        })
    }
}

pub fn decode_analysis_result(body: &[u8]) -> Result<AnalysisResult, AnalysisError> {
    let response: AnalysisResponse = serde_json::from_slice(body)
        .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;
    Ok(AnalysisResult::try_from(response)?)
}

pub fn decode_webcam_result(body: &[u8]) -> Result<WebcamResult, AnalysisError> {
    let response: WebcamFrameResponse = serde_json::from_slice(body)
        .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;
    Ok(WebcamResult::try_from(response)?)
}
