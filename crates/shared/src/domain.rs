use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{FrameImageError, ValidationError};

/// Pose classes the backend model is trained on.
pub const ASANAS: [&str; 10] = [
    "Anantasana",
    "Ardhakati Chakrasana",
    "Bhujangasana",
    "Kati Chakrasana",
    "Marjariasana",
    "Parvatasana",
    "Sarvangasana",
    "Tadasana",
    "Vajrasana",
    "Viparita Karani",
];

pub fn is_known_asana(name: &str) -> bool {
    ASANAS.iter().any(|asana| asana.eq_ignore_ascii_case(name.trim()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl VideoFile {
    /// Builds a video input, guessing the MIME type from `name` when none is given.
    pub fn new(
        name: impl Into<String>,
        bytes: Vec<u8>,
        mime_type: Option<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let mime_type = mime_type
            .map(|mime| mime.trim().to_ascii_lowercase())
            .filter(|mime| !mime.is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&name)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });

        if !mime_type.starts_with("video/") {
            return Err(ValidationError::NotAVideo { name, mime_type });
        }

        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    File,
    WebcamFrame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(VideoFile),
    WebcamFrame { blob: Vec<u8> },
}

impl InputSource {
    pub fn kind(&self) -> InputKind {
        match self {
            Self::File(_) => InputKind::File,
            Self::WebcamFrame { .. } => InputKind::WebcamFrame,
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Self::File(file) => file.bytes.len(),
            Self::WebcamFrame { blob } => blob.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequestContext {
    expected_pose: String,
}

impl AnalysisRequestContext {
    pub fn new(expected_pose: &str) -> Result<Self, ValidationError> {
        let expected_pose = expected_pose.trim();
        if expected_pose.is_empty() {
            return Err(ValidationError::MissingExpectedPose);
        }
        Ok(Self {
            expected_pose: expected_pose.to_string(),
        })
    }

    pub fn expected_pose(&self) -> &str {
        &self.expected_pose
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub frame_number: u32,
    pub image: Option<String>,
    pub pose_detected: String,
    pub confidence: f64,
    pub is_correct: bool,
    pub feedback: String,
}

impl FrameResult {
    /// 1-based label shown to the user.
    pub fn label(&self) -> String {
        format!("Frame {}", u64::from(self.frame_number) + 1)
    }

    pub fn decode_image(&self) -> Option<Result<FrameImage, FrameImageError>> {
        self.image.as_deref().map(FrameImage::from_data_uri)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub accuracy_percentage: f64,
    pub average_confidence: f64,
    pub total_frames_analyzed: u32,
    pub correct_frames: u32,
    pub overall_feedback: String,
    pub expected_pose: Option<String>,
    pub video_name: Option<String>,
    pub frame_results: Vec<FrameResult>,
}

impl AnalysisResult {
    pub fn status_band(&self) -> StatusBand {
        StatusBand::from_accuracy(self.accuracy_percentage)
    }

    pub fn incorrect_frames(&self) -> u32 {
        self.total_frames_analyzed - self.correct_frames
    }

    /// Overall feedback, prefixed with the expected asana when the backend echoes one.
    pub fn feedback_text(&self) -> String {
        match self.expected_pose.as_deref().filter(|pose| !pose.is_empty()) {
            Some(pose) => format!("Expected Asana: {pose}\n\n{}", self.overall_feedback),
            None => self.overall_feedback.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebcamResult {
    pub is_correct: bool,
    pub confidence: f64,
    pub pose_class: String,
    pub feedback: String,
}

impl WebcamResult {
    pub fn accuracy_percentage(&self) -> f64 {
        if self.is_correct {
            100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBand {
    Excellent,
    Good,
    NeedsImprovement,
}

impl StatusBand {
    pub const EXCELLENT_THRESHOLD: f64 = 90.0;
    pub const GOOD_THRESHOLD: f64 = 70.0;

    pub fn from_accuracy(accuracy_percentage: f64) -> Self {
        if accuracy_percentage >= Self::EXCELLENT_THRESHOLD {
            Self::Excellent
        } else if accuracy_percentage >= Self::GOOD_THRESHOLD {
            Self::Good
        } else {
            Self::NeedsImprovement
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::NeedsImprovement => "Needs Improvement",
        }
    }
}

impl fmt::Display for StatusBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Decoded `data:<mime>;base64,<payload>` frame image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FrameImage {
    pub fn from_data_uri(uri: &str) -> Result<Self, FrameImageError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or(FrameImageError::NotDataUri)?;
        let (header, payload) = rest.split_once(',').ok_or(FrameImageError::NotDataUri)?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or(FrameImageError::NotBase64)?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| FrameImageError::Decode(e.to_string()))?;

        Ok(Self {
            mime_type: if mime_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                mime_type.to_ascii_lowercase()
            },
            bytes,
        })
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            other => mime_guess::get_mime_extensions_str(other)
                .and_then(|exts| exts.first().copied())
                .unwrap_or("bin"),
        }
    }
}
