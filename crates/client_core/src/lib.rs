use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use shared::{
    domain::{AnalysisRequestContext, AnalysisResult, VideoFile, WebcamResult},
    error::{AnalysisError, ValidationError},
    protocol::{
        decode_analysis_result, decode_webcam_result, ANALYZE_POSE_PATH,
        ANALYZE_WEBCAM_FRAME_PATH, EXPECTED_POSE_FIELD, FRAME_FIELD, HEALTH_PATH, VIDEO_FIELD,
        WEBCAM_FRAME_FILE_NAME,
    },
};
use tracing::{info, warn};

pub mod config;
pub mod controller;
pub mod session;
pub mod view;

pub use config::Settings;
pub use controller::{
    ControllerOptions, NoticeContext, SessionCommand, SessionController, SessionEvent, UserNotice,
};
pub use session::{ActiveResult, Mode, SessionState, Tab};
pub use view::ResultsView;

/// The external pose-analysis service.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Succeeds on any 2xx answer from the liveness endpoint.
    async fn health_check(&self) -> Result<(), AnalysisError>;
    async fn analyze_video(
        &self,
        file: &VideoFile,
        context: &AnalysisRequestContext,
    ) -> Result<AnalysisResult, AnalysisError>;
    async fn analyze_webcam_frame(&self, jpeg: &[u8]) -> Result<WebcamResult, AnalysisError>;
}

pub struct HttpAnalysisBackend {
    http: Client,
    base_url: String,
}

impl HttpAnalysisBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, AnalysisError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(network_error)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AnalysisError> {
        Self::with_timeout(settings.api_url.clone(), settings.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

fn network_error(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::Network(format!("request timed out: {err}"))
    } else {
        AnalysisError::Network(err.to_string())
    }
}

/// Turns non-2xx answers into `Server` errors carrying the body text.
async fn success_body(response: Response) -> Result<Vec<u8>, AnalysisError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "analysis backend returned an error");
        return Err(AnalysisError::Server {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await.map_err(network_error)?;
    Ok(bytes.to_vec())
}

#[async_trait]
impl AnalysisBackend for HttpAnalysisBackend {
    async fn health_check(&self) -> Result<(), AnalysisError> {
        let response = self
            .http
            .get(self.endpoint(HEALTH_PATH))
            .send()
            .await
            .map_err(network_error)?;
        success_body(response).await?;
        Ok(())
    }

    async fn analyze_video(
        &self,
        file: &VideoFile,
        context: &AnalysisRequestContext,
    ) -> Result<AnalysisResult, AnalysisError> {
        let video = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|_| ValidationError::NotAVideo {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
            })?;
        let form = Form::new()
            .part(VIDEO_FIELD, video)
            .text(EXPECTED_POSE_FIELD, context.expected_pose().to_string());

        let url = self.endpoint(ANALYZE_POSE_PATH);
        info!(
            url = %url,
            video = %file.name,
            bytes = file.bytes.len(),
            expected_pose = context.expected_pose(),
            "sending video for analysis"
        );
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;
        info!(status = response.status().as_u16(), "analysis response received");

        let body = success_body(response).await?;
        decode_analysis_result(&body)
    }

    async fn analyze_webcam_frame(&self, jpeg: &[u8]) -> Result<WebcamResult, AnalysisError> {
        let frame = Part::bytes(jpeg.to_vec())
            .file_name(WEBCAM_FRAME_FILE_NAME)
            .mime_str("image/jpeg")
            .map_err(network_error)?;
        let form = Form::new().part(FRAME_FIELD, frame);

        let response = self
            .http
            .post(self.endpoint(ANALYZE_WEBCAM_FRAME_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        let body = success_body(response).await?;
        decode_webcam_result(&body)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
