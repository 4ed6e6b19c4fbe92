use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_CAPTURE_WIDTH: u32 = 640;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
/// Matches the quality browsers use for `image/jpeg` canvas blobs.
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture stream has been stopped")]
    StreamStopped,
    #[error("invalid frame buffer: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("failed to load still image '{path}': {reason}")]
    StillImage { path: PathBuf, reason: String },
}

/// Packed 8-bit RGB frame as produced by a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(CaptureError::InvalidFrame {
                expected,
                actual: rgb.len(),
            });
        }
        Ok(Self { width, height, rgb })
    }

    fn into_image(self) -> Result<RgbImage, CaptureError> {
        let expected = self.width as usize * self.height as usize * 3;
        let actual = self.rgb.len();
        RgbImage::from_raw(self.width, self.height, self.rgb)
            .ok_or(CaptureError::InvalidFrame { expected, actual })
    }
}

#[async_trait]
pub trait MediaStream: Send + Sync {
    fn id(&self) -> &str;
    /// Native dimensions reported by the device, which may differ from the requested ones.
    fn dimensions(&self) -> (u32, u32);
    fn is_active(&self) -> bool;
    async fn grab_frame(&self) -> Result<RawFrame, CaptureError>;
    /// Stops every track of the stream. Calling it again is a no-op.
    fn stop_all_tracks(&self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open_stream(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, CaptureError>;
}

pub struct MissingMediaDevices;

#[async_trait]
impl MediaDevices for MissingMediaDevices {
    async fn open_stream(
        &self,
        _constraints: CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, CaptureError> {
        Err(CaptureError::Unavailable(
            "no capture device is configured".to_string(),
        ))
    }
}

/// Raster the current frame is drawn on before JPEG serialization.
pub struct OffscreenSurface {
    canvas: RgbImage,
}

impl OffscreenSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbImage::new(width, height),
        }
    }

    pub fn for_stream(stream: &dyn MediaStream) -> Self {
        let (width, height) = stream.dimensions();
        Self::new(width, height)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    /// Draws `frame` at the origin, scaling it when its size differs from the surface.
    pub fn draw(&mut self, frame: RawFrame) -> Result<(), CaptureError> {
        let (width, height) = self.canvas.dimensions();
        let image = frame.into_image()?;
        self.canvas = if image.dimensions() == (width, height) {
            image
        } else {
            image::imageops::resize(&image, width, height, FilterType::Triangle)
        };
        Ok(())
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, CaptureError> {
        let (width, height) = self.canvas.dimensions();
        if width == 0 || height == 0 {
            return Err(CaptureError::Encode(
                "surface has no pixels; stream not ready".to_string(),
            ));
        }
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&self.canvas)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        Ok(out)
    }
}

/// Grabs the current frame of `stream` and serializes it as a JPEG blob.
pub async fn capture_jpeg(stream: &dyn MediaStream) -> Result<Vec<u8>, CaptureError> {
    if !stream.is_active() {
        return Err(CaptureError::StreamStopped);
    }
    let frame = stream.grab_frame().await?;
    let mut surface = OffscreenSurface::for_stream(stream);
    surface.draw(frame)?;
    let jpeg = surface.to_jpeg(DEFAULT_JPEG_QUALITY)?;
    debug!(
        stream_id = stream.id(),
        bytes = jpeg.len(),
        "capture: encoded frame"
    );
    Ok(jpeg)
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Device whose stream always shows the same still image loaded from disk.
pub struct StillImageDevices {
    path: PathBuf,
}

impl StillImageDevices {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MediaDevices for StillImageDevices {
    async fn open_stream(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, CaptureError> {
        let still_error = |reason: String| CaptureError::StillImage {
            path: self.path.clone(),
            reason,
        };
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| still_error(e.to_string()))?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| still_error(e.to_string()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        let frame = RawFrame::new(width, height, image.into_raw())?;

        let id = format!("still-{}", NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed));
        info!(
            stream_id = %id,
            requested_width = constraints.width,
            requested_height = constraints.height,
            width,
            height,
            "capture: opened still image stream"
        );
        Ok(Arc::new(StillImageStream {
            id,
            frame,
            active: AtomicBool::new(true),
        }))
    }
}

struct StillImageStream {
    id: String,
    frame: RawFrame,
    active: AtomicBool,
}

#[async_trait]
impl MediaStream for StillImageStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.frame.width, self.frame.height)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn grab_frame(&self) -> Result<RawFrame, CaptureError> {
        if !self.is_active() {
            return Err(CaptureError::StreamStopped);
        }
        Ok(self.frame.clone())
    }

    fn stop_all_tracks(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!(stream_id = %self.id, "capture: stopped still image stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> RawFrame {
        let pixels = (0..width * height).flat_map(|_| rgb).collect();
        RawFrame::new(width, height, pixels).expect("valid frame")
    }

    #[test]
    fn raw_frame_rejects_short_buffers() {
        let err = RawFrame::new(2, 2, vec![0; 5]).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidFrame {
                expected: 12,
                actual: 5
            }
        ));
    }

    #[test]
    fn surface_scales_frame_to_its_own_size() {
        let mut surface = OffscreenSurface::new(8, 6);
        surface.draw(solid_frame(16, 12, [200, 10, 10])).expect("draw");
        assert_eq!(surface.dimensions(), (8, 6));

        let jpeg = surface.to_jpeg(DEFAULT_JPEG_QUALITY).expect("encode");
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn empty_surface_cannot_be_encoded() {
        let surface = OffscreenSurface::new(0, 0);
        assert!(matches!(
            surface.to_jpeg(DEFAULT_JPEG_QUALITY),
            Err(CaptureError::Encode(_))
        ));
    }

    #[tokio::test]
    async fn missing_devices_report_unavailable() {
        let err = MissingMediaDevices
            .open_stream(CaptureConstraints::default())
            .await
            .err()
            .expect("no device");
        assert!(matches!(err, CaptureError::Unavailable(_)));
    }

    #[tokio::test]
    async fn still_image_stream_captures_until_stopped() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("capture_still_{suffix}.png"));
        RgbImage::from_pixel(4, 3, image::Rgb([10, 120, 30]))
            .save(&path)
            .expect("write png");

        let devices = StillImageDevices::new(&path);
        let stream = devices
            .open_stream(CaptureConstraints::default())
            .await
            .expect("open");
        assert_eq!(stream.dimensions(), (4, 3));

        let jpeg = capture_jpeg(stream.as_ref()).await.expect("capture");
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        stream.stop_all_tracks();
        stream.stop_all_tracks();
        assert!(!stream.is_active());
        assert!(matches!(
            capture_jpeg(stream.as_ref()).await,
            Err(CaptureError::StreamStopped)
        ));

        std::fs::remove_file(path).expect("cleanup");
    }

    #[tokio::test]
    async fn still_image_devices_fail_on_missing_file() {
        let devices = StillImageDevices::new("/definitely/not/here.png");
        let err = devices
            .open_stream(CaptureConstraints::default())
            .await
            .err()
            .expect("missing file");
        assert!(matches!(err, CaptureError::StillImage { .. }));
    }
}
