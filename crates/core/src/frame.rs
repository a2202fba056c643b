//! Frame source: pulls one representative still out of a plate video.
//!
//! The decoding itself is delegated to the `ffprobe`/`ffmpeg` binaries; the
//! frame is piped back as PNG and decoded with [`image`]. Single still images
//! (uploaded frames, fixtures) go through [`StillImageFrameSource`].

use std::path::Path;

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;

/// Default relative position of the representative frame (middle of the video).
pub const DEFAULT_FRAME_POSITION: f64 = 0.5;

/// Seek positions are clamped into this range to avoid black lead-in/out frames.
const MIN_POSITION: f64 = 0.05;
const MAX_POSITION: f64 = 0.95;

/// Seek target used when the container does not report a duration.
const FALLBACK_SEEK_SECS: f64 = 1.0;

/// Error type for frame extraction.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),

    #[error("media not found: {0}")]
    MediaNotFound(String),

    #[error("decoded frame is empty")]
    EmptyFrame,
}

/// Source of decoded raster frames for a media reference.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Decode the frame at `position` (0.0..=1.0 of the media duration).
    async fn extract(&self, media_ref: &str, position: f64) -> Result<RgbImage, FrameError>;
}

/// Clamp a requested frame position into the usable range.
pub fn clamp_position(position: f64) -> f64 {
    if position.is_nan() {
        return DEFAULT_FRAME_POSITION;
    }
    position.clamp(MIN_POSITION, MAX_POSITION)
}

/// Seek offset in seconds for a relative position, given the probed duration.
pub fn seek_offset_secs(duration_secs: Option<f64>, position: f64) -> f64 {
    match duration_secs {
        Some(d) if d.is_finite() && d > 0.0 => d * clamp_position(position),
        _ => FALLBACK_SEEK_SECS,
    }
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// The subset of `ffprobe -show_format -show_streams` output we rely on.
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

/// Parse the media duration in seconds, preferring the container value.
pub fn parse_duration(probe: &FfprobeOutput) -> Option<f64> {
    let from_format = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok());
    if from_format.is_some() {
        return from_format;
    }
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
}

// ---------------------------------------------------------------------------
// ffmpeg-backed source
// ---------------------------------------------------------------------------

/// Extracts frames from video files or URLs with the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl Default for FfmpegFrameSource {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl FfmpegFrameSource {
    /// Use explicit binary paths instead of relying on `$PATH`.
    pub fn with_binaries(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    async fn probe(&self, media_ref: &str) -> Result<FfprobeOutput, FrameError> {
        let output = tokio::process::Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(media_ref)
            .output()
            .await
            .map_err(FrameError::NotFound)?;

        if !output.status.success() {
            return Err(FrameError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<FfprobeOutput>(&stdout)
            .map_err(|e| FrameError::ParseError(format!("{e}: {stdout}")))
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn extract(&self, media_ref: &str, position: f64) -> Result<RgbImage, FrameError> {
        let is_remote = media_ref.starts_with("http://") || media_ref.starts_with("https://");
        if !is_remote && !Path::new(media_ref).exists() {
            return Err(FrameError::MediaNotFound(media_ref.to_string()));
        }

        let probe = self.probe(media_ref).await?;
        let offset = seek_offset_secs(parse_duration(&probe), position);

        let output = tokio::process::Command::new(&self.ffmpeg_bin)
            .args(["-v", "error", "-ss", &format!("{offset:.3}"), "-i"])
            .arg(media_ref)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .output()
            .await
            .map_err(FrameError::NotFound)?;

        if !output.status.success() {
            return Err(FrameError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(FrameError::EmptyFrame);
        }

        let frame = image::load_from_memory(&output.stdout)?.to_rgb8();
        tracing::debug!(
            media_ref,
            offset_secs = offset,
            width = frame.width(),
            height = frame.height(),
            "Frame extracted",
        );
        ensure_non_empty(frame)
    }
}

// ---------------------------------------------------------------------------
// Still-image source
// ---------------------------------------------------------------------------

/// Treats the media reference as a still image path; `position` is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct StillImageFrameSource;

#[async_trait]
impl FrameSource for StillImageFrameSource {
    async fn extract(&self, media_ref: &str, _position: f64) -> Result<RgbImage, FrameError> {
        let path = Path::new(media_ref);
        if !path.exists() {
            return Err(FrameError::MediaNotFound(media_ref.to_string()));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FrameError::MediaNotFound(format!("{media_ref}: {e}")))?;
        let frame = image::load_from_memory(&bytes)?.to_rgb8();
        ensure_non_empty(frame)
    }
}

fn ensure_non_empty(frame: RgbImage) -> Result<RgbImage, FrameError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(FrameError::EmptyFrame);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_clamped_away_from_the_ends() {
        assert!((clamp_position(0.0) - 0.05).abs() < f64::EPSILON);
        assert!((clamp_position(1.0) - 0.95).abs() < f64::EPSILON);
        assert!((clamp_position(0.5) - 0.5).abs() < f64::EPSILON);
        assert!((clamp_position(f64::NAN) - DEFAULT_FRAME_POSITION).abs() < f64::EPSILON);
    }

    #[test]
    fn seek_offset_scales_with_duration() {
        assert!((seek_offset_secs(Some(20.0), 0.5) - 10.0).abs() < 1e-9);
        assert!((seek_offset_secs(None, 0.5) - FALLBACK_SEEK_SECS).abs() < 1e-9);
        assert!((seek_offset_secs(Some(f64::INFINITY), 0.5) - FALLBACK_SEEK_SECS).abs() < 1e-9);
    }

    #[test]
    fn duration_prefers_format_then_video_stream() {
        let json = r#"{
            "streams": [{"codec_type": "audio", "duration": "99.0"},
                        {"codec_type": "video", "duration": "12.5"}],
            "format": {}
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parse_duration(&probe), Some(12.5));

        let json = r#"{"streams": [], "format": {"duration": "30.25"}}"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parse_duration(&probe), Some(30.25));
    }

    #[tokio::test]
    async fn still_image_source_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        RgbImage::from_pixel(32, 24, image::Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();

        let frame = StillImageFrameSource
            .extract(path.to_str().unwrap(), 0.5)
            .await
            .unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
    }

    #[tokio::test]
    async fn still_image_source_reports_missing_media() {
        let err = StillImageFrameSource
            .extract("/definitely/not/here.png", 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::MediaNotFound(_)));
    }
}
