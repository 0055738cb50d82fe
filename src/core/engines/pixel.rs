//! Pixel Engine
//!
//! In-process picture pipeline: decode → optional bounded resize → quality
//! re-encode, with no external binary involved. The trade-off against the
//! process-backed engines is capability: pictures only.
//!
//! Because the work happens inside library calls in this process, it can
//! never be force-terminated; the cancellation token is polled between
//! pipeline stages and a stage that already started runs to completion.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Engine, EngineError, EngineId, EngineResult};
use crate::core::jobs::{Job, JobKind};
use crate::core::params::{CompressPictureParams, JobParams};

/// In-process picture conversion engine
pub struct PixelEngine;

impl PixelEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PixelEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for PixelEngine {
    fn id(&self) -> EngineId {
        EngineId::Pixel
    }

    fn supports(&self, kind: JobKind) -> bool {
        kind == JobKind::CompressPicture
    }

    async fn run(
        &self,
        job: &Job,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let JobParams::CompressPicture(params) = &job.params else {
            return Err(EngineError::NotSupported(job.kind));
        };
        let params = params.clone();

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let _ = progress.send(0).await;

        // Decode stage
        let input = job.input.clone();
        let decoded = tokio::task::spawn_blocking(move || image::open(&input))
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let _ = progress.send(40).await;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Resize stage, bounded to the configured maximum
        let resized = match (params.max_width, params.max_height) {
            (Some(max_w), Some(max_h))
                if decoded.width() > max_w || decoded.height() > max_h =>
            {
                tokio::task::spawn_blocking(move || {
                    decoded.resize(max_w, max_h, FilterType::Lanczos3)
                })
                .await
                .map_err(|e| EngineError::Encode(e.to_string()))?
            }
            _ => decoded,
        };
        let _ = progress.send(80).await;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Encode stage
        let output = job.output.clone();
        let quality = params.quality;
        tokio::task::spawn_blocking(move || encode(&resized, &output, quality))
            .await
            .map_err(|e| EngineError::Encode(e.to_string()))??;

        let _ = progress.send(100).await;
        Ok(())
    }
}

/// Writes the image to `output`, honoring the quality setting for JPEG and
/// falling back to the format implied by the extension otherwise.
fn encode(image: &DynamicImage, output: &Path, quality: u8) -> EngineResult<()> {
    let extension = output
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let file = File::create(output)?;
            let writer = BufWriter::new(file);
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality);
            // JPEG has no alpha channel; flatten before encoding.
            image
                .to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|e| EngineError::Encode(e.to_string()))
        }
        _ => image
            .save(output)
            .map_err(|e| EngineError::Encode(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::JobRequest;
    use image::{Rgba, RgbaImage};
    use std::path::PathBuf;

    fn write_test_image(path: &Path, width: u32, height: u32) {
        let mut img = RgbaImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = Rgba([200, 100, 50, 255]);
        }
        img.save(path).unwrap();
    }

    fn picture_job(input: PathBuf, output: PathBuf, params: CompressPictureParams) -> Job {
        Job::from_request(JobRequest {
            kind: JobKind::CompressPicture,
            input,
            output,
            params: JobParams::CompressPicture(params),
        })
    }

    #[test]
    fn test_supports_pictures_only() {
        let engine = PixelEngine::new();
        assert!(engine.supports(JobKind::CompressPicture));
        assert!(!engine.supports(JobKind::Transcode));
        assert!(!engine.supports(JobKind::Upscale));
    }

    #[tokio::test]
    async fn test_compress_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.jpg");
        write_test_image(&input, 64, 64);

        let engine = PixelEngine::new();
        let (tx, mut rx) = mpsc::channel(32);
        let job = picture_job(
            input,
            output.clone(),
            CompressPictureParams {
                quality: 70,
                max_width: None,
                max_height: None,
            },
        );

        engine
            .run(&job, tx, CancellationToken::new())
            .await
            .unwrap();

        assert!(output.is_file());
        let reloaded = image::open(&output).unwrap();
        assert_eq!(reloaded.width(), 64);

        let mut seen = Vec::new();
        while let Some(percent) = rx.recv().await {
            seen.push(percent);
        }
        assert_eq!(seen, vec![0, 40, 80, 100]);
    }

    #[tokio::test]
    async fn test_resize_respects_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        write_test_image(&input, 200, 100);

        let engine = PixelEngine::new();
        let (tx, _rx) = mpsc::channel(32);
        let job = picture_job(
            input,
            output.clone(),
            CompressPictureParams {
                quality: 90,
                max_width: Some(100),
                max_height: Some(100),
            },
        );

        engine
            .run(&job, tx, CancellationToken::new())
            .await
            .unwrap();

        let reloaded = image::open(&output).unwrap();
        // Aspect ratio preserved within the 100x100 bound.
        assert_eq!(reloaded.width(), 100);
        assert_eq!(reloaded.height(), 50);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.jpg");
        write_test_image(&input, 8, 8);

        let engine = PixelEngine::new();
        let (tx, _rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let job = picture_job(
            input,
            output.clone(),
            CompressPictureParams {
                quality: 70,
                max_width: None,
                max_height: None,
            },
        );
        let result = engine.run(&job, tx, cancel).await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_decode_error_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"not an image").unwrap();

        let engine = PixelEngine::new();
        let (tx, _rx) = mpsc::channel(32);
        let job = picture_job(
            input,
            dir.path().join("out.jpg"),
            CompressPictureParams {
                quality: 70,
                max_width: None,
                max_height: None,
            },
        );
        let result = engine.run(&job, tx, CancellationToken::new()).await;

        assert!(matches!(result, Err(EngineError::Decode(_))));
    }
}
