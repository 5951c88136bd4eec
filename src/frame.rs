use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::FrameError;

/// Still image formats a captured frame can be written as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StillFormat {
    /// Compressed upload format
    Jpeg,
    /// Lossless download format
    Png,
}

impl StillFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "image/jpeg",
            StillFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "jpg",
            StillFormat::Png => "png",
        }
    }
}

/// A single RGB24 camera frame
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Packed RGB pixels (shared between the estimator and the capture path)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl FrameData {
    pub fn new(id: u64, timestamp: SystemTime, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
        }
    }

    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Validate frame data size against the dimensions
    pub fn validate_size(&self) -> Result<(), FrameError> {
        if self.data.len() == self.expected_size() {
            Ok(())
        } else {
            Err(FrameError::SizeMismatch {
                id: self.id,
                expected: self.expected_size(),
                actual: self.data.len(),
            })
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Encode the frame as a still image. `quality` only applies to JPEG.
    pub fn encode(&self, format: StillFormat, quality: u8) -> Result<Vec<u8>, FrameError> {
        self.validate_size()?;

        let mut buf = Vec::new();
        let result = match format {
            StillFormat::Jpeg => {
                let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
                encoder.encode(&self.data, self.width, self.height, ColorType::Rgb8)
            }
            StillFormat::Png => PngEncoder::new(&mut buf).write_image(
                &self.data,
                self.width,
                self.height,
                ColorType::Rgb8,
            ),
        };
        result.map_err(|e| FrameError::Encoding {
            details: e.to_string(),
        })?;

        tracing::debug!(
            "Encoded frame {} as {:?} ({} bytes)",
            self.id,
            format,
            buf.len()
        );
        Ok(buf)
    }

    /// Encode as a `data:<mime>;base64,...` URI, the upload payload format
    pub fn to_data_uri(&self, format: StillFormat, quality: u8) -> Result<String, FrameError> {
        let bytes = self.encode(format, quality)?;
        Ok(format!(
            "data:{};base64,{}",
            format.mime_type(),
            BASE64_STANDARD.encode(bytes)
        ))
    }
}
