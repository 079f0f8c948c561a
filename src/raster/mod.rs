//! Rasterisation: the backend contract and the per-kind adapters around it.
//!
//! Backends are opaque and slow. A diagram engine, a headless HTML renderer
//! or an SVG rasteriser may take hundreds of milliseconds to seconds, and may
//! be unavailable. The crate only ever sees them through [`Rasterizer`]:
//! `render(content) → base64 image + dimensions`, or a human-readable failure.
//!
//! [`adapter::RasterAdapter`] wraps one backend for one [`ContentKind`] and
//! puts the [`crate::cache::ImageCache`] in front of it.

pub mod adapter;
pub mod command;

pub use adapter::{AdapterOutput, AdapterSet, RasterAdapter};
pub use command::CommandRasterizer;

use crate::kind::ContentKind;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// What a backend hands back on success.
#[derive(Debug, Clone)]
pub struct BackendImage {
    /// Base64-encoded image bytes (PNG or JPEG).
    pub base64: String,
    /// Native width in pixels; 0 when the backend does not report it.
    pub width: u32,
    /// Native height in pixels; 0 when the backend does not report it.
    pub height: u32,
}

/// External rasterisation engine for one kind of content.
///
/// Implementations must be `Send + Sync`; the same backend instance serves
/// every render session in the process.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Convert `content` to an image, or explain why not.
    async fn render(&self, content: &str) -> Result<BackendImage, String>;
}

/// A decoded, validated raster image. This is the cache payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterImage {
    /// Raw image bytes.
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// Native width in pixels.
    pub width: u32,
    /// Native height in pixels.
    pub height: u32,
    /// MIME type detected from the bytes.
    pub mime: String,
}

impl RasterImage {
    /// Size of the payload in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Dimensions at which the image is displayed.
    ///
    /// Backends over-render for sharpness; the document shows the image at
    /// `scale` × native size (default one quarter), never below 1 px.
    pub fn display_size(&self, scale: f32) -> (u32, u32) {
        let w = ((self.width as f32) * scale).round().max(1.0) as u32;
        let h = ((self.height as f32) * scale).round().max(1.0) as u32;
        (w, h)
    }

    /// `data:` URI embedding the image.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// Placeholder descriptor for logs: `diagram (1.2 KiB)`.
pub(crate) fn describe(kind: ContentKind, content: &str) -> String {
    format!("{} ({} bytes)", kind, content.len())
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
