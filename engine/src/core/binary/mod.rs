//! Binary Payload Adaptation
//!
//! Converts transport-encoded binaries (data URIs) to raw bytes and back,
//! negotiates square sizes against a provider's bucket set, and resamples
//! raster images to an exact target size.
//!
//! Resampling needs an image decode/encode capability, so it sits behind
//! the [`BinaryAdapter`] trait. [`RasterAdapter`] is the default
//! implementation backed by the `image` crate.

mod buckets;

pub use buckets::SizeBuckets;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;

use crate::core::{CoreError, CoreResult, Dimensions};

/// MIME type produced by [`RasterAdapter::resample`]
pub const RESAMPLED_MIME_TYPE: &str = "image/png";

/// Raw bytes plus the MIME type from the data-URI header
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedBinary {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl std::fmt::Debug for DecodedBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedBinary")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

// =============================================================================
// Data URI codec
// =============================================================================

/// Splits a `data:<mime>;base64,<payload>` URI and decodes the payload
pub fn decode_data_uri(data_uri: &str) -> CoreResult<DecodedBinary> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| CoreError::Decode("Missing data URI header".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| CoreError::Decode("Missing data URI payload separator".to_string()))?;

    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| CoreError::Decode("Data URI payload is not base64".to_string()))?;

    if mime_type.is_empty() {
        return Err(CoreError::Decode("Data URI has no MIME type".to_string()));
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::Decode(format!("Invalid base64 payload: {}", e)))?;

    Ok(DecodedBinary {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

/// Inverse of [`decode_data_uri`]
pub fn encode_data_uri(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, encode_base64(bytes))
}

/// Decodes a bare base64 string (provider payloads without a header)
pub fn decode_base64(payload: &str) -> CoreResult<Vec<u8>> {
    STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::Decode(format!("Invalid base64 payload: {}", e)))
}

/// Encodes bytes as bare base64
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

// =============================================================================
// Adapter capability
// =============================================================================

/// Binary adaptation capability used by the dispatcher and the pipeline
pub trait BinaryAdapter: Send + Sync {
    /// Decodes a data URI into bytes and MIME type
    fn decode(&self, data_uri: &str) -> CoreResult<DecodedBinary> {
        decode_data_uri(data_uri)
    }

    /// Encodes bytes into a self-contained data URI
    fn encode(&self, bytes: &[u8], mime_type: &str) -> String {
        encode_data_uri(bytes, mime_type)
    }

    /// Picks the square bucket for a requested size
    fn negotiate_size(&self, requested: Dimensions, buckets: &SizeBuckets) -> Dimensions {
        buckets.negotiate(requested)
    }

    /// Stretches an encoded image to exactly `target`, returning PNG bytes
    fn resample(&self, bytes: &[u8], target: Dimensions) -> CoreResult<Vec<u8>>;
}

/// [`BinaryAdapter`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterAdapter;

impl RasterAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl BinaryAdapter for RasterAdapter {
    fn resample(&self, bytes: &[u8], target: Dimensions) -> CoreResult<Vec<u8>> {
        if target.width == 0 || target.height == 0 {
            return Err(CoreError::InvalidRequest(format!(
                "Cannot resample to empty size {}",
                target
            )));
        }

        let source = image::load_from_memory(bytes)
            .map_err(|e| CoreError::Decode(format!("Undecodable image: {}", e)))?;

        let resized = source.resize_exact(target.width, target.height, FilterType::Triangle);

        // RGBA keeps mask transparency intact
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(resized.to_rgba8())
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| CoreError::Decode(format!("Failed to encode resampled image: {}", e)))?;

        Ok(out.into_inner())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn synthetic_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    // ========================================================================
    // Data URI Tests
    // ========================================================================

    #[test]
    fn test_encode_decode_roundtrip() {
        let samples: Vec<Vec<u8>> = vec![
            vec![0],
            vec![0xFF; 3],
            (0..=255u8).collect(),
            b"hello, world".to_vec(),
        ];

        for bytes in samples {
            let uri = encode_data_uri(&bytes, "video/mp4");
            let decoded = decode_data_uri(&uri).unwrap();
            assert_eq!(decoded.bytes, bytes);
            assert_eq!(decoded.mime_type, "video/mp4");
        }
    }

    #[test]
    fn test_encode_format() {
        assert_eq!(
            encode_data_uri(b"abc", "image/png"),
            "data:image/png;base64,YWJj"
        );
    }

    #[test]
    fn test_decode_rejects_missing_header() {
        let err = decode_data_uri("YWJj").unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));

        let err = decode_data_uri("data:image/png;base64").unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_non_base64() {
        let err = decode_data_uri("data:image/png;base64,@@not-base64@@").unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));

        let err = decode_data_uri("data:text/plain,hello").unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
    }

    // ========================================================================
    // Resample Tests
    // ========================================================================

    #[test]
    fn test_resample_landscape_to_square() {
        let adapter = RasterAdapter::new();
        let out = adapter
            .resample(&synthetic_png(300, 200), Dimensions::square(512))
            .unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (512, 512));
    }

    #[test]
    fn test_resample_portrait_to_square() {
        let adapter = RasterAdapter::new();
        let out = adapter
            .resample(&synthetic_png(200, 300), Dimensions::square(512))
            .unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (512, 512));
    }

    #[test]
    fn test_resample_negotiated_size() {
        let adapter = RasterAdapter::new();
        let buckets = SizeBuckets::new(vec![256, 512, 1024]).unwrap();
        let target = adapter.negotiate_size(Dimensions::new(300, 200), &buckets);
        assert_eq!(target, Dimensions::square(256));

        let out = adapter.resample(&synthetic_png(300, 200), target).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (256, 256));
    }

    #[test]
    fn test_resample_rejects_garbage() {
        let adapter = RasterAdapter::new();
        let err = adapter
            .resample(b"definitely not an image", Dimensions::square(256))
            .unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
    }
}
