use std::io::Cursor;
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat as CodecFormat, ImageReader, Rgb, RgbImage};
use mealsnap_contracts::cache::ContentCache;
use mealsnap_contracts::config::{DerivativeConfig, DerivativeSpec, Fit, PipelineConfig};
use mealsnap_contracts::images::{
    ContentHash, DerivativeKind, DerivativeSizes, DerivedImageSet, ImageFormat, ImageMetadata,
    ProcessedImage, RawImage,
};
use serde_json::{json, Value};

use crate::error::EngineError;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;
const DENOISE_SIGMA: f32 = 0.5;
/// Share of pixels ignored at each end of a channel histogram when stretching.
const NORMALIZE_CLIP: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct DerivationReport {
    pub hash: ContentHash,
    pub images: Arc<DerivedImageSet>,
    /// Only read on a cache miss; a hit never touches the codec.
    pub metadata: Option<ImageMetadata>,
    pub cache_hit: bool,
    pub declared_mime_mismatch: bool,
    pub elapsed: Duration,
}

impl DerivationReport {
    pub fn sizes(&self) -> DerivativeSizes {
        self.images.sizes()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "content_hash": self.hash.as_str(),
            "cache_hit": self.cache_hit,
            "declared_mime_mismatch": self.declared_mime_mismatch,
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "metadata": self.metadata,
            "sizes": self.sizes(),
            "derivatives": self.images.summary(),
        })
    }
}

/// Rejects empty and oversized uploads. Runs before any decoding.
pub fn validate_size(bytes: &[u8], max_bytes: usize) -> Result<(), EngineError> {
    if bytes.is_empty() {
        return Err(EngineError::InvalidImage("upload is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(EngineError::FileTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    Ok(())
}

/// Sniffs the container from magic bytes and checks it against `allowed`.
pub fn validate_format(bytes: &[u8], allowed: &[ImageFormat]) -> Result<ImageFormat, EngineError> {
    let Some(format) = ImageFormat::sniff(bytes) else {
        return Err(EngineError::UnsupportedFormat(
            "file signature does not match any known image format".to_string(),
        ));
    };
    if !allowed.contains(&format) {
        return Err(EngineError::UnsupportedFormat(format!(
            "{format} uploads are not accepted"
        )));
    }
    Ok(format)
}

/// Reads dimensions and pixel layout from the image header.
pub fn extract_metadata(bytes: &[u8]) -> Result<ImageMetadata, EngineError> {
    let format = ImageFormat::sniff(bytes).ok_or_else(|| {
        EngineError::UnsupportedFormat("file signature does not match any known image format".to_string())
    })?;
    let codec = codec_format(format)?;
    let decoder = ImageReader::with_format(Cursor::new(bytes), codec)
        .into_decoder()
        .map_err(|err| EngineError::InvalidImage(format!("unreadable {format} header: {err}")))?;
    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidImage(format!(
            "image has zero dimension ({width}x{height})"
        )));
    }
    let color = decoder.color_type();
    Ok(ImageMetadata {
        format,
        width,
        height,
        channels: color.channel_count(),
        has_alpha: color.has_alpha(),
        is_animated: is_animated(format, bytes),
        size: bytes.len(),
    })
}

/// Validates `image` and returns its three derivatives, from `cache` when possible.
///
/// Identical bytes always produce byte-identical derivatives, so a cache hit
/// and a fresh derivation are interchangeable. The cache only ever sees a
/// complete set.
pub fn derive_all(
    image: &RawImage,
    config: &PipelineConfig,
    cache: &dyn ContentCache,
) -> Result<DerivationReport, EngineError> {
    let started = Instant::now();
    let bytes = image.bytes();
    validate_size(bytes, config.intake.max_upload_bytes)?;
    let format = validate_format(bytes, &config.intake.allowed_formats)?;
    let declared_mime_mismatch = image
        .declared_mime()
        .map(|mime| ImageFormat::from_mime(mime) != Some(format))
        .unwrap_or(false);
    let hash = ContentHash::of(bytes);

    if let Some(images) = cache.get(&hash) {
        return Ok(DerivationReport {
            hash,
            images,
            metadata: None,
            cache_hit: true,
            declared_mime_mismatch,
            elapsed: started.elapsed(),
        });
    }

    let metadata = extract_metadata(bytes)?;
    let source = image::load_from_memory_with_format(bytes, codec_format(format)?)
        .map_err(|err| EngineError::ProcessingFailed(format!("{format} decode failed: {err}")))?;
    let images = Arc::new(render_all(&source, &config.derivatives)?);
    cache.set(hash.clone(), Arc::clone(&images));

    Ok(DerivationReport {
        hash,
        images,
        metadata: Some(metadata),
        cache_hit: false,
        declared_mime_mismatch,
        elapsed: started.elapsed(),
    })
}

fn render_all(
    source: &DynamicImage,
    derivatives: &DerivativeConfig,
) -> Result<DerivedImageSet, EngineError> {
    thread::scope(|scope| {
        let analysis = scope.spawn(|| render_derivative(source, &derivatives.analysis));
        let thumbnail = scope.spawn(|| render_derivative(source, &derivatives.thumbnail));
        let archive = scope.spawn(|| render_derivative(source, &derivatives.archive));

        // Join every worker before inspecting results so none is left running.
        let analysis = join_worker(DerivativeKind::Analysis, analysis);
        let thumbnail = join_worker(DerivativeKind::Thumbnail, thumbnail);
        let archive = join_worker(DerivativeKind::Archive, archive);
        Ok(DerivedImageSet {
            analysis: analysis?,
            thumbnail: thumbnail?,
            archive: archive?,
        })
    })
}

fn join_worker(
    kind: DerivativeKind,
    handle: ScopedJoinHandle<'_, Result<ProcessedImage, EngineError>>,
) -> Result<ProcessedImage, EngineError> {
    handle.join().map_err(|_| {
        EngineError::ProcessingFailed(format!("{} derivation panicked", kind.as_str()))
    })?
}

fn render_derivative(
    source: &DynamicImage,
    spec: &DerivativeSpec,
) -> Result<ProcessedImage, EngineError> {
    let resized = match spec.fit {
        Fit::Inside => fit_inside(source, spec.width, spec.height),
        Fit::Cover => source.resize_to_fill(spec.width, spec.height, RESIZE_FILTER),
    };
    let prepared = if spec.enhance {
        enhance(&resized)
    } else {
        resized
    };
    let bytes = encode(&prepared, spec.format, spec.quality)?;
    let base64 = spec.base64.then(|| BASE64.encode(&bytes));
    Ok(ProcessedImage {
        size: bytes.len(),
        width: prepared.width(),
        height: prepared.height(),
        format: spec.format,
        bytes,
        base64,
    })
}

/// Never upscales.
fn fit_inside(source: &DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if source.width() <= max_width && source.height() <= max_height {
        return source.clone();
    }
    source.resize(max_width, max_height, RESIZE_FILTER)
}

/// Sharpen, stretch each channel's histogram, then a light blur against JPEG noise.
fn enhance(image: &DynamicImage) -> DynamicImage {
    let flattened = DynamicImage::ImageRgb8(flatten_alpha(image));
    let mut sharpened = flattened
        .unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD)
        .to_rgb8();
    stretch_contrast(&mut sharpened);
    DynamicImage::ImageRgb8(sharpened).blur(DENOISE_SIGMA)
}

/// Composites over white.
fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

fn stretch_contrast(image: &mut RgbImage) {
    let total = u64::from(image.width()) * u64::from(image.height());
    if total == 0 {
        return;
    }
    let mut histograms = [[0u64; 256]; 3];
    for pixel in image.pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            histograms[channel][usize::from(*value)] += 1;
        }
    }
    let clip = (total as f64 * NORMALIZE_CLIP) as u64;
    let mut tables = [[0u8; 256]; 3];
    for (channel, histogram) in histograms.iter().enumerate() {
        let (low, high) = percentile_bounds(histogram, clip);
        for (value, slot) in tables[channel].iter_mut().enumerate() {
            *slot = if high <= low {
                value as u8
            } else {
                let scaled = (value as f64 - low as f64) * 255.0 / (high - low) as f64;
                scaled.round().clamp(0.0, 255.0) as u8
            };
        }
    }
    for pixel in image.pixels_mut() {
        for (channel, value) in pixel.0.iter_mut().enumerate() {
            *value = tables[channel][usize::from(*value)];
        }
    }
}

fn percentile_bounds(histogram: &[u64; 256], clip: u64) -> (usize, usize) {
    let mut seen = 0u64;
    let mut low = 0usize;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > clip {
            low = value;
            break;
        }
    }
    seen = 0;
    let mut high = 255usize;
    for (value, count) in histogram.iter().enumerate().rev() {
        seen += count;
        if seen > clip {
            high = value;
            break;
        }
    }
    (low, high)
}

fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, EngineError> {
    let mut bytes = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(flatten_alpha(image))
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality)),
        ImageFormat::Png => to_8bit(image).write_with_encoder(PngEncoder::new(&mut bytes)),
        // Lossless only; config validation pins `quality` to 100 for WebP.
        ImageFormat::Webp => {
            to_8bit(image).write_with_encoder(WebPEncoder::new_lossless(&mut bytes))
        }
        other => {
            return Err(EngineError::ProcessingFailed(format!(
                "no encoder for {other}"
            )))
        }
    };
    result.map_err(|err| EngineError::ProcessingFailed(format!("{format} encode failed: {err}")))?;
    Ok(bytes)
}

fn to_8bit(image: &DynamicImage) -> DynamicImage {
    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    }
}

fn codec_format(format: ImageFormat) -> Result<CodecFormat, EngineError> {
    match format {
        ImageFormat::Jpeg => Ok(CodecFormat::Jpeg),
        ImageFormat::Png => Ok(CodecFormat::Png),
        ImageFormat::Webp => Ok(CodecFormat::WebP),
        ImageFormat::Gif => Ok(CodecFormat::Gif),
        ImageFormat::Heic => Err(EngineError::InvalidImage(
            "no decoder available for heic".to_string(),
        )),
    }
}

fn is_animated(format: ImageFormat, bytes: &[u8]) -> bool {
    match format {
        ImageFormat::Png => png_has_animation_control(bytes),
        ImageFormat::Webp => webp_has_animation_flag(bytes),
        ImageFormat::Gif => gif_frame_count(bytes) > 1,
        ImageFormat::Jpeg | ImageFormat::Heic => false,
    }
}

/// APNG declares `acTL` before the first `IDAT`.
fn png_has_animation_control(bytes: &[u8]) -> bool {
    let mut offset = 8usize;
    while offset + 8 <= bytes.len() {
        let length = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        match &bytes[offset + 4..offset + 8] {
            b"acTL" => return true,
            b"IDAT" | b"IEND" => return false,
            _ => {}
        }
        let Some(next) = offset.checked_add(length).and_then(|value| value.checked_add(12)) else {
            return false;
        };
        offset = next;
    }
    false
}

fn webp_has_animation_flag(bytes: &[u8]) -> bool {
    bytes.len() > 20 && &bytes[12..16] == b"VP8X" && bytes[20] & 0x02 != 0
}

fn gif_frame_count(bytes: &[u8]) -> usize {
    const HEADER_AND_SCREEN: usize = 13;
    if bytes.len() < HEADER_AND_SCREEN {
        return 0;
    }
    let mut pos = HEADER_AND_SCREEN + color_table_len(bytes[10]);
    let mut frames = 0;
    while let Some(&block) = bytes.get(pos) {
        match block {
            0x2C => {
                frames += 1;
                let Some(&flags) = bytes.get(pos + 9) else {
                    break;
                };
                // Descriptor, local colour table, LZW minimum code size.
                pos += 10 + color_table_len(flags) + 1;
                let Some(next) = skip_sub_blocks(bytes, pos) else {
                    break;
                };
                pos = next;
            }
            0x21 => {
                let Some(next) = skip_sub_blocks(bytes, pos + 2) else {
                    break;
                };
                pos = next;
            }
            _ => break,
        }
    }
    frames
}

fn color_table_len(flags: u8) -> usize {
    if flags & 0x80 == 0 {
        0
    } else {
        3 * (1usize << ((flags & 0x07) + 1))
    }
}

fn skip_sub_blocks(bytes: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let size = usize::from(*bytes.get(pos)?);
        pos += 1;
        if size == 0 {
            return Some(pos);
        }
        pos += size;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine as _;
    use image::codecs::png::PngEncoder;
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
    use mealsnap_contracts::cache::{ContentCache, MemoryCache};
    use mealsnap_contracts::config::PipelineConfig;
    use mealsnap_contracts::images::{ImageFormat, RawImage};

    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_with_encoder(PngEncoder::new(&mut bytes))
            .unwrap();
        bytes
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(gradient(width, height))
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 92))
            .unwrap();
        bytes
    }

    fn fresh_cache() -> MemoryCache {
        MemoryCache::new(8, Duration::from_secs(60))
    }

    #[test]
    fn oversized_upload_is_rejected_before_decode() {
        let config = PipelineConfig::default();
        // A PNG signature followed by garbage: decoding would fail as InvalidImage.
        let mut bytes = vec![0u8; 15 * 1024 * 1024];
        bytes[..8].copy_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        let image = RawImage::new(bytes, Some("image/png".to_string()));
        let cache = fresh_cache();

        let err = derive_all(&image, &config, &cache).unwrap_err();
        assert!(matches!(
            err,
            EngineError::FileTooLarge {
                size: 15728640,
                limit: 10485760
            }
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn empty_upload_is_invalid() {
        assert!(matches!(
            validate_size(&[], 10),
            Err(EngineError::InvalidImage(_))
        ));
        assert!(validate_size(&[1; 10], 10).is_ok());
    }

    #[test]
    fn format_check_ignores_declared_mime() {
        let allowed = PipelineConfig::default().intake.allowed_formats;
        let html = b"<html><script>alert(1)</script></html>";
        assert!(matches!(
            validate_format(html, &allowed),
            Err(EngineError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            validate_format(b"GIF89a\x01\x00\x01\x00\x00\x00\x00", &allowed),
            Err(EngineError::UnsupportedFormat(_))
        ));

        let config = PipelineConfig::default();
        let cache = fresh_cache();
        let png = png_bytes(DynamicImage::ImageRgb8(gradient(64, 48)));
        let spoofed = RawImage::new(png, Some("image/jpeg".to_string()));
        let report = derive_all(&spoofed, &config, &cache).unwrap();
        assert!(report.declared_mime_mismatch);
        assert_eq!(report.metadata.map(|meta| meta.format), Some(ImageFormat::Png));

        let spoofed_html = RawImage::new(html.to_vec(), Some("image/png".to_string()));
        assert!(matches!(
            derive_all(&spoofed_html, &config, &cache),
            Err(EngineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn metadata_reports_layout_and_rejects_truncated_files() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 30, Rgba([10, 20, 30, 128])));
        let bytes = png_bytes(rgba);
        let metadata = extract_metadata(&bytes).unwrap();
        assert_eq!((metadata.width, metadata.height), (40, 30));
        assert_eq!(metadata.channels, 4);
        assert!(metadata.has_alpha);
        assert!(!metadata.is_animated);
        assert_eq!(metadata.size, bytes.len());

        let jpeg = jpeg_bytes(20, 10);
        let metadata = extract_metadata(&jpeg).unwrap();
        assert_eq!(metadata.format, ImageFormat::Jpeg);
        assert_eq!(metadata.channels, 3);
        assert!(!metadata.has_alpha);

        assert!(matches!(
            extract_metadata(&bytes[..12]),
            Err(EngineError::InvalidImage(_))
        ));
        assert!(matches!(
            extract_metadata(b"\0\0\0\x18ftypheic\0\0\0\0"),
            Err(EngineError::InvalidImage(_))
        ));
    }

    #[test]
    fn derivatives_follow_configured_geometry() {
        let config = PipelineConfig::default();
        let cache = fresh_cache();
        let image = RawImage::new(jpeg_bytes(1600, 900), Some("image/jpeg".to_string()));
        let report = derive_all(&image, &config, &cache).unwrap();
        assert!(!report.cache_hit);

        let images = &report.images;
        assert_eq!((images.analysis.width, images.analysis.height), (1024, 576));
        assert_eq!(images.analysis.format, ImageFormat::Jpeg);
        assert_eq!(ImageFormat::sniff(&images.analysis.bytes), Some(ImageFormat::Jpeg));
        let encoded = images.analysis.base64.as_deref().unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), images.analysis.bytes);

        assert_eq!((images.thumbnail.width, images.thumbnail.height), (300, 300));
        assert_eq!(ImageFormat::sniff(&images.thumbnail.bytes), Some(ImageFormat::Jpeg));
        assert!(images.thumbnail.base64.is_none());

        assert_eq!((images.archive.width, images.archive.height), (1600, 900));
        assert!(images.archive.base64.is_none());
        assert_eq!(images.archive.size, images.archive.bytes.len());
        assert_eq!(report.sizes().total(), images.sizes().total());
    }

    #[test]
    fn thumbnail_quality_controls_encoded_size() {
        let noisy = DynamicImage::ImageRgb8(RgbImage::from_fn(1200, 900, |x, y| {
            let seed = x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503) ^ (x * y);
            Rgb([(seed >> 3) as u8, (seed >> 11) as u8, (seed >> 19) as u8])
        }));
        let mut spec = PipelineConfig::default().derivatives.thumbnail;
        let moderate = render_derivative(&noisy, &spec).unwrap();
        assert_eq!(moderate.format, ImageFormat::Jpeg);
        assert_eq!((moderate.width, moderate.height), (300, 300));

        spec.quality = 30;
        let low = render_derivative(&noisy, &spec).unwrap();
        assert!(low.size < moderate.size);

        spec.format = ImageFormat::Webp;
        spec.quality = 100;
        let lossless = render_derivative(&noisy, &spec).unwrap();
        assert!(moderate.size < lossless.size);
    }

    #[test]
    fn small_inputs_are_never_upscaled() {
        let config = PipelineConfig::default();
        let cache = fresh_cache();
        let bytes = png_bytes(DynamicImage::ImageRgb8(gradient(200, 100)));
        let report = derive_all(&RawImage::new(bytes, None), &config, &cache).unwrap();
        assert_eq!((report.images.analysis.width, report.images.analysis.height), (200, 100));
        assert_eq!((report.images.archive.width, report.images.archive.height), (200, 100));
    }

    #[test]
    fn identical_bytes_yield_identical_derivatives() {
        let config = PipelineConfig::default();
        let bytes = png_bytes(DynamicImage::ImageRgb8(gradient(320, 240)));

        let first = derive_all(&RawImage::new(bytes.clone(), None), &config, &fresh_cache()).unwrap();
        let second = derive_all(&RawImage::new(bytes.clone(), None), &config, &fresh_cache()).unwrap();
        assert!(!second.cache_hit);
        assert_eq!(first.hash, second.hash);
        assert_eq!(*first.images, *second.images);

        let shared = fresh_cache();
        let miss = derive_all(&RawImage::new(bytes.clone(), None), &config, &shared).unwrap();
        let hit = derive_all(&RawImage::new(bytes, None), &config, &shared).unwrap();
        assert!(hit.cache_hit);
        assert!(hit.metadata.is_none());
        assert!(Arc::ptr_eq(&miss.images, &hit.images));
        assert_eq!(*hit.images, *first.images);
    }

    #[test]
    fn failed_derivation_leaves_cache_untouched() {
        let config = PipelineConfig::default();
        let cache = fresh_cache();
        let bytes = png_bytes(DynamicImage::ImageRgb8(gradient(32, 32)));
        let truncated = bytes[..bytes.len() / 2].to_vec();
        let err = derive_all(&RawImage::new(truncated.clone(), None), &config, &cache).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ProcessingFailed(_) | EngineError::InvalidImage(_)
        ));
        assert!(cache.get(&ContentHash::of(&truncated)).is_none());
    }

    #[test]
    fn transparent_input_is_flattened_for_jpeg() {
        let config = PipelineConfig::default();
        let cache = fresh_cache();
        let clear = DynamicImage::ImageRgba8(RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 0])));
        let report = derive_all(&RawImage::new(png_bytes(clear), None), &config, &cache).unwrap();
        let archive = image::load_from_memory(&report.images.archive.bytes)
            .unwrap()
            .to_rgb8();
        let center = archive.get_pixel(25, 25);
        assert!(center.0.iter().all(|channel| *channel > 240));
    }

    #[test]
    fn contrast_stretch_spans_full_range() {
        let mut image = RgbImage::from_fn(100, 1, |x, _| {
            let value = 100 + (x as u8 / 2);
            Rgb([value, value, value])
        });
        stretch_contrast(&mut image);
        let reds = image.pixels().map(|pixel| pixel[0]).collect::<Vec<_>>();
        assert_eq!(reds.iter().min(), Some(&0));
        assert_eq!(reds.iter().max(), Some(&255));

        let mut flat = RgbImage::from_pixel(10, 10, Rgb([7, 7, 7]));
        stretch_contrast(&mut flat);
        assert!(flat.pixels().all(|pixel| pixel.0 == [7, 7, 7]));
    }

    #[test]
    fn animation_markers_are_detected() {
        let mut png = png_bytes(DynamicImage::ImageRgb8(gradient(4, 4)));
        assert!(!png_has_animation_control(&png));
        // Insert an acTL chunk right after IHDR (8 byte signature + 25 byte chunk).
        let mut actl = vec![0, 0, 0, 8];
        actl.extend_from_slice(b"acTL");
        actl.extend_from_slice(&[0, 0, 0, 2, 0, 0, 0, 0]);
        actl.extend_from_slice(&[0, 0, 0, 0]);
        png.splice(33..33, actl);
        assert!(png_has_animation_control(&png));

        let mut webp = b"RIFF\0\0\0\0WEBPVP8X\x0a\0\0\0".to_vec();
        webp.extend_from_slice(&[0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(webp_has_animation_flag(&webp));
        webp[20] = 0x10;
        assert!(!webp_has_animation_flag(&webp));

        let frame: &[u8] = &[
            0x2C, 0, 0, 0, 0, 1, 0, 1, 0, 0x00, 0x02, 0x02, 0x4C, 0x01, 0x00,
        ];
        let mut gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00".to_vec();
        gif.extend_from_slice(&[0x21, 0xF9, 0x04, 0, 0, 0, 0, 0x00]);
        gif.extend_from_slice(frame);
        assert_eq!(gif_frame_count(&gif), 1);
        gif.extend_from_slice(frame);
        gif.push(0x3B);
        assert_eq!(gif_frame_count(&gif), 2);
        assert!(is_animated(ImageFormat::Gif, &gif));
    }
}
