//! End-to-end transform tests through the real codecs.
//!
//! Run with: `cargo test -p imgbridge-processing --test pipeline_test`

#![cfg(all(
    feature = "jpeg",
    feature = "png",
    feature = "webp",
    feature = "avif",
    feature = "tiff"
))]

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use img_parts::{jpeg::Jpeg, Bytes, ImageEXIF, ImageICC};
use imgbridge_core::{EngineConfig, ImageError};
use imgbridge_processing::{
    FormatId, FormatRegistry, ImagePipeline, LoadParams, Loader, Operation,
    OutputOptions, ResizeDimensions, ResizeMode, SaveOptions, TransformRequest,
    WatermarkImageSpec, WatermarkPosition,
};

/// Little-endian TIFF header with a single IFD0 Orientation entry
fn orientation_exif(orientation: u8) -> Vec<u8> {
    let mut exif = vec![b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01, 0x00];
    exif.extend_from_slice(&[0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00]);
    exif.extend_from_slice(&[orientation, 0x00, 0x00, 0x00]);
    exif.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    exif
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
    }))
}

fn jpeg_with(image: &DynamicImage, exif: Option<Vec<u8>>, icc: Option<Vec<u8>>) -> Vec<u8> {
    let bytes = encode(image, ImageFormat::Jpeg);
    let mut jpeg = Jpeg::from_bytes(Bytes::from(bytes)).unwrap();
    jpeg.set_exif(exif.map(Bytes::from));
    jpeg.set_icc_profile(icc.map(Bytes::from));
    jpeg.encoder().bytes().to_vec()
}

fn pipeline() -> ImagePipeline {
    ImagePipeline::new(EngineConfig::default())
}

#[test]
fn test_png_to_webp() {
    let source = encode(&gradient(64, 48), ImageFormat::Png);
    let request = TransformRequest::new(source)
        .with_operation(Operation::ResizeTo {
            dimensions: ResizeDimensions {
                width: Some(32),
                height: Some(32),
            },
            mode: ResizeMode::Fit,
        })
        .with_output(OutputOptions {
            format: Some(FormatId::Webp),
            save: SaveOptions {
                quality: Some(80),
                ..SaveOptions::default()
            },
            ..OutputOptions::default()
        });

    let pipeline = pipeline();
    let output = pipeline.process(request).unwrap();
    assert_eq!(output.format, FormatId::Webp);
    assert_eq!(FormatRegistry::detect(&output.bytes), Some(FormatId::Webp));

    let metadata = pipeline.metadata(&output.bytes).unwrap();
    assert_eq!(metadata.format, Some(FormatId::Webp));
    assert_eq!((metadata.width, metadata.height), (32, 24));
}

#[test]
fn test_auto_rotate_applies_exif_orientation() {
    let source = jpeg_with(&gradient(40, 20), Some(orientation_exif(6)), None);

    let pipeline = pipeline();
    assert_eq!(pipeline.metadata(&source).unwrap().orientation, 6);

    let output = pipeline.process(TransformRequest::new(source)).unwrap();
    assert_eq!(output.format, FormatId::Jpeg);
    assert_eq!((output.metadata.width, output.metadata.height), (20, 40));
    assert_eq!(output.metadata.orientation, 0);
}

#[test]
fn test_auto_rotate_can_be_disabled() {
    let source = jpeg_with(&gradient(40, 20), Some(orientation_exif(6)), None);
    let request = TransformRequest {
        auto_rotate: false,
        ..TransformRequest::new(source)
    };

    let output = pipeline().process(request).unwrap();
    assert_eq!((output.metadata.width, output.metadata.height), (40, 20));
}

#[test]
fn test_shrink_on_load() {
    let source = encode(&gradient(64, 64), ImageFormat::Jpeg);
    let request = TransformRequest {
        load: LoadParams {
            shrink: Some(4),
            ..LoadParams::default()
        },
        ..TransformRequest::new(source)
    };

    let output = pipeline().process(request).unwrap();
    assert_eq!((output.metadata.width, output.metadata.height), (16, 16));
}

#[test]
fn test_profile_kept_or_stripped() {
    let profile = b"imgbridge-test-profile".to_vec();
    let source = jpeg_with(&gradient(16, 16), None, Some(profile.clone()));

    let kept = pipeline()
        .process(TransformRequest::new(source.clone()))
        .unwrap();
    assert!(kept.metadata.has_profile);
    let jpeg = Jpeg::from_bytes(kept.bytes.clone()).unwrap();
    assert_eq!(jpeg.icc_profile().map(|p| p.to_vec()), Some(profile));

    let stripped = pipeline()
        .process(TransformRequest::new(source).with_output(OutputOptions {
            no_profile: true,
            ..OutputOptions::default()
        }))
        .unwrap();
    assert!(!stripped.metadata.has_profile);
    let jpeg = Jpeg::from_bytes(stripped.bytes).unwrap();
    assert!(jpeg.icc_profile().is_none());
}

#[test]
fn test_image_watermark_end_to_end() {
    let base = encode(
        &DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 80, Rgb([255, 255, 255]))),
        ImageFormat::Png,
    );
    let overlay_png = encode(
        &DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 10, Rgba([0, 0, 255, 255]))),
        ImageFormat::Png,
    );
    let overlay = Loader::load_detected(&overlay_png, &LoadParams::default()).unwrap();

    let (left, top) = WatermarkPosition::BottomRight.offset((100, 80), overlay.dimensions());
    let spec = WatermarkImageSpec {
        overlay,
        left,
        top,
        opacity: 1.0,
    };
    let output = pipeline()
        .process(TransformRequest::new(base).with_operation(Operation::WatermarkImage(spec)))
        .unwrap();

    assert_eq!(output.format, FormatId::Png);
    let result = image::load_from_memory(&output.bytes).unwrap().to_rgba8();
    assert_eq!(result.dimensions(), (100, 80));
    assert_eq!(result.get_pixel(99, 79), &Rgba([0, 0, 255, 255]));
    assert_eq!(result.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
}

#[test]
fn test_avif_is_save_only() {
    let source = encode(&gradient(16, 16), ImageFormat::Png);
    let request = TransformRequest::new(source).with_output(OutputOptions {
        format: Some(FormatId::Avif),
        save: SaveOptions {
            speed: Some(10),
            ..SaveOptions::default()
        },
        ..OutputOptions::default()
    });

    let pipeline = pipeline();
    let output = pipeline.process(request).unwrap();
    assert_eq!(FormatRegistry::detect(&output.bytes), Some(FormatId::Avif));

    let err = pipeline.metadata(&output.bytes).unwrap_err();
    assert!(matches!(err, ImageError::UnsupportedFormat { .. }));
}

#[test]
fn test_tiff_keeps_16bit() {
    let source = encode(
        &DynamicImage::ImageRgb16(image::ImageBuffer::from_pixel(8, 8, Rgb([1000u16, 2000, 3000]))),
        ImageFormat::Png,
    );
    let request = TransformRequest::new(source).with_output(OutputOptions {
        format: Some(FormatId::Tiff),
        ..OutputOptions::default()
    });

    let output = pipeline().process(request).unwrap();
    let decoded = image::load_from_memory(&output.bytes).unwrap();
    assert_eq!(decoded.color(), image::ColorType::Rgb16);
    assert_eq!(decoded.to_rgb16().get_pixel(3, 3), &Rgb([1000, 2000, 3000]));
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let pipeline = pipeline();
    let tasks: Vec<_> = (1..=4u32)
        .map(|i| {
            let pipeline = pipeline.clone();
            let source = encode(&gradient(10 * i, 10), ImageFormat::Png);
            tokio::spawn(async move {
                pipeline
                    .process_async(TransformRequest::new(source).with_operation(Operation::Rotate {
                        degrees: 90,
                        background: None,
                    }))
                    .await
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let output = task.await.unwrap().unwrap();
        let expected = 10 * (i as u32 + 1);
        assert_eq!((output.metadata.width, output.metadata.height), (10, expected));
    }
}
