//! Annotated stream frames.
//!
//! Draws the primary detection onto a copy of the grayscale frame and
//! encodes it as JPEG for the per-camera stream topic. Overlays are white;
//! the source frames are grayscale so there is no color channel to spend.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::detect::Detection;
use crate::frame::Frame;

const OVERLAY_VALUE: u8 = 255;
const OUTLINE_THICKNESS: i32 = 2;
const JPEG_QUALITY: u8 = 80;

/// Annotate `frame` with the detection (frame-space coordinates) and
/// return JPEG bytes.
pub fn annotate_and_encode(frame: &Frame, detection: Option<&Detection>) -> Result<Vec<u8>> {
    let mut pixels = frame.pixels.clone();
    if let Some(det) = detection {
        draw_box(
            &mut pixels,
            frame.width as i32,
            frame.height as i32,
            det.bbox.x,
            det.bbox.y,
            det.bbox.w,
            det.bbox.h,
        );
        draw_score_bar(
            &mut pixels,
            frame.width as i32,
            frame.height as i32,
            det.bbox.x,
            det.bbox.y,
            det.bbox.w,
            det.score,
        );
    }

    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder
        .write_image(&pixels, frame.width, frame.height, ExtendedColorType::L8)
        .context("encode annotated frame as JPEG")?;
    Ok(jpeg)
}

fn put(pixels: &mut [u8], width: i32, height: i32, x: i32, y: i32) {
    if x >= 0 && x < width && y >= 0 && y < height {
        pixels[(y * width + x) as usize] = OVERLAY_VALUE;
    }
}

/// Rectangle outline, clipped to the frame.
fn draw_box(pixels: &mut [u8], width: i32, height: i32, x: i32, y: i32, w: i32, h: i32) {
    for t in 0..OUTLINE_THICKNESS {
        for dx in 0..w {
            put(pixels, width, height, x + dx, y + t);
            put(pixels, width, height, x + dx, y + h - 1 - t);
        }
        for dy in 0..h {
            put(pixels, width, height, x + t, y + dy);
            put(pixels, width, height, x + w - 1 - t, y + dy);
        }
    }
}

/// Filled bar above the box whose length tracks the confidence score.
fn draw_score_bar(pixels: &mut [u8], width: i32, height: i32, x: i32, y: i32, w: i32, score: f32) {
    let bar_len = (w as f32 * score.clamp(0.0, 1.0)) as i32;
    let bar_y = y - 6;
    for dy in 0..3 {
        for dx in 0..bar_len {
            put(pixels, width, height, x + dx, bar_y + dy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn dark_frame() -> Frame {
        Frame::new(vec![0u8; 64 * 64], 64, 64, 1.0)
    }

    #[test]
    fn encodes_jpeg_magic() {
        let jpeg = annotate_and_encode(&dark_frame(), None).unwrap();
        assert!(jpeg.len() > 2);
        assert_eq!(&jpeg[..2], &[0xff, 0xd8], "JPEG SOI marker");
    }

    #[test]
    fn annotation_changes_output() {
        let frame = dark_frame();
        let plain = annotate_and_encode(&frame, None).unwrap();
        let det = Detection {
            bbox: BoundingBox::new(10, 10, 30, 30),
            score: 0.9,
        };
        let annotated = annotate_and_encode(&frame, Some(&det)).unwrap();
        assert_ne!(plain, annotated);
    }

    #[test]
    fn out_of_bounds_box_is_clipped() {
        let frame = dark_frame();
        let det = Detection {
            bbox: BoundingBox::new(-20, -20, 200, 200),
            score: 1.0,
        };
        // Must not panic.
        annotate_and_encode(&frame, Some(&det)).unwrap();
    }
}
