//! Decoded image frames and box annotation.
//!
//! - `ImageFrame`: RGB8 pixel buffer of known width/height handed to detector backends.
//! - `annotate`: draws detection boxes onto a copy of a frame for annotated outputs.

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use sha2::{Digest, Sha256};

use crate::detect::Detection;

/// Box colours, cycled per class label.
const PALETTE: [[u8; 3]; 6] = [
    [0, 255, 0],
    [255, 0, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
];

/// Box outline thickness in pixels.
const BOX_THICKNESS: u32 = 2;

/// A decoded RGB8 image.
///
/// Backends only ever see `&ImageFrame`; they cannot retain the pixel buffer
/// beyond the `infer` call.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageFrame {
    image: RgbImage,
}

impl ImageFrame {
    /// Wrap a raw RGB8 buffer. Returns `None` when the buffer length does not
    /// match `width * height * 3`.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self { image })
    }

    /// Solid black frame, used as the stand-in for undecodable video frames.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width.max(1), height.max(1)),
        }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            image: image.into_rgb8(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major RGB8 pixels.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_rgb_image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_rgb_image(self) -> RgbImage {
        self.image
    }

    /// SHA-256 over dimensions and pixels. Identifies a frame's content
    /// without keeping the pixels around.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.width().to_le_bytes());
        hasher.update(self.height().to_le_bytes());
        hasher.update(self.pixels());
        hasher.finalize().into()
    }
}

/// Draw each detection box onto a copy of `frame`.
pub fn annotate(frame: &ImageFrame, detections: &[Detection]) -> ImageFrame {
    let mut canvas = frame.image.clone();
    let (width, height) = (canvas.width() as f32, canvas.height() as f32);

    for detection in detections {
        let bbox = detection.bbox();
        let x = (bbox.x_min * width).round() as i32;
        let y = (bbox.y_min * height).round() as i32;
        let w = ((bbox.x_max - bbox.x_min) * width).round().max(1.0) as u32;
        let h = ((bbox.y_max - bbox.y_min) * height).round().max(1.0) as u32;
        let color = Rgb(class_color(detection.class_label()));

        for inset in 0..BOX_THICKNESS {
            let shrink = inset * 2;
            if w <= shrink || h <= shrink {
                break;
            }
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(w - shrink, h - shrink);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    ImageFrame { image: canvas }
}

fn class_color(label: &str) -> [u8; 3] {
    let idx = label.bytes().fold(0usize, |acc, b| acc.wrapping_add(b as usize));
    PALETTE[idx % PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(ImageFrame::from_raw(2, 2, vec![0; 12]).is_some());
        assert!(ImageFrame::from_raw(2, 2, vec![0; 11]).is_none());
    }

    #[test]
    fn content_hash_tracks_pixels() {
        let a = ImageFrame::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let b = ImageFrame::from_raw(2, 1, vec![1, 2, 3, 4, 5, 7]).unwrap();
        assert_eq!(a.content_hash(), a.clone().content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn annotate_draws_box_outline_and_leaves_source_untouched() {
        let frame = ImageFrame::blank(20, 20);
        let detection = Detection::new(BoundingBox::new(0.25, 0.25, 0.75, 0.75), 0.9, "Human");
        let annotated = annotate(&frame, &[detection]);

        let corner = annotated.as_rgb_image().get_pixel(5, 5);
        assert_ne!(corner.0, [0, 0, 0]);
        let centre = annotated.as_rgb_image().get_pixel(10, 10);
        assert_eq!(centre.0, [0, 0, 0]);
        assert!(frame.pixels().iter().all(|&p| p == 0));
    }
}
