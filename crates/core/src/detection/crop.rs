//! Padded square crops around accepted regions, for downstream classification.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::region::DetectedRegion;

/// Crop settings, carried on [`super::DetectionConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropSettings {
    /// Padding on each side, as a fraction of the region size.
    pub padding: f64,
    /// Maximum output side in pixels.
    pub max_side: u32,
    pub jpeg_quality: u8,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            padding: 0.20,
            max_side: 400,
            jpeg_quality: 85,
        }
    }
}

/// One encoded crop. A placeholder has `side == 0` and no bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCrop {
    pub side: u32,
    pub jpeg: Vec<u8>,
}

impl RegionCrop {
    pub fn placeholder() -> Self {
        Self {
            side: 0,
            jpeg: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// Pixel window of a crop before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

/// Compute the square source window for `region` on a `fw` x `fh` frame.
///
/// The padded square is shifted back inside the frame rather than clipped,
/// and never exceeds the shorter frame dimension. `None` for a degenerate
/// frame or region.
pub fn crop_window(region: &DetectedRegion, fw: u32, fh: u32, padding: f64) -> Option<CropWindow> {
    if fw == 0 || fh == 0 {
        return None;
    }
    let (w, h) = (fw as f64, fh as f64);
    let size = (region.width_pct / 100.0 * w).max(region.height_pct / 100.0 * h);
    let side = (size * (1.0 + 2.0 * padding)).round().min(w.min(h));
    if !side.is_finite() || side < 1.0 {
        return None;
    }

    let cx = region.center_x_pct / 100.0 * w;
    let cy = region.center_y_pct / 100.0 * h;
    let x = (cx - side / 2.0).round().clamp(0.0, w - side);
    let y = (cy - side / 2.0).round().clamp(0.0, h - side);

    Some(CropWindow {
        x: x as u32,
        y: y as u32,
        side: side as u32,
    })
}

/// Extract one crop per region, in input order.
pub fn extract_crops(frame: &RgbImage, regions: &[DetectedRegion], settings: &CropSettings) -> Vec<RegionCrop> {
    let (fw, fh) = frame.dimensions();
    regions
        .iter()
        .enumerate()
        .map(|(index, region)| {
            let Some(window) = crop_window(region, fw, fh, settings.padding) else {
                tracing::warn!(index, "Region cannot be cropped, using placeholder");
                return RegionCrop::placeholder();
            };
            match encode_crop(frame, window, settings) {
                Ok(crop) => crop,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Crop encoding failed, using placeholder");
                    RegionCrop::placeholder()
                }
            }
        })
        .collect()
}

fn encode_crop(
    frame: &RgbImage,
    window: CropWindow,
    settings: &CropSettings,
) -> Result<RegionCrop, image::ImageError> {
    let sub = imageops::crop_imm(frame, window.x, window.y, window.side, window.side).to_image();
    let out_side = window.side.min(settings.max_side.max(1));
    let scaled = if out_side < window.side {
        imageops::resize(&sub, out_side, out_side, FilterType::Triangle)
    } else {
        sub
    };

    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, settings.jpeg_quality).encode_image(&scaled)?;
    Ok(RegionCrop {
        side: out_side,
        jpeg: buf.into_inner(),
    })
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::super::region::RegionConfidence;
    use super::*;

    fn region(cx: f64, cy: f64, w: f64, h: f64) -> DetectedRegion {
        DetectedRegion {
            center_x_pct: cx,
            center_y_pct: cy,
            width_pct: w,
            height_pct: h,
            radius_px: 10.0,
            confidence_bucket: RegionConfidence::High,
            detection_count: 10,
        }
    }

    #[test]
    fn window_is_padded_and_centred() {
        // 10% of 1000 = 100 px region, padded by 20% each side = 140 px.
        let window = crop_window(&region(50.0, 50.0, 10.0, 12.5), 1000, 800, 0.20).unwrap();
        assert_eq!(window.side, 140);
        assert_eq!(window.x, 430);
        assert_eq!(window.y, 330);
    }

    #[test]
    fn window_shifts_inside_frame() {
        let window = crop_window(&region(1.0, 99.0, 10.0, 12.5), 1000, 800, 0.20).unwrap();
        assert_eq!(window.side, 140);
        assert_eq!(window.x, 0);
        assert_eq!(window.y, 800 - 140);
    }

    #[test]
    fn window_never_exceeds_short_side() {
        let window = crop_window(&region(50.0, 50.0, 90.0, 90.0), 300, 200, 0.20).unwrap();
        assert_eq!(window.side, 200);
        assert_eq!(window.y, 0);
    }

    #[test]
    fn degenerate_inputs_yield_none() {
        assert!(crop_window(&region(50.0, 50.0, 10.0, 10.0), 0, 100, 0.2).is_none());
        assert!(crop_window(&region(50.0, 50.0, 0.0, 0.0), 100, 100, 0.2).is_none());
    }

    #[test]
    fn crops_are_square_and_capped() {
        let frame = RgbImage::from_pixel(1200, 1000, Rgb([120, 130, 140]));
        let regions = vec![
            region(50.0, 50.0, 50.0, 60.0),
            region(10.0, 10.0, 5.0, 6.0),
            region(50.0, 50.0, 0.0, 0.0),
        ];
        let crops = extract_crops(&frame, &regions, &CropSettings::default());
        assert_eq!(crops.len(), 3);

        assert_eq!(crops[0].side, 400);
        let decoded = image::load_from_memory(&crops[0].jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 400));

        let decoded = image::load_from_memory(&crops[1].jpeg).unwrap();
        assert_eq!(decoded.width(), decoded.height());
        assert!(decoded.width() <= 400);

        assert!(crops[2].is_placeholder());
    }
}
