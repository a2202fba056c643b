//! Gradient Hough circle search.
//!
//! Edge pixels (Canny) vote along both directions of their intensity gradient
//! into a coarse accumulator (`cell_size` px per cell). Accumulator peaks that
//! clear the sensitivity threshold become centre candidates, strongest first;
//! each surviving centre then gets a radius from the histogram of its
//! distances to the edge pixels.
//!
//! Sensitivity is the percentage of a circle's circumference that must be
//! backed by edge pixels. Centre peaks are held to that share of the smallest
//! circle in the band, radii to that share of their own circumference, so
//! large arcs stitched together from neighbouring embryos do not pass.

use image::{GrayImage, RgbImage};

use super::DetectionConfig;

/// A circle in pixel space as produced by the search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawCircle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// Accumulator votes (3x3 cell window) at the centre.
    pub votes: u32,
}

/// Parameters of one search pass, already scaled to a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughParams {
    pub min_radius: f64,
    pub max_radius: f64,
    pub min_center_distance: f64,
    /// Required edge coverage, in percent of the circumference.
    pub sensitivity: u32,
    pub canny_high: f32,
    pub cell_size: f64,
}

impl HoughParams {
    /// Scale the frame-relative settings of `config` to a `width` x `height`
    /// frame.
    pub fn for_frame(config: &DetectionConfig, width: u32, height: u32, sensitivity: u32) -> Self {
        let min_dim = width.min(height) as f64;
        Self {
            min_radius: (min_dim * config.min_radius_frac).max(1.0),
            max_radius: (min_dim * config.max_radius_frac).max(2.0),
            min_center_distance: min_dim * config.min_center_distance_frac,
            sensitivity,
            canny_high: config.canny_high,
            cell_size: config.cell_size.max(1.0),
        }
    }

    /// Edge support a circle of `radius` needs at this sensitivity. Never
    /// below the raw sensitivity count.
    pub fn required_support(&self, radius: f64) -> u32 {
        let share = self.sensitivity as f64 / 100.0;
        let needed = (share * std::f64::consts::TAU * radius).ceil() as u32;
        needed.max(self.sensitivity)
    }
}

/// Upper bound on centre candidates examined per pass.
const MAX_CENTER_CANDIDATES: usize = 200;

/// Grayscale and smooth a frame once; both passes reuse the result.
pub fn preprocess(frame: &RgbImage, blur_sigma: f32) -> GrayImage {
    let gray = image::imageops::grayscale(frame);
    if blur_sigma > 0.0 {
        imageproc::filter::gaussian_blur_f32(&gray, blur_sigma)
    } else {
        gray
    }
}

/// Run one Hough pass over a preprocessed frame.
///
/// Returns circles sorted by votes, strongest first. Never fails: a frame
/// without usable edges yields an empty list.
pub fn find_circles(gray: &GrayImage, params: &HoughParams) -> Vec<RawCircle> {
    let (w, h) = gray.dimensions();
    if w < 8 || h < 8 || params.max_radius < params.min_radius {
        return Vec::new();
    }

    let edges = imageproc::edges::canny(gray, params.canny_high / 2.0, params.canny_high);
    let gx = imageproc::gradients::horizontal_sobel(gray);
    let gy = imageproc::gradients::vertical_sobel(gray);

    let stride = w as usize;
    let mut edge_points: Vec<(f64, f64)> = Vec::new();
    let acc_w = (w as f64 / params.cell_size).ceil() as usize + 1;
    let acc_h = (h as f64 / params.cell_size).ceil() as usize + 1;
    let mut accum = vec![0u32; acc_w * acc_h];

    let steps = ((params.max_radius - params.min_radius) / params.cell_size).floor() as usize + 1;
    let (wf, hf) = (w as f64, h as f64);

    for (x, y, px) in edges.enumerate_pixels() {
        if px.0[0] == 0 {
            continue;
        }
        let idx = y as usize * stride + x as usize;
        let gxv = gx.as_raw()[idx] as f64;
        let gyv = gy.as_raw()[idx] as f64;
        let mag = (gxv * gxv + gyv * gyv).sqrt();
        if mag < 1e-6 {
            continue;
        }
        let (xf, yf) = (x as f64, y as f64);
        edge_points.push((xf, yf));

        let (dx, dy) = (gxv / mag, gyv / mag);
        for sign in [1.0, -1.0] {
            for step in 0..steps {
                let r = params.min_radius + step as f64 * params.cell_size;
                let vx = xf + sign * dx * r;
                let vy = yf + sign * dy * r;
                if vx < 0.0 || vy < 0.0 || vx >= wf || vy >= hf {
                    break;
                }
                let cx = (vx / params.cell_size) as usize;
                let cy = (vy / params.cell_size) as usize;
                accum[cy * acc_w + cx] += 1;
            }
        }
    }

    if edge_points.is_empty() {
        return Vec::new();
    }

    let window = window_sums(&accum, acc_w, acc_h);
    let centers = local_peaks(&window, &accum, acc_w, acc_h, params);

    let mut circles: Vec<RawCircle> = Vec::new();
    let min_dist_sq = params.min_center_distance * params.min_center_distance;
    for (cx, cy, votes) in centers {
        if circles
            .iter()
            .any(|c| (c.x - cx).powi(2) + (c.y - cy).powi(2) < min_dist_sq)
        {
            continue;
        }
        if let Some(radius) = estimate_radius(cx, cy, &edge_points, params) {
            circles.push(RawCircle {
                x: cx,
                y: cy,
                radius,
                votes,
            });
        }
    }
    circles
}

/// Keep circles whose centre is strictly further than `margin` from every
/// frame edge.
pub fn filter_edge_margin(circles: Vec<RawCircle>, width: u32, height: u32, margin: f64) -> Vec<RawCircle> {
    let (w, h) = (width as f64, height as f64);
    circles
        .into_iter()
        .filter(|c| c.x > margin && c.x < w - margin && c.y > margin && c.y < h - margin)
        .collect()
}

/// Sum of each accumulator cell and its 8 neighbours.
fn window_sums(accum: &[u32], acc_w: usize, acc_h: usize) -> Vec<u32> {
    let mut out = vec![0u32; accum.len()];
    for y in 0..acc_h {
        for x in 0..acc_w {
            let mut sum = 0u32;
            for ny in y.saturating_sub(1)..=(y + 1).min(acc_h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(acc_w - 1) {
                    sum += accum[ny * acc_w + nx];
                }
            }
            out[y * acc_w + x] = sum;
        }
    }
    out
}

/// Local maxima of the window sums that could back the smallest circle in
/// the band, as sub-cell centroids in pixel space, strongest first.
fn local_peaks(
    window: &[u32],
    accum: &[u32],
    acc_w: usize,
    acc_h: usize,
    params: &HoughParams,
) -> Vec<(f64, f64, u32)> {
    let threshold = params.required_support(params.min_radius);
    let mut peaks = Vec::new();
    for y in 1..acc_h.saturating_sub(1) {
        for x in 1..acc_w.saturating_sub(1) {
            let idx = y * acc_w + x;
            let v = window[idx];
            if v < threshold {
                continue;
            }
            // Plateaus resolve to their top-left cell.
            let is_peak = v > window[idx - 1]
                && v >= window[idx + 1]
                && v > window[idx - acc_w]
                && v >= window[idx + acc_w]
                && v > window[idx - acc_w - 1]
                && v >= window[idx + acc_w + 1]
                && v > window[idx - acc_w + 1]
                && v >= window[idx + acc_w - 1];
            if !is_peak {
                continue;
            }

            let (mut sx, mut sy, mut total) = (0.0, 0.0, 0.0);
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    let c = accum[ny * acc_w + nx] as f64;
                    sx += c * (nx as f64 + 0.5);
                    sy += c * (ny as f64 + 0.5);
                    total += c;
                }
            }
            if total > 0.0 {
                peaks.push((sx / total * params.cell_size, sy / total * params.cell_size, v));
            }
        }
    }
    peaks.sort_by(|a, b| b.2.cmp(&a.2));
    peaks.truncate(MAX_CENTER_CANDIDATES);
    peaks
}

/// Pick the best-supported radius for a centre from its edge-distance
/// histogram (1 px bins, 3-bin window). `None` when support covers less of
/// the circumference than the sensitivity asks for.
fn estimate_radius(cx: f64, cy: f64, edge_points: &[(f64, f64)], params: &HoughParams) -> Option<f64> {
    let r_lo = params.min_radius.floor() as usize;
    let r_hi = params.max_radius.ceil() as usize;
    let mut hist = vec![0u32; r_hi - r_lo + 1];
    for &(x, y) in edge_points {
        let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
        if d < params.min_radius || d > params.max_radius {
            continue;
        }
        let bin = (d.round() as usize).clamp(r_lo, r_hi) - r_lo;
        hist[bin] += 1;
    }

    let mut best: Option<(usize, u32)> = None;
    for i in 0..hist.len() {
        let lo = i.saturating_sub(1);
        let hi = (i + 1).min(hist.len() - 1);
        let support: u32 = hist[lo..=hi].iter().sum();
        match best {
            Some((_, s)) if support <= s => {}
            _ => best = Some((i, support)),
        }
    }

    let (i, support) = best?;
    if support == 0 {
        return None;
    }
    let lo = i.saturating_sub(1);
    let hi = (i + 1).min(hist.len() - 1);
    let weighted: f64 = (lo..=hi).map(|b| hist[b] as f64 * (b + r_lo) as f64).sum();
    let radius = weighted / support as f64;
    (support >= params.required_support(radius)).then_some(radius)
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    const BACKGROUND: Rgb<u8> = Rgb([200, 200, 200]);
    const DISK: Rgb<u8> = Rgb([40, 40, 40]);

    fn frame_with_disks(w: u32, h: u32, disks: &[(f64, f64, f64)]) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let inside = disks.iter().any(|&(cx, cy, r)| {
                let dx = x as f64 + 0.5 - cx;
                let dy = y as f64 + 0.5 - cy;
                dx * dx + dy * dy <= r * r
            });
            if inside {
                DISK
            } else {
                BACKGROUND
            }
        })
    }

    fn params(w: u32, h: u32, sensitivity: u32) -> HoughParams {
        HoughParams::for_frame(&DetectionConfig::default(), w, h, sensitivity)
    }

    #[test]
    fn params_scale_with_shorter_dimension() {
        let p = params(1000, 800, 35);
        assert!((p.min_radius - 32.0).abs() < 1e-9);
        assert!((p.max_radius - 200.0).abs() < 1e-9);
        assert!((p.min_center_distance - 80.0).abs() < 1e-9);
    }

    #[test]
    fn uniform_frame_has_no_circles() {
        let frame = RgbImage::from_pixel(200, 200, BACKGROUND);
        let gray = preprocess(&frame, 1.5);
        assert!(find_circles(&gray, &params(200, 200, 25)).is_empty());
    }

    #[test]
    fn finds_isolated_disks() {
        let disks = [(100.0, 100.0, 30.0), (300.0, 100.0, 30.0), (200.0, 290.0, 30.0)];
        let frame = frame_with_disks(400, 400, &disks);
        let gray = preprocess(&frame, 1.5);
        let circles = find_circles(&gray, &params(400, 400, 35));

        assert_eq!(circles.len(), 3, "found {circles:?}");
        for &(cx, cy, r) in &disks {
            let hit = circles
                .iter()
                .find(|c| (c.x - cx).abs() < 4.0 && (c.y - cy).abs() < 4.0)
                .unwrap_or_else(|| panic!("no circle near ({cx}, {cy}) in {circles:?}"));
            assert!((hit.radius - r).abs() < 4.0, "radius {} vs {r}", hit.radius);
            assert!(hit.votes >= 35);
        }
        assert!(circles.windows(2).all(|w| w[0].votes >= w[1].votes));
    }

    fn ring(cx: f64, cy: f64, r: f64, from: f64, to: f64, n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| {
                let t = from + (to - from) * i as f64 / n as f64;
                (cx + r * t.cos(), cy + r * t.sin())
            })
            .collect()
    }

    #[test]
    fn required_support_grows_with_radius() {
        let p = params(400, 400, 35);
        assert_eq!(p.required_support(30.0), 66);
        assert_eq!(p.required_support(79.0), 174);
        assert_eq!(p.required_support(1.0), 35);
    }

    #[test]
    fn full_ring_gets_its_radius() {
        let points = ring(200.0, 200.0, 30.0, 0.0, std::f64::consts::TAU, 170);
        let radius = estimate_radius(200.0, 200.0, &points, &params(400, 400, 35)).unwrap();
        assert!((radius - 30.0).abs() < 1.0, "radius {radius}");
    }

    #[test]
    fn scattered_arcs_on_a_large_circle_are_rejected() {
        // Three short arcs of a 79 px circle, as left by the rims of
        // neighbouring embryos.
        let mut points = Vec::new();
        for start in [0.0, 2.1, 4.2] {
            points.extend(ring(200.0, 200.0, 79.0, start, start + 0.2, 15));
        }
        assert_eq!(points.len(), 45);
        assert_eq!(estimate_radius(200.0, 200.0, &points, &params(400, 400, 35)), None);
        assert_eq!(estimate_radius(200.0, 200.0, &points, &params(400, 400, 25)), None);
    }

    #[test]
    fn disks_in_a_ring_yield_no_enclosing_circle() {
        let disks: Vec<(f64, f64, f64)> = (0..6)
            .map(|i| {
                let t = i as f64 * std::f64::consts::TAU / 6.0;
                (250.0 + 130.0 * t.cos(), 250.0 + 130.0 * t.sin(), 28.0)
            })
            .collect();
        let frame = frame_with_disks(500, 500, &disks);
        let gray = preprocess(&frame, 1.5);
        let circles = find_circles(&gray, &params(500, 500, 25));

        assert_eq!(circles.len(), disks.len(), "found {circles:?}");
        assert!(circles.iter().all(|c| (c.radius - 28.0).abs() < 4.0), "found {circles:?}");
    }

    #[test]
    fn edge_margin_is_strict() {
        let circles = vec![
            RawCircle { x: 16.0, y: 100.0, radius: 10.0, votes: 50 },
            RawCircle { x: 16.5, y: 100.0, radius: 10.0, votes: 50 },
            RawCircle { x: 100.0, y: 384.0, radius: 10.0, votes: 50 },
        ];
        let kept = filter_edge_margin(circles, 400, 400, 16.0);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].x - 16.5).abs() < 1e-9);
    }
}
