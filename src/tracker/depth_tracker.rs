// SPDX-License-Identifier: GPL-3.0-only

//! Reference tracker producing the depth-derived debug outputs
//!
//! Computes the vertex and normal map pyramids plus the normal and distance
//! histograms. It performs no plane segmentation, so the segmentation,
//! projection and quadtree accessors stay empty.

use super::{
    DistanceHistogram, FilterMode, FloatMap, LabelMap, MeshTracker, NormalHistogram, NormalMode,
    PipelineOptions, PlaneProjection, QuadTreeMesh,
};
use crate::constants::{PYRAMID_LEVELS, histogram};
use crate::frame::{FramePtr, Intrinsics, Resolution};
use std::f32::consts::{FRAC_PI_2, PI};
use tracing::trace;

/// Depth in meters, 0.0 = invalid
struct DepthImage {
    resolution: Resolution,
    meters: Vec<f32>,
}

impl DepthImage {
    #[inline]
    fn at(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x >= self.resolution.width as i64 || y >= self.resolution.height as i64
        {
            return 0.0;
        }
        self.meters[(y as usize) * self.resolution.width as usize + x as usize]
    }

    /// Halve the resolution, averaging the valid samples of each 2x2 block
    fn downsample(&self) -> DepthImage {
        let resolution = self.resolution.at_level(1);
        let mut meters = Vec::with_capacity(resolution.pixel_count());
        for y in 0..resolution.height as i64 {
            for x in 0..resolution.width as i64 {
                let samples = [
                    self.at(2 * x, 2 * y),
                    self.at(2 * x + 1, 2 * y),
                    self.at(2 * x, 2 * y + 1),
                    self.at(2 * x + 1, 2 * y + 1),
                ];
                let (sum, n) = samples
                    .iter()
                    .filter(|d| **d > 0.0)
                    .fold((0.0, 0), |(s, n), d| (s + d, n + 1));
                meters.push(if n > 0 { sum / n as f32 } else { 0.0 });
            }
        }
        DepthImage { resolution, meters }
    }
}

/// Tracker computing depth-derived maps on the render thread
pub struct DepthTracker {
    options: PipelineOptions,
    rgb_maps: Vec<FloatMap>,
    vertex_maps: Vec<FloatMap>,
    normal_maps: Vec<FloatMap>,
    normal_histogram: Option<NormalHistogram>,
    distance_histograms: Vec<DistanceHistogram>,
    frames_processed: u64,
}

impl DepthTracker {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            rgb_maps: Vec::new(),
            vertex_maps: Vec::new(),
            normal_maps: Vec::new(),
            normal_histogram: None,
            distance_histograms: Vec::new(),
            frames_processed: 0,
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn filtered_depth(&self, frame: &FramePtr) -> DepthImage {
        let resolution = frame.resolution;
        let max_depth = self.options.max_depth;
        let raw: Vec<f32> = frame
            .depth
            .iter()
            .map(|&mm| {
                let m = mm as f32 * 0.001;
                if m > 0.0 && m <= max_depth { m } else { 0.0 }
            })
            .collect();
        let raw = DepthImage {
            resolution,
            meters: raw,
        };

        match self.options.filter_mode {
            FilterMode::None => raw,
            FilterMode::Gaussian => smooth(&raw, self.options.spatial_sigma, None),
            FilterMode::Bilateral => smooth(
                &raw,
                self.options.spatial_sigma,
                Some(self.options.depth_sigma),
            ),
        }
    }
}

/// 5x5 Gaussian (or bilateral, with `depth_sigma`) smoothing over valid samples
fn smooth(image: &DepthImage, spatial_sigma: f32, depth_sigma: Option<f32>) -> DepthImage {
    const RADIUS: i64 = 2;
    let inv_spatial = 1.0 / (2.0 * spatial_sigma * spatial_sigma);
    let mut meters = Vec::with_capacity(image.meters.len());

    for y in 0..image.resolution.height as i64 {
        for x in 0..image.resolution.width as i64 {
            let centre = image.at(x, y);
            if centre <= 0.0 {
                meters.push(0.0);
                continue;
            }
            let mut sum = 0.0;
            let mut weight = 0.0;
            for dy in -RADIUS..=RADIUS {
                for dx in -RADIUS..=RADIUS {
                    let d = image.at(x + dx, y + dy);
                    if d <= 0.0 {
                        continue;
                    }
                    let mut w = (-((dx * dx + dy * dy) as f32) * inv_spatial).exp();
                    if let Some(sigma) = depth_sigma {
                        let diff = d - centre;
                        w *= (-(diff * diff) / (2.0 * sigma * sigma)).exp();
                    }
                    sum += d * w;
                    weight += w;
                }
            }
            meters.push(if weight > 0.0 { sum / weight } else { centre });
        }
    }

    DepthImage {
        resolution: image.resolution,
        meters,
    }
}

fn rgb_map(frame: &FramePtr) -> FloatMap {
    let mut map = FloatMap::new(frame.resolution);
    for (dst, rgb) in map.data.iter_mut().zip(frame.color.chunks_exact(3)) {
        *dst = [
            rgb[0] as f32 / 255.0,
            rgb[1] as f32 / 255.0,
            rgb[2] as f32 / 255.0,
            1.0,
        ];
    }
    map
}

/// Halve a color map by averaging 2x2 blocks
fn downsample_rgb(map: &FloatMap) -> FloatMap {
    let src = map.resolution;
    let mut out = FloatMap::new(src.at_level(1));
    let (w, h) = (out.resolution.width as usize, out.resolution.height as usize);
    for y in 0..h {
        for x in 0..w {
            let mut sum = [0.0f32; 4];
            let mut n = 0.0;
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (sx, sy) = (2 * x + dx, 2 * y + dy);
                if sx < src.width as usize && sy < src.height as usize {
                    let p = map.data[sy * src.width as usize + sx];
                    for i in 0..4 {
                        sum[i] += p[i];
                    }
                    n += 1.0;
                }
            }
            out.data[y * w + x] = sum.map(|c| c / n);
        }
    }
    out
}

fn vertex_map(depth: &DepthImage, intrinsics: &Intrinsics) -> FloatMap {
    let mut map = FloatMap::new(depth.resolution);
    for y in 0..depth.resolution.height {
        for x in 0..depth.resolution.width {
            let d = depth.at(x as i64, y as i64);
            if d > 0.0 {
                let p = intrinsics.unproject(x as f32, y as f32, d);
                map.data[(y * depth.resolution.width + x) as usize] = [p[0], p[1], p[2], 1.0];
            }
        }
    }
    map
}

#[inline]
fn sub(a: [f32; 4], b: [f32; 4]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalized(v: [f32; 3]) -> Option<[f32; 4]> {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    (len > 1e-9).then(|| [v[0] / len, v[1] / len, v[2] / len, 1.0])
}

fn normal_map(vmap: &FloatMap, mode: NormalMode) -> FloatMap {
    let res = vmap.resolution;
    let (w, h) = (res.width as i64, res.height as i64);
    let at = |x: i64, y: i64| -> Option<[f32; 4]> {
        if x < 0 || y < 0 || x >= w || y >= h {
            return None;
        }
        let v = vmap.data[(y * w + x) as usize];
        (v[3] > 0.0).then_some(v)
    };

    let mut map = FloatMap::new(res);
    for y in 0..h {
        for x in 0..w {
            let Some(p) = at(x, y) else { continue };
            let n = match mode {
                NormalMode::Simple => match (at(x + 1, y), at(x, y + 1)) {
                    (Some(right), Some(down)) => normalized(cross(sub(down, p), sub(right, p))),
                    _ => None,
                },
                NormalMode::AverageGradient => {
                    let mut gx = [0.0f32; 3];
                    let mut gy = [0.0f32; 3];
                    let mut count = 0;
                    for oy in -1..=1 {
                        for ox in -1..=1 {
                            let (cx, cy) = (x + ox, y + oy);
                            if let (Some(l), Some(r), Some(u), Some(d)) =
                                (at(cx - 1, cy), at(cx + 1, cy), at(cx, cy - 1), at(cx, cy + 1))
                            {
                                let dx = sub(r, l);
                                let dy = sub(d, u);
                                for i in 0..3 {
                                    gx[i] += dx[i];
                                    gy[i] += dy[i];
                                }
                                count += 1;
                            }
                        }
                    }
                    if count > 0 {
                        normalized(cross(gy, gx))
                    } else {
                        None
                    }
                }
            };
            if let Some(n) = n {
                map.data[(y * w + x) as usize] = n;
            }
        }
    }
    map
}

fn normal_histogram(nmap: &FloatMap) -> NormalHistogram {
    let az_bins = histogram::NORMAL_AZIMUTH_BINS;
    let el_bins = histogram::NORMAL_ELEVATION_BINS;
    let mut counts = vec![0u32; az_bins * el_bins];

    for n in nmap.data.iter().filter(|n| n[3] > 0.0) {
        let azimuth = n[1].atan2(n[0]); // [-pi, pi]
        let elevation = n[2].clamp(-1.0, 1.0).asin(); // [-pi/2, pi/2]
        let a = (((azimuth + PI) / (2.0 * PI)) * az_bins as f32) as usize;
        let e = (((elevation + FRAC_PI_2) / PI) * el_bins as f32) as usize;
        counts[e.min(el_bins - 1) * az_bins + a.min(az_bins - 1)] += 1;
    }

    NormalHistogram {
        azimuth_bins: az_bins,
        elevation_bins: el_bins,
        counts,
    }
}

fn distance_histogram(depth: &DepthImage, max_depth: f32) -> DistanceHistogram {
    let bins = histogram::DISTANCE_BINS;
    let mut counts = vec![0u32; bins];
    for &d in depth.meters.iter().filter(|d| **d > 0.0) {
        let bin = ((d / max_depth) * bins as f32) as usize;
        counts[bin.min(bins - 1)] += 1;
    }
    let peak = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| **c)
        .map(|(i, _)| i)
        .unwrap_or(0);
    DistanceHistogram { counts, peak }
}

impl MeshTracker for DepthTracker {
    fn submit_frame(&mut self, frame: FramePtr) {
        let mut depth = self.filtered_depth(&frame);

        self.rgb_maps.clear();
        self.vertex_maps.clear();
        self.normal_maps.clear();
        self.rgb_maps.push(rgb_map(&frame));
        for level in 1..PYRAMID_LEVELS {
            let next = downsample_rgb(&self.rgb_maps[level - 1]);
            self.rgb_maps.push(next);
        }

        for level in 0..PYRAMID_LEVELS {
            if level > 0 {
                depth = depth.downsample();
            }
            let vmap = vertex_map(&depth, &frame.intrinsics.at_level(level));
            let nmap = normal_map(&vmap, self.options.normal_mode);
            if level == 0 {
                self.normal_histogram = Some(normal_histogram(&nmap));
                self.distance_histograms = vec![distance_histogram(&depth, self.options.max_depth)];
            }
            self.vertex_maps.push(vmap);
            self.normal_maps.push(nmap);
        }

        self.frames_processed += 1;
        trace!(
            timestamp = frame.timestamp,
            frames = self.frames_processed,
            "Tracker processed frame"
        );
    }

    fn set_options(&mut self, options: &PipelineOptions) {
        self.options = *options;
    }

    fn rgb_map(&self, level: usize) -> Option<&FloatMap> {
        self.rgb_maps.get(level)
    }

    fn vertex_map(&self, level: usize) -> Option<&FloatMap> {
        self.vertex_maps.get(level)
    }

    fn normal_map(&self, level: usize) -> Option<&FloatMap> {
        self.normal_maps.get(level)
    }

    fn normal_histogram(&self) -> Option<&NormalHistogram> {
        self.normal_histogram.as_ref()
    }

    fn distance_histograms(&self) -> &[DistanceHistogram] {
        &self.distance_histograms
    }

    fn normal_segments(&self) -> Option<&LabelMap> {
        None
    }

    fn final_segments(&self) -> Option<&LabelMap> {
        None
    }

    fn distance_segments(&self) -> Option<&FloatMap> {
        None
    }

    fn plane_projection(&self, _plane: usize) -> Option<&PlaneProjection> {
        None
    }

    fn quadtree_meshes(&self) -> &[QuadTreeMesh] {
        &[]
    }

    fn plane_count(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RgbdFrame;
    use std::sync::Arc;

    fn flat_frame(res: Resolution, mm: u16) -> FramePtr {
        let pixels = res.pixel_count();
        Arc::new(
            RgbdFrame::new(
                res,
                Intrinsics::kinect(res),
                vec![0; pixels * 3],
                vec![mm; pixels],
                7,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_pyramid_levels() {
        let mut tracker = DepthTracker::new(PipelineOptions::default());
        tracker.submit_frame(flat_frame(Resolution::new(64, 48), 2000));

        assert_eq!(tracker.vertex_map(0).unwrap().resolution, Resolution::new(64, 48));
        assert_eq!(tracker.vertex_map(1).unwrap().resolution, Resolution::new(32, 24));
        assert_eq!(tracker.normal_map(2).unwrap().resolution, Resolution::new(16, 12));
        assert_eq!(tracker.rgb_map(2).unwrap().resolution, Resolution::new(16, 12));
        assert!(tracker.vertex_map(PYRAMID_LEVELS).is_none());
    }

    #[test]
    fn test_flat_wall_normals_face_camera() {
        for mode in [NormalMode::Simple, NormalMode::AverageGradient] {
            let options = PipelineOptions {
                normal_mode: mode,
                filter_mode: FilterMode::None,
                ..Default::default()
            };
            let mut tracker = DepthTracker::new(options);
            tracker.submit_frame(flat_frame(Resolution::new(16, 16), 1500));

            let n = tracker.normal_map(0).unwrap().data[8 * 16 + 8];
            assert!(n[3] > 0.0, "{:?} produced no normal", mode);
            assert!(n[2] < -0.99, "{:?} normal {:?}", mode, n);
        }
    }

    #[test]
    fn test_invalid_depth_has_no_vertex() {
        let mut tracker = DepthTracker::new(PipelineOptions::default());
        tracker.submit_frame(flat_frame(Resolution::new(8, 8), 0));
        assert!(tracker.vertex_map(0).unwrap().data.iter().all(|v| v[3] == 0.0));
        assert_eq!(tracker.distance_histograms()[0].counts.iter().sum::<u32>(), 0);
    }

    #[test]
    fn test_distance_histogram_peak() {
        let options = PipelineOptions {
            max_depth: 4.0,
            ..Default::default()
        };
        let mut tracker = DepthTracker::new(options);
        tracker.submit_frame(flat_frame(Resolution::new(8, 8), 2000));

        let hist = &tracker.distance_histograms()[0];
        assert_eq!(hist.peak, histogram::DISTANCE_BINS / 2);
        assert_eq!(hist.counts[hist.peak], 64);
    }

    #[test]
    fn test_max_depth_cutoff() {
        let options = PipelineOptions {
            max_depth: 1.0,
            ..Default::default()
        };
        let mut tracker = DepthTracker::new(options);
        tracker.submit_frame(flat_frame(Resolution::new(8, 8), 2000));
        assert!(tracker.vertex_map(0).unwrap().data.iter().all(|v| v[3] == 0.0));
    }
}
