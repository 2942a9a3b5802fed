//! Dominant-color extraction over a fixed-size sampling grid
//!
//! Regions are first reduced to a `working_size`×`working_size` grid by
//! nearest-neighbour sampling, so the cost per region does not depend on the
//! frame resolution. Two strategies are available:
//!
//! * [`ColorStrategy::Frequency`] counts exact samples on the grid. Equal
//!   counts are ordered by ascending (r, g, b).
//! * [`ColorStrategy::KMeans`] runs Lloyd's algorithm seeded with the most
//!   frequent samples. Centroids are ordered by population, then by cluster
//!   index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ColorSample;
use crate::capture::Frame;
use crate::detect::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorStrategy {
    Frequency,
    KMeans,
}

#[derive(Debug, Clone)]
pub struct ColorExtractor {
    strategy: ColorStrategy,
    working_size: u32,
    max_iterations: usize,
}

impl Default for ColorExtractor {
    fn default() -> Self {
        Self::new(ColorStrategy::Frequency, 100, 10)
    }
}

impl ColorExtractor {
    pub fn new(strategy: ColorStrategy, working_size: u32, max_iterations: usize) -> Self {
        Self {
            strategy,
            working_size: working_size.clamp(1, crate::MAX_WORKING_SIZE),
            max_iterations,
        }
    }

    pub fn strategy(&self) -> ColorStrategy {
        self.strategy
    }

    /// Up to `k` dominant colors of `region`, most prevalent first.
    ///
    /// A region with no pixels inside the frame yields `k` copies of
    /// [`ColorSample::WHITE`]; that sentinel carries no information.
    pub fn top_colors(&self, frame: &Frame, region: Region, k: usize) -> Vec<ColorSample> {
        let Some(region) = region.clip(frame.width(), frame.height()) else {
            return vec![ColorSample::WHITE; k];
        };
        if k == 0 {
            return Vec::new();
        }

        let histogram = self.histogram(frame, region);
        match self.strategy {
            ColorStrategy::Frequency => histogram.into_iter().take(k).map(|(c, _)| c).collect(),
            ColorStrategy::KMeans => kmeans(&histogram, k, self.max_iterations),
        }
    }

    /// Distinct samples on the working grid with their counts, most frequent
    /// first
    fn histogram(&self, frame: &Frame, region: Region) -> Vec<(ColorSample, u32)> {
        let n = self.working_size as u64;
        let (x0, y0) = (region.x1 as u64, region.y1 as u64);
        let (w, h) = (region.width() as u64, region.height() as u64);

        let mut counts: HashMap<ColorSample, u32> = HashMap::new();
        for gy in 0..n {
            // Cell centre, mapped back into the region
            let y = y0 + (2 * gy + 1) * h / (2 * n);
            for gx in 0..n {
                let x = x0 + (2 * gx + 1) * w / (2 * n);
                *counts.entry(frame.sample(x as u32, y as u32)).or_insert(0) += 1;
            }
        }

        let mut histogram: Vec<_> = counts.into_iter().collect();
        histogram.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        histogram
    }
}

fn kmeans(histogram: &[(ColorSample, u32)], k: usize, max_iterations: usize) -> Vec<ColorSample> {
    let mut centroids: Vec<[f32; 3]> = histogram
        .iter()
        .take(k)
        .map(|(c, _)| c.0.map(f32::from))
        .collect();
    let mut assignment = vec![usize::MAX; histogram.len()];
    let mut population = vec![0u64; centroids.len()];

    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (slot, (color, _)) in assignment.iter_mut().zip(histogram) {
            let nearest = nearest_centroid(&centroids, color.0.map(f32::from));
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }

        let mut sums = vec![[0f64; 3]; centroids.len()];
        population.iter_mut().for_each(|p| *p = 0);
        for (&cluster, (color, count)) in assignment.iter().zip(histogram) {
            let weight = *count as u64;
            population[cluster] += weight;
            for (sum, channel) in sums[cluster].iter_mut().zip(color.0) {
                *sum += channel as f64 * weight as f64;
            }
        }
        for ((centroid, sum), &pop) in centroids.iter_mut().zip(&sums).zip(&population) {
            if pop > 0 {
                *centroid = sum.map(|s| (s / pop as f64) as f32);
            }
        }

        if !changed {
            break;
        }
    }

    let mut order: Vec<usize> = (0..centroids.len()).filter(|&i| population[i] > 0).collect();
    order.sort_by(|&a, &b| population[b].cmp(&population[a]).then(a.cmp(&b)));
    order
        .into_iter()
        .map(|i| {
            let [r, g, b] = centroids[i];
            ColorSample::from_f32(r, g, b)
        })
        .collect()
}

fn nearest_centroid(centroids: &[[f32; 3]], point: [f32; 3]) -> usize {
    let mut best = (0, f32::INFINITY);
    for (i, centroid) in centroids.iter().enumerate() {
        let d: f32 = centroid
            .iter()
            .zip(point)
            .map(|(c, p)| (c - p) * (c - p))
            .sum();
        if d < best.1 {
            best = (i, d);
        }
    }
    best.0
}
