//! Image comparison with three independent similarity metrics.
//!
//! - **MSE**: mean squared difference over every sample, 0 for identical images
//! - **SSIM**: structural similarity over a 7×7 uniform window, per channel,
//!   averaged across channels; 1 only for identical images
//! - **Match**: zero-mean normalised cross-correlation peak of the second image
//!   slid over the first; images taller than 300 px are scaled down first
//!
//! The diff image (|B − A| per channel) is for inspection only and never
//! feeds the pass/fail decision.

use crate::result::{ParityError, ParityResult};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// SSIM window side length
pub const SSIM_WINDOW: usize = 7;

/// Images taller than this are downscaled before template matching
pub const MATCH_MAX_HEIGHT: u32 = 300;

const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Acceptance thresholds for one test case
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum SSIM
    pub ssim: f64,
    /// Maximum MSE
    pub mse: f64,
    /// Minimum template match
    #[serde(rename = "match")]
    pub template_match: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ssim: 0.6,
            mse: 500.0,
            template_match: 0.5,
        }
    }
}

impl Thresholds {
    /// Pass iff every metric is within its threshold
    #[must_use]
    pub fn accepts(&self, score: &ComparisonScore) -> bool {
        score.ssim >= self.ssim
            && score.mse <= self.mse
            && score.template_match >= self.template_match
    }

    /// Describe every metric that is out of range
    #[must_use]
    #[allow(clippy::neg_cmp_op_on_partial_ord)] // NaN scores must count as violations
    pub fn violations(&self, score: &ComparisonScore) -> Vec<String> {
        let mut out = Vec::new();
        if !(score.ssim >= self.ssim) {
            out.push(format!("ssim {:.4} < {}", score.ssim, self.ssim));
        }
        if !(score.mse <= self.mse) {
            out.push(format!("mse {:.4} > {}", score.mse, self.mse));
        }
        if !(score.template_match >= self.template_match) {
            out.push(format!(
                "match {:.4} < {}",
                score.template_match, self.template_match
            ));
        }
        out
    }
}

/// Similarity scores for one image pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonScore {
    /// Structural similarity, in [-1, 1]
    pub ssim: f64,
    /// Mean squared error, >= 0
    pub mse: f64,
    /// Normalised cross-correlation peak, in [-1, 1]
    #[serde(rename = "match")]
    pub template_match: f64,
}

/// Resolution at which template matching ran
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchScale {
    /// Original size
    Full,
    /// Both images resized by `factor`
    Downscaled {
        /// Scale factor (`300 / height`)
        factor: f64,
        /// Resized width
        width: u32,
        /// Resized height
        height: u32,
    },
}

impl MatchScale {
    /// Pick the scale for an image of the given size
    #[must_use]
    pub fn for_size(width: u32, height: u32) -> Self {
        if height <= MATCH_MAX_HEIGHT {
            return Self::Full;
        }
        let factor = f64::from(MATCH_MAX_HEIGHT) / f64::from(height);
        Self::Downscaled {
            factor,
            width: ((f64::from(width) * factor).round() as u32).max(1),
            height: ((f64::from(height) * factor).round() as u32).max(1),
        }
    }
}

/// Full comparison output
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Scores
    pub score: ComparisonScore,
    /// Template matching resolution
    pub scale: MatchScale,
    /// Per-channel |B − A|
    pub diff: DynamicImage,
}

/// 8-bit samples, interleaved, in the channel layout the image was decoded with
#[derive(Debug, Clone, PartialEq, Eq)]
struct Raster {
    width: usize,
    height: usize,
    channels: usize,
    samples: Vec<u8>,
}

impl Raster {
    fn from_image(img: &DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        let (channels, samples) = match img.color().channel_count() {
            1 => (1, img.to_luma8().into_raw()),
            2 => (2, img.to_luma_alpha8().into_raw()),
            3 => (3, img.to_rgb8().into_raw()),
            _ => (4, img.to_rgba8().into_raw()),
        };
        Self {
            width: width as usize,
            height: height as usize,
            channels,
            samples,
        }
    }

    fn channel(&self, c: usize) -> Vec<f64> {
        self.samples
            .iter()
            .skip(c)
            .step_by(self.channels)
            .map(|&v| f64::from(v))
            .collect()
    }

    fn sample(&self, y: usize, x: usize, c: usize) -> f64 {
        f64::from(self.samples[(y * self.width + x) * self.channels + c])
    }

    fn has_alpha(&self) -> bool {
        self.channels == 2 || self.channels == 4
    }
}

/// Computes similarity scores for pairs of rendered maps
#[derive(Debug, Clone, Default)]
pub struct ImageComparator;

impl ImageComparator {
    /// Create a comparator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compare two encoded images
    pub fn compare_bytes(&self, a: &[u8], b: &[u8]) -> ParityResult<Comparison> {
        let a = decode(a, "<first>")?;
        let b = decode(b, "<second>")?;
        self.compare(&a, &b)
    }

    /// Compare two image files and write the diff image to `diff_path`
    pub fn compare_files(
        &self,
        a: &Path,
        b: &Path,
        diff_path: Option<&Path>,
    ) -> ParityResult<Comparison> {
        let img_a = open(a)?;
        let img_b = open(b)?;
        let comparison = self.compare(&img_a, &img_b)?;
        if let Some(path) = diff_path {
            comparison
                .diff
                .save_with_format(path, ImageFormat::Png)
                .map_err(|e| ParityError::Image {
                    path: path.display().to_string(),
                    message: format!("cannot write diff image: {e}"),
                })?;
        }
        Ok(comparison)
    }

    /// Compare two decoded images
    ///
    /// # Errors
    ///
    /// Returns an error if the images differ in size or channel layout, or are
    /// smaller than the SSIM window.
    pub fn compare(&self, a: &DynamicImage, b: &DynamicImage) -> ParityResult<Comparison> {
        let ra = Raster::from_image(a);
        let rb = Raster::from_image(b);
        check_comparable(&ra, &rb)?;

        let mse = mse(&ra, &rb);
        let ssim = ssim(&ra, &rb);

        let scale = MatchScale::for_size(a.width(), a.height());
        let template_match = match scale {
            MatchScale::Full => template_match(&ra, &rb)?,
            MatchScale::Downscaled { width, height, .. } => {
                let sa = Raster::from_image(&a.resize_exact(width, height, FilterType::Triangle));
                let sb = Raster::from_image(&b.resize_exact(width, height, FilterType::Triangle));
                template_match(&sa, &sb)?
            }
        };

        let diff = diff_image(&ra, &rb)?;

        Ok(Comparison {
            score: ComparisonScore {
                ssim,
                mse,
                template_match,
            },
            scale,
            diff,
        })
    }
}

fn decode(bytes: &[u8], label: &str) -> ParityResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| ParityError::Image {
        path: label.to_string(),
        message: e.to_string(),
    })
}

fn open(path: &Path) -> ParityResult<DynamicImage> {
    image::open(path).map_err(|e| ParityError::Image {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn check_comparable(a: &Raster, b: &Raster) -> ParityResult<()> {
    if a.width != b.width || a.height != b.height {
        return Err(ParityError::comparison(format!(
            "image dimensions differ: {}x{} vs {}x{}",
            a.width, a.height, b.width, b.height
        )));
    }
    if a.channels != b.channels {
        return Err(ParityError::comparison(format!(
            "channel counts differ: {} vs {}",
            a.channels, b.channels
        )));
    }
    if a.width < SSIM_WINDOW || a.height < SSIM_WINDOW {
        return Err(ParityError::comparison(format!(
            "images are {}x{}, smaller than the {SSIM_WINDOW}x{SSIM_WINDOW} SSIM window",
            a.width, a.height
        )));
    }
    Ok(())
}

fn mse(a: &Raster, b: &Raster) -> f64 {
    if a.samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .samples
        .iter()
        .zip(&b.samples)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum();
    sum / a.samples.len() as f64
}

fn ssim(a: &Raster, b: &Raster) -> f64 {
    let total: f64 = (0..a.channels)
        .map(|c| channel_ssim(&a.channel(c), &b.channel(c), a.width, a.height))
        .sum();
    total / a.channels as f64
}

/// Summed-area table with a zero first row and column
struct Integral {
    stride: usize,
    data: Vec<f64>,
}

impl Integral {
    fn new(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = width + 1;
        let mut data = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += value(y * width + x);
                data[(y + 1) * stride + x + 1] = data[y * stride + x + 1] + row;
            }
        }
        Self { stride, data }
    }

    /// Sum over rows `y0..y1`, columns `x0..x1`
    fn sum(&self, y0: usize, x0: usize, y1: usize, x1: usize) -> f64 {
        let s = self.stride;
        self.data[y1 * s + x1] - self.data[y0 * s + x1] - self.data[y1 * s + x0]
            + self.data[y0 * s + x0]
    }
}

fn channel_ssim(x: &[f64], y: &[f64], width: usize, height: usize) -> f64 {
    let c1 = (SSIM_K1 * DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * DATA_RANGE).powi(2);
    let n = (SSIM_WINDOW * SSIM_WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let r = SSIM_WINDOW / 2;

    let sx = Integral::new(width, height, |i| x[i]);
    let sy = Integral::new(width, height, |i| y[i]);
    let sxx = Integral::new(width, height, |i| x[i] * x[i]);
    let syy = Integral::new(width, height, |i| y[i] * y[i]);
    let sxy = Integral::new(width, height, |i| x[i] * y[i]);

    let mut total = 0.0;
    let mut count = 0usize;
    for cy in r..height - r {
        for cx in r..width - r {
            let (y0, x0, y1, x1) = (cy - r, cx - r, cy + r + 1, cx + r + 1);
            let ux = sx.sum(y0, x0, y1, x1) / n;
            let uy = sy.sum(y0, x0, y1, x1) / n;
            let uxx = sxx.sum(y0, x0, y1, x1) / n;
            let uyy = syy.sum(y0, x0, y1, x1) / n;
            let uxy = sxy.sum(y0, x0, y1, x1) / n;

            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    if count == 0 {
        1.0
    } else {
        total / count as f64
    }
}

/// Peak zero-mean normalised cross-correlation of `template` over `image`
fn template_match(image: &Raster, template: &Raster) -> ParityResult<f64> {
    if template.width > image.width
        || template.height > image.height
        || template.channels != image.channels
    {
        return Err(ParityError::comparison(
            "template must fit inside the image with the same channel layout",
        ));
    }

    let n = template.samples.len() as f64;
    let t_mean = template.samples.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let t_var: f64 = template
        .samples
        .iter()
        .map(|&v| (f64::from(v) - t_mean).powi(2))
        .sum();

    let mut best = f64::NEG_INFINITY;
    for dy in 0..=image.height - template.height {
        for dx in 0..=image.width - template.width {
            best = best.max(window_correlation(image, template, dy, dx, t_mean, t_var));
        }
    }
    Ok(best)
}

fn window_correlation(
    image: &Raster,
    template: &Raster,
    dy: usize,
    dx: usize,
    t_mean: f64,
    t_var: f64,
) -> f64 {
    let c = template.channels;
    let n = template.samples.len() as f64;

    let mut sum = 0.0;
    for y in 0..template.height {
        for x in 0..template.width {
            for ch in 0..c {
                sum += image.sample(dy + y, dx + x, ch);
            }
        }
    }
    let i_mean = sum / n;

    let mut cross = 0.0;
    let mut i_var = 0.0;
    for y in 0..template.height {
        for x in 0..template.width {
            for ch in 0..c {
                let iv = image.sample(dy + y, dx + x, ch) - i_mean;
                let tv = template.sample(y, x, ch) - t_mean;
                cross += iv * tv;
                i_var += iv * iv;
            }
        }
    }

    if i_var <= f64::EPSILON || t_var <= f64::EPSILON {
        // flat window or template: only an exact match correlates
        let identical = (0..template.height).all(|y| {
            (0..template.width).all(|x| {
                (0..c).all(|ch| image.sample(dy + y, dx + x, ch) == template.sample(y, x, ch))
            })
        });
        return if identical { 1.0 } else { 0.0 };
    }

    (cross / (i_var.sqrt() * t_var.sqrt())).clamp(-1.0, 1.0)
}

fn diff_image(a: &Raster, b: &Raster) -> ParityResult<DynamicImage> {
    let alpha = a.has_alpha().then_some(a.channels - 1);
    let samples: Vec<u8> = a
        .samples
        .iter()
        .zip(&b.samples)
        .enumerate()
        .map(|(i, (&x, &y))| {
            if Some(i % a.channels) == alpha {
                u8::MAX
            } else {
                y.abs_diff(x)
            }
        })
        .collect();

    let (w, h) = (a.width as u32, a.height as u32);
    let img = match a.channels {
        1 => image::GrayImage::from_raw(w, h, samples).map(DynamicImage::ImageLuma8),
        2 => image::GrayAlphaImage::from_raw(w, h, samples).map(DynamicImage::ImageLumaA8),
        3 => image::RgbImage::from_raw(w, h, samples).map(DynamicImage::ImageRgb8),
        _ => image::RgbaImage::from_raw(w, h, samples).map(DynamicImage::ImageRgba8),
    };
    img.ok_or_else(|| ParityError::comparison("diff buffer does not match image size"))
}
