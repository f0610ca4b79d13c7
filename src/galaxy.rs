use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

use glam::Vec3;

use crate::particle::{ParticleField, StateRecord};

/// World-space width of the disc the source image is stretched over.
pub const GALAXY_EXTENT: f32 = 500.0;

#[derive(Debug, Clone)]
pub struct GalaxyParams {
    pub count: usize,
    pub seed: u64,
    /// Side length of the procedural source image.
    pub image_size: usize,
    pub arms: u32,
}

impl Default for GalaxyParams {
    fn default() -> Self {
        Self {
            count: 1_000_000,
            seed: 0x5747_4152,
            image_size: 512,
            arms: 2,
        }
    }
}

/// Linear RGB image the particle field is sampled from.
#[derive(Debug, Clone)]
pub struct SourceImage {
    width: usize,
    height: usize,
    pixels: Vec<[f32; 3]>,
}

impl SourceImage {
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<[f32; 3]>) -> Result<Self, String> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return Err(format!(
                "source image {width}x{height} needs {} pixels, got {}",
                width * height,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Face-on barred-free spiral: bright warm core, bluish logarithmic arms
    /// and a faint disc, dark outside the unit circle.
    pub fn spiral(size: usize, arms: u32) -> Self {
        let size = size.max(2);
        let core_color = [1.0, 0.85, 0.6];
        let arm_color = [0.55, 0.7, 1.0];
        let arms = arms.max(1) as f32;

        let pixels = (0..size * size)
            .map(|index| {
                let u = (index % size) as f32 / (size - 1) as f32 * 2.0 - 1.0;
                let v = (index / size) as f32 / (size - 1) as f32 * 2.0 - 1.0;
                let r = (u * u + v * v).sqrt();
                let theta = v.atan2(u);

                let disc = (-r / 0.35).exp() * (1.0 - r).clamp(0.0, 1.0);
                let phase = arms * theta - 4.0 * PI * r;
                let arm = ((phase.cos() + 1.0) * 0.5).powi(4);
                let core = (-r * r / 0.012).exp();
                let brightness = (core + disc * (0.1 + 0.9 * arm)).min(1.0);

                let mix = (r * 2.5).clamp(0.0, 1.0);
                let mut rgb = [0.0; 3];
                for c in 0..3 {
                    rgb[c] = (core_color[c] * (1.0 - mix) + arm_color[c] * mix) * brightness;
                }
                rgb
            })
            .collect();

        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
        self.pixels[y * self.width + x]
    }
}

/// Picks pixels with probability proportional to `max(r, g, b)³`.
#[derive(Debug, Clone)]
pub struct LuminanceSampler {
    prefix: Vec<f64>,
    total: f64,
}

impl LuminanceSampler {
    pub fn new(image: &SourceImage) -> Self {
        let mut running = 0.0f64;
        let prefix = image
            .pixels
            .iter()
            .map(|&[r, g, b]| {
                running += f64::from(r.max(g).max(b)).powi(3);
                running
            })
            .collect();
        Self {
            prefix,
            total: running,
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Pixel index for a uniform draw `u` in `[0, 1)`: the first pixel whose
    /// running sum exceeds `u · total`.
    pub fn sample(&self, u: f64) -> usize {
        let threshold = u * self.total;
        let index = self.prefix.partition_point(|&sum| sum <= threshold);
        index.min(self.prefix.len().saturating_sub(1))
    }
}

/// Spectral class tint for a star of the given sprite scale. Larger stars
/// are hotter and bluer.
pub fn star_color(scale: f32) -> [f32; 3] {
    match scale {
        s if s < 0.075 => [1.5, 1.0, 1.0],  // M
        s if s < 0.125 => [2.0, 1.7, 1.1],  // K
        s if s < 0.2 => [2.3, 1.7, 1.2],    // G
        s if s < 0.35 => [2.5, 2.5, 2.0],   // F
        s if s < 0.5 => [2.5, 2.5, 2.5],    // A
        s if s < 0.625 => [2.5, 2.5, 3.0],  // B
        _ => [2.5, 2.5, 4.0],               // O
    }
}

/// Samples `params.count` particles from `image`. The first half are broad,
/// faint glow sprites carrying the image color; the second half are small
/// stars tinted by spectral class.
pub fn sample_field(image: &SourceImage, params: &GalaxyParams) -> Result<ParticleField, String> {
    let sampler = LuminanceSampler::new(image);
    if sampler.total() <= 0.0 && params.count > 0 {
        return Err("source image is completely dark; nothing to sample".to_string());
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let glow_count = params.count / 2;
    let mut records = Vec::with_capacity(params.count);
    let mut colors = Vec::with_capacity(params.count);

    for i in 0..params.count {
        let pixel = sampler.sample(rng.random::<f64>());
        let x = pixel % image.width;
        let y = pixel / image.width;

        let position = Vec3::new(
            (x as f32 / image.width as f32 - 0.5) * GALAXY_EXTENT + rng.random::<f32>() - 0.5,
            rng.random::<f32>() - 0.5,
            (y as f32 / image.height as f32 - 0.5) * GALAXY_EXTENT + rng.random::<f32>() - 0.5,
        );

        if i < glow_count {
            let [r, g, b] = image.pixel(x, y);
            let scale = 2.0 + 10.0 * rng.random::<f32>().powi(10);
            records.push(StateRecord::new(position, scale));
            colors.push([r, g, b, r.max(g).max(b) * 0.1]);
        } else {
            let scale =
                0.05 + 0.05 * rng.random::<f32>() + 0.6 * rng.random::<f32>().powi(10);
            let variation = 1.0 + 0.5 * (rng.random::<f32>() - 0.5);
            let [r, g, b] = star_color(scale);
            records.push(StateRecord::new(position, scale));
            colors.push([r * variation, g * variation, b * variation, 1.0]);
        }
    }

    ParticleField::new(records, colors)
}

/// Builds the procedural source image and samples a field from it.
pub fn generate(params: &GalaxyParams) -> Result<ParticleField, String> {
    let image = SourceImage::spiral(params.image_size, params.arms);
    let field = sample_field(&image, params)?;
    log::info!(
        "sampled {} particles (seed {:#x}) from a {}x{} spiral into a {}x{} state store",
        field.count(),
        params.seed,
        image.width(),
        image.height(),
        field.side(),
        field.side()
    );
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(count: usize) -> GalaxyParams {
        GalaxyParams {
            count,
            image_size: 64,
            ..GalaxyParams::default()
        }
    }

    #[test]
    fn sampler_skips_dark_pixels() {
        let mut pixels = vec![[0.0; 3]; 9];
        pixels[4] = [1.0, 0.2, 0.2];
        let image = SourceImage::from_pixels(3, 3, pixels).expect("image");
        let sampler = LuminanceSampler::new(&image);

        for u in [0.0, 0.25, 0.5, 0.999] {
            assert_eq!(sampler.sample(u), 4);
        }
    }

    #[test]
    fn sampler_weights_by_cubed_luminance() {
        // Luminances 0.5 and 1.0 cube to 0.125 and 1.0.
        let image =
            SourceImage::from_pixels(2, 1, vec![[0.5, 0.0, 0.0], [0.0, 0.0, 1.0]]).expect("image");
        let sampler = LuminanceSampler::new(&image);
        assert!((sampler.total() - 1.125).abs() < 1e-9);
        assert_eq!(sampler.sample(0.1), 0);
        assert_eq!(sampler.sample(0.12), 1);
        assert_eq!(sampler.sample(0.9), 1);
    }

    #[test]
    fn star_colors_follow_spectral_thresholds() {
        assert_eq!(star_color(0.06), [1.5, 1.0, 1.0]);
        assert_eq!(star_color(0.1), [2.0, 1.7, 1.1]);
        assert_eq!(star_color(0.3), [2.5, 2.5, 2.0]);
        assert_eq!(star_color(0.7), [2.5, 2.5, 4.0]);
    }

    #[test]
    fn field_halves_are_glow_then_stars() {
        let field = generate(&params(1000)).expect("field");
        assert_eq!(field.count(), 1000);

        let records = &field.initial_state()[..1000];
        let colors = field.colors();
        for (record, color) in records[..500].iter().zip(&colors[..500]) {
            assert!((2.0..=12.0).contains(&record.scale));
            assert!(color[3] <= 0.1 + 1e-6);
        }
        for (record, color) in records[500..].iter().zip(&colors[500..]) {
            assert!((0.05..=0.7).contains(&record.scale));
            assert_eq!(color[3], 1.0);
        }
    }

    #[test]
    fn positions_stay_inside_the_disc() {
        let field = generate(&params(2000)).expect("field");
        let bound = GALAXY_EXTENT * 0.5 + 1.0;
        for record in &field.initial_state()[..2000] {
            let [x, y, z] = record.position;
            assert!(x.abs() <= bound && z.abs() <= bound);
            assert!(y.abs() <= 0.5);
        }
    }

    #[test]
    fn same_seed_same_field() {
        let a = generate(&params(300)).expect("a");
        let b = generate(&params(300)).expect("b");
        assert_eq!(a.initial_state(), b.initial_state());
        assert_eq!(a.colors(), b.colors());

        let other = generate(&GalaxyParams {
            seed: 7,
            ..params(300)
        })
        .expect("other");
        assert_ne!(a.initial_state(), other.initial_state());
    }

    #[test]
    fn dark_image_is_an_error() {
        let image = SourceImage::from_pixels(2, 2, vec![[0.0; 3]; 4]).expect("image");
        assert!(sample_field(&image, &params(10)).is_err());
        assert!(SourceImage::from_pixels(2, 2, vec![[0.0; 3]; 3]).is_err());
    }

    #[test]
    fn spiral_is_brightest_at_the_core() {
        let image = SourceImage::spiral(65, 2);
        let [r, g, b] = image.pixel(32, 32);
        let corner = image.pixel(0, 0);
        assert!(r.max(g).max(b) > 0.9);
        assert_eq!(corner, [0.0; 3]);
    }
}
