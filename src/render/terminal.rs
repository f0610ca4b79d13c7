use crossterm::{
    cursor,
    style::{Color, SetBackgroundColor, SetForegroundColor},
    Command,
};
use rayon::prelude::*;
use std::io::{self, Write};

use super::hud::{self, HudState};
use super::{check_counts, rgb_to_ansi256, DrawTarget, Frame, RenderError, HALF_BLOCK};

/// Sprite falloff: `exp(-d² · 32.4)` with `d` measured in sprite-UV units
/// from the quad center.
pub const SPRITE_FALLOFF: f32 = 32.4;
/// Sprites smaller than this (in pixels) are widened to it with their alpha
/// scaled down by the lost area.
const MIN_SPRITE_RADIUS: f32 = 0.5;
const MIN_CONTRIBUTION: f32 = 1.0 / 512.0;
const GAMMA: f32 = 1.0 / 2.2;

/// One sprite after projection, in draw order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSprite {
    pub x: f32,
    pub y: f32,
    /// Half extent of the sprite quad in pixels.
    pub radius: f32,
    pub color: [f32; 3],
    pub alpha: f32,
}

/// Projects particles in the frame's draw order. Order is preserved, so the
/// output list is still back-to-front.
pub fn project_sprites(frame: &Frame<'_>, width: usize, height: usize, out: &mut Vec<ScreenSprite>) {
    out.clear();
    if width == 0 || height == 0 {
        return;
    }
    let camera = frame.camera;
    let (fx, fy) = camera.focal_lengths(width, height);
    let half_w = width as f32 * 0.5;
    let half_h = height as f32 * 0.5;
    let max_radius = width.max(height) as f32;

    for &id in frame.order {
        let id = id as usize;
        let record = &frame.positions[id];
        let color = frame.colors[id];
        if record.scale <= 0.0 || color[3] <= 0.0 {
            continue;
        }

        let world = record.position();
        let view = camera.world_to_view(world);
        if view.z < camera.near || view.z > camera.far {
            continue;
        }
        let inv_z = 1.0 / view.z;
        let x = half_w + view.x * fx * inv_z;
        let y = half_h - view.y * fy * inv_z;
        let mut radius = 0.5 * record.scale * fy * inv_z;
        if !x.is_finite() || !y.is_finite() || !radius.is_finite() {
            continue;
        }

        // Fades sprites the camera is flying through.
        let near_fade = (world.distance(camera.position) / record.scale).clamp(0.0, 1.0);
        let mut alpha = color[3] * near_fade;
        if radius < MIN_SPRITE_RADIUS {
            let coverage = radius / MIN_SPRITE_RADIUS;
            alpha *= coverage * coverage;
            radius = MIN_SPRITE_RADIUS;
        }
        radius = radius.min(max_radius);
        if alpha < MIN_CONTRIBUTION {
            continue;
        }
        if x + radius < 0.0 || x - radius > width as f32 || y + radius < 0.0 || y - radius > height as f32 {
            continue;
        }

        out.push(ScreenSprite {
            x,
            y,
            radius,
            color: [color[0], color[1], color[2]],
            alpha: alpha.min(1.0),
        });
    }
}

/// Over-composites `sprites` (back-to-front) into an HDR framebuffer,
/// row-banded across the rayon pool. Each band sees sprites in list order.
pub fn composite_sprites(sprites: &[ScreenSprite], hdr: &mut [[f32; 3]], width: usize, height: usize) {
    if width == 0 || height == 0 || sprites.is_empty() {
        return;
    }

    let num_bands = rayon::current_num_threads().max(1);
    let band_height = height.div_ceil(num_bands);
    let actual_bands = height.div_ceil(band_height);

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); actual_bands];
    for (si, sprite) in sprites.iter().enumerate() {
        let min_y = (sprite.y - sprite.radius).floor().max(0.0) as usize;
        let max_y = (sprite.y + sprite.radius)
            .ceil()
            .min(height.saturating_sub(1) as f32) as usize;
        let band_start = (min_y / band_height).min(actual_bands - 1);
        let band_end = (max_y / band_height).min(actual_bands - 1);
        for bin in &mut bins[band_start..=band_end] {
            bin.push(si);
        }
    }

    hdr.par_chunks_mut(band_height * width)
        .zip(bins.par_iter())
        .enumerate()
        .for_each(|(band_idx, (band, bin))| {
            let y_start = band_idx * band_height;
            let y_end = y_start + band.len() / width;

            for &si in bin {
                let sprite = &sprites[si];
                let min_x = (sprite.x - sprite.radius).floor().max(0.0) as usize;
                let max_x = (sprite.x + sprite.radius)
                    .ceil()
                    .min(width.saturating_sub(1) as f32) as usize;
                let min_y = (sprite.y - sprite.radius).floor().max(y_start as f32) as usize;
                let max_y = (sprite.y + sprite.radius).ceil().min((y_end - 1) as f32) as usize;
                if min_x > max_x || min_y > max_y {
                    continue;
                }

                let inv_diameter = 1.0 / (2.0 * sprite.radius);
                for y in min_y..=max_y {
                    let v = (y as f32 + 0.5 - sprite.y) * inv_diameter;
                    let row = (y - y_start) * width;
                    for x in min_x..=max_x {
                        let u = (x as f32 + 0.5 - sprite.x) * inv_diameter;
                        if u.abs() > 0.5 || v.abs() > 0.5 {
                            continue;
                        }
                        let alpha = sprite.alpha * (-(u * u + v * v) * SPRITE_FALLOFF).exp();
                        if alpha < MIN_CONTRIBUTION {
                            continue;
                        }
                        let pixel = &mut band[row + x];
                        for c in 0..3 {
                            pixel[c] = sprite.color[c] * alpha + pixel[c] * (1.0 - alpha);
                        }
                    }
                }
            }
        });
}

#[inline]
pub fn tone_map(value: f32) -> u8 {
    (value.clamp(0.0, 1.0).powf(GAMMA) * 255.0 + 0.5) as u8
}

fn write_ansi_command(buf: &mut String, command: impl Command) -> io::Result<()> {
    command
        .write_ansi(buf)
        .map_err(|_| io::Error::other("failed to encode ANSI command"))
}

/// Halfblock renderer: two framebuffer rows per terminal cell, top pixel as
/// background and bottom pixel as the lower-half-block foreground.
pub struct TerminalTarget<W: Write> {
    out: W,
    cols: usize,
    rows: usize,
    pub use_truecolor: bool,
    pub hud: HudState,
    sprites: Vec<ScreenSprite>,
    hdr: Vec<[f32; 3]>,
    row_buf: String,
}

impl<W: Write> TerminalTarget<W> {
    pub fn new(out: W, cols: u16, rows: u16, use_truecolor: bool, hud: HudState) -> Self {
        let mut target = Self {
            out,
            cols: 0,
            rows: 0,
            use_truecolor,
            hud,
            sprites: Vec::new(),
            hdr: Vec::new(),
            row_buf: String::new(),
        };
        target.resize(cols, rows);
        target
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;
        if cols == self.cols && rows == self.rows {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        self.hdr.resize(cols * rows * 2, [0.0; 3]);
        self.row_buf = String::with_capacity(cols * 40 + 32);
    }

    pub fn pixel_size(&self) -> (usize, usize) {
        (self.cols, self.rows * 2)
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    fn color(&self, rgb: [u8; 3]) -> Color {
        if self.use_truecolor {
            Color::Rgb {
                r: rgb[0],
                g: rgb[1],
                b: rgb[2],
            }
        } else {
            Color::AnsiValue(rgb_to_ansi256(rgb[0], rgb[1], rgb[2]))
        }
    }

    fn emit_rows(&mut self) -> io::Result<()> {
        let width = self.cols;
        let mut row_buf = std::mem::take(&mut self.row_buf);
        let mut last_bg: Option<[u8; 3]> = None;
        let mut last_fg: Option<[u8; 3]> = None;

        for term_row in 0..self.rows {
            if hud::is_hud_overlay_row(self.hud.show, term_row, self.rows) {
                last_bg = None;
                last_fg = None;
                continue;
            }

            row_buf.clear();
            write_ansi_command(&mut row_buf, cursor::MoveTo(0, term_row as u16))?;
            let top_row = term_row * 2 * width;
            let bottom_row = top_row + width;
            for x in 0..width {
                let top = self.hdr[top_row + x].map(tone_map);
                let bottom = self.hdr[bottom_row + x].map(tone_map);

                if last_bg != Some(top) {
                    write_ansi_command(&mut row_buf, SetBackgroundColor(self.color(top)))?;
                    last_bg = Some(top);
                }
                if last_fg != Some(bottom) {
                    write_ansi_command(&mut row_buf, SetForegroundColor(self.color(bottom)))?;
                    last_fg = Some(bottom);
                }
                row_buf.push(HALF_BLOCK);
            }
            self.out.write_all(row_buf.as_bytes())?;
        }

        self.row_buf = row_buf;
        Ok(())
    }
}

impl<W: Write> DrawTarget for TerminalTarget<W> {
    fn draw(&mut self, frame: &Frame<'_>) -> Result<(), RenderError> {
        check_counts(frame)?;
        let (width, height) = self.pixel_size();

        project_sprites(frame, width, height, &mut self.sprites);
        self.hdr.fill([0.0; 3]);
        composite_sprites(&self.sprites, &mut self.hdr, width, height);

        self.emit_rows()?;
        if self.hud.show {
            hud::draw_hud(
                &mut self.hud,
                frame.stats,
                frame.camera,
                self.cols as u16,
                self.rows as u16,
                self.use_truecolor,
                &mut self.out,
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}
