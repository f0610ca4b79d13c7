use crossterm::{
    cursor, queue,
    style::{Print, SetBackgroundColor, SetForegroundColor},
};
use std::fmt::Write as _;
use std::io::{self, Write};

use super::make_color;
use crate::camera::Camera;
use crate::pipeline::PipelineStats;

const CONTROLS: &str =
    "Arrows:Orbit/Tilt  +/-:Zoom  Space:Auto-orbit  Tab:HUD  R:Reset  Q/Esc:Quit";

#[derive(Debug)]
pub struct HudState {
    pub show: bool,
    pub fps: f32,
    pub device: &'static str,
    pub auto_orbit: bool,
    buf: String,
}

impl HudState {
    pub fn new(device: &'static str) -> Self {
        Self {
            show: true,
            fps: 0.0,
            device,
            auto_orbit: false,
            buf: String::with_capacity(512),
        }
    }

    /// Exponential moving average over frame times.
    pub fn record_frame(&mut self, frame_seconds: f32) {
        if frame_seconds <= 0.0 {
            return;
        }
        let instant = 1.0 / frame_seconds;
        self.fps = if self.fps == 0.0 {
            instant
        } else {
            self.fps * 0.9 + instant * 0.1
        };
    }
}

pub fn is_hud_overlay_row(show_hud: bool, row: usize, term_rows: usize) -> bool {
    show_hud && (row == 0 || row == term_rows.saturating_sub(1))
}

fn truncate_and_pad_in_place(text: &mut String, width: usize) {
    if width == 0 {
        text.clear();
        return;
    }

    let mut seen_chars = 0usize;
    let mut truncate_byte = None;
    for (idx, _) in text.char_indices() {
        if seen_chars == width {
            truncate_byte = Some(idx);
            break;
        }
        seen_chars += 1;
    }

    if let Some(idx) = truncate_byte {
        text.truncate(idx);
    } else {
        for _ in seen_chars..width {
            text.push(' ');
        }
    }
}

pub fn format_status(
    out: &mut String,
    hud: &HudState,
    stats: &PipelineStats,
    camera: &Camera,
) -> std::fmt::Result {
    out.clear();
    write!(
        out,
        "FPS:{:>5.1}  Particles:{}  Device:{}  Snapshot:{}  Sorted:{}  Lag:{}  Sort:{:>5.1}ms",
        hud.fps,
        stats.particles,
        hud.device,
        stats.snapshot_generation,
        stats.order_generation,
        stats.lag(),
        stats.last_sort_time.as_secs_f32() * 1000.0,
    )?;
    if stats.worker_restarts > 0 {
        write!(out, "  Restarts:{}", stats.worker_restarts)?;
    }
    if stats.sorts_rejected > 0 {
        write!(out, "  Rejected:{}", stats.sorts_rejected)?;
    }
    if stats.degraded {
        out.push_str("  SORT:DEGRADED");
    }
    write!(
        out,
        "  Pos:({:>6.1},{:>6.1},{:>6.1})  Orbit:{}  Cores:{}",
        camera.position.x,
        camera.position.y,
        camera.position.z,
        if hud.auto_orbit { "auto" } else { "manual" },
        rayon::current_num_threads()
    )
}

pub fn draw_hud(
    hud: &mut HudState,
    stats: &PipelineStats,
    camera: &Camera,
    cols: u16,
    rows: u16,
    use_truecolor: bool,
    stdout: &mut impl Write,
) -> io::Result<()> {
    let width = cols as usize;
    let mut line = std::mem::take(&mut hud.buf);
    format_status(&mut line, hud, stats, camera)
        .map_err(|_| io::Error::other("failed to format HUD"))?;
    truncate_and_pad_in_place(&mut line, width);

    queue!(
        stdout,
        cursor::MoveTo(0, 0),
        SetBackgroundColor(make_color(0, 0, 0, use_truecolor)),
        SetForegroundColor(make_color(245, 245, 245, use_truecolor)),
        Print(line.as_str())
    )?;

    line.clear();
    line.push_str(CONTROLS);
    truncate_and_pad_in_place(&mut line, width);
    queue!(
        stdout,
        cursor::MoveTo(0, rows.saturating_sub(1)),
        SetBackgroundColor(make_color(0, 0, 0, use_truecolor)),
        SetForegroundColor(make_color(220, 220, 220, use_truecolor)),
        Print(line.as_str())
    )?;

    hud.buf = line;
    Ok(())
}
