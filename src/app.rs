use std::io::Write;
use std::time::{Duration, Instant};

use crossterm::terminal;

use crate::device::ComputeDevice;
use crate::input::thread::InputReceiver;
use crate::input::{self, ViewState};
use crate::pipeline::{FramePipeline, PipelineStats};
use crate::render::{DrawTarget, HeadlessTarget, TerminalTarget, FRAME_TARGET};

pub type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Simulated frame time for headless runs, so they are independent of how
/// fast the host happens to be.
pub const HEADLESS_FRAME: Duration = Duration::from_micros(16_666);

pub fn run_interactive<D: ComputeDevice, W: Write>(
    pipeline: &mut FramePipeline<D>,
    view: &mut ViewState,
    target: &mut TerminalTarget<W>,
    input_rx: &InputReceiver,
) -> AppResult<()> {
    let mut last_frame_time = Instant::now();
    loop {
        let frame_start = Instant::now();

        // Drain all pending input events -- never skip
        if input::drain_input_events(view, input_rx)? {
            break;
        }

        let now = Instant::now();
        let delta = now.duration_since(last_frame_time);
        last_frame_time = now;
        view.advance(delta.as_secs_f32());

        pipeline.tick(delta, view.camera.position)?;

        let (cols, rows) = terminal::size()?;
        target.resize(cols, rows);
        target.hud.show = view.show_hud;
        target.hud.auto_orbit = view.auto_orbit;
        target.hud.record_frame(delta.as_secs_f32());
        target.draw(&pipeline.frame(&view.camera))?;

        let spent = frame_start.elapsed();
        if spent < FRAME_TARGET {
            std::thread::sleep(FRAME_TARGET - spent);
        }
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct HeadlessSummary {
    pub draws: u64,
    pub particles_drawn: u64,
    pub order_changes: u64,
    pub stats: PipelineStats,
}

/// Runs `frames` ticks against a validating target with the camera
/// auto-orbiting, then logs what the pipeline did.
pub fn run_headless<D: ComputeDevice>(
    pipeline: &mut FramePipeline<D>,
    view: &mut ViewState,
    frames: u64,
) -> AppResult<HeadlessSummary> {
    let mut target = HeadlessTarget::new();
    view.auto_orbit = true;
    let started = Instant::now();

    for _ in 0..frames {
        view.advance(HEADLESS_FRAME.as_secs_f32());
        let report = pipeline.tick(HEADLESS_FRAME, view.camera.position)?;
        if report.order_advanced {
            log::debug!(
                "frame {}: bound order generation {}",
                pipeline.stats().frames,
                pipeline.stats().order_generation
            );
        }
        target.draw(&pipeline.frame(&view.camera))?;
    }

    let stats = pipeline.stats().clone();
    log::info!(
        "headless run: {} frames ({} sprites) in {:.2?}, {} readbacks, {} sorts ({} rejected), {} order changes, final lag {}, {} worker restarts{}",
        stats.frames,
        target.particles_drawn,
        started.elapsed(),
        stats.readbacks_completed,
        stats.sorts_completed,
        stats.sorts_rejected,
        target.order_changes,
        stats.lag(),
        stats.worker_restarts,
        if stats.degraded { ", sorting degraded" } else { "" }
    );

    Ok(HeadlessSummary {
        draws: target.draws,
        particles_drawn: target.particles_drawn,
        order_changes: target.order_changes,
        stats,
    })
}

/// Message for the user once the terminal is restored, if the session ran
/// in a reduced mode they would not otherwise learn about.
pub fn exit_notice(stats: &PipelineStats) -> Option<String> {
    stats.degraded.then(|| {
        format!(
            "depth sorting was disabled after {} sort worker failures",
            stats.worker_restarts
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::device::testing::ScriptedDevice;
    use crate::device::FenceStatus;
    use crate::galaxy::{self, GalaxyParams};
    use crate::pipeline::{PipelineConfig, PipelineError};

    fn small_galaxy() -> crate::particle::ParticleField {
        galaxy::generate(&GalaxyParams {
            count: 2_000,
            image_size: 64,
            ..GalaxyParams::default()
        })
        .expect("galaxy")
    }

    #[test]
    fn headless_run_draws_every_frame() {
        let field = small_galaxy();
        let device = SoftwareDevice::new(&field).expect("device");
        let mut pipeline = FramePipeline::new(device, &field, PipelineConfig::default())
            .expect("pipeline");
        let mut view = ViewState::new(false);

        let summary = run_headless(&mut pipeline, &mut view, 40).expect("headless run");
        assert_eq!(summary.draws, 40);
        assert_eq!(summary.particles_drawn, 40 * 2_000);
        assert_eq!(summary.stats.frames, 40);
        assert!(summary.stats.order_generation <= summary.stats.snapshot_generation);
        assert!(view.auto_orbit);

        pipeline.shutdown().expect("shutdown");
    }

    #[test]
    fn headless_run_stops_on_device_fault() {
        let field = small_galaxy();
        let device = ScriptedDevice::new(field.count());
        device.script_fence(&[FenceStatus::Pending, FenceStatus::Failed]);
        let mut pipeline = FramePipeline::new(device, &field, PipelineConfig::default())
            .expect("pipeline");
        let mut view = ViewState::new(false);

        let err = run_headless(&mut pipeline, &mut view, 10).expect_err("fault must stop the run");
        let pipeline_err = err
            .downcast_ref::<PipelineError>()
            .expect("pipeline error");
        assert!(matches!(pipeline_err, PipelineError::Device(_)));
        assert!(pipeline.is_halted());
    }

    #[test]
    fn exit_notice_only_for_degraded_sessions() {
        let mut stats = PipelineStats {
            worker_restarts: 2,
            ..PipelineStats::default()
        };
        assert_eq!(exit_notice(&stats), None);

        stats.degraded = true;
        let notice = exit_notice(&stats).expect("degraded session has a notice");
        assert!(notice.contains("depth sorting was disabled"));
        assert!(notice.contains("2 sort worker failures"));
    }
}
