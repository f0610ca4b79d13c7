use clap::Parser;
use crossterm::terminal;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Duration;

mod app;
mod arena;
mod camera;
mod device;
mod galaxy;
mod input;
mod particle;
mod pipeline;
mod readback;
mod render;
mod simulation;
mod sort;
mod terminal_setup;

use device::software::SoftwareDevice;
use device::ComputeDevice;
use galaxy::GalaxyParams;
use input::ViewState;
use particle::ParticleField;
use pipeline::{FramePipeline, PipelineConfig};
use render::hud::HudState;
use render::TerminalTarget;
use terminal_setup::{cleanup_terminal, enter_terminal, install_panic_hook};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "stardust",
    version,
    about = "Terminal-native million-star galaxy viewer"
)]
struct Cli {
    #[arg(long, value_name = "N", default_value_t = 1_000_000, help = "Number of particles")]
    count: usize,
    #[arg(long, value_name = "SEED", help = "Galaxy seed (random if omitted)")]
    seed: Option<u64>,
    #[arg(long, help = "Run without a terminal and log a summary")]
    headless: bool,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 600,
        help = "Frames to run in headless mode"
    )]
    frames: u64,
    #[arg(long, help = "Force the software compute device")]
    cpu: bool,
    #[cfg(feature = "metal")]
    #[arg(long, help = "Force the Metal compute device", conflicts_with = "cpu")]
    metal: bool,
    #[arg(
        long,
        value_name = "N",
        default_value_t = PipelineConfig::default().max_worker_restarts,
        help = "Sort worker restarts before sorting is disabled"
    )]
    max_worker_restarts: u32,
    #[arg(
        long,
        value_name = "MS",
        default_value_t = 500,
        help = "Bound on the readback drain at shutdown"
    )]
    readback_timeout_ms: u64,
    #[arg(long, value_name = "PATH", help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,
    #[arg(long, help = "Start with the HUD hidden")]
    no_hud: bool,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_worker_restarts: self.max_worker_restarts,
            readback_timeout: Duration::from_millis(self.readback_timeout_ms),
        }
    }

    fn galaxy_params(&self) -> GalaxyParams {
        GalaxyParams {
            count: self.count,
            seed: self.seed.unwrap_or_else(rand::random),
            ..GalaxyParams::default()
        }
    }
}

fn init_logging(cli: &Cli) -> AppResult<()> {
    let default_filter = if cli.headless { "info" } else { "warn" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if let Some(path) = &cli.log_file {
        let file = File::create(path)
            .map_err(|err| format!("cannot open log file {}: {err}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init()?;
    Ok(())
}

fn detect_truecolor() -> bool {
    match std::env::var("COLORTERM") {
        Ok(val) => !val.is_empty() && (val == "truecolor" || val == "24bit"),
        Err(_) => match std::env::var("TERM_PROGRAM") {
            Ok(prog) => prog != "Apple_Terminal",
            Err(_) => match std::env::var("TERM") {
                Ok(term) => {
                    term.contains("ghostty") || term.contains("kitty") || term.contains("wezterm")
                }
                Err(_) => false,
            },
        },
    }
}

fn run<D: ComputeDevice>(device: D, field: &ParticleField, cli: &Cli) -> AppResult<()> {
    let device_name = device.name();
    let mut pipeline = FramePipeline::new(device, field, cli.pipeline_config())?;
    let mut view = ViewState::new(!cli.no_hud);

    if cli.headless {
        let run_result = app::run_headless(&mut pipeline, &mut view, cli.frames);
        let shutdown_result = pipeline.shutdown();
        run_result?;
        shutdown_result?;
        return Ok(());
    }

    install_panic_hook();
    let (cols, rows) = terminal::size().unwrap_or((120, 40));
    let stdout = BufWriter::with_capacity(1024 * 1024, io::stdout());
    let mut target = TerminalTarget::new(
        stdout,
        cols,
        rows,
        detect_truecolor(),
        HudState::new(device_name),
    );

    enter_terminal(target.writer())?;
    let run_result = match input::thread::spawn_input_thread() {
        Ok(input_rx) => app::run_interactive(&mut pipeline, &mut view, &mut target, &input_rx),
        Err(err) => Err(err.into()),
    };
    let shutdown_result = pipeline.shutdown();

    let notice = app::exit_notice(pipeline.stats());
    let cleanup_result = cleanup_terminal(target.writer(), notice.as_deref());

    run_result?;
    shutdown_result?;
    cleanup_result
}

fn main() -> AppResult<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let params = cli.galaxy_params();
    let field = galaxy::generate(&params)?;

    #[cfg(feature = "metal")]
    if !cli.cpu {
        match device::metal::MetalDevice::new(&field) {
            Ok(device) => return run(device, &field, &cli),
            Err(err) if cli.metal => return Err(err.into()),
            Err(err) => {
                log::warn!("Metal initialization failed: {err}. Falling back to the software device.");
            }
        }
    }

    #[cfg(not(feature = "metal"))]
    if cli.cpu {
        log::debug!("--cpu given; this build only has the software device");
    }

    let device = SoftwareDevice::new(&field)?;
    run(device, &field, &cli)
}
