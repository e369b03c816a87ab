// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use rgbd_viewer::backends::DeviceKind;
use rgbd_viewer::config::{APP_DIR, Config};
use rgbd_viewer::frame::Resolution;
use rgbd_viewer::gpu::WgpuBackend;
use rgbd_viewer::render::DisplayMode;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

mod cli;

#[derive(Parser)]
#[command(name = "rgbd-viewer")]
#[command(about = "Real-time debug viewer for RGBD mesh tracking")]
#[command(version = env!("GIT_VERSION"))]
#[command(subcommand_required = false)]
struct Cli {
    /// Config file (default: ~/.config/rgbd-viewer/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Frame source (see 'rgbd-viewer list')
    #[arg(short, long, global = true, value_parser = parse_device)]
    device: Option<DeviceKind>,

    /// Initial frame buffer width in pixels
    #[arg(long, global = true, requires = "height")]
    width: Option<u32>,

    /// Initial frame buffer height in pixels
    #[arg(long, global = true, requires = "width")]
    height: Option<u32>,

    /// Display mode at startup
    #[arg(short, long, global = true)]
    mode: Option<DisplayMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render to the terminal (default)
    View,

    /// List available frame sources
    List,

    /// Run the render loop without presenting and print statistics
    Headless {
        /// Number of render loop ticks
        #[arg(short, long, default_value = "120")]
        ticks: u64,

        /// Render with the GPU instead of the CPU recorder
        #[arg(long)]
        gpu: bool,
    },

    /// Print the effective configuration
    Config,
}

fn parse_device(id: &str) -> Result<DeviceKind, String> {
    DeviceKind::from_id(id).map_err(|e| e.to_string())
}

impl Cli {
    /// Config file values with command-line overrides applied
    fn effective_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(device) = self.device {
            config.device = device;
        }
        if let (Some(width), Some(height)) = (self.width, self.height) {
            config.screen_resolution = Resolution::new(width, height);
        }
        if let Some(mode) = self.mode {
            config.initial_mode = mode;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(to_file: bool) {
    // Set RUST_LOG to control the level, e.g. RUST_LOG=rgbd_viewer=debug
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    // The terminal view owns stdout, so its logs go to a file
    let log_file = to_file
        .then(|| dirs::cache_dir().map(|dir| dir.join(APP_DIR)))
        .flatten()
        .and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            File::create(dir.join("rgbd-viewer.log")).ok()
        });

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .init(),
        None if to_file => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::sink)
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .init(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let viewing = matches!(cli.command, None | Some(Commands::View));
    init_logging(viewing);

    let config = cli.effective_config()?;

    match cli.command {
        None | Some(Commands::View) => {
            let backend = pollster::block_on(WgpuBackend::new())?;
            rgbd_viewer::terminal::run(backend, &config)
        }
        Some(Commands::List) => cli::list_devices(&config),
        Some(Commands::Headless { ticks, gpu }) => cli::run_headless(&config, ticks, gpu),
        Some(Commands::Config) => cli::print_config(&config),
    }
}
