use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod pose;

use config::Config;

#[derive(Parser)]
#[command(name = "rasm", about = "Serial console and head-pose tracking for the rasm rig")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send terminal lines to the board and print each reply
    Console {
        /// Serial device path
        #[arg(short, long)]
        device: Option<String>,
        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
        /// Reply timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
        /// Delay after opening the port, in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,
    },
    /// Track head pose from a camera or an image file
    Pose {
        /// V4L2 camera index
        #[arg(short, long)]
        camera: Option<u32>,
        /// Process a still image instead of the camera
        #[arg(short, long, conflicts_with = "camera")]
        image: Option<PathBuf>,
        /// Stop after this many frames (0 runs until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        frames: u64,
        /// Directory holding face_detector.onnx and face_landmarks.onnx
        #[arg(short, long)]
        model_dir: Option<PathBuf>,
        /// Emit one JSON object per frame
        #[arg(long)]
        json: bool,
        /// Include all 68 landmarks in JSON output
        #[arg(long, requires = "json")]
        landmarks: bool,
        /// Keep following the first selected face
        #[arg(long)]
        lock: bool,
        /// Use the built-in 640x480 calibration instead of estimating intrinsics
        #[arg(long)]
        calibrated: bool,
        /// Forward roll and height corrections to the board
        #[arg(long)]
        send: bool,
        /// Serial device used with --send
        #[arg(short, long, requires = "send")]
        device: Option<String>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Console {
            device,
            baud,
            timeout_ms,
            settle_ms,
        } => {
            if let Some(v) = device {
                config.serial_device = v;
            }
            if let Some(v) = baud {
                config.baud = v;
            }
            if let Some(v) = timeout_ms {
                config.read_timeout = Duration::from_millis(v);
            }
            if let Some(v) = settle_ms {
                config.settle = Duration::from_millis(v);
            }
            run_console(&config).await
        }
        Commands::Pose {
            camera,
            image,
            frames,
            model_dir,
            json,
            landmarks,
            lock,
            calibrated,
            send,
            device,
        } => {
            if let Some(v) = camera {
                config.camera_index = v;
            }
            if let Some(v) = model_dir {
                config.model_dir = v;
            }
            if let Some(v) = device {
                config.serial_device = v;
            }
            if calibrated {
                config.calibration = rasm_core::Calibration::Fixed {
                    intrinsics: rasm_core::CameraIntrinsics::calibrated_640x480(),
                    distortion: rasm_core::Distortion::calibrated_640x480(),
                };
            }
            let options = pose::PoseOptions {
                image,
                frames,
                json,
                landmarks,
                lock,
                send,
            };
            pose::run(config, options).await
        }
        Commands::Devices => {
            let devices = rasm_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{:>3}  {}  {} ({})", d.index, d.path, d.name, d.driver);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_console(config: &Config) -> Result<ExitCode> {
    let session_config = config.session();
    let session = match rasm_serial::SerialSession::open(&session_config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Unable to open {}: {e}", session_config.device);
            return Ok(ExitCode::FAILURE);
        }
    };
    tracing::info!(
        device = %session_config.device,
        baud = session_config.baud,
        timeout_ms = session_config.timeout.as_millis() as u64,
        "serial console ready"
    );

    let lines = rasm_serial::console::spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let summary = rasm_serial::console::run_console(session, lines, std::io::stdout(), shutdown)
        .await
        .context("serial console failed")?;
    tracing::debug!(exchanges = summary.exchanges, "console finished");

    // Dropping the session restores the port settings. An interrupted
    // exchange drops it on the worker once its read deadline passes.
    drop(summary.session);
    Ok(ExitCode::SUCCESS)
}
