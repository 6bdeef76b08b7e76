use crate::config::Config;
use anyhow::{Context, Result};
use rasm_core::{EstimatorConfig, HeadPose, PipelineError, PoseEstimator, PoseReport};
use rasm_hw::{Camera, Frame};
use rasm_serial::{SerialSession, ServoMixer};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct PoseOptions {
    pub image: Option<PathBuf>,
    pub frames: u64,
    pub json: bool,
    pub landmarks: bool,
    pub lock: bool,
    pub send: bool,
}

enum Source {
    Camera(Camera),
    Image(Frame),
}

/// Run the tracker on a dedicated thread until the frame budget is spent
/// or ctrl-c arrives.
pub async fn run(config: Config, options: PoseOptions) -> Result<ExitCode> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after this frame");
            flag.store(true, Ordering::Relaxed);
        }
    });

    tokio::task::spawn_blocking(move || track(&config, &options, &stop))
        .await
        .context("pose worker panicked")?
}

fn track(config: &Config, options: &PoseOptions, stop: &AtomicBool) -> Result<ExitCode> {
    // The frame source is opened before any model is loaded.
    let source = match &options.image {
        Some(path) => Source::Image(
            Frame::load(path).with_context(|| format!("loading image {}", path.display()))?,
        ),
        None => match Camera::open_index(config.camera_index) {
            Ok(camera) => Source::Camera(camera),
            Err(e) => {
                tracing::debug!(index = config.camera_index, error = %e, "camera open failed");
                eprintln!("Unable to connect to camera");
                return Ok(ExitCode::FAILURE);
            }
        },
    };

    let estimator_config = EstimatorConfig {
        model_dir: config.model_dir.clone(),
        calibration: config.calibration,
        center_weight: config.center_weight,
        proximal_weight: config.proximal_weight,
        ..EstimatorConfig::default()
    };
    let mut estimator = PoseEstimator::load(&estimator_config)
        .with_context(|| PoseEstimator::model_dir_hint(&config.model_dir))?;
    estimator.keep_landmarks(options.landmarks);
    if options.lock {
        estimator.selector_mut().lock();
    }

    let mut link = if options.send {
        let session = SerialSession::open(&config.session())
            .with_context(|| format!("opening servo link on {}", config.serial_device))?;
        Some(ServoLink::new(session))
    } else {
        None
    };

    let mut out = std::io::stdout().lock();

    match source {
        Source::Image(frame) => {
            handle_frame(&mut estimator, &frame, options, link.as_mut(), &mut out)?;
        }
        Source::Camera(camera) => {
            tracing::info!(
                index = config.camera_index,
                width = camera.width,
                height = camera.height,
                format = ?camera.pixel_format(),
                "tracking"
            );
            let mut stream = camera.stream()?;
            let mut processed = 0u64;
            while !stop.load(Ordering::Relaxed) {
                if options.frames > 0 && processed >= options.frames {
                    break;
                }
                let frame = stream.next_frame()?;
                if frame.is_dark() {
                    tracing::debug!(sequence = frame.sequence, "skipping dark frame");
                    continue;
                }
                handle_frame(&mut estimator, &frame, options, link.as_mut(), &mut out)?;
                processed += 1;
            }
            tracing::info!(processed, "tracking stopped");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn handle_frame(
    estimator: &mut PoseEstimator,
    frame: &Frame,
    options: &PoseOptions,
    link: Option<&mut ServoLink>,
    out: &mut impl Write,
) -> Result<()> {
    let report = match estimator.process(frame) {
        Ok(report) => report,
        Err(PipelineError::Detector(e)) => return Err(e).context("face detection failed"),
        Err(e) => {
            tracing::warn!(sequence = frame.sequence, error = %e, "no pose for frame");
            return Ok(());
        }
    };

    if options.json {
        serde_json::to_writer(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        write_text(out, &report)?;
    }
    out.flush()?;

    if let (Some(link), Some(pose)) = (link, &report.pose) {
        link.send(pose)?;
    }
    Ok(())
}

fn write_text(out: &mut impl Write, report: &PoseReport) -> std::io::Result<()> {
    let Some(pose) = &report.pose else {
        return writeln!(out, "frame {}: no face", report.sequence);
    };
    writeln!(out, "frame {}: {} face(s)", report.sequence, report.face_count)?;
    writeln!(
        out,
        "  pitch {:7.1}  yaw {:7.1}  roll {:7.1}  [deg]",
        pose.euler.pitch, pose.euler.yaw, pose.euler.roll
    )?;
    writeln!(
        out,
        "  distance {:5.1} in  lateral {:+5.1} in  vertical {:+5.1} in  (rms {:.2} px)",
        pose.position.distance, pose.position.lateral, pose.position.vertical, pose.reprojection_rms
    )
}

/// Roll and height corrections to the board.
struct ServoLink {
    session: SerialSession,
    mixer: ServoMixer,
}

impl ServoLink {
    fn new(session: SerialSession) -> Self {
        Self {
            session,
            mixer: ServoMixer::default(),
        }
    }

    fn send(&mut self, pose: &HeadPose) -> Result<()> {
        let commands = self
            .mixer
            .commands(pose.euler.roll, pose.position.vertical, Instant::now());
        for command in commands {
            self.session
                .send(&command.encode())
                .with_context(|| format!("sending {command}"))?;
            tracing::trace!(%command, "servo command sent");
        }
        Ok(())
    }
}
