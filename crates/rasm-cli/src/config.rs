use anyhow::{Context, Result};
use rasm_core::{Calibration, CameraIntrinsics, Distortion};
use rasm_serial::SessionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration: built-in defaults, then the TOML file, then
/// `RASM_*` environment variables. CLI flags are applied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Serial device path (default: /dev/ttyACM0).
    pub serial_device: String,
    pub baud: u32,
    /// Bound on one reply read.
    pub read_timeout: Duration,
    /// Wait after opening the port before the first write.
    pub settle: Duration,
    /// V4L2 camera index (default: 1).
    pub camera_index: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub center_weight: f32,
    pub proximal_weight: f32,
    pub calibration: Calibration,
}

impl Default for Config {
    fn default() -> Self {
        let serial = SessionConfig::default();
        Self {
            serial_device: serial.device,
            baud: serial.baud,
            read_timeout: serial.timeout,
            settle: serial.settle,
            camera_index: rasm_hw::DEFAULT_CAMERA_INDEX,
            model_dir: default_model_dir(),
            center_weight: 1.0,
            proximal_weight: 1.0,
            calibration: Calibration::Approximate,
        }
    }
}

/// On-disk layout of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub serial: SerialSection,
    pub camera: CameraSection,
    pub models: ModelSection,
    pub selection: SelectionSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSection {
    pub device: Option<String>,
    pub baud: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraSection {
    pub index: Option<u32>,
    /// Calibrated pinhole parameters; when absent they are derived per frame.
    pub intrinsics: Option<CameraIntrinsics>,
    pub distortion: Option<Distortion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSection {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionSection {
    pub center_weight: Option<f32>,
    pub proximal_weight: Option<f32>,
}

impl Config {
    /// Defaults, overlaid with the config file (if any) and the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = config_path(env) {
            if path.exists() {
                let file = FileConfig::read(&path)?;
                config.apply_file(file);
                tracing::debug!(path = %path.display(), "loaded config file");
            }
        }
        config.apply_env(env);
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        let FileConfig { serial, camera, models, selection } = file;

        if let Some(v) = serial.device {
            self.serial_device = v;
        }
        if let Some(v) = serial.baud {
            self.baud = v;
        }
        if let Some(v) = serial.timeout_ms {
            self.read_timeout = Duration::from_millis(v);
        }
        if let Some(v) = serial.settle_ms {
            self.settle = Duration::from_millis(v);
        }
        if let Some(v) = camera.index {
            self.camera_index = v;
        }
        match (camera.intrinsics, camera.distortion) {
            (Some(intrinsics), distortion) => {
                self.calibration = Calibration::Fixed {
                    intrinsics,
                    distortion: distortion.unwrap_or_default(),
                };
            }
            (None, Some(_)) => {
                tracing::warn!("distortion given without intrinsics; ignoring it");
            }
            (None, None) => {}
        }
        if let Some(v) = models.dir {
            self.model_dir = v;
        }
        if let Some(v) = selection.center_weight {
            self.center_weight = v;
        }
        if let Some(v) = selection.proximal_weight {
            self.proximal_weight = v;
        }
    }

    /// Overlay `RASM_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RASM_SERIAL_DEVICE") {
            self.serial_device = v;
        }
        self.baud = env_parse(&lookup, "RASM_BAUD", self.baud);
        self.read_timeout = Duration::from_millis(env_parse(
            &lookup,
            "RASM_TIMEOUT_MS",
            self.read_timeout.as_millis() as u64,
        ));
        self.settle = Duration::from_millis(env_parse(
            &lookup,
            "RASM_SETTLE_MS",
            self.settle.as_millis() as u64,
        ));
        self.camera_index = env_parse(&lookup, "RASM_CAMERA_INDEX", self.camera_index);
        if let Some(v) = lookup("RASM_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.center_weight = env_parse(&lookup, "RASM_CENTER_WEIGHT", self.center_weight);
        self.proximal_weight = env_parse(&lookup, "RASM_PROXIMAL_WEIGHT", self.proximal_weight);
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            device: self.serial_device.clone(),
            baud: self.baud,
            timeout: self.read_timeout,
            settle: self.settle,
            ..SessionConfig::default()
        }
    }
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// `RASM_CONFIG`, else `$XDG_CONFIG_HOME/rasm/config.toml`, else `~/.config/rasm/config.toml`.
fn config_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(p) = lookup("RASM_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let base = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("rasm/config.toml"))
}

fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .map(|d| d.join("rasm/models"))
        .unwrap_or_else(|_| PathBuf::from("models"))
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable environment value");
            default
        }),
        None => default,
    }
}
