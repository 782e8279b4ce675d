pub mod capture;
pub mod filter;
pub mod pipeline;
pub mod publish;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use capture::frame::PixelFormat;
use capture::DeviceOptions;
use color_eyre::Result;
use filter::watermark::Locale;
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use pipeline::{CaptureFilterPipeline, PipelineError, PipelineState};

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "IPCAM_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "ipcam.toml";
const ENV_PREFIX: &str = "IPCAM";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub overlay: OverlayConfig,
    pub publish: PublishConfig,
}

/// Input selection and mode, fixed for an open session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Registered input driver name (`v4l2`, `gstreamer`, `test-pattern-source`)
    pub driver: String,
    /// Device identifier understood by the driver. Empty means auto-detect for v4l2.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub read_ahead_bytes: usize,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub locale: Locale,
    pub x: i32,
    pub y: i32,
    pub fontsize: u32,
    pub fontcolor: String,
    pub shadowcolor: String,
    pub shadowx: i32,
    pub shadowy: i32,
    /// Trailing text after the clock
    pub label: String,
    pub fontfile: Option<String>,
    /// Complete filter chain used instead of the generated watermark
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Raw packed frames on stdout
    Stdout,
    /// appsrc into a GStreamer launch description
    Gstreamer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub sink: SinkKind,
    /// Everything after the appsrc in the GStreamer delivery pipeline
    pub launch: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            driver: "v4l2".into(),
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            read_ahead_bytes: 2000 * 1024 * 1024,
            read_timeout_ms: 2000,
        }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            framerate: self.fps,
            width: self.width,
            height: self.height,
            pixel_format: PixelFormat::Yuyv422,
            read_ahead_bytes: self.read_ahead_bytes,
            read_timeout: self.read_timeout(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            locale: Locale::En,
            x: 5,
            y: 5,
            fontsize: 24,
            fontcolor: "white".into(),
            shadowcolor: "black".into(),
            shadowx: 2,
            shadowy: 2,
            label: "IPC".into(),
            fontfile: None,
            description: None,
        }
    }
}

impl Default for SinkKind {
    fn default() -> Self {
        if cfg!(feature = "gstreamer-pipeline") {
            SinkKind::Gstreamer
        } else {
            SinkKind::Stdout
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            launch: publish::DEFAULT_LAUNCH.into(),
        }
    }
}

impl Config {
    /// Defaults, then the file named by `IPCAM_CONFIG` (or `ipcam.toml`) if
    /// present, then `IPCAM_<SECTION>__<KEY>` environment variables.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::layered(path.as_ref(), ENV_PREFIX)
    }

    fn layered(path: &Path, env_prefix: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_the_reference_camera_setup() {
        let config = Config::default();
        assert_eq!(config.capture.driver, "v4l2");
        assert_eq!((config.capture.width, config.capture.height, config.capture.fps), (640, 480, 30));
        assert_eq!(config.capture.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.overlay.label, "IPC");
        assert_eq!((config.overlay.x, config.overlay.y), (5, 5));
        assert!(config.publish.launch.contains("x264enc"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::layered(&dir.path().join("absent.toml"), "IPCAM_TEST_ABSENT").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_overrides_are_partial() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
driver = "test-pattern-source"
device = "synthetic1"
fps = 15

[overlay]
locale = "zh"
label = "Gate"
"#
        )
        .unwrap();

        let config = Config::layered(file.path(), "IPCAM_TEST_FILE").unwrap();
        assert_eq!(config.capture.driver, "test-pattern-source");
        assert_eq!(config.capture.fps, 15);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.overlay.locale, Locale::Zh);
        assert_eq!(config.overlay.label, "Gate");
        assert_eq!(config.overlay.fontsize, 24);
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("IPCAM_TEST_ENV_CAPTURE__WIDTH", "320");
        std::env::set_var("IPCAM_TEST_ENV_PUBLISH__SINK", "stdout");

        let config = Config::layered(&dir.path().join("none.toml"), "IPCAM_TEST_ENV").unwrap();
        assert_eq!(config.capture.width, 320);
        assert_eq!(config.publish.sink, SinkKind::Stdout);
    }

    #[test]
    fn device_options_carry_the_fixed_format() {
        let options = CaptureConfig::default().device_options();
        assert_eq!(options.pixel_format, PixelFormat::Yuyv422);
        assert_eq!(options.video_size(), "640x480");
    }
}
