use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Flags spliced into the decoder / encoder command lines when hardware
/// acceleration is available on the host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfmpegOptions {
    #[serde(default)]
    pub hw_decode_flag: Option<String>,
    #[serde(default)]
    pub hw_encode_flag: Option<String>,
}

/// Process-wide configuration, immutable after startup.
///
/// Loaded from a YAML file; any field can be overridden through the
/// environment with split-word naming (`UPFRAME_TARGET_FPS=120`,
/// `UPFRAME_FFMPEG__HW_DECODE_FLAG=cuda`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    /// Path to an out-of-process interpolation engine build. Recognized for
    /// deployments that wrap the CLI engine; the in-process binding does not
    /// consume it.
    #[serde(default)]
    pub rife_binary: Option<PathBuf>,
    pub process_folder: PathBuf,
    pub database_path: PathBuf,
    pub log_path: PathBuf,
    pub model_path: PathBuf,
    pub workers: usize,
    pub target_fps: f64,
    #[serde(default)]
    pub ffmpeg: FfmpegOptions,
    #[serde(default)]
    pub rife_extra_arguments: Option<String>,
    #[serde(default)]
    pub delete_input_file_when_finished: bool,
    #[serde(default)]
    pub delete_output_if_already_exist: bool,
    #[serde(default)]
    pub copy_file_to_destination_on_skip: bool,
}

pub fn load(path: &Path) -> Result<Config> {
    let settings = config::Config::builder()
        .set_default("bind_address", "127.0.0.1")?
        .set_default("port", 8090i64)?
        .set_default("workers", 1i64)?
        .set_default("target_fps", 60.0f64)?
        .add_source(config::File::from(path.to_path_buf()))
        .add_source(
            config::Environment::with_prefix("UPFRAME")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    let config: Config = settings
        .try_deserialize()
        .with_context(|| format!("invalid config in {}", path.display()))?;
    verify(&config)?;
    Ok(config)
}

fn verify(config: &Config) -> Result<()> {
    if config.workers == 0 {
        bail!("workers must be at least 1");
    }
    if !(config.target_fps > 0.0) {
        bail!("target_fps must be positive, got {}", config.target_fps);
    }
    for (name, value) in [
        ("process_folder", &config.process_folder),
        ("database_path", &config.database_path),
        ("log_path", &config.log_path),
        ("model_path", &config.model_path),
    ] {
        if value.as_os_str().is_empty() {
            bail!("{name} must be set");
        }
    }
    Ok(())
}
