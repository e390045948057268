use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_fps")]
    pub fps: u8,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_min_freq")]
    pub min_freq: f64,
    #[serde(default = "default_max_freq")]
    pub max_freq: f64,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
    /// Preview rotation period in frames. Follows `fps` when unset.
    #[serde(default)]
    pub rotate_frames: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Console,
    Gpio,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_playback_rotate_frames")]
    pub rotate_frames: usize,
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
    #[serde(default)]
    pub output: OutputKind,
    #[serde(default = "default_pins")]
    pub pins: Vec<u32>,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            channels: default_channels(),
            fft_size: default_fft_size(),
            min_freq: default_min_freq(),
            max_freq: default_max_freq(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            rotate_frames: None,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            rotate_frames: default_playback_rotate_frames(),
            start_delay_ms: default_start_delay_ms(),
            output: OutputKind::default(),
            pins: default_pins(),
            gpio_root: default_gpio_root(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            audio_dir: default_audio_dir(),
            static_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl AnalysisConfig {
    pub fn preview_rotate_frames(&self) -> usize {
        self.rotate_frames.unwrap_or(self.fps as usize)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.fps > 0, "analysis.fps must be between 1 and 255");
        anyhow::ensure!(self.channels > 0, "analysis.channels must be at least 1");
        anyhow::ensure!(
            self.fft_size >= 32 && self.fft_size.is_power_of_two(),
            "analysis.fft_size must be a power of two >= 32, got {}",
            self.fft_size
        );
        anyhow::ensure!(
            self.min_freq > 0.0 && self.min_freq < self.max_freq,
            "analysis.min_freq must be positive and below max_freq"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.smoothing),
            "analysis.smoothing must be in [0, 1)"
        );
        anyhow::ensure!(
            self.min_decibels < self.max_decibels,
            "analysis.min_decibels must be below max_decibels"
        );
        Ok(())
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.channels > 0, "playback.channels must be at least 1");
        if self.output == OutputKind::Gpio {
            anyhow::ensure!(
                self.pins.len() == self.channels,
                "playback.pins lists {} pins for {} channels",
                self.pins.len(),
                self.channels
            );
        }
        Ok(())
    }
}

fn default_fps() -> u8 { 10 }
fn default_channels() -> usize { 8 }
fn default_fft_size() -> usize { 2048 }
fn default_min_freq() -> f64 { 20.0 }
fn default_max_freq() -> f64 { 15000.0 }
fn default_smoothing() -> f32 { 0.8 }
fn default_min_decibels() -> f32 { -100.0 }
fn default_max_decibels() -> f32 { -30.0 }
fn default_playback_rotate_frames() -> usize { 5 }
fn default_start_delay_ms() -> u64 { 1000 }
// BCM numbers of header pins 11, 12, 13, 15, 16, 18, 22, 29
fn default_pins() -> Vec<u32> { vec![17, 18, 27, 22, 23, 24, 25, 5] }
fn default_gpio_root() -> PathBuf { PathBuf::from("/sys/class/gpio") }
fn default_bind() -> SocketAddr { SocketAddr::from(([0, 0, 0, 0], 3000)) }
fn default_audio_dir() -> PathBuf { PathBuf::from("audio") }
fn default_max_upload_bytes() -> usize { 100 * 1024 * 1024 }

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Explicit path, then `./lightshow.toml`, then the per-user config locations.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("lightshow.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("lightshow").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("lightshow").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
