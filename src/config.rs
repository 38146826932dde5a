/// Startup configuration: embedded defaults overlaid with an optional user file
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");
const CONFIG_ENV: &str = "TILEBEAT_CONFIG";

pub const MIN_BPM: f32 = 40.0;
pub const MAX_BPM: f32 = 240.0;

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    transport: TransportConfig,
    #[serde(default)]
    audio: AudioConfig,
    #[serde(default)]
    midi: MidiConfig,
}

#[derive(Deserialize, Default)]
struct TransportConfig {
    bpm: Option<f32>,
}

#[derive(Deserialize, Default)]
struct AudioConfig {
    master_gain: Option<f32>,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    port: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bpm: f32,
    pub master_gain: f32,
    pub midi_port: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            master_gain: 0.3,
            midi_port: None,
        }
    }
}

impl Config {
    /// Embedded defaults, then the user file if there is one. A broken user
    /// file is logged and skipped.
    pub fn load() -> Self {
        let mut config = Self::from_toml(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::warn!(target: "config", "embedded defaults unusable: {}", e);
            Self::default()
        });

        if let Some(path) = user_config_path() {
            if path.exists() {
                match Self::read_file(&path) {
                    Ok(user) => config.merge(user),
                    Err(e) => log::warn!(target: "config", "ignoring {}", e),
                }
            }
        }

        log::debug!(target: "config", "loaded {:?}", config);
        config
    }

    pub fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(contents)?;
        let mut config = Self::default();
        config.merge(file);
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<ConfigFile> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn merge(&mut self, file: ConfigFile) {
        match file.transport.bpm {
            Some(bpm) if bpm.is_finite() => self.bpm = bpm.clamp(MIN_BPM, MAX_BPM),
            Some(bpm) => log::warn!(target: "config", "ignoring transport.bpm = {}", bpm),
            None => {}
        }
        match file.audio.master_gain {
            Some(gain) if gain.is_finite() => self.master_gain = gain.clamp(0.0, 1.0),
            Some(gain) => log::warn!(target: "config", "ignoring audio.master_gain = {}", gain),
            None => {}
        }
        if let Some(port) = file.midi.port {
            self.midi_port = Some(port).filter(|p| !p.trim().is_empty());
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("tilebeat").join("config.toml"))
}
