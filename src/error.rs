/// Errors surfaced by device setup and configuration
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("could not query output config: {0}")]
    OutputConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("could not build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("could not start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("unsupported sample format {0:?}")]
    UnsupportedSampleFormat(cpal::SampleFormat),

    #[error("failed to create MIDI output: {0}")]
    MidiInit(#[from] midir::InitError),
    #[error("invalid MIDI port index {0}")]
    InvalidPort(usize),
    #[error("no MIDI port matching {0:?}")]
    PortNotFound(String),
    #[error("failed to connect MIDI output: {0}")]
    MidiConnect(String),
    #[error("failed to send MIDI message: {0}")]
    MidiSend(#[from] midir::SendError),

    #[error("could not read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
