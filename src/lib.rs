/// tilebeat - a tile grid step sequencer toy
///
/// This library provides the pieces behind the app:
/// - A 4 x 8 board of tiles, one row per instrument voice
/// - A transport that loops over the 8 beats at a fixed tempo
/// - A tone generator that voices (instrument, scale step) pairs
/// - Audio output through cpal, optional MIDI output through midir

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types
pub use audio::tone::{Mixer, Note, Voice, Waveform};
pub use audio::{AudioOutput, ToneTrigger};
pub use config::Config;
pub use error::{Error, Result};
pub use midi::{midi_note_name, MidiOutputDevice};
pub use sequencer::playback::{NoteSink, PlaybackEngine, PlaybackEvent, Scheduler};
pub use sequencer::{Board, Instrument, Sequencer, Tile, Transport, GRID_SIZE};
