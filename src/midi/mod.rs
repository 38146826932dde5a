/// MIDI output using midir
use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};

use crate::audio::tone::Note;
use crate::error::{Error, Result};
use crate::sequencer::playback::NoteSink;
use crate::sequencer::Instrument;

const CLIENT_NAME: &str = "tilebeat MIDI Output";
const VELOCITY: u8 = 100;
const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            port_name: None,
        }
    }

    pub fn available_ports() -> Vec<String> {
        match MidiOutput::new(CLIENT_NAME) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("MIDI unavailable: {}", e);
                vec![]
            }
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();
        let port = ports.get(port_index).ok_or(Error::InvalidPort(port_index))?;
        self.open(midi_out, port)
    }

    /// Connects to the first port whose name contains `fragment`.
    pub fn connect_named(&mut self, fragment: &str) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|name| name.contains(fragment))
                    .unwrap_or(false)
            })
            .ok_or_else(|| Error::PortNotFound(fragment.to_string()))?;
        self.open(midi_out, port)
    }

    fn open(&mut self, midi_out: MidiOutput, port: &MidiOutputPort) -> Result<()> {
        let name = midi_out.port_name(port).unwrap_or_default();
        let connection = midi_out
            .connect(port, "tilebeat")
            .map_err(|e| Error::MidiConnect(e.to_string()))?;

        log::info!("MIDI output connected to {}", name);
        self.connection = Some(connection);
        self.port_name = Some(name);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        if let Some(ref mut conn) = self.connection {
            conn.send(&note_on_message(channel, note, velocity))?;
        }
        Ok(())
    }

    pub fn send_note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        if let Some(ref mut conn) = self.connection {
            conn.send(&note_off_message(channel, note))?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.port_name = None;
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteSink for MidiOutputDevice {
    fn note_on(&mut self, note: &Note) {
        let key = frequency_to_midi_note(note.frequency);
        if let Err(e) = self.send_note_on(channel_for(note.instrument), key, VELOCITY) {
            log::warn!("{}", e);
        }
    }

    fn note_off(&mut self, note: &Note) {
        let key = frequency_to_midi_note(note.frequency);
        if let Err(e) = self.send_note_off(channel_for(note.instrument), key) {
            log::warn!("{}", e);
        }
    }
}

/// Zero-based channel; drums sit on General MIDI channel 10.
pub fn channel_for(instrument: Instrument) -> u8 {
    match instrument {
        Instrument::Synth => 0,
        Instrument::Bass => 1,
        Instrument::Melody => 2,
        Instrument::Drums => 9,
    }
}

pub fn frequency_to_midi_note(frequency: f32) -> u8 {
    let note = 69.0 + 12.0 * (frequency / 440.0).log2();
    note.round().clamp(0.0, 127.0) as u8
}

fn note_on_message(channel: u8, note: u8, velocity: u8) -> [u8; 3] {
    [0x90 | (channel & 0x0f), note & 0x7f, velocity & 0x7f]
}

fn note_off_message(channel: u8, note: u8) -> [u8; 3] {
    [0x80 | (channel & 0x0f), note & 0x7f, 0]
}

pub fn midi_note_name(note: u8) -> String {
    let octave = i32::from(note / 12) - 1;
    format!("{}{}", NOTE_NAMES[usize::from(note % 12)], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_to_note() {
        assert_eq!(frequency_to_midi_note(440.0), 69);
        assert_eq!(frequency_to_midi_note(261.63), 60);
        assert_eq!(frequency_to_midi_note(65.41), 36);
        assert_eq!(frequency_to_midi_note(1.0), 0);
    }

    #[test]
    fn test_messages_carry_channel() {
        assert_eq!(note_on_message(9, 36, 100), [0x99, 36, 100]);
        assert_eq!(note_off_message(channel_for(Instrument::Bass), 40), [0x81, 40, 0]);
    }

    #[test]
    fn test_note_names() {
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(69), "A4");
        assert_eq!(midi_note_name(37), "C#2");
    }

    #[test]
    fn test_unconnected_sink_is_silent() {
        let mut device = MidiOutputDevice::new();
        let note = Note::new(Instrument::Drums, 0).unwrap();
        device.note_on(&note);
        device.note_off(&note);
        assert!(!device.is_connected());
        assert!(device.send_note_on(0, 60, 100).is_ok());
    }
}
