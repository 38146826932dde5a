/// Tone generator - turns an (instrument, scale step) pair into an enveloped waveform
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::time::Duration;

use crate::sequencer::{Instrument, GRID_SIZE};

/// Gain a note reaches at the end of its attack.
pub const NOTE_PEAK: f32 = 0.3;
/// Gain the exponential decay lands on when the note ends.
pub const NOTE_FLOOR: f32 = 0.01;
pub const ATTACK_SECS: f32 = 0.01;
pub const MAX_VOICES: usize = 32;

const DRUM_SWEEP: f32 = 0.4;

const SYNTH_TABLE: [f32; GRID_SIZE] = [261.63, 293.66, 329.63, 392.00, 440.00, 523.25, 587.33, 659.25];
const BASS_TABLE: [f32; GRID_SIZE] = [65.41, 73.42, 82.41, 98.00, 110.00, 130.81, 146.83, 164.81];
const DRUM_TABLE: [f32; GRID_SIZE] = [60.0, 70.0, 80.0, 90.0, 100.0, 120.0, 140.0, 160.0];
const MELODY_TABLE: [f32; GRID_SIZE] = [523.25, 587.33, 659.25, 783.99, 880.00, 1046.50, 1174.66, 1318.51];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// `phase` is in cycles, `[0, 1)`.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Self::Sine => (phase * 2.0 * PI).sin(),
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Sawtooth => 2.0 * phase - 1.0,
            Self::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

pub struct Voicing {
    pub waveform: Waveform,
    pub duration: f32,
    table: &'static [f32; GRID_SIZE],
}

pub fn voicing(instrument: Instrument) -> Voicing {
    match instrument {
        Instrument::Synth => Voicing {
            waveform: Waveform::Sawtooth,
            duration: 0.3,
            table: &SYNTH_TABLE,
        },
        Instrument::Bass => Voicing {
            waveform: Waveform::Sine,
            duration: 0.5,
            table: &BASS_TABLE,
        },
        Instrument::Drums => Voicing {
            waveform: Waveform::Square,
            duration: 0.1,
            table: &DRUM_TABLE,
        },
        Instrument::Melody => Voicing {
            waveform: Waveform::Triangle,
            duration: 0.4,
            table: &MELODY_TABLE,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub instrument: Instrument,
    pub step: usize,
    pub frequency: f32,
    /// Seconds.
    pub duration: f32,
}

impl Note {
    pub fn new(instrument: Instrument, step: usize) -> Option<Self> {
        let voicing = voicing(instrument);
        let frequency = *voicing.table.get(step)?;
        Some(Self {
            instrument,
            step,
            frequency,
            duration: voicing.duration,
        })
    }

    pub fn length(&self) -> Duration {
        Duration::from_secs_f32(self.duration)
    }

    /// Drums drop in pitch over the note, everything else holds.
    pub fn frequency_at(&self, t: f32) -> f32 {
        match self.instrument {
            Instrument::Drums => {
                let progress = (t / self.duration).clamp(0.0, 1.0);
                self.frequency * DRUM_SWEEP.powf(progress)
            }
            _ => self.frequency,
        }
    }
}

/// Linear attack to the peak, then exponential decay to the floor at `duration`.
pub fn envelope(t: f32, duration: f32) -> f32 {
    if t < 0.0 || t >= duration {
        0.0
    } else if t < ATTACK_SECS {
        NOTE_PEAK * t / ATTACK_SECS
    } else {
        let progress = (t - ATTACK_SECS) / (duration - ATTACK_SECS);
        NOTE_PEAK * (NOTE_FLOOR / NOTE_PEAK).powf(progress)
    }
}

pub struct Voice {
    note: Note,
    waveform: Waveform,
    sample_rate: f32,
    phase: f32,
    position: u64,
    length: u64,
}

impl Voice {
    pub fn new(note: Note, sample_rate: f32) -> Self {
        Self {
            waveform: voicing(note.instrument).waveform,
            length: (note.duration * sample_rate).ceil() as u64,
            note,
            sample_rate,
            phase: 0.0,
            position: 0,
        }
    }

    pub fn note(&self) -> &Note {
        &self.note
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.length
    }

    pub fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }

        let t = self.position as f32 / self.sample_rate;
        let sample = self.waveform.sample(self.phase) * envelope(t, self.note.duration);

        self.phase += self.note.frequency_at(t) / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        self.position += 1;
        sample
    }
}

/// Sums the sounding voices for the output stream.
pub struct Mixer {
    voices: VecDeque<Voice>,
    sample_rate: f32,
    master_gain: f32,
}

impl Mixer {
    pub fn new(sample_rate: f32, master_gain: f32) -> Self {
        Self {
            voices: VecDeque::with_capacity(MAX_VOICES),
            sample_rate,
            master_gain,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    pub fn play(&mut self, note: Note) {
        if self.voices.len() >= MAX_VOICES {
            self.voices.pop_front();
        }
        self.voices.push_back(Voice::new(note, self.sample_rate));
    }

    /// Sounding voices, oldest first.
    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn next_sample(&mut self) -> f32 {
        let sum: f32 = self.voices.iter_mut().map(Voice::next_sample).sum();
        (sum * self.master_gain).clamp(-1.0, 1.0)
    }

    /// Drops voices whose envelope has run out.
    pub fn prune(&mut self) {
        self.voices.retain(|voice| !voice.is_finished());
    }

    pub fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
        self.prune();
    }

    pub fn silence(&mut self) {
        self.voices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f32 = 48_000.0;

    #[test]
    fn test_waveforms_stay_in_range() {
        for waveform in [Waveform::Sine, Waveform::Square, Waveform::Sawtooth, Waveform::Triangle] {
            for i in 0..100 {
                let s = waveform.sample(i as f32 / 100.0);
                assert!((-1.0..=1.0).contains(&s), "{:?} gave {}", waveform, s);
            }
        }
        assert_eq!(Waveform::Triangle.sample(0.5), 1.0);
        assert_eq!(Waveform::Sawtooth.sample(0.0), -1.0);
        assert_eq!(Waveform::Square.sample(0.75), -1.0);
    }

    #[test]
    fn test_note_lookup() {
        let note = Note::new(Instrument::Synth, 4).unwrap();
        assert_eq!(note.frequency, 440.0);
        assert_eq!(note.duration, 0.3);
        assert_eq!(Note::new(Instrument::Bass, 0).unwrap().frequency, 65.41);
        assert!(Note::new(Instrument::Melody, GRID_SIZE).is_none());
    }

    #[test]
    fn test_drum_pitch_sweeps_down() {
        let note = Note::new(Instrument::Drums, 0).unwrap();
        assert_eq!(note.frequency_at(0.0), 60.0);
        assert!((note.frequency_at(note.duration) - 24.0).abs() < 1e-3);
        let bass = Note::new(Instrument::Bass, 0).unwrap();
        assert_eq!(bass.frequency_at(0.4), bass.frequency);
    }

    #[test]
    fn test_envelope_shape() {
        assert_eq!(envelope(0.0, 0.3), 0.0);
        assert!((envelope(ATTACK_SECS, 0.3) - NOTE_PEAK).abs() < 1e-6);
        assert!((envelope(0.3 - 1e-6, 0.3) - NOTE_FLOOR).abs() < 1e-3);
        assert_eq!(envelope(0.3, 0.3), 0.0);
        assert!(envelope(0.1, 0.3) > envelope(0.2, 0.3));
    }

    #[test]
    fn test_voice_finishes_after_duration() {
        let note = Note::new(Instrument::Drums, 2).unwrap();
        let mut voice = Voice::new(note, RATE);
        let expected = (0.1 * RATE).ceil() as usize;
        let mut rendered = 0;
        while !voice.is_finished() {
            let s = voice.next_sample();
            assert!(s.abs() <= NOTE_PEAK + 1e-6);
            rendered += 1;
        }
        assert_eq!(rendered, expected);
        assert_eq!(voice.next_sample(), 0.0);
    }

    #[test]
    fn test_mixer_prunes_and_caps() {
        let mut mixer = Mixer::new(RATE, 0.3);
        for _ in 0..MAX_VOICES + 4 {
            mixer.play(Note::new(Instrument::Drums, 0).unwrap());
        }
        assert_eq!(mixer.active_voices(), MAX_VOICES);

        let mut buffer = vec![0.0; (0.1 * RATE) as usize + 1];
        mixer.fill(&mut buffer);
        assert!(buffer.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(buffer.iter().any(|s| *s != 0.0));
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_mixer_drops_oldest_voice() {
        let mut mixer = Mixer::new(RATE, 0.3);
        let base = Note::new(Instrument::Melody, 0).unwrap();
        let notes: Vec<Note> = (0..=MAX_VOICES)
            .map(|i| Note {
                frequency: base.frequency + i as f32,
                ..base
            })
            .collect();
        for note in &notes {
            mixer.play(*note);
        }

        let sounding: Vec<Note> = mixer.voices().map(|voice| *voice.note()).collect();
        assert_eq!(sounding.len(), MAX_VOICES);
        assert_eq!(sounding.first(), Some(&notes[1]));
        assert_eq!(sounding.last(), notes.last());
        assert!(!sounding.contains(&notes[0]));
    }
}
