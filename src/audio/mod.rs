/// Audio output using cpal
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::sequencer::playback::NoteSink;

pub mod tone;

use tone::{Mixer, Note};

pub struct AudioOutput {
    _stream: cpal::Stream,
    mixer: Arc<Mutex<Mixer>>,
}

impl AudioOutput {
    /// Opens the default output device. Called once; the stream lives as long
    /// as the returned value.
    pub fn open(master_gain: f32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(Error::NoOutputDevice)?;
        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let mixer = Arc::new(Mutex::new(Mixer::new(
            config.sample_rate.0 as f32,
            master_gain,
        )));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&mixer))?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&mixer))?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&mixer))?,
            other => return Err(Error::UnsupportedSampleFormat(other)),
        };
        stream.play()?;

        log::info!(
            "audio output on {} ({} Hz, {} ch, {:?})",
            device.name().unwrap_or_else(|_| "unknown device".into()),
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        Ok(Self {
            _stream: stream,
            mixer,
        })
    }

    /// Handle the playback thread uses to start notes.
    pub fn trigger(&self) -> ToneTrigger {
        ToneTrigger {
            mixer: Arc::clone(&self.mixer),
        }
    }

    pub fn silence(&self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.silence();
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let Ok(mut mixer) = mixer.lock() else {
                data.fill(T::from_sample(0.0f32));
                return;
            };
            for frame in data.chunks_mut(channels) {
                let value = T::from_sample(mixer.next_sample());
                for sample in frame.iter_mut() {
                    *sample = value;
                }
            }
            mixer.prune();
        },
        |err| log::error!("audio stream error: {}", err),
        None,
    )?;

    Ok(stream)
}

/// Cloneable, thread-safe way into the output mixer.
#[derive(Clone)]
pub struct ToneTrigger {
    mixer: Arc<Mutex<Mixer>>,
}

impl ToneTrigger {
    /// A trigger not attached to any device, rendering into its own mixer.
    pub fn detached(sample_rate: f32, master_gain: f32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate, master_gain))),
        }
    }

    pub fn play(&self, note: Note) {
        match self.mixer.lock() {
            Ok(mut mixer) => mixer.play(note),
            Err(_) => log::warn!("mixer lock poisoned, dropping {} step {}", note.instrument, note.step),
        }
    }

    pub fn active_voices(&self) -> usize {
        self.mixer
            .lock()
            .map(|mixer| mixer.active_voices())
            .unwrap_or(0)
    }
}

impl NoteSink for ToneTrigger {
    fn note_on(&mut self, note: &Note) {
        self.play(*note);
    }
}
