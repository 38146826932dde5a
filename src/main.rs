#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "gui")]
use std::time::{Duration, Instant};

#[cfg(feature = "gui")]
use tilebeat::{
    midi::frequency_to_midi_note, midi_note_name, AudioOutput, Config, Instrument,
    MidiOutputDevice, PlaybackEngine, PlaybackEvent, Sequencer, GRID_SIZE,
};

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init(); // RUST_LOG=debug for transport and device logs

    let config = Config::load();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 420.0])
            .with_title("tilebeat"),
        ..Default::default()
    };

    eframe::run_native(
        "tilebeat",
        options,
        Box::new(|_cc| Ok(Box::new(TilebeatApp::new(config)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    env_logger::init();
    log::error!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct TilebeatApp {
    sequencer: Sequencer,
    audio_output: Option<AudioOutput>,
    midi_output: Arc<Mutex<MidiOutputDevice>>,
    playback_engine: PlaybackEngine,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    sounding: Vec<(Instrument, usize, Instant, Duration)>,
    last_note: Option<String>,
}

#[cfg(feature = "gui")]
impl TilebeatApp {
    fn new(config: Config) -> Self {
        let mut playback_engine = PlaybackEngine::new();

        let audio_output = match AudioOutput::open(config.master_gain) {
            Ok(output) => {
                playback_engine.add_sink(Box::new(output.trigger()));
                Some(output)
            }
            Err(e) => {
                log::warn!("{} - playing silently", e);
                None
            }
        };

        let available_midi_ports = MidiOutputDevice::available_ports();
        let mut midi_device = MidiOutputDevice::new();
        let mut selected_port = None;
        if let Some(fragment) = config.midi_port.as_deref() {
            match midi_device.connect_named(fragment) {
                Ok(()) => {
                    selected_port = available_midi_ports
                        .iter()
                        .position(|name| Some(name.as_str()) == midi_device.port_name());
                }
                Err(e) => log::warn!("{}", e),
            }
        }
        let midi_output = Arc::new(Mutex::new(midi_device));
        playback_engine.add_sink(Box::new(Arc::clone(&midi_output)));

        Self {
            sequencer: Sequencer::new(config.bpm),
            audio_output,
            midi_output,
            playback_engine,
            available_midi_ports,
            selected_port,
            sounding: Vec::new(),
            last_note: None,
        }
    }

    fn handle_playback_events(&mut self) {
        for event in self.playback_engine.poll_events() {
            match event {
                PlaybackEvent::StepAdvanced(beat) => {
                    self.sequencer.transport_mut().set_beat(beat);
                }
                PlaybackEvent::NoteOn(note) => {
                    self.sounding
                        .push((note.instrument, note.step, Instant::now(), note.length()));
                    self.last_note = Some(format!(
                        "{} {}",
                        note.instrument,
                        midi_note_name(frequency_to_midi_note(note.frequency))
                    ));
                }
            }
        }

        self.sounding
            .retain(|(_, _, started, length)| started.elapsed() < *length);
    }

    fn start_playback(&mut self) {
        self.playback_engine.start(
            *self.sequencer.transport(),
            Arc::clone(self.sequencer.board_state()),
        );
        self.sequencer.transport_mut().play();
    }

    fn pause_playback(&mut self) {
        self.playback_engine.stop();
        self.handle_playback_events();
        self.sequencer.transport_mut().pause();
    }

    fn clear(&mut self) {
        self.playback_engine.stop();
        let _ = self.playback_engine.poll_events();
        self.sequencer.clear();
        self.sounding.clear();
        self.last_note = None;
        if let Some(output) = &self.audio_output {
            output.silence();
        }
    }

    fn is_sounding(&self, instrument: Instrument, step: usize) -> bool {
        self.sounding
            .iter()
            .any(|(i, s, _, _)| *i == instrument && *s == step)
    }
}

#[cfg(feature = "gui")]
fn instrument_colour(instrument: Instrument) -> egui::Color32 {
    match instrument {
        Instrument::Synth => egui::Color32::from_rgb(150, 90, 220),
        Instrument::Bass => egui::Color32::from_rgb(60, 110, 220),
        Instrument::Drums => egui::Color32::from_rgb(220, 90, 60),
        Instrument::Melody => egui::Color32::from_rgb(60, 190, 120),
    }
}

#[cfg(feature = "gui")]
fn lighten(colour: egui::Color32) -> egui::Color32 {
    let [r, g, b, _] = colour.to_array();
    egui::Color32::from_rgb(r / 2 + 128, g / 2 + 128, b / 2 + 128)
}

#[cfg(feature = "gui")]
impl eframe::App for TilebeatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_playback_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("tilebeat");
            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                if self.sequencer.transport().is_playing() {
                    if ui.button("⏸ Pause").clicked() {
                        self.pause_playback();
                    }
                } else if ui.button("▶ Play").clicked() {
                    self.start_playback();
                }

                if ui.button("⟲ Clear").clicked() {
                    self.clear();
                }

                ui.add_space(20.0);
                ui.label(format!("{} BPM", self.sequencer.transport().bpm()));
                ui.add_space(20.0);
                ui.label(format!("Beat {}/{}", self.sequencer.transport().beat() + 1, GRID_SIZE));
                if let Some(note) = &self.last_note {
                    ui.add_space(20.0);
                    ui.label(note.as_str());
                }
            });

            ui.add_space(10.0);

            // MIDI Port Selection
            let mut selected_port_changed = None;
            ui.horizontal(|ui| {
                ui.label("MIDI Output:");
                if self.available_midi_ports.is_empty() {
                    ui.label("No MIDI ports available");
                } else {
                    egui::ComboBox::from_label("")
                        .selected_text(
                            self.selected_port
                                .and_then(|i| self.available_midi_ports.get(i))
                                .map(String::as_str)
                                .unwrap_or("Select port..."),
                        )
                        .show_ui(ui, |ui| {
                            for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                                if ui
                                    .selectable_label(self.selected_port == Some(i), port_name)
                                    .clicked()
                                {
                                    selected_port_changed = Some(i);
                                }
                            }
                        });
                }
            });

            if let Some(port_idx) = selected_port_changed {
                if let Ok(mut midi) = self.midi_output.lock() {
                    midi.disconnect();
                    match midi.connect(port_idx) {
                        Ok(()) => self.selected_port = Some(port_idx),
                        Err(e) => log::warn!("{}", e),
                    }
                }
            }

            ui.add_space(20.0);

            // Tile grid, one row per instrument
            let is_playing = self.sequencer.transport().is_playing();
            let current_beat = self.sequencer.transport().beat();
            let mut clicked = None;

            egui::Grid::new("tiles").spacing([6.0, 6.0]).show(ui, |ui| {
                for instrument in Instrument::ALL {
                    ui.label(instrument.name());
                    for tile in self.sequencer.board().row(instrument) {
                        let is_current = is_playing && tile.step == current_beat;
                        let base = instrument_colour(instrument);
                        let fill = if self.is_sounding(instrument, tile.step) {
                            lighten(base)
                        } else if tile.active {
                            base
                        } else if is_current {
                            egui::Color32::from_rgb(70, 70, 70)
                        } else {
                            egui::Color32::from_rgb(40, 40, 40)
                        };

                        let mut button = egui::Button::new("")
                            .min_size(egui::vec2(56.0, 48.0))
                            .fill(fill);
                        if is_current {
                            button = button.stroke(egui::Stroke::new(2.0, egui::Color32::WHITE));
                        }

                        if ui.add(button).clicked() {
                            clicked = Some((instrument, tile.step));
                        }
                    }
                    ui.end_row();
                }
            });

            if let Some((instrument, step)) = clicked {
                self.sequencer.toggle_tile(instrument, step);
            }

            // Info
            ui.separator();
            ui.label("Click tiles to enable/disable them");
            if self.audio_output.is_none() {
                ui.colored_label(egui::Color32::YELLOW, "⚠ No audio device - MIDI only");
            }
            let midi_connected = self
                .midi_output
                .lock()
                .map(|midi| midi.is_connected())
                .unwrap_or(false);
            if !midi_connected {
                ui.colored_label(
                    egui::Color32::GRAY,
                    "No MIDI output connected - audio playback only",
                );
            }
        });
    }
}
