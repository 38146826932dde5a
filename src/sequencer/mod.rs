/// Core sequencer logic - tile board, transport and the shared board snapshot
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{MAX_BPM, MIN_BPM};

pub mod playback;

/// Number of beat slots in one loop.
pub const GRID_SIZE: usize = 8;
pub const DEFAULT_BPM: f32 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
    Synth,
    Bass,
    Drums,
    Melody,
}

impl Instrument {
    /// Board row order.
    pub const ALL: [Instrument; 4] = [
        Instrument::Synth,
        Instrument::Bass,
        Instrument::Drums,
        Instrument::Melody,
    ];

    pub fn row(self) -> usize {
        match self {
            Self::Synth => 0,
            Self::Bass => 1,
            Self::Drums => 2,
            Self::Melody => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Synth => "Synth",
            Self::Bass => "Bass",
            Self::Drums => "Drums",
            Self::Melody => "Melody",
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub instrument: Instrument,
    /// Beat slot, and the scale step played on that beat.
    pub step: usize,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    rows: Vec<Vec<Tile>>,
}

impl Board {
    pub fn new() -> Self {
        let rows = Instrument::ALL
            .iter()
            .map(|&instrument| {
                (0..GRID_SIZE)
                    .map(|step| Tile {
                        instrument,
                        step,
                        active: false,
                    })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn tile(&self, instrument: Instrument, step: usize) -> Option<&Tile> {
        self.rows.get(instrument.row()).and_then(|row| row.get(step))
    }

    pub fn is_active(&self, instrument: Instrument, step: usize) -> bool {
        self.tile(instrument, step)
            .map(|tile| tile.active)
            .unwrap_or(false)
    }

    pub fn toggle(&mut self, instrument: Instrument, step: usize) {
        if let Some(tile) = self
            .rows
            .get_mut(instrument.row())
            .and_then(|row| row.get_mut(step))
        {
            tile.active = !tile.active;
        }
    }

    /// Active tiles of one beat column, in row order.
    pub fn active_at(&self, step: usize) -> Vec<Tile> {
        self.rows
            .iter()
            .filter_map(|row| row.get(step))
            .filter(|tile| tile.active)
            .copied()
            .collect()
    }

    pub fn clear(&mut self) {
        for tile in self.rows.iter_mut().flatten() {
            tile.active = false;
        }
    }

    pub fn active_count(&self) -> usize {
        self.rows.iter().flatten().filter(|tile| tile.active).count()
    }

    pub fn row(&self, instrument: Instrument) -> &[Tile] {
        self.rows
            .get(instrument.row())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transport {
    playing: bool,
    beat: usize,
    bpm: f32,
}

impl Transport {
    /// Non-finite tempos fall back to the default of 120.
    pub fn new(bpm: f32) -> Self {
        let bpm = if bpm.is_finite() {
            bpm.clamp(MIN_BPM, MAX_BPM)
        } else {
            DEFAULT_BPM
        };

        Self {
            playing: false,
            beat: 0,
            bpm,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn beat(&self) -> usize {
        self.beat
    }

    pub fn set_beat(&mut self, beat: usize) {
        self.beat = beat % GRID_SIZE;
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    /// Stops advancing but keeps the beat so play resumes where it left off.
    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn toggle_play(&mut self) {
        self.playing = !self.playing;
    }

    pub fn clear(&mut self) {
        self.playing = false;
        self.beat = 0;
    }

    pub fn tick(&mut self) -> usize {
        self.beat = (self.beat + 1) % GRID_SIZE;
        self.beat
    }

    /// One beat slot is an eighth note.
    pub fn step_interval(&self) -> Duration {
        Duration::from_secs_f32(60.0 / self.bpm / 2.0)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

pub struct Sequencer {
    board: Board,
    board_state: Arc<Mutex<Board>>,
    transport: Transport,
}

impl Sequencer {
    pub fn new(bpm: f32) -> Self {
        let board = Board::new();
        let board_state = Arc::new(Mutex::new(board.clone()));

        Self {
            board,
            board_state,
            transport: Transport::new(bpm),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Snapshot read by the playback thread on every beat.
    pub fn board_state(&self) -> &Arc<Mutex<Board>> {
        &self.board_state
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn toggle_tile(&mut self, instrument: Instrument, step: usize) {
        self.board.toggle(instrument, step);
        log::debug!(
            "{} step {} -> {}",
            instrument,
            step,
            self.board.is_active(instrument, step)
        );
        self.publish();
    }

    /// Deactivates every tile and rewinds the transport.
    pub fn clear(&mut self) {
        self.board.clear();
        self.transport.clear();
        self.publish();
    }

    fn publish(&self) {
        match self.board_state.lock() {
            Ok(mut shared) => *shared = self.board.clone(),
            Err(poisoned) => *poisoned.into_inner() = self.board.clone(),
        }
    }
}
