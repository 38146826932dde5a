/// Playback engine - coordinates timing and triggers
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{Board, Tile, Transport};
use crate::audio::tone::Note;

/// Receives notes from the transport loop.
pub trait NoteSink: Send {
    fn note_on(&mut self, note: &Note);

    fn note_off(&mut self, _note: &Note) {}
}

impl<S: NoteSink + ?Sized> NoteSink for Arc<Mutex<S>> {
    fn note_on(&mut self, note: &Note) {
        match self.lock() {
            Ok(mut sink) => sink.note_on(note),
            Err(poisoned) => poisoned.into_inner().note_on(note),
        }
    }

    fn note_off(&mut self, note: &Note) {
        match self.lock() {
            Ok(mut sink) => sink.note_off(note),
            Err(poisoned) => poisoned.into_inner().note_off(note),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StepAdvanced(usize),
    NoteOn(Note),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Step(usize),
    NoteOn(Note),
    NoteOff(Note),
}

/// Clock-free core of the transport loop: the caller supplies `now`.
pub struct Scheduler {
    transport: Transport,
    interval: Duration,
    next_step: Option<Instant>,
    pending_offs: Vec<(Instant, Note)>,
}

impl Scheduler {
    pub fn new(transport: Transport) -> Self {
        Self {
            interval: transport.step_interval(),
            transport,
            next_step: None,
            pending_offs: Vec::new(),
        }
    }

    pub fn beat(&self) -> usize {
        self.transport.beat()
    }

    /// Everything due at `now`. The first call fires the starting beat.
    /// `active` is asked for the active tiles of a beat only when it fires.
    pub fn poll<F>(&mut self, now: Instant, mut active: F) -> Vec<Action>
    where
        F: FnMut(usize) -> Vec<Tile>,
    {
        let mut actions = self.due_offs(now);

        match self.next_step {
            None => {
                let beat = self.transport.beat();
                self.fire(beat, now, &mut active, &mut actions);
                self.next_step = Some(now + self.interval);
            }
            Some(due) if now >= due => {
                let beat = self.transport.tick();
                self.fire(beat, now, &mut active, &mut actions);
                let next = due + self.interval;
                // Fell more than a whole step behind: resync instead of bursting.
                self.next_step = Some(if next <= now { now + self.interval } else { next });
            }
            Some(_) => {}
        }

        actions
    }

    /// Note-offs for everything still sounding.
    pub fn flush(&mut self) -> Vec<Action> {
        self.pending_offs
            .drain(..)
            .map(|(_, note)| Action::NoteOff(note))
            .collect()
    }

    fn due_offs(&mut self, now: Instant) -> Vec<Action> {
        let mut due = Vec::new();
        self.pending_offs.retain(|(at, note)| {
            if *at <= now {
                due.push(Action::NoteOff(*note));
                false
            } else {
                true
            }
        });
        due
    }

    fn fire<F>(&mut self, beat: usize, now: Instant, active: &mut F, actions: &mut Vec<Action>)
    where
        F: FnMut(usize) -> Vec<Tile>,
    {
        actions.push(Action::Step(beat));
        for tile in active(beat) {
            if let Some(note) = Note::new(tile.instrument, tile.step) {
                self.pending_offs.push((now + note.length(), note));
                actions.push(Action::NoteOn(note));
            }
        }
    }
}

type Sinks = Arc<Mutex<Vec<Box<dyn NoteSink>>>>;

pub struct PlaybackEngine {
    sender: Sender<PlaybackEvent>,
    receiver: Receiver<PlaybackEvent>,
    is_running: Arc<AtomicBool>,
    sinks: Sinks,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        let (sender, receiver) = channel();

        Self {
            sender,
            receiver,
            is_running: Arc::new(AtomicBool::new(false)),
            sinks: Arc::new(Mutex::new(Vec::new())),
            handle: None,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn NoteSink>) {
        match self.sinks.lock() {
            Ok(mut sinks) => sinks.push(sink),
            Err(poisoned) => poisoned.into_inner().push(sink),
        }
    }

    /// Starts looping from `transport`'s current beat. No-op while running.
    pub fn start(&mut self, transport: Transport, board_state: Arc<Mutex<Board>>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        // A previous thread may have died without stop() being called.
        if let Some(stale) = self.handle.take() {
            if stale.join().is_err() {
                log::error!("playback thread panicked");
            }
        }

        log::info!(
            "playback from beat {} at {} BPM",
            transport.beat(),
            transport.bpm()
        );

        let is_running = Arc::clone(&self.is_running);
        let sender = self.sender.clone();
        let sinks = Arc::clone(&self.sinks);

        self.handle = Some(thread::spawn(move || {
            let _running = RunningGuard(Arc::clone(&is_running));
            let mut scheduler = Scheduler::new(transport);

            while is_running.load(Ordering::SeqCst) {
                let actions = scheduler.poll(Instant::now(), |beat| match board_state.lock() {
                    Ok(board) => board.active_at(beat),
                    Err(poisoned) => poisoned.into_inner().active_at(beat),
                });
                dispatch(actions, &sinks, &sender);

                thread::sleep(Duration::from_millis(1));
            }

            dispatch(scheduler.flush(), &sinks, &sender);
            log::debug!("playback thread stopped at beat {}", scheduler.beat());
        }));
    }

    /// Stops the loop and waits for the thread to release its notes.
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("playback thread panicked");
            }
        }
        debug_assert!(!self.is_running());
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Clears the run flag when the playback thread exits, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(actions: Vec<Action>, sinks: &Sinks, sender: &Sender<PlaybackEvent>) {
    if actions.is_empty() {
        return;
    }
    let mut sinks = match sinks.lock() {
        Ok(sinks) => sinks,
        Err(poisoned) => poisoned.into_inner(),
    };

    for action in actions {
        match action {
            Action::Step(beat) => {
                let _ = sender.send(PlaybackEvent::StepAdvanced(beat));
            }
            Action::NoteOn(note) => {
                for sink in sinks.iter_mut() {
                    sink.note_on(&note);
                }
                let _ = sender.send(PlaybackEvent::NoteOn(note));
            }
            Action::NoteOff(note) => {
                for sink in sinks.iter_mut() {
                    sink.note_off(&note);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{Instrument, GRID_SIZE};

    #[derive(Default)]
    struct Recorder {
        on: Vec<Note>,
        off: Vec<Note>,
    }

    impl NoteSink for Recorder {
        fn note_on(&mut self, note: &Note) {
            self.on.push(*note);
        }

        fn note_off(&mut self, note: &Note) {
            self.off.push(*note);
        }
    }

    fn board_with(tiles: &[(Instrument, usize)]) -> Board {
        let mut board = Board::new();
        for &(instrument, step) in tiles {
            board.toggle(instrument, step);
        }
        board
    }

    fn steps(actions: &[Action]) -> Vec<usize> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Step(beat) => Some(*beat),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_poll_fires_current_beat() {
        let board = board_with(&[(Instrument::Synth, 0), (Instrument::Drums, 0)]);
        let mut scheduler = Scheduler::new(Transport::new(120.0));
        let start = Instant::now();

        let actions = scheduler.poll(start, |beat| board.active_at(beat));
        assert_eq!(actions[0], Action::Step(0));
        assert_eq!(actions.len(), 3);

        let quiet = scheduler.poll(start + Duration::from_millis(50), |beat| board.active_at(beat));
        assert!(quiet.is_empty());
    }

    #[test]
    fn test_steps_every_interval_and_wraps() {
        let board = Board::new();
        let mut scheduler = Scheduler::new(Transport::new(120.0));
        let start = Instant::now();
        let interval = Duration::from_millis(250);

        let mut seen = Vec::new();
        for i in 0..=GRID_SIZE as u32 {
            seen.extend(steps(&scheduler.poll(start + interval * i, |b| board.active_at(b))));
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 7, 0]);
    }

    #[test]
    fn test_resumes_from_transport_beat() {
        let mut transport = Transport::new(120.0);
        transport.set_beat(5);
        let mut scheduler = Scheduler::new(transport);
        let start = Instant::now();
        let board = Board::new();
        assert_eq!(steps(&scheduler.poll(start, |b| board.active_at(b))), vec![5]);
        assert_eq!(
            steps(&scheduler.poll(start + Duration::from_millis(250), |b| board.active_at(b))),
            vec![6]
        );
    }

    #[test]
    fn test_note_off_after_duration() {
        let board = board_with(&[(Instrument::Drums, 0)]);
        let mut scheduler = Scheduler::new(Transport::new(120.0));
        let start = Instant::now();
        scheduler.poll(start, |b| board.active_at(b));

        let early = scheduler.poll(start + Duration::from_millis(90), |b| board.active_at(b));
        assert!(early.is_empty());
        let late = scheduler.poll(start + Duration::from_millis(110), |b| board.active_at(b));
        assert!(matches!(late.as_slice(), [Action::NoteOff(n)] if n.instrument == Instrument::Drums));
    }

    #[test]
    fn test_flush_releases_everything() {
        let board = board_with(&[(Instrument::Bass, 0), (Instrument::Melody, 0)]);
        let mut scheduler = Scheduler::new(Transport::new(120.0));
        scheduler.poll(Instant::now(), |b| board.active_at(b));
        assert_eq!(scheduler.flush().len(), 2);
        assert!(scheduler.flush().is_empty());
    }

    #[test]
    fn test_resyncs_when_late() {
        let board = Board::new();
        let mut scheduler = Scheduler::new(Transport::new(120.0));
        let start = Instant::now();
        scheduler.poll(start, |b| board.active_at(b));
        let late = start + Duration::from_secs(2);
        assert_eq!(steps(&scheduler.poll(late, |b| board.active_at(b))), vec![1]);
        assert!(scheduler.poll(late + Duration::from_millis(10), |b| board.active_at(b)).is_empty());
    }

    #[test]
    fn test_engine_drives_sinks() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let board = Arc::new(Mutex::new(board_with(&[(Instrument::Synth, 0)])));

        let mut engine = PlaybackEngine::new();
        engine.add_sink(Box::new(Arc::clone(&recorder)));
        engine.start(Transport::new(120.0), Arc::clone(&board));
        assert!(engine.is_running());
        engine.start(Transport::new(120.0), Arc::clone(&board));

        thread::sleep(Duration::from_millis(60));
        engine.stop();
        assert!(!engine.is_running());

        let events = engine.poll_events();
        assert_eq!(events.first(), Some(&PlaybackEvent::StepAdvanced(0)));
        assert!(events
            .iter()
            .any(|e| matches!(e, PlaybackEvent::NoteOn(n) if n.instrument == Instrument::Synth)));

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.on.len(), 1);
        assert_eq!(recorder.off.len(), 1);
    }

    struct PanicOnce {
        fired: bool,
    }

    impl NoteSink for PanicOnce {
        fn note_on(&mut self, _note: &Note) {
            if !self.fired {
                self.fired = true;
                panic!("sink failure");
            }
        }
    }

    #[test]
    fn test_engine_restarts_after_thread_panic() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let board = Arc::new(Mutex::new(board_with(&[(Instrument::Bass, 0)])));

        let mut engine = PlaybackEngine::new();
        engine.add_sink(Box::new(PanicOnce { fired: false }));
        engine.add_sink(Box::new(Arc::clone(&recorder)));

        engine.start(Transport::new(120.0), Arc::clone(&board));
        thread::sleep(Duration::from_millis(60));
        assert!(!engine.is_running());
        engine.stop();
        assert!(recorder.lock().unwrap().on.is_empty());

        engine.start(Transport::new(120.0), Arc::clone(&board));
        assert!(engine.is_running());
        thread::sleep(Duration::from_millis(60));
        engine.stop();

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.on.len(), 1);
        assert_eq!(recorder.off.len(), 1);
    }

    #[test]
    fn test_shared_sink_survives_poisoned_lock() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let poisoner = Arc::clone(&recorder);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(recorder.is_poisoned());

        let mut sink = Arc::clone(&recorder);
        let note = Note::new(Instrument::Melody, 3).unwrap();
        sink.note_on(&note);
        sink.note_off(&note);

        let recorder = recorder.lock().unwrap_or_else(|p| p.into_inner());
        assert_eq!(recorder.on, vec![note]);
        assert_eq!(recorder.off, vec![note]);
    }
}
