/// Playback engine - coordinates timing and triggers
///
/// `Playback` is the capability the sequencer drives: an asynchronous audio
/// unlock, looping step callbacks on a shared transport clock, and a note
/// trigger that accepts a precise start time. `Transport` is the clock half
/// of the native implementation.
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::AudioError;
use crate::pitch::{NoteValue, Pitch};

/// Registration handle for one looping step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub(crate) u64);

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The one-time audio unlock finished.
    Unlocked(Result<(), AudioError>),
    /// A loop reached `column`; notes for it should sound at `time`.
    Tick {
        id: LoopId,
        column: usize,
        time: Instant,
    },
}

pub trait Playback {
    /// Begin unlocking audio output. Completion arrives as
    /// `PlaybackEvent::Unlocked` from `poll_events`.
    fn request_unlock(&mut self);

    /// Register a loop that ticks through columns `0..steps` once per `interval`.
    fn schedule_loop(&mut self, steps: usize, interval: NoteValue) -> LoopId;

    fn stop_loop(&mut self, id: LoopId);

    fn dispose_loop(&mut self, id: LoopId);

    fn start_transport(&mut self);

    fn stop_transport(&mut self);

    /// Sound `pitch` for `duration`, starting at `at` or immediately.
    fn trigger_attack_release(&mut self, pitch: Pitch, duration: NoteValue, at: Option<Instant>);

    fn poll_events(&mut self) -> Vec<PlaybackEvent>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct LoopSlot {
    id: LoopId,
    steps: usize,
    interval: NoteValue,
    started: bool,
    next_step: usize,
    next_time: Option<Instant>,
}

#[derive(Debug)]
struct ClockState {
    running: bool,
    bpm: f32,
    lookahead: Duration,
    loops: Vec<LoopSlot>,
    next_id: u64,
}

/// Shared transport clock. Runs on its own thread while started and emits
/// `PlaybackEvent::Tick` for every started loop.
pub struct Transport {
    state: Arc<Mutex<ClockState>>,
    sender: Sender<PlaybackEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(sender: Sender<PlaybackEvent>, bpm: f32, lookahead: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                running: false,
                bpm,
                lookahead,
                loops: Vec::new(),
                next_id: 0,
            })),
            sender,
            worker: None,
        }
    }

    pub fn bpm(&self) -> f32 {
        lock(&self.state).bpm
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn loop_count(&self) -> usize {
        lock(&self.state).loops.len()
    }

    pub fn schedule_loop(&mut self, steps: usize, interval: NoteValue) -> LoopId {
        assert!(steps > 0, "a loop needs at least one step");

        let mut state = lock(&self.state);
        let id = LoopId(state.next_id);
        state.next_id += 1;

        let next_time = state
            .running
            .then(|| Instant::now() + state.lookahead);
        state.loops.push(LoopSlot {
            id,
            steps,
            interval,
            started: true,
            next_step: 0,
            next_time,
        });
        id
    }

    pub fn stop_loop(&mut self, id: LoopId) {
        let mut state = lock(&self.state);
        if let Some(slot) = state.loops.iter_mut().find(|slot| slot.id == id) {
            slot.started = false;
            slot.next_time = None;
        }
    }

    pub fn dispose_loop(&mut self, id: LoopId) {
        lock(&self.state).loops.retain(|slot| slot.id != id);
    }

    pub fn start(&mut self) {
        {
            let mut state = lock(&self.state);
            if state.running {
                return;
            }
            state.running = true;

            let origin = Instant::now() + state.lookahead;
            for slot in state.loops.iter_mut().filter(|slot| slot.started) {
                slot.next_step = 0;
                slot.next_time = Some(origin);
            }
        }

        let state = Arc::clone(&self.state);
        let sender = self.sender.clone();
        self.worker = Some(thread::spawn(move || run_clock(state, sender)));
    }

    /// Halt the clock. Once this returns no further tick is sent.
    pub fn stop(&mut self) {
        {
            let mut state = lock(&self.state);
            state.running = false;
            for slot in &mut state.loops {
                slot.next_time = None;
            }
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("transport thread panicked");
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_clock(state: Arc<Mutex<ClockState>>, sender: Sender<PlaybackEvent>) {
    loop {
        {
            let mut state = lock(&state);
            if !state.running {
                break;
            }

            let horizon = Instant::now() + state.lookahead;
            let bpm = state.bpm;
            for slot in state.loops.iter_mut().filter(|slot| slot.started) {
                let step = slot.interval.duration(bpm);
                while let Some(time) = slot.next_time.filter(|time| *time <= horizon) {
                    let _ = sender.send(PlaybackEvent::Tick {
                        id: slot.id,
                        column: slot.next_step,
                        time,
                    });
                    slot.next_step = (slot.next_step + 1) % slot.steps;
                    slot.next_time = Some(time + step);
                }
            }
        }

        thread::sleep(Duration::from_millis(1));
    }
}
