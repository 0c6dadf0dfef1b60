/// Core sequencer logic - play/stop control over the grid
///
/// The `Sequencer` is the only owner of the grid, the audio-ready state and
/// the play state. Everything runs on one thread: user actions call into it
/// directly and playback events (unlock completion, loop ticks) are fed in
/// through `pump`.
pub mod grid;
pub mod playback;

use std::mem;
use std::time::Instant;

pub use grid::{Grid, COLS, ROWS};
use playback::{LoopId, Playback, PlaybackEvent};

use crate::config::Config;
use crate::error::AudioError;
use crate::pitch::{NoteValue, Pitch, DEFAULT_ROWS};
use crate::view::GridView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Locked,
    Unlocking,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
}

/// Audio work requested before the unlock finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Start,
    Preview(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequencerSettings {
    pub rows: [Pitch; ROWS],
    pub step: NoteValue,
    pub note_length: NoteValue,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS.map(|name| Pitch::parse(name).unwrap_or(Pitch::C4)),
            step: NoteValue::Eighth,
            note_length: NoteValue::Eighth,
        }
    }
}

impl From<&Config> for SequencerSettings {
    fn from(config: &Config) -> Self {
        Self {
            rows: config.rows,
            step: config.step,
            note_length: config.note_length,
        }
    }
}

pub struct Sequencer<P, V> {
    grid: Grid,
    settings: SequencerSettings,
    playback: P,
    view: V,
    audio: AudioState,
    state: PlaybackState,
    active_loop: Option<LoopId>,
    pending: Vec<Intent>,
}

impl<P: Playback, V: GridView> Sequencer<P, V> {
    pub fn new(settings: SequencerSettings, playback: P, view: V) -> Self {
        Self {
            grid: Grid::new(),
            settings,
            playback,
            view,
            audio: AudioState::Locked,
            state: PlaybackState::Stopped,
            active_loop: None,
            pending: Vec::new(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn playback(&self) -> &P {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut P {
        &mut self.playback
    }

    pub fn pitch(&self, row: usize) -> Pitch {
        self.settings.rows[row]
    }

    pub fn audio_state(&self) -> AudioState {
        self.audio
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn active_loop(&self) -> Option<LoopId> {
        self.active_loop
    }

    /// Start/stop button. Before audio is unlocked this unlocks first and
    /// starts once that succeeds.
    pub fn toggle_sequence(&mut self) {
        match self.audio {
            AudioState::Ready if self.is_playing() => self.stop(),
            AudioState::Ready => self.start(),
            AudioState::Locked | AudioState::Unlocking => self.defer(Intent::Start),
        }
        self.view.flash_start_button();
    }

    pub fn start(&mut self) {
        if self.audio != AudioState::Ready {
            self.defer(Intent::Start);
            return;
        }

        self.release_loop();
        let id = self.playback.schedule_loop(COLS, self.settings.step);
        self.active_loop = Some(id);
        self.playback.start_transport();

        self.state = PlaybackState::Playing;
        self.view.set_playing(true);
        log::debug!("sequence started ({:?})", id);
    }

    pub fn stop(&mut self) {
        if let Some(id) = self.active_loop.take() {
            self.playback.stop_loop(id);
            self.playback.stop_transport();
            self.playback.dispose_loop(id);
            log::debug!("sequence stopped ({:?})", id);
        }

        self.state = PlaybackState::Stopped;
        self.view.set_playing(false);
    }

    /// Sound a row's pitch right away, outside the loop.
    pub fn preview_note(&mut self, row: usize) {
        assert!(row < ROWS, "row {row} out of range (0..{ROWS})");
        if self.audio == AudioState::Ready {
            self.playback
                .trigger_attack_release(self.settings.rows[row], self.settings.note_length, None);
        } else {
            self.defer(Intent::Preview(row));
        }
    }

    pub fn clear_all(&mut self) {
        self.grid.clear();
        self.view.clear_all_active();
        self.stop();
        log::info!("grid cleared");
    }

    /// Cell click: flip it, reflect it, and preview the pitch if it is now on.
    /// Returns the cell's new state.
    pub fn click_cell(&mut self, row: usize, col: usize) -> bool {
        let active = self.grid.toggle(row, col);
        self.view.set_active(row, col, active);
        if active {
            self.preview_note(row);
            self.view.flash_cell(row, col);
        }
        active
    }

    /// Handle everything the playback side has reported since the last call.
    pub fn pump(&mut self) {
        for event in self.playback.poll_events() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Unlocked(Ok(())) => self.unlock_succeeded(),
            PlaybackEvent::Unlocked(Err(err)) => self.unlock_failed(err),
            PlaybackEvent::Tick { id, column, time } => self.tick(id, column, time),
        }
    }

    fn tick(&mut self, id: LoopId, column: usize, time: Instant) {
        if self.active_loop != Some(id) || !self.is_playing() {
            log::trace!("ignoring stale tick {column} from {:?}", id);
            return;
        }

        for row in self.grid.active_rows(column) {
            self.playback.trigger_attack_release(
                self.settings.rows[row],
                self.settings.note_length,
                Some(time),
            );
        }
        self.view.highlight_column(column);
    }

    fn defer(&mut self, intent: Intent) {
        log::debug!("deferring {:?} until audio is unlocked", intent);
        self.pending.push(intent);
        if self.audio == AudioState::Locked {
            self.audio = AudioState::Unlocking;
            self.playback.request_unlock();
        }
    }

    fn unlock_succeeded(&mut self) {
        if self.audio == AudioState::Ready {
            return;
        }
        self.audio = AudioState::Ready;
        log::info!("audio is ready");

        for intent in mem::take(&mut self.pending) {
            match intent {
                Intent::Start if !self.is_playing() => self.start(),
                Intent::Start => {}
                Intent::Preview(row) => self.preview_note(row),
            }
        }
    }

    fn unlock_failed(&mut self, err: AudioError) {
        log::warn!("audio not ready: {err}");
        if self.audio == AudioState::Unlocking {
            self.audio = AudioState::Locked;
        }
        let dropped = mem::take(&mut self.pending);
        if !dropped.is_empty() {
            log::debug!("dropped {} deferred action(s)", dropped.len());
        }
    }

    fn release_loop(&mut self) {
        if let Some(id) = self.active_loop.take() {
            self.playback.stop_loop(id);
            self.playback.dispose_loop(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{CellFlags, GridSurface};
    use std::time::Duration;

    #[derive(Default)]
    struct FakePlayback {
        unlock_requests: usize,
        next_id: u64,
        live_loops: Vec<LoopId>,
        transport_running: bool,
        notes: Vec<(Pitch, NoteValue, Option<Instant>)>,
        events: Vec<PlaybackEvent>,
    }

    impl Playback for FakePlayback {
        fn request_unlock(&mut self) {
            self.unlock_requests += 1;
        }

        fn schedule_loop(&mut self, steps: usize, _interval: NoteValue) -> LoopId {
            assert_eq!(steps, COLS);
            let id = LoopId(self.next_id);
            self.next_id += 1;
            self.live_loops.push(id);
            id
        }

        fn stop_loop(&mut self, _id: LoopId) {}

        fn dispose_loop(&mut self, id: LoopId) {
            self.live_loops.retain(|live| *live != id);
        }

        fn start_transport(&mut self) {
            self.transport_running = true;
        }

        fn stop_transport(&mut self) {
            self.transport_running = false;
        }

        fn trigger_attack_release(&mut self, pitch: Pitch, duration: NoteValue, at: Option<Instant>) {
            self.notes.push((pitch, duration, at));
        }

        fn poll_events(&mut self) -> Vec<PlaybackEvent> {
            mem::take(&mut self.events)
        }
    }

    type TestSequencer = Sequencer<FakePlayback, GridSurface>;

    fn sequencer() -> TestSequencer {
        Sequencer::new(
            SequencerSettings::default(),
            FakePlayback::default(),
            GridSurface::default(),
        )
    }

    fn unlock(seq: &mut TestSequencer, result: Result<(), AudioError>) {
        seq.playback_mut().events.push(PlaybackEvent::Unlocked(result));
        seq.pump();
    }

    fn ready_sequencer() -> TestSequencer {
        let mut seq = sequencer();
        unlock(&mut seq, Ok(()));
        assert_eq!(seq.audio_state(), AudioState::Ready);
        seq
    }

    fn tick(seq: &mut TestSequencer, column: usize, time: Instant) {
        let id = seq.active_loop().expect("no active loop");
        seq.playback_mut()
            .events
            .push(PlaybackEvent::Tick { id, column, time });
        seq.pump();
    }

    #[test]
    fn test_toggle_unlocks_before_starting() {
        let mut seq = sequencer();
        seq.toggle_sequence();
        assert_eq!(seq.audio_state(), AudioState::Unlocking);
        assert_eq!(seq.playback().unlock_requests, 1);
        assert!(!seq.is_playing());
        assert!(seq.playback().live_loops.is_empty());

        unlock(&mut seq, Ok(()));
        assert_eq!(seq.audio_state(), AudioState::Ready);
        assert!(seq.is_playing());
        assert!(seq.playback().transport_running);
        assert_eq!(seq.playback().live_loops.len(), 1);
        assert_eq!(seq.view().start_label(), "Stop Sequence");
    }

    #[test]
    fn test_toggle_while_unlocking_requests_one_unlock() {
        let mut seq = sequencer();
        seq.toggle_sequence();
        seq.toggle_sequence();
        assert_eq!(seq.playback().unlock_requests, 1);

        unlock(&mut seq, Ok(()));
        assert!(seq.is_playing());
        assert_eq!(seq.playback().live_loops.len(), 1);
    }

    #[test]
    fn test_toggle_stops_when_playing() {
        let mut seq = ready_sequencer();
        seq.toggle_sequence();
        assert!(seq.is_playing());

        seq.toggle_sequence();
        assert_eq!(seq.playback_state(), PlaybackState::Stopped);
        assert!(!seq.playback().transport_running);
        assert!(seq.playback().live_loops.is_empty());
        assert_eq!(seq.active_loop(), None);
        assert_eq!(seq.view().start_label(), "Start Sequence");
    }

    #[test]
    fn test_toggle_flashes_start_button() {
        let mut seq = ready_sequencer();
        seq.toggle_sequence();
        assert!(seq.view().start_button_flashing());
    }

    #[test]
    fn test_start_twice_keeps_one_registration() {
        let mut seq = ready_sequencer();
        seq.start();
        let first = seq.active_loop();
        seq.start();

        assert_eq!(seq.playback().live_loops.len(), 1);
        assert_ne!(seq.active_loop(), first);
        assert_eq!(seq.playback().live_loops[0], seq.active_loop().unwrap());
    }

    #[test]
    fn test_stop_when_stopped_is_harmless() {
        let mut seq = ready_sequencer();
        seq.stop();
        seq.stop();
        assert_eq!(seq.playback_state(), PlaybackState::Stopped);
        assert!(seq.playback().live_loops.is_empty());
    }

    #[test]
    fn test_empty_grid_ticks_every_column_silently() {
        let mut seq = ready_sequencer();
        seq.start();
        let origin = Instant::now();

        for i in 0..(COLS * 2) {
            let column = i % COLS;
            tick(&mut seq, column, origin + Duration::from_millis(250 * i as u64));
            assert_eq!(seq.view().highlighted_column(), Some(column));
        }
        assert!(seq.playback().notes.is_empty());
    }

    #[test]
    fn test_active_cell_sounds_only_on_its_column() {
        let mut seq = ready_sequencer();
        seq.grid.set(3, 0, true);
        seq.start();
        let origin = Instant::now();

        for column in 0..COLS {
            let time = origin + Duration::from_millis(250 * column as u64);
            tick(&mut seq, column, time);
            assert_eq!(seq.playback().notes.len(), 1);
        }

        let notes = &seq.playback().notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, seq.pitch(3));
        assert_eq!(notes[0].0.to_string(), "C4");
        assert_eq!(notes[0].1, NoteValue::Eighth);
        assert_eq!(notes[0].2, Some(origin));
    }

    #[test]
    fn test_chord_in_one_column() {
        let mut seq = ready_sequencer();
        seq.grid.set(0, 2, true);
        seq.grid.set(7, 2, true);
        seq.start();
        tick(&mut seq, 2, Instant::now());

        let pitches: Vec<String> = seq.playback().notes.iter().map(|n| n.0.to_string()).collect();
        assert_eq!(pitches, vec!["A4", "C5"]);
    }

    #[test]
    fn test_stale_ticks_are_ignored() {
        let mut seq = ready_sequencer();
        seq.grid.set(0, 0, true);
        seq.start();
        let old = seq.active_loop().unwrap();
        seq.start();

        seq.handle_event(PlaybackEvent::Tick {
            id: old,
            column: 0,
            time: Instant::now(),
        });
        assert!(seq.playback().notes.is_empty());

        let current = seq.active_loop().unwrap();
        seq.stop();
        seq.handle_event(PlaybackEvent::Tick {
            id: current,
            column: 0,
            time: Instant::now(),
        });
        assert!(seq.playback().notes.is_empty());
        assert_eq!(seq.view().highlighted_column(), None);
    }

    #[test]
    fn test_click_before_unlock_previews_after_success() {
        let mut seq = sequencer();
        assert!(seq.click_cell(2, 5));
        assert!(seq.grid().is_active(2, 5));
        assert!(seq.view().flags(2, 5).contains(CellFlags::ACTIVE | CellFlags::FEEDBACK));
        assert_eq!(seq.playback().unlock_requests, 1);
        assert!(seq.playback().notes.is_empty());

        unlock(&mut seq, Ok(()));
        let notes = &seq.playback().notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, seq.pitch(2));
        assert_eq!(notes[0].2, None);
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_failed_unlock_is_retriable() {
        let mut seq = sequencer();
        seq.click_cell(1, 1);
        unlock(&mut seq, Err(AudioError::NoOutputDevice));

        assert_eq!(seq.audio_state(), AudioState::Locked);
        assert!(seq.grid().is_active(1, 1));
        assert!(seq.playback().notes.is_empty());

        seq.click_cell(1, 2);
        assert_eq!(seq.playback().unlock_requests, 2);
        unlock(&mut seq, Ok(()));
        assert_eq!(seq.playback().notes.len(), 1);
        assert_eq!(seq.playback().notes[0].0, seq.pitch(1));
    }

    #[test]
    fn test_audio_thread_failure_allows_a_fresh_unlock() {
        let mut seq = sequencer();
        seq.toggle_sequence();
        assert_eq!(seq.audio_state(), AudioState::Unlocking);

        unlock(&mut seq, Err(AudioError::ThreadGone));
        assert_eq!(seq.audio_state(), AudioState::Locked);
        assert!(!seq.is_playing());

        seq.click_cell(6, 3);
        assert_eq!(seq.audio_state(), AudioState::Unlocking);
        assert_eq!(seq.playback().unlock_requests, 2);

        unlock(&mut seq, Ok(()));
        assert_eq!(seq.playback().notes.len(), 1);
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_click_off_does_not_preview() {
        let mut seq = ready_sequencer();
        seq.click_cell(4, 4);
        assert_eq!(seq.playback().notes.len(), 1);

        assert!(!seq.click_cell(4, 4));
        assert_eq!(seq.playback().notes.len(), 1);
        assert!(!seq.view().flags(4, 4).contains(CellFlags::ACTIVE));
    }

    #[test]
    fn test_clear_all_resets_and_stops() {
        let mut seq = ready_sequencer();
        seq.click_cell(0, 0);
        seq.click_cell(5, 6);
        seq.start();

        seq.clear_all();
        assert_eq!(seq.grid().active_count(), 0);
        assert!(!seq.view().flags(0, 0).contains(CellFlags::ACTIVE));
        assert!(!seq.view().flags(5, 6).contains(CellFlags::ACTIVE));
        assert_eq!(seq.playback_state(), PlaybackState::Stopped);
        assert!(seq.playback().live_loops.is_empty());
    }
}
