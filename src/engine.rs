/// Native playback: transport clock + cpal synth + optional MIDI mirror,
/// all reporting through one event channel.
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Instant;

use crate::audio::Synth;
use crate::config::Config;
use crate::midi::MidiMirror;
use crate::pitch::{NoteValue, Pitch};
use crate::sequencer::playback::{LoopId, Playback, PlaybackEvent, Transport};

pub struct Engine {
    transport: Transport,
    synth: Synth,
    midi: MidiMirror,
    sender: Sender<PlaybackEvent>,
    receiver: Receiver<PlaybackEvent>,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        let (sender, receiver) = channel();
        let mut midi = MidiMirror::new();
        if let Some(port) = &config.midi_port {
            if let Err(err) = midi.connect_by_name(port) {
                log::warn!("MIDI mirror disabled: {err}");
            }
        }

        Self {
            transport: Transport::new(sender.clone(), config.bpm, config.lookahead),
            synth: Synth::new(config.synth),
            midi,
            sender,
            receiver,
        }
    }

    pub fn bpm(&self) -> f32 {
        self.transport.bpm()
    }

    /// Voices queued or sounding in the synth.
    pub fn active_voices(&self) -> usize {
        self.synth.active_voices()
    }

    pub fn midi(&self) -> &MidiMirror {
        &self.midi
    }

    pub fn midi_mut(&mut self) -> &mut MidiMirror {
        &mut self.midi
    }
}

impl Playback for Engine {
    fn request_unlock(&mut self) {
        self.synth.unlock(self.sender.clone());
    }

    fn schedule_loop(&mut self, steps: usize, interval: NoteValue) -> LoopId {
        self.transport.schedule_loop(steps, interval)
    }

    fn stop_loop(&mut self, id: LoopId) {
        self.transport.stop_loop(id);
    }

    fn dispose_loop(&mut self, id: LoopId) {
        self.transport.dispose_loop(id);
    }

    fn start_transport(&mut self) {
        self.transport.start();
    }

    fn stop_transport(&mut self) {
        self.transport.stop();
    }

    fn trigger_attack_release(&mut self, pitch: Pitch, duration: NoteValue, at: Option<Instant>) {
        let at = at.unwrap_or_else(Instant::now);
        let length = duration.duration(self.transport.bpm());

        if !self.synth.trigger(pitch.frequency(), length, at) {
            log::debug!("dropped {pitch}: audio is not unlocked");
            return;
        }
        self.midi.play(pitch.midi(), length, at);
    }

    fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{Sequencer, SequencerSettings};
    use crate::view::GridSurface;
    use std::thread;
    use std::time::Duration;

    fn fast_config() -> Config {
        Config {
            bpm: 300.0,
            step: NoteValue::ThirtySecond,
            lookahead: Duration::ZERO,
            ..Config::defaults()
        }
    }

    #[test]
    fn test_notes_are_refused_before_unlock() {
        let mut engine = Engine::new(&fast_config());
        assert!(!engine.midi().is_connected());

        engine.trigger_attack_release(Pitch::C4, NoteValue::Eighth, None);
        engine.trigger_attack_release(Pitch::C4, NoteValue::Eighth, Some(Instant::now()));
        assert_eq!(engine.active_voices(), 0);
        assert!(engine.poll_events().is_empty());
    }

    #[test]
    fn test_ticks_reach_poll_events() {
        let mut engine = Engine::new(&fast_config());
        let id = engine.schedule_loop(8, NoteValue::ThirtySecond);
        engine.start_transport();
        thread::sleep(Duration::from_millis(60));
        engine.stop_transport();

        let events = engine.poll_events();
        assert!(!events.is_empty());
        assert!(events
            .iter()
            .all(|event| matches!(event, PlaybackEvent::Tick { id: tick_id, .. } if *tick_id == id)));
    }

    #[test]
    fn test_ticks_from_an_unowned_loop_leave_the_grid_alone() {
        let config = fast_config();
        let mut seq = Sequencer::new(
            SequencerSettings::from(&config),
            Engine::new(&config),
            GridSurface::new(config.feedback),
        );

        let stray = seq.playback_mut().schedule_loop(8, NoteValue::ThirtySecond);
        seq.playback_mut().start_transport();
        thread::sleep(Duration::from_millis(60));
        seq.playback_mut().stop_loop(stray);
        seq.playback_mut().stop_transport();
        seq.playback_mut().dispose_loop(stray);
        seq.pump();

        assert_eq!(seq.active_loop(), None);
        assert!(!seq.is_playing());
        assert_eq!(seq.view().highlighted_column(), None);
        assert_eq!(seq.playback().active_voices(), 0);
    }
}
