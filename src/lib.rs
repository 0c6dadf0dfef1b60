/// FISHGRID - An 8x8 step sequencer library
///
/// This library provides the pieces behind the fish grid:
/// - Fixed 8x8 grid bound to eight row pitches
/// - Sequencer controller with play/stop and the audio unlock gate
/// - Playback engine: transport clock, synth output and MIDI mirror
/// - Headless view model the GUI draws from

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod midi;
pub mod pitch;
pub mod sequencer;
pub mod view;

// Re-export commonly used types
pub use config::Config;
pub use engine::Engine;
pub use error::{AudioError, ConfigError, MidiError, PitchError};
pub use pitch::{midi_note_name, NoteValue, Pitch};
pub use sequencer::playback::{LoopId, Playback, PlaybackEvent, Transport};
pub use sequencer::{AudioState, Grid, PlaybackState, Sequencer, SequencerSettings};
pub use view::{CellFlags, GridSurface, GridView};
