/// Error types for the fallible edges of the sequencer: audio, MIDI, pitch
/// parsing and configuration. Grid and transport operations are total.
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("could not query output config: {0}")]
    OutputConfig(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build output stream: {0}")]
    BuildStream(String),

    #[error("failed to start output stream: {0}")]
    Play(String),

    #[error("audio thread exited before reporting")]
    ThreadGone,
}

#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("failed to create MIDI output: {0}")]
    Init(#[from] midir::InitError),

    #[error("invalid port index {0}")]
    InvalidPort(usize),

    #[error("no MIDI port named {0:?}")]
    UnknownPort(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send message: {0}")]
    Send(#[from] midir::SendError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PitchError {
    #[error("empty pitch name")]
    Empty,

    #[error("invalid note letter in {0:?}")]
    InvalidLetter(String),

    #[error("invalid octave in {0:?}")]
    InvalidOctave(String),

    #[error("pitch {0:?} is outside the MIDI range")]
    OutOfRange(String),

    #[error("unknown note value {0:?} (expected 1n, 2n, 4n, 8n, 16n or 32n)")]
    InvalidNoteValue(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid pitch in config: {0}")]
    Pitch(#[from] PitchError),

    #[error("expected {expected} row pitches, found {found}")]
    RowCount { expected: usize, found: usize },

    #[error("bpm must be within 20..=300, got {0}")]
    Bpm(f32),

    #[error("volume must be within 0.0..=1.0, got {0}")]
    Volume(f32),

    #[error("reverb_decay must be within 0.01..=30.0 seconds, got {0}")]
    ReverbDecay(f32),

    #[error("reverb_pre_delay must be within 0.0..=1.0 seconds, got {0}")]
    PreDelay(f32),
}
