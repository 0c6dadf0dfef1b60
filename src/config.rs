/// Settings loaded from the embedded `config.toml`, with per-key overrides
/// from `<config dir>/fishgrid/config.toml`.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::audio::SynthSettings;
use crate::error::ConfigError;
use crate::pitch::{NoteValue, Pitch};
use crate::sequencer::grid::ROWS;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    sequencer: SequencerSection,
    #[serde(default)]
    view: ViewSection,
    #[serde(default)]
    audio: AudioSection,
    #[serde(default)]
    midi: MidiSection,
}

#[derive(Deserialize, Default)]
struct SequencerSection {
    bpm: Option<f32>,
    step: Option<NoteValue>,
    note_length: Option<NoteValue>,
    rows: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct ViewSection {
    feedback_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct AudioSection {
    volume: Option<f32>,
    reverb_decay: Option<f32>,
    reverb_pre_delay: Option<f32>,
    lookahead_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct MidiSection {
    port: Option<String>,
}

/// Resolved, validated settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bpm: f32,
    pub step: NoteValue,
    pub note_length: NoteValue,
    pub rows: [Pitch; ROWS],
    pub feedback: Duration,
    pub synth: SynthSettings,
    pub lookahead: Duration,
    pub midi_port: Option<String>,
}

impl Config {
    /// Embedded defaults merged with the user's file, if any. A user file that
    /// cannot be read or fails validation is logged and skipped.
    pub fn load() -> Self {
        let defaults = Self::defaults();
        match user_config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    log::info!(target: "config", "loaded {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(target: "config", "ignoring config {}: {}", path.display(), e);
                    defaults
                }
            },
            _ => defaults,
        }
    }

    pub fn defaults() -> Self {
        let base = parse_file(DEFAULT_CONFIG).and_then(resolve);
        match base {
            Ok(config) => config,
            Err(e) => {
                log::error!(target: "config", "embedded config.toml is invalid: {e}");
                Self::fallback()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse user TOML on top of the embedded defaults.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut base = parse_file(DEFAULT_CONFIG)?;
        let user = parse_file(contents)?;
        merge(&mut base, user);
        resolve(base)
    }

    fn fallback() -> Self {
        Self {
            bpm: 120.0,
            step: NoteValue::Eighth,
            note_length: NoteValue::Eighth,
            rows: crate::pitch::DEFAULT_ROWS.map(|name| Pitch::parse(name).unwrap_or(Pitch::C4)),
            feedback: crate::view::DEFAULT_FEEDBACK,
            synth: SynthSettings::default(),
            lookahead: Duration::from_millis(100),
            midi_port: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

fn parse_file(contents: &str) -> Result<ConfigFile, ConfigError> {
    Ok(toml::from_str(contents)?)
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    let seq = &mut base.sequencer;
    seq.bpm = user.sequencer.bpm.or(seq.bpm);
    seq.step = user.sequencer.step.or(seq.step);
    seq.note_length = user.sequencer.note_length.or(seq.note_length);
    seq.rows = user.sequencer.rows.or(seq.rows.take());

    base.view.feedback_ms = user.view.feedback_ms.or(base.view.feedback_ms);

    let audio = &mut base.audio;
    audio.volume = user.audio.volume.or(audio.volume);
    audio.reverb_decay = user.audio.reverb_decay.or(audio.reverb_decay);
    audio.reverb_pre_delay = user.audio.reverb_pre_delay.or(audio.reverb_pre_delay);
    audio.lookahead_ms = user.audio.lookahead_ms.or(audio.lookahead_ms);

    base.midi.port = user.midi.port.or(base.midi.port.take());
}

fn resolve(file: ConfigFile) -> Result<Config, ConfigError> {
    let fallback = Config::fallback();

    let bpm = file.sequencer.bpm.unwrap_or(fallback.bpm);
    if !(20.0..=300.0).contains(&bpm) {
        return Err(ConfigError::Bpm(bpm));
    }

    let rows = match file.sequencer.rows {
        Some(names) => parse_rows(&names)?,
        None => fallback.rows,
    };

    let volume = file.audio.volume.unwrap_or(fallback.synth.volume);
    if !(0.0..=1.0).contains(&volume) {
        return Err(ConfigError::Volume(volume));
    }

    let reverb_decay = file.audio.reverb_decay.unwrap_or(fallback.synth.reverb_decay);
    if !(0.01..=30.0).contains(&reverb_decay) {
        return Err(ConfigError::ReverbDecay(reverb_decay));
    }

    let reverb_pre_delay = file
        .audio
        .reverb_pre_delay
        .unwrap_or(fallback.synth.reverb_pre_delay);
    if !(0.0..=1.0).contains(&reverb_pre_delay) {
        return Err(ConfigError::PreDelay(reverb_pre_delay));
    }

    Ok(Config {
        bpm,
        step: file.sequencer.step.unwrap_or(fallback.step),
        note_length: file.sequencer.note_length.unwrap_or(fallback.note_length),
        rows,
        feedback: file
            .view
            .feedback_ms
            .map(Duration::from_millis)
            .unwrap_or(fallback.feedback),
        synth: SynthSettings {
            volume,
            reverb_decay,
            reverb_pre_delay,
        },
        lookahead: file
            .audio
            .lookahead_ms
            .map(Duration::from_millis)
            .unwrap_or(fallback.lookahead),
        midi_port: file.midi.port.filter(|port| !port.is_empty()),
    })
}

fn parse_rows(names: &[String]) -> Result<[Pitch; ROWS], ConfigError> {
    let pitches = names
        .iter()
        .map(|name| Pitch::parse(name))
        .collect::<Result<Vec<_>, _>>()?;
    let found = pitches.len();
    pitches.try_into().map_err(|_| ConfigError::RowCount {
        expected: ROWS,
        found,
    })
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fishgrid").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.bpm, 120.0);
        assert_eq!(config.step, NoteValue::Eighth);
        assert_eq!(config.note_length, NoteValue::Eighth);
        assert_eq!(config.rows[0].to_string(), "A4");
        assert_eq!(config.rows[7].to_string(), "C5");
        assert_eq!(config.feedback, Duration::from_millis(300));
        assert_eq!(config.synth.reverb_decay, 2.5);
        assert_eq!(config.lookahead, Duration::from_millis(100));
        assert_eq!(config.midi_port, None);
        assert_eq!(Config::defaults(), config);
    }

    #[test]
    fn test_user_keys_override_defaults() {
        let config = Config::from_toml(
            r#"
            [sequencer]
            bpm = 90.0
            step = "16n"

            [midi]
            port = "Synth In"
            "#,
        )
        .unwrap();
        assert_eq!(config.bpm, 90.0);
        assert_eq!(config.step, NoteValue::Sixteenth);
        assert_eq!(config.note_length, NoteValue::Eighth);
        assert_eq!(config.midi_port.as_deref(), Some("Synth In"));
    }

    #[test]
    fn test_rows_must_have_eight_pitches() {
        let err = Config::from_toml("[sequencer]\nrows = [\"C4\", \"D4\"]").unwrap_err();
        assert!(matches!(err, ConfigError::RowCount { expected: 8, found: 2 }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_toml("[sequencer]\nbpm = 1000.0"),
            Err(ConfigError::Bpm(_))
        ));
        assert!(matches!(
            Config::from_toml("[sequencer]\nstep = \"7n\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_toml("[sequencer]\nrows = [\"C4\",\"D4\",\"E4\",\"F4\",\"G4\",\"A4\",\"B4\",\"Q4\"]"),
            Err(ConfigError::Pitch(_))
        ));
        assert!(matches!(
            Config::from_toml("[audio]\nvolume = 2.0"),
            Err(ConfigError::Volume(_))
        ));
        assert!(matches!(
            Config::from_toml("[audio]\nreverb_pre_delay = 1e9"),
            Err(ConfigError::PreDelay(_))
        ));
        assert!(matches!(
            Config::from_toml("[audio]\nreverb_pre_delay = -0.5"),
            Err(ConfigError::PreDelay(_))
        ));
        assert!(matches!(
            Config::from_toml("[audio]\nreverb_decay = -1.0"),
            Err(ConfigError::ReverbDecay(_))
        ));
        assert!(matches!(
            Config::from_toml("[audio]\nreverb_decay = nan"),
            Err(ConfigError::ReverbDecay(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[view]\nfeedback_ms = 120").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.feedback, Duration::from_millis(120));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
