/// Pitches and note values
///
/// Rows of the grid are bound to pitches written in scientific notation
/// ("A4", "C#3", "Eb5"). Durations and step intervals are written as
/// musical subdivisions ("8n" is an eighth note).
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PitchError;

/// Row pitches used when no configuration overrides them, top row first.
pub const DEFAULT_ROWS: [&str; 8] = ["A4", "G4", "E4", "C4", "E4", "D4", "C4", "C5"];

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pitch(u8);

impl Pitch {
    /// Middle C
    pub const C4: Pitch = Pitch(60);

    pub fn from_midi(note: u8) -> Option<Self> {
        (note <= 127).then_some(Self(note))
    }

    pub fn midi(self) -> u8 {
        self.0
    }

    pub fn frequency(self) -> f32 {
        440.0 * 2.0_f32.powf((self.0 as f32 - 69.0) / 12.0)
    }

    pub fn parse(name: &str) -> Result<Self, PitchError> {
        let name = name.trim();
        let mut chars = name.chars();
        let letter = chars.next().ok_or(PitchError::Empty)?;

        let base: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(PitchError::InvalidLetter(name.to_string())),
        };

        let rest = chars.as_str();
        let (accidental, octave) = match rest.chars().next() {
            Some('#') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest),
        };

        let octave: i32 = octave
            .parse()
            .map_err(|_| PitchError::InvalidOctave(name.to_string()))?;
        if !(-1..=9).contains(&octave) {
            return Err(PitchError::InvalidOctave(name.to_string()));
        }

        let midi = (octave + 1) * 12 + base + accidental;
        u8::try_from(midi)
            .ok()
            .and_then(Self::from_midi)
            .ok_or_else(|| PitchError::OutOfRange(name.to_string()))
    }
}

impl FromStr for Pitch {
    type Err = PitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&midi_note_name(self.0))
    }
}

pub fn midi_note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// A musical subdivision of a whole note, used both for the step interval
/// and for note lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum NoteValue {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
}

impl NoteValue {
    fn divisor(self) -> u32 {
        match self {
            NoteValue::Whole => 1,
            NoteValue::Half => 2,
            NoteValue::Quarter => 4,
            NoteValue::Eighth => 8,
            NoteValue::Sixteenth => 16,
            NoteValue::ThirtySecond => 32,
        }
    }

    /// Length of this subdivision at the given tempo (quarter note = one beat).
    pub fn duration(self, bpm: f32) -> Duration {
        let beat = 60.0 / bpm as f64;
        Duration::from_secs_f64(beat * 4.0 / self.divisor() as f64)
    }
}

impl FromStr for NoteValue {
    type Err = PitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1n" => Ok(NoteValue::Whole),
            "2n" => Ok(NoteValue::Half),
            "4n" => Ok(NoteValue::Quarter),
            "8n" => Ok(NoteValue::Eighth),
            "16n" => Ok(NoteValue::Sixteenth),
            "32n" => Ok(NoteValue::ThirtySecond),
            other => Err(PitchError::InvalidNoteValue(other.to_string())),
        }
    }
}

impl TryFrom<String> for NoteValue {
    type Error = PitchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for NoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}n", self.divisor())
    }
}
