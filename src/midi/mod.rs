/// MIDI output using midir
///
/// Mirrors every note the sequencer sounds to an external port. Note on is
/// sent at the scheduled instant and note off after the note's length.
use midir::{MidiOutput, MidiOutputConnection};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::MidiError;
use crate::sequencer::playback::lock;

const CLIENT_NAME: &str = "fishgrid MIDI Output";
const VELOCITY: u8 = 100;

pub struct MidiMirror {
    connection: Option<Arc<Mutex<MidiOutputConnection>>>,
    port_name: Option<String>,
}

impl MidiMirror {
    pub fn new() -> Self {
        Self {
            connection: None,
            port_name: None,
        }
    }

    pub fn available_ports() -> Vec<String> {
        match MidiOutput::new(CLIENT_NAME) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(err) => {
                log::warn!("could not list MIDI ports: {err}");
                vec![]
            }
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<(), MidiError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or(MidiError::InvalidPort(port_index))?;
        let name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "fishgrid")
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        log::info!("MIDI output connected to {name:?}");
        self.connection = Some(Arc::new(Mutex::new(connection)));
        self.port_name = Some(name);
        Ok(())
    }

    pub fn connect_by_name(&mut self, name: &str) -> Result<(), MidiError> {
        let index = Self::available_ports()
            .iter()
            .position(|port| port == name)
            .ok_or_else(|| MidiError::UnknownPort(name.to_string()))?;
        self.connect(index)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
        self.port_name = None;
    }

    /// Send note on at `at` and note off `length` later, off the caller's thread.
    pub fn play(&self, note: u8, length: Duration, at: Instant) {
        let Some(connection) = self.connection.as_ref().map(Arc::clone) else {
            return;
        };

        thread::spawn(move || {
            sleep_until(at);
            if let Err(err) = send(&connection, &note_on(note, VELOCITY)) {
                log::warn!("{err}");
                return;
            }
            thread::sleep(length);
            if let Err(err) = send(&connection, &note_off(note)) {
                log::warn!("{err}");
            }
        });
    }
}

impl Default for MidiMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn sleep_until(at: Instant) {
    let wait = at.saturating_duration_since(Instant::now());
    if !wait.is_zero() {
        thread::sleep(wait);
    }
}

fn send(connection: &Mutex<MidiOutputConnection>, message: &[u8]) -> Result<(), MidiError> {
    lock(connection).send(message)?;
    Ok(())
}

fn note_on(note: u8, velocity: u8) -> [u8; 3] {
    [0x90, note & 0x7f, velocity & 0x7f]
}

fn note_off(note: u8) -> [u8; 3] {
    [0x80, note & 0x7f, 0]
}
