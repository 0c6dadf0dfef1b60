/// Audio output using cpal
///
/// Nothing is opened until `Synth::unlock`. The output stream lives on its
/// own thread for as long as the synth exists; notes are handed to it through
/// a shared voice list and start at their scheduled instant.
mod reverb;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub use reverb::Reverb;

use crate::error::AudioError;
use crate::sequencer::playback::{lock, PlaybackEvent};

const MAX_VOICES: usize = 32;

// Envelope shape, in seconds
const ATTACK: f32 = 0.005;
const DECAY: f32 = 0.1;
const SUSTAIN: f32 = 0.3;
const RELEASE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthSettings {
    pub volume: f32,
    pub reverb_decay: f32,
    pub reverb_pre_delay: f32,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            volume: 0.2,
            reverb_decay: 2.5,
            reverb_pre_delay: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockStatus {
    Idle,
    Pending,
    Ready,
}

#[derive(Debug, Clone)]
struct Voice {
    frequency: f32,
    phase: f32,
    start: Instant,
    hold: Duration,
    started: bool,
    position: u64,
}

impl Voice {
    fn level(&self, sample_rate: f32) -> f32 {
        let t = self.position as f32 / sample_rate;
        let hold = self.hold.as_secs_f32();
        if t < hold {
            envelope_ads(t)
        } else {
            envelope_ads(hold) * (1.0 - (t - hold) / RELEASE).max(0.0)
        }
    }

    fn finished(&self, sample_rate: f32) -> bool {
        self.started && self.position as f32 / sample_rate >= self.hold.as_secs_f32() + RELEASE
    }

    fn render_into(&mut self, out: &mut [f32], buffer_start: Instant, sample_rate: f32) {
        let first = if self.started {
            0
        } else {
            let offset = self.start.saturating_duration_since(buffer_start).as_secs_f32() * sample_rate;
            let offset = offset as usize;
            if offset >= out.len() {
                return;
            }
            self.started = true;
            offset
        };

        let increment = self.frequency / sample_rate;
        for sample in &mut out[first..] {
            let triangle = 4.0 * (self.phase - 0.5).abs() - 1.0;
            *sample += triangle * self.level(sample_rate);

            self.phase += increment;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            self.position += 1;
        }
    }
}

fn envelope_ads(t: f32) -> f32 {
    if t < ATTACK {
        t / ATTACK
    } else if t < ATTACK + DECAY {
        1.0 - (1.0 - SUSTAIN) * (t - ATTACK) / DECAY
    } else {
        SUSTAIN
    }
}

/// Mixes voices and runs them through the reverb; owned by the output callback.
struct Renderer {
    voices: Arc<Mutex<Vec<Voice>>>,
    reverb: Reverb,
    volume: f32,
    sample_rate: f32,
    scratch: Vec<f32>,
}

impl Renderer {
    fn new(voices: Arc<Mutex<Vec<Voice>>>, sample_rate: f32, settings: SynthSettings) -> Self {
        Self {
            voices,
            reverb: Reverb::new(sample_rate, settings.reverb_decay, settings.reverb_pre_delay),
            volume: settings.volume,
            sample_rate,
            scratch: Vec::new(),
        }
    }

    fn render(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        self.scratch.clear();
        self.scratch.resize(frames, 0.0);

        let buffer_start = Instant::now();
        {
            let mut voices = lock(&self.voices);
            for voice in voices.iter_mut() {
                voice.render_into(&mut self.scratch, buffer_start, self.sample_rate);
            }
            let sample_rate = self.sample_rate;
            voices.retain(|voice| !voice.finished(sample_rate));
        }

        for (frame, dry) in data.chunks_mut(channels).zip(&self.scratch) {
            let value = self.reverb.process(dry * self.volume).clamp(-1.0, 1.0);
            for sample in frame {
                *sample = value;
            }
        }
    }
}

pub struct Synth {
    settings: SynthSettings,
    voices: Arc<Mutex<Vec<Voice>>>,
    status: Arc<Mutex<UnlockStatus>>,
    // Dropping this sender releases the audio thread and its stream.
    shutdown: Option<Sender<()>>,
}

impl Synth {
    pub fn new(settings: SynthSettings) -> Self {
        Self {
            settings,
            voices: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new(UnlockStatus::Idle)),
            shutdown: None,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        *lock(&self.status) == UnlockStatus::Ready
    }

    pub fn active_voices(&self) -> usize {
        lock(&self.voices).len()
    }

    /// Open the output device on a dedicated thread. The outcome is sent as
    /// `PlaybackEvent::Unlocked`. While an attempt is in flight further calls
    /// are ignored; once unlocked they report success straight away.
    pub fn unlock(&mut self, events: Sender<PlaybackEvent>) {
        {
            let mut status = lock(&self.status);
            match *status {
                UnlockStatus::Ready => {
                    let _ = events.send(PlaybackEvent::Unlocked(Ok(())));
                    return;
                }
                UnlockStatus::Pending => return,
                UnlockStatus::Idle => *status = UnlockStatus::Pending,
            }
        }

        let (shutdown_tx, shutdown_rx) = channel();
        self.shutdown = Some(shutdown_tx);

        let voices = Arc::clone(&self.voices);
        let status = Arc::clone(&self.status);
        let settings = self.settings;
        let thread_events = events.clone();
        let spawned = thread::Builder::new()
            .name("fishgrid-audio".into())
            .spawn(move || run_output(voices, status, settings, thread_events, shutdown_rx));

        if let Err(err) = spawned {
            log::error!("could not spawn audio thread: {err}");
            self.abort_unlock(&events);
        }
    }

    /// Back out of an unlock whose audio thread never ran, so it can be retried.
    fn abort_unlock(&mut self, events: &Sender<PlaybackEvent>) {
        self.shutdown = None;
        *lock(&self.status) = UnlockStatus::Idle;
        let _ = events.send(PlaybackEvent::Unlocked(Err(AudioError::ThreadGone)));
    }

    /// Queue a note. Returns false when audio has not been unlocked yet.
    pub fn trigger(&self, frequency: f32, hold: Duration, at: Instant) -> bool {
        if !self.is_unlocked() {
            return false;
        }
        push_voice(&self.voices, frequency, hold, at);
        true
    }
}

impl Default for Synth {
    fn default() -> Self {
        Self::new(SynthSettings::default())
    }
}

fn push_voice(voices: &Mutex<Vec<Voice>>, frequency: f32, hold: Duration, at: Instant) {
    let mut voices = lock(voices);
    if voices.len() >= MAX_VOICES {
        voices.remove(0);
    }
    voices.push(Voice {
        frequency,
        phase: 0.0,
        start: at,
        hold,
        started: false,
        position: 0,
    });
}

fn run_output(
    voices: Arc<Mutex<Vec<Voice>>>,
    status: Arc<Mutex<UnlockStatus>>,
    settings: SynthSettings,
    events: Sender<PlaybackEvent>,
    shutdown: Receiver<()>,
) {
    match setup_audio_stream(voices, settings) {
        Ok(stream) => {
            *lock(&status) = UnlockStatus::Ready;
            let _ = events.send(PlaybackEvent::Unlocked(Ok(())));
            // Park until the synth goes away; the stream plays meanwhile.
            let _ = shutdown.recv();
            drop(stream);
        }
        Err(err) => {
            *lock(&status) = UnlockStatus::Idle;
            let _ = events.send(PlaybackEvent::Unlocked(Err(err)));
        }
    }
}

fn setup_audio_stream(
    voices: Arc<Mutex<Vec<Voice>>>,
    settings: SynthSettings,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;
    let config = device
        .default_output_config()
        .map_err(|e| AudioError::OutputConfig(e.to_string()))?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            config.sample_format()
        )));
    }

    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;
    let mut renderer = Renderer::new(voices, sample_rate, settings);

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                renderer.render(data, channels);
            },
            |err| log::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| AudioError::BuildStream(e.to_string()))?;

    stream.play().map_err(|e| AudioError::Play(e.to_string()))?;
    log::debug!("audio output open at {sample_rate} Hz, {channels} channel(s)");
    Ok(stream)
}
