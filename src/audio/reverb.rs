/// Small Schroeder reverb: a pre-delay line feeding four parallel feedback
/// combs and two series all-pass stages.

// Comb and all-pass lengths in seconds, mutually prime at common rates
const COMB_TIMES: [f32; 4] = [0.0297, 0.0371, 0.0411, 0.0437];
const ALLPASS_TIMES: [f32; 2] = [0.005, 0.0017];
const ALLPASS_GAIN: f32 = 0.7;
const WET: f32 = 0.3;

struct DelayLine {
    buffer: Vec<f32>,
    pos: usize,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    fn read(&self) -> f32 {
        self.buffer[self.pos]
    }

    fn write_and_advance(&mut self, value: f32) {
        self.buffer[self.pos] = value;
        self.pos = (self.pos + 1) % self.buffer.len();
    }
}

pub struct Reverb {
    pre_delay: DelayLine,
    combs: Vec<(DelayLine, f32)>,
    allpasses: Vec<DelayLine>,
}

impl Reverb {
    /// `decay` is the time in seconds for the tail to fall by 60 dB.
    pub fn new(sample_rate: f32, decay: f32, pre_delay: f32) -> Self {
        let decay = decay.max(0.01);
        let combs = COMB_TIMES
            .iter()
            .map(|&time| {
                // feedback gain giving -60 dB after `decay` seconds
                let gain = 10.0_f32.powf(-3.0 * time / decay);
                (DelayLine::new((time * sample_rate) as usize), gain)
            })
            .collect();
        let allpasses = ALLPASS_TIMES
            .iter()
            .map(|&time| DelayLine::new((time * sample_rate) as usize))
            .collect();

        Self {
            pre_delay: DelayLine::new((pre_delay.max(0.0) * sample_rate) as usize),
            combs,
            allpasses,
        }
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let delayed = self.pre_delay.read();
        self.pre_delay.write_and_advance(input);

        let mut wet = 0.0;
        for (line, gain) in &mut self.combs {
            let out = line.read();
            line.write_and_advance(delayed + out * *gain);
            wet += out;
        }
        wet /= self.combs.len() as f32;

        for line in &mut self.allpasses {
            let buffered = line.read();
            let out = buffered - ALLPASS_GAIN * wet;
            line.write_and_advance(wet + ALLPASS_GAIN * out);
            wet = out;
        }

        input * (1.0 - WET) + wet * WET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_stays_silent() {
        let mut reverb = Reverb::new(48_000.0, 2.5, 0.1);
        for _ in 0..10_000 {
            assert_eq!(reverb.process(0.0), 0.0);
        }
    }

    #[test]
    fn test_impulse_produces_a_decaying_tail() {
        let sample_rate = 8_000.0;
        let mut reverb = Reverb::new(sample_rate, 0.5, 0.01);
        reverb.process(1.0);

        let tail: Vec<f32> = (0..(sample_rate as usize * 2)).map(|_| reverb.process(0.0)).collect();
        let energy = |range: std::ops::Range<usize>| tail[range].iter().map(|s| s * s).sum::<f32>();

        let early = energy(0..4_000);
        let late = energy(12_000..16_000);
        assert!(early > 0.0);
        assert!(late < early * 0.01);
    }
}
