use crate::models::Severity;
use std::f32::consts::TAU;

/// Gain floor the envelope starts from and decays to
pub const ENVELOPE_FLOOR: f32 = 0.001;
/// Linear attack time in seconds
pub const ATTACK_SECS: f32 = 0.02;
/// Exponential release time in seconds
pub const RELEASE_SECS: f32 = 0.05;

/// One sine tone inside a cue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    /// Hz
    pub frequency: f32,
    /// Offset from the start of the cue, seconds
    pub start: f32,
    pub duration: f32,
    /// Peak gain
    pub volume: f32,
}

const fn tone(frequency: f32, start: f32, duration: f32, volume: f32) -> Tone {
    Tone {
        frequency,
        start,
        duration,
        volume,
    }
}

/// Descending A5-E5-A4 triad, played twice
const CRITICAL: &[Tone] = &[
    tone(880.0, 0.0, 0.15, 0.25),
    tone(660.0, 0.18, 0.15, 0.25),
    tone(440.0, 0.36, 0.2, 0.25),
    tone(880.0, 0.6, 0.15, 0.2),
    tone(660.0, 0.78, 0.15, 0.2),
    tone(440.0, 0.96, 0.25, 0.2),
];

/// C5-E5 chime, repeated once
const WARNING: &[Tone] = &[
    tone(523.25, 0.0, 0.2, 0.2),
    tone(659.25, 0.22, 0.2, 0.2),
    tone(523.25, 0.46, 0.2, 0.15),
    tone(659.25, 0.68, 0.25, 0.15),
];

/// Ascending G4-C5
const INFO: &[Tone] = &[tone(392.0, 0.0, 0.15, 0.12), tone(523.25, 0.17, 0.2, 0.12)];

/// A4-C#5, for operational events such as a camera starting
const SYSTEM: &[Tone] = &[tone(440.0, 0.0, 0.12, 0.1), tone(554.37, 0.13, 0.15, 0.1)];

pub fn severity_pattern(severity: Severity) -> &'static [Tone] {
    match severity {
        Severity::Critical => CRITICAL,
        Severity::Warning => WARNING,
        Severity::Info => INFO,
    }
}

pub fn system_pattern() -> &'static [Tone] {
    SYSTEM
}

/// Length of a pattern in seconds
pub fn pattern_duration(tones: &[Tone]) -> f32 {
    tones
        .iter()
        .map(|t| t.start + t.duration)
        .fold(0.0, f32::max)
}

/// Gain of `tone` at `t` seconds after its start.
///
/// Linear ramp from the floor to full volume over the attack, hold, then an
/// exponential decay back to the floor over the last `RELEASE_SECS`.
pub fn envelope(tone: &Tone, t: f32) -> f32 {
    if t < 0.0 || t > tone.duration {
        return 0.0;
    }

    let volume = tone.volume.max(ENVELOPE_FLOOR);
    let release_start = (tone.duration - RELEASE_SECS).max(ATTACK_SECS);

    if t < ATTACK_SECS {
        ENVELOPE_FLOOR + (volume - ENVELOPE_FLOOR) * (t / ATTACK_SECS)
    } else if t < release_start {
        volume
    } else {
        let span = (tone.duration - release_start).max(f32::EPSILON);
        let progress = ((t - release_start) / span).min(1.0);
        volume * (ENVELOPE_FLOOR / volume).powf(progress)
    }
}

/// Render a pattern to mono samples at `sample_rate`
pub fn render(tones: &[Tone], sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate.max(1) as f32;
    let total = (pattern_duration(tones) * rate).ceil() as usize;
    let mut samples = vec![0.0f32; total];

    for tone in tones {
        let first = (tone.start * rate).floor() as usize;
        let count = (tone.duration * rate).ceil() as usize;

        for (offset, sample) in samples.iter_mut().skip(first).take(count).enumerate() {
            let t = offset as f32 / rate;
            *sample += (TAU * tone.frequency * t).sin() * envelope(tone, t);
        }
    }

    for sample in &mut samples {
        *sample = sample.clamp(-1.0, 1.0);
    }
    samples
}
