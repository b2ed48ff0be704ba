// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The real-time voice mixer.
//!
//! `fill` runs inside the audio callback. It must never block on locks held
//! for unbounded time, allocate per call, or let a bad voice propagate an
//! error past the callback boundary.

use crossbeam_channel::Receiver;

use crate::samples::bank::BankSlot;
use crate::samples::voice::Voice;

/// Default cap on simultaneously sounding voices.
pub const DEFAULT_MAX_POLYPHONY: usize = 80;

/// Length of the fade-out ramp, in frames (~680ms at 44.1kHz).
const FADEOUT_FRAMES: u32 = 30_000;

/// Semitone range of the pitch-shift table.
const SPEED_SEMITONES: usize = 84;

/// Table index of a zero-semitone shift.
const SPEED_CENTER: i32 = (SPEED_SEMITONES / 2) as i32;

/// Precomputed per-semitone resampling rates: `2^(offset/12)` across the
/// 84-semitone window, centered on zero shift.
pub struct SpeedTable {
    factors: Vec<f64>,
}

impl SpeedTable {
    pub fn new() -> SpeedTable {
        SpeedTable {
            factors: (0..SPEED_SEMITONES)
                .map(|i| 2f64.powf((i as i32 - SPEED_CENTER) as f64 / 12.0))
                .collect(),
        }
    }

    /// Playback rate for sounding `note` using a sample recorded at
    /// `native`. Offsets beyond the table clamp to its edges.
    pub fn factor(&self, note: u8, native: u8) -> f64 {
        let index = (note as i32 - native as i32 + SPEED_CENTER)
            .clamp(0, SPEED_SEMITONES as i32 - 1) as usize;
        self.factors[index]
    }
}

impl Default for SpeedTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Precomputed fade-out envelope: a linear ramp raised to the 6th power,
/// followed by an equal run of zeros so offsets can keep advancing past the
/// ramp without special-casing.
pub struct FadeOut {
    curve: Vec<f32>,
}

impl FadeOut {
    pub fn new() -> FadeOut {
        let ramp = FADEOUT_FRAMES as usize;
        let mut curve = Vec::with_capacity(ramp * 2);
        curve.extend((0..ramp).map(|i| (1.0 - i as f32 / (ramp - 1) as f32).powi(6)));
        curve.extend(std::iter::repeat(0.0).take(ramp));
        FadeOut { curve }
    }

    /// Envelope gain at the given offset.
    pub fn gain(&self, offset: u32) -> f32 {
        self.curve[(offset as usize).min(self.curve.len() - 1)]
    }

    /// True once the ramp has been fully consumed; the voice is silent and
    /// can be removed.
    pub fn is_complete(&self, offset: u32) -> bool {
        offset >= FADEOUT_FRAMES
    }

    /// Length of the audible ramp, in frames.
    pub fn ramp_len(&self) -> u32 {
        FADEOUT_FRAMES
    }
}

impl Default for FadeOut {
    fn default() -> Self {
        Self::new()
    }
}

/// Mixes every active voice into the hardware output buffer.
pub struct VoiceMixer {
    /// Voices currently sounding. Owned exclusively by the audio callback.
    voices: Vec<Voice>,
    /// Newly spawned voices arrive here from the event router.
    voice_rx: Receiver<Voice>,
    /// The active bank, swapped atomically by the loader.
    bank_slot: BankSlot,
    /// Pitch-shift rates, computed once.
    speed: SpeedTable,
    /// Fade-out envelope, computed once.
    fade: FadeOut,
    /// Voice cap; the oldest voices beyond it are stolen.
    max_polyphony: usize,
}

impl VoiceMixer {
    /// Creates a mixer reading new voices from `voice_rx` and the current
    /// bank from `bank_slot`.
    pub fn new(bank_slot: BankSlot, voice_rx: Receiver<Voice>, max_polyphony: usize) -> VoiceMixer {
        VoiceMixer {
            voices: Vec::with_capacity(max_polyphony + 1),
            voice_rx,
            bank_slot,
            speed: SpeedTable::new(),
            fade: FadeOut::new(),
            max_polyphony,
        }
    }

    /// Mixes one buffer of interleaved stereo frames. Runs on the audio
    /// callback thread.
    pub fn fill(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        // Drain voices spawned since the last callback.
        while let Ok(voice) = self.voice_rx.try_recv() {
            self.voices.push(voice);
        }

        // Voice stealing: keep the most recently added voices.
        if self.voices.len() > self.max_polyphony {
            let excess = self.voices.len() - self.max_polyphony;
            for voice in self.voices.drain(..excess) {
                voice.finish();
            }
        }

        let gain = self.bank_slot.read().gain();

        let Self {
            voices,
            speed,
            fade,
            ..
        } = self;
        voices.retain_mut(|voice| {
            let factor = speed.factor(voice.note(), voice.sound().midinote());
            voice.mix_into(out, factor, fade)
        });

        if (gain - 1.0).abs() > f32::EPSILON {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Number of currently active voices.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::samples::bank::{new_bank_slot, SampleBank};
    use crate::samples::sound::Sound;

    use super::*;

    fn mixer_with(
        max_polyphony: usize,
    ) -> (VoiceMixer, crossbeam_channel::Sender<Voice>, BankSlot) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let slot = new_bank_slot();
        (VoiceMixer::new(slot.clone(), rx, max_polyphony), tx, slot)
    }

    #[test]
    fn test_speed_table() {
        let speed = SpeedTable::new();
        assert!((speed.factor(60, 60) - 1.0).abs() < 1e-9);
        assert!((speed.factor(72, 60) - 2.0).abs() < 1e-9);
        assert!((speed.factor(48, 60) - 0.5).abs() < 1e-9);
        // Far out-of-range offsets clamp instead of panicking.
        assert!(speed.factor(127, 0) > 1.0);
        assert!(speed.factor(0, 127) < 1.0);
    }

    #[test]
    fn test_fade_curve_shape() {
        let fade = FadeOut::new();
        assert_eq!(fade.gain(0), 1.0);
        for offset in 1..fade.ramp_len() {
            assert!(fade.gain(offset) < fade.gain(offset - 1));
        }
        assert_eq!(fade.gain(fade.ramp_len() - 1), 0.0);
        assert_eq!(fade.gain(fade.ramp_len() * 2 - 1), 0.0);
        assert!(!fade.is_complete(fade.ramp_len() - 1));
        assert!(fade.is_complete(fade.ramp_len()));
    }

    #[test]
    fn test_mixing_sums_voices() {
        let (mut mixer, tx, _slot) = mixer_with(8);
        tx.send(Voice::new(Arc::new(Sound::constant(60, 127, 1000, 0.25)), 60))
            .expect("send failed");
        tx.send(Voice::new(Arc::new(Sound::constant(62, 127, 1000, 0.5)), 62))
            .expect("send failed");

        let mut out = vec![0.0f32; 8];
        mixer.fill(&mut out);
        assert_eq!(mixer.active_voices(), 2);
        assert_eq!(out[0], 0.75);
        assert_eq!(out[1], 0.75);
    }

    #[test]
    fn test_polyphony_trim_drops_oldest() {
        let (mut mixer, tx, _slot) = mixer_with(2);
        let sounds = [0.1f32, 0.2, 0.4];
        let mut controls = Vec::new();
        for (i, value) in sounds.iter().enumerate() {
            let voice = Voice::new(Arc::new(Sound::constant(60 + i as u8, 127, 1000, *value)), 60);
            controls.push(voice.control());
            tx.send(voice).expect("send failed");
        }

        let mut out = vec![0.0f32; 4];
        mixer.fill(&mut out);

        // Only the two newest contribute; the oldest was stolen.
        assert_eq!(mixer.active_voices(), 2);
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!(controls[0].is_finished());
        assert!(!controls[1].is_finished());
        assert!(!controls[2].is_finished());
    }

    #[test]
    fn test_finished_voices_are_removed() {
        let (mut mixer, tx, _slot) = mixer_with(8);
        tx.send(Voice::new(Arc::new(Sound::constant(60, 127, 1000, 0.5)), 60))
            .expect("send failed");

        let mut out = vec![0.0f32; 512 * 2];
        mixer.fill(&mut out);
        assert_eq!(mixer.active_voices(), 1);

        // 999 interpolable frames; the second 512-frame block exhausts them.
        mixer.fill(&mut out);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_fadeout_runs_to_removal() {
        let (mut mixer, tx, _slot) = mixer_with(8);
        let voice = Voice::new(
            Arc::new(Sound::synthetic(60, 127, vec![1.0; 2000], Some((0, 998)))),
            60,
        );
        let control = voice.control();
        tx.send(voice).expect("send failed");

        let mut out = vec![0.0f32; 512 * 2];
        mixer.fill(&mut out);
        assert_eq!(out[0], 1.0);

        control.request_fade();
        let mut last = f32::MAX;
        let mut removed_after = 0u32;
        for _ in 0..100 {
            mixer.fill(&mut out);
            if mixer.active_voices() == 0 {
                break;
            }
            // Envelope output decreases across blocks.
            assert!(out[0] < last);
            last = out[0];
            removed_after += 512;
        }
        assert_eq!(mixer.active_voices(), 0);
        assert!(control.is_finished());
        // Removal happens within the fade length (30000 frames).
        assert!(removed_after <= 30_000 + 512);
    }

    #[test]
    fn test_bank_gain_scales_output() {
        let (mut mixer, tx, slot) = mixer_with(8);
        // A bank at -6.02dB halves the output.
        *slot.write() = Arc::new(SampleBank::empty_with_gain(0.5));
        tx.send(Voice::new(Arc::new(Sound::constant(60, 127, 1000, 0.8)), 60))
            .expect("send failed");

        let mut out = vec![0.0f32; 4];
        mixer.fill(&mut out);
        assert!((out[0] - 0.4).abs() < 1e-6);
    }
}
