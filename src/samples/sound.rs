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

//! A decoded note sample, loaded entirely into memory for zero-latency
//! playback and shared read-only between voices.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::wav::{FormatError, WavFile};

/// One decoded sample: interleaved stereo f32 frames at the engine sample
/// rate, plus the note it was recorded at and its loop point if any.
/// Immutable after construction.
pub struct Sound {
    /// The file this sample was decoded from.
    path: PathBuf,
    /// The MIDI note the recording represents.
    midinote: u8,
    /// The velocity slot the recording was loaded into.
    velocity: u8,
    /// Interleaved stereo frames, shared with every voice playing this sound.
    frames: Arc<[f32]>,
    /// Loop start frame from the smpl chunk.
    loop_start: Option<u32>,
    /// Playable frames. With a loop this is loop end + 2 (clamped to the
    /// data length) so interpolation can read past the wrap point.
    frame_count: u32,
}

impl Sound {
    /// Loads and decodes a sample file, resampling to the target rate when
    /// the file was recorded at a different one.
    pub fn load(
        path: &Path,
        midinote: u8,
        velocity: u8,
        target_rate: u32,
    ) -> Result<Sound, FormatError> {
        let mut reader = BufReader::new(File::open(path)?);
        let wav = WavFile::read(&mut reader)?;

        let mut frames = wav.decode_frames();
        let mut first_loop = wav.first_loop();
        if wav.sample_rate() != target_rate {
            let ratio = target_rate as f64 / wav.sample_rate() as f64;
            frames = resample_stereo(&frames, ratio);
            first_loop = first_loop.map(|(start, end)| {
                (
                    (start as f64 * ratio) as u32,
                    (end as f64 * ratio) as u32,
                )
            });
        }

        Ok(Sound::from_frames(
            path.to_path_buf(),
            midinote,
            velocity,
            frames,
            first_loop,
        ))
    }

    fn from_frames(
        path: PathBuf,
        midinote: u8,
        velocity: u8,
        frames: Vec<f32>,
        first_loop: Option<(u32, u32)>,
    ) -> Sound {
        let data_frames = (frames.len() / 2) as u32;
        let (loop_start, frame_count) = match first_loop {
            Some((start, end)) => {
                let frame_count = end.saturating_add(2).min(data_frames);
                if start + 1 < frame_count {
                    (Some(start), frame_count)
                } else {
                    // Degenerate loop region; play as a one-shot.
                    (None, data_frames)
                }
            }
            None => (None, data_frames),
        };

        Sound {
            path,
            midinote,
            velocity,
            frames: frames.into(),
            loop_start,
            frame_count,
        }
    }

    /// The note this sample was recorded at. Playback of any other note
    /// resamples relative to this.
    pub fn midinote(&self) -> u8 {
        self.midinote
    }

    /// The velocity slot this sample was loaded into.
    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// The source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interleaved stereo frame data.
    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    /// Loop start frame, if the file carried a loop region.
    pub fn loop_start(&self) -> Option<u32> {
        self.loop_start
    }

    /// Playable frame count.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Memory used by the frame data, in bytes.
    pub fn memory_size(&self) -> usize {
        self.frames.len() * std::mem::size_of::<f32>()
    }
}

/// Linear-interpolation resampler over interleaved stereo frames.
fn resample_stereo(frames: &[f32], ratio: f64) -> Vec<f32> {
    let source_frames = frames.len() / 2;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_frames * 2);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..2 {
            let idx0 = source_frame * 2 + channel;
            let idx1 = (source_frame + 1) * 2 + channel;
            let s0 = frames.get(idx0).copied().unwrap_or(0.0);
            let s1 = frames.get(idx1).copied().unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}

#[cfg(test)]
impl Sound {
    /// Builds a sound from raw stereo frames without touching disk.
    pub fn synthetic(
        midinote: u8,
        velocity: u8,
        frames: Vec<f32>,
        first_loop: Option<(u32, u32)>,
    ) -> Sound {
        Sound::from_frames(
            PathBuf::from(format!("synthetic-{midinote}.wav")),
            midinote,
            velocity,
            frames,
            first_loop,
        )
    }

    /// A synthetic sound holding `frames` frames of a constant value.
    pub fn constant(midinote: u8, velocity: u8, frames: usize, value: f32) -> Sound {
        Sound::synthetic(midinote, velocity, vec![value; frames * 2], None)
    }
}
