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

//! Test fixtures: WAV byte stream and sample file builders.

use std::fs;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Builds WAV byte streams chunk by chunk, including malformed ones, for
/// exercising the decoder without touching disk.
pub struct WavBytes {
    channels: u16,
    bits_per_sample: u16,
    sample_rate: u32,
    chunks: Vec<([u8; 4], Vec<u8>)>,
    data: Option<Vec<u8>>,
    omit_fmt: bool,
    omit_data: bool,
    data_before_fmt: bool,
}

impl WavBytes {
    pub fn new(channels: u16, bits_per_sample: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            bits_per_sample,
            sample_rate,
            chunks: Vec::new(),
            data: None,
            omit_fmt: false,
            omit_data: false,
            data_before_fmt: false,
        }
    }

    pub fn data(mut self, data: &[u8]) -> Self {
        self.data = Some(data.to_vec());
        self
    }

    pub fn chunk(mut self, id: &[u8; 4], payload: &[u8]) -> Self {
        self.chunks.push((*id, payload.to_vec()));
        self
    }

    pub fn omit_fmt(mut self) -> Self {
        self.omit_fmt = true;
        self
    }

    pub fn omit_data(mut self) -> Self {
        self.omit_data = true;
        self
    }

    pub fn data_before_fmt(mut self) -> Self {
        self.data_before_fmt = true;
        self
    }

    /// Adds a cue chunk with the given sample offsets.
    pub fn cue(mut self, offsets: &[u32]) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
        for (i, offset) in offsets.iter().enumerate() {
            payload.extend_from_slice(&(i as u32).to_le_bytes()); // id
            payload.extend_from_slice(&offset.to_le_bytes()); // position
            payload.extend_from_slice(b"data"); // data chunk id
            payload.extend_from_slice(&0u32.to_le_bytes()); // chunk start
            payload.extend_from_slice(&0u32.to_le_bytes()); // block start
            payload.extend_from_slice(&offset.to_le_bytes()); // sample offset
        }
        self.chunks.push((*b"cue ", payload));
        self
    }

    /// Adds a smpl chunk with the given [start, end] loop regions.
    pub fn smpl(mut self, loops: &[(u32, u32)]) -> Self {
        let mut payload = Vec::new();
        for _ in 0..7 {
            payload.extend_from_slice(&0u32.to_le_bytes()); // header fields
        }
        payload.extend_from_slice(&(loops.len() as u32).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes()); // sampler data
        for (i, (start, end)) in loops.iter().enumerate() {
            payload.extend_from_slice(&(i as u32).to_le_bytes()); // cue point id
            payload.extend_from_slice(&0u32.to_le_bytes()); // loop type
            payload.extend_from_slice(&start.to_le_bytes());
            payload.extend_from_slice(&end.to_le_bytes());
            payload.extend_from_slice(&0u32.to_le_bytes()); // fraction
            payload.extend_from_slice(&0u32.to_le_bytes()); // play count
        }
        self.chunks.push((*b"smpl", payload));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"WAVE");

        let fmt = self.fmt_payload();
        let data = self.data.unwrap_or_default();

        if self.data_before_fmt {
            write_chunk(&mut body, b"data", &data);
            write_chunk(&mut body, b"fmt ", &fmt);
        } else {
            if !self.omit_fmt {
                write_chunk(&mut body, b"fmt ", &fmt);
            }
            for (id, payload) in &self.chunks {
                write_chunk(&mut body, id, payload);
            }
            if !self.omit_data {
                write_chunk(&mut body, b"data", &data);
            }
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);
        bytes
    }

    fn fmt_payload(&self) -> Vec<u8> {
        let frame_size = self.channels as u32 * (self.bits_per_sample as u32 / 8);
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes()); // PCM
        fmt.extend_from_slice(&self.channels.to_le_bytes());
        fmt.extend_from_slice(&self.sample_rate.to_le_bytes());
        fmt.extend_from_slice(&(self.sample_rate * frame_size).to_le_bytes());
        fmt.extend_from_slice(&(frame_size as u16).to_le_bytes());
        fmt.extend_from_slice(&self.bits_per_sample.to_le_bytes());
        fmt
    }
}

fn write_chunk(out: &mut Vec<u8>, id: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
}

/// Writes a 16-bit stereo WAV file with the given per-frame values using
/// hound (both channels get the same value per frame).
pub fn write_note_file(path: &Path, frames: &[i16]) {
    let spec = WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).expect("unable to create wav");
    for &frame in frames {
        writer.write_sample(frame).expect("unable to write sample");
        writer.write_sample(frame).expect("unable to write sample");
    }
    writer.finalize().expect("unable to finalize wav");
}

/// Writes a 16-bit stereo WAV file that also carries a smpl loop chunk.
/// hound doesn't write sampler chunks, so the chunk bytes are built by hand.
pub fn write_looped_note_file(path: &Path, frames: &[i16], loop_region: (u32, u32)) {
    let mut data = Vec::new();
    for &frame in frames {
        data.extend_from_slice(&frame.to_le_bytes());
        data.extend_from_slice(&frame.to_le_bytes());
    }
    let bytes = WavBytes::new(2, 16, 44100)
        .smpl(&[loop_region])
        .data(&data)
        .build();
    fs::write(path, bytes).expect("unable to write wav");
}
