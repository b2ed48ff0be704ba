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

//! RIFF/WAVE decoding with sampler metadata.
//!
//! The sampler needs the loop points embedded in the `smpl` chunk and the
//! markers in the `cue ` chunk, which general-purpose decoders don't surface,
//! so the container is walked by hand here.

use std::io::Read;

/// Errors produced while decoding a WAV byte stream.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("file does not start with a RIFF id")]
    MissingRiff,

    #[error("not a WAVE file")]
    NotWave,

    #[error("data chunk before fmt chunk")]
    DataBeforeFmt,

    #[error("fmt chunk and/or data chunk missing")]
    MissingChunks,

    #[error("unsupported encoding tag: {0}")]
    UnsupportedEncoding(u16),

    #[error("unsupported sample width: {0} bits")]
    UnsupportedBitDepth(u16),

    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("truncated {0} chunk")]
    Truncated(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Format information from the `fmt ` chunk.
#[derive(Debug, Clone, Copy)]
struct Format {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// A decoded WAV file: PCM payload plus the sampler metadata the synth
/// cares about.
pub struct WavFile {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    /// Raw PCM payload of the data chunk.
    data: Vec<u8>,
    /// Frames in the data chunk (payload length / frame size).
    frame_count: u32,
    /// Sample offsets from the cue chunk, in file order.
    cue_points: Vec<u32>,
    /// [start, end] frame pairs from the smpl chunk loop records.
    loops: Vec<(u32, u32)>,
}

impl WavFile {
    /// Decodes a WAV byte stream.
    ///
    /// Recognizes `fmt `, `data`, `cue ` and `smpl` chunks; anything else is
    /// skipped by its declared size. The stream must contain `fmt ` before
    /// `data`, and both must be present by end of stream.
    pub fn read<R: Read>(reader: &mut R) -> Result<WavFile, FormatError> {
        let mut riff = [0u8; 4];
        reader.read_exact(&mut riff)?;
        if &riff != b"RIFF" {
            return Err(FormatError::MissingRiff);
        }

        // The RIFF size field covers the rest of the file; chunk walking
        // below relies on per-chunk sizes instead.
        let _riff_size = read_u32(reader, "RIFF")?;

        let mut wave = [0u8; 4];
        reader.read_exact(&mut wave)?;
        if &wave != b"WAVE" {
            return Err(FormatError::NotWave);
        }

        let mut format: Option<Format> = None;
        let mut data: Option<Vec<u8>> = None;
        let mut cue_points = Vec::new();
        let mut loops = Vec::new();

        while let Some((id, size)) = read_chunk_header(reader)? {
            match &id {
                b"fmt " => {
                    let payload = read_payload(reader, size, "fmt ")?;
                    format = Some(parse_fmt(&payload)?);
                }
                b"data" => {
                    if format.is_none() {
                        return Err(FormatError::DataBeforeFmt);
                    }
                    data = Some(read_payload(reader, size, "data")?);
                }
                b"cue " => {
                    let payload = read_payload(reader, size, "cue ")?;
                    parse_cue(&payload, &mut cue_points)?;
                }
                b"smpl" => {
                    let payload = read_payload(reader, size, "smpl")?;
                    parse_smpl(&payload, &mut loops)?;
                }
                _ => {
                    skip(reader, size as u64)?;
                }
            }
            // RIFF chunks are word aligned; odd sizes carry a pad byte.
            if size % 2 == 1 {
                skip(reader, 1)?;
            }
        }

        let (format, data) = match (format, data) {
            (Some(format), Some(data)) => (format, data),
            _ => return Err(FormatError::MissingChunks),
        };

        let frame_size = format.channels as u32 * (format.bits_per_sample as u32 / 8);
        let frame_count = data.len() as u32 / frame_size;

        Ok(WavFile {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            data,
            frame_count,
            cue_points,
            loops,
        })
    }

    /// Number of channels in the source file (1 or 2).
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate of the source file.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sample width of the source file (16 or 24).
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// Frames in the data chunk.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Cue marker sample offsets.
    pub fn cue_points(&self) -> &[u32] {
        &self.cue_points
    }

    /// All loop regions from the smpl chunk.
    pub fn loops(&self) -> &[(u32, u32)] {
        &self.loops
    }

    /// The first loop region, which is the only one playback uses.
    pub fn first_loop(&self) -> Option<(u32, u32)> {
        self.loops.first().copied()
    }

    /// Converts the PCM payload to the internal format: f32 frames,
    /// interleaved stereo. Mono input is duplicated to both channels.
    pub fn decode_frames(&self) -> Vec<f32> {
        let samples: Vec<i16> = match self.bits_per_sample {
            16 => self
                .data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
            24 => unpack_24_to_16(&self.data),
            // Guarded by parse_fmt.
            _ => unreachable!("bit depth validated during parsing"),
        };

        let scale = 1.0 / 32768.0;
        let mut frames = Vec::with_capacity(samples.len() * 2 / self.channels as usize);
        if self.channels == 1 {
            for sample in samples {
                let value = sample as f32 * scale;
                frames.push(value);
                frames.push(value);
            }
        } else {
            frames.extend(samples.into_iter().map(|sample| sample as f32 * scale));
        }
        frames
    }
}

/// Unpacks little-endian 24-bit PCM to 16 bits by dropping the low byte.
fn unpack_24_to_16(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(3)
        .map(|b| i16::from_le_bytes([b[1], b[2]]))
        .collect()
}

/// Reads the next chunk header. Returns None on a clean end of stream; a
/// partial header is treated as end of stream as well, matching the
/// tolerance of typical RIFF readers.
fn read_chunk_header<R: Read>(reader: &mut R) -> Result<Option<([u8; 4], u32)>, FormatError> {
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            return Ok(None);
        }
        filled += n;
    }
    let id = [header[0], header[1], header[2], header[3]];
    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Ok(Some((id, size)))
}

fn read_u32<R: Read>(reader: &mut R, chunk: &'static str) -> Result<u32, FormatError> {
    let mut bytes = [0u8; 4];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| FormatError::Truncated(chunk))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_payload<R: Read>(
    reader: &mut R,
    size: u32,
    chunk: &'static str,
) -> Result<Vec<u8>, FormatError> {
    let mut payload = Vec::new();
    reader.take(size as u64).read_to_end(&mut payload)?;
    if payload.len() < size as usize {
        return Err(FormatError::Truncated(chunk));
    }
    Ok(payload)
}

fn skip<R: Read>(reader: &mut R, count: u64) -> Result<(), FormatError> {
    std::io::copy(&mut reader.take(count), &mut std::io::sink())?;
    Ok(())
}

fn parse_fmt(payload: &[u8]) -> Result<Format, FormatError> {
    if payload.len() < 16 {
        return Err(FormatError::Truncated("fmt "));
    }
    let encoding = u16::from_le_bytes([payload[0], payload[1]]);
    if encoding != 1 {
        return Err(FormatError::UnsupportedEncoding(encoding));
    }
    let channels = u16::from_le_bytes([payload[2], payload[3]]);
    if channels != 1 && channels != 2 {
        return Err(FormatError::UnsupportedChannels(channels));
    }
    let sample_rate = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let bits_per_sample = u16::from_le_bytes([payload[14], payload[15]]);
    if bits_per_sample != 16 && bits_per_sample != 24 {
        return Err(FormatError::UnsupportedBitDepth(bits_per_sample));
    }
    Ok(Format {
        channels,
        sample_rate,
        bits_per_sample,
    })
}

/// Cue chunk: a point count followed by 24-byte records whose last field is
/// the sample offset.
fn parse_cue(payload: &[u8], cue_points: &mut Vec<u32>) -> Result<(), FormatError> {
    if payload.len() < 4 {
        return Err(FormatError::Truncated("cue "));
    }
    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let records = &payload[4..];
    if records.len() < count * 24 {
        return Err(FormatError::Truncated("cue "));
    }
    for record in records.chunks_exact(24).take(count) {
        let sample_offset = u32::from_le_bytes([record[20], record[21], record[22], record[23]]);
        cue_points.push(sample_offset);
    }
    Ok(())
}

/// Sampler chunk: a 36-byte header (the loop count lives at offset 28)
/// followed by 24-byte loop records carrying [start, end] frame indices.
fn parse_smpl(payload: &[u8], loops: &mut Vec<(u32, u32)>) -> Result<(), FormatError> {
    if payload.len() < 36 {
        return Err(FormatError::Truncated("smpl"));
    }
    let loop_count =
        u32::from_le_bytes([payload[28], payload[29], payload[30], payload[31]]) as usize;
    let records = &payload[36..];
    if records.len() < loop_count * 24 {
        return Err(FormatError::Truncated("smpl"));
    }
    for record in records.chunks_exact(24).take(loop_count) {
        let start = u32::from_le_bytes([record[8], record[9], record[10], record[11]]);
        let end = u32::from_le_bytes([record[12], record[13], record[14], record[15]]);
        loops.push((start, end));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::WavBytes;

    #[test]
    fn test_frame_count_matches_data_size() {
        // 100 stereo frames of 16-bit PCM: 400 bytes of data.
        let bytes = WavBytes::new(2, 16, 44100)
            .data(&vec![0u8; 400])
            .build();
        let wav = WavFile::read(&mut bytes.as_slice()).expect("decode failed");
        assert_eq!(wav.frame_count(), 100);
        assert_eq!(wav.channels(), 2);
        assert_eq!(wav.sample_rate(), 44100);
        assert_eq!(wav.bits_per_sample(), 16);
    }

    #[test]
    fn test_missing_riff_tag() {
        let mut bytes = WavBytes::new(2, 16, 44100).data(&[0u8; 4]).build();
        bytes[0..4].copy_from_slice(b"JUNK");
        let result = WavFile::read(&mut bytes.as_slice());
        assert!(matches!(result, Err(FormatError::MissingRiff)));
    }

    #[test]
    fn test_missing_wave_tag() {
        let mut bytes = WavBytes::new(2, 16, 44100).data(&[0u8; 4]).build();
        bytes[8..12].copy_from_slice(b"AVI ");
        let result = WavFile::read(&mut bytes.as_slice());
        assert!(matches!(result, Err(FormatError::NotWave)));
    }

    #[test]
    fn test_data_before_fmt() {
        let bytes = WavBytes::new(2, 16, 44100)
            .data_before_fmt()
            .data(&[0u8; 4])
            .build();
        let result = WavFile::read(&mut bytes.as_slice());
        assert!(matches!(result, Err(FormatError::DataBeforeFmt)));
    }

    #[test]
    fn test_missing_fmt_and_data() {
        let bytes = WavBytes::new(2, 16, 44100).omit_fmt().omit_data().build();
        let result = WavFile::read(&mut bytes.as_slice());
        assert!(matches!(result, Err(FormatError::MissingChunks)));

        let bytes = WavBytes::new(2, 16, 44100).omit_data().build();
        let result = WavFile::read(&mut bytes.as_slice());
        assert!(matches!(result, Err(FormatError::MissingChunks)));
    }

    #[test]
    fn test_unknown_chunks_are_skipped() {
        let bytes = WavBytes::new(1, 16, 44100)
            .chunk(b"LIST", &[1, 2, 3, 4, 5, 6])
            // Odd-sized chunk exercises the pad byte.
            .chunk(b"junk", &[9, 9, 9])
            .data(&[0u8; 8])
            .build();
        let wav = WavFile::read(&mut bytes.as_slice()).expect("decode failed");
        assert_eq!(wav.frame_count(), 4);
    }

    #[test]
    fn test_unsupported_formats() {
        let bytes = WavBytes::new(2, 8, 44100).data(&[0u8; 4]).build();
        assert!(matches!(
            WavFile::read(&mut bytes.as_slice()),
            Err(FormatError::UnsupportedBitDepth(8))
        ));

        let bytes = WavBytes::new(6, 16, 44100).data(&[0u8; 24]).build();
        assert!(matches!(
            WavFile::read(&mut bytes.as_slice()),
            Err(FormatError::UnsupportedChannels(6))
        ));
    }

    #[test]
    fn test_cue_points_parsed_in_order() {
        let bytes = WavBytes::new(2, 16, 44100)
            .cue(&[1000, 2500])
            .data(&[0u8; 8])
            .build();
        let wav = WavFile::read(&mut bytes.as_slice()).expect("decode failed");
        assert_eq!(wav.cue_points(), &[1000, 2500]);
    }

    #[test]
    fn test_smpl_loops_first_wins() {
        let bytes = WavBytes::new(2, 16, 44100)
            .smpl(&[(100, 900), (200, 800)])
            .data(&[0u8; 8])
            .build();
        let wav = WavFile::read(&mut bytes.as_slice()).expect("decode failed");
        assert_eq!(wav.loops(), &[(100, 900), (200, 800)]);
        assert_eq!(wav.first_loop(), Some((100, 900)));
    }

    #[test]
    fn test_decode_16_bit_stereo() {
        let mut data = Vec::new();
        for sample in [16384i16, -16384, 32767, -32768] {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        let bytes = WavBytes::new(2, 16, 44100).data(&data).build();
        let wav = WavFile::read(&mut bytes.as_slice()).expect("decode failed");
        let frames = wav.decode_frames();
        assert_eq!(frames.len(), 4);
        assert!((frames[0] - 0.5).abs() < 1e-4);
        assert!((frames[1] + 0.5).abs() < 1e-4);
        assert!((frames[2] - 1.0).abs() < 1e-4);
        assert!((frames[3] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_24_bit_matches_16_bit() {
        // The 24-bit unpack keeps the two high bytes, so a 24-bit sample
        // built by shifting a 16-bit value left by 8 decodes identically.
        let samples = [12345i16, -23456, 0, 32000];
        let mut data16 = Vec::new();
        let mut data24 = Vec::new();
        for sample in samples {
            data16.extend_from_slice(&sample.to_le_bytes());
            let wide = (sample as i32) << 8;
            data24.extend_from_slice(&wide.to_le_bytes()[0..3]);
        }

        let wav16 = WavFile::read(
            &mut WavBytes::new(2, 16, 44100).data(&data16).build().as_slice(),
        )
        .expect("decode failed");
        let wav24 = WavFile::read(
            &mut WavBytes::new(2, 24, 44100).data(&data24).build().as_slice(),
        )
        .expect("decode failed");
        assert_eq!(wav24.frame_count(), 2);
        assert_eq!(wav16.decode_frames(), wav24.decode_frames());
    }

    #[test]
    fn test_mono_is_duplicated_to_stereo() {
        let mut data = Vec::new();
        for sample in [1000i16, -2000] {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        let bytes = WavBytes::new(1, 16, 44100).data(&data).build();
        let wav = WavFile::read(&mut bytes.as_slice()).expect("decode failed");
        let frames = wav.decode_frames();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], frames[1]);
        assert_eq!(frames[2], frames[3]);
    }

    #[test]
    fn test_empty_stream() {
        let result = WavFile::read(&mut [].as_slice());
        assert!(matches!(result, Err(FormatError::Io(_))));
    }
}
