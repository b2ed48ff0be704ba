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
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::info;

use crate::audio::mixer::VoiceMixer;
use crate::audio::{DeviceError, CHANNEL_COUNT, SAMPLE_RATE};
use crate::playsync::CancelHandle;

/// Frames pulled per iteration, standing in for the hardware block size.
const BLOCK_FRAMES: usize = 512;

/// A mock device: pulls buffers from the mixer on a plain thread at roughly
/// the hardware cadence, without producing sound.
#[derive(Clone)]
pub struct Device {
    name: String,
    frames_filled: Arc<AtomicU64>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            frames_filled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames pulled from the mixer so far.
    #[cfg(test)]
    pub fn frames_filled(&self) -> u64 {
        self.frames_filled.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (mock)", self.name)
    }
}

impl crate::audio::Device for Device {
    fn run(&self, mut mixer: VoiceMixer, cancel_handle: CancelHandle) -> Result<(), DeviceError> {
        info!(device = self.name, "Running mock output");

        let mut buffer = vec![0.0f32; BLOCK_FRAMES * CHANNEL_COUNT as usize];
        let block_duration =
            Duration::from_secs_f64(BLOCK_FRAMES as f64 / SAMPLE_RATE as f64);

        while !cancel_handle.is_cancelled() {
            mixer.fill(&mut buffer);
            self.frames_filled
                .fetch_add(BLOCK_FRAMES as u64, Ordering::Relaxed);
            thread::sleep(block_duration);
        }

        Ok(())
    }
}
