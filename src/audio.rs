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
use std::fmt;

use crate::audio::mixer::VoiceMixer;
use crate::playsync::CancelHandle;

pub mod cpal;
pub mod mixer;
pub mod mock;
mod thread_priority;

/// The engine runs at a fixed rate; every sample is normalized to it at
/// load time.
pub const SAMPLE_RATE: u32 = 44100;

/// Stereo output.
pub const CHANNEL_COUNT: u16 = 2;

/// Errors from the audio output layer. Any of these during startup is
/// fatal; the synth cannot run without an output stream.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no audio output device named {0}")]
    NotFound(String),

    #[error("device {0} has no usable stereo output config at the engine sample rate")]
    NoUsableConfig(String),

    #[error("unable to enumerate audio devices: {0}")]
    Devices(#[from] ::cpal::DevicesError),

    #[error("unable to read device name: {0}")]
    DeviceName(#[from] ::cpal::DeviceNameError),

    #[error("unable to read supported configs: {0}")]
    SupportedConfigs(#[from] ::cpal::SupportedStreamConfigsError),

    #[error("unable to build output stream: {0}")]
    BuildStream(#[from] ::cpal::BuildStreamError),

    #[error("unable to start output stream: {0}")]
    PlayStream(#[from] ::cpal::PlayStreamError),
}

/// An audio output device that can run the voice mixer.
pub trait Device: fmt::Display + Send + Sync {
    /// Runs the mixer against this device until the cancel handle fires.
    /// The mixer is moved into the device's output callback.
    fn run(&self, mixer: VoiceMixer, cancel_handle: CancelHandle) -> Result<(), DeviceError>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, DeviceError> {
    cpal::Device::list()
}

/// Gets the named output device, the default output device when no name is
/// given, or a mock device when the name starts with "mock".
pub fn get_device(name: Option<&str>) -> Result<Box<dyn Device>, DeviceError> {
    if let Some(name) = name {
        if name.starts_with("mock") {
            return Ok(Box::new(mock::Device::get(name)));
        }
    }

    Ok(Box::new(cpal::Device::get(name)?))
}
