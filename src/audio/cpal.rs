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
    sync::{atomic::AtomicBool, Arc},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig, SupportedStreamConfigRange};
use tracing::{error, info};

use crate::audio::mixer::VoiceMixer;
use crate::audio::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};
use crate::audio::{DeviceError, CHANNEL_COUNT, SAMPLE_RATE};
use crate::playsync::CancelHandle;

/// A small wrapper around a cpal::Device carrying the data the synth needs
/// to open a stereo output stream on it.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal devices that have output channels.
    pub fn list() -> Result<Vec<Box<dyn crate::audio::Device>>, DeviceError> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn crate::audio::Device> = Box::new(device);
                device
            })
            .collect())
    }

    fn list_cpal_devices() -> Result<Vec<Device>, DeviceError> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to open host"
                    );
                    continue;
                }
            };
            let host_devices = match host.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);
                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        host_id,
                        device,
                        max_channels,
                    });
                }
            }
        }

        Ok(devices)
    }

    /// Gets the output device with the given name, or the default output
    /// device when no name is given.
    pub fn get(name: Option<&str>) -> Result<Device, DeviceError> {
        match name {
            Some(name) => Device::list_cpal_devices()?
                .into_iter()
                .find(|device| device.name == name)
                .ok_or_else(|| DeviceError::NotFound(name.to_string())),
            None => {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| DeviceError::NotFound("default".to_string()))?;
                let max_channels = device
                    .supported_output_configs()?
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);
                Ok(Device {
                    name: device.name()?,
                    host_id: host.id(),
                    device,
                    max_channels,
                })
            }
        }
    }

    /// Picks a stereo output config at the engine rate, preferring f32.
    fn select_config(&self) -> Result<(StreamConfig, SampleFormat), DeviceError> {
        let usable = |config: &SupportedStreamConfigRange| {
            config.channels() == CHANNEL_COUNT
                && config.min_sample_rate() <= SAMPLE_RATE
                && config.max_sample_rate() >= SAMPLE_RATE
                && matches!(
                    config.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::I32
                )
        };

        let mut candidates: Vec<SupportedStreamConfigRange> = self
            .device
            .supported_output_configs()?
            .filter(usable)
            .collect();
        candidates.sort_by_key(|config| match config.sample_format() {
            SampleFormat::F32 => 0,
            SampleFormat::I32 => 1,
            _ => 2,
        });

        let format = candidates
            .first()
            .map(|config| config.sample_format())
            .ok_or_else(|| DeviceError::NoUsableConfig(self.name.clone()))?;

        Ok((
            StreamConfig {
                channels: CHANNEL_COUNT,
                sample_rate: SAMPLE_RATE,
                buffer_size: cpal::BufferSize::Default,
            },
            format,
        ))
    }
}

/// f32 output: the mixer writes straight into the hardware buffer.
fn create_f32_callback(
    mut mixer: VoiceMixer,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        mixer.fill(data);
    }
}

/// Integer output: mix into a reusable scratch buffer, then convert.
fn create_converting_callback<T: cpal::SizedSample + cpal::FromSample<f32>>(
    mut mixer: VoiceMixer,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        // Grows on the first callback, then stays put.
        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0.0);
        }
        let scratch = &mut scratch[..data.len()];
        mixer.fill(scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

impl crate::audio::Device for Device {
    /// Opens the output stream and runs the mixer inside its callback until
    /// the cancel handle fires.
    fn run(&self, mixer: VoiceMixer, cancel_handle: CancelHandle) -> Result<(), DeviceError> {
        let (config, format) = self.select_config()?;
        info!(
            device = self.name,
            format = ?format,
            sample_rate = SAMPLE_RATE,
            "Opening output stream"
        );

        let err_fn = |err| error!(err = %err, "Output stream error");
        let stream = match format {
            SampleFormat::F32 => {
                let mut callback = create_f32_callback(mixer);
                self.device.build_output_stream(
                    &config,
                    move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                        callback(data, info);
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let mut callback = create_converting_callback::<i16>(mixer);
                self.device.build_output_stream(
                    &config,
                    move |data: &mut [i16], info: &cpal::OutputCallbackInfo| {
                        callback(data, info);
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I32 => {
                let mut callback = create_converting_callback::<i32>(mixer);
                self.device.build_output_stream(
                    &config,
                    move |data: &mut [i32], info: &cpal::OutputCallbackInfo| {
                        callback(data, info);
                    },
                    err_fn,
                    None,
                )?
            }
            _ => return Err(DeviceError::NoUsableConfig(self.name.clone())),
        };

        stream.play()?;

        // Block until cancelled; dropping the stream stops playback.
        cancel_handle.wait(Arc::new(AtomicBool::new(false)));
        Ok(())
    }
}
