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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{crate_version, Parser, Subcommand};
use tracing::info;

use samplepad::audio;
use samplepad::audio::mixer::VoiceMixer;
use samplepad::audio::Device as _;
use samplepad::config;
use samplepad::midi;
use samplepad::midi::Device as _;
use samplepad::playsync::CancelHandle;
use samplepad::samples::bank::new_bank_slot;
use samplepad::samples::SamplerEngine;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A pad-controlled sampler synthesizer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Validates a configuration and summarizes its banks.
    Banks {
        /// The path to the synth config.
        config_path: PathBuf,
    },
    /// Starts the synthesizer.
    Start {
        /// The path to the synth config.
        config_path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Banks { config_path } => {
            let config = config::load(&config_path)?;

            println!("Banks (count: {}):", config.banks().len());
            for (index, bank) in config.banks().iter().enumerate() {
                let presence = bank.presence();
                let recorded: usize = presence
                    .iter()
                    .map(|row| row.iter().filter(|present| **present).count())
                    .sum();
                let missing: usize = presence
                    .iter()
                    .enumerate()
                    .map(|(octave, row)| {
                        row.iter()
                            .enumerate()
                            .filter(|(note, present)| {
                                **present && !bank.note_file(octave, *note).is_file()
                            })
                            .count()
                    })
                    .sum();
                println!(
                    "- {}: {} ({} notes, {} missing files, {}dB, transpose {})",
                    index,
                    bank.name(),
                    recorded,
                    missing,
                    bank.volume_db(),
                    bank.transpose(),
                );
            }
        }
        Commands::Start { config_path } => {
            let config = config::load(&config_path)?;

            let (voice_tx, voice_rx) = crossbeam_channel::unbounded();
            let bank_slot = new_bank_slot();
            let mixer = VoiceMixer::new(bank_slot.clone(), voice_rx, config.max_polyphony());
            let engine = Arc::new(SamplerEngine::new(
                config.banks().to_vec(),
                bank_slot,
                voice_tx,
            ));

            // Bring in the first bank; program changes switch from there.
            engine.load_bank(0);

            // Forward MIDI input to the engine, if a device is configured.
            let _midi_device = match config.midi_device() {
                Some(name) => {
                    let midi_device = midi::get_device(name)?;
                    let (event_tx, event_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
                    midi_device.watch_events(event_tx)?;
                    let engine = engine.clone();
                    thread::spawn(move || {
                        for raw_event in event_rx {
                            engine.process_midi_event(&raw_event);
                        }
                    });
                    Some(midi_device)
                }
                None => None,
            };

            let device = audio::get_device(config.audio_device())?;
            info!(device = %device, "Starting samplepad");

            // Runs until the process is killed.
            device.run(mixer, CancelHandle::new())?;
        }
    }

    Ok(())
}
