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
use std::{error::Error, fmt, mem, sync::Mutex};

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use midly::live::LiveEvent;
use tracing::{debug, error, info};

const CLIENT_NAME: &str = "samplepad input";

pub struct Device {
    name: String,
    input_port: MidiInputPort,
    event_connection: Mutex<Option<MidiInputConnection<()>>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (midir)", self.name)
    }
}

/// Lists midir input devices.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
    let input = MidiInput::new(CLIENT_NAME)?;
    let mut devices: Vec<Box<dyn super::Device>> = Vec::new();
    for port in input.ports() {
        let name = input.port_name(&port)?;
        devices.push(Box::new(Device {
            name,
            input_port: port,
            event_connection: Mutex::new(None),
        }));
    }
    Ok(devices)
}

/// Gets the midir input device with the given name.
pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
    let input = MidiInput::new(CLIENT_NAME)?;
    for port in input.ports() {
        if input.port_name(&port)? == name {
            return Ok(Device {
                name: name.to_string(),
                input_port: port,
                event_connection: Mutex::new(None),
            });
        }
    }
    Err(format!("no MIDI input device named {}", name).into())
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>> {
        let mut event_connection = self.event_connection.lock().expect("unable to get lock");
        if event_connection.is_some() {
            return Err("already watching events".into());
        }

        info!(device = self.name, "Watching MIDI events");

        let input = MidiInput::new(CLIENT_NAME)?;
        *event_connection = Some(input.connect(
            &self.input_port,
            "samplepad input watcher",
            move |_, raw_event, _| {
                if let Ok(event) = LiveEvent::parse(raw_event) {
                    debug!(event = format!("{:?}", event), "Received MIDI event");
                }
                if let Err(e) = sender.send(Vec::from(raw_event)) {
                    error!(
                        err = format!("{:?}", e),
                        "Error sending MIDI event to receiver"
                    );
                }
            },
            (),
        )?);

        Ok(())
    }

    /// Stops watching events.
    fn stop_watch_events(&self) {
        // Explicitly drop the connection.
        let event_connection = self
            .event_connection
            .lock()
            .expect("error getting mutex")
            .take();

        mem::drop(event_connection);
    }
}
