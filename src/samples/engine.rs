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

//! The event router: turns note events into voice-list mutations and bank
//! switches into background loads.

use std::sync::{
    atomic::{AtomicU8, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::Sender;
use midly::live::LiveEvent;
use midly::MidiMessage;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::bank::{BankLoader, BankSlot, NOTE_COUNT};
use super::voice::{Voice, VoiceControl};
use crate::config;

/// The MIDI controller number of the sustain pedal.
const SUSTAIN_PEDAL: u8 = 64;

/// Engine state. Note events only play in `Standby`; `Loading` and
/// `Recording` suppress playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Standby = 0,
    Loading = 1,
    Recording = 2,
}

/// Shared, atomically updated engine status.
#[derive(Clone)]
pub struct StatusFlag(Arc<AtomicU8>);

impl StatusFlag {
    pub fn new() -> StatusFlag {
        StatusFlag(Arc::new(AtomicU8::new(Status::Standby as u8)))
    }

    pub fn get(&self) -> Status {
        match self.0.load(Ordering::SeqCst) {
            1 => Status::Loading,
            2 => Status::Recording,
            _ => Status::Standby,
        }
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

impl Default for StatusFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-note bookkeeping for the event path: which voice controls are
/// registered under each sounding note, plus the sustain state.
struct NoteRegistry {
    /// Controls of the voices spawned for each note.
    playing: Vec<Vec<Arc<VoiceControl>>>,
    /// Voices released while the sustain pedal was held.
    held: Vec<Arc<VoiceControl>>,
    /// Whether the sustain pedal is currently down.
    sustain: bool,
}

impl NoteRegistry {
    fn new() -> NoteRegistry {
        NoteRegistry {
            playing: (0..NOTE_COUNT).map(|_| Vec::new()).collect(),
            held: Vec::new(),
            sustain: false,
        }
    }
}

/// The synthesizer engine: all mutable state lives here and is shared with
/// the audio side only through the bank slot and the voice channel.
pub struct SamplerEngine {
    /// Bank configurations, indexed by preset number.
    banks: Vec<config::Bank>,
    /// The active bank, shared with the mixer.
    bank_slot: BankSlot,
    /// New voices are handed to the mixer through this channel.
    voice_tx: Sender<Voice>,
    /// Background bank loader.
    loader: BankLoader,
    /// Engine state machine.
    status: StatusFlag,
    /// The currently selected preset index.
    preset: AtomicUsize,
    /// Note bookkeeping for note-off and sustain handling.
    notes: Mutex<NoteRegistry>,
}

impl SamplerEngine {
    /// Creates an engine over the given bank configurations. No bank is
    /// loaded yet; call `load_bank` to bring one in.
    pub fn new(
        banks: Vec<config::Bank>,
        bank_slot: BankSlot,
        voice_tx: Sender<Voice>,
    ) -> SamplerEngine {
        let status = StatusFlag::new();
        let loader = BankLoader::new(bank_slot.clone(), status.clone());
        SamplerEngine {
            banks,
            bank_slot,
            voice_tx,
            loader,
            status,
            preset: AtomicUsize::new(0),
            notes: Mutex::new(NoteRegistry::new()),
        }
    }

    /// The engine's current state.
    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// The currently selected preset index.
    pub fn preset(&self) -> usize {
        self.preset.load(Ordering::SeqCst)
    }

    /// Starts loading the given bank in the background. Ignored while
    /// recording; a load already in progress is cancelled and replaced.
    pub fn load_bank(&self, index: usize) {
        if self.status.get() == Status::Recording {
            warn!(bank = index, "Ignoring bank change while recording");
            return;
        }
        let Some(bank) = self.banks.get(index) else {
            warn!(bank = index, "No such bank");
            return;
        };
        self.preset.store(index, Ordering::SeqCst);
        self.loader.load(index, bank.clone());
    }

    /// Blocks until the in-flight bank load, if any, completes.
    pub fn wait_for_load(&self) {
        self.loader.wait();
    }

    /// Toggles record mode. Valid only from standby or recording; note
    /// playback is suppressed while recording.
    pub fn toggle_record(&self) {
        match self.status.get() {
            Status::Standby => {
                info!("Entering record mode");
                self.status.set(Status::Recording);
            }
            Status::Recording => {
                info!("Leaving record mode");
                self.status.set(Status::Standby);
            }
            Status::Loading => {
                warn!("Ignoring record toggle while loading");
            }
        }
    }

    /// Handles a note-on. A velocity of zero is a note-off in disguise;
    /// a note with no sample anywhere is silently ignored.
    pub fn note_on(&self, note: u8, velocity: u8) {
        if self.status.get() != Status::Standby {
            return;
        }
        if velocity == 0 {
            return self.note_off(note);
        }

        let bank = self.bank_slot.read().clone();
        let Some(note) = transpose_note(note, bank.transpose()) else {
            return;
        };
        let Some(sound) = bank.get(note, velocity) else {
            debug!(note, velocity, "No sample for note");
            return;
        };

        let voice = Voice::new(sound.clone(), note);
        let control = voice.control();
        if self.voice_tx.send(voice).is_ok() {
            let mut notes = self.notes.lock();
            let entry = &mut notes.playing[note as usize];
            // Drop controls of voices the mixer already removed.
            entry.retain(|existing| !existing.is_finished());
            entry.push(control);
        }
    }

    /// Handles a note-off: held voices move to the sustain list, everything
    /// else is marked for fade-out.
    pub fn note_off(&self, note: u8) {
        if self.status.get() != Status::Standby {
            return;
        }

        let transpose = self.bank_slot.read().transpose();
        let Some(note) = transpose_note(note, transpose) else {
            return;
        };

        let mut notes = self.notes.lock();
        let sustain = notes.sustain;
        let controls = std::mem::take(&mut notes.playing[note as usize]);
        if sustain {
            notes.held.extend(controls);
        } else {
            for control in controls {
                control.request_fade();
            }
        }
    }

    /// Handles a sustain pedal change. Releasing the pedal fades every
    /// held voice.
    pub fn sustain(&self, held: bool) {
        let mut notes = self.notes.lock();
        notes.sustain = held;
        if !held {
            for control in notes.held.drain(..) {
                control.request_fade();
            }
        }
    }

    /// Handles a program change by switching to the requested bank.
    pub fn program_change(&self, program: u8) {
        self.load_bank(program as usize);
    }

    /// Decodes a raw MIDI event and routes it. Unparseable and unhandled
    /// events are ignored.
    pub fn process_midi_event(&self, raw: &[u8]) {
        let event = match LiveEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = ?e, "Failed to parse MIDI event");
                return;
            }
        };

        let LiveEvent::Midi { message, .. } = event else {
            return;
        };
        match message {
            MidiMessage::NoteOn { key, vel } => self.note_on(key.into(), vel.into()),
            MidiMessage::NoteOff { key, .. } => self.note_off(key.into()),
            MidiMessage::Controller { controller, value } => {
                if u8::from(controller) == SUSTAIN_PEDAL {
                    self.sustain(u8::from(value) >= 64);
                }
            }
            MidiMessage::ProgramChange { program } => self.program_change(program.into()),
            _ => {}
        }
    }
}

/// Applies the bank transpose, discarding notes pushed out of MIDI range.
fn transpose_note(note: u8, transpose: i8) -> Option<u8> {
    let transposed = note as i16 + transpose as i16;
    (0..NOTE_COUNT as i16)
        .contains(&transposed)
        .then_some(transposed as u8)
}

#[cfg(test)]
impl SamplerEngine {
    /// Forces the engine status, for exercising state gating.
    pub fn force_status(&self, status: Status) {
        self.status.set(status);
    }
}
