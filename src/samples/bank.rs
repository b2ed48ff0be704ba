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

//! The sample bank and its background loader.
//!
//! A bank is a complete 128x128 (note, velocity) table built from a sparse
//! set of recorded files: recorded slots are decoded in parallel, then two
//! fallback passes spread each recording across the missing velocities and
//! the missing neighboring notes. Banks are immutable once built and are
//! swapped into the shared slot as a whole, so the mixer never observes a
//! partially loaded bank.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{info, warn};

use super::engine::{Status, StatusFlag};
use super::sound::Sound;
use crate::audio;
use crate::config;
use crate::playsync::CancelHandle;

/// Notes and velocities both span the full MIDI range.
pub const NOTE_COUNT: usize = 128;
pub const VELOCITY_COUNT: usize = 128;

/// The shared bank reference: written whole by the loader, read by the
/// mixer and the event router.
pub type BankSlot = Arc<RwLock<Arc<SampleBank>>>;

/// Creates a bank slot holding an empty bank.
pub fn new_bank_slot() -> BankSlot {
    Arc::new(RwLock::new(Arc::new(SampleBank::empty())))
}

/// A fully built sample bank: every (note, velocity) cell either references
/// a sound or is empty because no recording exists anywhere below the note.
pub struct SampleBank {
    /// The preset index this bank was loaded for.
    index: usize,
    /// Bank name from configuration.
    name: String,
    /// Flat note-major (note, velocity) table.
    table: Vec<Option<Arc<Sound>>>,
    /// Linear gain derived from the bank's volume in dB.
    gain: f32,
    /// Semitones added to every incoming note.
    transpose: i8,
    /// Notes with at least one recorded (not borrowed) sample.
    recorded_notes: usize,
    /// Memory held by decoded frame data.
    memory_bytes: usize,
}

impl SampleBank {
    /// An empty bank: silence until the first load completes.
    pub fn empty() -> SampleBank {
        SampleBank {
            index: 0,
            name: String::new(),
            table: vec![None; NOTE_COUNT * VELOCITY_COUNT],
            gain: 1.0,
            transpose: 0,
            recorded_notes: 0,
            memory_bytes: 0,
        }
    }

    fn new(index: usize, name: &str, gain: f32, transpose: i8) -> SampleBank {
        SampleBank {
            index,
            name: name.to_string(),
            gain,
            transpose,
            ..SampleBank::empty()
        }
    }

    /// The sound for a (note, velocity) pair, if any recording covers it.
    /// Values outside the MIDI range yield None.
    pub fn get(&self, note: u8, velocity: u8) -> Option<&Arc<Sound>> {
        if note as usize >= NOTE_COUNT || velocity as usize >= VELOCITY_COUNT {
            return None;
        }
        self.table[note as usize * VELOCITY_COUNT + velocity as usize].as_ref()
    }

    /// The preset index this bank belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The bank name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Linear output gain for the whole bank.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Global transpose in semitones.
    pub fn transpose(&self) -> i8 {
        self.transpose
    }

    /// Notes that had a recorded file.
    pub fn recorded_notes(&self) -> usize {
        self.recorded_notes
    }

    /// Memory held by decoded sample data, in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory_bytes
    }

    fn insert(&mut self, note: u8, velocity: u8, sound: Arc<Sound>) {
        self.memory_bytes += sound.memory_size();
        self.table[note as usize * VELOCITY_COUNT + velocity as usize] = Some(sound);
    }

    /// Velocity fill: for each note, velocities below the first recorded
    /// value take the first recorded sound, and every later gap carries the
    /// previous recorded value forward.
    fn fill_velocities(&mut self) {
        for note in 0..NOTE_COUNT {
            let row = &mut self.table[note * VELOCITY_COUNT..(note + 1) * VELOCITY_COUNT];
            let Some(first) = row.iter().flatten().next().cloned() else {
                continue;
            };
            self.recorded_notes += 1;

            let mut current = first;
            for cell in row.iter_mut() {
                match cell {
                    Some(sound) => current = sound.clone(),
                    None => *cell = Some(current.clone()),
                }
            }
        }
    }

    /// Note fill: a note with no samples borrows the entire velocity table
    /// of the nearest lower note that has one. Walking upward chains the
    /// copy across runs of empty notes. Pitch correction happens at play
    /// time, keyed by the borrowed sound's native note.
    fn fill_notes(&mut self) {
        for note in 1..NOTE_COUNT {
            let row = note * VELOCITY_COUNT;
            if self.table[row..row + VELOCITY_COUNT]
                .iter()
                .any(|cell| cell.is_some())
            {
                continue;
            }
            let prev = row - VELOCITY_COUNT;
            for velocity in 0..VELOCITY_COUNT {
                self.table[row + velocity] = self.table[prev + velocity].clone();
            }
        }
    }
}

/// Decodes every present slot of the bank's note grid and builds the full
/// table. Returns None if the load was cancelled; a missing or corrupt file
/// only skips its slot.
pub fn build_bank(
    index: usize,
    bank: &config::Bank,
    cancel: &CancelHandle,
) -> Option<SampleBank> {
    let started = Instant::now();
    let velocity = bank.velocity();

    let mut slots: Vec<(u8, PathBuf)> = Vec::new();
    let presence = bank.presence();
    for (octave, row) in presence.iter().enumerate() {
        for (note, present) in row.iter().enumerate() {
            if *present {
                slots.push((
                    config::grid_midinote(octave, note),
                    bank.note_file(octave, note),
                ));
            }
        }
    }

    let sounds: Vec<Option<(u8, Sound)>> = slots
        .into_par_iter()
        .map(|(note, path)| {
            // Cooperative cancellation between file decodes.
            if cancel.is_cancelled() {
                return None;
            }
            match Sound::load(&path, note, velocity, audio::SAMPLE_RATE) {
                Ok(sound) => Some((note, sound)),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable sample"
                    );
                    None
                }
            }
        })
        .collect();

    if cancel.is_cancelled() {
        return None;
    }

    let mut built = SampleBank::new(index, bank.name(), bank.gain(), bank.transpose());
    for (note, sound) in sounds.into_iter().flatten() {
        built.insert(note, velocity, Arc::new(sound));
    }
    built.fill_velocities();
    built.fill_notes();

    info!(
        bank = index,
        name = bank.name(),
        recorded_notes = built.recorded_notes(),
        memory_kb = built.memory_size() / 1024,
        elapsed_ms = started.elapsed().as_millis(),
        "Bank loaded"
    );

    Some(built)
}

struct InFlight {
    cancel: CancelHandle,
    join: JoinHandle<()>,
}

/// Loads banks on a background thread, one at a time.
///
/// Starting a new load cancels the in-flight one and waits for it to exit
/// before spawning the replacement, so two loads never race on the shared
/// bank slot. The finished bank is installed as a single pointer store.
pub struct BankLoader {
    slot: BankSlot,
    status: StatusFlag,
    in_flight: Mutex<Option<InFlight>>,
}

impl BankLoader {
    /// Creates a loader that installs banks into `slot` and reports
    /// progress through `status`.
    pub fn new(slot: BankSlot, status: StatusFlag) -> BankLoader {
        BankLoader {
            slot,
            status,
            in_flight: Mutex::new(None),
        }
    }

    /// Starts loading the given bank in the background. Returns once the
    /// load has been handed off; completion is observable via the status
    /// flag and the bank slot.
    pub fn load(&self, index: usize, bank: config::Bank) {
        let mut in_flight = self.in_flight.lock();
        if let Some(previous) = in_flight.take() {
            previous.cancel.cancel();
            if previous.join.join().is_err() {
                warn!("Previous bank loader thread panicked");
            }
        }

        self.status.set(Status::Loading);
        info!(bank = index, name = bank.name(), "Loading bank");

        let cancel = CancelHandle::new();
        let slot = self.slot.clone();
        let status = self.status.clone();
        let join = {
            let cancel = cancel.clone();
            thread::spawn(move || match build_bank(index, &bank, &cancel) {
                Some(built) => {
                    *slot.write() = Arc::new(built);
                    status.set(Status::Standby);
                }
                None => {
                    info!(bank = index, "Bank load cancelled");
                }
            })
        };

        *in_flight = Some(InFlight { cancel, join });
    }

    /// Waits for the in-flight load, if any, to finish.
    pub fn wait(&self) {
        let in_flight = self.in_flight.lock().take();
        if let Some(in_flight) = in_flight {
            if in_flight.join.join().is_err() {
                warn!("Bank loader thread panicked");
            }
        }
    }

    /// Cancels any in-flight load and waits for it to exit.
    pub fn shutdown(&self) {
        let in_flight = self.in_flight.lock().take();
        if let Some(in_flight) = in_flight {
            in_flight.cancel.cancel();
            if in_flight.join.join().is_err() {
                warn!("Bank loader thread panicked");
            }
        }
    }
}

impl Drop for BankLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
impl SampleBank {
    /// An empty bank with a fixed gain, for mixer tests.
    pub fn empty_with_gain(gain: f32) -> SampleBank {
        SampleBank {
            gain,
            ..SampleBank::empty()
        }
    }

    /// Returns the bank with a different global transpose.
    pub fn with_transpose(mut self, transpose: i8) -> SampleBank {
        self.transpose = transpose;
        self
    }

    /// Inserts a synthetic sound and runs the fill passes over the result.
    pub fn with_sounds(sounds: Vec<(u8, u8, Sound)>) -> SampleBank {
        let mut bank = SampleBank::empty();
        for (note, velocity, sound) in sounds {
            bank.insert(note, velocity, Arc::new(sound));
        }
        bank.fill_velocities();
        bank.fill_notes();
        bank
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::testutil;

    /// A bank config rooted at `dir` with the given presence rows.
    fn bank_config(dir: &Path, rows: &[&str]) -> config::Bank {
        config::Bank::for_tests(dir, rows)
    }

    fn write_note(dir: &Path, name: &str, frames: usize) {
        testutil::write_note_file(&dir.join(name), &vec![1000i16; frames]);
    }

    #[test]
    fn test_velocity_fill_law() {
        let low = Sound::constant(60, 40, 10, 0.25);
        let high = Sound::constant(60, 90, 10, 0.5);
        let bank = SampleBank::with_sounds(vec![(60, 40, low), (60, 90, high)]);

        // Below the first recorded velocity: the first recorded sound.
        for velocity in 0..40 {
            let sound = bank.get(60, velocity).expect("expected fill");
            assert_eq!(sound.velocity(), 40);
        }
        // At and above each recorded velocity: carried forward.
        for velocity in 40..90 {
            let sound = bank.get(60, velocity).expect("expected fill");
            assert_eq!(sound.velocity(), 40);
        }
        for velocity in 90..=127 {
            let sound = bank.get(60, velocity).expect("expected fill");
            assert_eq!(sound.velocity(), 90);
        }
    }

    #[test]
    fn test_note_fill_chains_across_gaps() {
        let bank = SampleBank::with_sounds(vec![(60, 127, Sound::constant(60, 127, 10, 0.5))]);

        // All velocities above the recording exist (velocity fill).
        assert!(bank.get(60, 0).is_some());
        assert!(bank.get(60, 127).is_some());

        // Higher notes borrow the column, chained upward.
        for note in 61..=127 {
            let sound = bank.get(note, 64).expect("expected borrowed note");
            assert_eq!(sound.midinote(), 60);
        }

        // Nothing exists below the only recording.
        for note in 0..60 {
            assert!(bank.get(note, 64).is_none());
        }
    }

    #[test]
    fn test_build_bank_from_directory() {
        let dir = tempfile::tempdir().expect("unable to create tempdir");
        write_note(dir.path(), "c3.wav", 100);
        write_note(dir.path(), "d3.wav", 100);
        let bank = bank_config(dir.path(), &["", "", "", "x.x"]);

        let built =
            build_bank(0, &bank, &CancelHandle::new()).expect("expected bank");
        // Octave row 3 maps to MIDI octave starting at 48.
        assert_eq!(built.recorded_notes(), 2);
        assert!(built.get(48, 64).is_some());
        assert!(built.get(50, 64).is_some());
        // The gap at c#3 is borrowed from c3.
        assert_eq!(built.get(49, 64).expect("expected fill").midinote(), 48);
    }

    #[test]
    fn test_build_bank_skips_missing_files() {
        let dir = tempfile::tempdir().expect("unable to create tempdir");
        write_note(dir.path(), "c3.wav", 100);
        // d3 is declared present but the file doesn't exist; e3 is corrupt.
        fs::write(dir.path().join("e3.wav"), b"not a wav").expect("unable to write");
        let bank = bank_config(dir.path(), &["", "", "", "x.x.x"]);

        let built =
            build_bank(0, &bank, &CancelHandle::new()).expect("expected bank");
        assert_eq!(built.recorded_notes(), 1);
        // Both bad slots end up borrowing from c3.
        assert_eq!(built.get(50, 64).expect("expected fill").midinote(), 48);
        assert_eq!(built.get(52, 64).expect("expected fill").midinote(), 48);
    }

    #[test]
    fn test_build_bank_cancelled() {
        let dir = tempfile::tempdir().expect("unable to create tempdir");
        write_note(dir.path(), "c3.wav", 100);
        let bank = bank_config(dir.path(), &["", "", "", "x"]);

        let cancel = CancelHandle::new();
        cancel.cancel();
        assert!(build_bank(0, &bank, &cancel).is_none());
    }

    #[test]
    fn test_loader_installs_bank() {
        let dir = tempfile::tempdir().expect("unable to create tempdir");
        write_note(dir.path(), "c3.wav", 100);
        let bank = bank_config(dir.path(), &["", "", "", "x"]);

        let slot = new_bank_slot();
        let status = StatusFlag::new();
        let loader = BankLoader::new(slot.clone(), status.clone());

        loader.load(3, bank);
        loader.wait();

        assert_eq!(status.get(), Status::Standby);
        let installed = slot.read().clone();
        assert_eq!(installed.index(), 3);
        assert!(installed.get(48, 64).is_some());
    }

    #[test]
    fn test_loader_single_flight_keeps_newest() {
        let dir_a = tempfile::tempdir().expect("unable to create tempdir");
        let dir_b = tempfile::tempdir().expect("unable to create tempdir");
        // Bank A is heavy enough that cancellation has a load to interrupt.
        for note in ["c3", "c#3", "d3", "d#3", "e3", "f3"] {
            write_note(dir_a.path(), &format!("{note}.wav"), 40_000);
        }
        write_note(dir_b.path(), "d3.wav", 100);
        let bank_a = bank_config(dir_a.path(), &["", "", "", "xxxxxx"]);
        let bank_b = bank_config(dir_b.path(), &["", "", "", "..x"]);

        let slot = new_bank_slot();
        let status = StatusFlag::new();
        let loader = BankLoader::new(slot.clone(), status.clone());

        loader.load(0, bank_a);
        loader.load(1, bank_b);
        loader.wait();

        // Exactly the most recently requested bank is installed.
        assert_eq!(status.get(), Status::Standby);
        let installed = slot.read().clone();
        assert_eq!(installed.index(), 1);
        assert!(installed.get(50, 64).is_some());
    }
}
