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

//! YAML configuration: the audio device, the polyphony cap, and the banks
//! with their note grids, naming convention and playback parameters.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::audio::mixer::DEFAULT_MAX_POLYPHONY;

/// The note grid is 8 octave rows by 12 notes.
pub const OCTAVE_COUNT: usize = 8;
pub const NOTES_PER_OCTAVE: usize = 12;

/// File name stems per note within an octave.
const NOTE_NAMES: [&str; NOTES_PER_OCTAVE] = [
    "c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b",
];

/// Default reference velocity recordings are loaded at.
const DEFAULT_VELOCITY: u8 = 127;

/// The MIDI note of a grid cell. Octave row 0 starts at MIDI 12, so row 3
/// begins at C3 = 48.
pub fn grid_midinote(octave: usize, note: usize) -> u8 {
    (12 * (octave + 1) + note) as u8
}

/// A YAML representation of the synthesizer configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// The audio output device name. Uses the default output device when
    /// unset.
    audio_device: Option<String>,

    /// The MIDI input device name to watch for events.
    midi_device: Option<String>,

    /// Maximum number of simultaneous voices.
    #[serde(default = "default_max_polyphony")]
    max_polyphony: usize,

    /// The banks selectable via program change, in preset order.
    banks: Vec<Bank>,
}

fn default_max_polyphony() -> usize {
    DEFAULT_MAX_POLYPHONY
}

impl Config {
    /// The configured audio device name.
    pub fn audio_device(&self) -> Option<&str> {
        self.audio_device.as_deref()
    }

    /// The configured MIDI input device name.
    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    /// The voice cap.
    pub fn max_polyphony(&self) -> usize {
        self.max_polyphony
    }

    /// The configured banks.
    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }
}

/// A YAML representation of one sample bank.
#[derive(Deserialize, Clone, Debug)]
pub struct Bank {
    /// Display name.
    name: String,

    /// Directory holding the bank's note files.
    dir: PathBuf,

    /// Output volume in decibels.
    #[serde(default)]
    volume_db: f32,

    /// Semitones added to every incoming note.
    #[serde(default)]
    transpose: i8,

    /// Velocity the recordings represent.
    #[serde(default = "default_velocity")]
    velocity: u8,

    /// Note presence grid: up to 8 rows (octaves, low to high) of up to 12
    /// characters, `x` marking a recorded note. When omitted, presence is
    /// probed from the file system.
    notes: Option<Vec<String>>,
}

fn default_velocity() -> u8 {
    DEFAULT_VELOCITY
}

impl Bank {
    /// The bank's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bank's sample directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The bank volume in dB.
    pub fn volume_db(&self) -> f32 {
        self.volume_db
    }

    /// The bank volume as linear gain.
    pub fn gain(&self) -> f32 {
        10f32.powf(self.volume_db / 20.0)
    }

    /// The bank transpose in semitones.
    pub fn transpose(&self) -> i8 {
        self.transpose
    }

    /// The reference velocity of the bank's recordings.
    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// The file a grid cell maps to: `<note><octave>.wav` under the bank
    /// directory, e.g. `c#3.wav`.
    pub fn note_file(&self, octave: usize, note: usize) -> PathBuf {
        self.dir.join(format!("{}{}.wav", NOTE_NAMES[note], octave))
    }

    /// The 8x12 note presence grid. Rows missing from the configuration
    /// are all-absent; without a grid at all, presence is probed by file
    /// existence.
    pub fn presence(&self) -> [[bool; NOTES_PER_OCTAVE]; OCTAVE_COUNT] {
        let mut presence = [[false; NOTES_PER_OCTAVE]; OCTAVE_COUNT];
        match &self.notes {
            Some(rows) => {
                for (octave, row) in rows.iter().enumerate().take(OCTAVE_COUNT) {
                    for (note, mark) in row.chars().enumerate().take(NOTES_PER_OCTAVE) {
                        presence[octave][note] = mark.eq_ignore_ascii_case(&'x');
                    }
                }
            }
            None => {
                for (octave, row) in presence.iter_mut().enumerate() {
                    for (note, cell) in row.iter_mut().enumerate() {
                        *cell = self.note_file(octave, note).is_file();
                    }
                }
            }
        }
        presence
    }

    /// Validates the presence grid shape.
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        let Some(rows) = &self.notes else {
            return Ok(());
        };
        if rows.len() > OCTAVE_COUNT {
            return Err(format!(
                "bank {}: {} octave rows given, at most {} allowed",
                self.name,
                rows.len(),
                OCTAVE_COUNT
            )
            .into());
        }
        for (octave, row) in rows.iter().enumerate() {
            if row.chars().count() > NOTES_PER_OCTAVE {
                return Err(format!(
                    "bank {}: octave row {} has more than {} notes",
                    self.name, octave, NOTES_PER_OCTAVE
                )
                .into());
            }
            if let Some(mark) = row
                .chars()
                .find(|c| !c.eq_ignore_ascii_case(&'x') && *c != '.' && *c != '-')
            {
                return Err(format!(
                    "bank {}: invalid presence mark {:?} in octave row {}",
                    self.name, mark, octave
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Parses a configuration from a YAML file.
pub fn load(path: &Path) -> Result<Config, Box<dyn Error>> {
    let config: Config = serde_yml::from_str(&fs::read_to_string(path)?)
        .map_err(|e| format!("error parsing config {}: {}", path.display(), e))?;
    if config.banks.is_empty() {
        return Err(format!("config {} defines no banks", path.display()).into());
    }
    for bank in &config.banks {
        bank.validate()?;
    }
    Ok(config)
}

#[cfg(test)]
impl Bank {
    /// A bank rooted at `dir` with the given presence rows and default
    /// parameters.
    pub fn for_tests(dir: &Path, rows: &[&str]) -> Bank {
        Bank {
            name: "test".to_string(),
            dir: dir.to_path_buf(),
            volume_db: 0.0,
            transpose: 0,
            velocity: DEFAULT_VELOCITY,
            notes: Some(rows.iter().map(|row| row.to_string()).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("unable to create tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, contents).expect("unable to write config");
        (dir, path)
    }

    #[test]
    fn test_parse_with_defaults() {
        let (_dir, path) = write_config(
            r#"
audio_device: "UMC404HD"
banks:
  - name: piano
    dir: /samples/piano
    notes:
      - "............"
      - "x..x"
  - name: organ
    dir: /samples/organ
    volume_db: -6.0
    transpose: -12
    velocity: 100
"#,
        );

        let config = load(&path).expect("load failed");
        assert_eq!(config.audio_device(), Some("UMC404HD"));
        assert_eq!(config.midi_device(), None);
        assert_eq!(config.max_polyphony(), DEFAULT_MAX_POLYPHONY);
        assert_eq!(config.banks().len(), 2);

        let piano = &config.banks()[0];
        assert_eq!(piano.name(), "piano");
        assert_eq!(piano.volume_db(), 0.0);
        assert_eq!(piano.transpose(), 0);
        assert_eq!(piano.velocity(), 127);

        let organ = &config.banks()[1];
        assert_eq!(organ.volume_db(), -6.0);
        assert_eq!(organ.transpose(), -12);
        assert_eq!(organ.velocity(), 100);
        assert!((organ.gain() - 0.501).abs() < 1e-3);
    }

    #[test]
    fn test_presence_grid() {
        let dir = tempfile::tempdir().expect("unable to create tempdir");
        let bank = Bank::for_tests(dir.path(), &["", "X.x", "-"]);
        let presence = bank.presence();
        assert!(presence[1][0]);
        assert!(!presence[1][1]);
        assert!(presence[1][2]);
        assert!(!presence[2][0]);
        assert!(!presence[7][11]);
    }

    #[test]
    fn test_presence_probing() {
        let dir = tempfile::tempdir().expect("unable to create tempdir");
        testutil::write_note_file(&dir.path().join("c3.wav"), &[0i16; 4]);
        testutil::write_note_file(&dir.path().join("a#5.wav"), &[0i16; 4]);

        let bank = Bank {
            name: "probe".to_string(),
            dir: dir.path().to_path_buf(),
            volume_db: 0.0,
            transpose: 0,
            velocity: 127,
            notes: None,
        };
        let presence = bank.presence();
        assert!(presence[3][0]);
        assert!(presence[5][10]);
        assert!(!presence[3][1]);
    }

    #[test]
    fn test_note_file_naming() {
        let bank = Bank::for_tests(Path::new("/samples/piano"), &[]);
        assert_eq!(
            bank.note_file(3, 1),
            PathBuf::from("/samples/piano/c#3.wav")
        );
        assert_eq!(bank.note_file(0, 11), PathBuf::from("/samples/piano/b0.wav"));
    }

    #[test]
    fn test_grid_midinote() {
        assert_eq!(grid_midinote(3, 0), 48);
        assert_eq!(grid_midinote(4, 0), 60);
        assert_eq!(grid_midinote(0, 0), 12);
        assert_eq!(grid_midinote(7, 11), 107);
    }

    #[test]
    fn test_invalid_presence_marks_rejected() {
        let (_dir, path) = write_config(
            r#"
banks:
  - name: bad
    dir: /samples/bad
    notes:
      - "x..q"
"#,
        );
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_too_many_rows_rejected() {
        let (_dir, path) = write_config(
            r#"
banks:
  - name: bad
    dir: /samples/bad
    notes: ["", "", "", "", "", "", "", "", ""]
"#,
        );
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_empty_banks_rejected() {
        let (_dir, path) = write_config("banks: []\n");
        assert!(load(&path).is_err());
    }
}
