//! HRIR preset store
//!
//! Presets are multi-channel WAV impulse responses in one directory:
//!
//! - [`load_impulse_response`]: decode a file into per-channel samples
//! - [`PresetCatalog`]: the directory's presets, keyed by stable id
//! - [`PresetWatcher`]: reports files appearing or disappearing
//!
//! Preset ids are UUID v5 of the file name, so a persisted active preset
//! survives restarts and rescans without any bookkeeping file.

mod catalog;
mod error;
mod loader;
mod watch;

pub use catalog::{CatalogDiff, PresetCatalog};
pub use error::{PresetError, PresetResult};
pub use loader::{load_impulse_response, HrirData};
pub use watch::{PresetDirChanged, PresetWatcher};

use std::path::{Path, PathBuf};

use hound::WavReader;
use uuid::Uuid;

/// Namespace for preset ids derived from file names
const PRESET_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_32c4_9a0e_4d57_b2a1_5e8c_0f3d_7a92);

/// Stable preset id for a file
pub fn preset_id_for(path: &Path) -> Uuid {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Uuid::new_v5(&PRESET_NAMESPACE, name.as_bytes())
}

/// Whether a path looks like a preset file
pub fn is_preset_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// One HRIR preset (metadata only, samples load on activation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrirPreset {
    pub id: Uuid,
    /// Display name (file stem)
    pub name: String,
    pub path: PathBuf,
    pub channel_count: usize,
    /// Native sample rate
    pub sample_rate: u32,
}

impl HrirPreset {
    /// Read a preset's metadata from its WAV header
    pub fn read_header(path: &Path) -> PresetResult<Self> {
        let reader = WavReader::open(path).map_err(|e| PresetError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let spec = reader.spec();
        if spec.channels == 0 || reader.duration() == 0 {
            return Err(PresetError::Empty(path.to_path_buf()));
        }

        Ok(Self {
            id: preset_id_for(path),
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            channel_count: spec.channels as usize,
            sample_rate: spec.sample_rate,
        })
    }

    /// Decode the impulse response
    pub fn load(&self) -> PresetResult<HrirData> {
        load_impulse_response(&self.path)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::{Path, PathBuf};

    use hound::{SampleFormat, WavSpec, WavWriter};

    /// Write a float WAV from per-channel samples
    pub fn write_wav(dir: &Path, name: &str, channels: &[Vec<f32>], sample_rate: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = WavSpec {
            channels: channels.len() as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        for i in 0..frames {
            for channel in channels {
                writer.write_sample(channel[i]).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_preset_id_is_stable_per_file_name() {
        let a = preset_id_for(Path::new("/presets/studio.wav"));
        let b = preset_id_for(Path::new("/elsewhere/studio.wav"));
        let c = preset_id_for(Path::new("/presets/hall.wav"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_read_header_without_samples() {
        let dir = TempDir::new().unwrap();
        let path = test_util::write_wav(dir.path(), "Room A.wav", &vec![vec![0.5; 16]; 7], 44100);

        let preset = HrirPreset::read_header(&path).unwrap();
        assert_eq!(preset.name, "Room A");
        assert_eq!(preset.channel_count, 7);
        assert_eq!(preset.sample_rate, 44100);
        assert_eq!(preset.id, preset_id_for(&path));
        assert_eq!(preset.load().unwrap().frames(), 16);
    }

    #[test]
    fn test_preset_extension_filter() {
        assert!(is_preset_file(Path::new("a.WAV")));
        assert!(!is_preset_file(Path::new("a.json")));
        assert!(!is_preset_file(Path::new("wav")));
    }
}
