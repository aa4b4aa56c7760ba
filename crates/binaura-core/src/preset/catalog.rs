//! Preset directory catalog

use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{is_preset_file, HrirPreset};

/// Presets added and removed by a rescan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDiff {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The presets found in one directory, sorted by name
#[derive(Debug, Clone, Default)]
pub struct PresetCatalog {
    dir: PathBuf,
    presets: Vec<HrirPreset>,
}

impl PresetCatalog {
    /// Scan a directory; a missing directory yields an empty catalog
    pub fn scan(dir: impl Into<PathBuf>) -> Self {
        let mut catalog = Self {
            dir: dir.into(),
            presets: Vec::new(),
        };
        catalog.presets = scan_dir(&catalog.dir);
        log::info!(
            "Found {} HRIR preset(s) in {}",
            catalog.presets.len(),
            catalog.dir.display()
        );
        catalog
    }

    /// Rescan the directory and report what changed
    pub fn rescan(&mut self) -> CatalogDiff {
        let fresh = scan_dir(&self.dir);
        let diff = CatalogDiff {
            added: fresh
                .iter()
                .filter(|p| self.get(p.id).is_none())
                .map(|p| p.id)
                .collect(),
            removed: self
                .presets
                .iter()
                .filter(|p| !fresh.iter().any(|f| f.id == p.id))
                .map(|p| p.id)
                .collect(),
        };
        self.presets = fresh;

        if !diff.is_empty() {
            log::info!(
                "Preset catalog changed: {} added, {} removed",
                diff.added.len(),
                diff.removed.len()
            );
        }
        diff
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, id: Uuid) -> Option<&HrirPreset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn list(&self) -> &[HrirPreset] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

fn scan_dir(dir: &Path) -> Vec<HrirPreset> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read preset directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut presets: Vec<HrirPreset> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_preset_file(path))
        .filter_map(|path| match HrirPreset::read_header(&path) {
            Ok(preset) => Some(preset),
            Err(e) => {
                log::warn!("Skipping preset: {}", e);
                None
            }
        })
        .collect();

    presets.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    presets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::{preset_id_for, test_util::write_wav};
    use tempfile::TempDir;

    #[test]
    fn test_scan_sorted_and_skips_junk() {
        let dir = TempDir::new().unwrap();
        write_wav(dir.path(), "zeta.wav", &[vec![1.0; 4], vec![1.0; 4]], 48000);
        write_wav(dir.path(), "Alpha.wav", &[vec![1.0; 4], vec![1.0; 4]], 48000);
        std::fs::write(dir.path().join("broken.wav"), b"not a wav").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let catalog = PresetCatalog::scan(dir.path());
        let names: Vec<&str> = catalog.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let catalog = PresetCatalog::scan("/nonexistent/binaura/presets");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_rescan_diff() {
        let dir = TempDir::new().unwrap();
        let first = write_wav(dir.path(), "first.wav", &[vec![1.0; 4], vec![1.0; 4]], 48000);
        let mut catalog = PresetCatalog::scan(dir.path());
        assert_eq!(catalog.len(), 1);

        let second = write_wav(dir.path(), "second.wav", &[vec![1.0; 4], vec![1.0; 4]], 48000);
        std::fs::remove_file(&first).unwrap();

        let diff = catalog.rescan();
        assert_eq!(diff.added, vec![preset_id_for(&second)]);
        assert_eq!(diff.removed, vec![preset_id_for(&first)]);
        assert!(catalog.get(preset_id_for(&second)).is_some());
        assert!(catalog.rescan().is_empty());
    }
}
