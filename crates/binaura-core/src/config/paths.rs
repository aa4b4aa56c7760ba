//! Standard locations for configuration files and HRIR presets

use std::path::PathBuf;

/// Directory holding all Binaura configuration
///
/// Returns: `<config dir>/binaura` (e.g. `~/.config/binaura` on Linux)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("binaura")
}

/// Path of a named config file inside the config directory
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

/// Directory scanned for HRIR preset WAV files
pub fn default_preset_dir() -> PathBuf {
    default_config_dir().join("presets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("settings.yaml");
        assert!(path.ends_with("binaura/settings.yaml"));
    }

    #[test]
    fn test_preset_dir_is_inside_config_dir() {
        assert!(default_preset_dir().starts_with(default_config_dir()));
    }
}
