//! Persisted device and preset selection
//!
//! Only stable UIDs are ever written here. Transient numeric device ids are
//! reassigned by the HAL on every reconnect and would point at the wrong
//! device (or nothing) after a restart.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Selection restored at launch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSelection {
    /// Aggregate device UID
    pub aggregate_uid: Option<String>,
    /// Output sub-device UID
    pub output_uid: Option<String>,
    /// Input sub-device UID
    pub input_uid: Option<String>,
    /// Active HRIR preset
    pub active_preset_id: Option<Uuid>,
    /// Spatialization on (true) or passthrough (false)
    pub convolution_enabled: bool,
    /// Start the pipeline as soon as routing resolves
    pub auto_start: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_yaml_keys() {
        let selection = PersistedSelection {
            aggregate_uid: Some("agg".to_string()),
            output_uid: Some("out".to_string()),
            input_uid: None,
            active_preset_id: Some(Uuid::nil()),
            convolution_enabled: true,
            auto_start: false,
        };
        let yaml = serde_yaml::to_string(&selection).unwrap();
        assert!(yaml.contains("aggregate_uid: agg"));
        assert!(yaml.contains("output_uid: out"));

        let parsed: PersistedSelection = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, selection);
    }

    #[test]
    fn test_empty_document_is_default() {
        let parsed: PersistedSelection = serde_yaml::from_str("{}").unwrap();
        assert_eq!(parsed, PersistedSelection::default());
    }
}
