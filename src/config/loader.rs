//! Configuration File Loader
//!
//! Reads JSON configuration files from disk into any deserializable type.

use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{Result, SimError};

/// Read a JSON configuration file.
///
/// Open failures surface as `SimError::Io`; malformed content as
/// `SimError::ParseError` naming the file.
pub fn read_config_from_file<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| SimError::ParseError(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimConfig;
    use std::io::Write;

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "sample_rate": 48e6,
                "ticks_per_sample": 2,
                "group_width": 4,
                "channels": [
                    {{ "frequency": 1.97e6, "bit": 0 }},
                    {{ "frequency": 1.97e6, "bit": 1, "phase_delta": 1073741824 }}
                ]
            }}"#
        )
        .unwrap();

        let config = SimConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config,
            SimConfig::reference_and_measurement(48e6, 1.97e6, 0x4000_0000)
        );
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"sample_rate\": ").unwrap();

        let err = read_config_from_file::<SimConfig, _>(file.path()).unwrap_err();
        assert!(matches!(err, SimError::ParseError(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_config_from_file::<SimConfig, _>(dir.path().join("missing.json"))
            .unwrap_err();
        assert!(matches!(err, SimError::Io(_)));
    }

    #[test]
    fn test_invalid_values_rejected_after_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "sample_rate": 0, "channels": [ {{ "frequency": 2e6, "bit": 0 }} ] }}"#
        )
        .unwrap();

        let err = SimConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, SimError::ConfigError(_)));
    }
}
