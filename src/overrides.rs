//! Environment-driven session overrides
//!
//! Walks [`CATALOG`] once and, for every variable present in the environment, parses the
//! value with the entry's declared type and stores it in the session settings. Values are
//! applied to a staged copy that replaces the caller's settings only when every present
//! override parsed; a single bad value leaves the settings untouched and is reported as a
//! configuration error.

use std::collections::HashMap;
use std::ffi::OsString;

use thiserror::Error;
use tracing::info;

use crate::error::BootstrapError;
use crate::session_settings::{SessionSettings, CATALOG};

/// Source of environment variables.
pub trait EnvSource {
    /// `Ok(None)` when unset. Values that are not valid Unicode are an error.
    fn var(&self, name: &str) -> Result<Option<String>, OsString>;
}

/// The process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Result<Option<String>, OsString> {
        match std::env::var_os(name) {
            None => Ok(None),
            Some(value) => value.into_string().map(Some),
        }
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Result<Option<String>, OsString> {
        Ok(self.get(name).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {reason}")]
pub struct OverrideError {
    pub name: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl From<OverrideError> for BootstrapError {
    fn from(err: OverrideError) -> Self {
        BootstrapError::Config(err.to_string())
    }
}

/// Apply every present override to `settings`; returns the names that were applied.
pub fn apply_overrides(
    settings: &mut SessionSettings,
    env: &dyn EnvSource,
) -> Result<Vec<&'static str>, OverrideError> {
    let mut staged = settings.clone();
    let mut applied = Vec::new();

    for entry in CATALOG {
        let raw = match env.var(entry.name) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(value) => {
                return Err(OverrideError {
                    name: entry.name,
                    value: value.to_string_lossy().into_owned(),
                    reason: "Not valid Unicode",
                })
            }
        };

        let previous = (entry.render)(&staged);
        (entry.apply)(&mut staged, &raw).map_err(|reason| OverrideError {
            name: entry.name,
            value: raw.clone(),
            reason,
        })?;
        info!(
            setting = entry.name,
            kind = %entry.kind,
            from = %previous,
            to = %raw,
            "Session setting overridden from environment"
        );
        applied.push(entry.name);
    }

    *settings = staged;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code;
    use crate::session_settings::{ByteChar, DiskCacheAlgorithm};

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_environment_changes_nothing() {
        let mut settings = SessionSettings::default();
        let applied = apply_overrides(&mut settings, &HashMap::<String, String>::new()).unwrap();
        assert!(applied.is_empty());
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn test_valid_overrides_of_each_kind() {
        let mut settings = SessionSettings::default();
        let applied = apply_overrides(
            &mut settings,
            &env(&[
                ("GT_SESSION_CACHE_SIZE", "4096"),
                ("GT_SESSION_LOCK_FILES", "1"),
                ("GT_SESSION_BROADCAST_LSD", "0"),
                ("GT_SESSION_PEER_TOS", "\u{8}"),
                ("GT_SESSION_USER_AGENT", "GeneTorrent/3.8"),
                ("GT_SESSION_DISK_CACHE_ALGORITHM", "1"),
                ("GT_SESSION_PEER_TURNOVER", "0.25"),
                ("GT_UNRELATED", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(applied.len(), 7);
        assert_eq!(settings.cache_size, 4096);
        assert!(settings.lock_files);
        assert!(!settings.broadcast_lsd);
        assert_eq!(settings.peer_tos, ByteChar(8));
        assert_eq!(settings.user_agent, "GeneTorrent/3.8");
        assert_eq!(settings.disk_cache_algorithm, DiskCacheAlgorithm::LargestContiguous);
        assert_eq!(settings.peer_turnover, 0.25);
    }

    #[test]
    fn test_applied_in_catalog_order() {
        let mut settings = SessionSettings::default();
        let applied = apply_overrides(
            &mut settings,
            &env(&[
                ("GT_SESSION_EXTERNAL_PORT_DELTA", "2"),
                ("GT_SESSION_VERSION", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(applied, vec!["GT_SESSION_VERSION", "GT_SESSION_EXTERNAL_PORT_DELTA"]);
    }

    #[test]
    fn test_invalid_value_leaves_settings_untouched() {
        let cases = [
            ("GT_SESSION_CACHE_SIZE", "lots", "Not a valid numeric value"),
            ("GT_SESSION_LOCK_FILES", "yes", "Overrides of type 'bool' must be either '0' or '1'"),
            ("GT_SESSION_PEER_TOS", "ab", "Overrides of type 'char' must be exactly one byte long"),
            ("GT_SESSION_DISK_CACHE_ALGORITHM", "9", "Not a known disk cache algorithm"),
        ];
        for (name, value, reason) in cases {
            let mut settings = SessionSettings::default();
            // A valid override earlier in the catalog must not leak through either.
            let err = apply_overrides(
                &mut settings,
                &env(&[("GT_SESSION_VERSION", "7"), (name, value)]),
            )
            .unwrap_err();
            assert_eq!(err.name, name);
            assert_eq!(err.value, value);
            assert_eq!(err.reason, reason);
            assert_eq!(settings, SessionSettings::default());
        }
    }

    #[test]
    fn test_error_maps_to_configuration_exit_code() {
        let err: BootstrapError = OverrideError {
            name: "GT_SESSION_LOCK_FILES",
            value: "2".to_string(),
            reason: "Overrides of type 'bool' must be either '0' or '1'",
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::CONFIGURATION);
        assert!(err.is_always_fatal());
        assert_eq!(
            err.to_string(),
            "GT_SESSION_LOCK_FILES: Overrides of type 'bool' must be either '0' or '1'"
        );
    }
}
