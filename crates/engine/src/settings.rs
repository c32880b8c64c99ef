//! Task settings as supplied by the embedding application.

use common::error::ValidationError;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Option flags and required metadata for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Path to an experiment specific config file (psiphontunnel only).
    #[serde(default)]
    pub config_file_path: String,

    /// Whether to keep going when the bouncer cannot be reached.
    #[serde(default = "default_true")]
    pub ignore_bouncer_error: bool,

    /// Skip backend discovery.
    #[serde(default)]
    pub no_bouncer: bool,

    /// Skip report open and measurement submission.
    #[serde(default)]
    pub no_collector: bool,

    /// Skip asset download and geolocation.
    #[serde(default)]
    pub no_geolookup: bool,

    /// Skip resolver lookup.
    #[serde(default)]
    pub no_resolver_lookup: bool,

    /// Name of the embedding application. Required, non-empty.
    #[serde(default)]
    pub software_name: String,

    /// Version of the embedding application. Required, non-empty.
    #[serde(default)]
    pub software_version: String,

    /// Directory for the asset cache and experiment state. Required,
    /// non-empty.
    #[serde(default)]
    pub work_dir_path: String,
}

impl Default for TaskOptions {
    fn default() -> TaskOptions {
        TaskOptions {
            config_file_path: String::new(),
            ignore_bouncer_error: true,
            no_bouncer: false,
            no_collector: false,
            no_geolookup: false,
            no_resolver_lookup: false,
            software_name: String::new(),
            software_version: String::new(),
            work_dir_path: String::new(),
        }
    }
}

impl TaskOptions {
    /// Check the required options before any I/O happens.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("software_name", &self.software_name),
            ("software_version", &self.software_version),
            ("work_dir_path", &self.work_dir_path),
        ] {
            if value.is_empty() {
                return Err(ValidationError::EmptyVariable {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The task settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Inputs to measure. Forced to a single empty input for
    /// experiments that take none.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Name of the task to run, e.g. `Ndt7` or `PsiphonTunnel`.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub options: TaskOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_settings() {
        let settings: TaskSettings = serde_json::from_str(
            r#"{
                "name": "Ndt7",
                "options": {
                    "software_name": "example-app",
                    "software_version": "0.1.0",
                    "work_dir_path": "/tmp"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.name, "Ndt7");
        assert!(settings.inputs.is_empty());
        assert!(settings.options.ignore_bouncer_error);
        assert!(!settings.options.no_bouncer);
        settings.options.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_required_options() {
        let mut options = TaskOptions {
            software_name: "app".to_string(),
            software_version: "1.0".to_string(),
            work_dir_path: "/tmp".to_string(),
            ..Default::default()
        };
        options.validate().unwrap();

        options.software_version.clear();
        let err = options.validate().unwrap_err();
        assert_eq!(format!("{err}"), "empty_variable: software_version");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let settings: TaskSettings = serde_json::from_str(
            r#"{"name": "Ndt7", "options": {"log_filepath": "/dev/null"}}"#,
        )
        .unwrap();
        assert_eq!(settings.name, "Ndt7");
    }
}
