//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::export::ExportPlan;

/// Export tool configuration derived from configuration files, environment
/// variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SNAPEXPORT",
    discovery(
        app_name = "snapexport",
        env_var = "SNAPEXPORT_CONFIG_PATH",
        config_file_name = "snapexport.toml",
        dotfile_name = ".snapexport.toml",
        project_file_name = "snapexport.toml"
    )
)]
pub struct ExportConfig {
    /// Base URL of the compute gateway API.
    pub api_base_url: String,
    /// Token presented in the gateway's auth header. This value is required.
    pub api_token: String,
    /// Identifier of the running instance volumes are attached to.
    pub instance_id: String,
    /// Availability zone shared by the target instance and created volumes.
    pub availability_zone: String,
    /// Object-storage bucket receiving the exported files.
    pub bucket: String,
    /// Application name used as the leading object-key segment.
    pub application_name: String,
    /// File-name prefix selecting which files are exported.
    pub application_prefix: String,
    /// Size of the fixed mount-point pool (`/mnt/data1..N`). Defaults to 10.
    #[ortho_config(default = 10)]
    pub mount_point_count: usize,
    /// Seconds between provider status polls. Defaults to 5.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Deadline in seconds applied to each polling stage. Defaults to 300.
    #[ortho_config(default = 300)]
    pub stage_timeout_secs: u64,
    /// Cap on concurrently running export jobs. Unset runs every job at
    /// once.
    pub max_concurrent_jobs: Option<usize>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ExportConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to snapexport.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("snapexport")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values via environment
    /// variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when a numeric field is out of
    /// range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_base_url,
            &FieldMetadata::new("gateway base URL", "SNAPEXPORT_API_BASE_URL", "api_base_url"),
        )?;
        Self::require_field(
            &self.api_token,
            &FieldMetadata::new("gateway API token", "SNAPEXPORT_API_TOKEN", "api_token"),
        )?;
        Self::require_field(
            &self.instance_id,
            &FieldMetadata::new("target instance ID", "SNAPEXPORT_INSTANCE_ID", "instance_id"),
        )?;
        Self::require_field(
            &self.availability_zone,
            &FieldMetadata::new(
                "availability zone",
                "SNAPEXPORT_AVAILABILITY_ZONE",
                "availability_zone",
            ),
        )?;
        Self::require_field(
            &self.bucket,
            &FieldMetadata::new("object-storage bucket", "SNAPEXPORT_BUCKET", "bucket"),
        )?;
        Self::require_field(
            &self.application_name,
            &FieldMetadata::new(
                "application name",
                "SNAPEXPORT_APPLICATION_NAME",
                "application_name",
            ),
        )?;
        Self::require_field(
            &self.application_prefix,
            &FieldMetadata::new(
                "application file prefix",
                "SNAPEXPORT_APPLICATION_PREFIX",
                "application_prefix",
            ),
        )?;
        if self.mount_point_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: String::from("mount_point_count"),
                message: String::from("must be at least 1"),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: String::from("poll_interval_secs"),
                message: String::from("must be at least 1"),
            });
        }
        if self.stage_timeout_secs < self.poll_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: String::from("stage_timeout_secs"),
                message: String::from("must be at least the poll interval"),
            });
        }
        Ok(())
    }

    /// Builds the orchestrator's [`ExportPlan`] from the configured values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn export_plan(&self) -> Result<ExportPlan, ConfigError> {
        self.validate()?;
        let mount_points = (1..=self.mount_point_count)
            .map(|index| format!("/mnt/data{index}"))
            .collect();
        Ok(ExportPlan {
            instance_id: self.instance_id.trim().to_owned(),
            availability_zone: self.availability_zone.trim().to_owned(),
            bucket: self.bucket.trim().to_owned(),
            application_name: self.application_name.trim().to_owned(),
            application_prefix: self.application_prefix.trim().to_owned(),
            mount_points,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            stage_timeout: Duration::from_secs(self.stage_timeout_secs),
            max_concurrent_jobs: self.max_concurrent_jobs,
        })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration field holds an out-of-range value.
    #[error("invalid configuration field {field}: {message}")]
    InvalidValue {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn complete_config() -> ExportConfig {
        ExportConfig {
            api_base_url: String::from("https://gateway.internal/api/v1"),
            api_token: String::from("token"),
            instance_id: String::from("i-1"),
            availability_zone: String::from("zone-a"),
            bucket: String::from("backups"),
            application_name: String::from("ledger"),
            application_prefix: String::from("ledger"),
            mount_point_count: 3,
            poll_interval_secs: 5,
            stage_timeout_secs: 300,
            max_concurrent_jobs: Some(4),
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(complete_config().validate().is_ok());
    }

    #[rstest]
    #[case::api_token("SNAPEXPORT_API_TOKEN", |config: &mut ExportConfig| {
        config.api_token = String::from(" ");
    })]
    #[case::bucket("SNAPEXPORT_BUCKET", |config: &mut ExportConfig| {
        config.bucket = String::new();
    })]
    #[case::instance("SNAPEXPORT_INSTANCE_ID", |config: &mut ExportConfig| {
        config.instance_id = String::new();
    })]
    fn validate_names_the_missing_field(
        #[case] env_var: &str,
        #[case] blank: fn(&mut ExportConfig),
    ) {
        let mut config = complete_config();
        blank(&mut config);
        let err = config.validate().expect_err("expected missing field");
        assert!(
            matches!(err, ConfigError::MissingField(ref message) if message.contains(env_var)),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn validate_rejects_zero_mount_points() {
        let mut config = complete_config();
        config.mount_point_count = 0;
        let err = config.validate().expect_err("expected invalid value");
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "mount_point_count"));
    }

    #[test]
    fn validate_rejects_timeout_below_poll_interval() {
        let mut config = complete_config();
        config.stage_timeout_secs = 2;
        let err = config.validate().expect_err("expected invalid value");
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "stage_timeout_secs"));
    }

    #[test]
    fn export_plan_builds_the_mount_pool() {
        let plan = complete_config().export_plan().expect("plan builds");
        assert_eq!(
            plan.mount_points,
            vec![
                String::from("/mnt/data1"),
                String::from("/mnt/data2"),
                String::from("/mnt/data3"),
            ]
        );
        assert_eq!(plan.poll_interval, Duration::from_secs(5));
        assert_eq!(plan.stage_timeout, Duration::from_secs(300));
        assert_eq!(plan.max_concurrent_jobs, Some(4));
    }
}
