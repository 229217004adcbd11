//! Config-file aggregation: feeds `ini::tokenize` callbacks into a
//! typed [`ToolConfig`], then validates the subset core actually needs for a
//! `config-file` update into a [`tpmfwupd_core::request::TargetFirmwareConfig`].

use crate::ini;
use std::path::{Path, PathBuf};
use tpmfwupd_core::error::{CoreError, CoreResult};
use tpmfwupd_core::request::TargetFirmwareConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolConfig {
    pub logging_level: Option<String>,
    pub logging_path: Option<PathBuf>,
    pub logging_maxsize: Option<u64>,

    pub access_mode_locality: Option<u8>,
    pub device_access_mode: Option<String>,

    pub update_type_tpm12: Option<String>,
    pub update_type_tpm20: Option<String>,

    pub version_slb966x: Option<String>,
    pub version_slb9670: Option<String>,
    pub firmware_folder: Option<PathBuf>,
}

impl ToolConfig {
    /// Dispatch one tokenizer callback. Unknown sections/keys are silently
    /// ignored; an explicit match on `(section, key)` rather than a cascading
    /// `if`-chain.
    fn apply(&mut self, section: &str, key: &str, value: &str) {
        match (section, key) {
            ("LOGGING", "LEVEL") => self.logging_level = Some(value.to_string()),
            ("LOGGING", "PATH") => self.logging_path = Some(PathBuf::from(value)),
            ("LOGGING", "MAXSIZE") => self.logging_maxsize = value.parse().ok(),
            ("ACCESS_MODE", "LOCALITY") => self.access_mode_locality = value.parse().ok(),
            ("TPM_DEVICE_ACCESS", "MODE") => self.device_access_mode = Some(value.to_string()),
            ("UpdateType", "tpm12") => self.update_type_tpm12 = Some(value.to_string()),
            ("UpdateType", "tpm20") => self.update_type_tpm20 = Some(value.to_string()),
            ("TargetFirmware", "version_SLB966x") => self.version_slb966x = Some(value.to_string()),
            ("TargetFirmware", "version_SLB9670") => self.version_slb9670 = Some(value.to_string()),
            ("FirmwareFolder", "path") => self.firmware_folder = Some(PathBuf::from(value)),
            _ => {}
        }
    }

    /// The mandatory-key set for a `config-file` update: both `UpdateType`
    /// entries, both `TargetFirmware` versions, and the `FirmwareFolder`
    /// path. Missing any of the five is `InvalidSetting`, not a silent
    /// default.
    fn finalize(&self, config_dir: PathBuf) -> CoreResult<TargetFirmwareConfig> {
        let version_slb966x = self.update_type_tpm12.as_ref().and(self.version_slb966x.clone()).ok_or(CoreError::InvalidSetting)?;
        let version_slb9670 = self.update_type_tpm20.as_ref().and(self.version_slb9670.clone()).ok_or(CoreError::InvalidSetting)?;
        let firmware_folder = self.firmware_folder.clone().ok_or(CoreError::InvalidSetting)?;

        Ok(TargetFirmwareConfig {
            version_slb966x,
            version_slb9670,
            firmware_folder,
            config_dir,
        })
    }
}

pub fn load_tool_config(path: &Path) -> CoreResult<ToolConfig> {
    let contents = std::fs::read_to_string(path).map_err(|_| CoreError::InvalidConfigOption)?;
    let mut config = ToolConfig::default();
    ini::tokenize(&contents, |section, key, value| config.apply(section, key, value));
    Ok(config)
}

/// Load and validate the `[TargetFirmware]`/`[FirmwareFolder]` slice of a
/// config file for a `-update config-file` run.
pub fn load_target_firmware_config(path: &Path) -> CoreResult<TargetFirmwareConfig> {
    let config = load_tool_config(path)?;
    let config_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    config.finalize(config_dir)
}
