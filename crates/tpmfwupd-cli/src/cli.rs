//! Command-line surface: one `clap` derive struct mirroring the flag
//! table, plus the resolution step that turns validated flags into either an
//! `UpdateRequest` or one of the two flows core exposes outside that type
//! (`-info`, `-tpm12-clearownership`).
//!
//! Flags use clap's standard double-dash long options rather than a
//! Windows-style single-dash prefix. The flag names and conflict rules are
//! otherwise unchanged.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tpmfwupd_core::channel::AccessMode;
use tpmfwupd_core::error::{CoreError, CoreResult};
use tpmfwupd_core::request::{FirmwareSource, UpdateRequest, UpdateType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliUpdateType {
    #[value(name = "tpm12-PP")]
    Tpm12Pp,
    #[value(name = "tpm12-takeownership")]
    Tpm12TakeOwnership,
    #[value(name = "tpm20-emptyplatformauth")]
    Tpm20EmptyPlatformAuth,
    #[value(name = "config-file")]
    ConfigFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliAccessMode {
    #[value(name = "1")]
    Memory,
    #[value(name = "3")]
    Driver,
}

#[derive(Parser, Debug)]
#[command(name = "tpmfwupd", version, about = "In-field TPM 1.2/2.0 firmware update tool")]
pub struct Cli {
    /// Run the State Probe only and render the result; no authorization or
    /// transfer is attempted.
    #[arg(long, conflicts_with_all = ["update", "firmware", "config", "clear_ownership"])]
    pub info: bool,

    /// Run the TPM 1.2 clear-ownership flow.
    #[arg(long = "tpm12-clearownership", conflicts_with_all = ["info", "update", "firmware", "config"])]
    pub clear_ownership: bool,

    /// Select the authorization flavor for an update.
    #[arg(long, value_enum, conflicts_with_all = ["info", "clear_ownership"])]
    pub update: Option<CliUpdateType>,

    /// Path to a firmware image file.
    #[arg(long, conflicts_with_all = ["info", "config", "clear_ownership"])]
    pub firmware: Option<PathBuf>,

    /// Path to an INI config file driving a `config-file` update.
    #[arg(long, conflicts_with_all = ["info", "firmware", "clear_ownership"])]
    pub config: Option<PathBuf>,

    /// Enable logging to a file; bare flag uses the default path.
    #[arg(long, num_args = 0..=1, default_missing_value = "./TPMFactoryUpd.log")]
    pub log: Option<PathBuf>,

    /// `1` for memory-mapped TIS registers, `3` for the kernel driver
    /// character device (default).
    #[arg(long = "access-mode", value_enum)]
    pub access_mode: Option<CliAccessMode>,

    /// Device file for `--access-mode 3` (default `/dev/tpm0`).
    #[arg(long = "access-mode-path")]
    pub access_mode_path: Option<PathBuf>,

    /// TIS register window physical base address for `--access-mode 1`.
    #[arg(long = "base-addr", default_value_t = 0xFED4_0000)]
    pub base_addr: u64,

    /// TIS locality for `--access-mode 1`.
    #[arg(long, default_value_t = 0)]
    pub locality: u8,

    /// Skip the actual payload transfer; still run the progress sequence.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Treat `TPM_FAIL`/`TPM2_RC_FAILURE` from the final complete command as
    /// success.
    #[arg(long = "ignore-error-on-complete")]
    pub ignore_error_on_complete: bool,
}

/// What `main` should actually do, once flags are resolved.
pub enum Action {
    Info,
    ClearOwnership,
    Update(UpdateRequest),
}

impl Cli {
    pub fn access_mode(&self) -> AccessMode {
        match self.access_mode {
            Some(CliAccessMode::Memory) => AccessMode::Memory {
                base_addr: self.base_addr,
                locality: self.locality,
            },
            Some(CliAccessMode::Driver) | None => AccessMode::Driver {
                path: self.access_mode_path.clone().unwrap_or_else(|| PathBuf::from("/dev/tpm0")),
            },
        }
    }

    /// Resolve the parsed flags into one action. `clap`'s `conflicts_with`
    /// has already ruled out illegal flag combinations; what remains is the
    /// cross-flag requirement that `-update` always needs either `-firmware`
    /// or `-config`, matched to the chosen update type.
    pub fn resolve(&self) -> CoreResult<Action> {
        if let Some(path) = &self.log {
            if path.as_os_str().len() > crate::logfile::MAX_LOG_PATH_LEN {
                return Err(CoreError::BadParameter);
            }
        }

        if self.info {
            return Ok(Action::Info);
        }
        if self.clear_ownership {
            return Ok(Action::ClearOwnership);
        }

        let update = self.update.ok_or(CoreError::InvalidUpdateOption)?;
        let (update_type, source) = match update {
            CliUpdateType::Tpm12Pp => (
                UpdateType::Tpm12Pp,
                FirmwareSource::Path(self.firmware.clone().ok_or(CoreError::InvalidFwOption)?),
            ),
            CliUpdateType::Tpm12TakeOwnership => (
                UpdateType::Tpm12TakeOwnership,
                FirmwareSource::Path(self.firmware.clone().ok_or(CoreError::InvalidFwOption)?),
            ),
            CliUpdateType::Tpm20EmptyPlatformAuth => (
                UpdateType::Tpm20EmptyPlatformAuth,
                FirmwareSource::Path(self.firmware.clone().ok_or(CoreError::InvalidFwOption)?),
            ),
            CliUpdateType::ConfigFile => {
                let config_path = self.config.clone().ok_or(CoreError::InvalidConfigOption)?;
                let cfg = crate::config::load_target_firmware_config(&config_path)?;
                (UpdateType::ConfigFileDriven, FirmwareSource::ConfigDriven(cfg))
            }
        };

        Ok(Action::Update(UpdateRequest {
            update_type,
            source,
            dry_run: self.dry_run,
            ignore_complete_error: self.ignore_error_on_complete,
            access_mode: self.access_mode(),
        }))
    }
}
