//! Request/result types: the shape of a validated operation request the
//! CLI collaborator builds, and the structured record C7 returns.

use crate::channel::AccessMode;
use crate::image::FamilyTag;
use std::path::PathBuf;

/// Tagged union selecting which authorization flow C6/C7 run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateType {
    Tpm12Pp,
    Tpm12TakeOwnership,
    Tpm20EmptyPlatformAuth,
    ConfigFileDriven,
}

/// The `[TargetFirmware]`/`[FirmwareFolder]` config sections, already parsed
/// by the CLI's INI tokenizer. Core never reads or tokenizes the config
/// file itself; it only resolves this already-validated data into an image
/// path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFirmwareConfig {
    pub version_slb966x: String,
    pub version_slb9670: String,
    pub firmware_folder: PathBuf,
    /// Directory the config file itself lives in, used to resolve
    /// `firmware_folder` if it's relative.
    pub config_dir: PathBuf,
}

/// Where the firmware image comes from: a path given directly on the command
/// line, or the config-driven selection rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource {
    Path(PathBuf),
    ConfigDriven(TargetFirmwareConfig),
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub update_type: UpdateType,
    pub source: FirmwareSource,
    pub dry_run: bool,
    pub ignore_complete_error: bool,
    pub access_mode: AccessMode,
}

/// A three-valued flag that starts `NA` and, once set, is never downgraded
/// back to `NA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tristate {
    Na,
    Yes,
    No,
}

impl Tristate {
    /// Set to `Yes`/`No`, refusing to move backward to `Na`.
    pub fn resolve(&mut self, value: bool) {
        *self = if value { Tristate::Yes } else { Tristate::No };
    }
}

impl Default for Tristate {
    fn default() -> Self {
        Tristate::Na
    }
}

/// Which phase produced an `UpdateResult`, matching the three points C7 can
/// be asked to stop at: `-info` (IsUpdatable), authorization preparation
/// alone, or a full update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSubtype {
    IsUpdatable,
    Prepare,
    Update,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub subtype: Option<ResultSubtype>,
    pub return_code: u32,
    pub new_firmware_valid: Tristate,
    pub target_family: Option<FamilyTag>,
    pub new_firmware_version_string: String,
    pub used_firmware_image_path: Option<PathBuf>,
    pub error_details: Option<String>,
}
