//! Update Driver (C7): the top-level state machine orchestrating
//! C5 → C6 → payload transfer → commit, with progress reporting and
//! resume-after-reboot.
//!
//! ```text
//!       PROBE_STATE -> CHECK_UPDATABLE -> CHECK_IMAGE -> PREPARE_AUTH
//!         -> START_TRANSFER -> TRANSFER_BLOCKS -> COMPLETE -> SUCCESS
//! ```
//! Any state may exit to a terminal error; an `AuthSession` created in
//! `PREPARE_AUTH` is always flushed before an error-terminal exit.

use crate::auth;
use crate::channel::DeviceChannel;
use crate::command::{AuthSession, CommandLayer};
use crate::error::{CoreError, CoreResult};
use crate::image::{self, FamilyTag, FirmwareImage};
use crate::request::{FirmwareSource, ResultSubtype, Tristate, UpdateRequest, UpdateResult, UpdateType};
use crate::state::{self, TpmState};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Chip-returned `TPM_FAIL` response code (1.2 ordinal space), tolerated by
/// `-ignore-error-on-complete`.
const TPM12_FAIL: u32 = 0x0000_0009;
/// TPM 2.0 `RC_FAILURE` response code, same tolerance on the 2.0 path.
const TPM20_RC_FAILURE: u32 = 0x0000_0101;

const RESUME_MARKER_FILENAME: &str = "TPMFactoryUpd_RunData.txt";

fn resume_marker_path() -> PathBuf {
    PathBuf::from(RESUME_MARKER_FILENAME)
}

fn write_resume_marker(image_path: &Path) -> CoreResult<()> {
    let line = image_path.to_string_lossy().into_owned();
    std::fs::write(resume_marker_path(), line).map_err(|_| CoreError::Internal)
}

fn read_resume_marker() -> Option<PathBuf> {
    std::fs::read_to_string(resume_marker_path()).ok().map(|s| PathBuf::from(s.trim()))
}

fn remove_resume_marker() {
    if let Err(e) = std::fs::remove_file(resume_marker_path()) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = ?e, "failed to remove resume marker, leaving stale file");
        }
    }
}

/// Progress callback invoked after each acknowledged block with the current
/// percentage; the sequence is non-decreasing and the last call is always
/// `100`.
pub type ProgressCallback<'a> = dyn FnMut(u8) + 'a;

/// Run the `-info` flow: probe state only, no authorization, no transfer.
pub fn run_info(channel: &mut dyn DeviceChannel) -> CoreResult<TpmState> {
    channel.connect()?;
    let probe_result = {
        let mut layer = CommandLayer::new(channel);
        state::probe_state(&mut layer)
    };
    let _ = channel.disconnect();

    let state = probe_result?;
    if !state.is_infineon {
        return Err(CoreError::NoIfxTpm);
    }
    Ok(state)
}

/// Run the `-tpm12-clearownership` flow: probe, require an owned 1.2 chip,
/// and issue a bare `OwnerClear` with an OIAP session. Shares C6's OIAP
/// plumbing but is not one of the four `UpdateType`s.
pub fn run_clear_ownership(channel: &mut dyn DeviceChannel) -> CoreResult<UpdateResult> {
    channel.connect()?;
    let result = (|| -> CoreResult<()> {
        let mut layer = CommandLayer::new(channel);
        let probe = state::probe_state(&mut layer)?;
        if !probe.is_infineon {
            return Err(CoreError::NoIfxTpm);
        }
        if !probe.is_12 {
            return Err(CoreError::UnsupportedChip);
        }
        if !probe.is_12_owned {
            return Err(CoreError::Tpm12NoOwner);
        }
        let session = crate::command::tpm12::oiap(&mut layer)?;
        let owner_auth = auth::owner_auth_digest();
        let auth_hmac = auth::hmac_sha1(&owner_auth, &session.nonce);
        crate::command::tpm12::owner_clear(&mut layer, &session, &auth_hmac)
    })();
    let _ = channel.disconnect();
    result.map(|()| UpdateResult {
        subtype: Some(ResultSubtype::Update),
        return_code: 0,
        ..Default::default()
    })
}

/// Run a full update flow per `request`.
pub fn run_update(request: &UpdateRequest, channel: &mut dyn DeviceChannel, progress: &mut ProgressCallback<'_>) -> CoreResult<UpdateResult> {
    channel.connect()?;
    let outcome = run_update_inner(request, channel, progress);
    let _ = channel.disconnect();
    outcome
}

fn run_update_inner(request: &UpdateRequest, channel: &mut dyn DeviceChannel, progress: &mut ProgressCallback<'_>) -> CoreResult<UpdateResult> {
    // `dry_run` sends zero TPM commands: no PROBE_STATE, no PREPARE_AUTH, no
    // COMPLETE. Only the deterministic progress sequence runs.
    if request.dry_run {
        return Ok(run_dry_run(request, progress));
    }

    // PROBE_STATE
    let probe = {
        let mut layer = CommandLayer::new(channel);
        state::probe_state(&mut layer)?
    };
    if !probe.is_infineon {
        return Err(CoreError::NoIfxTpm);
    }

    let resuming = probe.is_boot_loader;
    let resume_image_path = if resuming { read_resume_marker() } else { None };
    if resuming && resume_image_path.is_none() {
        return Err(CoreError::ResumeRunDataNotFound);
    }

    // CHECK_UPDATABLE
    if !resuming {
        check_updatable(&probe, request)?;
    }

    // CHECK_IMAGE
    let (image_path, image) = if resuming {
        let path = resume_image_path.expect("checked above");
        let bytes = std::fs::read(&path).map_err(|_| CoreError::CorruptFwImage)?;
        let image = image::parse(&bytes)?;
        (path, image)
    } else {
        let (path, image) = resolve_image(request, &probe)?;
        if let Err(e) = check_image_compatibility(&probe, &image) {
            return Ok(incompatible_image_result(e, &image, path));
        }
        (path, image)
    };

    // PREPARE_AUTH (skipped on resume: the chip already accepted authorization
    // before the reboot that put it in boot-loader mode)
    let mut session: Option<AuthSession> = None;
    if !resuming {
        session = prepare_auth(request, image.target_family_tag, &probe, channel)?;
    }

    // START_TRANSFER / TRANSFER_BLOCKS (FieldUpgradeStart is skipped on resume:
    // the chip already left the running OS image for the boot loader, which
    // is what FieldUpgradeStart does in the first place)
    let start_result = if resuming { Ok(()) } else { start_transfer(channel, image.target_family_tag, session.as_ref()) };
    let transfer_result = start_result.and_then(|()| transfer_blocks(channel, &image, &image_path, session.as_ref(), progress));

    if let Err(e) = transfer_result {
        flush_session_best_effort(channel, session.take());
        return Err(e);
    }

    // COMPLETE
    let complete_result = complete_update(channel, &probe, session.take(), request.ignore_complete_error);

    match complete_result {
        Ok(()) => {
            remove_resume_marker();
            Ok(UpdateResult {
                subtype: Some(ResultSubtype::Update),
                return_code: 0,
                new_firmware_valid: Tristate::Yes,
                target_family: Some(image.target_family_tag),
                new_firmware_version_string: image.target_version_string.clone(),
                used_firmware_image_path: Some(image_path),
                error_details: None,
            })
        }
        Err(e) => Err(e),
    }
}

fn check_updatable(probe: &TpmState, request: &UpdateRequest) -> CoreResult<()> {
    if probe.remaining_updates == 0 {
        return Err(CoreError::FwUpdateBlocked);
    }
    if probe.is_20_in_failure_mode {
        return Err(CoreError::Tpm20FailureMode);
    }
    if probe.is_20_restart_required {
        return Err(CoreError::RestartRequired);
    }

    let wants_12 = matches!(request.update_type, UpdateType::Tpm12Pp | UpdateType::Tpm12TakeOwnership);
    let wants_20 = matches!(request.update_type, UpdateType::Tpm20EmptyPlatformAuth);

    if wants_12 && !probe.is_12 {
        return Err(CoreError::InvalidUpdateOption);
    }
    if wants_20 && !probe.is_20 {
        return Err(CoreError::InvalidUpdateOption);
    }
    if wants_12 && probe.is_12_owned {
        return Err(CoreError::Tpm12Owned);
    }
    Ok(())
}

fn resolve_image(request: &UpdateRequest, probe: &TpmState) -> CoreResult<(PathBuf, FirmwareImage)> {
    let path = match &request.source {
        FirmwareSource::Path(p) => p.clone(),
        FirmwareSource::ConfigDriven(cfg) => resolve_config_driven_path(cfg, probe)?,
    };
    let bytes = std::fs::read(&path).map_err(|_| CoreError::FirmwareUpdateNotFound)?;
    let image = image::parse(&bytes)?;
    Ok((path, image))
}

/// Config-driven flow: match the chip's current version prefix to the
/// LPC/SPI bus target, short-circuit if already current, else synthesize the
/// image filename.
fn resolve_config_driven_path(cfg: &crate::request::TargetFirmwareConfig, probe: &TpmState) -> CoreResult<PathBuf> {
    let current = &probe.firmware_version_string;
    let (target_version, src_family_prefix) = if current.starts_with("4.") || current.starts_with("5.") {
        (&cfg.version_slb966x, "LPC")
    } else if current.starts_with("6.") || current.starts_with("7.") {
        (&cfg.version_slb9670, "SPI")
    } else {
        return Err(CoreError::UnsupportedChip);
    };

    if current == target_version {
        return Err(CoreError::AlreadyUpToDate);
    }

    let target_family = if target_version.starts_with('4') || target_version.starts_with('6') {
        "TPM12"
    } else {
        "TPM20"
    };

    let dir = cfg.config_dir.join(&cfg.firmware_folder);
    let filename = format!("{src_family_prefix}_{current}_to_{target_family}_{target_version}.BIN");
    Ok(dir.join(filename))
}

fn check_image_compatibility(probe: &TpmState, image: &FirmwareImage) -> CoreResult<()> {
    let chip_family = if probe.is_12 {
        FamilyTag::Tpm12
    } else if probe.is_20 {
        FamilyTag::Tpm20
    } else {
        return Err(CoreError::UnsupportedChip);
    };
    if image.target_family_tag != chip_family {
        return Err(CoreError::WrongFwImage);
    }
    Ok(())
}

/// Build the `UpdateResult` for an image that failed `check_image_compatibility`:
/// `new_firmware_valid` resolves to `No` (never back to `NA`) and the
/// envelope return code carries the reason, without attempting authorization.
fn incompatible_image_result(err: CoreError, image: &FirmwareImage, image_path: PathBuf) -> UpdateResult {
    let mut new_firmware_valid = Tristate::Na;
    new_firmware_valid.resolve(false);
    UpdateResult {
        subtype: Some(ResultSubtype::Update),
        return_code: err.to_code(),
        new_firmware_valid,
        target_family: Some(image.target_family_tag),
        new_firmware_version_string: image.target_version_string.clone(),
        used_firmware_image_path: Some(image_path),
        error_details: Some(err.to_string()),
    }
}

/// `target_family` is the resolved image's family: for `ConfigFileDriven`,
/// the update type alone doesn't say whether the target chip is 1.2 or 2.0,
/// so the auth flavor follows the image that was actually selected.
fn prepare_auth(request: &UpdateRequest, target_family: FamilyTag, probe: &TpmState, channel: &mut dyn DeviceChannel) -> CoreResult<Option<AuthSession>> {
    let mut layer = CommandLayer::new(channel);
    let flavor = match request.update_type {
        UpdateType::ConfigFileDriven => match target_family {
            FamilyTag::Tpm12 => UpdateType::Tpm12Pp,
            FamilyTag::Tpm20 => UpdateType::Tpm20EmptyPlatformAuth,
        },
        ref other => other.clone(),
    };
    match flavor {
        UpdateType::Tpm12Pp => {
            // Deferred PP already latched from a prior run: re-asserting it
            // would re-run `TSC_PhysicalPresence`/`SetCapability` for nothing,
            // and a `BadParameter` on the redundant assert would wrongly
            // surface as `Tpm12DeferredPpRequired`.
            if !probe.has_deferred_pp {
                auth::prepare_tpm12_pp(&mut layer)?;
            }
            Ok(None)
        }
        UpdateType::Tpm12TakeOwnership => {
            auth::prepare_tpm12_take_ownership(&mut layer)?;
            Ok(None)
        }
        UpdateType::Tpm20EmptyPlatformAuth => {
            let session = auth::prepare_tpm20_empty_platform_auth(&mut layer)?;
            Ok(Some(session))
        }
        UpdateType::ConfigFileDriven => unreachable!("resolved above"),
    }
}

/// Per-step sleep for the dry-run progress sequence; four steps make up the
/// spec's "8 seconds of sleeps". Shortened under `cfg(test)` so the unit
/// tests exercising the callback sequence don't have to burn 8 real seconds.
#[cfg(not(test))]
const DRY_RUN_STEP: Duration = Duration::from_secs(2);
#[cfg(test)]
const DRY_RUN_STEP: Duration = Duration::from_millis(1);

/// `dry_run`: emit the deterministic progress sequence over 8 seconds of
/// sleeps and return success, touching neither the chip nor the filesystem
/// resume marker — no PROBE_STATE, PREPARE_AUTH, or COMPLETE command is ever
/// built.
fn run_dry_run(request: &UpdateRequest, progress: &mut ProgressCallback<'_>) -> UpdateResult {
    for pct in [25u8, 50, 75, 100] {
        std::thread::sleep(DRY_RUN_STEP);
        progress(pct);
    }
    let image_path = match &request.source {
        FirmwareSource::Path(p) => Some(p.clone()),
        FirmwareSource::ConfigDriven(_) => None,
    };
    UpdateResult {
        subtype: Some(ResultSubtype::Update),
        return_code: 0,
        used_firmware_image_path: image_path,
        ..Default::default()
    }
}

/// START_TRANSFER: issue `FieldUpgradeStart`, the command that commits the
/// chip to boot-loader mode and makes every subsequent `FieldUpgrade*` call
/// mandatory until `COMPLETE`.
fn start_transfer(channel: &mut dyn DeviceChannel, family: FamilyTag, session: Option<&AuthSession>) -> CoreResult<()> {
    let mut layer = CommandLayer::new(channel);
    match family {
        FamilyTag::Tpm12 => crate::command::tpm12::field_upgrade_start(&mut layer),
        FamilyTag::Tpm20 => {
            let session = session.ok_or(CoreError::Internal)?;
            crate::command::tpm20::field_upgrade_start(&mut layer, session)
        }
    }
}

fn transfer_blocks(
    channel: &mut dyn DeviceChannel,
    image: &FirmwareImage,
    image_path: &Path,
    session: Option<&AuthSession>,
    progress: &mut ProgressCallback<'_>,
) -> CoreResult<()> {
    let total = image::total_payload_len(image).max(1);
    let mut sent = 0usize;
    let mut layer = CommandLayer::new(channel);
    let last_index = image.payload_blocks.len().saturating_sub(1);

    for (i, block) in image.payload_blocks.iter().enumerate() {
        send_block(&mut layer, image.target_family_tag, session, block)?;
        sent += block.len();

        if i == 0 {
            write_resume_marker(image_path)?;
        }

        let pct = ((sent * 100) / total).min(100) as u8;
        let pct = if i == last_index { 100 } else { pct };
        progress(pct);
    }
    Ok(())
}

fn send_block(layer: &mut CommandLayer, family: FamilyTag, session: Option<&AuthSession>, block: &[u8]) -> CoreResult<()> {
    match family {
        FamilyTag::Tpm12 => crate::command::tpm12::field_upgrade_update(layer, block),
        FamilyTag::Tpm20 => {
            let session = session.ok_or(CoreError::Internal)?;
            crate::command::tpm20::field_upgrade_data(layer, session, block)
        }
    }
}

fn complete_update(channel: &mut dyn DeviceChannel, probe: &TpmState, session: Option<AuthSession>, ignore_complete_error: bool) -> CoreResult<()> {
    let mut layer = CommandLayer::new(channel);
    let result = if probe.is_12 {
        crate::command::tpm12::field_upgrade_complete(&mut layer)
    } else if let Some(ref s) = session {
        crate::command::tpm20::field_upgrade_commit(&mut layer, s)
    } else {
        Ok(())
    };

    let result = match result {
        Err(CoreError::ChipError(code)) if ignore_complete_error && (code == TPM12_FAIL || code == TPM20_RC_FAILURE) => Ok(()),
        other => other,
    };

    if let Some(s) = session {
        if let Err(e) = crate::command::tpm20::flush_context(&mut layer, s.handle) {
            tracing::warn!(error = ?e, "failed to flush auth session at completion");
        }
    }

    result
}

fn flush_session_best_effort(channel: &mut dyn DeviceChannel, session: Option<AuthSession>) {
    if let Some(s) = session {
        let mut layer = CommandLayer::new(channel);
        if let Err(e) = crate::command::tpm20::flush_context(&mut layer, s.handle) {
            tracing::warn!(error = ?e, "failed to flush auth session after transfer failure");
        }
    }
}
