//! Black-box exercise of the full C7 state machine
//! (`PROBE_STATE -> CHECK_UPDATABLE -> CHECK_IMAGE -> PREPARE_AUTH ->
//! START_TRANSFER -> TRANSFER_BLOCKS -> COMPLETE`) against a fake
//! [`DeviceChannel`], the same "drive the whole thing end to end" pattern as
//! a CLI smoke test exercises the whole binary instead of one function.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tpmfwupd_core::channel::{AccessMode, DeviceChannel};
use tpmfwupd_core::driver_fsm::run_update;
use tpmfwupd_core::error::CoreError;
use tpmfwupd_core::request::{FirmwareSource, UpdateRequest, UpdateType};

// Serializes tests in this file that chdir, since `driver_fsm` reads and
// writes its resume marker at a cwd-relative path.
static CWD_LOCK: Mutex<()> = Mutex::new(());

mod wire {
    pub const TAG_RQU_COMMAND: u16 = 0x00C1;

    pub const FIELD_UPGRADE_INFO_REQUEST: u32 = 0x2000_0001;
    pub const FIELD_UPGRADE_START: u32 = 0x2000_0002;
    pub const FIELD_UPGRADE_UPDATE: u32 = 0x2000_0003;
    pub const FIELD_UPGRADE_COMPLETE: u32 = 0x2000_0004;
    pub const TSC_PHYSICAL_PRESENCE: u32 = 0x4000_000A;
    pub const SET_CAPABILITY: u32 = 0x0000_003F;
}

/// Dispatches a canned success (or chip-error) response by command code,
/// mirroring the `ScriptedChannel`/`FakeChannel` fixtures already used by the
/// unit tests in `command/mod.rs` and `state.rs`, but covering a whole flow
/// instead of one call.
struct ScriptedChannel {
    connected: bool,
    responses: HashMap<u32, Vec<u8>>,
}

impl ScriptedChannel {
    fn new() -> Self {
        Self { connected: false, responses: HashMap::new() }
    }

    fn on(mut self, command_code: u32, params: Vec<u8>) -> Self {
        self.responses.insert(command_code, success_response(&params));
        self
    }
}

fn success_response(params: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&0x00C4u16.to_be_bytes()); // TPM_TAG_RSP_COMMAND
    v.extend_from_slice(&((10 + params.len()) as u32).to_be_bytes());
    v.extend_from_slice(&0u32.to_be_bytes());
    v.extend_from_slice(params);
    v
}

impl DeviceChannel for ScriptedChannel {
    fn connect(&mut self) -> Result<(), CoreError> {
        self.connected = true;
        Ok(())
    }
    fn disconnect(&mut self) -> Result<(), CoreError> {
        self.connected = false;
        Ok(())
    }
    fn transmit(&mut self, command: &[u8], response: &mut [u8], _max_duration_us: u64) -> Result<usize, CoreError> {
        let command_code = u32::from_be_bytes([command[6], command[7], command[8], command[9]]);
        let bytes = self
            .responses
            .get(&command_code)
            .unwrap_or_else(|| panic!("unscripted command code {command_code:#x}"));
        let n = bytes.len().min(response.len());
        response[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }
    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// flags: not boot loader, not owned, deferred PP already latched
/// (`deferred_pp_required` clear, so `TpmState::has_deferred_pp` is true).
fn field_upgrade_info_response(remaining_updates: u32, version: &str) -> Vec<u8> {
    field_upgrade_info_response_with_flags(0, remaining_updates, version)
}

fn field_upgrade_info_response_with_flags(flags: u16, remaining_updates: u32, version: &str) -> Vec<u8> {
    let mut params = Vec::new();
    params.extend_from_slice(&0x0000_15D1u32.to_be_bytes()); // IFX_VENDOR_ID
    params.extend_from_slice(&flags.to_be_bytes());
    params.extend_from_slice(&remaining_updates.to_be_bytes());
    let version_bytes = version.as_bytes();
    params.extend_from_slice(&(version_bytes.len() as u16).to_be_bytes());
    params.extend_from_slice(version_bytes);
    params
}

/// `deferred_pp_required` bit (see `command::tpm12::FieldUpgradeInfo12`):
/// set means the chip has NOT yet latched deferred PP, so C6 must still run
/// `TSC_PhysicalPresence`/`SetCapability`.
const FLAG_DEFERRED_PP_REQUIRED: u16 = 0x0004;

fn section(tag: u16, body: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&tag.to_be_bytes());
    v.extend_from_slice(&(body.len() as u32).to_be_bytes());
    v.extend_from_slice(body);
    v
}

fn encode_wide(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

/// A TPM 1.2 image container: two small payload blocks, no dependency on
/// `image`'s private section-tag constants (the wire values are the public
/// contract `image::parse` documents).
fn build_tpm12_image() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"IFXJ");
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend(section(0x0001, &[0x01])); // source families: TPM12
    buf.extend(section(0x0002, &[0x01])); // target family: TPM12
    buf.extend(section(0x0003, &encode_wide("4.32.2600.0")));
    buf.extend(section(0x0004, &[0xAA]));
    buf.extend(section(0x0005, &[1, 2, 3, 4]));
    buf.extend(section(0x0005, &[5, 6, 7, 8]));
    buf.extend(section(0x0006, &[]));
    buf
}

/// An otherwise-valid container whose `TARGET_FAMILY` section declares TPM
/// 2.0, used to exercise `CHECK_IMAGE`'s compatibility mismatch against a
/// 1.2 chip.
fn build_tpm20_target_image() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"IFXJ");
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend(section(0x0001, &[0x02])); // source families: TPM20
    buf.extend(section(0x0002, &[0x02])); // target family: TPM20
    buf.extend(section(0x0003, &encode_wide("7.85.4555.0")));
    buf.extend(section(0x0004, &[0xAA]));
    buf.extend(section(0x0005, &[1, 2, 3, 4]));
    buf.extend(section(0x0006, &[]));
    buf
}

#[test]
fn tpm12_physical_presence_update_runs_to_completion() {
    let _guard = CWD_LOCK.lock().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let prior_cwd = std::env::current_dir().unwrap();
    std::env::set_current_dir(workdir.path()).unwrap();

    let image_path = workdir.path().join("update.bin");
    std::fs::write(&image_path, build_tpm12_image()).unwrap();

    let mut channel = ScriptedChannel::new()
        .on(wire::FIELD_UPGRADE_INFO_REQUEST, field_upgrade_info_response(5, "4.0.0.0"))
        .on(wire::TSC_PHYSICAL_PRESENCE, Vec::new())
        .on(wire::SET_CAPABILITY, Vec::new())
        .on(wire::FIELD_UPGRADE_START, Vec::new())
        .on(wire::FIELD_UPGRADE_UPDATE, Vec::new())
        .on(wire::FIELD_UPGRADE_COMPLETE, Vec::new());

    let request = UpdateRequest {
        update_type: UpdateType::Tpm12Pp,
        source: FirmwareSource::Path(image_path.clone()),
        dry_run: false,
        ignore_complete_error: false,
        access_mode: AccessMode::default(),
    };

    let mut progress_calls = Vec::new();
    let mut progress = |pct: u8| progress_calls.push(pct);
    let result = run_update(&request, &mut channel, &mut progress).unwrap();

    assert_eq!(result.return_code, 0);
    assert_eq!(result.used_firmware_image_path, Some(image_path));
    assert_eq!(progress_calls.last(), Some(&100));
    // A successful COMPLETE removes the resume marker it wrote mid-transfer.
    assert!(!workdir.path().join("TPMFactoryUpd_RunData.txt").exists());

    std::env::set_current_dir(prior_cwd).unwrap();
}

#[test]
fn blocked_when_no_field_upgrades_remain() {
    let _guard = CWD_LOCK.lock().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let prior_cwd = std::env::current_dir().unwrap();
    std::env::set_current_dir(workdir.path()).unwrap();

    let image_path = workdir.path().join("update.bin");
    std::fs::write(&image_path, build_tpm12_image()).unwrap();

    let mut channel =
        ScriptedChannel::new().on(wire::FIELD_UPGRADE_INFO_REQUEST, field_upgrade_info_response(0, "4.0.0.0"));

    let request = UpdateRequest {
        update_type: UpdateType::Tpm12Pp,
        source: FirmwareSource::Path(image_path),
        dry_run: false,
        ignore_complete_error: false,
        access_mode: AccessMode::default(),
    };

    let mut progress = |_pct: u8| {};
    let err = run_update(&request, &mut channel, &mut progress).unwrap_err();
    assert_eq!(err, CoreError::FwUpdateBlocked);

    std::env::set_current_dir(prior_cwd).unwrap();
}

/// §8 end-to-end scenario 2: a chip that already latched deferred physical
/// presence must not see `TSC_PhysicalPresence`/`SetCapability` re-issued.
/// `ScriptedChannel` has no entries for either ordinal, so the flow would
/// panic on an unscripted command if C6 didn't short-circuit.
#[test]
fn tpm12_deferred_pp_already_latched_skips_physical_presence_commands() {
    let _guard = CWD_LOCK.lock().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let prior_cwd = std::env::current_dir().unwrap();
    std::env::set_current_dir(workdir.path()).unwrap();

    let image_path = workdir.path().join("update.bin");
    std::fs::write(&image_path, build_tpm12_image()).unwrap();

    let mut channel = ScriptedChannel::new()
        .on(wire::FIELD_UPGRADE_INFO_REQUEST, field_upgrade_info_response(5, "4.0.0.0"))
        .on(wire::FIELD_UPGRADE_START, Vec::new())
        .on(wire::FIELD_UPGRADE_UPDATE, Vec::new())
        .on(wire::FIELD_UPGRADE_COMPLETE, Vec::new());

    let request = UpdateRequest {
        update_type: UpdateType::Tpm12Pp,
        source: FirmwareSource::Path(image_path),
        dry_run: false,
        ignore_complete_error: false,
        access_mode: AccessMode::default(),
    };

    let mut progress = |_pct: u8| {};
    let result = run_update(&request, &mut channel, &mut progress).unwrap();
    assert_eq!(result.return_code, 0);

    std::env::set_current_dir(prior_cwd).unwrap();
}

/// The converse of the above: deferred PP not yet latched runs the full
/// enable/assert/latch sequence.
#[test]
fn tpm12_pp_not_yet_deferred_runs_physical_presence_commands() {
    let _guard = CWD_LOCK.lock().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let prior_cwd = std::env::current_dir().unwrap();
    std::env::set_current_dir(workdir.path()).unwrap();

    let image_path = workdir.path().join("update.bin");
    std::fs::write(&image_path, build_tpm12_image()).unwrap();

    let mut channel = ScriptedChannel::new()
        .on(
            wire::FIELD_UPGRADE_INFO_REQUEST,
            field_upgrade_info_response_with_flags(FLAG_DEFERRED_PP_REQUIRED, 5, "4.0.0.0"),
        )
        .on(wire::TSC_PHYSICAL_PRESENCE, Vec::new())
        .on(wire::SET_CAPABILITY, Vec::new())
        .on(wire::FIELD_UPGRADE_START, Vec::new())
        .on(wire::FIELD_UPGRADE_UPDATE, Vec::new())
        .on(wire::FIELD_UPGRADE_COMPLETE, Vec::new());

    let request = UpdateRequest {
        update_type: UpdateType::Tpm12Pp,
        source: FirmwareSource::Path(image_path),
        dry_run: false,
        ignore_complete_error: false,
        access_mode: AccessMode::default(),
    };

    let mut progress = |_pct: u8| {};
    let result = run_update(&request, &mut channel, &mut progress).unwrap();
    assert_eq!(result.return_code, 0);

    std::env::set_current_dir(prior_cwd).unwrap();
}

/// §8 end-to-end scenario 5: an image that parses fine but targets the wrong
/// chip family reports `WrongFwImage` via `new_firmware_valid = No` on an
/// `Ok(UpdateResult)`, without any authorization command ever being issued
/// (`ScriptedChannel` has no entries beyond the probe).
#[test]
fn wrong_family_image_reports_new_firmware_valid_no() {
    let _guard = CWD_LOCK.lock().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let prior_cwd = std::env::current_dir().unwrap();
    std::env::set_current_dir(workdir.path()).unwrap();

    let image_path = workdir.path().join("update.bin");
    std::fs::write(&image_path, build_tpm20_target_image()).unwrap();

    let mut channel =
        ScriptedChannel::new().on(wire::FIELD_UPGRADE_INFO_REQUEST, field_upgrade_info_response(5, "4.0.0.0"));

    let request = UpdateRequest {
        update_type: UpdateType::Tpm12Pp,
        source: FirmwareSource::Path(image_path.clone()),
        dry_run: false,
        ignore_complete_error: false,
        access_mode: AccessMode::default(),
    };

    let mut progress = |_pct: u8| {};
    let result = run_update(&request, &mut channel, &mut progress).unwrap();

    assert_eq!(result.new_firmware_valid, tpmfwupd_core::request::Tristate::No);
    assert_eq!(result.return_code, CoreError::WrongFwImage.to_code());
    assert_eq!(result.used_firmware_image_path, Some(image_path));
    // The chip never got past CHECK_IMAGE: no resume marker was written.
    assert!(!workdir.path().join("TPMFactoryUpd_RunData.txt").exists());

    std::env::set_current_dir(prior_cwd).unwrap();
}

/// §8 invariant 6: dry run sends zero TPM commands (`ScriptedChannel` has no
/// entries at all — any `transmit` call would panic) and emits exactly the
/// deterministic `[25, 50, 75, 100]` sequence.
#[test]
fn dry_run_sends_no_tpm_commands() {
    let mut channel = ScriptedChannel::new();
    let request = UpdateRequest {
        update_type: UpdateType::Tpm12Pp,
        source: FirmwareSource::Path(PathBuf::from("image.bin")),
        dry_run: true,
        ignore_complete_error: false,
        access_mode: AccessMode::default(),
    };

    let mut progress_calls = Vec::new();
    let mut progress = |pct: u8| progress_calls.push(pct);
    let result = run_update(&request, &mut channel, &mut progress).unwrap();

    assert_eq!(progress_calls, vec![25, 50, 75, 100]);
    assert_eq!(result.return_code, 0);
}
