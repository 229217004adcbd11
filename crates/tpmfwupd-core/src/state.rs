//! State Probe (C5): issues the vendor status query and reduces the reply
//! into a flat [`TpmState`] snapshot, created once per run and read-only
//! thereafter.

use crate::command::tpm12;
use crate::command::tpm20::{self, constants};
use crate::command::CommandLayer;
use crate::error::{CoreError, CoreResult};

/// Vendor ID this tool recognizes as "Infineon". `FieldUpgradeInfoRequest`
/// and the 2.0 `GetCapability` manufacturer property both report this for a
/// compatible chip.
pub const IFX_VENDOR_ID: u32 = 0x0000_15D1;
const TPM2_PROPERTY_MANUFACTURER: u32 = 0x0000_0105;
const TPM2_PROPERTY_FIRMWARE_VERSION_1: u32 = 0x0000_010B;
/// Vendor-specific properties (TCG reserves `PT_VENDOR_START` and up for
/// this) this tool's chip exposes alongside the standard TPM properties:
/// whether the platform hierarchy auth value is still empty, and how many
/// field upgrades remain before `FwUpdateBlocked` applies.
const TPM2_PROPERTY_PLATFORM_AUTH_SET: u32 = 0x0000_0110;
const TPM2_PROPERTY_FIELD_UPGRADE_COUNTER: u32 = 0x0000_0120;
/// Wide enough to sweep every property this probe cares about in one
/// `GetCapability` call.
const TPM2_PROPERTY_SWEEP_COUNT: u32 = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmState {
    pub is_infineon: bool,
    pub is_boot_loader: bool,
    pub is_unsupported_chip: bool,

    pub is_12: bool,
    pub is_12_owned: bool,
    pub has_deferred_pp: bool,

    pub is_20: bool,
    pub is_20_in_failure_mode: bool,
    pub is_20_restart_required: bool,
    pub platform_auth_empty: bool,
    pub platform_hierarchy_enabled: bool,

    pub firmware_version_string: String,
    pub remaining_updates: u32,
}

/// Issue `FieldUpgradeInfoRequest` (1.2) or `GetCapability` for vendor
/// properties (2.0) and classify the reply. Tries 1.2 first; if the chip
/// rejects the 1.2-only ordinal, falls back to the 2.0 path. Classification
/// rules are evaluated in order and the first match wins.
pub fn probe_state(layer: &mut CommandLayer) -> CoreResult<TpmState> {
    match tpm12::field_upgrade_info_request(layer) {
        Ok(info) => Ok(classify_12(&info)),
        Err(CoreError::ChipError(_)) => probe_20(layer),
        Err(e) => Err(e),
    }
}

fn classify_12(info: &tpm12::FieldUpgradeInfo12) -> TpmState {
    let mut state = TpmState {
        firmware_version_string: info.firmware_version_string.clone(),
        remaining_updates: info.remaining_updates,
        ..Default::default()
    };

    if info.vendor_id != IFX_VENDOR_ID {
        state.is_infineon = false;
        return state;
    }
    state.is_infineon = true;

    if info.is_boot_loader {
        state.is_boot_loader = true;
        return state;
    }

    state.is_12 = true;
    state.is_12_owned = info.owner_installed;
    state.has_deferred_pp = !info.deferred_pp_required;
    state
}

fn probe_20(layer: &mut CommandLayer) -> CoreResult<TpmState> {
    let props = tpm20::get_capability(
        layer,
        constants::TPM2_CAP_TPM_PROPERTIES,
        TPM2_PROPERTY_MANUFACTURER,
        TPM2_PROPERTY_SWEEP_COUNT,
    )?;

    let manufacturer = props
        .iter()
        .find(|p| p.property == TPM2_PROPERTY_MANUFACTURER)
        .map(|p| p.value)
        .unwrap_or(0);

    let mut state = TpmState::default();

    if manufacturer != IFX_VENDOR_ID {
        state.is_infineon = false;
        return state_with_fw_version(state, &props);
    }
    state.is_infineon = true;

    let (out_data, test_result) = match tpm20::get_test_result(layer) {
        Ok(r) => r,
        Err(_) => (Vec::new(), 0),
    };
    if is_boot_loader_marker(&out_data) {
        state.is_boot_loader = true;
        return Ok(state);
    }

    state.is_20 = true;
    state.is_20_in_failure_mode = test_result != 0;
    // A chip that just left failure mode without a fresh Startup still
    // requires a restart before further commands are trusted.
    state.is_20_restart_required = test_result != 0 && !out_data.is_empty();
    state.platform_auth_empty = props
        .iter()
        .find(|p| p.property == TPM2_PROPERTY_PLATFORM_AUTH_SET)
        .map(|p| p.value == 0)
        .unwrap_or(true);
    state.platform_hierarchy_enabled = true;
    state.remaining_updates = props
        .iter()
        .find(|p| p.property == TPM2_PROPERTY_FIELD_UPGRADE_COUNTER)
        .map(|p| p.value)
        .unwrap_or(0);

    if !state.is_12 && !state.is_20 && !state.is_boot_loader {
        state.is_unsupported_chip = true;
    }

    state_with_fw_version(state, &props)
}

fn state_with_fw_version(mut state: TpmState, props: &[tpm20::TpmProperty]) -> CoreResult<TpmState> {
    if let Some(p) = props.iter().find(|p| p.property == TPM2_PROPERTY_FIRMWARE_VERSION_1) {
        state.firmware_version_string = format!("{:#010x}", p.value);
    }
    Ok(state)
}

fn is_boot_loader_marker(out_data: &[u8]) -> bool {
    out_data.first() == Some(&0x01)
}
