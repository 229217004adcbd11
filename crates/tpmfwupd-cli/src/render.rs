//! Human-readable output renderer: the collaborator that turns a `TpmState`
//! or `UpdateResult` into the text printed to stdout, and the
//! numeric-code-plus-last-error-message line on failure.

use std::path::Path;
use tpmfwupd_core::error::CoreError;
use tpmfwupd_core::request::{Tristate, UpdateResult};
use tpmfwupd_core::state::TpmState;

pub fn render_tpm_state(state: &TpmState) {
    println!("TPM state:");
    println!("  is_infineon              : {}", state.is_infineon);
    println!("  is_boot_loader           : {}", state.is_boot_loader);
    println!("  is_unsupported_chip      : {}", state.is_unsupported_chip);
    println!("  is_12                    : {}", state.is_12);
    println!("  is_12_owned              : {}", state.is_12_owned);
    println!("  has_deferred_pp          : {}", state.has_deferred_pp);
    println!("  is_20                    : {}", state.is_20);
    println!("  is_20_in_failure_mode    : {}", state.is_20_in_failure_mode);
    println!("  is_20_restart_required   : {}", state.is_20_restart_required);
    println!("  platform_auth_empty      : {}", state.platform_auth_empty);
    println!("  platform_hierarchy_enabled: {}", state.platform_hierarchy_enabled);
    println!("  firmware_version_string  : {}", state.firmware_version_string);
    println!("  remaining_updates        : {}", state.remaining_updates);
}

pub fn render_progress(percent: u8) {
    println!("progress: {percent}%");
}

pub fn render_update_result(result: &UpdateResult) {
    println!("Update result:");
    if let Some(subtype) = result.subtype {
        println!("  subtype                  : {subtype:?}");
    }
    println!("  return_code              : {}", result.return_code);
    println!(
        "  new_firmware_valid       : {}",
        match result.new_firmware_valid {
            Tristate::Na => "NA",
            Tristate::Yes => "Yes",
            Tristate::No => "No",
        }
    );
    if let Some(family) = result.target_family {
        println!("  target_family            : {family:?}");
    }
    if !result.new_firmware_version_string.is_empty() {
        println!("  new_firmware_version     : {}", result.new_firmware_version_string);
    }
    if let Some(path) = &result.used_firmware_image_path {
        println!("  used_firmware_image_path : {}", path.display());
    }
}

/// Print the numeric code, the most recently stored error message, and — if
/// logging is configured — a pointer to the log file, on a failed run.
pub fn render_error(err: &CoreError, last_message: Option<&str>, log_path: Option<&Path>) {
    eprintln!("error {:#010x}: {err}", err.to_code());
    if let Some(msg) = last_message {
        eprintln!("  {msg}");
    }
    if let Some(path) = log_path {
        eprintln!("  see log file: {}", path.display());
    }
}
