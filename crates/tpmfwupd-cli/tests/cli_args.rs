//! Drives `Cli::try_parse_from` + `resolve()` together, the way a user's
//! actual invocation would, rather than inspecting field values one flag at
//! a time (the inline tests in `cli.rs` already do that).

use clap::Parser;
use tpmfwupd_cli::cli::{Action, Cli};
use tpmfwupd_core::channel::AccessMode;
use tpmfwupd_core::request::{FirmwareSource, UpdateType};

#[test]
fn update_tpm12_pp_with_firmware_resolves_to_a_full_update_request() {
    let cli = Cli::try_parse_from(["tpmfwupd", "--update", "tpm12-PP", "--firmware", "fw.bin", "--dry-run"]).unwrap();
    let action = cli.resolve().unwrap();
    match action {
        Action::Update(request) => {
            assert_eq!(request.update_type, UpdateType::Tpm12Pp);
            assert_eq!(request.source, FirmwareSource::Path("fw.bin".into()));
            assert!(request.dry_run);
            assert!(!request.ignore_complete_error);
        }
        _ => panic!("expected Action::Update"),
    }
}

#[test]
fn access_mode_memory_carries_base_addr_and_locality_into_the_request() {
    let cli = Cli::try_parse_from([
        "tpmfwupd",
        "--update",
        "tpm20-emptyplatformauth",
        "--firmware",
        "fw.bin",
        "--access-mode",
        "1",
        "--base-addr",
        "4275306496",
        "--locality",
        "2",
    ])
    .unwrap();
    let action = cli.resolve().unwrap();
    match action {
        Action::Update(request) => match request.access_mode {
            AccessMode::Memory { base_addr, locality } => {
                assert_eq!(base_addr, 0xFED4_0000);
                assert_eq!(locality, 2);
            }
            _ => panic!("expected AccessMode::Memory"),
        },
        _ => panic!("expected Action::Update"),
    }
}

#[test]
fn clear_ownership_flag_resolves_without_an_update_type() {
    let cli = Cli::try_parse_from(["tpmfwupd", "--tpm12-clearownership"]).unwrap();
    assert!(matches!(cli.resolve().unwrap(), Action::ClearOwnership));
}

#[test]
fn ignore_error_on_complete_flag_is_carried_through() {
    let cli =
        Cli::try_parse_from(["tpmfwupd", "--update", "tpm12-PP", "--firmware", "fw.bin", "--ignore-error-on-complete"]).unwrap();
    match cli.resolve().unwrap() {
        Action::Update(request) => assert!(request.ignore_complete_error),
        _ => panic!("expected Action::Update"),
    }
}
