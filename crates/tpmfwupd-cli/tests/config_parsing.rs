//! End-to-end config-file resolution: a fixture written to a real temp
//! directory, read through `load_target_firmware_config`, checking the
//! `config_dir` it derives from the file's own location — something the
//! inline `config.rs` tests (which use a flat `NamedTempFile`) don't cover.

use std::io::Write;
use tpmfwupd_cli::config::load_target_firmware_config;
use tpmfwupd_core::error::CoreError;

#[test]
fn config_dir_is_the_directory_containing_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("TPMFactoryUpdCfg.ini");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(
        file,
        "; comment line, ignored\n\
         [UpdateType]\n\
         tpm12 = tpm12-PP\n\
         tpm20 = tpm20-emptyplatformauth\n\
         \n\
         [TargetFirmware]\n\
         version_SLB966x = 4.40.1.0\n\
         version_SLB9670 = 7.85.4555.0\n\
         \n\
         [FirmwareFolder]\n\
         path = images"
    )
    .unwrap();

    let cfg = load_target_firmware_config(&config_path).unwrap();
    assert_eq!(cfg.config_dir, dir.path());
    assert_eq!(cfg.firmware_folder, std::path::PathBuf::from("images"));
}

#[test]
fn unreadable_config_path_is_invalid_config_option() {
    let err = load_target_firmware_config(std::path::Path::new("/nonexistent/TPMFactoryUpdCfg.ini")).unwrap_err();
    assert_eq!(err, CoreError::InvalidConfigOption);
}
