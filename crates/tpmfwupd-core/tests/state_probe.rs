//! Drives `state::probe_state` through the public `CommandLayer`/`DeviceChannel`
//! seam for the branches the inline unit tests in `state.rs` don't cover:
//! a non-Infineon 2.0 chip and a 2.0 chip caught in boot-loader mode. The
//! inline tests already cover `classify_12` and the 2.0 happy path.

use tpmfwupd_core::channel::DeviceChannel;
use tpmfwupd_core::command::CommandLayer;
use tpmfwupd_core::error::CoreResult;
use tpmfwupd_core::state::probe_state;

const TAG_NO_SESSIONS: u16 = 0x8001;
const CC_FIELD_UPGRADE_INFO_REQUEST: u32 = 0x2000_0001;
const CC_GET_CAPABILITY: u32 = 0x0000_017A;
const CC_GET_TEST_RESULT: u32 = 0x0000_017C;

struct FakeChannel {
    connected: bool,
    capability_props: Vec<(u32, u32)>,
    test_result_out_data: Vec<u8>,
}

fn header(params_len: usize) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&TAG_NO_SESSIONS.to_be_bytes());
    v.extend_from_slice(&((10 + params_len) as u32).to_be_bytes());
    v.extend_from_slice(&0u32.to_be_bytes());
    v
}

fn error_response(code: u32) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&TAG_NO_SESSIONS.to_be_bytes());
    v.extend_from_slice(&10u32.to_be_bytes());
    v.extend_from_slice(&code.to_be_bytes());
    v
}

impl DeviceChannel for FakeChannel {
    fn connect(&mut self) -> CoreResult<()> {
        self.connected = true;
        Ok(())
    }
    fn disconnect(&mut self) -> CoreResult<()> {
        self.connected = false;
        Ok(())
    }
    fn transmit(&mut self, command: &[u8], response: &mut [u8], _max_duration_us: u64) -> CoreResult<usize> {
        let command_code = u32::from_be_bytes([command[6], command[7], command[8], command[9]]);
        let bytes = match command_code {
            CC_FIELD_UPGRADE_INFO_REQUEST => error_response(0x09), // not a 1.2 chip
            CC_GET_CAPABILITY => {
                let mut params = Vec::new();
                params.push(0u8);
                params.extend_from_slice(&6u32.to_be_bytes()); // TPM2_CAP_TPM_PROPERTIES
                params.extend_from_slice(&(self.capability_props.len() as u32).to_be_bytes());
                for (property, value) in &self.capability_props {
                    params.extend_from_slice(&property.to_be_bytes());
                    params.extend_from_slice(&value.to_be_bytes());
                }
                let mut v = header(params.len());
                v.extend_from_slice(&params);
                v
            }
            CC_GET_TEST_RESULT => {
                let mut params = Vec::new();
                params.extend_from_slice(&(self.test_result_out_data.len() as u16).to_be_bytes());
                params.extend_from_slice(&self.test_result_out_data);
                params.extend_from_slice(&0u32.to_be_bytes());
                let mut v = header(params.len());
                v.extend_from_slice(&params);
                v
            }
            other => panic!("unexpected command code {other:#x}"),
        };
        let n = bytes.len().min(response.len());
        response[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }
    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[test]
fn non_infineon_tpm20_chip_is_not_infineon() {
    let mut channel = FakeChannel {
        connected: true,
        capability_props: vec![(0x0105, 0xDEAD_BEEF)], // manufacturer, not IFX_VENDOR_ID
        test_result_out_data: Vec::new(),
    };
    let mut layer = CommandLayer::new(&mut channel);
    let state = probe_state(&mut layer).unwrap();
    assert!(!state.is_infineon);
    assert!(!state.is_20);
}

#[test]
fn boot_loader_marker_in_get_test_result_stops_before_20_classification() {
    let mut channel = FakeChannel {
        connected: true,
        capability_props: vec![(0x0105, 0x0000_15D1)], // IFX_VENDOR_ID
        test_result_out_data: vec![0x01],               // boot-loader marker byte
    };
    let mut layer = CommandLayer::new(&mut channel);
    let state = probe_state(&mut layer).unwrap();
    assert!(state.is_infineon);
    assert!(state.is_boot_loader);
    assert!(!state.is_20);
}
