//! Command Layer (C3): one request/response call site per TPM command used
//! by the update flow, built on top of the Byte Codec and the Device
//! Channel.

pub mod tpm12;
pub mod tpm20;

use crate::channel::DeviceChannel;
use crate::codec::{Marshaller, Unmarshaller, MAX_COMMAND_SIZE};
use crate::error::{CoreError, CoreResult};

/// Capability/status queries get the short timeout; field-upgrade data
/// blocks (which the chip may spend real time writing to flash) get the
/// long one. This is the "lookup table defined by the vendor spec" the
/// design calls for, made concrete as two tiers.
pub const SHORT_TIMEOUT_US: u64 = 2_000_000;
pub const LONG_TIMEOUT_US: u64 = 20_000_000;

/// Timeout to use for a given command code.
pub fn timeout_for(command_code: u32) -> u64 {
    use tpm12::ordinals::*;
    use tpm20::command_codes::*;
    match command_code {
        FIELD_UPGRADE_UPDATE | FIELD_UPGRADE_COMPLETE => LONG_TIMEOUT_US,
        TPM2_CC_FIELD_UPGRADE_DATA | TPM2_CC_FIELD_UPGRADE_COMMIT => LONG_TIMEOUT_US,
        _ => SHORT_TIMEOUT_US,
    }
}

/// A pair `{handle, nonce}` identifying a live authorization session.
/// Exactly one may be live at a time; ownership of flushing
/// it belongs to whoever created it.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub handle: u32,
    pub nonce: Vec<u8>,
}

/// TPM 1.2 tags (`TPM_TAG_*`) and TPM 2.0 structure tags (`TPM_ST_*`), used
/// in the outer command/response header.
pub mod tags {
    pub const TPM_TAG_RQU_COMMAND: u16 = 0x00C1;
    pub const TPM_TAG_RQU_AUTH1_COMMAND: u16 = 0x00C2;
    pub const TPM_TAG_RQU_AUTH2_COMMAND: u16 = 0x00C3;
    pub const TPM_TAG_RSP_COMMAND: u16 = 0x00C4;
    pub const TPM_TAG_RSP_AUTH1_COMMAND: u16 = 0x00C5;

    pub const TPM2_ST_NO_SESSIONS: u16 = 0x8001;
    pub const TPM2_ST_SESSIONS: u16 = 0x8002;
}

/// Drives one command/response exchange over a [`DeviceChannel`]: marshal
/// the header and body, patch in the true length, transmit, then unmarshal
/// the response header and surface a [`CoreError::ChipError`] for any
/// non-zero response code.
pub struct CommandLayer<'c> {
    channel: &'c mut dyn DeviceChannel,
}

impl<'c> CommandLayer<'c> {
    pub fn new(channel: &'c mut dyn DeviceChannel) -> Self {
        Self { channel }
    }

    /// Execute one command. `body` is everything after the command code.
    /// Returns the response tag and the response parameter bytes (everything
    /// after the response header).
    pub fn execute(&mut self, tag: u16, command_code: u32, body: &[u8]) -> CoreResult<(u16, Vec<u8>)> {
        let mut cmd_buf = [0u8; MAX_COMMAND_SIZE];
        let total_len = {
            let mut m = Marshaller::new(&mut cmd_buf);
            m.put_u16(tag)?;
            let len_offset = m.position();
            m.put_u32(0)?; // placeholder, patched below
            m.put_u32(command_code)?;
            m.put_bytes(body)?;
            let total = m.position() as u32;
            m.patch_u32_at(len_offset, total)?;
            total as usize
        };

        let mut resp_buf = [0u8; MAX_COMMAND_SIZE];
        let timeout = timeout_for(command_code);
        let n = self.channel.transmit(&cmd_buf[..total_len], &mut resp_buf, timeout)?;

        let mut u = Unmarshaller::new(&resp_buf[..n]);
        let resp_tag = u.get_u16()?;
        let resp_len = u.get_u32()? as usize;
        if resp_len > n {
            return Err(CoreError::MalformedResponse);
        }
        let resp_code = u.get_u32()?;
        if resp_code != 0 {
            return Err(CoreError::ChipError(resp_code));
        }
        let remaining = u.remaining();
        let params = u.get_bytes(remaining).map_err(|_| CoreError::MalformedResponse)?.to_vec();
        Ok((resp_tag, params))
    }

    /// Marshal and append a length-prefixed authorization session block (the
    /// same deferred-length technique as the outer command): session handle,
    /// nonce, continue-auth flag, and HMAC, with the block's own size patched
    /// in once the body is known.
    pub fn marshal_auth_block(out: &mut Vec<u8>, session_handle: u32, nonce_odd: &[u8], continue_session: bool, auth_hmac: &[u8]) -> CoreResult<()> {
        let mut body = [0u8; 256];
        let mut m = Marshaller::new(&mut body);
        m.put_u32(session_handle)?;
        m.put_blob(nonce_odd)?;
        m.put_u8(continue_session as u8)?;
        m.put_blob(auth_hmac)?;
        let n = m.position();
        out.extend_from_slice(&(n as u32).to_be_bytes());
        out.extend_from_slice(&body[..n]);
        Ok(())
    }
}
