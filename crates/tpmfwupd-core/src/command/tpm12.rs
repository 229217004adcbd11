//! TPM 1.2 command bodies used by the update flow.

use super::{tags, AuthSession, CommandLayer};
use crate::codec::{Marshaller, Unmarshaller};
use crate::error::{CoreError, CoreResult};

/// Command/sub-command ordinals. The standard ones are the TCG-published
/// values; the field-upgrade family is vendor-defined and lives in the
/// reserved vendor-specific ordinal range (`0x2000_0000` and up).
pub mod ordinals {
    pub const OIAP: u32 = 0x0000_000A;
    pub const OSAP: u32 = 0x0000_000B;
    pub const OWNER_CLEAR: u32 = 0x0000_005B;
    pub const READ_PUB_EK: u32 = 0x0000_007C;
    pub const TAKE_OWNERSHIP: u32 = 0x0000_000D;
    pub const SET_CAPABILITY: u32 = 0x0000_003F;
    pub const TSC_PHYSICAL_PRESENCE: u32 = 0x4000_000A;

    pub const FIELD_UPGRADE_INFO_REQUEST: u32 = 0x2000_0001;
    pub const FIELD_UPGRADE_START: u32 = 0x2000_0002;
    pub const FIELD_UPGRADE_UPDATE: u32 = 0x2000_0003;
    pub const FIELD_UPGRADE_COMPLETE: u32 = 0x2000_0004;
}

/// `TSC_PhysicalPresence` flag bits (a subset relevant to the update flow).
pub mod pp_flags {
    pub const PHYSICAL_PRESENCE_CMD_ENABLE: u16 = 0x0020;
    pub const PHYSICAL_PRESENCE_PRESENT: u16 = 0x0008;
}

/// `SetCapability` capability area / sub-capability used to latch deferred
/// physical presence.
pub mod capabilities {
    pub const TPM_SET_STCLEAR_DATA: u32 = 0x0000_0003;
    pub const TPM_SD_DEFERREDPHYSICALPRESENCE: u32 = 0x0000_0001;
}

/// Reduced form of `FieldUpgradeInfoRequest`'s response: only the fields C5
/// needs to classify chip state.
#[derive(Debug, Clone, Default)]
pub struct FieldUpgradeInfo12 {
    pub vendor_id: u32,
    pub is_boot_loader: bool,
    pub owner_installed: bool,
    pub deferred_pp_required: bool,
    pub remaining_updates: u32,
    pub firmware_version_string: String,
}

pub fn oiap(layer: &mut CommandLayer) -> CoreResult<AuthSession> {
    let (_, params) = layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::OIAP, &[])?;
    let mut u = Unmarshaller::new(&params);
    let handle = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
    let nonce = u.get_array::<20>().map_err(|_| CoreError::MalformedResponse)?;
    Ok(AuthSession { handle, nonce: nonce.to_vec() })
}

pub fn owner_clear(layer: &mut CommandLayer, session: &AuthSession, owner_auth_hmac: &[u8]) -> CoreResult<()> {
    let mut body = Vec::new();
    CommandLayer::marshal_auth_block(&mut body, session.handle, &session.nonce, false, owner_auth_hmac)?;
    layer.execute(tags::TPM_TAG_RQU_AUTH1_COMMAND, ordinals::OWNER_CLEAR, &body)?;
    Ok(())
}

/// Returns `(modulus, checksum)` where `checksum` is the 20-byte SHA-1 digest
/// the chip returns over the public key structure.
pub fn read_pub_ek(layer: &mut CommandLayer, antireplay_nonce: &[u8; 20]) -> CoreResult<(Vec<u8>, [u8; 20])> {
    let mut body = [0u8; 20];
    {
        let mut m = Marshaller::new(&mut body);
        m.put_bytes(antireplay_nonce)?;
    }
    let (_, params) = layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::READ_PUB_EK, &body)?;
    let mut u = Unmarshaller::new(&params);
    // pubkey structure: algorithm(4) + encScheme(2) + sigScheme(2) + parmSize(4) + parms + keyLength(4) + key
    let _algorithm = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
    let _enc_scheme = u.get_u16().map_err(|_| CoreError::MalformedResponse)?;
    let _sig_scheme = u.get_u16().map_err(|_| CoreError::MalformedResponse)?;
    let parm_size = u.get_u32().map_err(|_| CoreError::MalformedResponse)? as usize;
    let _parms = u.get_bytes(parm_size).map_err(|_| CoreError::MalformedResponse)?;
    let key_len = u.get_u32().map_err(|_| CoreError::MalformedResponse)? as usize;
    let modulus = u.get_bytes(key_len).map_err(|_| CoreError::MalformedResponse)?.to_vec();
    let checksum = u.get_array::<20>().map_err(|_| CoreError::MalformedResponse)?;
    Ok((modulus, checksum))
}

/// `TakeOwnership` with a hard-coded 2048-bit SRK parameter block (the tool
/// always installs the same storage root key shape).
pub fn take_ownership(
    layer: &mut CommandLayer,
    session: &AuthSession,
    enc_owner_auth: &[u8],
    enc_srk_auth: &[u8],
    owner_auth_hmac: &[u8],
) -> CoreResult<()> {
    const PROTOCOL_ID_RSA: u16 = 0x0001;
    let mut body = Vec::new();
    {
        let mut head = [0u8; 2048];
        let mut m = Marshaller::new(&mut head);
        m.put_u16(PROTOCOL_ID_RSA)?;
        m.put_blob(enc_owner_auth)?;
        m.put_blob(enc_srk_auth)?;
        // SRK key parameter block: 2048-bit RSA storage key, fixed shape.
        m.put_u32(0x0000_0001)?; // algorithm id: RSA
        m.put_u16(0x0003)?; // encScheme: OAEP
        m.put_u16(0x0001)?; // sigScheme: none
        m.put_u32(2048)?; // key size bits
        m.put_u32(65537)?; // public exponent
        m.put_u8(0)?; // authDataUsage: TPM_AUTH_NEVER for SRK
        let n = m.position();
        body.extend_from_slice(&head[..n]);
    }
    CommandLayer::marshal_auth_block(&mut body, session.handle, &session.nonce, false, owner_auth_hmac)?;
    layer.execute(tags::TPM_TAG_RQU_AUTH1_COMMAND, ordinals::TAKE_OWNERSHIP, &body)?;
    Ok(())
}

pub fn set_capability_deferred_pp(layer: &mut CommandLayer, value: bool) -> CoreResult<()> {
    let mut body = [0u8; 16];
    let n = {
        let mut m = Marshaller::new(&mut body);
        m.put_u32(capabilities::TPM_SET_STCLEAR_DATA)?;
        m.put_blob(&capabilities::TPM_SD_DEFERREDPHYSICALPRESENCE.to_be_bytes())?;
        m.put_blob(&[value as u8])?;
        m.position()
    };
    layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::SET_CAPABILITY, &body[..n])?;
    Ok(())
}

pub fn tsc_physical_presence(layer: &mut CommandLayer, flags: u16) -> CoreResult<()> {
    let mut body = [0u8; 2];
    {
        let mut m = Marshaller::new(&mut body);
        m.put_u16(flags)?;
    }
    layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::TSC_PHYSICAL_PRESENCE, &body)?;
    Ok(())
}

pub fn field_upgrade_info_request(layer: &mut CommandLayer) -> CoreResult<FieldUpgradeInfo12> {
    let (_, params) = layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::FIELD_UPGRADE_INFO_REQUEST, &[])?;
    let mut u = Unmarshaller::new(&params);
    let vendor_id = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
    let flags = u.get_u16().map_err(|_| CoreError::MalformedResponse)?;
    let remaining_updates = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
    let version_len = u.get_u16().map_err(|_| CoreError::MalformedResponse)? as usize;
    let version_bytes = u.get_bytes(version_len).map_err(|_| CoreError::MalformedResponse)?;
    Ok(FieldUpgradeInfo12 {
        vendor_id,
        is_boot_loader: flags & 0x0001 != 0,
        owner_installed: flags & 0x0002 != 0,
        deferred_pp_required: flags & 0x0004 != 0,
        remaining_updates,
        firmware_version_string: String::from_utf8_lossy(version_bytes).into_owned(),
    })
}

pub fn field_upgrade_start(layer: &mut CommandLayer) -> CoreResult<()> {
    layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::FIELD_UPGRADE_START, &[])?;
    Ok(())
}

pub fn field_upgrade_update(layer: &mut CommandLayer, block: &[u8]) -> CoreResult<()> {
    let mut body = vec![0u8; block.len() + 2];
    {
        let mut m = Marshaller::new(&mut body);
        m.put_blob(block)?;
    }
    layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::FIELD_UPGRADE_UPDATE, &body)?;
    Ok(())
}

pub fn field_upgrade_complete(layer: &mut CommandLayer) -> CoreResult<()> {
    layer.execute(tags::TPM_TAG_RQU_COMMAND, ordinals::FIELD_UPGRADE_COMPLETE, &[])?;
    Ok(())
}
