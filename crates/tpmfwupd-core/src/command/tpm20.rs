//! TPM 2.0 command bodies used by the update flow.

use super::{tags, AuthSession, CommandLayer};
use crate::codec::{Marshaller, Unmarshaller};
use crate::error::{CoreError, CoreResult};

pub mod command_codes {
    pub const TPM2_CC_HIERARCHY_CHANGE_AUTH: u32 = 0x0000_0129;
    pub const TPM2_CC_POLICY_COMMAND_CODE: u32 = 0x0000_012C;
    pub const TPM2_CC_POLICY_SECRET: u32 = 0x0000_0151;
    pub const TPM2_CC_FLUSH_CONTEXT: u32 = 0x0000_0165;
    pub const TPM2_CC_START_AUTH_SESSION: u32 = 0x0000_0176;
    pub const TPM2_CC_GET_CAPABILITY: u32 = 0x0000_017A;
    pub const TPM2_CC_GET_TEST_RESULT: u32 = 0x0000_017C;
    pub const TPM2_CC_STARTUP: u32 = 0x0000_0144;
    pub const TPM2_CC_SHUTDOWN: u32 = 0x0000_0145;

    /// Vendor-defined field-upgrade command group, in the reserved
    /// vendor-specific range.
    pub const TPM2_CC_FIELD_UPGRADE_START: u32 = 0x2000_0011;
    pub const TPM2_CC_FIELD_UPGRADE_DATA: u32 = 0x2000_0012;
    pub const TPM2_CC_FIELD_UPGRADE_COMMIT: u32 = 0x2000_0013;
}

pub mod constants {
    pub const TPM2_SE_HMAC: u8 = 0x00;
    pub const TPM2_SE_POLICY: u8 = 0x01;

    pub const TPM2_ALG_NULL: u16 = 0x0010;
    pub const TPM2_ALG_SHA256: u16 = 0x000B;

    pub const TPM2_RH_PLATFORM: u32 = 0x4000_000C;
    pub const TPM2_RH_NULL: u32 = 0x4000_0007;

    pub const TPM2_SU_CLEAR: u16 = 0x0000;
    pub const TPM2_SU_STATE: u16 = 0x0001;

    /// `GetCapability` capability selector for TPM properties (used to read
    /// vendor/manufacturer and field-upgrade counters on 2.0 chips, which
    /// have no standalone `FieldUpgradeInfoRequest`).
    pub const TPM2_CAP_TPM_PROPERTIES: u32 = 0x0000_0006;
}

/// One `(property, value)` pair as returned by `GetCapability`.
#[derive(Debug, Clone, Copy)]
pub struct TpmProperty {
    pub property: u32,
    pub value: u32,
}

/// Reduced form of the vendor properties C5 reads via `GetCapability` on a
/// 2.0 chip.
#[derive(Debug, Clone, Default)]
pub struct FieldUpgradeInfo20 {
    pub manufacturer: u32,
    pub is_boot_loader: bool,
    pub in_failure_mode: bool,
    pub restart_required: bool,
    pub platform_auth_empty: bool,
    pub platform_hierarchy_enabled: bool,
    pub remaining_updates: u32,
    pub firmware_version_string: String,
}

pub fn startup(layer: &mut CommandLayer, startup_type: u16) -> CoreResult<()> {
    let mut body = [0u8; 2];
    {
        let mut m = Marshaller::new(&mut body);
        m.put_u16(startup_type)?;
    }
    layer.execute(tags::TPM2_ST_NO_SESSIONS, command_codes::TPM2_CC_STARTUP, &body)?;
    Ok(())
}

pub fn shutdown(layer: &mut CommandLayer, shutdown_type: u16) -> CoreResult<()> {
    let mut body = [0u8; 2];
    {
        let mut m = Marshaller::new(&mut body);
        m.put_u16(shutdown_type)?;
    }
    layer.execute(tags::TPM2_ST_NO_SESSIONS, command_codes::TPM2_CC_SHUTDOWN, &body)?;
    Ok(())
}

pub fn get_test_result(layer: &mut CommandLayer) -> CoreResult<(Vec<u8>, u32)> {
    let (_, params) = layer.execute(tags::TPM2_ST_NO_SESSIONS, command_codes::TPM2_CC_GET_TEST_RESULT, &[])?;
    let mut u = Unmarshaller::new(&params);
    let out_data = u.get_blob().map_err(|_| CoreError::MalformedResponse)?.to_vec();
    let test_result = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
    Ok((out_data, test_result))
}

pub fn get_capability(layer: &mut CommandLayer, capability: u32, property: u32, count: u32) -> CoreResult<Vec<TpmProperty>> {
    let mut body = [0u8; 12];
    {
        let mut m = Marshaller::new(&mut body);
        m.put_u32(capability)?;
        m.put_u32(property)?;
        m.put_u32(count)?;
    }
    let (_, params) = layer.execute(tags::TPM2_ST_NO_SESSIONS, command_codes::TPM2_CC_GET_CAPABILITY, &body)?;
    let mut u = Unmarshaller::new(&params);
    let _more_data = u.get_u8().map_err(|_| CoreError::MalformedResponse)?;
    let _cap = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
    let count = u.get_u32().map_err(|_| CoreError::MalformedResponse)? as usize;
    let mut props = Vec::with_capacity(count);
    for _ in 0..count {
        let property = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
        let value = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
        props.push(TpmProperty { property, value });
    }
    Ok(props)
}

/// `StartAuthSession` bound to the platform hierarchy, with empty salt, as
/// used by the empty-platform-auth update flow.
pub fn start_auth_session(layer: &mut CommandLayer, session_type: u8, auth_hash: u16) -> CoreResult<AuthSession> {
    const TPM2_RH_NULL: u32 = constants::TPM2_RH_NULL;
    let mut body = Vec::new();
    {
        let mut head = [0u8; 64];
        let mut m = Marshaller::new(&mut head);
        m.put_u32(TPM2_RH_NULL)?; // tpmKey: not used (no salt)
        m.put_u32(constants::TPM2_RH_PLATFORM)?; // bind: platform hierarchy
        let n = m.position();
        body.extend_from_slice(&head[..n]);
    }
    body.extend_from_slice(&[0x00, 0x14]); // nonceCaller length (20 bytes)
    body.extend_from_slice(&[0u8; 20]); // nonceCaller
    body.extend_from_slice(&[0x00, 0x00]); // encryptedSalt (empty)
    body.push(session_type);
    body.extend_from_slice(&[0x00, 0x10]); // symmetric: TPM_ALG_NULL (4-byte struct, NULL alg=2 bytes + placeholder)
    body.extend_from_slice(&[0x00, 0x00]);
    body.extend_from_slice(&auth_hash.to_be_bytes());

    let (_, params) = layer.execute(tags::TPM2_ST_NO_SESSIONS, command_codes::TPM2_CC_START_AUTH_SESSION, &body)?;
    let mut u = Unmarshaller::new(&params);
    let handle = u.get_u32().map_err(|_| CoreError::MalformedResponse)?;
    let nonce = u.get_blob().map_err(|_| CoreError::MalformedResponse)?.to_vec();
    Ok(AuthSession { handle, nonce })
}

pub fn policy_command_code(layer: &mut CommandLayer, session: &AuthSession, code: u32) -> CoreResult<()> {
    let mut body = Vec::new();
    CommandLayer::marshal_auth_block(&mut body, session.handle, &session.nonce, true, &[])?;
    body.extend_from_slice(&code.to_be_bytes());
    layer.execute(tags::TPM2_ST_SESSIONS, command_codes::TPM2_CC_POLICY_COMMAND_CODE, &body)?;
    Ok(())
}

pub fn policy_secret(layer: &mut CommandLayer, session: &AuthSession, auth_object: u32) -> CoreResult<()> {
    let mut body = Vec::new();
    CommandLayer::marshal_auth_block(&mut body, auth_object, &[], true, &[])?;
    // expiration, cpHashA, policyRef, timeout window: all empty/zero for the
    // empty-platform-auth flow.
    body.extend_from_slice(&[0x00, 0x00]); // nonceTPM (empty, verified out-of-band)
    body.extend_from_slice(&[0x00, 0x00]); // cpHashA
    body.extend_from_slice(&[0x00, 0x00]); // policyRef
    body.extend_from_slice(&0i32.to_be_bytes()); // expiration
    let _ = session;
    layer.execute(tags::TPM2_ST_SESSIONS, command_codes::TPM2_CC_POLICY_SECRET, &body)?;
    Ok(())
}

pub fn hierarchy_change_auth(layer: &mut CommandLayer, session: &AuthSession, auth_handle: u32, new_auth: &[u8]) -> CoreResult<()> {
    let mut body = Vec::new();
    CommandLayer::marshal_auth_block(&mut body, auth_handle, &session.nonce, false, &[])?;
    let len = new_auth.len() as u16;
    body.extend_from_slice(&len.to_be_bytes());
    body.extend_from_slice(new_auth);
    layer.execute(tags::TPM2_ST_SESSIONS, command_codes::TPM2_CC_HIERARCHY_CHANGE_AUTH, &body)?;
    Ok(())
}

pub fn flush_context(layer: &mut CommandLayer, handle: u32) -> CoreResult<()> {
    let mut body = [0u8; 4];
    {
        let mut m = Marshaller::new(&mut body);
        m.put_u32(handle)?;
    }
    layer.execute(tags::TPM2_ST_NO_SESSIONS, command_codes::TPM2_CC_FLUSH_CONTEXT, &body)?;
    Ok(())
}

/// `FieldUpgradeStart`, authorized by the policy session prepared with
/// `PolicyCommandCode(FieldUpgradeStart)` + `PolicySecret(platform)`.
pub fn field_upgrade_start(layer: &mut CommandLayer, session: &AuthSession) -> CoreResult<()> {
    let mut body = Vec::new();
    CommandLayer::marshal_auth_block(&mut body, session.handle, &session.nonce, true, &[])?;
    layer.execute(tags::TPM2_ST_SESSIONS, command_codes::TPM2_CC_FIELD_UPGRADE_START, &body)?;
    Ok(())
}

pub fn field_upgrade_data(layer: &mut CommandLayer, session: &AuthSession, block: &[u8]) -> CoreResult<()> {
    let mut body = Vec::new();
    CommandLayer::marshal_auth_block(&mut body, session.handle, &session.nonce, true, &[])?;
    let len = block.len() as u16;
    body.extend_from_slice(&len.to_be_bytes());
    body.extend_from_slice(block);
    layer.execute(tags::TPM2_ST_SESSIONS, command_codes::TPM2_CC_FIELD_UPGRADE_DATA, &body)?;
    Ok(())
}

pub fn field_upgrade_commit(layer: &mut CommandLayer, session: &AuthSession) -> CoreResult<()> {
    let mut body = Vec::new();
    CommandLayer::marshal_auth_block(&mut body, session.handle, &session.nonce, false, &[])?;
    layer.execute(tags::TPM2_ST_SESSIONS, command_codes::TPM2_CC_FIELD_UPGRADE_COMMIT, &body)?;
    Ok(())
}
