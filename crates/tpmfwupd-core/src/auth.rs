//! Authorization Preparer (C6): one routine per [`crate::request::UpdateType`],
//! each its own small state machine. Any failure after an `AuthSession` was
//! created flushes that session before returning (best-effort; a flush
//! failure is logged, not surfaced) — the invariant that no session handle
//! outlives an error exit from here.

use crate::command::tpm12;
use crate::command::tpm20::{self, constants};
use crate::command::{AuthSession, CommandLayer};
use crate::error::{CoreError, CoreResult};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// SHA-1 digest of twenty zero bytes: the fixed owner-auth value this tool
/// has always installed. Kept as data, never recomputed from a different
/// source, so the tool stays compatible with chips it previously updated.
pub(crate) fn owner_auth_digest() -> [u8; 20] {
    use sha1::Digest;
    let mut hasher = Sha1::new();
    hasher.update([0u8; 20]);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// All-zero SRK auth: the tool never sets a non-trivial SRK password.
const SRK_AUTH: [u8; 20] = [0u8; 20];

pub(crate) fn hmac_sha1(key: &[u8], message: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC-SHA1 accepts any key length");
    mac.update(message);
    let mut out = [0u8; 20];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// `Tpm12Pp`: enable physical presence, assert it, then latch it across the
/// reboot boundary with deferred physical presence.
pub fn prepare_tpm12_pp(layer: &mut CommandLayer) -> CoreResult<()> {
    match tpm12::tsc_physical_presence(layer, tpm12::pp_flags::PHYSICAL_PRESENCE_CMD_ENABLE) {
        Ok(()) => {}
        Err(ref e) if is_bad_parameter(e) => {
            // The command may already be permanently enabled; tolerate it.
        }
        Err(e) => return Err(e),
    }

    if let Err(e) = tpm12::tsc_physical_presence(layer, tpm12::pp_flags::PHYSICAL_PRESENCE_PRESENT) {
        if is_bad_parameter(&e) {
            return Err(CoreError::Tpm12DeferredPpRequired);
        }
        return Err(e);
    }

    tpm12::set_capability_deferred_pp(layer, true)
}

/// `Tpm12TakeOwnership`: encrypt owner/SRK auth against the EK, open an OIAP
/// session, install the storage root key.
pub fn prepare_tpm12_take_ownership(layer: &mut CommandLayer) -> CoreResult<()> {
    let mut nonce = [0u8; 20];
    OsRng.fill_bytes(&mut nonce);
    let (modulus, _checksum) = tpm12::read_pub_ek(layer, &nonce)?;

    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(&modulus), BigUint::from(65537u32)).map_err(|_| CoreError::Internal)?;

    let owner_auth = owner_auth_digest();
    let enc_owner_auth = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &owner_auth)
        .map_err(|_| CoreError::Internal)?;
    let enc_srk_auth = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &SRK_AUTH)
        .map_err(|_| CoreError::Internal)?;

    let session = tpm12::oiap(layer)?;
    // No owner auth exists yet; the session HMAC is keyed by the value
    // being installed, per the vendor's TakeOwnership auth convention.
    let auth_hmac = hmac_sha1(&owner_auth, &session.nonce);

    let result = tpm12::take_ownership(layer, &session, &enc_owner_auth, &enc_srk_auth, &auth_hmac);
    match result {
        Ok(()) => Ok(()),
        Err(CoreError::ChipError(_)) => Err(CoreError::Tpm12DisabledDeactivated),
        Err(e) => Err(e),
    }
}

/// `Tpm20EmptyPlatformAuth`: start a policy session bound to the platform
/// hierarchy, satisfy it for `FieldUpgradeStart`, and hand the live session
/// back to the caller — C7 consumes and flushes it.
pub fn prepare_tpm20_empty_platform_auth(layer: &mut CommandLayer) -> CoreResult<AuthSession> {
    let session = tpm20::start_auth_session(layer, constants::TPM2_SE_POLICY, constants::TPM2_ALG_SHA256)?;

    let result = (|| -> CoreResult<()> {
        tpm20::policy_command_code(layer, &session, tpm20::command_codes::TPM2_CC_FIELD_UPGRADE_START)?;
        tpm20::policy_secret(layer, &session, constants::TPM2_RH_PLATFORM)?;
        Ok(())
    })();

    match result {
        Ok(()) => Ok(session),
        Err(e) => {
            if let Err(flush_err) = tpm20::flush_context(layer, session.handle) {
                tracing::warn!(error = ?flush_err, "failed to flush auth session after prepare failure");
            }
            Err(e)
        }
    }
}

fn is_bad_parameter(err: &CoreError) -> bool {
    matches!(err, CoreError::ChipError(code) if *code == BAD_PARAMETER_CODE)
}

/// The chip-returned `TPM_BADPARAMETER` response code (1.2 ordinal space).
const BAD_PARAMETER_CODE: u32 = 0x0000_0003;
