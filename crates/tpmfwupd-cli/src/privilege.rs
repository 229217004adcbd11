//! Real `PrivilegeDrop`: this tool is typically installed setuid
//! so an unprivileged user can reach `/dev/mem`/`/dev/tpm0`; once the device
//! channel is open, the effective UID/GID must drop back to the real
//! caller's before any TPM command is sent.

use nix::unistd::{getgid, getuid, setgid, setuid};
use tpmfwupd_core::channel::PrivilegeDrop;
use tpmfwupd_core::error::{CoreError, CoreResult};

#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPrivilegeDrop;

impl PrivilegeDrop for UnixPrivilegeDrop {
    fn drop_privileges(&self) -> CoreResult<()> {
        // Group first: once the UID drops, the process may no longer have
        // permission to change its GID.
        setgid(getgid()).map_err(|e| {
            tracing::error!(error = %e, "failed to drop effective gid");
            CoreError::Internal
        })?;
        setuid(getuid()).map_err(|e| {
            tracing::error!(error = %e, "failed to drop effective uid");
            CoreError::Internal
        })?;
        Ok(())
    }
}
