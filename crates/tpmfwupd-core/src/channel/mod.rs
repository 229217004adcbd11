//! Device Channel (C2): the physical transport between the command layer and
//! the chip.
//!
//! Two backends are provided: [`tis::TisChannel`] (memory-mapped TIS
//! registers) and [`driver::DriverChannel`] (a blocking character-device
//! file). Both share the same contract: `connect` must run before any
//! `transmit`, a second `connect` is rejected, and `disconnect` without a
//! prior `connect` is rejected.

pub mod driver;
pub mod tis;

use crate::error::CoreResult;
use std::path::PathBuf;

/// How the host is configured to reach the chip, mirroring the `-access-mode`
/// CLI flag.
#[derive(Debug, Clone)]
pub enum AccessMode {
    /// TIS registers mapped at `base_addr`, accessed through `locality`.
    Memory { base_addr: u64, locality: u8 },
    /// A character device the kernel driver exposes (default `/dev/tpm0`).
    Driver { path: PathBuf },
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::Driver {
            path: PathBuf::from("/dev/tpm0"),
        }
    }
}

/// The OS-level privilege drop the Device Channel must perform on `connect`.
/// The mechanism itself — the actual `setuid`/`setgid` syscalls — is an
/// external collaborator whose contract is defined here but whose
/// implementation lives with whoever constructs the channel (the CLI crate,
/// in production; a no-op in tests).
pub trait PrivilegeDrop: std::fmt::Debug {
    /// Drop effective UID/GID to the real UID/GID. Failure is fatal: the
    /// caller must not proceed to use the channel.
    fn drop_privileges(&self) -> CoreResult<()>;
}

/// A privilege drop that does nothing, for tests and for backends that never
/// required elevated privileges in the first place (e.g. a device file the
/// caller already has permission to open).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPrivilegeDrop;

impl PrivilegeDrop for NoopPrivilegeDrop {
    fn drop_privileges(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// The request/response transport the Command Layer (C3) drives. A
/// transaction is always one `transmit` call: write the whole command, read
/// back the whole response, respecting the per-command timeout.
pub trait DeviceChannel {
    /// Perform the one-time setup (map registers / open the device file) and
    /// the mandatory privilege drop. Calling this twice without an
    /// intervening `disconnect` is an error.
    fn connect(&mut self) -> CoreResult<()>;

    /// Release locality / close the device handle. Calling this without a
    /// prior `connect` is an error.
    fn disconnect(&mut self) -> CoreResult<()>;

    /// Send `command` and block for a response, bounded by
    /// `max_duration_us`. Returns the number of response bytes written into
    /// `response`.
    fn transmit(&mut self, command: &[u8], response: &mut [u8], max_duration_us: u64) -> CoreResult<usize>;

    /// Whether `connect` has succeeded and `disconnect` has not yet been
    /// called.
    fn is_connected(&self) -> bool;
}

/// Construct the backend named by `mode`, wiring in the given privilege-drop
/// implementation.
pub fn open_channel(mode: AccessMode, privilege: Box<dyn PrivilegeDrop>) -> CoreResult<Box<dyn DeviceChannel>> {
    match mode {
        AccessMode::Memory { base_addr, locality } => Ok(Box::new(tis::TisChannel::new(base_addr, locality, privilege))),
        AccessMode::Driver { path } => Ok(Box::new(driver::DriverChannel::new(path, privilege))),
    }
}
