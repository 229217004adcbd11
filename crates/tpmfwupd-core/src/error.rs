//! Unified error/return-code taxonomy.
//!
//! Every core function returns `Result<T, CoreError>`. Success is always the
//! absence of an error; the 32-bit numeric code a caller ultimately sees
//! (exit code, `UpdateResult::return_code`) comes from [`CoreError::to_code`].

/// Reserved high bit OR'd into a chip-returned response code so the
/// envelope/chip-error distinction survives the round trip to a plain `u32`.
pub const CHIP_ERROR_MASK: u32 = 0x8000_0000;

/// The taxonomy from the tool's error handling design: envelope failures,
/// chip preconditions, image/config problems, flow-level failures, and
/// raw chip-returned codes.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    // --- Envelope ---
    #[error("invalid parameter")]
    BadParameter,
    #[error("internal error")]
    Internal,
    #[error("device channel is not connected")]
    NotConnected,
    #[error("device channel is already connected")]
    AlreadyConnected,
    #[error("operation timed out")]
    TimedOut,
    #[error("malformed response from chip")]
    MalformedResponse,
    #[error("insufficient buffer space")]
    InsufficientBuffer,

    // --- Precondition ---
    #[error("TPM does not support the requested capability")]
    TpmNotSupportedFeature,
    #[error("chip is not an Infineon TPM")]
    NoIfxTpm,
    #[error("unsupported chip")]
    UnsupportedChip,
    #[error("TPM 1.2 has no owner")]
    Tpm12NoOwner,
    #[error("TPM 1.2 already has an owner")]
    Tpm12Owned,
    #[error("deferred physical presence is required")]
    Tpm12DeferredPpRequired,
    #[error("TPM is disabled or deactivated")]
    Tpm12DisabledDeactivated,
    #[error("invalid TPM 1.2 owner authorization")]
    Tpm12InvalidOwnerAuth,
    #[error("TPM 2.0 is in failure mode")]
    Tpm20FailureMode,
    #[error("a TPM restart is required before this operation")]
    RestartRequired,
    #[error("firmware update is blocked (update count exhausted)")]
    FwUpdateBlocked,

    // --- Image / config ---
    #[error("invalid firmware option")]
    InvalidFwOption,
    #[error("invalid config option")]
    InvalidConfigOption,
    #[error("invalid setting in config file")]
    InvalidSetting,
    #[error("firmware image is corrupt")]
    CorruptFwImage,
    #[error("firmware image does not match this chip")]
    WrongFwImage,
    #[error("firmware image decryption keys do not match this chip")]
    WrongDecryptKeys,
    #[error("a newer version of this tool is required to parse this image")]
    NewerToolRequired,
    #[error("no firmware update file was found for this chip")]
    FirmwareUpdateNotFound,
    #[error("chip is already at the requested firmware version")]
    AlreadyUpToDate,

    // --- Flow ---
    #[error("invalid update option")]
    InvalidUpdateOption,
    #[error("resume run data file not found")]
    ResumeRunDataNotFound,
    #[error("TPM firmware update failed")]
    TpmFirmwareUpdate,

    // --- Chip-returned ---
    #[error("chip returned error code {0:#06x}")]
    ChipError(u32),
}

impl CoreError {
    /// The stable 32-bit return code carried in `UpdateResult` and used as
    /// the process exit code. Chip-returned codes are OR'd with
    /// [`CHIP_ERROR_MASK`] so a caller can always recover the raw value with
    /// `code & !CHIP_ERROR_MASK`.
    pub fn to_code(&self) -> u32 {
        match self {
            Self::BadParameter => 1,
            Self::Internal => 2,
            Self::NotConnected => 3,
            Self::AlreadyConnected => 4,
            Self::TimedOut => 5,
            Self::MalformedResponse => 6,
            Self::InsufficientBuffer => 7,

            Self::TpmNotSupportedFeature => 20,
            Self::NoIfxTpm => 21,
            Self::UnsupportedChip => 22,
            Self::Tpm12NoOwner => 23,
            Self::Tpm12Owned => 24,
            Self::Tpm12DeferredPpRequired => 25,
            Self::Tpm12DisabledDeactivated => 26,
            Self::Tpm12InvalidOwnerAuth => 27,
            Self::Tpm20FailureMode => 28,
            Self::RestartRequired => 29,
            Self::FwUpdateBlocked => 30,

            Self::InvalidFwOption => 40,
            Self::InvalidConfigOption => 41,
            Self::InvalidSetting => 42,
            Self::CorruptFwImage => 43,
            Self::WrongFwImage => 44,
            Self::WrongDecryptKeys => 45,
            Self::NewerToolRequired => 46,
            Self::FirmwareUpdateNotFound => 47,
            Self::AlreadyUpToDate => 48,

            Self::InvalidUpdateOption => 60,
            Self::ResumeRunDataNotFound => 61,
            Self::TpmFirmwareUpdate => 62,

            Self::ChipError(raw) => CHIP_ERROR_MASK | (raw & !CHIP_ERROR_MASK),
        }
    }

    /// Whether this error wraps a raw code returned by the chip itself,
    /// as opposed to an envelope/precondition/flow failure on the host side.
    pub fn is_chip_error(&self) -> bool {
        matches!(self, Self::ChipError(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
