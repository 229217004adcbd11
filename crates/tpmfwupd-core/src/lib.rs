//! TPM 1.2/2.0 in-field firmware update engine.
//!
//! No process, filesystem-wide, or privilege policy lives here beyond what
//! the design assigns to the core: the resume marker file and the firmware
//! image / config data it's handed. Argument parsing, logging setup, and the
//! OS-level privilege drop mechanism belong to the binary crate.

pub mod auth;
pub mod channel;
pub mod codec;
pub mod command;
pub mod driver_fsm;
pub mod error;
pub mod image;
pub mod properties;
pub mod request;
pub mod state;

pub use error::{CoreError, CoreResult};
pub use request::{UpdateRequest, UpdateResult, UpdateType};
pub use state::TpmState;
