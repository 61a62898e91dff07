//! Compressed-audio offload sessions.
//!
//! [`CompressSession`] drives one compressed playback stream through a DSP
//! front-end: codec setup, per-device module parameters, non-blocking writes and
//! drain/readiness events delivered from a worker thread. Platform collaborators
//! sit behind the traits in [`platform`]; [`loopback`] provides in-memory ones.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod keyvector;
pub mod loopback;
pub mod payload;
pub mod platform;
pub mod session;
pub mod status;

pub use config::SessionConfig;
pub use dispatcher::EventCallback;
pub use error::{DriverError, MixerError, Result, SessionError};
pub use keyvector::{ConfigType, EffectPayload};
pub use session::{CompressSession, SessionDeps, SessionParam};
pub use status::{SessionState, SessionStatus};
