pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::{EngineConfig, RegistrationPolicy};
pub use error::{EffectError, WaiterKind};
pub use types::Event;
