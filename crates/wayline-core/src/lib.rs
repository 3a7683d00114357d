pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod trigger;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, WaylineError};
pub use event::EventBus;
pub use state::{StateSnapshot, StateType, StateValue};
pub use traits::HostBridge;
pub use trigger::{ActiveTrigger, TriggerAction, TriggerKind, TriggerSpec};
pub use types::*;
