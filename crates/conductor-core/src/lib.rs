pub mod config;
pub mod error;
pub mod event;
pub mod services;
pub mod shape;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ConductorError, Result};
pub use event::EventBus;
pub use services::ServiceContainer;
pub use shape::{Property, Shape, ValueKind};
pub use types::*;
