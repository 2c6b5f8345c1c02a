pub mod context;
pub mod error;
pub mod events;

pub use context::AppContext;
pub use error::{Result, TankobonError};
pub use events::{EngineEvent, EventBus};
