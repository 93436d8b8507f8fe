//! Session overlay: baseline values, in-flight edits, and replay.

pub mod history;
pub mod model;
pub mod precondition;
pub mod replay;
pub mod store;

pub use history::{HistoryEntry, MessageHistory, TOP_MESSAGES};
pub use model::{BaselineSnapshot, InterfaceId, InterfaceValue, OverlayEntry, ViewFilter};
pub use precondition::PreconditionScript;
pub use replay::{replay, ReplayReport};
pub use store::{SessionOverlay, SessionStore};
