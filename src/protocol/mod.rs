//! Control-channel wire protocol.

pub mod codec;
pub mod command;
pub mod sink;

pub use codec::CommandCodec;
pub use command::{normalize_value, Command, ValueUpdate, DELIMITER};
pub use sink::CommandSink;
