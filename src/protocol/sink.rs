//! Destination for outbound commands.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::command::Command;

/// Anything that can deliver a [`Command`] to the rendering client.
///
/// Delivery is fire-and-forget: the returned flag only says whether the
/// bytes were handed to a connected peer.
pub trait CommandSink: Send + Sync {
    /// Deliver one command. Returns `false` if no peer took it.
    fn send_command<'a>(
        &'a self,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl<S: CommandSink + ?Sized> CommandSink for Arc<S> {
    fn send_command<'a>(
        &'a self,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        (**self).send_command(command)
    }
}
