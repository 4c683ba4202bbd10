//! Push notifications from the backend.
//!
//! Views never open their own connection. They ask the
//! [`SubscriptionManager`] for a [`Subscription`], which shares one connection
//! per session credential across every mounted view.

mod socketio;
mod subscription;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::Result;
use crate::session::Token;

pub use socketio::SocketIoTransport;
pub use subscription::{Subscription, SubscriptionManager};

#[cfg(test)]
pub(crate) use subscription::testing;

/// A typed notification from the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "line", rename_all = "snake_case")]
pub enum Event {
    /// `build_status_update`: some build changed status.
    BuildStatusUpdate,
    /// `build_finished`: some build completed.
    BuildFinished,
    /// `build_log`: one line of output from the running build.
    BuildLog(String),
}

impl Event {
    /// Whether this notification means server-side state changed and views
    /// should refetch.
    pub fn invalidates_snapshot(&self) -> bool {
        matches!(self, Self::BuildStatusUpdate | Self::BuildFinished)
    }
}

pub type EventStream = BoxStream<'static, Event>;

/// Opens an authenticated event connection.
///
/// The returned stream ends when the connection closes.
pub trait EventTransport: Send + Sync + 'static {
    fn connect(&self, token: Token) -> BoxFuture<'static, Result<EventStream>>;
}
