use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::{stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::{Event, EventStream, EventTransport};
use crate::error::{PipewatchError, Result};
use crate::session::{Session, Token};

const CHANNEL_CAPACITY: usize = 256;

struct Channel {
    generation: u64,
    subscribers: usize,
    sender: broadcast::Sender<Event>,
    task: JoinHandle<()>,
}

struct Registry {
    transport: Arc<dyn EventTransport>,
    channels: Mutex<HashMap<String, Channel>>,
    generations: Mutex<u64>,
}

impl Registry {
    fn channels(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        *generation
    }

    /// Forget a channel whose connection ended, unless it was replaced already.
    fn remove_ended(&self, key: &str, generation: u64) {
        let mut channels = self.channels();
        if channels.get(key).is_some_and(|ch| ch.generation == generation) {
            channels.remove(key);
        }
    }

    fn release(&self, key: &str, generation: u64) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(key).filter(|ch| ch.generation == generation) else {
            return;
        };

        channel.subscribers -= 1;
        debug!("Released event subscription ({} remaining)", channel.subscribers);

        if channel.subscribers == 0 {
            if let Some(channel) = channels.remove(key) {
                channel.task.abort();
                info!("Closed event channel");
            }
        }
    }
}

/// Shares one event connection per session credential across views.
///
/// Connections are reference counted: the first [`subscribe`] for a
/// credential connects, the last dropped [`Subscription`] disconnects.
///
/// [`subscribe`]: SubscriptionManager::subscribe
#[derive(Clone)]
pub struct SubscriptionManager {
    registry: Arc<Registry>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            registry: Arc::new(Registry {
                transport,
                channels: Mutex::new(HashMap::new()),
                generations: Mutex::new(0),
            }),
        }
    }

    /// Subscribe to push notifications for the session's credential.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PipewatchError::Unauthenticated`] if the session holds no
    /// credential.
    pub fn subscribe(&self, session: &Session) -> Result<Subscription> {
        let token = session.token().ok_or(PipewatchError::Unauthenticated)?;
        let key = token.as_str().to_owned();

        let mut channels = self.registry.channels();
        let (generation, receiver) = if let Some(channel) = channels.get_mut(&key) {
            channel.subscribers += 1;
            debug!("Joined event channel ({} subscribers)", channel.subscribers);
            (channel.generation, channel.sender.subscribe())
        } else {
            let generation = self.registry.next_generation();
            let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
            let task = tokio::spawn(forward(
                Arc::downgrade(&self.registry),
                session.clone(),
                token,
                key.clone(),
                generation,
                sender.clone(),
            ));
            channels.insert(
                key.clone(),
                Channel {
                    generation,
                    subscribers: 1,
                    sender,
                    task,
                },
            );
            (generation, receiver)
        };

        Ok(Subscription {
            receiver,
            key,
            generation,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Number of open shared connections.
    pub fn active_channels(&self) -> usize {
        self.registry.channels().len()
    }
}

async fn forward(
    registry: Weak<Registry>,
    session: Session,
    token: Token,
    key: String,
    generation: u64,
    sender: broadcast::Sender<Event>,
) {
    let Some(transport) = registry.upgrade().map(|r| Arc::clone(&r.transport)) else {
        return;
    };

    match transport.connect(token).await {
        Ok(mut events) => {
            while let Some(event) = events.next().await {
                debug!("Event received: {event:?}");
                // No receivers just means every view is between polls
                let _ = sender.send(event);
            }
        }
        // The channel refusing the credential counts as a 401
        Err(e) if e.requires_login() => session.invalidate(),
        Err(e) => warn!("Event channel unavailable: {e}"),
    }

    drop(sender);
    if let Some(registry) = registry.upgrade() {
        registry.remove_ended(&key, generation);
    }
}

/// One view's handle on the shared event connection.
///
/// Dropping it releases the view's reference.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    key: String,
    generation: u64,
    registry: Arc<Registry>,
}

impl Subscription {
    /// Wait for the next notification. `None` once the connection has ended.
    ///
    /// If this subscriber fell behind, the missed notifications collapse into
    /// a single [`Event::BuildStatusUpdate`] so the view refetches.
    pub async fn next(&mut self) -> Option<Event> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {missed} notifications; forcing a refresh");
                Some(Event::BuildStatusUpdate)
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Consume the subscription as a stream. The stream cannot be restarted;
    /// subscribe again for a new one.
    pub fn into_stream(self) -> EventStream {
        stream::unfold(self, |mut subscription| async move {
            let event = subscription.next().await?;
            Some((event, subscription))
        })
        .boxed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.generation);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use futures::channel::mpsc;
    use futures::future::BoxFuture;
    use futures::{FutureExt, StreamExt};

    use super::super::{Event, EventStream, EventTransport};
    use crate::error::{PipewatchError, Result};
    use crate::session::Token;

    /// In-process transport: every connect opens a feed the test can push to.
    #[derive(Default)]
    pub(crate) struct FeedTransport {
        pub(crate) feeds: Mutex<Vec<(Token, mpsc::UnboundedSender<Event>)>>,
        rejects: bool,
    }

    impl FeedTransport {
        /// Transport whose server refuses every credential.
        pub(crate) fn rejecting() -> Self {
            Self {
                rejects: true,
                ..Self::default()
            }
        }

        pub(crate) fn connects(&self) -> usize {
            self.feeds.lock().unwrap().len()
        }

        pub(crate) fn push(&self, event: Event) {
            for (_, feed) in self.feeds.lock().unwrap().iter() {
                let _ = feed.unbounded_send(event.clone());
            }
        }

        pub(crate) fn close_all(&self) {
            for (_, feed) in self.feeds.lock().unwrap().iter() {
                feed.close_channel();
            }
        }

        /// Yield to the runtime until `n` connections were opened.
        pub(crate) async fn wait_for_connects(&self, n: usize) {
            while self.connects() < n {
                tokio::task::yield_now().await;
            }
        }
    }

    impl EventTransport for FeedTransport {
        fn connect(&self, token: Token) -> BoxFuture<'static, Result<EventStream>> {
            if self.rejects {
                return async { Err::<EventStream, _>(PipewatchError::Unauthorized) }.boxed();
            }
            let (sender, receiver) = mpsc::unbounded();
            self.feeds.lock().unwrap().push((token, sender));
            async move { Ok(receiver.boxed()) }.boxed()
        }
    }
}
