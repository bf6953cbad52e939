use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Notification;

const CHANNEL_CAPACITY: usize = 256;

/// Fire-and-forget fan-out of committed mutations: one channel per provider
/// plus a firehose carrying everything.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
    all: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one provider's notifications. Creates the channel if needed.
    pub fn subscribe(&self, provider_name: &str) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(provider_name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// Never fails: no listeners, or lagging ones, are not the mutation's problem.
    pub fn send(&self, notification: &Notification) {
        let _ = self.all.send(notification.clone());
        let provider = notification.provider_name();
        let orphaned = match self.channels.get(provider) {
            Some(sender) => sender.send(notification.clone()).is_err(),
            None => false,
        };
        if orphaned {
            // Last subscriber went away.
            self.channels
                .remove_if(provider, |_, sender| sender.receiver_count() == 0);
        }
    }
}
