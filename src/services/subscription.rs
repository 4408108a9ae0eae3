//! Channel subscriptions for one identity.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use crate::models::{Channel, Identity};
use crate::stomp;
use crate::transport::FrameSink;

/// An open STOMP subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub channel: Channel,
}

/// Opens one subscription per channel derived from the identity captured at construction.
///
/// Identity changes are not applied in place: the owner discards the registry and builds a new one.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    channels: Vec<Channel>,
    active: HashMap<String, Channel>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new(identity: Option<&Identity>) -> Self {
        Self {
            channels: identity.map(Channel::for_identity).unwrap_or_default(),
            active: HashMap::new(),
            next_id: 0,
        }
    }

    /// Channels this registry subscribes to once connected.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Subscribe to every channel. Anything left over from a previous connection is forgotten first.
    #[instrument(skip_all, fields(channels = self.channels.len()))]
    pub fn open_all(&mut self, sink: &dyn FrameSink) -> usize {
        self.active.clear();
        for channel in &self.channels {
            let id = format!("sub-{}", self.next_id);
            self.next_id += 1;
            let destination = channel.destination();
            match sink.send_frame(stomp::subscribe_frame(&id, &destination)) {
                Ok(()) => {
                    debug!(subscription = %id, destination = %destination, "subscribed");
                    self.active.insert(id, channel.clone());
                }
                Err(e) => warn!(destination = %destination, error = %e, "subscribe failed"),
            }
        }
        info!(count = self.active.len(), "channels subscribed");
        self.active.len()
    }

    /// Channel a MESSAGE belongs to, by its `subscription` header.
    pub fn channel_for(&self, subscription_id: &str) -> Option<&Channel> {
        self.active.get(subscription_id)
    }

    /// Currently open subscriptions, in channel order.
    pub fn open(&self) -> Vec<Subscription> {
        let mut open: Vec<Subscription> = self
            .active
            .iter()
            .map(|(id, channel)| Subscription {
                id: id.clone(),
                channel: channel.clone(),
            })
            .collect();
        open.sort_by_key(|s| {
            self.channels
                .iter()
                .position(|c| *c == s.channel)
                .unwrap_or(usize::MAX)
        });
        open
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// The connection dropped; the broker already forgot our subscriptions.
    pub fn reset(&mut self) {
        self.active.clear();
    }

    /// Unsubscribe everything. Failures are ignored: the transport is closing anyway.
    pub fn cancel_all(&mut self, sink: &dyn FrameSink) {
        for (id, channel) in self.active.drain() {
            if let Err(e) = sink.send_frame(stomp::unsubscribe_frame(&id)) {
                debug!(subscription = %id, channel = %channel, error = %e, "unsubscribe failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::{ClientError, ClientResult};
    use crate::stomp::{Command, Frame};

    #[derive(Default)]
    struct Recorder {
        frames: RefCell<Vec<Frame>>,
        fail: bool,
    }

    impl FrameSink for Recorder {
        fn send_frame(&self, frame: Frame) -> ClientResult<()> {
            if self.fail {
                return Err(ClientError::Closed);
            }
            self.frames.borrow_mut().push(frame);
            Ok(())
        }
    }

    #[test]
    fn opens_one_subscription_per_channel() {
        let identity = Identity::new("42").with_club("7");
        let mut registry = SubscriptionRegistry::new(Some(&identity));
        let sink = Recorder::default();

        assert_eq!(registry.open_all(&sink), 3);

        let destinations: Vec<String> = sink
            .frames
            .borrow()
            .iter()
            .map(|f| f.get("destination").unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            destinations,
            vec!["/topic/general", "/topic/user/42", "/topic/club/7"]
        );

        let open = registry.open();
        assert_eq!(open.len(), 3);
        assert_eq!(registry.channel_for(&open[1].id), Some(&Channel::User("42".into())));
    }

    #[test]
    fn no_identity_means_no_subscriptions() {
        let mut registry = SubscriptionRegistry::new(None);
        let sink = Recorder::default();
        assert_eq!(registry.open_all(&sink), 0);
        assert!(sink.frames.borrow().is_empty());

        let mut anonymous = SubscriptionRegistry::new(Some(&Identity::new("")));
        assert_eq!(anonymous.open_all(&sink), 0);
        assert!(anonymous.is_empty());
    }

    #[test]
    fn reopen_after_reconnect_uses_fresh_ids() {
        let identity = Identity::new("42");
        let mut registry = SubscriptionRegistry::new(Some(&identity));
        let sink = Recorder::default();

        registry.open_all(&sink);
        let first: Vec<String> = registry.open().into_iter().map(|s| s.id).collect();
        registry.reset();
        assert!(registry.is_empty());

        registry.open_all(&sink);
        let second: Vec<String> = registry.open().into_iter().map(|s| s.id).collect();
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|id| registry.channel_for(id).is_none()));
    }

    #[test]
    fn cancel_all_unsubscribes_and_swallows_errors() {
        let identity = Identity::new("42").with_club("7");
        let mut registry = SubscriptionRegistry::new(Some(&identity));
        let sink = Recorder::default();
        registry.open_all(&sink);
        sink.frames.borrow_mut().clear();

        registry.cancel_all(&sink);
        assert!(registry.is_empty());
        let frames = sink.frames.borrow();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.command == Command::Unsubscribe));
        drop(frames);

        let mut registry = SubscriptionRegistry::new(Some(&identity));
        registry.open_all(&sink);
        let broken = Recorder {
            fail: true,
            ..Default::default()
        };
        registry.cancel_all(&broken);
        assert!(registry.is_empty());
    }
}
