//! Subscriptions: durable cursors over a directory's change stream.
//!
//! A subscription remembers the tick up to which its owner has seen changes. After every
//! committed `update()` the entries changed since that cursor are gathered, filtered by
//! the group and row predicates, and either pushed to the sink or left for
//! [`Context::poll_subscription`].

use super::Context;
use crate::dir::DirName;
use crate::error::StoreError;
use crate::types::{DirId, SessionId, Tick};
use crate::value::{File, Key};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Selects which keys a subscription cares about.
pub type GroupFn = Arc<dyn Fn(&Key) -> bool + Send + Sync>;
/// Per-file access check: `(user, key, file) -> visible`.
pub type RowFilter = Arc<dyn Fn(Option<&str>, &Key, &File) -> bool + Send + Sync>;
/// Receives batches as they are produced.
pub type SubscriptionSink = Arc<dyn Fn(&SubscriptionBatch) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    /// Deliver the whole (filtered) directory as a reset batch on subscribe.
    pub init: bool,
    pub user: Option<String>,
    pub group: Option<GroupFn>,
    pub filter: Option<RowFilter>,
    /// Without a sink, changes are pulled with `poll_subscription`.
    pub sink: Option<SubscriptionSink>,
}

impl SubscriptionOptions {
    pub fn with_init(mut self) -> Self {
        self.init = true;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_group(mut self, group: GroupFn) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sink(mut self, sink: SubscriptionSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("init", &self.init)
            .field("user", &self.user)
            .field("group", &self.group.is_some())
            .field("filter", &self.filter.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Changes delivered to a subscriber. Removed keys carry an empty file list.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionBatch {
    pub session: SessionId,
    pub dir: DirName,
    pub tick: Tick,
    /// The entries replace everything the subscriber knew.
    pub reset: bool,
    pub entries: Vec<(Key, Vec<File>)>,
}

impl SubscriptionBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) struct Subscription {
    pub(crate) dir: DirId,
    pub(crate) cursor: Tick,
    pub(crate) options: SubscriptionOptions,
}

/// Sink collecting batches in memory.
#[derive(Clone, Default)]
pub struct SubscriptionBuffer {
    batches: Arc<Mutex<Vec<SubscriptionBatch>>>,
}

impl SubscriptionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> SubscriptionSink {
        let batches = self.batches.clone();
        Arc::new(move |batch: &SubscriptionBatch| batches.lock().push(batch.clone()))
    }

    /// Take every batch received so far.
    pub fn drain(&self) -> Vec<SubscriptionBatch> {
        std::mem::take(&mut *self.batches.lock())
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

impl Context {
    /// Subscribe to the changes of an eager directory.
    pub fn subscribe(
        &mut self,
        dir: DirId,
        options: SubscriptionOptions,
    ) -> Result<SessionId, StoreError> {
        self.state.eager(dir)?;
        let session = SessionId(self.next_session);
        self.next_session += 1;
        let subscription = Subscription {
            dir,
            cursor: self.state.tick,
            options,
        };

        if subscription.options.init {
            let batch = self.reset_batch(session, &subscription)?;
            if let Some(sink) = &subscription.options.sink {
                sink(&batch);
            }
        }
        debug!(session = %session, dir = %self.dir_name(dir)?, "Subscribed");
        self.subscriptions.insert(session, subscription);
        Ok(session)
    }

    pub fn unsubscribe(&mut self, session: SessionId) -> Result<(), StoreError> {
        self.subscriptions
            .remove(&session)
            .map(|_| ())
            .ok_or(StoreError::SubscriptionNotFound(session))
    }

    /// Pull the changes accumulated since the session last saw its directory.
    pub fn poll_subscription(&mut self, session: SessionId) -> Result<SubscriptionBatch, StoreError> {
        let subscription = self
            .subscriptions
            .get(&session)
            .ok_or(StoreError::SubscriptionNotFound(session))?;
        let batch = self.changes_batch(session, subscription)?;
        if let Some(subscription) = self.subscriptions.get_mut(&session) {
            subscription.cursor = batch.tick;
        }
        Ok(batch)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver pending changes to every subscription that has a sink.
    ///
    /// Returns the sessions whose changes could not be collected. Their cursors stay put,
    /// so the next pass delivers the missed entries.
    pub(crate) fn notify_subscribers(&mut self) -> Vec<SessionId> {
        let deliver_empty = self.config.subscriptions.deliver_empty;
        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (session, subscription) in &self.subscriptions {
            let Some(sink) = &subscription.options.sink else {
                continue;
            };
            match self.changes_batch(*session, subscription) {
                Ok(batch) => {
                    if deliver_empty || !batch.is_empty() {
                        sink(&batch);
                    }
                    delivered.push((*session, batch.tick));
                }
                Err(err) => {
                    warn!(session = %session, error = %err, "Could not collect subscription changes");
                    failed.push(*session);
                }
            }
        }
        for (session, tick) in delivered {
            if let Some(subscription) = self.subscriptions.get_mut(&session) {
                subscription.cursor = tick;
            }
        }
        failed
    }

    fn changes_batch(
        &self,
        session: SessionId,
        subscription: &Subscription,
    ) -> Result<SubscriptionBatch, StoreError> {
        let dir = self.state.eager(subscription.dir)?;
        let options = &subscription.options;
        let entries = dir
            .changes_after(subscription.cursor)
            .into_iter()
            .filter(|key| options.group.as_ref().map_or(true, |group| group(key)))
            .map(|key| {
                let files = visible_files(options, &key, dir.get_array(&key));
                (key, files)
            })
            .collect();
        Ok(SubscriptionBatch {
            session,
            dir: dir.name().clone(),
            tick: self.state.tick,
            reset: false,
            entries,
        })
    }

    fn reset_batch(
        &self,
        session: SessionId,
        subscription: &Subscription,
    ) -> Result<SubscriptionBatch, StoreError> {
        let dir = self.state.eager(subscription.dir)?;
        let options = &subscription.options;
        let entries = dir
            .items()
            .filter(|(key, _)| options.group.as_ref().map_or(true, |group| group(*key)))
            .map(|(key, files)| (key.clone(), visible_files(options, key, files)))
            .filter(|(_, files)| !files.is_empty())
            .collect();
        Ok(SubscriptionBatch {
            session,
            dir: dir.name().clone(),
            tick: self.state.tick,
            reset: true,
            entries,
        })
    }
}

fn visible_files(options: &SubscriptionOptions, key: &Key, files: &[File]) -> Vec<File> {
    match &options.filter {
        None => files.to_vec(),
        Some(filter) => files
            .iter()
            .filter(|file| filter(options.user.as_deref(), key, *file))
            .cloned()
            .collect(),
    }
}
