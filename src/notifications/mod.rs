//! Notification feed.
//!
//! [`NotificationStore`] merges two sources into one feed keyed by id: REST
//! snapshots and push events. The merge is order-independent:
//!
//! | source   | unseen id | known id                                         |
//! |----------|-----------|--------------------------------------------------|
//! | snapshot | insert    | overwrite fields, keep `is_read = true` if known |
//! | push     | insert    | drop, except `is_read = true` upgrades the flag  |
//!
//! A record the server sent without a timestamp is stamped when first seen;
//! later snapshots keep that stamp so refreshing never reorders the feed.
//!
//! Read acknowledgements are optimistic. The local flag flips first, the
//! server is told second, and a failed acknowledgement reverts the flag.
//! The unread count is always recomputed from the records.

mod api;
mod types;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

pub use api::{NotificationApi, RestNotificationApi};
pub use types::NotificationRecord;

use crate::error::{Error, Result};
use crate::push::{PushEvent, PushListener};

/// The merged, de-duplicated notification feed.
#[derive(Debug)]
pub struct NotificationStore {
    records: Mutex<BTreeMap<i64, NotificationRecord>>,
    api: Arc<dyn NotificationApi>,
    unread: watch::Sender<usize>,
}

impl NotificationStore {
    /// Creates an empty store acknowledging reads through `api`.
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        let (unread, _) = watch::channel(0);
        Self {
            records: Mutex::new(BTreeMap::new()),
            api,
            unread,
        }
    }

    /// Merge a REST snapshot.
    pub fn ingest_snapshot(&self, snapshot: Vec<NotificationRecord>) {
        let mut records = self.lock();
        log::debug!("[Notifications] Ingesting snapshot of {}", snapshot.len());
        for incoming in snapshot {
            match records.get_mut(&incoming.id) {
                Some(existing) => {
                    let mut incoming = incoming;
                    if incoming.locally_stamped {
                        incoming.received_at = existing.received_at;
                        incoming.locally_stamped = existing.locally_stamped;
                    }
                    incoming.is_read |= existing.is_read;
                    *existing = incoming;
                }
                None => {
                    records.insert(incoming.id, incoming);
                }
            }
        }
        self.publish(&records);
    }

    /// Merge one pushed record.
    pub fn ingest_push_event(&self, record: NotificationRecord) {
        let mut records = self.lock();
        match records.get_mut(&record.id) {
            Some(existing) => {
                if record.is_read && !existing.is_read {
                    existing.is_read = true;
                } else {
                    log::debug!("[Notifications] Duplicate push for {} dropped", record.id);
                    return;
                }
            }
            None => {
                log::debug!("[Notifications] New notification {}", record.id);
                records.insert(record.id, record);
            }
        }
        self.publish(&records);
    }

    /// Mark one notification read, reverting if the server does not
    /// acknowledge it.
    pub async fn mark_read(&self, id: i64) -> Result<()> {
        let was_read = {
            let mut records = self.lock();
            let record = records.get_mut(&id).ok_or(Error::UnknownNotification(id))?;
            let was_read = std::mem::replace(&mut record.is_read, true);
            self.publish(&records);
            was_read
        };

        if let Err(e) = self.api.mark_read(id).await {
            log::warn!("[Notifications] Read acknowledgement for {} failed: {}", id, e);
            if !was_read {
                self.revert([id]);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Mark every notification read, reverting the ones this call changed if
    /// the server does not acknowledge it.
    pub async fn mark_all_read(&self) -> Result<()> {
        let changed: Vec<i64> = {
            let mut records = self.lock();
            let changed = records
                .values_mut()
                .filter(|r| !r.is_read)
                .map(|r| {
                    r.is_read = true;
                    r.id
                })
                .collect();
            self.publish(&records);
            changed
        };

        if let Err(e) = self.api.mark_all_read().await {
            log::warn!(
                "[Notifications] Mark-all acknowledgement failed, reverting {}: {}",
                changed.len(),
                e
            );
            self.revert(changed);
            return Err(e);
        }
        Ok(())
    }

    /// Fetch the server feed and merge it.
    pub async fn refresh(&self) -> Result<()> {
        let snapshot = self.api.fetch_snapshot().await?;
        self.ingest_snapshot(snapshot);
        Ok(())
    }

    /// Records newest first (`received_at`, then id, both descending).
    pub fn feed(&self) -> Vec<NotificationRecord> {
        let mut feed: Vec<_> = self.lock().values().cloned().collect();
        feed.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(b.id.cmp(&a.id)));
        feed
    }

    /// Number of unread records.
    pub fn unread_count(&self) -> usize {
        count_unread(&self.lock())
    }

    /// Receiver observing the unread count after every change.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread.subscribe()
    }

    /// Look up one record.
    pub fn get(&self, id: i64) -> Option<NotificationRecord> {
        self.lock().get(&id).cloned()
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut records = self.lock();
        records.clear();
        self.publish(&records);
    }

    fn revert(&self, ids: impl IntoIterator<Item = i64>) {
        let mut records = self.lock();
        for id in ids {
            // Gone if the feed was cleared while the acknowledgement was out.
            if let Some(record) = records.get_mut(&id) {
                record.is_read = false;
            }
        }
        self.publish(&records);
    }

    fn publish(&self, records: &BTreeMap<i64, NotificationRecord>) {
        self.unread.send_replace(count_unread(records));
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<i64, NotificationRecord>> {
        self.records.lock().expect("NotificationStore mutex poisoned")
    }
}

fn count_unread(records: &BTreeMap<i64, NotificationRecord>) -> usize {
    records.values().filter(|r| !r.is_read).count()
}

impl PushListener for NotificationStore {
    fn on_message(&self, event: PushEvent) {
        if let PushEvent::Notification(record) = event {
            self.ingest_push_event(record);
        }
    }
}
