//! Holds messages that arrived before the message they refer to.
//!
//! Items are keyed by the (author, sent timestamp) of the missing target and
//! handed back in arrival order once that target is stored. The cache is
//! bounded in keys, items per key and age; overflow drops the oldest item.

use crate::config::EarlyCachePolicy;
use ingestcore::store::MessageKey;
use ingestcore::types::DecryptedEnvelope;
use log::debug;
use moka::future::Cache;
use moka::ops::compute::Op;

pub struct EarlyMessageCache {
    items: Cache<MessageKey, Vec<DecryptedEnvelope>>,
    max_items_per_key: usize,
}

impl EarlyMessageCache {
    pub fn new(policy: &EarlyCachePolicy) -> Self {
        Self {
            items: Cache::builder()
                .max_capacity(policy.max_keys)
                .time_to_live(policy.time_to_live())
                .build(),
            max_items_per_key: policy.max_items_per_key.max(1),
        }
    }

    /// Park `envelope` under `key`. Storing an identical envelope twice keeps one copy.
    pub async fn store(&self, key: MessageKey, envelope: DecryptedEnvelope) {
        let max = self.max_items_per_key;
        self.items
            .entry(key)
            .and_compute_with(|maybe_entry| {
                let mut items = maybe_entry.map(|entry| entry.into_value()).unwrap_or_default();
                let op = if items.contains(&envelope) {
                    Op::Nop
                } else {
                    if items.len() >= max {
                        debug!("Early cache for {key} is full, dropping its oldest item");
                        items.remove(0);
                    }
                    items.push(envelope);
                    Op::Put(items)
                };
                std::future::ready(op)
            })
            .await;
    }

    /// Remove and return everything parked under `key`, oldest first.
    pub async fn retrieve(&self, key: &MessageKey) -> Option<Vec<DecryptedEnvelope>> {
        self.items.remove(key).await.filter(|items| !items.is_empty())
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.items.contains_key(key)
    }

    /// Approximate number of keys; pending evictions may not be reflected yet.
    pub async fn key_count(&self) -> u64 {
        self.items.run_pending_tasks().await;
        self.items.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestcore::types::envelope::{Content, DataMessage};
    use ingestcore::types::{RecipientId, ServiceAddress};
    use std::sync::Arc;

    fn envelope(ts: u64) -> DecryptedEnvelope {
        DecryptedEnvelope {
            sender: ServiceAddress::from_uuid("sender"),
            sender_device: 1,
            timestamp: ts,
            server_received_timestamp: ts,
            server_delivered_timestamp: ts,
            needs_receipt: false,
            unidentified: false,
            content: Content::Data(DataMessage::text(format!("m{ts}"))),
        }
    }

    fn key(ts: u64) -> MessageKey {
        MessageKey::new(RecipientId(7), ts)
    }

    #[tokio::test]
    async fn retrieve_returns_items_in_arrival_order_once() {
        let cache = EarlyMessageCache::new(&EarlyCachePolicy::default());
        cache.store(key(1), envelope(10)).await;
        cache.store(key(1), envelope(11)).await;
        cache.store(key(1), envelope(10)).await;

        let items = cache.retrieve(&key(1)).await.expect("items parked");
        assert_eq!(items.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![10, 11]);
        assert!(cache.retrieve(&key(1)).await.is_none());
    }

    #[tokio::test]
    async fn per_key_overflow_drops_oldest() {
        let policy = EarlyCachePolicy {
            max_items_per_key: 2,
            ..Default::default()
        };
        let cache = EarlyMessageCache::new(&policy);
        for ts in 1..=3 {
            cache.store(key(1), envelope(ts)).await;
        }
        let items = cache.retrieve(&key(1)).await.expect("items parked");
        assert_eq!(items.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn key_capacity_is_bounded() {
        let policy = EarlyCachePolicy {
            max_keys: 4,
            ..Default::default()
        };
        let cache = EarlyMessageCache::new(&policy);
        for ts in 0..50 {
            cache.store(key(ts), envelope(ts)).await;
        }
        assert!(cache.key_count().await <= 4);
    }

    #[tokio::test]
    async fn concurrent_stores_keep_every_item() {
        let cache = Arc::new(EarlyMessageCache::new(&EarlyCachePolicy::default()));
        let mut tasks = Vec::new();
        for ts in 0..16 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache.store(key(1), envelope(ts)).await;
            }));
        }
        for task in tasks {
            task.await.expect("store task");
        }
        let items = cache.retrieve(&key(1)).await.expect("items parked");
        assert_eq!(items.len(), 16);
    }
}
