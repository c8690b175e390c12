use async_trait::async_trait;
use ingestcore::store::error::{Result, StoreError};
use ingestcore::store::records::*;
use ingestcore::store::traits::*;
use ingestcore::types::receipt::ReceiptKind;
use ingestcore::types::sync::VerifiedState;
use ingestcore::types::{AttachmentId, GroupId, MessageId, RecipientId, ServiceAddress, ThreadId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

const UNLIMITED_WRITES: usize = usize::MAX;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    last_id: u64,
    self_id: Option<RecipientId>,
    recipients: BTreeMap<RecipientId, RecipientRecord>,
    threads: BTreeMap<ThreadId, ThreadRecord>,
    messages: BTreeMap<MessageId, MessageRecord>,
    groups: BTreeMap<GroupId, GroupRecord>,
    group_receipts: BTreeMap<MessageId, BTreeMap<RecipientId, GroupReceiptInfo>>,
    identities: BTreeMap<RecipientId, IdentityRecord>,
    sessions: BTreeSet<(String, u32)>,
    payments: BTreeMap<String, PaymentRecord>,
    stickers: BTreeMap<(String, u32), StickerRecord>,
    settings: Settings,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn find_recipient(&self, address: &ServiceAddress) -> Option<&RecipientRecord> {
        if address.is_empty() {
            return None;
        }
        self.recipients
            .values()
            .find(|r| r.address.as_ref().is_some_and(|a| a.matches(address)))
    }

    fn create_recipient(&mut self, address: Option<ServiceAddress>, group_id: Option<GroupId>) -> RecipientId {
        let id = RecipientId(self.next_id());
        self.recipients.insert(
            id,
            RecipientRecord {
                id,
                address,
                group_id,
                ..Default::default()
            },
        );
        id
    }

    fn thread_for(&self, recipient: RecipientId) -> Option<ThreadId> {
        self.threads
            .values()
            .find(|t| t.recipient == recipient)
            .map(|t| t.id)
    }

    fn thread_or_create(&mut self, recipient: RecipientId) -> ThreadId {
        if let Some(id) = self.thread_for(recipient) {
            return id;
        }
        let id = ThreadId(self.next_id());
        self.threads.insert(
            id,
            ThreadRecord {
                id,
                recipient,
                unread_count: 0,
                last_seen: 0,
            },
        );
        id
    }

    /// Placeholders never block real content, but a second placeholder for
    /// the same message is a duplicate.
    fn is_duplicate(&self, author: RecipientId, thread: ThreadId, content: &MessageBody) -> bool {
        let class = content.kind.dedupe_class();
        let placeholder = content.kind == MessageKind::Placeholder;
        self.messages.values().any(|m| {
            m.author == author
                && m.thread == thread
                && m.sent_timestamp == content.sent_timestamp
                && (placeholder || m.kind != MessageKind::Placeholder)
                && m.kind.dedupe_class() == class
        })
    }

    fn content_message(&self, key: MessageKey) -> Option<&MessageRecord> {
        self.messages.values().find(|m| {
            m.author == key.author
                && m.sent_timestamp == key.timestamp
                && m.kind != MessageKind::Placeholder
                && m.kind.dedupe_class() == DedupeClass::Content
        })
    }

    fn refresh_unread(&mut self, thread: ThreadId) {
        let unread = self
            .messages
            .values()
            .filter(|m| m.thread == thread && !m.is_outgoing() && !m.read)
            .count() as u32;
        if let Some(t) = self.threads.get_mut(&thread) {
            t.unread_count = unread;
        }
    }

    fn insert_row(
        &mut self,
        thread: ThreadId,
        author: RecipientId,
        author_device: u32,
        direction: Direction,
        server_timestamp: u64,
        received_timestamp: u64,
        unidentified: bool,
        failure: Option<FailureMarker>,
        content: MessageBody,
    ) -> InsertResult {
        let id = MessageId(self.next_id());
        let mut attachment_ids = Vec::with_capacity(content.attachments.len());
        let mut attachments = Vec::with_capacity(content.attachments.len());
        for new in content.attachments {
            let attachment_id = AttachmentId(self.next_id());
            attachment_ids.push(attachment_id);
            attachments.push(AttachmentRecord {
                id: attachment_id,
                message: id,
                pointer: new.pointer,
                content_type: new.content_type,
                transfer: new.transfer,
                sticker: new.sticker,
                local_uri: new.local_uri,
                quote: new.quote,
            });
        }

        let outgoing = direction == Direction::Outgoing;
        self.messages.insert(
            id,
            MessageRecord {
                id,
                thread,
                author,
                author_device,
                direction,
                kind: content.kind,
                body: content.body,
                sent_timestamp: content.sent_timestamp,
                server_timestamp,
                received_timestamp,
                expires_in_ms: content.expires_in_ms,
                expire_started: 0,
                view_once: content.view_once,
                failure,
                remote_deleted: false,
                unidentified,
                sent: false,
                read: outgoing,
                group_context: content.group_context,
                quote: content.quote,
                shared_contacts: content.shared_contacts,
                previews: content.previews,
                mentions: content.mentions,
                attachments,
                reactions: Vec::new(),
                delivery_receipts: BTreeSet::new(),
                read_receipts: BTreeSet::new(),
                viewed_receipts: BTreeSet::new(),
            },
        );
        self.refresh_unread(thread);

        InsertResult {
            message_id: id,
            thread_id: thread,
            attachment_ids,
        }
    }

    fn message_mut(&mut self, id: MessageId) -> Result<&mut MessageRecord> {
        self.messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
    }

    fn recipient_mut(&mut self, id: RecipientId) -> Result<&mut RecipientRecord> {
        self.recipients
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("recipient {id}")))
    }
}

/// Transactional in-memory storage used by tests and the replay tool.
///
/// A transaction holds the whole state exclusively and works on a copy, so
/// commit is a swap and dropping the transaction discards everything.
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    write_budget: Arc<AtomicUsize>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            write_budget: Arc::new(AtomicUsize::new(UNLIMITED_WRITES)),
        }
    }

    /// A backend provisioned with the local account.
    pub fn with_self(address: ServiceAddress) -> Self {
        let mut state = MemoryState::default();
        let id = state.create_recipient(Some(address), None);
        state.self_id = Some(id);
        if let Some(record) = state.recipients.get_mut(&id) {
            record.registered = true;
            record.profile_sharing = true;
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            write_budget: Arc::new(AtomicUsize::new(UNLIMITED_WRITES)),
        }
    }

    /// Make every write after the next `writes` fail until cleared.
    pub fn fail_after_writes(&self, writes: usize) {
        self.write_budget.store(writes, Ordering::SeqCst);
    }

    pub fn clear_write_failures(&self) {
        self.write_budget.store(UNLIMITED_WRITES, Ordering::SeqCst);
    }

    pub async fn self_id(&self) -> Option<RecipientId> {
        self.state.lock().await.self_id
    }

    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.state.lock().await.messages.values().cloned().collect()
    }

    pub async fn messages_in(&self, thread: ThreadId) -> Vec<MessageRecord> {
        self.state
            .lock()
            .await
            .messages
            .values()
            .filter(|m| m.thread == thread)
            .cloned()
            .collect()
    }

    pub async fn recipient_by_address(&self, address: &ServiceAddress) -> Option<RecipientRecord> {
        self.state.lock().await.find_recipient(address).cloned()
    }

    pub async fn thread_for_address(&self, address: &ServiceAddress) -> Option<ThreadId> {
        let state = self.state.lock().await;
        let recipient = state.find_recipient(address)?.id;
        state.thread_for(recipient)
    }

    pub async fn thread_for_group(&self, group_id: &GroupId) -> Option<ThreadId> {
        let state = self.state.lock().await;
        let recipient = state.groups.get(group_id)?.recipient;
        state.thread_for(recipient)
    }

    pub async fn thread_count(&self) -> usize {
        self.state.lock().await.threads.len()
    }

    pub async fn group(&self, group_id: &GroupId) -> Option<GroupRecord> {
        self.state.lock().await.groups.get(group_id).cloned()
    }

    pub async fn group_receipts(&self, message: MessageId) -> Vec<GroupReceiptInfo> {
        self.state
            .lock()
            .await
            .group_receipts
            .get(&message)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn settings(&self) -> Settings {
        self.state.lock().await.settings.clone()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            write_budget: self.write_budget.clone(),
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    write_budget: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn charge_write(&self) -> Result<()> {
        self.write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                UNLIMITED_WRITES => Some(left),
                0 => None,
                n => Some(n - 1),
            })
            .map(|_| ())
            .map_err(|_| StoreError::Database("injected write failure".to_string()))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RecipientStore for MemoryTransaction {
    async fn self_id(&self) -> Result<RecipientId> {
        self.working
            .self_id
            .ok_or_else(|| StoreError::NotFound("local account is not provisioned".to_string()))
    }

    async fn find_recipient(&self, address: &ServiceAddress) -> Result<Option<RecipientRecord>> {
        Ok(self.working.find_recipient(address).cloned())
    }

    async fn recipient(&self, id: RecipientId) -> Result<RecipientRecord> {
        self.working
            .recipients
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("recipient {id}")))
    }

    async fn get_or_create_recipient(&mut self, address: &ServiceAddress) -> Result<RecipientId> {
        if address.is_empty() {
            return Err(StoreError::Constraint("recipient address has no identifier".to_string()));
        }
        if let Some(existing) = self.working.find_recipient(address) {
            let id = existing.id;
            let known = existing.address.clone().unwrap_or_default();
            let learns_e164 = known.e164.is_none() && address.e164.is_some();
            let learns_uuid = known.uuid.is_none() && address.uuid.is_some();
            if learns_e164 || learns_uuid {
                self.charge_write()?;
                let record = self.working.recipient_mut(id)?;
                let merged = record.address.get_or_insert_with(Default::default);
                if learns_e164 {
                    merged.e164 = address.e164.clone();
                }
                if learns_uuid {
                    merged.uuid = address.uuid.clone();
                }
            }
            return Ok(id);
        }
        self.charge_write()?;
        Ok(self.working.create_recipient(Some(address.clone()), None))
    }

    async fn get_or_create_group_recipient(&mut self, group_id: &GroupId) -> Result<RecipientId> {
        if let Some(existing) = self
            .working
            .recipients
            .values()
            .find(|r| r.group_id.as_ref() == Some(group_id))
        {
            return Ok(existing.id);
        }
        self.charge_write()?;
        Ok(self.working.create_recipient(None, Some(group_id.clone())))
    }

    async fn set_profile_key(&mut self, id: RecipientId, key: &[u8]) -> Result<bool> {
        let record = self.working.recipient_mut(id)?;
        if record.profile_key.as_deref() == Some(key) {
            return Ok(false);
        }
        self.charge_write()?;
        self.working.recipient_mut(id)?.profile_key = Some(key.to_vec());
        Ok(true)
    }

    async fn set_profile_sharing(&mut self, id: RecipientId, enabled: bool) -> Result<()> {
        self.charge_write()?;
        self.working.recipient_mut(id)?.profile_sharing = enabled;
        Ok(())
    }

    async fn set_blocked(&mut self, id: RecipientId, blocked: bool) -> Result<()> {
        self.charge_write()?;
        self.working.recipient_mut(id)?.blocked = blocked;
        Ok(())
    }

    async fn set_expire_messages(&mut self, id: RecipientId, seconds: u32) -> Result<()> {
        self.charge_write()?;
        self.working.recipient_mut(id)?.expire_messages_seconds = seconds;
        Ok(())
    }

    async fn mark_registered(&mut self, id: RecipientId) -> Result<()> {
        if self.working.recipient_mut(id)?.registered {
            return Ok(());
        }
        self.charge_write()?;
        self.working.recipient_mut(id)?.registered = true;
        Ok(())
    }

    async fn apply_blocked_list(&mut self, addresses: &[ServiceAddress], groups: &[GroupId]) -> Result<()> {
        self.charge_write()?;
        for record in self.working.recipients.values_mut() {
            let by_address = record
                .address
                .as_ref()
                .is_some_and(|a| addresses.iter().any(|b| a.matches(b)));
            let by_group = record.group_id.as_ref().is_some_and(|g| groups.contains(g));
            record.blocked = by_address || by_group;
        }
        for address in addresses {
            if self.working.find_recipient(address).is_none() && !address.is_empty() {
                let id = self.working.create_recipient(Some(address.clone()), None);
                self.working.recipient_mut(id)?.blocked = true;
            }
        }
        for group in groups {
            if !self.working.recipients.values().any(|r| r.group_id.as_ref() == Some(group)) {
                let id = self.working.create_recipient(None, Some(group.clone()));
                self.working.recipient_mut(id)?.blocked = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for MemoryTransaction {
    async fn thread_for_recipient(&self, recipient: RecipientId) -> Result<Option<ThreadId>> {
        Ok(self.working.thread_for(recipient))
    }

    async fn get_or_create_thread(&mut self, recipient: RecipientId) -> Result<ThreadId> {
        if let Some(id) = self.working.thread_for(recipient) {
            return Ok(id);
        }
        self.charge_write()?;
        Ok(self.working.thread_or_create(recipient))
    }

    async fn thread(&self, id: ThreadId) -> Result<ThreadRecord> {
        self.working
            .threads
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("thread {id}")))
    }

    async fn set_thread_read(&mut self, id: ThreadId) -> Result<()> {
        self.charge_write()?;
        for message in self.working.messages.values_mut().filter(|m| m.thread == id) {
            message.read = true;
        }
        self.working.refresh_unread(id);
        Ok(())
    }

    async fn set_read_since(&mut self, id: ThreadId, since: u64) -> Result<Vec<MarkedRead>> {
        self.charge_write()?;
        let mut marked = Vec::new();
        for message in self
            .working
            .messages
            .values_mut()
            .filter(|m| m.thread == id && !m.is_outgoing() && !m.read && m.sent_timestamp <= since)
        {
            message.read = true;
            marked.push(MarkedRead {
                message_id: message.id,
                thread_id: id,
                author: message.author,
                sent_timestamp: message.sent_timestamp,
                expires_in_ms: message.expires_in_ms,
                outgoing: false,
            });
        }
        if let Some(thread) = self.working.threads.get_mut(&id) {
            thread.last_seen = thread.last_seen.max(since);
        }
        self.working.refresh_unread(id);
        Ok(marked)
    }

    async fn delete_conversation(&mut self, id: ThreadId) -> Result<()> {
        self.charge_write()?;
        let removed: Vec<MessageId> = self
            .working
            .messages
            .values()
            .filter(|m| m.thread == id)
            .map(|m| m.id)
            .collect();
        for message in removed {
            self.working.messages.remove(&message);
            self.working.group_receipts.remove(&message);
        }
        self.working.threads.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryTransaction {
    async fn insert_incoming(&mut self, message: IncomingMessage) -> Result<Option<InsertResult>> {
        let thread = match self.working.thread_for(message.conversation) {
            Some(thread) => thread,
            None => {
                self.charge_write()?;
                self.working.thread_or_create(message.conversation)
            }
        };
        if self.working.is_duplicate(message.author, thread, &message.content) {
            return Ok(None);
        }
        self.charge_write()?;
        Ok(Some(self.working.insert_row(
            thread,
            message.author,
            message.author_device,
            Direction::Incoming,
            message.server_timestamp,
            message.received_timestamp,
            message.unidentified,
            message.failure,
            message.content,
        )))
    }

    async fn insert_outgoing(&mut self, message: OutgoingMessage) -> Result<Option<InsertResult>> {
        let author = self.self_id().await?;
        let thread = match self.working.thread_for(message.conversation) {
            Some(thread) => thread,
            None => {
                self.charge_write()?;
                self.working.thread_or_create(message.conversation)
            }
        };
        if self.working.is_duplicate(author, thread, &message.content) {
            return Ok(None);
        }
        self.charge_write()?;
        let sent_timestamp = message.content.sent_timestamp;
        Ok(Some(self.working.insert_row(
            thread,
            author,
            0,
            Direction::Outgoing,
            sent_timestamp,
            sent_timestamp,
            false,
            None,
            message.content,
        )))
    }

    async fn message(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        Ok(self.working.messages.get(&id).cloned())
    }

    async fn message_for(&self, key: MessageKey) -> Result<Option<MessageRecord>> {
        Ok(self.working.content_message(key).cloned())
    }

    async fn update_body(&mut self, id: MessageId, sent_timestamp: u64, body: &str) -> Result<ThreadId> {
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        message.sent_timestamp = sent_timestamp;
        message.body = Some(body.to_string());
        message.kind = MessageKind::Text;
        message.failure = None;
        Ok(message.thread)
    }

    async fn mark_failure(&mut self, id: MessageId, marker: FailureMarker) -> Result<ThreadId> {
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        message.kind = MessageKind::Placeholder;
        message.failure = Some(marker);
        Ok(message.thread)
    }

    async fn mark_end_session(&mut self, id: MessageId, sent_timestamp: u64) -> Result<ThreadId> {
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        message.sent_timestamp = sent_timestamp;
        message.kind = MessageKind::EndSession;
        message.failure = None;
        Ok(message.thread)
    }

    async fn mark_missed_call(&mut self, id: MessageId, video: bool) -> Result<ThreadId> {
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        message.kind = MessageKind::MissedCall { video };
        message.failure = None;
        Ok(message.thread)
    }

    async fn mark_remote_deleted(&mut self, id: MessageId) -> Result<()> {
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        message.remote_deleted = true;
        message.body = None;
        message.attachments.clear();
        message.quote = None;
        message.shared_contacts.clear();
        message.previews.clear();
        message.mentions.clear();
        message.reactions.clear();
        Ok(())
    }

    async fn mark_sent(&mut self, id: MessageId) -> Result<()> {
        self.charge_write()?;
        self.working.message_mut(id)?.sent = true;
        Ok(())
    }

    async fn mark_unidentified(&mut self, id: MessageId, unidentified: bool) -> Result<()> {
        self.charge_write()?;
        self.working.message_mut(id)?.unidentified = unidentified;
        Ok(())
    }

    async fn mark_expire_started(&mut self, id: MessageId, started_at: u64) -> Result<()> {
        self.charge_write()?;
        self.working.message_mut(id)?.expire_started = started_at;
        Ok(())
    }

    async fn delete_message(&mut self, id: MessageId) -> Result<()> {
        self.charge_write()?;
        if let Some(removed) = self.working.messages.remove(&id) {
            self.working.group_receipts.remove(&id);
            self.working.refresh_unread(removed.thread);
        }
        Ok(())
    }

    async fn delete_view_once_content(&mut self, id: MessageId) -> Result<()> {
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        for attachment in &mut message.attachments {
            attachment.pointer = None;
            attachment.local_uri = None;
            attachment.transfer = TransferState::Done;
        }
        Ok(())
    }

    async fn add_reaction(&mut self, id: MessageId, reaction: ReactionRecord) -> Result<bool> {
        let message = self.working.message_mut(id)?;
        if message
            .reactions
            .iter()
            .any(|r| r.author == reaction.author && r.emoji == reaction.emoji)
        {
            return Ok(false);
        }
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        message.reactions.retain(|r| r.author != reaction.author);
        message.reactions.push(reaction);
        Ok(true)
    }

    async fn remove_reaction(&mut self, id: MessageId, author: RecipientId) -> Result<bool> {
        let message = self.working.message_mut(id)?;
        if !message.reactions.iter().any(|r| r.author == author) {
            return Ok(false);
        }
        self.charge_write()?;
        self.working
            .message_mut(id)?
            .reactions
            .retain(|r| r.author != author);
        Ok(true)
    }

    async fn add_receipt(
        &mut self,
        key: MessageKey,
        kind: ReceiptKind,
        from: RecipientId,
    ) -> Result<Option<ReceiptUpdate>> {
        let Some(target) = self.working.content_message(key) else {
            return Ok(None);
        };
        let (message_id, thread_id) = (target.id, target.thread);
        let already = match kind {
            ReceiptKind::Delivery => target.delivery_receipts.contains(&from),
            ReceiptKind::Read => target.read_receipts.contains(&from),
            ReceiptKind::Viewed => target.viewed_receipts.contains(&from),
            ReceiptKind::Unknown => true,
        };
        if !already {
            self.charge_write()?;
            let message = self.working.message_mut(message_id)?;
            match kind {
                ReceiptKind::Delivery => message.delivery_receipts.insert(from),
                ReceiptKind::Read => message.read_receipts.insert(from),
                ReceiptKind::Viewed => message.viewed_receipts.insert(from),
                ReceiptKind::Unknown => false,
            };
        }
        Ok(Some(ReceiptUpdate {
            message_id,
            thread_id,
            changed: !already,
        }))
    }

    async fn mark_read_by_sync(&mut self, key: MessageKey) -> Result<Option<MarkedRead>> {
        let Some(target) = self.working.content_message(key) else {
            return Ok(None);
        };
        if target.read {
            return Ok(None);
        }
        let id = target.id;
        self.charge_write()?;
        let message = self.working.message_mut(id)?;
        message.read = true;
        let marked = MarkedRead {
            message_id: message.id,
            thread_id: message.thread,
            author: message.author,
            sent_timestamp: message.sent_timestamp,
            expires_in_ms: message.expires_in_ms,
            outgoing: message.is_outgoing(),
        };
        self.working.refresh_unread(marked.thread_id);
        Ok(Some(marked))
    }

    async fn upsert_group_call(
        &mut self,
        conversation: RecipientId,
        sender: RecipientId,
        sent_timestamp: u64,
        server_timestamp: u64,
        era_id: Option<String>,
    ) -> Result<(MessageId, ThreadId)> {
        self.charge_write()?;
        let thread = self.working.thread_or_create(conversation);
        let existing = self.working.messages.values_mut().find(|m| {
            m.thread == thread && matches!(&m.kind, MessageKind::GroupCallUpdate { era_id: e } if *e == era_id)
        });
        if let Some(row) = existing {
            row.sent_timestamp = row.sent_timestamp.max(sent_timestamp);
            row.server_timestamp = row.server_timestamp.max(server_timestamp);
            return Ok((row.id, thread));
        }
        let mut content = MessageBody::new(MessageKind::GroupCallUpdate { era_id }, sent_timestamp);
        content.body = None;
        let inserted = self.working.insert_row(
            thread,
            sender,
            0,
            Direction::Incoming,
            server_timestamp,
            server_timestamp,
            false,
            None,
            content,
        );
        Ok((inserted.message_id, thread))
    }
}

#[async_trait]
impl GroupStore for MemoryTransaction {
    async fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>> {
        Ok(self.working.groups.get(id).cloned())
    }

    async fn put_group(&mut self, record: GroupRecord) -> Result<()> {
        self.charge_write()?;
        self.working.groups.insert(record.id.clone(), record);
        Ok(())
    }

    async fn group_v1_by_expected_v2(&self, v2: &GroupId) -> Result<Option<GroupRecord>> {
        Ok(self
            .working
            .groups
            .values()
            .find(|g| g.id.is_v1() && g.id.derive_v2_migration_group_id().as_ref() == Some(v2))
            .cloned())
    }

    async fn migrate_group(&mut self, v1: &GroupId, v2: &GroupId, master_key: &[u8]) -> Result<()> {
        let Some(mut record) = self.working.groups.remove(v1) else {
            return Err(StoreError::NotFound(format!("group {v1}")));
        };
        self.charge_write()?;
        record.id = v2.clone();
        record.master_key = Some(master_key.to_vec());
        record.decrypted = None;
        self.working.recipient_mut(record.recipient)?.group_id = Some(v2.clone());
        self.working.groups.insert(v2.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl GroupReceiptStore for MemoryTransaction {
    async fn group_receipts(&self, message: MessageId) -> Result<Vec<GroupReceiptInfo>> {
        Ok(self
            .working
            .group_receipts
            .get(&message)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_group_receipts(
        &mut self,
        message: MessageId,
        recipients: &[RecipientId],
        status: GroupReceiptStatus,
        timestamp: u64,
    ) -> Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }
        self.charge_write()?;
        let rows = self.working.group_receipts.entry(message).or_default();
        for recipient in recipients {
            rows.entry(*recipient).or_insert(GroupReceiptInfo {
                recipient: *recipient,
                status,
                timestamp,
                unidentified: false,
            });
        }
        Ok(())
    }

    async fn update_group_receipt(
        &mut self,
        message: MessageId,
        recipient: RecipientId,
        status: GroupReceiptStatus,
        timestamp: u64,
    ) -> Result<()> {
        self.charge_write()?;
        if let Some(row) = self
            .working
            .group_receipts
            .get_mut(&message)
            .and_then(|rows| rows.get_mut(&recipient))
        {
            row.status = status;
            row.timestamp = timestamp;
        }
        Ok(())
    }

    async fn set_group_receipts_unidentified(
        &mut self,
        message: MessageId,
        statuses: &[(RecipientId, bool)],
    ) -> Result<()> {
        self.charge_write()?;
        if let Some(rows) = self.working.group_receipts.get_mut(&message) {
            for (recipient, unidentified) in statuses {
                if let Some(row) = rows.get_mut(recipient) {
                    row.unidentified = *unidentified;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryTransaction {
    async fn identity(&self, recipient: RecipientId) -> Result<Option<IdentityRecord>> {
        Ok(self.working.identities.get(&recipient).cloned())
    }

    async fn set_verified(
        &mut self,
        recipient: RecipientId,
        identity_key: &[u8],
        state: VerifiedState,
    ) -> Result<()> {
        self.charge_write()?;
        self.working.identities.insert(
            recipient,
            IdentityRecord {
                identity_key: identity_key.to_vec(),
                verified: state,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryTransaction {
    async fn has_session(&self, address: &ServiceAddress, device: u32) -> Result<bool> {
        Ok(self
            .working
            .sessions
            .iter()
            .any(|(name, d)| *d == device && address.has_identifier(name)))
    }

    async fn put_session(&mut self, address: &ServiceAddress, device: u32) -> Result<()> {
        self.charge_write()?;
        self.working
            .sessions
            .insert((address.identifier().to_string(), device));
        Ok(())
    }

    async fn delete_all_sessions(&mut self, address: &ServiceAddress) -> Result<()> {
        self.charge_write()?;
        self.working
            .sessions
            .retain(|(name, _)| !address.has_identifier(name));
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for MemoryTransaction {
    async fn insert_payment(&mut self, record: PaymentRecord) -> Result<bool> {
        if self.working.payments.contains_key(&record.id) {
            return Ok(false);
        }
        self.charge_write()?;
        self.working.payments.insert(record.id.clone(), record);
        Ok(true)
    }

    async fn payments(&self) -> Result<Vec<PaymentRecord>> {
        Ok(self.working.payments.values().cloned().collect())
    }
}

#[async_trait]
impl StickerStore for MemoryTransaction {
    async fn sticker(&self, pack_id: &str, sticker_id: u32) -> Result<Option<StickerRecord>> {
        Ok(self
            .working
            .stickers
            .get(&(pack_id.to_string(), sticker_id))
            .cloned())
    }

    async fn put_sticker(&mut self, sticker: StickerRecord) -> Result<()> {
        self.charge_write()?;
        self.working
            .stickers
            .insert((sticker.pack_id.clone(), sticker.sticker_id), sticker);
        Ok(())
    }

    async fn uninstall_pack(&mut self, pack_id: &str) -> Result<()> {
        self.charge_write()?;
        self.working.stickers.retain(|(pack, _), _| pack != pack_id);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryTransaction {
    async fn settings(&self) -> Result<Settings> {
        Ok(self.working.settings.clone())
    }

    async fn put_settings(&mut self, settings: Settings) -> Result<()> {
        self.charge_write()?;
        self.working.settings = settings;
        Ok(())
    }
}
