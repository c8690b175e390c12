//! Entry point of the ingestion pipeline.
//!
//! Each call applies one message inside one storage transaction. Side effects
//! (jobs, notifications, call hand-offs, parked messages) are collected while
//! applying and released only after the transaction commits. Messages parked
//! in the early-arrival cache are replayed once the message they wait for has
//! been stored, each in its own transaction.

use crate::calls::LoggingCallSink;
use crate::config::IngestConfig;
use crate::disposition::{Disposition, DropReason, RejectReason};
use crate::download::JobOnlyDownloader;
use crate::early_cache::EarlyMessageCache;
use crate::effects::SideEffects;
use crate::error::IngestError;
use crate::groups::{GroupContextResolver, GroupService, UnavailableGroupService};
use crate::handlers::Inbound;
use crate::types::events::EventBus;
use ingestcore::calls::CallSessionSink;
use ingestcore::download::AttachmentDownloader;
use ingestcore::jobs::{Job, JobQueue};
use ingestcore::store::{Backend, MessageKey, StoreError, Transaction};
use ingestcore::types::envelope::Content;
use ingestcore::types::group::GroupV1Kind;
use ingestcore::types::{
    AttachmentId, DecryptedEnvelope, FailureMetadata, GroupId, MessageId, MessageState, RecipientId,
};
use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Outcome of one transaction: the disposition, plus the key under which
/// parked messages may now be waiting for what was just stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Handled {
    pub disposition: Disposition,
    pub drain_key: Option<MessageKey>,
}

impl Handled {
    pub fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            drain_key: None,
        }
    }

    /// Drops and rejections leave storage exactly as it was.
    pub fn keeps_writes(&self) -> bool {
        !matches!(
            self.disposition,
            Disposition::DropSilently(_) | Disposition::RejectInvalid(_)
        )
    }
}

pub struct MessageProcessor {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) jobs: Arc<dyn JobQueue>,
    pub(crate) calls: Arc<dyn CallSessionSink>,
    pub(crate) downloader: Arc<dyn AttachmentDownloader>,
    pub(crate) groups: GroupContextResolver,
    pub(crate) early_cache: EarlyMessageCache,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) config: IngestConfig,
}

#[derive(Default)]
pub struct MessageProcessorBuilder {
    backend: Option<Arc<dyn Backend>>,
    jobs: Option<Arc<dyn JobQueue>>,
    calls: Option<Arc<dyn CallSessionSink>>,
    downloader: Option<Arc<dyn AttachmentDownloader>>,
    group_service: Option<Arc<dyn GroupService>>,
    event_bus: Option<Arc<EventBus>>,
    config: IngestConfig,
}

impl MessageProcessorBuilder {
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_job_queue(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_call_sink(mut self, calls: Arc<dyn CallSessionSink>) -> Self {
        self.calls = Some(calls);
        self
    }

    /// Used for the bounded inline sticker download.
    pub fn with_downloader(mut self, downloader: Arc<dyn AttachmentDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_group_service(mut self, service: Arc<dyn GroupService>) -> Self {
        self.group_service = Some(service);
        self
    }

    /// Share an existing bus, e.g. one the UI already subscribed to.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<MessageProcessor> {
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("A storage backend is required"))?;
        let jobs = self
            .jobs
            .ok_or_else(|| anyhow::anyhow!("A job queue is required"))?;
        let group_service = self
            .group_service
            .unwrap_or_else(|| Arc::new(UnavailableGroupService));

        Ok(MessageProcessor {
            backend,
            jobs,
            calls: self.calls.unwrap_or_else(|| Arc::new(LoggingCallSink)),
            downloader: self.downloader.unwrap_or_else(|| Arc::new(JobOnlyDownloader)),
            groups: GroupContextResolver::new(group_service, self.config.group_fetch_timeout()),
            early_cache: EarlyMessageCache::new(&self.config.early_cache),
            event_bus: self.event_bus.unwrap_or_default(),
            config: self.config,
        })
    }
}

impl MessageProcessor {
    pub fn builder() -> MessageProcessorBuilder {
        MessageProcessorBuilder::default()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn early_cache(&self) -> &EarlyMessageCache {
        &self.early_cache
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Apply one message from the decrypt layer.
    ///
    /// `timestamp` is the sender's timestamp of the envelope, the only one
    /// known when decryption failed; a decrypted envelope carries its own.
    /// `placeholder` names a row that was inserted speculatively for this
    /// message and should be reused. Only a storage failure is an error;
    /// everything else is a [`Disposition`].
    pub async fn process(
        &self,
        state: MessageState,
        envelope: Option<DecryptedEnvelope>,
        failure: Option<FailureMetadata>,
        timestamp: u64,
        placeholder: Option<MessageId>,
    ) -> Result<Disposition, IngestError> {
        match state {
            MessageState::DecryptedOk => match envelope {
                Some(envelope) => {
                    if envelope.timestamp != timestamp {
                        debug!("[{}] Decrypt layer reported timestamp {timestamp}", envelope.timestamp);
                    }
                    self.process_decrypted(&envelope, now_millis(), placeholder).await
                }
                None => {
                    warn!("[{timestamp}] Decrypted state without an envelope");
                    Ok(Disposition::DropSilently(DropReason::NoContent))
                }
            },
            MessageState::Duplicate | MessageState::Noop => {
                debug!("[{timestamp}] Nothing to do for {state:?}");
                Ok(Disposition::DropSilently(DropReason::NothingToDo))
            }
            _ => match failure {
                Some(meta) => self.process_failure(state, &meta, timestamp, placeholder).await,
                None => {
                    warn!("[{timestamp}] {state:?} without failure metadata");
                    Ok(Disposition::DropSilently(DropReason::NoContent))
                }
            },
        }
    }

    async fn process_decrypted(
        &self,
        envelope: &DecryptedEnvelope,
        received: u64,
        placeholder: Option<MessageId>,
    ) -> Result<Disposition, IngestError> {
        let handled = self.handle_envelope(envelope, received, placeholder).await?;
        if handled.disposition == Disposition::Applied
            && let Some(key) = handled.drain_key
        {
            self.drain_early_messages(key).await;
        }
        Ok(handled.disposition)
    }

    pub(crate) async fn handle_envelope(
        &self,
        envelope: &DecryptedEnvelope,
        received: u64,
        placeholder: Option<MessageId>,
    ) -> Result<Handled, IngestError> {
        let ts = envelope.timestamp;
        let mut txn = self
            .backend
            .begin()
            .await
            .map_err(|e| IngestError::for_envelope(envelope, e))?;
        let mut fx = SideEffects::default();

        let result = self
            .apply(&mut *txn, &mut fx, envelope, received, placeholder)
            .await;
        // Park while the transaction still holds the store: the target can
        // only commit, and drain its key, after the entry is in the cache.
        if result.as_ref().is_ok_and(Handled::keeps_writes) {
            self.park(std::mem::take(&mut fx.deferred)).await;
        }
        let handled = finish(txn, result).await.map_err(|e| {
            warn!(
                "[{ts}] Storage failure applying {} message from {}.{}: {e}",
                envelope.content_kind(),
                envelope.sender,
                envelope.sender_device
            );
            IngestError::for_envelope(envelope, e)
        })?;

        log_disposition(ts, envelope.content_kind(), &handled.disposition);
        if handled.keeps_writes() {
            self.flush(fx).await;
        }
        Ok(handled)
    }

    async fn apply(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        env: &DecryptedEnvelope,
        received: u64,
        placeholder: Option<MessageId>,
    ) -> Result<Handled, StoreError> {
        if env.sender.is_empty() {
            return Ok(Handled::new(Disposition::RejectInvalid(RejectReason::MissingSender)));
        }
        let self_id = txn.self_id().await?;
        if let Some(reason) = self.should_ignore(&*txn, env, self_id).await? {
            return Ok(Handled::new(Disposition::DropSilently(reason)));
        }

        let sender = txn.get_or_create_recipient(&env.sender).await?;
        let inbound = Inbound {
            env,
            sender,
            self_id,
            received,
            placeholder,
        };

        let handled = match &env.content {
            Content::Data(msg) => Handled {
                disposition: self.handle_data_message(txn, fx, inbound, msg).await?,
                drain_key: Some(MessageKey::new(sender, env.timestamp)),
            },
            Content::Sync(_) if sender != self_id => {
                Handled::new(Disposition::RejectInvalid(RejectReason::SyncFromOtherAccount))
            }
            Content::Sync(sync) => Handled {
                disposition: self.handle_sync_message(txn, fx, inbound, sync).await?,
                drain_key: sync
                    .sent
                    .as_ref()
                    .map(|sent| MessageKey::new(self_id, sent.timestamp)),
            },
            Content::Call(call) => Handled::new(self.handle_call_message(txn, fx, inbound, call).await?),
            Content::Receipt(receipt) => Handled::new(self.handle_receipt(txn, fx, inbound, receipt).await?),
            Content::Typing(typing) => Handled::new(self.handle_typing(txn, fx, inbound, typing).await?),
        };

        txn.mark_registered(sender).await?;
        Ok(handled)
    }

    /// Rules evaluated before anything is written.
    async fn should_ignore(
        &self,
        txn: &dyn Transaction,
        env: &DecryptedEnvelope,
        self_id: RecipientId,
    ) -> Result<Option<DropReason>, StoreError> {
        let sender_blocked = txn
            .find_recipient(&env.sender)
            .await?
            .is_some_and(|r| r.blocked);

        match &env.content {
            Content::Data(msg) => {
                if let Some(Ok(group_id)) = msg.group_id() {
                    if msg.is_group_v1_update() && self.groups.is_migrated_v1(txn, &group_id).await? {
                        return Ok(Some(DropReason::StaleGroupV1Update));
                    }
                    if self.is_conversation_blocked(txn, &group_id).await? {
                        return Ok(Some(DropReason::BlockedConversation));
                    }
                    let record = self.groups.group_record(txn, &group_id).await?;
                    let unknown = record.as_ref().is_none_or(|g| g.is_placeholder(self_id));
                    if unknown && sender_blocked {
                        return Ok(Some(DropReason::BlockedSender));
                    }
                    if let Some(record) = &record
                        && !record.active
                        && msg.has_renderable_content()
                    {
                        return Ok(Some(DropReason::InactiveGroup));
                    }
                }
                let is_quit = msg.group_v1().is_some_and(|ctx| ctx.kind == GroupV1Kind::Quit);
                if sender_blocked && !is_quit && !msg.is_group_v2_update() {
                    return Ok(Some(DropReason::BlockedSender));
                }
                Ok(None)
            }
            Content::Call(_) if sender_blocked => Ok(Some(DropReason::BlockedSender)),
            Content::Typing(_) if sender_blocked => Ok(Some(DropReason::BlockedSender)),
            Content::Typing(typing) => {
                let Some(raw) = &typing.group_id else {
                    return Ok(None);
                };
                let Ok(group_id) = GroupId::from_raw(raw) else {
                    return Ok(Some(DropReason::BadGroupContext));
                };
                if self.is_conversation_blocked(txn, &group_id).await? {
                    return Ok(Some(DropReason::BlockedConversation));
                }
                match self.groups.group_record(txn, &group_id).await? {
                    Some(record) if !record.active => Ok(Some(DropReason::InactiveGroup)),
                    _ => Ok(None),
                }
            }
            Content::Call(_) | Content::Sync(_) | Content::Receipt(_) => Ok(None),
        }
    }

    async fn is_conversation_blocked(&self, txn: &dyn Transaction, group_id: &GroupId) -> Result<bool, StoreError> {
        match self.groups.find_group_recipient(txn, group_id).await? {
            Some(recipient) => Ok(txn.recipient(recipient).await?.blocked),
            None => Ok(false),
        }
    }

    /// Replay everything parked under `first`, then under whatever those
    /// replays stored, until nothing is left.
    async fn drain_early_messages(&self, first: MessageKey) {
        let mut pending = VecDeque::from([first]);
        let mut seen = HashSet::new();

        while let Some(key) = pending.pop_front() {
            if !seen.insert(key) {
                continue;
            }
            let Some(parked) = self.early_cache.retrieve(&key).await else {
                continue;
            };
            debug!("Replaying {} early message(s) waiting on {key}", parked.len());
            for envelope in parked {
                match self.handle_envelope(&envelope, now_millis(), None).await {
                    Ok(handled) => {
                        if handled.disposition == Disposition::Applied
                            && let Some(next) = handled.drain_key
                        {
                            pending.push_back(next);
                        }
                    }
                    Err(e) => warn!("Dropping early message waiting on {key}: {e}"),
                }
            }
        }
    }

    async fn park(&self, deferred: Vec<(MessageKey, DecryptedEnvelope)>) {
        for (key, envelope) in deferred {
            self.early_cache.store(key, envelope).await;
        }
    }

    pub(crate) async fn flush(&self, fx: SideEffects) {
        for event in fx.events {
            self.event_bus.dispatch(event);
        }
        for call in fx.calls {
            self.calls.call_event(call).await;
        }
        for (message_id, attachment_id) in fx.sticker_downloads {
            self.download_inline(message_id, attachment_id).await;
        }
        for job in fx.jobs {
            self.jobs.enqueue(job);
        }
    }

    /// Try the download within the configured budget, falling back to a forced job.
    async fn download_inline(&self, message_id: MessageId, attachment_id: AttachmentId) {
        let budget = self.config.sticker_inline_budget();
        let outcome = tokio::time::timeout(budget, self.downloader.download(message_id, attachment_id)).await;
        match outcome {
            Ok(Ok(())) => {
                debug!("Downloaded sticker attachment {attachment_id} inline");
                return;
            }
            Ok(Err(e)) => warn!("Inline download of sticker attachment {attachment_id} failed: {e}"),
            Err(_) => warn!("Inline download of sticker attachment {attachment_id} exceeded {budget:?}"),
        }
        self.jobs.enqueue(Job::AttachmentDownload {
            message_id,
            attachment_id,
            forced: true,
        });
    }
}

/// Commit when the outcome keeps its writes, roll back otherwise.
pub(crate) async fn finish(
    txn: Box<dyn Transaction>,
    result: Result<Handled, StoreError>,
) -> Result<Handled, StoreError> {
    match result {
        Ok(handled) if handled.keeps_writes() => {
            txn.commit().await?;
            Ok(handled)
        }
        Ok(handled) => {
            txn.rollback().await?;
            Ok(handled)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                warn!("Rollback failed after {e}: {rollback}");
            }
            Err(e)
        }
    }
}

fn log_disposition(ts: u64, kind: &str, disposition: &Disposition) {
    match disposition {
        Disposition::Applied | Disposition::Placeholder(_) => info!("[{ts}] Applied {kind} message"),
        Disposition::Unchanged => debug!("[{ts}] {kind} message changed nothing"),
        Disposition::DropSilently(reason) => debug!("[{ts}] Dropped {kind} message: {reason:?}"),
        Disposition::DropWithRequest => debug!("[{ts}] Dropped {kind} message for unknown group, requested info"),
        Disposition::Deferred(key) => debug!("[{ts}] Parked {kind} message until {key} arrives"),
        Disposition::RejectInvalid(reason) => warn!("[{ts}] Rejected invalid {kind} message: {reason:?}"),
    }
}

pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
