#![allow(dead_code)]

use async_trait::async_trait;
use securesms_ingest::calls::{CallEvent, CallSessionSink};
use securesms_ingest::download::AttachmentDownloader;
use securesms_ingest::error::GroupError;
use securesms_ingest::store::{Backend, Transaction};
use securesms_ingest::types::group::{DecryptedGroup, GroupContextV2};
use securesms_ingest::types::receipt::{ReceiptKind, ReceiptMessage};
use securesms_ingest::types::sync::SyncMessage;
use securesms_ingest::types::{
    AttachmentId, Content, DataMessage, DecryptedEnvelope, FailureMetadata, GroupContext, GroupId, MessageId, MessageState,
    ServiceAddress,
};
use securesms_ingest::{
    Disposition, GroupService, InMemoryBackend, IngestConfig, IngestError, MessageProcessor, RecordingJobQueue,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn me() -> ServiceAddress {
    ServiceAddress::new("00000000-0000-4000-8000-00000000000a", "+15550000001")
}

pub fn alice() -> ServiceAddress {
    ServiceAddress::new("00000000-0000-4000-8000-0000000000a1", "+15550000002")
}

pub fn bob() -> ServiceAddress {
    ServiceAddress::from_uuid("00000000-0000-4000-8000-0000000000b0")
}

pub fn master_key(seed: u8) -> Vec<u8> {
    vec![seed; 32]
}

pub fn v2_context(seed: u8, revision: u32) -> GroupContextV2 {
    GroupContextV2 {
        master_key: master_key(seed),
        revision,
        signed_change: None,
    }
}

pub fn v2_group_id(seed: u8) -> GroupId {
    GroupId::v2_from_master_key(&master_key(seed)).unwrap()
}

pub fn envelope(sender: ServiceAddress, timestamp: u64, content: Content) -> DecryptedEnvelope {
    DecryptedEnvelope {
        sender,
        sender_device: 1,
        timestamp,
        server_received_timestamp: timestamp + 10,
        server_delivered_timestamp: timestamp + 20,
        needs_receipt: false,
        unidentified: false,
        content,
    }
}

pub fn data(sender: ServiceAddress, timestamp: u64, message: DataMessage) -> DecryptedEnvelope {
    envelope(sender, timestamp, Content::Data(message))
}

pub fn text(sender: ServiceAddress, timestamp: u64, body: &str) -> DecryptedEnvelope {
    data(sender, timestamp, DataMessage::text(body))
}

pub fn sync(timestamp: u64, message: SyncMessage) -> DecryptedEnvelope {
    envelope(me(), timestamp, Content::Sync(message))
}

pub fn receipt(sender: ServiceAddress, timestamp: u64, kind: ReceiptKind, acked: &[u64]) -> DecryptedEnvelope {
    envelope(
        sender,
        timestamp,
        Content::Receipt(ReceiptMessage {
            kind,
            timestamps: acked.to_vec(),
            when: timestamp,
        }),
    )
}

#[derive(Default)]
pub struct RecordingCallSink {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingCallSink {
    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallSessionSink for RecordingCallSink {
    async fn call_event(&self, event: CallEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Serves group state from a table keyed by master key. Unknown groups
/// fail like an unreachable server; `hang` makes every fetch stall.
#[derive(Default)]
pub struct ScriptedGroupService {
    states: Mutex<HashMap<Vec<u8>, DecryptedGroup>>,
    hang: Mutex<bool>,
    fetches: Mutex<u32>,
}

impl ScriptedGroupService {
    pub fn set_state(&self, master_key: Vec<u8>, state: DecryptedGroup) {
        self.states.lock().unwrap().insert(master_key, state);
    }

    pub fn hang(&self) {
        *self.hang.lock().unwrap() = true;
    }

    pub fn fetches(&self) -> u32 {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl GroupService for ScriptedGroupService {
    async fn fetch_group_state(&self, master_key: &[u8], revision: u32) -> Result<DecryptedGroup, GroupError> {
        *self.fetches.lock().unwrap() += 1;
        let hang = *self.hang.lock().unwrap();
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let state = self.states.lock().unwrap().get(master_key).cloned();
        match state {
            Some(state) if state.revision >= revision => Ok(state),
            Some(_) => Err(GroupError::Service(anyhow::anyhow!("revision {revision} not available"))),
            None => Err(GroupError::Service(anyhow::anyhow!("unknown group"))),
        }
    }
}

/// Inline downloads fail until `succeed` is called.
#[derive(Default)]
pub struct ScriptedDownloader {
    succeed: Mutex<bool>,
    downloaded: Mutex<Vec<(MessageId, AttachmentId)>>,
}

impl ScriptedDownloader {
    pub fn succeed(&self) {
        *self.succeed.lock().unwrap() = true;
    }

    pub fn downloaded(&self) -> Vec<(MessageId, AttachmentId)> {
        self.downloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttachmentDownloader for ScriptedDownloader {
    async fn download(&self, message_id: MessageId, attachment_id: AttachmentId) -> anyhow::Result<()> {
        if !*self.succeed.lock().unwrap() {
            anyhow::bail!("offline");
        }
        self.downloaded.lock().unwrap().push((message_id, attachment_id));
        Ok(())
    }
}

pub struct Harness {
    pub backend: Arc<InMemoryBackend>,
    pub jobs: Arc<RecordingJobQueue>,
    pub calls: Arc<RecordingCallSink>,
    pub groups: Arc<ScriptedGroupService>,
    pub downloads: Arc<ScriptedDownloader>,
    pub processor: MessageProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(IngestConfig::default())
    }

    pub fn with_config(config: IngestConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(InMemoryBackend::with_self(me()));
        let jobs = Arc::new(RecordingJobQueue::new());
        let calls = Arc::new(RecordingCallSink::default());
        let groups = Arc::new(ScriptedGroupService::default());
        let downloads = Arc::new(ScriptedDownloader::default());
        let processor = MessageProcessor::builder()
            .with_backend(backend.clone())
            .with_job_queue(jobs.clone())
            .with_call_sink(calls.clone())
            .with_group_service(groups.clone())
            .with_downloader(downloads.clone())
            .with_config(config)
            .build()
            .unwrap();
        Self {
            backend,
            jobs,
            calls,
            groups,
            downloads,
            processor,
        }
    }

    pub async fn try_deliver(&self, envelope: DecryptedEnvelope) -> Result<Disposition, IngestError> {
        let sent = envelope.timestamp;
        self.processor
            .process(MessageState::DecryptedOk, Some(envelope), None, sent, None)
            .await
    }

    pub async fn deliver(&self, envelope: DecryptedEnvelope) -> Disposition {
        self.try_deliver(envelope).await.unwrap()
    }

    pub async fn deliver_over(&self, envelope: DecryptedEnvelope, placeholder: MessageId) -> Disposition {
        let sent = envelope.timestamp;
        self.processor
            .process(MessageState::DecryptedOk, Some(envelope), None, sent, Some(placeholder))
            .await
            .unwrap()
    }

    pub async fn fail(&self, state: MessageState, sender: ServiceAddress, timestamp: u64) -> Disposition {
        let meta = FailureMetadata {
            sender,
            sender_device: 2,
            group_id: None,
        };
        self.processor
            .process(state, None, Some(meta), timestamp, None)
            .await
            .unwrap()
    }

    pub async fn begin(&self) -> Box<dyn Transaction> {
        self.backend.begin().await.unwrap()
    }

    /// Store a V2 group at `revision`, learned from a message `alice` sends
    /// into it. `members` must include both `me()` and `alice()`.
    pub async fn seed_v2_group(&self, master_key: Vec<u8>, revision: u32, members: Vec<ServiceAddress>) -> GroupId {
        let state = DecryptedGroup {
            title: "seeded".to_string(),
            revision,
            members,
            pending_members: Vec::new(),
            disappearing_timer_seconds: 0,
        };
        self.groups.set_state(master_key.clone(), state);
        let message = DataMessage {
            group: Some(GroupContext::V2(GroupContextV2 {
                master_key: master_key.clone(),
                revision,
                signed_change: None,
            })),
            ..Default::default()
        };
        let disposition = self.deliver(data(alice(), 1_000 + u64::from(revision), message)).await;
        assert_eq!(disposition, Disposition::Applied, "seeding group");
        self.jobs.take();
        GroupId::v2_from_master_key(&master_key).unwrap()
    }
}
