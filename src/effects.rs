use crate::types::events::{ConversationUpdated, Event, SecurityEvent, TypingUpdate};
use ingestcore::calls::CallEvent;
use ingestcore::jobs::Job;
use ingestcore::store::MessageKey;
use ingestcore::types::{AttachmentId, DecryptedEnvelope, MessageId, RecipientId, ThreadId};

/// Everything a handler wants to happen outside the transaction. Collected
/// while applying and released only after the transaction commits.
#[derive(Debug, Default)]
pub(crate) struct SideEffects {
    pub jobs: Vec<Job>,
    pub deferred: Vec<(MessageKey, DecryptedEnvelope)>,
    pub events: Vec<Event>,
    pub calls: Vec<CallEvent>,
    pub sticker_downloads: Vec<(MessageId, AttachmentId)>,
}

impl SideEffects {
    pub fn job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn defer(&mut self, key: MessageKey, envelope: &DecryptedEnvelope) {
        self.deferred.push((key, envelope.clone()));
    }

    pub fn conversation_updated(&mut self, thread: ThreadId) {
        let event = Event::ConversationUpdated(ConversationUpdated { thread });
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }

    pub fn typing(&mut self, update: TypingUpdate) {
        self.events.push(Event::Typing(update));
    }

    pub fn security_event(&mut self, recipient: RecipientId) {
        self.events.push(Event::Security(SecurityEvent { recipient }));
    }

    pub fn call(&mut self, event: CallEvent) {
        self.calls.push(event);
    }

    pub fn download_sticker(&mut self, message_id: MessageId, attachment_id: AttachmentId) {
        self.sticker_downloads.push((message_id, attachment_id));
    }
}
