//! Per-content apply handlers. Each runs inside the caller's transaction and
//! reports what happened as a [`Disposition`](crate::disposition::Disposition);
//! only storage errors are returned as errors.

mod call;
mod data;
mod failure;
mod media;
mod payment;
mod reaction;
mod receipt;
mod sync;
mod transcript;
mod typing;

use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use crate::types::events::TypingUpdate;
use ingestcore::store::{
    FailureMarker, IncomingMessage, MessageBody, MessageKind, StoreError, Transaction,
};
use ingestcore::types::{DecryptedEnvelope, GroupContext, MessageId, RecipientId, ThreadId};

/// The message being applied, with its sender already resolved.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Inbound<'a> {
    pub env: &'a DecryptedEnvelope,
    pub sender: RecipientId,
    pub self_id: RecipientId,
    /// Local receive time.
    pub received: u64,
    pub placeholder: Option<MessageId>,
}

impl Inbound<'_> {
    pub fn ts(&self) -> u64 {
        self.env.timestamp
    }

    pub fn from_self(&self) -> bool {
        self.sender == self.self_id
    }

    pub fn incoming(&self, conversation: RecipientId, content: MessageBody) -> IncomingMessage {
        IncomingMessage {
            author: self.sender,
            author_device: self.env.sender_device,
            conversation,
            server_timestamp: self.env.server_received_timestamp,
            received_timestamp: self.received,
            unidentified: self.env.unidentified,
            failure: None,
            content,
        }
    }
}

impl MessageProcessor {
    /// The conversation a message belongs to: its group, or the sender.
    pub(crate) async fn conversation_for(
        &self,
        txn: &mut dyn Transaction,
        inbound: Inbound<'_>,
        group: Option<&GroupContext>,
    ) -> Result<RecipientId, StoreError> {
        match group.map(GroupContext::group_id) {
            Some(Ok(id)) => self.groups.group_recipient(txn, &id).await,
            _ => Ok(inbound.sender),
        }
    }

    /// Mark the prior placeholder with `marker`, or insert a new one.
    pub(crate) async fn write_placeholder(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        message: IncomingMessage,
        marker: FailureMarker,
        placeholder: Option<MessageId>,
    ) -> Result<(), StoreError> {
        let thread = match existing_placeholder(&*txn, placeholder).await? {
            Some(id) => Some(txn.mark_failure(id, marker).await?),
            None => {
                let mut message = message;
                message.failure = Some(marker);
                message.content.kind = MessageKind::Placeholder;
                txn.insert_incoming(message)
                    .await?
                    .map(|inserted| inserted.thread_id)
            }
        };
        if let Some(thread) = thread {
            fx.conversation_updated(thread);
        }
        Ok(())
    }

    /// A message from someone implies they stopped typing in that conversation.
    pub(crate) async fn notify_typing_stopped(
        &self,
        txn: &dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        thread: Option<ThreadId>,
    ) -> Result<(), StoreError> {
        if !txn.settings().await?.typing_indicators {
            return Ok(());
        }
        if let Some(thread) = thread {
            fx.typing(TypingUpdate {
                thread,
                author: inbound.sender,
                device: inbound.env.sender_device,
                started: false,
            });
        }
        Ok(())
    }
}

/// The caller's speculative placeholder, if it is still stored.
pub(crate) async fn existing_placeholder(
    txn: &dyn Transaction,
    placeholder: Option<MessageId>,
) -> Result<Option<MessageId>, StoreError> {
    match placeholder {
        Some(id) => Ok(txn.message(id).await?.map(|row| row.id)),
        None => Ok(None),
    }
}
