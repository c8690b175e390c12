//! Sent transcripts: copies of messages this account sent from another
//! device. They are stored as outgoing rows and reconciled with whatever
//! delivery state the other device reported.

use super::Inbound;
use super::media::{pending_downloads, schedule_downloads};
use crate::disposition::{Disposition, DropReason, RejectReason};
use crate::effects::SideEffects;
use crate::error::GroupError;
use crate::groups::resolve_all;
use crate::groups::v1::V1Origin;
use crate::processor::MessageProcessor;
use ingestcore::classify::{TranscriptKind, classify_transcript};
use ingestcore::jobs::Job;
use ingestcore::mime;
use ingestcore::store::{
    GroupReceiptStatus, InsertResult, MessageBody, MessageKey, MessageKind, NewAttachment, OutgoingMessage, StoreError,
    Transaction, TransferState,
};
use ingestcore::types::envelope::Content;
use ingestcore::types::group::GroupV1Kind;
use ingestcore::types::receipt::ReceiptKind;
use ingestcore::types::sync::SentTranscript;
use ingestcore::types::{DecryptedEnvelope, GroupContext, GroupId, MessageId, RecipientId, ThreadId};
use log::{debug, info, warn};

/// Result of applying one transcript, plus the thread to mark read afterwards.
struct Applied {
    disposition: Disposition,
    thread: Option<ThreadId>,
}

impl From<Disposition> for Applied {
    fn from(disposition: Disposition) -> Self {
        Self {
            disposition,
            thread: None,
        }
    }
}

impl MessageProcessor {
    pub(crate) async fn handle_sent_transcript(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sent: &SentTranscript,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        debug!("[{ts}] Processing sent transcript for message {}", sent.timestamp);
        let msg = &sent.message;

        let group_id = match msg.group_id() {
            Some(Ok(id)) => Some(id),
            Some(Err(e)) => {
                debug!("[{ts}] Transcript with unusable group context: {e}");
                return Ok(Disposition::DropSilently(DropReason::BadGroupContext));
            }
            None => None,
        };

        if let Some(GroupContext::V2(ctx)) = &msg.group {
            match self.groups.perform_local_migration_if_needed(txn, ctx).await {
                Ok(()) => {}
                Err(GroupError::Store(e)) => return Err(e),
                Err(e) => warn!("[{ts}] Local group migration failed: {e}"),
            }
        }

        let kind = classify_transcript(sent);
        debug!("[{ts}] Transcript classified as {kind:?}");

        // Reactions, deletes and call updates are applied as if this account
        // had just sent them as plain data messages.
        let transcribed = DecryptedEnvelope {
            timestamp: sent.timestamp,
            needs_receipt: false,
            content: Content::Data(msg.clone()),
            ..inbound.env.clone()
        };
        let as_data = Inbound {
            env: &transcribed,
            ..inbound
        };

        let applied: Applied = match kind {
            TranscriptKind::RecipientUpdate => self.handle_recipient_update(txn, sent).await?.into(),
            TranscriptKind::EndSession => self.handle_sent_end_session(txn, fx, inbound, sent).await?,
            TranscriptKind::GroupV1Update => self.handle_sent_v1_update(txn, fx, inbound, sent).await?,
            TranscriptKind::GroupV2Update => self.handle_sent_v2_update(txn, fx, inbound, sent).await?,
            TranscriptKind::GroupCallUpdate => self.handle_group_call_update(txn, fx, as_data, msg).await?.into(),
            TranscriptKind::EmptyGroupV2 => Disposition::Unchanged.into(),
            TranscriptKind::ExpirationUpdate => self.handle_sent_expiration_update(txn, fx, sent).await?,
            TranscriptKind::Reaction => {
                let disposition = self.handle_reaction(txn, fx, as_data, msg).await?;
                let thread = match self.transcript_conversation(txn, sent).await? {
                    Some(conversation) => txn.thread_for_recipient(conversation).await?,
                    None => None,
                };
                Applied { disposition, thread }
            }
            TranscriptKind::RemoteDelete => self.handle_remote_delete(txn, fx, as_data, msg).await?.into(),
            TranscriptKind::Media => self.handle_sent_media(txn, fx, inbound, sent).await?,
            TranscriptKind::Text => self.handle_sent_text(txn, fx, inbound, sent).await?,
            TranscriptKind::Empty => Disposition::DropSilently(DropReason::NoContent).into(),
        };

        if let (Some(id), Some(GroupContext::V1(ctx))) = (&group_id, &msg.group)
            && ctx.kind != GroupV1Kind::RequestInfo
            && self.groups.is_unknown_group(&*txn, id, inbound.self_id).await?
        {
            info!("[{ts}] Transcript for unknown group {id}, requesting info");
            fx.job(Job::RequestGroupInfo {
                source: inbound.self_id,
                group_id: id.clone(),
            });
        }

        if msg.profile_key.is_some()
            && let Some(conversation) = self.transcript_conversation(txn, sent).await?
        {
            let recipient = txn.recipient(conversation).await?;
            if !recipient.system_contact && !recipient.profile_sharing {
                info!("[{ts}] Enabling profile sharing with {conversation} after sending our profile key");
                txn.set_profile_sharing(conversation, true).await?;
            }
        }

        if let Some(thread) = applied.thread {
            txn.set_thread_read(thread).await?;
            fx.conversation_updated(thread);
        }
        Ok(applied.disposition)
    }

    /// The conversation a transcript belongs to: its group, or its destination.
    async fn transcript_conversation(
        &self,
        txn: &mut dyn Transaction,
        sent: &SentTranscript,
    ) -> Result<Option<RecipientId>, StoreError> {
        match sent.message.group_id() {
            Some(Ok(id)) => Ok(Some(self.groups.group_recipient(txn, &id).await?)),
            Some(Err(_)) => Ok(None),
            None => match &sent.destination {
                Some(destination) if !destination.is_empty() => {
                    Ok(Some(txn.get_or_create_recipient(destination).await?))
                }
                _ => Ok(None),
            },
        }
    }

    async fn handle_recipient_update(
        &self,
        txn: &mut dyn Transaction,
        sent: &SentTranscript,
    ) -> Result<Disposition, StoreError> {
        let Some(Ok(group_id)) = sent.message.group_id() else {
            warn!("Recipient update for a message that is not in a group");
            return Ok(Disposition::RejectInvalid(RejectReason::RecipientUpdateForNonGroup));
        };
        let self_id = txn.self_id().await?;
        let Some(record) = txn.message_for(MessageKey::new(self_id, sent.timestamp)).await? else {
            warn!("Recipient update for unknown message {}", sent.timestamp);
            return Ok(Disposition::RejectInvalid(RejectReason::RecipientUpdateWithoutMessage));
        };
        self.reconcile_group_receipts(txn, record.id, &group_id, sent).await?;
        Ok(Disposition::Applied)
    }

    /// Every member, plus everyone the other device sent to, gets a receipt
    /// row. Rows only move forward from `Unknown`.
    async fn reconcile_group_receipts(
        &self,
        txn: &mut dyn Transaction,
        message_id: MessageId,
        group_id: &GroupId,
        sent: &SentTranscript,
    ) -> Result<(), StoreError> {
        let self_id = txn.self_id().await?;
        let mut recipients: Vec<RecipientId> = self
            .groups
            .group_record(&*txn, group_id)
            .await?
            .map(|record| record.members)
            .unwrap_or_default();
        let listed: Vec<_> = sent.recipients().cloned().collect();
        for id in resolve_all(txn, &listed).await? {
            if !recipients.contains(&id) {
                recipients.push(id);
            }
        }
        recipients.retain(|id| *id != self_id);

        let existing = txn.group_receipts(message_id).await?;
        let absent: Vec<RecipientId> = recipients
            .iter()
            .copied()
            .filter(|id| !existing.iter().any(|info| info.recipient == *id))
            .collect();
        txn.insert_group_receipts(message_id, &absent, GroupReceiptStatus::Undelivered, sent.timestamp)
            .await?;
        for info in existing
            .iter()
            .filter(|info| info.status == GroupReceiptStatus::Unknown && recipients.contains(&info.recipient))
        {
            txn.update_group_receipt(message_id, info.recipient, GroupReceiptStatus::Undelivered, sent.timestamp)
                .await?;
        }

        let mut statuses = Vec::with_capacity(recipients.len());
        for id in recipients {
            let unidentified = match txn.recipient(id).await?.address {
                Some(address) => sent.is_unidentified_address(&address),
                None => false,
            };
            statuses.push((id, unidentified));
        }
        txn.set_group_receipts_unidentified(message_id, &statuses)
            .await
    }

    async fn handle_sent_end_session(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sent: &SentTranscript,
    ) -> Result<Applied, StoreError> {
        if sent.message.group.is_some() {
            debug!("[{}] Ignoring end session transcript for a group", inbound.ts());
            return Ok(Disposition::Unchanged.into());
        }
        let Some(destination) = sent.destination.as_ref().filter(|d| !d.is_empty()) else {
            return Ok(Disposition::RejectInvalid(RejectReason::TranscriptWithoutDestination).into());
        };
        let conversation = txn.get_or_create_recipient(destination).await?;
        let content = MessageBody::new(MessageKind::EndSession, sent.timestamp);
        let Some(inserted) = txn
            .insert_outgoing(OutgoingMessage { conversation, content })
            .await?
        else {
            return Ok(Disposition::Unchanged.into());
        };
        txn.mark_sent(inserted.message_id).await?;
        txn.delete_all_sessions(destination).await?;
        fx.security_event(conversation);
        Ok(Applied {
            disposition: Disposition::Applied,
            thread: Some(inserted.thread_id),
        })
    }

    async fn handle_sent_v1_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sent: &SentTranscript,
    ) -> Result<Applied, StoreError> {
        let Some(ctx) = sent.message.group_v1() else {
            return Ok(Disposition::Unchanged.into());
        };
        let origin = V1Origin {
            author: inbound.self_id,
            author_address: &inbound.env.sender,
            author_device: inbound.env.sender_device,
            sent_timestamp: sent.timestamp,
            server_timestamp: inbound.env.server_received_timestamp,
            outgoing: true,
        };
        let disposition = self.groups.process_v1_update(txn, fx, ctx, origin).await?;
        let thread = match GroupId::v1(&ctx.id) {
            Ok(id) => match self.groups.find_group_recipient(&*txn, &id).await? {
                Some(recipient) => txn.thread_for_recipient(recipient).await?,
                None => None,
            },
            Err(_) => None,
        };
        Ok(Applied { disposition, thread })
    }

    async fn handle_sent_v2_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sent: &SentTranscript,
    ) -> Result<Applied, StoreError> {
        let ts = inbound.ts();
        let Some(GroupContext::V2(ctx)) = &sent.message.group else {
            return Ok(Disposition::Unchanged.into());
        };
        let disposition = match self.groups.update_group(txn, fx, ctx, inbound.self_id, sent.timestamp).await {
            Ok(true) => Disposition::Applied,
            Ok(false) => Disposition::Unchanged,
            Err(GroupError::Store(e)) => return Err(e),
            Err(GroupError::NotAMember) => {
                info!("[{ts}] Ignoring group update transcript for a group we are not in");
                return Ok(Disposition::DropSilently(DropReason::NotAGroupMember).into());
            }
            Err(e) => {
                warn!("[{ts}] Group state unavailable for transcript: {e}");
                return Ok(Disposition::DropSilently(DropReason::GroupStateUnavailable).into());
            }
        };
        let thread = match self.transcript_conversation(txn, sent).await? {
            Some(conversation) => txn.thread_for_recipient(conversation).await?,
            None => None,
        };
        Ok(Applied { disposition, thread })
    }

    async fn handle_sent_expiration_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        sent: &SentTranscript,
    ) -> Result<Applied, StoreError> {
        let msg = &sent.message;
        if msg.is_group_v2_message() {
            return Ok(Disposition::DropSilently(DropReason::GroupV2Timer).into());
        }
        let Some(conversation) = self.transcript_conversation(txn, sent).await? else {
            return Ok(Disposition::RejectInvalid(RejectReason::TranscriptWithoutDestination).into());
        };

        let content = MessageBody::new(MessageKind::ExpirationUpdate, sent.timestamp)
            .expiring_in(u64::from(msg.expires_in_seconds) * 1000);
        let inserted = txn
            .insert_outgoing(OutgoingMessage { conversation, content })
            .await?;
        txn.set_expire_messages(conversation, msg.expires_in_seconds)
            .await?;
        let thread = match inserted {
            Some(inserted) => {
                txn.mark_sent(inserted.message_id).await?;
                fx.conversation_updated(inserted.thread_id);
                Some(inserted.thread_id)
            }
            None => None,
        };
        Ok(Applied {
            disposition: Disposition::Applied,
            thread,
        })
    }

    async fn handle_sent_media(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sent: &SentTranscript,
    ) -> Result<Applied, StoreError> {
        let msg = &sent.message;
        let Some(conversation) = self.transcript_conversation(txn, sent).await? else {
            return Ok(Disposition::RejectInvalid(RejectReason::TranscriptWithoutDestination).into());
        };
        let mut content = match self.build_media_body(txn, msg, sent.timestamp).await? {
            Ok(content) => content,
            Err(reason) => return Ok(Disposition::RejectInvalid(reason).into()),
        };
        if msg.view_once {
            // The sender's copy of a view-once message is never viewable.
            content.attachments = vec![NewAttachment {
                pointer: None,
                content_type: mime::VIEW_ONCE.to_string(),
                transfer: TransferState::Done,
                sticker: None,
                local_uri: None,
                quote: false,
            }];
        }

        let pending = pending_downloads(&content);
        let Some(inserted) = self.insert_sent(txn, fx, inbound, sent, conversation, content).await? else {
            return Ok(Disposition::Unchanged.into());
        };
        schedule_downloads(fx, &inserted, &pending);
        let thread = inserted.thread_id;
        fx.job(Job::TrimThread { thread });
        Ok(Applied {
            disposition: Disposition::Applied,
            thread: Some(thread),
        })
    }

    async fn handle_sent_text(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sent: &SentTranscript,
    ) -> Result<Applied, StoreError> {
        let msg = &sent.message;
        let Some(conversation) = self.transcript_conversation(txn, sent).await? else {
            return Ok(Disposition::RejectInvalid(RejectReason::TranscriptWithoutDestination).into());
        };
        let content = MessageBody::new(MessageKind::Text, sent.timestamp)
            .with_body(msg.body.clone())
            .expiring_in(u64::from(msg.expires_in_seconds) * 1000);
        match self.insert_sent(txn, fx, inbound, sent, conversation, content).await? {
            Some(inserted) => Ok(Applied {
                disposition: Disposition::Applied,
                thread: Some(inserted.thread_id),
            }),
            None => Ok(Disposition::Unchanged.into()),
        }
    }

    /// Insert the outgoing row and reconcile its delivery state. `None` when
    /// the transcript was already stored.
    async fn insert_sent(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sent: &SentTranscript,
        conversation: RecipientId,
        content: MessageBody,
    ) -> Result<Option<InsertResult>, StoreError> {
        let msg = &sent.message;
        if !msg.is_group_v2_message()
            && txn.recipient(conversation).await?.expire_messages_seconds != msg.expires_in_seconds
        {
            let timer_change = SentTranscript {
                timestamp: sent.timestamp.saturating_sub(1),
                ..sent.clone()
            };
            self.handle_sent_expiration_update(txn, fx, &timer_change).await?;
        }

        let expires_in_ms = content.expires_in_ms;
        let Some(inserted) = txn
            .insert_outgoing(OutgoingMessage { conversation, content })
            .await?
        else {
            debug!("[{}] Transcript {} already stored", inbound.ts(), sent.timestamp);
            return Ok(None);
        };
        let message_id = inserted.message_id;

        match txn.recipient(conversation).await?.group_id {
            Some(group_id) => self.reconcile_group_receipts(txn, message_id, &group_id, sent).await?,
            None => {
                let unidentified = sent
                    .destination
                    .as_ref()
                    .is_some_and(|destination| sent.is_unidentified_address(destination));
                txn.mark_unidentified(message_id, unidentified).await?;
            }
        }
        txn.mark_sent(message_id).await?;

        if expires_in_ms > 0 {
            let started_at = if sent.expiration_start_timestamp > 0 {
                sent.expiration_start_timestamp
            } else {
                inbound.received
            };
            txn.mark_expire_started(message_id, started_at).await?;
            fx.job(Job::ScheduleExpiration {
                message_id,
                started_at,
                expires_in_ms,
            });
        }

        if conversation == inbound.self_id {
            // Note to self: delivered and read the moment it is sent.
            let key = MessageKey::new(inbound.self_id, sent.timestamp);
            txn.add_receipt(key, ReceiptKind::Delivery, inbound.self_id).await?;
            txn.add_receipt(key, ReceiptKind::Read, inbound.self_id).await?;
        }
        Ok(Some(inserted))
    }
}
