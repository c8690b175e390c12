use super::{Inbound, existing_placeholder};
use crate::disposition::{Disposition, DropReason, RejectReason};
use crate::effects::SideEffects;
use crate::error::GroupError;
use crate::groups::v1::V1Origin;
use crate::processor::MessageProcessor;
use ingestcore::classify::{DataKind, classify_data};
use ingestcore::jobs::Job;
use ingestcore::store::{FailureMarker, MessageBody, MessageKey, MessageKind, StoreError, Transaction};
use ingestcore::types::group::GroupV1Kind;
use ingestcore::types::{DataMessage, GroupContext, GroupId, RecipientId};
use log::{debug, info, warn};

const PROFILE_KEY_LEN: usize = 32;

impl MessageProcessor {
    pub(crate) async fn handle_data_message(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        let group_id = match msg.group_id() {
            Some(Ok(id)) => Some(id),
            Some(Err(e)) => {
                debug!("[{ts}] Unusable group context: {e}");
                return Ok(Disposition::DropSilently(DropReason::BadGroupContext));
            }
            None => None,
        };

        let mut group_changed = false;
        if let Some(GroupContext::V2(ctx)) = &msg.group {
            match self.groups.update_group(txn, fx, ctx, inbound.sender, ts).await {
                Ok(changed) => group_changed = changed,
                Err(GroupError::Store(e)) => return Err(e),
                Err(GroupError::NotAMember) => {
                    return Ok(Disposition::DropSilently(DropReason::NotAGroupMember));
                }
                Err(e) => {
                    warn!("[{ts}] Group state unavailable, dropping message: {e}");
                    return Ok(Disposition::DropSilently(DropReason::GroupStateUnavailable));
                }
            }
            if !msg.is_group_v2_update()
                && let Some(id) = &group_id
                && !self.groups.is_current_member(&*txn, id, inbound.sender).await?
            {
                return Ok(Disposition::DropSilently(DropReason::SenderNotInGroup));
            }
        }

        let was_unknown = match &group_id {
            Some(id) => self.groups.is_unknown_group(&*txn, id, inbound.self_id).await?,
            None => false,
        };
        let kind = classify_data(msg);
        debug!("[{ts}] Data message classified as {kind:?}");

        let mut disposition = if was_unknown && kind != DataKind::GroupV1Update {
            Disposition::DropSilently(DropReason::UnknownGroup)
        } else {
            match kind {
                DataKind::Invalid => self.handle_invalid_message(txn, fx, inbound, msg).await?,
                DataKind::EndSession => self.handle_end_session(txn, fx, inbound).await?,
                DataKind::GroupV1Update => self.handle_group_v1_update(txn, fx, inbound, msg).await?,
                DataKind::ExpirationUpdate => {
                    self.handle_expiration_update(txn, fx, inbound, msg, ts).await?
                }
                DataKind::Reaction => self.handle_reaction(txn, fx, inbound, msg).await?,
                DataKind::RemoteDelete => self.handle_remote_delete(txn, fx, inbound, msg).await?,
                DataKind::Payment => self.handle_payment(txn, fx, inbound, msg).await?,
                DataKind::Media => self.handle_media_message(txn, fx, inbound, msg).await?,
                DataKind::Text => self.handle_text_message(txn, fx, inbound, msg).await?,
                DataKind::GroupCallUpdate => self.handle_group_call_update(txn, fx, inbound, msg).await?,
                DataKind::Empty if group_changed => Disposition::Applied,
                DataKind::Empty if group_id.is_some() => Disposition::Unchanged,
                DataKind::Empty => Disposition::DropSilently(DropReason::NoContent),
            }
        };

        if let Some(id) = &group_id
            && self.groups.is_unknown_group(&*txn, id, inbound.self_id).await?
        {
            match &msg.group {
                Some(GroupContext::V1(ctx)) if ctx.kind != GroupV1Kind::RequestInfo => {
                    info!("[{ts}] Requesting info for unknown group {id} from {}", inbound.env.sender);
                    fx.job(Job::RequestGroupInfo {
                        source: inbound.sender,
                        group_id: id.clone(),
                    });
                    if matches!(disposition, Disposition::DropSilently(DropReason::UnknownGroup)) {
                        disposition = Disposition::DropWithRequest;
                    }
                }
                _ => debug!("[{ts}] Ignoring message for unknown group {id}"),
            }
        }

        if let Some(key) = &msg.profile_key
            && !inbound.from_self()
        {
            if key.len() != PROFILE_KEY_LEN {
                warn!("[{ts}] Ignoring profile key of {} bytes", key.len());
            } else if txn.set_profile_key(inbound.sender, key).await? {
                fx.job(Job::RetrieveProfile {
                    recipient: inbound.sender,
                });
            }
        }

        if inbound.env.needs_receipt {
            fx.job(Job::SendDeliveryReceipt {
                recipient: inbound.sender,
                message_sent_timestamp: ts,
            });
        }

        Ok(disposition)
    }

    async fn handle_invalid_message(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        warn!("[{}] Invalid view-once message from {}", inbound.ts(), inbound.env.sender);
        let conversation = self.conversation_for(txn, inbound, msg.group.as_ref()).await?;
        let content = MessageBody::new(MessageKind::Placeholder, inbound.ts());
        self.write_placeholder(
            txn,
            fx,
            inbound.incoming(conversation, content),
            FailureMarker::InvalidMessage,
            inbound.placeholder,
        )
        .await?;
        Ok(Disposition::Placeholder(FailureMarker::InvalidMessage))
    }

    async fn handle_end_session(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
    ) -> Result<Disposition, StoreError> {
        let thread = match existing_placeholder(&*txn, inbound.placeholder).await? {
            Some(id) => Some(txn.mark_end_session(id, inbound.ts()).await?),
            None => {
                let content = MessageBody::new(MessageKind::EndSession, inbound.ts());
                txn.insert_incoming(inbound.incoming(inbound.sender, content))
                    .await?
                    .map(|inserted| inserted.thread_id)
            }
        };

        txn.delete_all_sessions(&inbound.env.sender).await?;
        info!("[{}] Ended session with {}", inbound.ts(), inbound.env.sender);
        fx.security_event(inbound.sender);

        match thread {
            Some(thread) => {
                fx.conversation_updated(thread);
                Ok(Disposition::Applied)
            }
            None => Ok(Disposition::Unchanged),
        }
    }

    async fn handle_group_v1_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let Some(ctx) = msg.group_v1() else {
            return Ok(Disposition::Unchanged);
        };
        let origin = V1Origin {
            author: inbound.sender,
            author_address: &inbound.env.sender,
            author_device: inbound.env.sender_device,
            sent_timestamp: inbound.ts(),
            server_timestamp: inbound.env.server_received_timestamp,
            outgoing: false,
        };
        let disposition = self.groups.process_v1_update(txn, fx, ctx, origin).await?;
        if disposition == Disposition::Applied {
            self.delete_placeholder(txn, inbound).await?;
        }

        if let Ok(id) = GroupId::v1(&ctx.id)
            && let Some(conversation) = self.groups.find_group_recipient(&*txn, &id).await?
            && txn.recipient(conversation).await?.expire_messages_seconds != msg.expires_in_seconds
        {
            let side = Inbound {
                placeholder: None,
                ..inbound
            };
            self.handle_expiration_update(txn, fx, side, msg, inbound.ts()).await?;
        }
        Ok(disposition)
    }

    /// Store a timer change for the conversation, unless it already has that timer.
    pub(crate) async fn handle_expiration_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
        sent_timestamp: u64,
    ) -> Result<Disposition, StoreError> {
        if msg.is_group_v2_message() {
            info!("[{}] Ignoring expiration update for a V2 group", inbound.ts());
            return Ok(Disposition::DropSilently(DropReason::GroupV2Timer));
        }
        let conversation = self.conversation_for(txn, inbound, msg.group.as_ref()).await?;
        if txn.recipient(conversation).await?.expire_messages_seconds == msg.expires_in_seconds {
            return Ok(Disposition::Unchanged);
        }

        let content = MessageBody::new(MessageKind::ExpirationUpdate, sent_timestamp)
            .expiring_in(u64::from(msg.expires_in_seconds) * 1000);
        let inserted = txn.insert_incoming(inbound.incoming(conversation, content)).await?;
        txn.set_expire_messages(conversation, msg.expires_in_seconds)
            .await?;
        if let Some(inserted) = inserted {
            self.delete_placeholder(txn, inbound).await?;
            fx.conversation_updated(inserted.thread_id);
        }
        Ok(Disposition::Applied)
    }

    /// Content messages carry the sender's timer; a mismatch is applied as a
    /// timer change just before the message itself.
    pub(crate) async fn sync_expiration(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
        conversation: RecipientId,
    ) -> Result<(), StoreError> {
        if msg.is_group_v2_message() {
            return Ok(());
        }
        if txn.recipient(conversation).await?.expire_messages_seconds != msg.expires_in_seconds {
            let side = Inbound {
                placeholder: None,
                ..inbound
            };
            self.handle_expiration_update(txn, fx, side, msg, inbound.ts().saturating_sub(1))
                .await?;
        }
        Ok(())
    }

    async fn handle_text_message(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let conversation = self.conversation_for(txn, inbound, msg.group.as_ref()).await?;
        self.sync_expiration(txn, fx, inbound, msg, conversation).await?;
        let body = msg.body.clone().unwrap_or_default();

        if msg.group.is_none()
            && let Some(id) = existing_placeholder(&*txn, inbound.placeholder).await?
        {
            if txn.message_for(MessageKey::new(inbound.sender, inbound.ts())).await?.is_some() {
                return Ok(Disposition::Unchanged);
            }
            let thread = txn.update_body(id, inbound.ts(), &body).await?;
            fx.conversation_updated(thread);
            return Ok(Disposition::Applied);
        }

        let thread = txn.thread_for_recipient(conversation).await?;
        self.notify_typing_stopped(&*txn, fx, inbound, thread).await?;

        let content = MessageBody::new(MessageKind::Text, inbound.ts())
            .with_body(Some(body))
            .expiring_in(u64::from(msg.expires_in_seconds) * 1000);
        match txn.insert_incoming(inbound.incoming(conversation, content)).await? {
            Some(inserted) => {
                self.delete_placeholder(txn, inbound).await?;
                fx.conversation_updated(inserted.thread_id);
                Ok(Disposition::Applied)
            }
            None => Ok(Disposition::Unchanged),
        }
    }

    pub(crate) async fn handle_group_call_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let (Some(GroupContext::V2(ctx)), Some(update)) = (&msg.group, &msg.group_call_update) else {
            return Ok(Disposition::RejectInvalid(RejectReason::InvalidGroupCallUpdate));
        };
        let Ok(id) = GroupId::v2_from_master_key(&ctx.master_key) else {
            return Ok(Disposition::RejectInvalid(RejectReason::InvalidGroupCallUpdate));
        };

        let group_recipient = self.groups.group_recipient(txn, &id).await?;
        let (_, thread) = txn
            .upsert_group_call(
                group_recipient,
                inbound.sender,
                inbound.ts(),
                inbound.env.server_received_timestamp,
                update.era_id.clone(),
            )
            .await?;
        self.delete_placeholder(txn, inbound).await?;
        fx.job(Job::GroupCallPeek { group_recipient });
        fx.conversation_updated(thread);
        Ok(Disposition::Applied)
    }

    /// The real row replaced the speculative placeholder.
    pub(crate) async fn delete_placeholder(
        &self,
        txn: &mut dyn Transaction,
        inbound: Inbound<'_>,
    ) -> Result<(), StoreError> {
        if let Some(id) = existing_placeholder(&*txn, inbound.placeholder).await? {
            txn.delete_message(id).await?;
        }
        Ok(())
    }
}
