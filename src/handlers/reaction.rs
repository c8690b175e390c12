use super::Inbound;
use crate::disposition::{Disposition, DropReason, RejectReason};
use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use ingestcore::emoji;
use ingestcore::remote_delete;
use ingestcore::store::{MessageKey, ReactionRecord, StoreError, Transaction};
use ingestcore::types::DataMessage;
use log::{debug, warn};

impl MessageProcessor {
    pub(crate) async fn handle_reaction(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let Some(reaction) = &msg.reaction else {
            return Ok(Disposition::Unchanged);
        };
        let ts = inbound.ts();
        if !emoji::is_emoji(&reaction.emoji) {
            warn!("[{ts}] Reaction text is not a valid emoji, ignoring");
            return Ok(Disposition::RejectInvalid(RejectReason::InvalidReactionEmoji));
        }
        if reaction.target_author.is_empty() {
            return Ok(Disposition::RejectInvalid(RejectReason::InvalidReactionTarget));
        }

        let target_author = txn.get_or_create_recipient(&reaction.target_author).await?;
        let key = MessageKey::new(target_author, reaction.target_sent_timestamp);
        let Some(target) = txn.message_for(key).await? else {
            debug!("[{ts}] Reaction target {key} not found yet");
            fx.defer(key, inbound.env);
            return Ok(Disposition::Deferred(key));
        };
        if target.remote_deleted {
            debug!("[{ts}] Reaction target {key} was remotely deleted");
            return Ok(Disposition::DropSilently(DropReason::TargetRemoteDeleted));
        }

        let changed = if reaction.remove {
            txn.remove_reaction(target.id, inbound.sender).await?
        } else {
            txn.add_reaction(
                target.id,
                ReactionRecord {
                    author: inbound.sender,
                    emoji: reaction.emoji.clone(),
                    sent_timestamp: ts,
                    received_timestamp: inbound.received,
                },
            )
            .await?
        };

        if changed {
            fx.conversation_updated(target.thread);
            Ok(Disposition::Applied)
        } else {
            Ok(Disposition::Unchanged)
        }
    }

    pub(crate) async fn handle_remote_delete(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let Some(delete) = &msg.remote_delete else {
            return Ok(Disposition::Unchanged);
        };
        let ts = inbound.ts();
        let key = MessageKey::new(inbound.sender, delete.target_sent_timestamp);

        let Some(target) = txn.message_for(key).await? else {
            debug!("[{ts}] Remote delete target {key} not found yet");
            fx.defer(key, inbound.env);
            return Ok(Disposition::Deferred(key));
        };
        if target.remote_deleted {
            warn!("[{ts}] Remote delete target {key} is already deleted");
            return Ok(Disposition::Unchanged);
        }
        if !remote_delete::is_valid_receive(
            &target,
            inbound.sender,
            inbound.self_id,
            inbound.env.server_received_timestamp,
            self.config.remote_delete_window_ms,
        ) {
            warn!("[{ts}] Invalid remote delete for {key}");
            return Ok(Disposition::RejectInvalid(RejectReason::InvalidRemoteDelete));
        }

        txn.mark_remote_deleted(target.id).await?;
        fx.conversation_updated(target.thread);
        Ok(Disposition::Applied)
    }
}
