use super::Inbound;
use crate::disposition::{Disposition, DropReason};
use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use crate::types::events::TypingUpdate;
use ingestcore::store::{StoreError, Transaction};
use ingestcore::types::GroupId;
use ingestcore::types::receipt::{TypingAction, TypingMessage};
use log::debug;

impl MessageProcessor {
    /// Typing indicators only ever produce an event; nothing is stored and no
    /// conversation is created for them.
    pub(crate) async fn handle_typing(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        typing: &TypingMessage,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        if !txn.settings().await?.typing_indicators {
            return Ok(Disposition::DropSilently(DropReason::TypingDisabled));
        }

        let conversation = match &typing.group_id {
            Some(raw) => {
                let Ok(id) = GroupId::from_raw(raw) else {
                    return Ok(Disposition::DropSilently(DropReason::BadGroupContext));
                };
                if !self.groups.is_current_member(&*txn, &id, inbound.sender).await? {
                    debug!("[{ts}] Typing from {} who is not in group {id}", inbound.env.sender);
                    return Ok(Disposition::DropSilently(DropReason::SenderNotInGroup));
                }
                match self.groups.find_group_recipient(&*txn, &id).await? {
                    Some(recipient) => recipient,
                    None => return Ok(Disposition::DropSilently(DropReason::NoThread)),
                }
            }
            None => inbound.sender,
        };

        let Some(thread) = txn.thread_for_recipient(conversation).await? else {
            debug!("[{ts}] Typing indicator for a conversation without a thread");
            return Ok(Disposition::DropSilently(DropReason::NoThread));
        };

        fx.typing(TypingUpdate {
            thread,
            author: inbound.sender,
            device: inbound.env.sender_device,
            started: typing.action == TypingAction::Started,
        });
        Ok(Disposition::Applied)
    }
}
