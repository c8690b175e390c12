use super::Inbound;
use crate::disposition::{Disposition, DropReason};
use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use ingestcore::store::{GroupReceiptStatus, MessageKey, ReceiptUpdate, StoreError, Transaction};
use ingestcore::types::RecipientId;
use ingestcore::types::receipt::{ReceiptKind, ReceiptMessage};
use log::{debug, info};

fn group_status(kind: ReceiptKind) -> GroupReceiptStatus {
    match kind {
        ReceiptKind::Delivery => GroupReceiptStatus::Delivered,
        ReceiptKind::Read => GroupReceiptStatus::Read,
        ReceiptKind::Viewed => GroupReceiptStatus::Viewed,
        ReceiptKind::Unknown => GroupReceiptStatus::Unknown,
    }
}

impl MessageProcessor {
    /// Receipts acknowledge messages this account sent, so each timestamp is
    /// looked up under the local user as author.
    pub(crate) async fn handle_receipt(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        receipt: &ReceiptMessage,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        match receipt.kind {
            ReceiptKind::Unknown => {
                debug!("[{ts}] Receipt of unknown kind");
                return Ok(Disposition::DropSilently(DropReason::NothingToDo));
            }
            ReceiptKind::Read | ReceiptKind::Viewed if !txn.settings().await?.read_receipts => {
                info!("[{ts}] Ignoring {:?} receipt, read receipts are disabled", receipt.kind);
                return Ok(Disposition::DropSilently(DropReason::ReceiptsDisabled));
            }
            _ => {}
        }

        let mut changed = false;
        let mut first_missing = None;
        for &sent in &receipt.timestamps {
            let key = MessageKey::new(inbound.self_id, sent);
            match txn.add_receipt(key, receipt.kind, inbound.sender).await? {
                Some(update) if update.changed => {
                    changed = true;
                    self.update_group_receipt(txn, update, inbound.sender, receipt.kind, ts)
                        .await?;
                    fx.conversation_updated(update.thread_id);
                }
                Some(_) => {}
                None => {
                    debug!("[{ts}] {:?} receipt for unknown message {key}", receipt.kind);
                    fx.defer(key, inbound.env);
                    first_missing.get_or_insert(key);
                }
            }
        }

        if changed {
            Ok(Disposition::Applied)
        } else if let Some(key) = first_missing {
            Ok(Disposition::Deferred(key))
        } else {
            Ok(Disposition::Unchanged)
        }
    }

    /// Per-member status only ever moves forward.
    async fn update_group_receipt(
        &self,
        txn: &mut dyn Transaction,
        update: ReceiptUpdate,
        from: RecipientId,
        kind: ReceiptKind,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let conversation = txn.thread(update.thread_id).await?.recipient;
        if !txn.recipient(conversation).await?.is_group() {
            return Ok(());
        }
        let status = group_status(kind);
        let current = txn
            .group_receipts(update.message_id)
            .await?
            .into_iter()
            .find(|info| info.recipient == from)
            .map(|info| info.status);
        if current.is_none_or(|current| current < status) {
            txn.update_group_receipt(update.message_id, from, status, timestamp)
                .await?;
        }
        Ok(())
    }
}
