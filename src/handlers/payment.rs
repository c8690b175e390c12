use super::Inbound;
use crate::disposition::{Disposition, RejectReason};
use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use ingestcore::jobs::Job;
use ingestcore::store::{PaymentDirection, PaymentRecord, PaymentState, StoreError, Transaction};
use ingestcore::types::sync::OutgoingPayment;
use ingestcore::types::{DataMessage, RecipientId, ServiceAddress};
use log::{info, warn};

/// Payments are identified by who sent them and when, so a redelivered
/// notification maps to the same record.
fn payment_id(peer: RecipientId, timestamp: u64) -> String {
    format!("{:016x}{timestamp:016x}", peer.0)
}

impl MessageProcessor {
    pub(crate) async fn handle_payment(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        let Some(notification) = msg.payment.as_ref().and_then(|p| p.notification.as_ref()) else {
            warn!("[{ts}] Payment without a notification");
            return Ok(Disposition::RejectInvalid(RejectReason::MissingPaymentNotification));
        };

        let id = payment_id(inbound.sender, ts);
        let inserted = txn
            .insert_payment(PaymentRecord {
                id: id.clone(),
                direction: PaymentDirection::Received,
                state: PaymentState::Submitted,
                peer: inbound.sender,
                address: None,
                timestamp: ts,
                note: notification.note.clone(),
                amount_picomob: 0,
                fee_picomob: 0,
                receipt: notification.receipt.clone(),
                block_index: 0,
                block_timestamp: 0,
                public_keys: Vec::new(),
                key_images: Vec::new(),
            })
            .await?;
        if !inserted {
            warn!("[{ts}] Ignoring duplicate payment {id}");
            return Ok(Disposition::Unchanged);
        }

        fx.job(Job::PaymentTransactionCheck {
            payment_id: id,
            queue: format!("Payment_{}", inbound.sender),
        });
        fx.job(Job::PaymentLedgerUpdate);
        Ok(Disposition::Applied)
    }

    /// A payment this account made from another device. Without a recipient it
    /// was a defragmentation payment to self.
    pub(crate) async fn handle_outgoing_payment(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        payment: &OutgoingPayment,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        let peer = match payment.recipient.as_deref().filter(|uuid| !uuid.is_empty()) {
            Some(uuid) => txn.get_or_create_recipient(&ServiceAddress::from_uuid(uuid)).await?,
            None => {
                if payment.address.is_none() {
                    info!("[{ts}] Outgoing payment without recipient, treating as defragmentation");
                }
                inbound.self_id
            }
        };

        let id = payment_id(peer, ts);
        let inserted = txn
            .insert_payment(PaymentRecord {
                id: id.clone(),
                direction: PaymentDirection::Sent,
                state: PaymentState::Successful,
                peer,
                address: payment.address.clone(),
                timestamp: ts,
                note: payment.note.clone(),
                amount_picomob: payment.amount_picomob,
                fee_picomob: payment.fee_picomob,
                receipt: payment.receipt.clone(),
                block_index: payment.block_index,
                block_timestamp: payment.block_timestamp,
                public_keys: payment.public_keys.clone(),
                key_images: payment.key_images.clone(),
            })
            .await?;
        if !inserted {
            warn!("[{ts}] Ignoring duplicate outgoing payment {id}");
            return Ok(Disposition::Unchanged);
        }
        fx.job(Job::PaymentLedgerUpdate);
        Ok(Disposition::Applied)
    }
}
