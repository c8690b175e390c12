use super::{Inbound, existing_placeholder};
use crate::disposition::{Disposition, DropReason};
use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use ingestcore::calls::{CallEvent, CallPeer};
use ingestcore::classify::{CallKind, classify_call};
use ingestcore::store::{StoreError, Transaction};
use ingestcore::types::call::{CallMessage, OfferKind};
use log::{debug, info};

/// Seconds between server receipt and delivery, zero when either is unknown.
fn message_age_secs(received: u64, delivered: u64) -> u64 {
    if received > 0 && delivered >= received {
        (delivered - received) / 1000
    } else {
        0
    }
}

impl MessageProcessor {
    pub(crate) async fn handle_call_message(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        call: &CallMessage,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        if let Some(device) = call.destination_device_id
            && device != self.config.local_device_id
        {
            info!("[{ts}] Ignoring call message for device {device}");
            return Ok(Disposition::DropSilently(DropReason::WrongDevice));
        }

        let kind = classify_call(call);
        debug!("[{ts}] Call message classified as {kind:?}");

        // A stale offer or hangup whose placeholder is already in the timeline
        // can only be a missed call now.
        if matches!(kind, CallKind::Offer | CallKind::Hangup)
            && let Some(id) = existing_placeholder(&*txn, inbound.placeholder).await?
        {
            let video = call.offer.as_ref().is_some_and(|o| o.kind == OfferKind::Video);
            let thread = txn.mark_missed_call(id, video).await?;
            fx.conversation_updated(thread);
            return Ok(Disposition::Applied);
        }

        let peer = |call_id| CallPeer {
            recipient: inbound.sender,
            address: inbound.env.sender.clone(),
            device: inbound.env.sender_device,
            call_id,
        };
        let remote_identity_key = if matches!(kind, CallKind::Offer | CallKind::Answer) {
            txn.identity(inbound.sender).await?.map(|record| record.identity_key)
        } else {
            None
        };

        let event = match kind {
            CallKind::Offer => {
                let Some(offer) = &call.offer else {
                    return Ok(Disposition::Unchanged);
                };
                CallEvent::Offer {
                    peer: peer(offer.id),
                    kind: offer.kind,
                    sdp: offer.sdp.clone(),
                    opaque: offer.opaque.clone(),
                    remote_identity_key,
                    server_received_timestamp: inbound.env.server_received_timestamp,
                    server_delivered_timestamp: inbound.env.server_delivered_timestamp,
                    multi_ring: call.multi_ring,
                }
            }
            CallKind::Answer => {
                let Some(answer) = &call.answer else {
                    return Ok(Disposition::Unchanged);
                };
                CallEvent::Answer {
                    peer: peer(answer.id),
                    sdp: answer.sdp.clone(),
                    opaque: answer.opaque.clone(),
                    remote_identity_key,
                    multi_ring: call.multi_ring,
                }
            }
            CallKind::IceUpdate => {
                let call_id = call.ice_updates.first().map(|u| u.id).unwrap_or_default();
                CallEvent::IceCandidates {
                    peer: peer(call_id),
                    candidates: call.ice_updates.iter().filter_map(|u| u.opaque.clone()).collect(),
                }
            }
            CallKind::Hangup => {
                let Some(hangup) = &call.hangup else {
                    return Ok(Disposition::Unchanged);
                };
                CallEvent::Hangup {
                    peer: peer(hangup.id),
                    kind: hangup.kind,
                    device_id: hangup.device_id,
                    legacy: hangup.legacy,
                }
            }
            CallKind::Busy => {
                let Some(busy) = &call.busy else {
                    return Ok(Disposition::Unchanged);
                };
                CallEvent::Busy { peer: peer(busy.id) }
            }
            CallKind::Opaque => {
                let Some(opaque) = &call.opaque else {
                    return Ok(Disposition::Unchanged);
                };
                CallEvent::Opaque {
                    sender: inbound.sender,
                    sender_uuid: inbound.env.sender.uuid.clone(),
                    device: inbound.env.sender_device,
                    data: opaque.data.clone(),
                    message_age_secs: message_age_secs(
                        inbound.env.server_received_timestamp,
                        inbound.env.server_delivered_timestamp,
                    ),
                }
            }
            CallKind::Unknown => return Ok(Disposition::DropSilently(DropReason::NothingToDo)),
        };

        fx.call(event);
        Ok(Disposition::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_age_ignores_unknown_or_inverted_times() {
        assert_eq!(message_age_secs(0, 5_000), 0);
        assert_eq!(message_age_secs(9_000, 5_000), 0);
        assert_eq!(message_age_secs(1_000, 4_500), 3);
    }
}
