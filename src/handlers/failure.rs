//! Messages the decrypt layer could not open still leave a trace in the
//! timeline, so the user knows something was missed.

use crate::disposition::{Disposition, DropReason};
use crate::effects::SideEffects;
use crate::error::IngestError;
use crate::processor::{Handled, MessageProcessor, finish, now_millis};
use ingestcore::jobs::Job;
use ingestcore::store::{FailureMarker, IncomingMessage, MessageBody, MessageKind, StoreError, Transaction};
use ingestcore::types::{FailureMetadata, MessageId, MessageState};
use log::{debug, warn};

/// The placeholder kind shown for each decrypt failure.
pub(crate) fn failure_marker(state: MessageState) -> Option<FailureMarker> {
    match state {
        MessageState::InvalidVersion => Some(FailureMarker::InvalidVersionKeyExchange),
        MessageState::LegacyMessage => Some(FailureMarker::LegacyVersion),
        MessageState::UnsupportedDataMessage => Some(FailureMarker::UnsupportedProtocolVersion),
        MessageState::CorruptMessage | MessageState::NoSession => Some(FailureMarker::DecryptFailed),
        MessageState::DecryptedOk | MessageState::Duplicate | MessageState::Noop => None,
    }
}

impl MessageProcessor {
    pub(crate) async fn process_failure(
        &self,
        state: MessageState,
        meta: &FailureMetadata,
        timestamp: u64,
        placeholder: Option<MessageId>,
    ) -> Result<Disposition, IngestError> {
        let Some(marker) = failure_marker(state) else {
            return Ok(Disposition::DropSilently(DropReason::NothingToDo));
        };
        let mut txn = self
            .backend
            .begin()
            .await
            .map_err(|e| IngestError::for_failure(meta, e))?;
        let mut fx = SideEffects::default();

        let result = self
            .apply_failure(&mut *txn, &mut fx, state, marker, meta, timestamp, placeholder)
            .await
            .map(Handled::new);
        let handled = finish(txn, result).await.map_err(|e| {
            warn!(
                "[{timestamp}] Storage failure recording {state:?} from {}.{}: {e}",
                meta.sender, meta.sender_device
            );
            IngestError::for_failure(meta, e)
        })?;

        if handled.keeps_writes() {
            self.flush(fx).await;
        }
        Ok(handled.disposition)
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_failure(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        state: MessageState,
        marker: FailureMarker,
        meta: &FailureMetadata,
        timestamp: u64,
        placeholder: Option<MessageId>,
    ) -> Result<Disposition, StoreError> {
        if meta.sender.is_empty() {
            warn!("[{timestamp}] {state:?} without a sender");
            return Ok(Disposition::DropSilently(DropReason::NoContent));
        }
        if txn
            .find_recipient(&meta.sender)
            .await?
            .is_some_and(|recipient| recipient.blocked)
        {
            debug!("[{timestamp}] Ignoring {state:?} from blocked {}", meta.sender);
            return Ok(Disposition::DropSilently(DropReason::BlockedSender));
        }

        let sender = txn.get_or_create_recipient(&meta.sender).await?;
        let conversation = match &meta.group_id {
            Some(group_id) => self.groups.group_recipient(txn, group_id).await?,
            None => sender,
        };
        warn!(
            "[{timestamp}] {state:?} from {}.{}, inserting placeholder",
            meta.sender, meta.sender_device
        );

        let message = IncomingMessage {
            author: sender,
            author_device: meta.sender_device,
            conversation,
            server_timestamp: 0,
            received_timestamp: now_millis(),
            unidentified: false,
            failure: Some(marker),
            content: MessageBody::new(MessageKind::Placeholder, timestamp),
        };
        self.write_placeholder(txn, fx, message, marker, placeholder)
            .await?;

        if matches!(state, MessageState::CorruptMessage | MessageState::NoSession) {
            fx.job(Job::AutomaticSessionReset {
                recipient: sender,
                device: meta.sender_device,
                sent_timestamp: timestamp,
            });
        }
        Ok(Disposition::Placeholder(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_failure_state_has_a_marker() {
        for state in [
            MessageState::InvalidVersion,
            MessageState::CorruptMessage,
            MessageState::NoSession,
            MessageState::LegacyMessage,
            MessageState::UnsupportedDataMessage,
        ] {
            assert!(state.is_failure());
            assert!(failure_marker(state).is_some(), "{state:?}");
        }
        assert_eq!(failure_marker(MessageState::Duplicate), None);
        assert_eq!(
            failure_marker(MessageState::NoSession),
            failure_marker(MessageState::CorruptMessage)
        );
    }
}
