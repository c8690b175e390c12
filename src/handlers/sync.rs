use super::Inbound;
use crate::disposition::{Disposition, DropReason};
use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use ingestcore::classify::{SyncKind, classify_sync};
use ingestcore::jobs::Job;
use ingestcore::store::{MarkedRead, MessageKey, StoreError, Transaction};
use ingestcore::types::sync::{
    BlockedListMessage, ConfigurationMessage, FetchKind, MessageRequestResponse, MessageRequestResponseKind,
    RequestKind, StickerPackOperation, StickerPackOperationKind, SyncMessage, VerifiedMessage,
};
use ingestcore::types::{GroupId, RecipientId, ThreadId};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

impl MessageProcessor {
    pub(crate) async fn handle_sync_message(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sync: &SyncMessage,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        let mut settings = txn.settings().await?;
        if !settings.multi_device {
            info!("[{ts}] Sync message received, marking account as multi-device");
            settings.multi_device = true;
            txn.put_settings(settings).await?;
        }

        let kind = classify_sync(sync);
        debug!("[{ts}] Sync message classified as {kind:?}");
        match kind {
            SyncKind::Sent => match &sync.sent {
                Some(sent) => self.handle_sent_transcript(txn, fx, inbound, sent).await,
                None => Ok(Disposition::Unchanged),
            },
            SyncKind::Request => {
                let request = sync.request.unwrap_or_default();
                self.handle_sync_request(txn, fx, request).await
            }
            SyncKind::Read => self.handle_read_sync(txn, fx, inbound, sync).await,
            SyncKind::ViewOnceOpen => {
                let Some(open) = &sync.view_once_open else {
                    return Ok(Disposition::Unchanged);
                };
                let author = txn.get_or_create_recipient(&open.sender).await?;
                match txn.message_for(MessageKey::new(author, open.timestamp)).await? {
                    Some(record) => {
                        txn.delete_view_once_content(record.id).await?;
                        fx.conversation_updated(record.thread);
                        Ok(Disposition::Applied)
                    }
                    None => {
                        warn!("[{ts}] View-once open for a message we don't have");
                        Ok(Disposition::DropSilently(DropReason::TargetMissing))
                    }
                }
            }
            SyncKind::Verified => match &sync.verified {
                Some(verified) => self.handle_verified(txn, fx, verified).await,
                None => Ok(Disposition::Unchanged),
            },
            SyncKind::StickerPackOperations => {
                self.handle_sticker_pack_operations(txn, fx, &sync.sticker_pack_operations)
                    .await
            }
            SyncKind::Configuration => match &sync.configuration {
                Some(configuration) => self.handle_configuration(txn, configuration).await,
                None => Ok(Disposition::Unchanged),
            },
            SyncKind::BlockedList => match &sync.blocked_list {
                Some(blocked) => self.handle_blocked_list(txn, blocked).await,
                None => Ok(Disposition::Unchanged),
            },
            SyncKind::FetchLatest => {
                match sync.fetch_type.unwrap_or_default() {
                    FetchKind::LocalProfile => fx.job(Job::RefreshOwnProfile),
                    FetchKind::StorageManifest => fx.job(Job::StorageSync),
                    FetchKind::Unknown => {
                        info!("[{ts}] Unknown fetch type");
                        return Ok(Disposition::DropSilently(DropReason::NothingToDo));
                    }
                }
                Ok(Disposition::Applied)
            }
            SyncKind::MessageRequestResponse => match &sync.message_request_response {
                Some(response) => self.handle_message_request_response(txn, fx, response).await,
                None => Ok(Disposition::Unchanged),
            },
            SyncKind::OutgoingPayment => match &sync.outgoing_payment {
                Some(payment) => self.handle_outgoing_payment(txn, fx, inbound, payment).await,
                None => Ok(Disposition::Unchanged),
            },
            SyncKind::Unknown => Ok(Disposition::DropSilently(DropReason::NothingToDo)),
        }
    }

    /// Another device asked this one to push some of its state.
    async fn handle_sync_request(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        request: RequestKind,
    ) -> Result<Disposition, StoreError> {
        match request {
            RequestKind::Contacts => fx.job(Job::MultiDeviceContactUpdate),
            RequestKind::Groups => fx.job(Job::MultiDeviceGroupUpdate),
            RequestKind::Blocked => fx.job(Job::MultiDeviceBlockedUpdate),
            RequestKind::Configuration => {
                let settings = txn.settings().await?;
                fx.job(Job::MultiDeviceConfigurationUpdate {
                    read_receipts: settings.read_receipts,
                    typing_indicators: settings.typing_indicators,
                    unidentified_delivery_indicators: settings.unidentified_delivery_indicators,
                    link_previews: settings.link_previews,
                });
                fx.job(Job::MultiDeviceStickerPackSync);
            }
            RequestKind::Keys => fx.job(Job::MultiDeviceKeysUpdate),
            RequestKind::Unknown => return Ok(Disposition::DropSilently(DropReason::NothingToDo)),
        }
        Ok(Disposition::Applied)
    }

    /// Messages read on another device. Everything older in the same thread
    /// counts as read too.
    async fn handle_read_sync(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        sync: &SyncMessage,
    ) -> Result<Disposition, StoreError> {
        let ts = inbound.ts();
        let mut latest_read: HashMap<ThreadId, u64> = HashMap::new();
        let mut marked: Vec<MarkedRead> = Vec::new();

        for read in sync.read.iter().filter(|r| !r.sender.is_empty()) {
            let author = txn.get_or_create_recipient(&read.sender).await?;
            match txn.mark_read_by_sync(MessageKey::new(author, read.timestamp)).await? {
                Some(message) => {
                    let latest = latest_read.entry(message.thread_id).or_default();
                    *latest = (*latest).max(message.sent_timestamp);
                    marked.push(message);
                }
                None => debug!("[{ts}] Read sync for {author}@{} matched nothing unread", read.timestamp),
            }
        }
        for (thread, since) in latest_read {
            marked.extend(txn.set_read_since(thread, since).await?);
        }
        if marked.is_empty() {
            return Ok(Disposition::Unchanged);
        }
        info!("[{ts}] Read sync marked {} message(s) read", marked.len());

        for message in marked.iter().filter(|m| m.expires_in_ms > 0) {
            txn.mark_expire_started(message.message_id, ts).await?;
            fx.job(Job::ScheduleExpiration {
                message_id: message.message_id,
                started_at: ts,
                expires_in_ms: message.expires_in_ms,
            });
        }

        if txn.settings().await?.read_receipts {
            let mut by_author: BTreeMap<RecipientId, Vec<u64>> = BTreeMap::new();
            for message in marked.iter().filter(|m| !m.outgoing && m.author != inbound.self_id) {
                by_author.entry(message.author).or_default().push(message.sent_timestamp);
            }
            for (recipient, message_sent_timestamps) in by_author {
                fx.job(Job::SendReadReceipts {
                    recipient,
                    message_sent_timestamps,
                });
            }
        }

        for message in &marked {
            fx.conversation_updated(message.thread_id);
        }
        Ok(Disposition::Applied)
    }

    async fn handle_verified(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        verified: &VerifiedMessage,
    ) -> Result<Disposition, StoreError> {
        if verified.destination.is_empty() || verified.identity_key.is_empty() {
            warn!("Verified sync without destination or identity key");
            return Ok(Disposition::DropSilently(DropReason::NoContent));
        }
        let recipient = txn.get_or_create_recipient(&verified.destination).await?;
        txn.set_verified(recipient, &verified.identity_key, verified.state)
            .await?;
        fx.security_event(recipient);
        Ok(Disposition::Applied)
    }

    async fn handle_sticker_pack_operations(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        operations: &[StickerPackOperation],
    ) -> Result<Disposition, StoreError> {
        let mut applied = false;
        for operation in operations {
            let (Some(pack_id), Some(pack_key), Some(kind)) =
                (&operation.pack_id, &operation.pack_key, operation.kind)
            else {
                warn!("Sticker pack operation is missing its pack or kind");
                continue;
            };
            let pack_id = hex::encode(pack_id);
            match kind {
                StickerPackOperationKind::Install => fx.job(Job::StickerPackDownload {
                    pack_id,
                    pack_key: hex::encode(pack_key),
                    install: true,
                }),
                StickerPackOperationKind::Remove => txn.uninstall_pack(&pack_id).await?,
            }
            applied = true;
        }
        Ok(if applied {
            Disposition::Applied
        } else {
            Disposition::Unchanged
        })
    }

    async fn handle_configuration(
        &self,
        txn: &mut dyn Transaction,
        configuration: &ConfigurationMessage,
    ) -> Result<Disposition, StoreError> {
        let current = txn.settings().await?;
        let mut settings = current.clone();
        if let Some(enabled) = configuration.read_receipts {
            settings.read_receipts = enabled;
        }
        if let Some(enabled) = configuration.unidentified_delivery_indicators {
            settings.unidentified_delivery_indicators = enabled;
        }
        if let Some(enabled) = configuration.typing_indicators {
            settings.typing_indicators = enabled;
        }
        if let Some(enabled) = configuration.link_previews {
            settings.link_previews = enabled;
        }
        if settings == current {
            return Ok(Disposition::Unchanged);
        }
        txn.put_settings(settings).await?;
        Ok(Disposition::Applied)
    }

    async fn handle_blocked_list(
        &self,
        txn: &mut dyn Transaction,
        blocked: &BlockedListMessage,
    ) -> Result<Disposition, StoreError> {
        let groups: Vec<GroupId> = blocked
            .group_ids
            .iter()
            .filter_map(|raw| match GroupId::from_raw(raw) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("Skipping blocked group with bad id: {e}");
                    None
                }
            })
            .collect();
        txn.apply_blocked_list(&blocked.addresses, &groups).await?;
        Ok(Disposition::Applied)
    }

    async fn handle_message_request_response(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        response: &MessageRequestResponse,
    ) -> Result<Disposition, StoreError> {
        let recipient = match (&response.group_id, &response.person) {
            (Some(raw), _) => match GroupId::from_raw(raw) {
                Ok(id) => self.groups.group_recipient(txn, &id).await?,
                Err(e) => {
                    warn!("Message request response with bad group id: {e}");
                    return Ok(Disposition::DropSilently(DropReason::BadGroupContext));
                }
            },
            (None, Some(person)) if !person.is_empty() => txn.get_or_create_recipient(person).await?,
            _ => {
                warn!("Message request response without a conversation");
                return Ok(Disposition::DropSilently(DropReason::NoContent));
            }
        };
        let thread = txn.thread_for_recipient(recipient).await?;

        match response.kind {
            MessageRequestResponseKind::Accept => {
                txn.set_blocked(recipient, false).await?;
                txn.set_profile_sharing(recipient, true).await?;
            }
            MessageRequestResponseKind::Delete => {
                txn.set_profile_sharing(recipient, false).await?;
                if let Some(thread) = thread {
                    txn.delete_conversation(thread).await?;
                }
            }
            MessageRequestResponseKind::Block => {
                txn.set_blocked(recipient, true).await?;
                txn.set_profile_sharing(recipient, false).await?;
            }
            MessageRequestResponseKind::BlockAndDelete => {
                txn.set_blocked(recipient, true).await?;
                txn.set_profile_sharing(recipient, false).await?;
                if let Some(thread) = thread {
                    txn.delete_conversation(thread).await?;
                }
            }
            MessageRequestResponseKind::Unknown => {
                return Ok(Disposition::DropSilently(DropReason::NothingToDo));
            }
        }

        if let Some(thread) = thread {
            fx.conversation_updated(thread);
        }
        Ok(Disposition::Applied)
    }
}
