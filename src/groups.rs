//! Group Context Resolver: maps a group reference carried by a message to a
//! local conversation and keeps V2 group state current.

pub mod service;
pub(crate) mod v1;

pub use service::{GroupService, UnavailableGroupService};

use crate::effects::SideEffects;
use crate::error::GroupError;
use ingestcore::store::{
    GroupRecord, IncomingMessage, MessageBody, MessageKind, OutgoingMessage, StoreError, Transaction,
};
use ingestcore::types::group::{DecryptedGroup, GroupChange, GroupContextV2, MessageGroupContext};
use ingestcore::types::{GroupId, RecipientId, ServiceAddress};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct GroupContextResolver {
    service: Arc<dyn GroupService>,
    fetch_timeout: Duration,
}

impl GroupContextResolver {
    pub fn new(service: Arc<dyn GroupService>, fetch_timeout: Duration) -> Self {
        Self {
            service,
            fetch_timeout,
        }
    }

    /// The local record for `id`. A V1 id whose group was migrated resolves
    /// to the V2 record.
    pub async fn group_record(
        &self,
        txn: &dyn Transaction,
        id: &GroupId,
    ) -> Result<Option<GroupRecord>, StoreError> {
        if let Some(record) = txn.group(id).await? {
            return Ok(Some(record));
        }
        match id.derive_v2_migration_group_id() {
            Some(v2) => txn.group(&v2).await,
            None => Ok(None),
        }
    }

    /// True when a V1 id refers to a group that already lives on as V2.
    pub async fn is_migrated_v1(&self, txn: &dyn Transaction, id: &GroupId) -> Result<bool, StoreError> {
        let Some(v2) = id.derive_v2_migration_group_id() else {
            return Ok(false);
        };
        Ok(txn.group(&v2).await?.is_some())
    }

    /// Absent, or present with nothing known beyond the local user.
    pub async fn is_unknown_group(
        &self,
        txn: &dyn Transaction,
        id: &GroupId,
        self_id: RecipientId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .group_record(txn, id)
            .await?
            .is_none_or(|record| record.is_placeholder(self_id)))
    }

    pub async fn find_group_recipient(
        &self,
        txn: &dyn Transaction,
        id: &GroupId,
    ) -> Result<Option<RecipientId>, StoreError> {
        Ok(self.group_record(txn, id).await?.map(|record| record.recipient))
    }

    pub async fn group_recipient(
        &self,
        txn: &mut dyn Transaction,
        id: &GroupId,
    ) -> Result<RecipientId, StoreError> {
        match self.find_group_recipient(&*txn, id).await? {
            Some(recipient) => Ok(recipient),
            None => txn.get_or_create_group_recipient(id).await,
        }
    }

    pub async fn is_current_member(
        &self,
        txn: &dyn Transaction,
        id: &GroupId,
        who: RecipientId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .group_record(txn, id)
            .await?
            .is_some_and(|record| record.is_member(who)))
    }

    /// Re-key a V1 group that the message shows has moved to V2.
    pub async fn perform_local_migration_if_needed(
        &self,
        txn: &mut dyn Transaction,
        ctx: &GroupContextV2,
    ) -> Result<(), GroupError> {
        let v2 = GroupId::v2_from_master_key(&ctx.master_key)?;
        if txn.group(&v2).await?.is_some() {
            return Ok(());
        }
        if let Some(v1) = txn.group_v1_by_expected_v2(&v2).await? {
            info!("Migrating group {} to {v2}", v1.id);
            txn.migrate_group(&v1.id, &v2, &ctx.master_key).await?;
        }
        Ok(())
    }

    /// Bring the local copy of a V2 group to at least the revision named in
    /// `ctx`, applying the carried change when it is exactly one step ahead.
    /// Returns whether new state was stored.
    pub(crate) async fn update_group(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        ctx: &GroupContextV2,
        editor: RecipientId,
        timestamp: u64,
    ) -> Result<bool, GroupError> {
        let id = GroupId::v2_from_master_key(&ctx.master_key)?;
        self.perform_local_migration_if_needed(txn, ctx).await?;

        let existing = txn.group(&id).await?;
        let local = existing.as_ref().and_then(|record| record.decrypted.clone());
        if let Some(current) = &local
            && current.revision >= ctx.revision
        {
            return Ok(false);
        }

        let self_address = self_address(&*txn).await?;
        let (state, change) = match (&local, &ctx.signed_change) {
            (Some(current), Some(change)) if change.revision == ctx.revision && current.revision + 1 == ctx.revision => {
                debug!("[{timestamp}] Applying group change to {id} locally, revision {}", ctx.revision);
                (current.apply_change(change)?, Some(change.clone()))
            }
            _ => {
                let fetched = self.fetch(&ctx.master_key, ctx.revision).await?;
                if !fetched.is_member(&self_address) && !fetched.is_pending(&self_address) {
                    return Err(GroupError::NotAMember);
                }
                (fetched, None)
            }
        };

        self.store_v2_state(txn, fx, &id, &ctx.master_key, &state, change.as_ref(), editor, timestamp)
            .await?;
        Ok(true)
    }

    async fn fetch(&self, master_key: &[u8], revision: u32) -> Result<DecryptedGroup, GroupError> {
        match tokio::time::timeout(self.fetch_timeout, self.service.fetch_group_state(master_key, revision)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Group state fetch for revision {revision} timed out after {:?}",
                    self.fetch_timeout
                );
                Err(GroupError::Cancelled)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_v2_state(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        id: &GroupId,
        master_key: &[u8],
        state: &DecryptedGroup,
        change: Option<&GroupChange>,
        editor: RecipientId,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let self_id = txn.self_id().await?;
        let self_address = self_address(&*txn).await?;
        let recipient = self.group_recipient(txn, id).await?;

        let members = resolve_all(txn, &state.members).await?;
        let pending_members = resolve_all(txn, &state.pending_members).await?;
        txn.put_group(GroupRecord {
            id: id.clone(),
            recipient,
            title: state.title.clone(),
            members,
            pending_members,
            active: state.is_member(&self_address),
            master_key: Some(master_key.to_vec()),
            decrypted: Some(state.clone()),
        })
        .await?;

        if txn.recipient(recipient).await?.expire_messages_seconds != state.disappearing_timer_seconds {
            txn.set_expire_messages(recipient, state.disappearing_timer_seconds)
                .await?;
        }

        let mut content = MessageBody::new(MessageKind::GroupUpdate, timestamp);
        content.group_context = Some(MessageGroupContext::from_v2(master_key, state, change).to_stored());
        let inserted = if editor == self_id {
            txn.insert_outgoing(OutgoingMessage {
                conversation: recipient,
                content,
            })
            .await?
        } else {
            txn.insert_incoming(IncomingMessage {
                author: editor,
                author_device: 1,
                conversation: recipient,
                server_timestamp: timestamp,
                received_timestamp: timestamp,
                unidentified: false,
                failure: None,
                content,
            })
            .await?
        };
        if let Some(inserted) = inserted {
            if editor == self_id {
                txn.mark_sent(inserted.message_id).await?;
            }
            fx.conversation_updated(inserted.thread_id);
        }
        info!("[{timestamp}] Group {id} now at revision {}", state.revision);
        Ok(())
    }
}

pub(crate) async fn self_address(txn: &dyn Transaction) -> Result<ServiceAddress, StoreError> {
    let self_id = txn.self_id().await?;
    Ok(txn.recipient(self_id).await?.address.unwrap_or_default())
}

pub(crate) async fn resolve_all(
    txn: &mut dyn Transaction,
    addresses: &[ServiceAddress],
) -> Result<Vec<RecipientId>, StoreError> {
    let mut ids = Vec::with_capacity(addresses.len());
    for address in addresses.iter().filter(|a| !a.is_empty()) {
        let id = txn.get_or_create_recipient(address).await?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
