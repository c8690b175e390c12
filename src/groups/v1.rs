use super::{GroupContextResolver, resolve_all};
use crate::disposition::{Disposition, DropReason};
use crate::effects::SideEffects;
use ingestcore::jobs::Job;
use ingestcore::store::{
    GroupRecord, IncomingMessage, MessageBody, MessageKind, OutgoingMessage, StoreError, Transaction,
};
use ingestcore::types::group::{GroupContextV1, GroupV1Kind, MessageGroupContext};
use ingestcore::types::{GroupId, RecipientId, ServiceAddress};
use log::{debug, info};

/// Who a V1 group change came from and when.
#[derive(Debug, Clone, Copy)]
pub(crate) struct V1Origin<'a> {
    pub author: RecipientId,
    pub author_address: &'a ServiceAddress,
    pub author_device: u32,
    pub sent_timestamp: u64,
    pub server_timestamp: u64,
    /// Sent by this account from another device.
    pub outgoing: bool,
}

impl GroupContextResolver {
    pub(crate) async fn process_v1_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        ctx: &GroupContextV1,
        origin: V1Origin<'_>,
    ) -> Result<Disposition, StoreError> {
        let Ok(id) = GroupId::v1(&ctx.id) else {
            return Ok(Disposition::DropSilently(DropReason::BadGroupContext));
        };
        let ts = origin.sent_timestamp;

        let Some(record) = txn.group(&id).await? else {
            if ctx.kind == GroupV1Kind::Update {
                return self.create_v1(txn, fx, &id, ctx, origin).await;
            }
            debug!("[{ts}] {:?} for unknown group {id}", ctx.kind);
            return Ok(Disposition::DropSilently(DropReason::UnknownGroup));
        };

        match ctx.kind {
            GroupV1Kind::Update => self.update_v1(txn, fx, record, ctx, origin).await,
            GroupV1Kind::Quit => self.quit_v1(txn, fx, record, ctx, origin).await,
            GroupV1Kind::RequestInfo => {
                if record.is_member(origin.author) {
                    info!("[{ts}] {} requested info for {id}", origin.author_address);
                    fx.job(Job::PushGroupUpdate {
                        destination: origin.author,
                        group_id: id,
                    });
                    Ok(Disposition::Applied)
                } else {
                    debug!("[{ts}] Ignoring info request for {id} from non-member");
                    Ok(Disposition::DropSilently(DropReason::SenderNotInGroup))
                }
            }
            GroupV1Kind::Deliver | GroupV1Kind::Unknown => Ok(Disposition::Unchanged),
        }
    }

    async fn create_v1(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        id: &GroupId,
        ctx: &GroupContextV1,
        origin: V1Origin<'_>,
    ) -> Result<Disposition, StoreError> {
        let self_id = txn.self_id().await?;
        let recipient = txn.get_or_create_group_recipient(id).await?;
        let mut members = resolve_all(txn, &ctx.members).await?;
        if !members.contains(&self_id) {
            members.push(self_id);
        }
        txn.put_group(GroupRecord {
            id: id.clone(),
            recipient,
            title: ctx.name.clone().unwrap_or_default(),
            members,
            pending_members: Vec::new(),
            active: true,
            master_key: None,
            decrypted: None,
        })
        .await?;
        info!("[{}] Created group {id}", origin.sent_timestamp);
        self.store_v1_update(txn, fx, recipient, ctx.clone(), origin).await
    }

    async fn update_v1(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        mut record: GroupRecord,
        ctx: &GroupContextV1,
        origin: V1Origin<'_>,
    ) -> Result<Disposition, StoreError> {
        let self_id = txn.self_id().await?;
        let mut added = Vec::new();
        let mut added_addresses = Vec::new();
        for address in ctx.members.iter().filter(|a| !a.is_empty()) {
            let id = txn.get_or_create_recipient(address).await?;
            if !record.members.contains(&id) && !added.contains(&id) {
                added.push(id);
                added_addresses.push(address.clone());
            }
        }

        let mut delta = GroupContextV1 {
            id: ctx.id.clone(),
            kind: GroupV1Kind::Update,
            name: None,
            members: added_addresses,
            avatar: None,
        };

        let mut changed = !added.is_empty();
        record.members.extend(&added);
        if let Some(name) = &ctx.name
            && *name != record.title
        {
            record.title = name.clone();
            delta.name = Some(name.clone());
            changed = true;
        }
        if ctx.avatar.is_some() {
            delta.avatar = ctx.avatar.clone();
            changed = true;
        }
        if !record.active && added.contains(&self_id) {
            record.active = true;
            changed = true;
        }

        if !changed {
            debug!("[{}] V1 update for {} changes nothing", origin.sent_timestamp, record.id);
            return Ok(Disposition::Unchanged);
        }

        let recipient = record.recipient;
        txn.put_group(record).await?;
        self.store_v1_update(txn, fx, recipient, delta, origin).await
    }

    async fn quit_v1(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        mut record: GroupRecord,
        ctx: &GroupContextV1,
        origin: V1Origin<'_>,
    ) -> Result<Disposition, StoreError> {
        let self_id = txn.self_id().await?;
        if !record.is_member(origin.author) {
            return Ok(Disposition::Unchanged);
        }
        record.members.retain(|m| *m != origin.author);
        if origin.author == self_id {
            record.active = false;
        }
        let recipient = record.recipient;
        txn.put_group(record).await?;

        let delta = GroupContextV1 {
            id: ctx.id.clone(),
            kind: GroupV1Kind::Quit,
            name: None,
            members: vec![origin.author_address.clone()],
            avatar: None,
        };
        self.store_v1_update(txn, fx, recipient, delta, origin).await
    }

    async fn store_v1_update(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        conversation: RecipientId,
        delta: GroupContextV1,
        origin: V1Origin<'_>,
    ) -> Result<Disposition, StoreError> {
        let mut content = MessageBody::new(MessageKind::GroupUpdate, origin.sent_timestamp);
        content.group_context = Some(MessageGroupContext::from_v1(&delta).to_stored());

        let inserted = if origin.outgoing {
            let inserted = txn
                .insert_outgoing(OutgoingMessage {
                    conversation,
                    content,
                })
                .await?;
            if let Some(inserted) = &inserted {
                txn.mark_sent(inserted.message_id).await?;
            }
            inserted
        } else {
            txn.insert_incoming(IncomingMessage {
                author: origin.author,
                author_device: origin.author_device,
                conversation,
                server_timestamp: origin.server_timestamp,
                received_timestamp: origin.server_timestamp,
                unidentified: false,
                failure: None,
                content,
            })
            .await?
        };

        match inserted {
            Some(inserted) => {
                fx.conversation_updated(inserted.thread_id);
                Ok(Disposition::Applied)
            }
            None => Ok(Disposition::Unchanged),
        }
    }
}
