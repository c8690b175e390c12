mod common;

use common::*;
use securesms_ingest::jobs::Job;
use securesms_ingest::store::{MessageKind, RecipientStore, Transaction};
use securesms_ingest::types::envelope::GroupCallUpdate;
use securesms_ingest::types::group::{DecryptedGroup, GroupChange, GroupContextV1, GroupContextV2, GroupV1Kind};
use securesms_ingest::types::{DataMessage, GroupContext, GroupId};
use securesms_ingest::{Disposition, DropReason, IngestConfig};

fn in_v2_group(master_key: Vec<u8>, revision: u32, body: &str) -> DataMessage {
    DataMessage {
        body: Some(body.to_string()),
        group: Some(GroupContext::V2(GroupContextV2 {
            master_key,
            revision,
            signed_change: None,
        })),
        ..Default::default()
    }
}

fn v1_message(id: &[u8], kind: GroupV1Kind, body: Option<&str>) -> DataMessage {
    DataMessage {
        body: body.map(str::to_string),
        group: Some(GroupContext::V1(GroupContextV1 {
            id: id.to_vec(),
            kind,
            name: Some("crew".to_string()),
            members: vec![me(), alice(), bob()],
            avatar: None,
        })),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_v2_message_lands_in_group_thread() {
    let h = Harness::new();
    let group_id = h.seed_v2_group(master_key(1), 3, vec![me(), alice()]).await;
    assert_eq!(h.groups.fetches(), 1);

    let disposition = h.deliver(data(alice(), 500, in_v2_group(master_key(1), 3, "hello group"))).await;
    assert_eq!(disposition, Disposition::Applied);
    assert_eq!(h.groups.fetches(), 1, "known revision needs no fetch");

    let thread = h.backend.thread_for_group(&group_id).await.unwrap();
    let texts: Vec<_> = h
        .backend
        .messages_in(thread)
        .await
        .into_iter()
        .filter(|m| m.kind == MessageKind::Text)
        .collect();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].body.as_deref(), Some("hello group"));
}

#[tokio::test]
async fn test_v2_fetch_timeout_drops_without_writes() {
    let h = Harness::with_config(IngestConfig {
        group_fetch_timeout_ms: 50,
        ..Default::default()
    });
    h.groups.hang();

    let disposition = h.deliver(data(alice(), 500, in_v2_group(master_key(2), 1, "hi"))).await;
    assert_eq!(disposition, Disposition::DropSilently(DropReason::GroupStateUnavailable));
    assert!(h.backend.messages().await.is_empty());
    assert_eq!(h.backend.thread_count().await, 0);
    assert!(h.backend.group(&v2_group_id(2)).await.is_none());
    assert!(h.backend.recipient_by_address(&alice()).await.is_none());
}

#[tokio::test]
async fn test_v2_group_without_local_user_is_dropped() {
    let h = Harness::new();
    h.groups.set_state(
        master_key(3),
        DecryptedGroup {
            title: "not ours".to_string(),
            revision: 1,
            members: vec![alice()],
            ..Default::default()
        },
    );

    let disposition = h.deliver(data(alice(), 500, in_v2_group(master_key(3), 1, "hi"))).await;
    assert_eq!(disposition, Disposition::DropSilently(DropReason::NotAGroupMember));
    assert!(h.backend.group(&v2_group_id(3)).await.is_none());
    assert!(h.backend.messages().await.is_empty());
}

#[tokio::test]
async fn test_v2_message_from_non_member_is_dropped() {
    let h = Harness::new();
    h.seed_v2_group(master_key(4), 1, vec![me(), alice()]).await;
    let before = h.backend.messages().await.len();

    let disposition = h.deliver(data(bob(), 500, in_v2_group(master_key(4), 1, "let me in"))).await;
    assert_eq!(disposition, Disposition::DropSilently(DropReason::SenderNotInGroup));
    assert_eq!(h.backend.messages().await.len(), before);
}

#[tokio::test]
async fn test_v2_change_one_revision_ahead_is_applied_locally() {
    let h = Harness::new();
    let group_id = h.seed_v2_group(master_key(5), 1, vec![me(), alice()]).await;

    let update = DataMessage {
        group: Some(GroupContext::V2(GroupContextV2 {
            master_key: master_key(5),
            revision: 2,
            signed_change: Some(GroupChange {
                revision: 2,
                editor: Some(alice()),
                new_members: vec![bob()],
                new_title: Some("bigger".to_string()),
                ..Default::default()
            }),
        })),
        ..Default::default()
    };
    assert_eq!(h.deliver(data(alice(), 600, update)).await, Disposition::Applied);
    assert_eq!(h.groups.fetches(), 1);

    let record = h.backend.group(&group_id).await.unwrap();
    assert_eq!(record.title, "bigger");
    let bob_id = h.backend.recipient_by_address(&bob()).await.unwrap().id;
    assert!(record.is_member(bob_id));

    let disposition = h.deliver(data(bob(), 700, in_v2_group(master_key(5), 2, "thanks"))).await;
    assert_eq!(disposition, Disposition::Applied);
}

#[tokio::test]
async fn test_stale_v1_update_after_migration_changes_nothing() {
    let h = Harness::new();
    let v1_id = [5u8; 16];
    let legacy = GroupId::v1(&v1_id).unwrap();
    let migrated_key = legacy.derive_v2_migration_master_key().unwrap().to_vec();
    h.seed_v2_group(migrated_key, 1, vec![me(), alice()]).await;

    let messages = h.backend.messages().await;
    let threads = h.backend.thread_count().await;

    let disposition = h
        .deliver(data(alice(), 900, v1_message(&v1_id, GroupV1Kind::Update, None)))
        .await;
    assert_eq!(disposition, Disposition::DropSilently(DropReason::StaleGroupV1Update));
    assert_eq!(h.backend.messages().await, messages);
    assert_eq!(h.backend.thread_count().await, threads);
    assert!(h.backend.group(&legacy).await.is_none());
    assert!(h.jobs.jobs().is_empty());
}

#[tokio::test]
async fn test_v1_message_for_unknown_group_requests_info() {
    let h = Harness::new();
    let v1_id = [8u8; 16];

    let disposition = h
        .deliver(data(alice(), 900, v1_message(&v1_id, GroupV1Kind::Deliver, Some("hi all"))))
        .await;
    assert_eq!(disposition, Disposition::DropWithRequest);
    assert!(h.backend.messages().await.is_empty());

    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    assert_eq!(
        h.jobs.take(),
        vec![Job::RequestGroupInfo {
            source: alice_id,
            group_id: GroupId::v1(&v1_id).unwrap(),
        }]
    );
}

#[tokio::test]
async fn test_v1_update_creates_group_for_later_messages() {
    let h = Harness::new();
    let v1_id = [9u8; 16];
    let group_id = GroupId::v1(&v1_id).unwrap();

    let disposition = h
        .deliver(data(alice(), 900, v1_message(&v1_id, GroupV1Kind::Update, None)))
        .await;
    assert_eq!(disposition, Disposition::Applied);
    let record = h.backend.group(&group_id).await.unwrap();
    assert_eq!(record.title, "crew");
    assert_eq!(record.members.len(), 3);

    let disposition = h
        .deliver(data(bob(), 950, v1_message(&v1_id, GroupV1Kind::Deliver, Some("hey"))))
        .await;
    assert_eq!(disposition, Disposition::Applied);

    let thread = h.backend.thread_for_group(&group_id).await.unwrap();
    let kinds: Vec<_> = h.backend.messages_in(thread).await.into_iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::GroupUpdate, MessageKind::Text]);
}

#[tokio::test]
async fn test_v2_timer_change_is_ignored() {
    let h = Harness::new();
    let group_id = h.seed_v2_group(master_key(4), 1, vec![me(), alice()]).await;

    let message = DataMessage {
        group: Some(GroupContext::V2(v2_context(4, 1))),
        expiration_update: true,
        expires_in_seconds: 3_600,
        ..Default::default()
    };
    assert_eq!(
        h.deliver(data(alice(), 2_000, message)).await,
        Disposition::DropSilently(DropReason::GroupV2Timer)
    );
    assert!(
        !h.backend
            .messages()
            .await
            .iter()
            .any(|m| m.kind == MessageKind::ExpirationUpdate)
    );
    let group_recipient = h.backend.group(&group_id).await.unwrap().recipient;
    let txn = h.begin().await;
    assert_eq!(txn.recipient(group_recipient).await.unwrap().expire_messages_seconds, 0);
    txn.rollback().await.unwrap();
}

#[tokio::test]
async fn test_group_call_update_records_call_and_peeks() {
    let h = Harness::new();
    let group_id = h.seed_v2_group(master_key(5), 1, vec![me(), alice(), bob()]).await;
    let call = |sender, ts| {
        data(
            sender,
            ts,
            DataMessage {
                group: Some(GroupContext::V2(v2_context(5, 1))),
                group_call_update: Some(GroupCallUpdate {
                    era_id: Some("era-1".to_string()),
                }),
                ..Default::default()
            },
        )
    };

    assert_eq!(h.deliver(call(alice(), 2_000)).await, Disposition::Applied);
    assert_eq!(h.deliver(call(bob(), 2_500)).await, Disposition::Applied);

    let group_recipient = h.backend.group(&group_id).await.unwrap().recipient;
    let peeks: Vec<_> = h
        .jobs
        .take()
        .into_iter()
        .filter(|job| matches!(job, Job::GroupCallPeek { .. }))
        .collect();
    assert_eq!(peeks, vec![Job::GroupCallPeek { group_recipient }; 2]);

    let thread = h.backend.thread_for_group(&group_id).await.unwrap();
    let calls: Vec<_> = h
        .backend
        .messages_in(thread)
        .await
        .into_iter()
        .filter(|m| matches!(&m.kind, MessageKind::GroupCallUpdate { .. }))
        .collect();
    assert_eq!(calls.len(), 1, "one row per call era");
    assert_eq!(
        calls[0].kind,
        MessageKind::GroupCallUpdate {
            era_id: Some("era-1".to_string())
        }
    );
    assert_eq!(calls[0].sent_timestamp, 2_500);
}
