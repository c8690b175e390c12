mod common;

use common::*;
use securesms_ingest::jobs::Job;
use securesms_ingest::store::{FailureMarker, MessageKey, MessageKind, RecipientStore, Transaction};
use securesms_ingest::types::envelope::{Reaction, RemoteDelete};
use securesms_ingest::types::{DataMessage, MessageState};
use securesms_ingest::{Disposition, DropReason, IngestError, RejectReason};
use std::sync::Arc;

#[tokio::test]
async fn test_text_creates_thread_and_notifies() {
    let h = Harness::new();
    let mut updates = h.processor.event_bus().conversation_updated.subscribe();

    let disposition = h.deliver(text(alice(), 100, "hi")).await;
    assert_eq!(disposition, Disposition::Applied);

    let thread = h.backend.thread_for_address(&alice()).await.expect("thread created");
    let rows = h.backend.messages_in(thread).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, MessageKind::Text);
    assert_eq!(rows[0].body.as_deref(), Some("hi"));
    assert!(!rows[0].is_outgoing());

    let update = updates.try_recv().expect("conversation update");
    assert_eq!(update.thread, thread);
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn test_same_envelope_twice_is_stored_once() {
    let h = Harness::new();
    let envelope = text(alice(), 100, "hi");

    assert_eq!(h.deliver(envelope.clone()).await, Disposition::Applied);
    assert_eq!(h.deliver(envelope).await, Disposition::Unchanged);

    assert_eq!(h.backend.messages().await.len(), 1);
    assert_eq!(h.backend.thread_count().await, 1);
}

#[tokio::test]
async fn test_reaction_takes_priority_over_body() {
    let h = Harness::new();
    h.deliver(text(alice(), 100, "target")).await;

    let message = DataMessage {
        body: Some("this body is ignored".to_string()),
        reaction: Some(Reaction {
            emoji: "👍".to_string(),
            remove: false,
            target_author: alice(),
            target_sent_timestamp: 100,
        }),
        ..Default::default()
    };
    assert_eq!(h.deliver(data(bob(), 200, message)).await, Disposition::Applied);

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1, "no text row for the reaction's body");
    let bob_id = h.backend.recipient_by_address(&bob()).await.unwrap().id;
    assert_eq!(rows[0].reactions.len(), 1);
    assert_eq!(rows[0].reactions[0].author, bob_id);
    assert_eq!(rows[0].reactions[0].emoji, "👍");
}

#[tokio::test]
async fn test_reaction_waits_for_its_target() {
    let h = Harness::new();
    let reaction = DataMessage {
        reaction: Some(Reaction {
            emoji: "❤".to_string(),
            remove: false,
            target_author: alice(),
            target_sent_timestamp: 100,
        }),
        ..Default::default()
    };

    let disposition = h.deliver(data(bob(), 200, reaction)).await;
    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    let key = MessageKey::new(alice_id, 100);
    assert_eq!(disposition, Disposition::Deferred(key));
    assert!(h.backend.messages().await.is_empty());
    assert_eq!(h.backend.thread_count().await, 0);
    assert!(h.processor.early_cache().contains(&key));

    assert_eq!(h.deliver(text(alice(), 100, "late target")).await, Disposition::Applied);

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reactions.len(), 1);
    assert_eq!(rows[0].reactions[0].emoji, "❤");
    assert!(!h.processor.early_cache().contains(&key));
}

#[tokio::test]
async fn test_reaction_with_text_emoji_is_rejected() {
    let h = Harness::new();
    h.deliver(text(alice(), 100, "target")).await;

    let reaction = DataMessage {
        reaction: Some(Reaction {
            emoji: "lol".to_string(),
            remove: false,
            target_author: alice(),
            target_sent_timestamp: 100,
        }),
        ..Default::default()
    };
    assert_eq!(
        h.deliver(data(bob(), 200, reaction)).await,
        Disposition::RejectInvalid(RejectReason::InvalidReactionEmoji)
    );
    assert!(h.backend.messages().await[0].reactions.is_empty());
    assert!(h.backend.recipient_by_address(&bob()).await.is_none(), "rejection rolls back");
}

#[tokio::test]
async fn test_remote_delete_of_deleted_target_is_a_noop() {
    let h = Harness::new();
    h.deliver(text(alice(), 50, "oops")).await;

    let delete = |ts| {
        data(
            alice(),
            ts,
            DataMessage {
                remote_delete: Some(RemoteDelete {
                    target_sent_timestamp: 50,
                }),
                ..Default::default()
            },
        )
    };
    assert_eq!(h.deliver(delete(60)).await, Disposition::Applied);
    let row = h.backend.messages().await.remove(0);
    assert!(row.remote_deleted);
    assert_eq!(row.body, None);

    assert_eq!(h.deliver(delete(61)).await, Disposition::Unchanged);
    assert_eq!(h.backend.messages().await.len(), 1);
}

#[tokio::test]
async fn test_remote_delete_waits_for_its_target() {
    let h = Harness::new();
    let delete = data(
        alice(),
        60,
        DataMessage {
            remote_delete: Some(RemoteDelete {
                target_sent_timestamp: 50,
            }),
            ..Default::default()
        },
    );

    let disposition = h.deliver(delete).await;
    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    let key = MessageKey::new(alice_id, 50);
    assert_eq!(disposition, Disposition::Deferred(key));
    assert!(h.processor.early_cache().contains(&key));

    assert_eq!(h.deliver(text(alice(), 50, "regret")).await, Disposition::Applied);

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].remote_deleted);
    assert_eq!(rows[0].body, None);
    assert!(!h.processor.early_cache().contains(&key));
}

#[tokio::test]
async fn test_remote_delete_outside_window_is_rejected() {
    let h = Harness::new();
    h.deliver(text(alice(), 50, "keep me")).await;

    let mut envelope = data(
        alice(),
        60,
        DataMessage {
            remote_delete: Some(RemoteDelete {
                target_sent_timestamp: 50,
            }),
            ..Default::default()
        },
    );
    envelope.server_received_timestamp = 50 + 2 * 24 * 60 * 60 * 1000;

    assert_eq!(
        h.deliver(envelope).await,
        Disposition::RejectInvalid(RejectReason::InvalidRemoteDelete)
    );
    assert!(!h.backend.messages().await[0].remote_deleted);
}

#[tokio::test]
async fn test_storage_failure_rolls_back_and_feeds_placeholder() {
    let h = Harness::new();
    h.backend.fail_after_writes(1);

    let error = h.try_deliver(text(alice(), 100, "hi")).await.unwrap_err();
    let IngestError::StorageFailure { sender, .. } = &error;
    assert_eq!(sender, &alice());
    assert!(h.backend.messages().await.is_empty());
    assert!(h.backend.recipient_by_address(&alice()).await.is_none());
    assert!(h.jobs.jobs().is_empty());

    h.backend.clear_write_failures();
    let meta = error.failure_metadata();
    let disposition = h
        .processor
        .process(MessageState::CorruptMessage, None, Some(meta), 100, None)
        .await
        .unwrap();
    assert_eq!(disposition, Disposition::Placeholder(FailureMarker::DecryptFailed));

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, MessageKind::Placeholder);
}

#[tokio::test]
async fn test_decrypt_failures_map_to_placeholders() {
    let h = Harness::new();

    let disposition = h.fail(MessageState::InvalidVersion, alice(), 300).await;
    assert_eq!(
        disposition,
        Disposition::Placeholder(FailureMarker::InvalidVersionKeyExchange)
    );
    assert!(h.jobs.take().is_empty());

    let disposition = h.fail(MessageState::NoSession, bob(), 400).await;
    assert_eq!(disposition, Disposition::Placeholder(FailureMarker::DecryptFailed));
    let bob_id = h.backend.recipient_by_address(&bob()).await.unwrap().id;
    assert_eq!(
        h.jobs.take(),
        vec![Job::AutomaticSessionReset {
            recipient: bob_id,
            device: 2,
            sent_timestamp: 400,
        }]
    );

    let placeholders: Vec<_> = h
        .backend
        .messages()
        .await
        .into_iter()
        .filter_map(|m| m.failure)
        .collect();
    assert_eq!(
        placeholders,
        vec![FailureMarker::InvalidVersionKeyExchange, FailureMarker::DecryptFailed]
    );
}

#[tokio::test]
async fn test_repeated_failure_keeps_one_placeholder() {
    let h = Harness::new();
    h.fail(MessageState::LegacyMessage, alice(), 300).await;
    h.fail(MessageState::LegacyMessage, alice(), 300).await;
    assert_eq!(h.backend.messages().await.len(), 1);
}

#[tokio::test]
async fn test_text_fills_in_its_placeholder() {
    let h = Harness::new();
    h.fail(MessageState::InvalidVersion, alice(), 300).await;
    let placeholder = h.backend.messages().await[0].id;

    let disposition = h.deliver_over(text(alice(), 300, "recovered"), placeholder).await;
    assert_eq!(disposition, Disposition::Applied);

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, placeholder);
    assert_eq!(rows[0].kind, MessageKind::Text);
    assert_eq!(rows[0].body.as_deref(), Some("recovered"));
    assert_eq!(rows[0].failure, None);
}

#[tokio::test]
async fn test_filled_placeholder_is_found_by_its_sent_time() {
    let h = Harness::new();
    h.fail(MessageState::InvalidVersion, alice(), 900).await;
    let placeholder = h.backend.messages().await[0].id;

    let original = text(alice(), 100, "recovered");
    assert_eq!(h.deliver_over(original.clone(), placeholder).await, Disposition::Applied);
    assert_eq!(h.backend.messages().await[0].sent_timestamp, 100);

    let reaction = DataMessage {
        reaction: Some(Reaction {
            emoji: "👍".to_string(),
            remove: false,
            target_author: alice(),
            target_sent_timestamp: 100,
        }),
        ..Default::default()
    };
    assert_eq!(h.deliver(data(bob(), 200, reaction)).await, Disposition::Applied);

    assert_eq!(h.deliver(original.clone()).await, Disposition::Unchanged);
    assert_eq!(h.deliver_over(original, placeholder).await, Disposition::Unchanged);

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, placeholder);
    assert_eq!(rows[0].reactions.len(), 1);
}

#[tokio::test]
async fn test_blocked_sender_changes_nothing() {
    let h = Harness::new();
    let mut txn = h.begin().await;
    let alice_id = txn.get_or_create_recipient(&alice()).await.unwrap();
    txn.set_blocked(alice_id, true).await.unwrap();
    txn.commit().await.unwrap();

    assert_eq!(
        h.deliver(text(alice(), 100, "hi")).await,
        Disposition::DropSilently(DropReason::BlockedSender)
    );
    assert!(h.backend.messages().await.is_empty());
    assert_eq!(h.backend.thread_count().await, 0);

    assert_eq!(
        h.fail(MessageState::CorruptMessage, alice(), 100).await,
        Disposition::DropSilently(DropReason::BlockedSender)
    );
    assert!(h.jobs.jobs().is_empty());
}

#[tokio::test]
async fn test_duplicate_and_noop_states_do_nothing() {
    let h = Harness::new();
    for state in [MessageState::Duplicate, MessageState::Noop] {
        let disposition = h.processor.process(state, None, None, 100, None).await.unwrap();
        assert_eq!(disposition, Disposition::DropSilently(DropReason::NothingToDo));
    }
    assert!(h.backend.messages().await.is_empty());
}

#[tokio::test]
async fn test_profile_key_and_receipt_request_enqueue_jobs() {
    let h = Harness::new();
    let mut envelope = data(
        alice(),
        100,
        DataMessage {
            body: Some("hello".to_string()),
            profile_key: Some(vec![7; 32]),
            ..Default::default()
        },
    );
    envelope.needs_receipt = true;

    assert_eq!(h.deliver(envelope.clone()).await, Disposition::Applied);
    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    assert_eq!(
        h.jobs.take(),
        vec![
            Job::RetrieveProfile { recipient: alice_id },
            Job::SendDeliveryReceipt {
                recipient: alice_id,
                message_sent_timestamp: 100,
            },
        ]
    );

    // same key again: no second profile fetch
    assert_eq!(h.deliver(envelope).await, Disposition::Unchanged);
    assert_eq!(
        h.jobs.take(),
        vec![Job::SendDeliveryReceipt {
            recipient: alice_id,
            message_sent_timestamp: 100,
        }]
    );
}

#[tokio::test]
async fn test_end_session_resets_and_raises_security_event() {
    let h = Harness::new();
    let mut security = h.processor.event_bus().security.subscribe();
    let message = DataMessage {
        end_session: true,
        ..Default::default()
    };

    assert_eq!(h.deliver(data(alice(), 100, message)).await, Disposition::Applied);
    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, MessageKind::EndSession);

    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    assert_eq!(security.try_recv().unwrap().recipient, alice_id);
}

#[tokio::test]
async fn test_sender_is_marked_registered() {
    let h = Harness::new();
    h.deliver(text(alice(), 100, "hi")).await;
    assert!(h.backend.recipient_by_address(&alice()).await.unwrap().registered);
}

#[tokio::test]
async fn test_expiration_update_to_current_timer_is_unchanged() {
    let h = Harness::new();
    let timer = |ts, seconds| {
        data(
            alice(),
            ts,
            DataMessage {
                expiration_update: true,
                expires_in_seconds: seconds,
                ..Default::default()
            },
        )
    };

    assert_eq!(h.deliver(timer(100, 0)).await, Disposition::Unchanged);
    assert!(h.backend.messages().await.is_empty());

    assert_eq!(h.deliver(timer(200, 60)).await, Disposition::Applied);
    assert_eq!(h.deliver(timer(300, 60)).await, Disposition::Unchanged);

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, MessageKind::ExpirationUpdate);
    assert_eq!(rows[0].expires_in_ms, 60_000);
    let alice_record = h.backend.recipient_by_address(&alice()).await.unwrap();
    assert_eq!(alice_record.expire_messages_seconds, 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_racing_its_target_is_applied() {
    let h = Arc::new(Harness::new());

    for round in 0..25u64 {
        let target_ts = 1_000 + round;
        let reaction = data(
            bob(),
            5_000 + round,
            DataMessage {
                reaction: Some(Reaction {
                    emoji: "🔥".to_string(),
                    remove: false,
                    target_author: alice(),
                    target_sent_timestamp: target_ts,
                }),
                ..Default::default()
            },
        );
        let target = text(alice(), target_ts, "race");

        let first = tokio::spawn({
            let h = h.clone();
            async move { h.deliver(reaction).await }
        });
        let second = tokio::spawn({
            let h = h.clone();
            async move { h.deliver(target).await }
        });
        first.await.unwrap();
        assert_eq!(second.await.unwrap(), Disposition::Applied);
    }

    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 25);
    for row in rows {
        assert_eq!(row.reactions.len(), 1, "reaction on {} was stranded", row.sent_timestamp);
        assert!(!h.processor.early_cache().contains(&MessageKey::new(alice_id, row.sent_timestamp)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_envelopes_process_concurrently() {
    let h = Arc::new(Harness::new());
    let mut tasks = tokio::task::JoinSet::new();
    for ts in 1..=20u64 {
        let h = h.clone();
        let sender = if ts % 2 == 0 { alice() } else { bob() };
        tasks.spawn(async move { h.deliver(text(sender, ts, "burst")).await });
    }
    while let Some(disposition) = tasks.join_next().await {
        assert_eq!(disposition.unwrap(), Disposition::Applied);
    }

    assert_eq!(h.backend.messages().await.len(), 20);
    assert_eq!(h.backend.thread_count().await, 2);
    let alice_thread = h.backend.thread_for_address(&alice()).await.unwrap();
    assert_eq!(h.backend.messages_in(alice_thread).await.len(), 10);
}
