mod common;

use common::*;
use securesms_ingest::calls::{CallEvent, CallPeer};
use securesms_ingest::store::{MessageKind, SettingsStore, Transaction};
use securesms_ingest::types::call::{CallMessage, HangupMessage, OfferKind, OfferMessage, OpaqueMessage};
use securesms_ingest::types::receipt::{TypingAction, TypingMessage};
use securesms_ingest::types::{Content, MessageState};
use securesms_ingest::{Disposition, DropReason};

fn offer(call_id: u64, kind: OfferKind) -> CallMessage {
    CallMessage {
        offer: Some(OfferMessage {
            id: call_id,
            sdp: Some("v=0".to_string()),
            opaque: None,
            kind,
        }),
        ..Default::default()
    }
}

fn typing(action: TypingAction, group_id: Option<Vec<u8>>) -> Content {
    Content::Typing(TypingMessage {
        action,
        timestamp: 0,
        group_id,
    })
}

#[tokio::test]
async fn test_offer_is_forwarded_to_call_sink() {
    let h = Harness::new();
    let disposition = h
        .deliver(envelope(alice(), 1_000, Content::Call(offer(77, OfferKind::Video))))
        .await;
    assert_eq!(disposition, Disposition::Applied);
    assert!(h.backend.messages().await.is_empty());

    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    assert_eq!(
        h.calls.events(),
        vec![CallEvent::Offer {
            peer: CallPeer {
                recipient: alice_id,
                address: alice(),
                device: 1,
                call_id: 77,
            },
            kind: OfferKind::Video,
            sdp: Some("v=0".to_string()),
            opaque: None,
            remote_identity_key: None,
            server_received_timestamp: 1_010,
            server_delivered_timestamp: 1_020,
            multi_ring: false,
        }]
    );
}

#[tokio::test]
async fn test_call_for_another_device_is_dropped() {
    let h = Harness::new();
    let mut call = offer(5, OfferKind::Audio);
    call.destination_device_id = Some(3);

    assert_eq!(
        h.deliver(envelope(alice(), 1_000, Content::Call(call))).await,
        Disposition::DropSilently(DropReason::WrongDevice)
    );
    assert!(h.calls.events().is_empty());
}

#[tokio::test]
async fn test_opaque_call_message_reports_server_age() {
    let h = Harness::new();
    let call = CallMessage {
        opaque: Some(OpaqueMessage { data: vec![9, 9] }),
        ..Default::default()
    };
    let mut env = envelope(alice(), 1_000, Content::Call(call));
    env.server_received_timestamp = 10_000;
    env.server_delivered_timestamp = 17_500;

    assert_eq!(h.deliver(env).await, Disposition::Applied);
    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    let events = h.calls.events();
    let [CallEvent::Opaque {
        sender,
        data,
        message_age_secs,
        ..
    }] = events.as_slice()
    else {
        panic!("expected one opaque event, got {events:?}");
    };
    assert_eq!(*sender, alice_id);
    assert_eq!(data, &vec![9, 9]);
    assert_eq!(*message_age_secs, 7);
}

#[tokio::test]
async fn test_stale_hangup_turns_placeholder_into_missed_call() {
    let h = Harness::new();
    h.fail(MessageState::InvalidVersion, alice(), 500).await;
    let placeholder = h.backend.messages().await[0].id;

    let hangup = CallMessage {
        hangup: Some(HangupMessage {
            id: 12,
            ..Default::default()
        }),
        ..Default::default()
    };
    let disposition = h
        .deliver_over(envelope(alice(), 500, Content::Call(hangup)), placeholder)
        .await;
    assert_eq!(disposition, Disposition::Applied);

    let rows = h.backend.messages().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, MessageKind::MissedCall { video: false });
    assert_eq!(rows[0].failure, None);
    assert!(h.calls.events().is_empty());
}

#[tokio::test]
async fn test_typing_started_is_published() {
    let h = Harness::new();
    h.deliver(text(alice(), 100, "hi")).await;
    let thread = h.backend.thread_for_address(&alice()).await.unwrap();
    let mut updates = h.processor.event_bus().typing.subscribe();

    let mut env = envelope(alice(), 200, typing(TypingAction::Started, None));
    env.sender_device = 3;
    assert_eq!(h.deliver(env).await, Disposition::Applied);

    let alice_id = h.backend.recipient_by_address(&alice()).await.unwrap().id;
    let update = updates.try_recv().unwrap();
    assert_eq!(update.thread, thread);
    assert_eq!(update.author, alice_id);
    assert_eq!(update.device, 3);
    assert!(update.started);
    assert_eq!(h.backend.messages().await.len(), 1);
}

#[tokio::test]
async fn test_typing_without_thread_is_dropped() {
    let h = Harness::new();
    let mut updates = h.processor.event_bus().typing.subscribe();
    assert_eq!(
        h.deliver(envelope(alice(), 200, typing(TypingAction::Started, None))).await,
        Disposition::DropSilently(DropReason::NoThread)
    );
    assert_eq!(h.backend.thread_count().await, 0);
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn test_typing_disabled_drops_indicator() {
    let h = Harness::new();
    h.deliver(text(alice(), 100, "hi")).await;

    let mut txn = h.begin().await;
    let mut settings = txn.settings().await.unwrap();
    settings.typing_indicators = false;
    txn.put_settings(settings).await.unwrap();
    txn.commit().await.unwrap();

    assert_eq!(
        h.deliver(envelope(alice(), 200, typing(TypingAction::Started, None))).await,
        Disposition::DropSilently(DropReason::TypingDisabled)
    );
}

#[tokio::test]
async fn test_group_typing_from_non_member_is_dropped() {
    let h = Harness::new();
    let group_id = h.seed_v2_group(master_key(7), 1, vec![me(), alice()]).await;
    let raw = group_id.as_bytes().to_vec();

    assert_eq!(
        h.deliver(envelope(bob(), 200, typing(TypingAction::Started, Some(raw)))).await,
        Disposition::DropSilently(DropReason::SenderNotInGroup)
    );
}

#[tokio::test]
async fn test_incoming_text_stops_typing() {
    let h = Harness::new();
    h.deliver(text(alice(), 100, "first")).await;
    let thread = h.backend.thread_for_address(&alice()).await.unwrap();
    let mut updates = h.processor.event_bus().typing.subscribe();

    assert_eq!(h.deliver(text(alice(), 200, "second")).await, Disposition::Applied);
    let update = updates.try_recv().unwrap();
    assert_eq!(update.thread, thread);
    assert!(!update.started);
}
