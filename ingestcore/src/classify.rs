//! Decides which handler a decrypted payload goes to. Each classifier walks
//! its rules top to bottom and the first match wins, so the order below is
//! the priority order when a payload carries several parts.

use crate::mime;
use crate::types::call::CallMessage;
use crate::types::envelope::DataMessage;
use crate::types::sync::{SentTranscript, SyncMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Invalid,
    EndSession,
    GroupV1Update,
    ExpirationUpdate,
    Reaction,
    RemoteDelete,
    Payment,
    Media,
    Text,
    GroupCallUpdate,
    Empty,
}

/// View-once messages must carry exactly one image or video.
pub fn is_invalid_message(msg: &DataMessage) -> bool {
    if !msg.view_once {
        return false;
    }
    match msg.attachments.as_slice() {
        [only] => !mime::is_view_once_type(&only.content_type),
        _ => true,
    }
}

pub fn classify_data(msg: &DataMessage) -> DataKind {
    if is_invalid_message(msg) {
        DataKind::Invalid
    } else if msg.end_session {
        DataKind::EndSession
    } else if msg.is_group_v1_update() {
        DataKind::GroupV1Update
    } else if msg.expiration_update {
        DataKind::ExpirationUpdate
    } else if msg.reaction.is_some() {
        DataKind::Reaction
    } else if msg.remote_delete.is_some() {
        DataKind::RemoteDelete
    } else if msg.payment.is_some() {
        DataKind::Payment
    } else if msg.is_media() {
        DataKind::Media
    } else if msg.body.is_some() {
        DataKind::Text
    } else if msg.group_call_update.is_some() {
        DataKind::GroupCallUpdate
    } else {
        DataKind::Empty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    RecipientUpdate,
    EndSession,
    GroupV1Update,
    GroupV2Update,
    GroupCallUpdate,
    EmptyGroupV2,
    ExpirationUpdate,
    Reaction,
    RemoteDelete,
    Media,
    Text,
    Empty,
}

pub fn classify_transcript(sent: &SentTranscript) -> TranscriptKind {
    let msg = &sent.message;
    if sent.is_recipient_update {
        TranscriptKind::RecipientUpdate
    } else if msg.end_session {
        TranscriptKind::EndSession
    } else if msg.is_group_v1_update() {
        TranscriptKind::GroupV1Update
    } else if msg.is_group_v2_update() {
        TranscriptKind::GroupV2Update
    } else if msg.group_call_update.is_some() {
        TranscriptKind::GroupCallUpdate
    } else if msg.is_empty_group_v2_message() {
        TranscriptKind::EmptyGroupV2
    } else if msg.expiration_update {
        TranscriptKind::ExpirationUpdate
    } else if msg.reaction.is_some() {
        TranscriptKind::Reaction
    } else if msg.remote_delete.is_some() {
        TranscriptKind::RemoteDelete
    } else if msg.is_media() || msg.view_once {
        TranscriptKind::Media
    } else if msg.body.is_some() {
        TranscriptKind::Text
    } else {
        TranscriptKind::Empty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Sent,
    Request,
    Read,
    ViewOnceOpen,
    Verified,
    StickerPackOperations,
    Configuration,
    BlockedList,
    FetchLatest,
    MessageRequestResponse,
    OutgoingPayment,
    Unknown,
}

pub fn classify_sync(sync: &SyncMessage) -> SyncKind {
    if sync.sent.is_some() {
        SyncKind::Sent
    } else if sync.request.is_some() {
        SyncKind::Request
    } else if !sync.read.is_empty() {
        SyncKind::Read
    } else if sync.view_once_open.is_some() {
        SyncKind::ViewOnceOpen
    } else if sync.verified.is_some() {
        SyncKind::Verified
    } else if !sync.sticker_pack_operations.is_empty() {
        SyncKind::StickerPackOperations
    } else if sync.configuration.is_some() {
        SyncKind::Configuration
    } else if sync.blocked_list.is_some() {
        SyncKind::BlockedList
    } else if sync.fetch_type.is_some() {
        SyncKind::FetchLatest
    } else if sync.message_request_response.is_some() {
        SyncKind::MessageRequestResponse
    } else if sync.outgoing_payment.is_some() {
        SyncKind::OutgoingPayment
    } else {
        SyncKind::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Offer,
    Answer,
    IceUpdate,
    Hangup,
    Busy,
    Opaque,
    Unknown,
}

pub fn classify_call(call: &CallMessage) -> CallKind {
    if call.offer.is_some() {
        CallKind::Offer
    } else if call.answer.is_some() {
        CallKind::Answer
    } else if !call.ice_updates.is_empty() {
        CallKind::IceUpdate
    } else if call.hangup.is_some() {
        CallKind::Hangup
    } else if call.busy.is_some() {
        CallKind::Busy
    } else if call.opaque.is_some() {
        CallKind::Opaque
    } else {
        CallKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address::ServiceAddress;
    use crate::types::envelope::{AttachmentPointer, Reaction, RemoteDelete};
    use crate::types::group::{GroupContext, GroupContextV1, GroupV1Kind};

    fn reaction() -> Reaction {
        Reaction {
            emoji: "❤".into(),
            remove: false,
            target_author: ServiceAddress::from_uuid("a"),
            target_sent_timestamp: 1,
        }
    }

    fn image() -> AttachmentPointer {
        AttachmentPointer {
            content_type: "image/png".into(),
            ..Default::default()
        }
    }

    #[test]
    fn reaction_wins_over_body() {
        let msg = DataMessage {
            body: Some("also text".into()),
            reaction: Some(reaction()),
            ..Default::default()
        };
        assert_eq!(classify_data(&msg), DataKind::Reaction);
    }

    #[test]
    fn remote_delete_wins_over_media() {
        let msg = DataMessage {
            attachments: vec![image()],
            remote_delete: Some(RemoteDelete { target_sent_timestamp: 5 }),
            ..Default::default()
        };
        assert_eq!(classify_data(&msg), DataKind::RemoteDelete);
    }

    #[test]
    fn invalid_view_once_beats_everything() {
        let msg = DataMessage {
            view_once: true,
            end_session: true,
            attachments: vec![image(), image()],
            ..Default::default()
        };
        assert_eq!(classify_data(&msg), DataKind::Invalid);

        let audio = DataMessage {
            view_once: true,
            attachments: vec![AttachmentPointer {
                content_type: "audio/aac".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(classify_data(&audio), DataKind::Invalid);

        let ok = DataMessage {
            view_once: true,
            attachments: vec![image()],
            ..Default::default()
        };
        assert_eq!(classify_data(&ok), DataKind::Media);
    }

    #[test]
    fn v1_deliver_is_not_an_update() {
        let mut ctx = GroupContextV1 {
            id: vec![1; 16],
            kind: GroupV1Kind::Deliver,
            ..Default::default()
        };
        let msg = DataMessage {
            group: Some(GroupContext::V1(ctx.clone())),
            body: Some("hi".into()),
            ..Default::default()
        };
        assert_eq!(classify_data(&msg), DataKind::Text);

        ctx.kind = GroupV1Kind::Quit;
        let quit = DataMessage {
            group: Some(GroupContext::V1(ctx)),
            body: Some("bye".into()),
            ..Default::default()
        };
        assert_eq!(classify_data(&quit), DataKind::GroupV1Update);
    }

    #[test]
    fn empty_payload_is_empty() {
        assert_eq!(classify_data(&DataMessage::default()), DataKind::Empty);
        assert_eq!(classify_sync(&SyncMessage::default()), SyncKind::Unknown);
        assert_eq!(classify_call(&CallMessage::default()), CallKind::Unknown);
    }

    #[test]
    fn transcript_recipient_update_first() {
        let sent = SentTranscript {
            is_recipient_update: true,
            message: DataMessage {
                end_session: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(classify_transcript(&sent), TranscriptKind::RecipientUpdate);
    }
}
