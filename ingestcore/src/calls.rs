//! Hand-off points to the calling subsystem. Ingestion only demultiplexes
//! call signaling; the sink owns call state.

use crate::types::address::{RecipientId, ServiceAddress};
use crate::types::call::{HangupKind, OfferKind};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct CallPeer {
    pub recipient: RecipientId,
    pub address: ServiceAddress,
    pub device: u32,
    pub call_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Offer {
        peer: CallPeer,
        kind: OfferKind,
        sdp: Option<String>,
        opaque: Option<Vec<u8>>,
        remote_identity_key: Option<Vec<u8>>,
        server_received_timestamp: u64,
        server_delivered_timestamp: u64,
        multi_ring: bool,
    },
    Answer {
        peer: CallPeer,
        sdp: Option<String>,
        opaque: Option<Vec<u8>>,
        remote_identity_key: Option<Vec<u8>>,
        multi_ring: bool,
    },
    IceCandidates {
        peer: CallPeer,
        candidates: Vec<Vec<u8>>,
    },
    Hangup {
        peer: CallPeer,
        kind: HangupKind,
        device_id: u32,
        legacy: bool,
    },
    Busy {
        peer: CallPeer,
    },
    Opaque {
        sender: RecipientId,
        sender_uuid: Option<String>,
        device: u32,
        data: Vec<u8>,
        /// Seconds the message spent on the server, zero when unknown.
        message_age_secs: u64,
    },
}

#[async_trait]
pub trait CallSessionSink: Send + Sync {
    async fn call_event(&self, event: CallEvent);
}
