pub use ingestcore::calls::{CallEvent, CallPeer, CallSessionSink};

use async_trait::async_trait;
use log::info;

/// Default sink when no calling subsystem is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallSink;

#[async_trait]
impl CallSessionSink for LoggingCallSink {
    async fn call_event(&self, event: CallEvent) {
        match &event {
            CallEvent::Offer { peer, kind, .. } => {
                info!("Call offer {} ({kind:?}) from {}.{}", peer.call_id, peer.address, peer.device)
            }
            CallEvent::Answer { peer, .. } => info!("Call answer {} from {}", peer.call_id, peer.address),
            CallEvent::IceCandidates { peer, candidates } => info!(
                "{} ICE candidates for call {} from {}",
                candidates.len(),
                peer.call_id,
                peer.address
            ),
            CallEvent::Hangup { peer, kind, .. } => {
                info!("Call hangup {} ({kind:?}) from {}", peer.call_id, peer.address)
            }
            CallEvent::Busy { peer } => info!("Call busy {} from {}", peer.call_id, peer.address),
            CallEvent::Opaque { sender, data, .. } => {
                info!("Opaque call message ({} bytes) from {sender}", data.len())
            }
        }
    }
}
