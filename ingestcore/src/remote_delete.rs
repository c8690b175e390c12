use crate::store::records::MessageRecord;
use crate::types::address::RecipientId;

pub const DEFAULT_RECEIVE_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// A remote delete is honoured only from the target's own author, and only
/// while the server time of the delete is within `window_ms` of the target's.
pub fn is_valid_receive(
    target: &MessageRecord,
    deleter: RecipientId,
    self_id: RecipientId,
    server_received: u64,
    window_ms: u64,
) -> bool {
    let own_message = deleter == self_id && target.is_outgoing();
    let their_message = deleter != self_id && !target.is_outgoing();
    let same_author = target.author == deleter;
    let in_window = server_received.saturating_sub(target.server_timestamp) < window_ms;

    (own_message || their_message) && same_author && in_window
}
