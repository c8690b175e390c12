use ingestcore::store::{FailureMarker, MessageKey};
use serde::Serialize;

/// What happened to one message. Everything except a storage failure is
/// reported here rather than as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "detail", rename_all = "snake_case")]
pub enum Disposition {
    /// State changed.
    Applied,
    /// Already applied, or a no-op by rule.
    Unchanged,
    /// A placeholder row now stands in for the message.
    Placeholder(FailureMarker),
    DropSilently(DropReason),
    /// Nothing stored, but the group's state was requested from the sender.
    DropWithRequest,
    /// Parked until the message it refers to arrives.
    Deferred(MessageKey),
    RejectInvalid(RejectReason),
}

impl Disposition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Disposition::Applied | Disposition::Placeholder(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    BlockedSender,
    BlockedConversation,
    InactiveGroup,
    StaleGroupV1Update,
    UnknownGroup,
    NotAGroupMember,
    SenderNotInGroup,
    GroupStateUnavailable,
    BadGroupContext,
    GroupV2Timer,
    ReceiptsDisabled,
    TypingDisabled,
    NoThread,
    WrongDevice,
    TargetMissing,
    TargetRemoteDeleted,
    NoContent,
    NothingToDo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingSender,
    InvalidReactionEmoji,
    InvalidReactionTarget,
    InvalidRemoteDelete,
    MalformedQuote,
    MalformedSticker,
    MissingPaymentNotification,
    InvalidGroupCallUpdate,
    RecipientUpdateForNonGroup,
    RecipientUpdateWithoutMessage,
    TranscriptWithoutDestination,
    MissingThreadRecipient,
    SyncFromOtherAccount,
}
