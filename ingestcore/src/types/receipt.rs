use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    #[default]
    Unknown,
    Delivery,
    Read,
    Viewed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptMessage {
    pub kind: ReceiptKind,
    /// Sent timestamps of the messages being acknowledged.
    pub timestamps: Vec<u64>,
    pub when: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingAction {
    #[default]
    Started,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingMessage {
    pub action: TypingAction,
    pub timestamp: u64,
    pub group_id: Option<Vec<u8>>,
}
