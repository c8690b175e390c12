use serde::{Deserialize, Serialize};

/// Call signaling carried in a message. At most one primary part is
/// expected, but parts are checked in a fixed order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallMessage {
    pub offer: Option<OfferMessage>,
    pub answer: Option<AnswerMessage>,
    pub ice_updates: Vec<IceUpdateMessage>,
    pub hangup: Option<HangupMessage>,
    pub busy: Option<BusyMessage>,
    pub opaque: Option<OpaqueMessage>,
    pub multi_ring: bool,
    pub destination_device_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    #[default]
    Audio,
    Video,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferMessage {
    pub id: u64,
    pub sdp: Option<String>,
    pub opaque: Option<Vec<u8>>,
    pub kind: OfferKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerMessage {
    pub id: u64,
    pub sdp: Option<String>,
    pub opaque: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceUpdateMessage {
    pub id: u64,
    pub sdp: Option<String>,
    pub opaque: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupKind {
    #[default]
    Normal,
    Accepted,
    Declined,
    Busy,
    NeedPermission,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HangupMessage {
    pub id: u64,
    pub kind: HangupKind,
    pub device_id: u32,
    pub legacy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusyMessage {
    pub id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpaqueMessage {
    pub data: Vec<u8>,
}
