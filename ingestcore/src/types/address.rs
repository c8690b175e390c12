use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote (or local) account as seen on the wire.
///
/// Either identifier may be missing; two addresses refer to the same account
/// when they share at least one identifier, which is what [`matches`] checks.
/// The derived `==` and `Hash` compare both fields exactly, so a uuid-only
/// address is not equal to the full address of the same account.
///
/// [`matches`]: ServiceAddress::matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAddress {
    pub uuid: Option<String>,
    pub e164: Option<String>,
}

impl ServiceAddress {
    pub fn from_uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            e164: None,
        }
    }

    pub fn from_e164(e164: impl Into<String>) -> Self {
        Self {
            uuid: None,
            e164: Some(e164.into()),
        }
    }

    pub fn new(uuid: impl Into<String>, e164: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            e164: Some(e164.into()),
        }
    }

    /// The preferred identifier: uuid when known, otherwise the phone number.
    pub fn identifier(&self) -> &str {
        self.uuid
            .as_deref()
            .or(self.e164.as_deref())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.uuid.is_none() && self.e164.is_none()
    }

    pub fn matches(&self, other: &ServiceAddress) -> bool {
        let uuid_match = matches!((&self.uuid, &other.uuid), (Some(a), Some(b)) if a.eq_ignore_ascii_case(b));
        let e164_match = matches!((&self.e164, &other.e164), (Some(a), Some(b)) if a == b);
        uuid_match || e164_match
    }

    pub fn has_identifier(&self, identifier: &str) -> bool {
        self.uuid
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(identifier))
            || self.e164.as_deref() == Some(identifier)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.uuid, &self.e164) {
            (Some(uuid), _) => write!(f, "{uuid}"),
            (None, Some(e164)) => write!(f, "{e164}"),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

macro_rules! local_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

local_id!(
    /// Local row id of a person or group conversation partner.
    RecipientId
);
local_id!(ThreadId);
local_id!(MessageId);
local_id!(AttachmentId);
