use crate::proto;
use crate::types::address::ServiceAddress;
use crate::types::envelope::AttachmentPointer;
use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use hkdf::Hkdf;
use prost::Message as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub const GROUP_V1_ID_LEN: usize = 16;
pub const GROUP_V2_ID_LEN: usize = 32;
pub const MASTER_KEY_LEN: usize = 32;

const V1_PREFIX: &str = "__textsecure_group__!";
const V2_PREFIX: &str = "__signal_group__v2__!";
const MIGRATION_INFO: &[u8] = b"GV2 Migration";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupContextError {
    #[error("invalid group id length {0}")]
    InvalidGroupId(usize),
    #[error("invalid master key length {0}")]
    InvalidMasterKey(usize),
    #[error("group change revision {got} does not follow local revision {local}")]
    RevisionGap { local: u32, got: u32 },
    #[error("undecodable group context: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupId {
    V1(Vec<u8>),
    V2(Vec<u8>),
}

impl GroupId {
    pub fn v1(bytes: &[u8]) -> Result<Self, GroupContextError> {
        if bytes.len() != GROUP_V1_ID_LEN {
            return Err(GroupContextError::InvalidGroupId(bytes.len()));
        }
        Ok(GroupId::V1(bytes.to_vec()))
    }

    pub fn v2_from_master_key(master_key: &[u8]) -> Result<Self, GroupContextError> {
        if master_key.len() != MASTER_KEY_LEN {
            return Err(GroupContextError::InvalidMasterKey(master_key.len()));
        }
        Ok(GroupId::V2(Sha256::digest(master_key).to_vec()))
    }

    /// Guess the version from the raw id length, as carried by typing and
    /// blocked-list payloads.
    pub fn from_raw(bytes: &[u8]) -> Result<Self, GroupContextError> {
        match bytes.len() {
            GROUP_V1_ID_LEN => Ok(GroupId::V1(bytes.to_vec())),
            GROUP_V2_ID_LEN => Ok(GroupId::V2(bytes.to_vec())),
            other => Err(GroupContextError::InvalidGroupId(other)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            GroupId::V1(b) | GroupId::V2(b) => b,
        }
    }

    pub fn is_v1(&self) -> bool {
        matches!(self, GroupId::V1(_))
    }

    pub fn is_v2(&self) -> bool {
        matches!(self, GroupId::V2(_))
    }

    /// Master key a V1 group gets when it is migrated to V2.
    pub fn derive_v2_migration_master_key(&self) -> Option<[u8; MASTER_KEY_LEN]> {
        let GroupId::V1(bytes) = self else {
            return None;
        };
        let hk = Hkdf::<Sha256>::new(None, bytes);
        let mut okm = [0u8; MASTER_KEY_LEN];
        hk.expand(MIGRATION_INFO, &mut okm).ok()?;
        Some(okm)
    }

    pub fn derive_v2_migration_group_id(&self) -> Option<GroupId> {
        let key = self.derive_v2_migration_master_key()?;
        GroupId::v2_from_master_key(&key).ok()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::V1(b) => write!(f, "{V1_PREFIX}{}", hex::encode(b)),
            GroupId::V2(b) => write!(f, "{V2_PREFIX}{}", hex::encode(b)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupContext {
    V1(GroupContextV1),
    V2(GroupContextV2),
}

impl GroupContext {
    pub fn group_id(&self) -> Result<GroupId, GroupContextError> {
        match self {
            GroupContext::V1(ctx) => GroupId::v1(&ctx.id),
            GroupContext::V2(ctx) => GroupId::v2_from_master_key(&ctx.master_key),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupV1Kind {
    #[default]
    Unknown,
    Update,
    Deliver,
    Quit,
    RequestInfo,
}

impl GroupV1Kind {
    fn to_wire(self) -> i32 {
        match self {
            GroupV1Kind::Unknown => 0,
            GroupV1Kind::Update => 1,
            GroupV1Kind::Deliver => 2,
            GroupV1Kind::Quit => 3,
            GroupV1Kind::RequestInfo => 4,
        }
    }

    fn from_wire(value: i32) -> Self {
        match value {
            1 => GroupV1Kind::Update,
            2 => GroupV1Kind::Deliver,
            3 => GroupV1Kind::Quit,
            4 => GroupV1Kind::RequestInfo,
            _ => GroupV1Kind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupContextV1 {
    pub id: Vec<u8>,
    pub kind: GroupV1Kind,
    pub name: Option<String>,
    pub members: Vec<ServiceAddress>,
    pub avatar: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupContextV2 {
    pub master_key: Vec<u8>,
    pub revision: u32,
    pub signed_change: Option<GroupChange>,
}

/// A decrypted group change, applicable on top of the state at `revision - 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupChange {
    pub revision: u32,
    pub editor: Option<ServiceAddress>,
    pub new_members: Vec<ServiceAddress>,
    pub deleted_members: Vec<ServiceAddress>,
    pub new_pending_members: Vec<ServiceAddress>,
    pub deleted_pending_members: Vec<ServiceAddress>,
    pub promoted_pending_members: Vec<ServiceAddress>,
    pub new_title: Option<String>,
    pub new_timer_seconds: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptedGroup {
    pub title: String,
    pub revision: u32,
    pub members: Vec<ServiceAddress>,
    pub pending_members: Vec<ServiceAddress>,
    pub disappearing_timer_seconds: u32,
}

fn contains(list: &[ServiceAddress], who: &ServiceAddress) -> bool {
    list.iter().any(|m| m.matches(who))
}

impl DecryptedGroup {
    pub fn is_member(&self, who: &ServiceAddress) -> bool {
        contains(&self.members, who)
    }

    pub fn is_pending(&self, who: &ServiceAddress) -> bool {
        contains(&self.pending_members, who)
    }

    pub fn apply_change(&self, change: &GroupChange) -> Result<DecryptedGroup, GroupContextError> {
        if change.revision != self.revision + 1 {
            return Err(GroupContextError::RevisionGap {
                local: self.revision,
                got: change.revision,
            });
        }

        let mut next = self.clone();
        next.revision = change.revision;
        next.members.retain(|m| !contains(&change.deleted_members, m));
        next.pending_members
            .retain(|m| !contains(&change.deleted_pending_members, m) && !contains(&change.promoted_pending_members, m));

        for added in change.new_members.iter().chain(&change.promoted_pending_members) {
            if !contains(&next.members, added) {
                next.members.push(added.clone());
            }
        }
        for pending in &change.new_pending_members {
            if !contains(&next.pending_members, pending) {
                next.pending_members.push(pending.clone());
            }
        }
        if let Some(title) = &change.new_title {
            next.title = title.clone();
        }
        if let Some(timer) = change.new_timer_seconds {
            next.disappearing_timer_seconds = timer;
        }
        Ok(next)
    }
}

/// Serialized group context as stored on a group-update row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedGroupContext {
    pub encoded: String,
    pub v2: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupV2Properties {
    pub master_key: Vec<u8>,
    pub revision: u32,
    pub group_state: DecryptedGroup,
    pub change: Option<GroupChange>,
}

impl GroupV2Properties {
    pub fn active_members(&self) -> &[ServiceAddress] {
        &self.group_state.members
    }

    pub fn pending_members(&self) -> &[ServiceAddress] {
        &self.group_state.pending_members
    }

    pub fn removed_members(&self) -> &[ServiceAddress] {
        self.change
            .as_ref()
            .map(|c| c.deleted_members.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupProperties {
    V1(GroupContextV1),
    V2(GroupV2Properties),
}

/// The group context attached to a stored group-update message, in both its
/// persisted (base64 protobuf) and parsed forms.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroupContext {
    encoded: String,
    properties: GroupProperties,
}

impl MessageGroupContext {
    pub fn from_v1(ctx: &GroupContextV1) -> Self {
        let wire = proto::GroupContext {
            id: Some(ctx.id.clone()),
            r#type: Some(ctx.kind.to_wire()),
            name: ctx.name.clone(),
            members: ctx.members.iter().map(member_to_wire).collect(),
        };
        Self {
            encoded: BASE64_STANDARD.encode(wire.encode_to_vec()),
            properties: GroupProperties::V1(ctx.clone()),
        }
    }

    pub fn from_v2(master_key: &[u8], group_state: &DecryptedGroup, change: Option<&GroupChange>) -> Self {
        let wire = proto::DecryptedGroupV2Context {
            context: Some(proto::GroupContextV2 {
                master_key: Some(master_key.to_vec()),
                revision: Some(group_state.revision),
            }),
            change: change.map(change_to_wire),
            group_state: Some(group_to_wire(group_state)),
        };
        Self {
            encoded: BASE64_STANDARD.encode(wire.encode_to_vec()),
            properties: GroupProperties::V2(GroupV2Properties {
                master_key: master_key.to_vec(),
                revision: group_state.revision,
                group_state: group_state.clone(),
                change: change.cloned(),
            }),
        }
    }

    pub fn decode(stored: &EncodedGroupContext) -> Result<Self, GroupContextError> {
        let bytes = BASE64_STANDARD
            .decode(&stored.encoded)
            .map_err(|e| GroupContextError::Decode(e.to_string()))?;
        let properties = if stored.v2 {
            let wire = proto::DecryptedGroupV2Context::decode(bytes.as_slice())
                .map_err(|e| GroupContextError::Decode(e.to_string()))?;
            let context = wire.context.unwrap_or_default();
            let group_state = wire.group_state.map(group_from_wire).unwrap_or_default();
            GroupProperties::V2(GroupV2Properties {
                master_key: context.master_key.unwrap_or_default(),
                revision: context.revision.unwrap_or(group_state.revision),
                group_state,
                change: wire.change.map(change_from_wire),
            })
        } else {
            let wire = proto::GroupContext::decode(bytes.as_slice())
                .map_err(|e| GroupContextError::Decode(e.to_string()))?;
            GroupProperties::V1(GroupContextV1 {
                id: wire.id.unwrap_or_default(),
                kind: GroupV1Kind::from_wire(wire.r#type.unwrap_or_default()),
                name: wire.name,
                members: wire.members.into_iter().map(member_from_wire).collect(),
                avatar: None,
            })
        };
        Ok(Self {
            encoded: stored.encoded.clone(),
            properties,
        })
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn to_stored(&self) -> EncodedGroupContext {
        EncodedGroupContext {
            encoded: self.encoded.clone(),
            v2: self.is_v2(),
        }
    }

    pub fn is_v2(&self) -> bool {
        matches!(self.properties, GroupProperties::V2(_))
    }

    pub fn properties(&self) -> &GroupProperties {
        &self.properties
    }

    pub fn v2(&self) -> Option<&GroupV2Properties> {
        match &self.properties {
            GroupProperties::V2(p) => Some(p),
            GroupProperties::V1(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match &self.properties {
            GroupProperties::V1(ctx) => ctx.name.as_deref().unwrap_or_default(),
            GroupProperties::V2(p) => &p.group_state.title,
        }
    }

    pub fn is_update(&self) -> bool {
        match &self.properties {
            GroupProperties::V1(ctx) => ctx.kind == GroupV1Kind::Update,
            GroupProperties::V2(_) => true,
        }
    }

    pub fn is_quit(&self) -> bool {
        matches!(&self.properties, GroupProperties::V1(ctx) if ctx.kind == GroupV1Kind::Quit)
    }

    /// Members named by the context other than `me`.
    pub fn members_excluding(&self, me: &ServiceAddress) -> Vec<ServiceAddress> {
        let members = match &self.properties {
            GroupProperties::V1(ctx) => &ctx.members,
            GroupProperties::V2(p) => &p.group_state.members,
        };
        members.iter().filter(|m| !m.matches(me)).cloned().collect()
    }
}

fn member_to_wire(address: &ServiceAddress) -> proto::GroupMember {
    proto::GroupMember {
        uuid: address.uuid.clone(),
        e164: address.e164.clone(),
    }
}

fn member_from_wire(member: proto::GroupMember) -> ServiceAddress {
    ServiceAddress {
        uuid: member.uuid,
        e164: member.e164,
    }
}

fn members_to_wire(list: &[ServiceAddress]) -> Vec<proto::GroupMember> {
    list.iter().map(member_to_wire).collect()
}

fn members_from_wire(list: Vec<proto::GroupMember>) -> Vec<ServiceAddress> {
    list.into_iter().map(member_from_wire).collect()
}

fn group_to_wire(group: &DecryptedGroup) -> proto::DecryptedGroup {
    proto::DecryptedGroup {
        title: group.title.clone(),
        revision: group.revision,
        members: members_to_wire(&group.members),
        pending_members: members_to_wire(&group.pending_members),
        disappearing_timer_seconds: group.disappearing_timer_seconds,
    }
}

fn group_from_wire(group: proto::DecryptedGroup) -> DecryptedGroup {
    DecryptedGroup {
        title: group.title,
        revision: group.revision,
        members: members_from_wire(group.members),
        pending_members: members_from_wire(group.pending_members),
        disappearing_timer_seconds: group.disappearing_timer_seconds,
    }
}

fn change_to_wire(change: &GroupChange) -> proto::DecryptedGroupChange {
    proto::DecryptedGroupChange {
        editor: change.editor.as_ref().map(member_to_wire),
        revision: change.revision,
        new_members: members_to_wire(&change.new_members),
        deleted_members: members_to_wire(&change.deleted_members),
        new_pending_members: members_to_wire(&change.new_pending_members),
        deleted_pending_members: members_to_wire(&change.deleted_pending_members),
        promote_pending_members: members_to_wire(&change.promoted_pending_members),
        new_title: change.new_title.clone(),
        new_timer_seconds: change.new_timer_seconds,
    }
}

fn change_from_wire(change: proto::DecryptedGroupChange) -> GroupChange {
    GroupChange {
        revision: change.revision,
        editor: change.editor.map(member_from_wire),
        new_members: members_from_wire(change.new_members),
        deleted_members: members_from_wire(change.deleted_members),
        new_pending_members: members_from_wire(change.new_pending_members),
        deleted_pending_members: members_from_wire(change.deleted_pending_members),
        promoted_pending_members: members_from_wire(change.promote_pending_members),
        new_title: change.new_title,
        new_timer_seconds: change.new_timer_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(uuid: &str) -> ServiceAddress {
        ServiceAddress::from_uuid(uuid)
    }

    #[test]
    fn group_id_lengths_are_enforced() {
        assert!(GroupId::v1(&[1; 16]).is_ok());
        assert_eq!(GroupId::v1(&[1; 15]), Err(GroupContextError::InvalidGroupId(15)));
        assert_eq!(
            GroupId::v2_from_master_key(&[1; 16]),
            Err(GroupContextError::InvalidMasterKey(16))
        );
        assert!(GroupId::from_raw(&[0; 32]).unwrap().is_v2());
    }

    #[test]
    fn migration_derivation_is_stable_and_v1_only() {
        let v1 = GroupId::v1(&[9; 16]).unwrap();
        let first = v1.derive_v2_migration_group_id().unwrap();
        let second = v1.derive_v2_migration_group_id().unwrap();
        assert_eq!(first, second);
        assert!(first.is_v2());

        let master_key = v1.derive_v2_migration_master_key().unwrap();
        assert_eq!(GroupId::v2_from_master_key(&master_key).unwrap(), first);
        assert!(first.derive_v2_migration_master_key().is_none());
    }

    #[test]
    fn apply_change_requires_next_revision() {
        let group = DecryptedGroup {
            title: "team".into(),
            revision: 4,
            members: vec![addr("a"), addr("b")],
            ..Default::default()
        };
        let change = GroupChange {
            revision: 5,
            new_members: vec![addr("c")],
            deleted_members: vec![addr("b")],
            new_title: Some("renamed".into()),
            ..Default::default()
        };
        let next = group.apply_change(&change).unwrap();
        assert_eq!(next.revision, 5);
        assert_eq!(next.title, "renamed");
        assert!(next.is_member(&addr("c")));
        assert!(!next.is_member(&addr("b")));

        let skip = GroupChange {
            revision: 7,
            ..Default::default()
        };
        assert_eq!(
            group.apply_change(&skip),
            Err(GroupContextError::RevisionGap { local: 4, got: 7 })
        );
    }

    #[test]
    fn stored_context_decodes_back() {
        let v1 = GroupContextV1 {
            id: vec![3; 16],
            kind: GroupV1Kind::Quit,
            name: Some("old".into()),
            members: vec![addr("a")],
            avatar: None,
        };
        let ctx = MessageGroupContext::from_v1(&v1);
        let decoded = MessageGroupContext::decode(&ctx.to_stored()).unwrap();
        assert!(decoded.is_quit());
        assert_eq!(decoded.name(), "old");

        let state = DecryptedGroup {
            title: "v2".into(),
            revision: 2,
            members: vec![addr("me"), addr("x")],
            ..Default::default()
        };
        let change = GroupChange {
            revision: 2,
            deleted_members: vec![addr("y")],
            ..Default::default()
        };
        let ctx = MessageGroupContext::from_v2(&[1; 32], &state, Some(&change));
        let decoded = MessageGroupContext::decode(&ctx.to_stored()).unwrap();
        let props = decoded.v2().unwrap();
        assert_eq!(props.removed_members(), &[addr("y")]);
        assert_eq!(decoded.members_excluding(&addr("me")), vec![addr("x")]);
    }
}
