use crate::error::GroupError;
use async_trait::async_trait;
use ingestcore::types::group::DecryptedGroup;

/// Authoritative source of V2 group state.
#[async_trait]
pub trait GroupService: Send + Sync {
    /// Fetch the decrypted group state at `revision` or later.
    ///
    /// Implementations return [`GroupError::NotAMember`] when the server
    /// refuses the local user.
    async fn fetch_group_state(&self, master_key: &[u8], revision: u32) -> Result<DecryptedGroup, GroupError>;
}

/// Used when no group service is configured: every fetch fails, so V2
/// messages that need server state are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableGroupService;

#[async_trait]
impl GroupService for UnavailableGroupService {
    async fn fetch_group_state(&self, _master_key: &[u8], revision: u32) -> Result<DecryptedGroup, GroupError> {
        Err(GroupError::Service(anyhow::anyhow!(
            "no group service configured, cannot fetch revision {revision}"
        )))
    }
}
