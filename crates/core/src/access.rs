//! Allow-list guard composed explicitly around pipeline calls.

use crate::error::AccessDenied;
use std::collections::HashSet;
use std::future::Future;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthRole {
    Query,
    Ingest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    pub users: HashSet<i64>,
    pub groups: HashSet<i64>,
}

impl AllowList {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub query: AllowList,
    pub ingest: AllowList,
}

/// Who is asking. Unknown identities are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
}

impl AccessPolicy {
    fn list(&self, role: AuthRole) -> &AllowList {
        match role {
            AuthRole::Query => &self.query,
            AuthRole::Ingest => &self.ingest,
        }
    }

    /// An empty allow-list for the role admits everyone.
    pub fn check_access(&self, user_id: i64, chat_id: i64, role: AuthRole) -> bool {
        let list = self.list(role);
        list.is_empty() || list.users.contains(&user_id) || list.groups.contains(&chat_id)
    }

    pub fn authorize(&self, requester: Requester, role: AuthRole) -> Result<(), AccessDenied> {
        let (Some(user_id), Some(chat_id)) = (requester.user_id, requester.chat_id) else {
            return Ok(());
        };

        if self.check_access(user_id, chat_id, role) {
            Ok(())
        } else {
            warn!(user_id, chat_id, role = ?role, "unauthorized access attempt");
            Err(AccessDenied {
                role,
                user_id: Some(user_id),
                chat_id: Some(chat_id),
            })
        }
    }
}

/// Runs `call` only if `requester` may act in `role`.
pub async fn guarded<F, Fut, T>(
    policy: &AccessPolicy,
    requester: Requester,
    role: AuthRole,
    call: F,
) -> Result<T, AccessDenied>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    policy.authorize(requester, role)?;
    Ok(call().await)
}
