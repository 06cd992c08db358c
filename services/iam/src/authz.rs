//! Permission checks for authenticated subjects
//!
//! Every answer comes straight from the [`PermissionGraph`]. Nothing is
//! cached here, so a committed role or assignment edit is visible to the
//! next check.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{IamError, IamResult};
use crate::models::Permission;
use crate::repositories::PermissionGraph;
use crate::subject::AuthenticatedSubject;

#[derive(Clone)]
pub struct AuthorizationEngine {
    graph: Arc<dyn PermissionGraph>,
}

impl AuthorizationEngine {
    pub fn new(graph: Arc<dyn PermissionGraph>) -> Self {
        Self { graph }
    }

    /// Effective active permissions of a user, ordered by sort key then id.
    ///
    /// A user without a role, or whose role has no assignments, gets an
    /// empty list.
    pub async fn permissions_of(&self, user_id: i64) -> IamResult<Vec<Permission>> {
        self.graph.permissions_of_user(user_id).await
    }

    /// Codes of [`Self::permissions_of`], in the same order
    pub async fn permission_codes(&self, user_id: i64) -> IamResult<Vec<String>> {
        Ok(self
            .permissions_of(user_id)
            .await?
            .into_iter()
            .map(|permission| permission.code)
            .collect())
    }

    pub async fn has_permission(&self, user_id: i64, code: &str) -> IamResult<bool> {
        self.graph.has_permission(user_id, code).await
    }

    /// Fail with `Forbidden` unless the subject holds `code`.
    pub async fn authorize(&self, subject: &AuthenticatedSubject, code: &str) -> IamResult<()> {
        if self.has_permission(subject.user_id, code).await? {
            debug!("User {} granted '{}'", subject.user_id, code);
            Ok(())
        } else {
            info!("User {} denied '{}'", subject.user_id, code);
            Err(IamError::Forbidden(code.to_string()))
        }
    }
}
