use std::collections::HashSet;

use async_trait::async_trait;
use futures::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tracing::debug;

use crate::{ChosenDB, Pool, error::Result, timed};

pub const MOVIES_READ: &str = "movies:read";
pub const MOVIES_WRITE: &str = "movies:write";

/// Permission codes held by one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Extend<String> for Permissions {
    fn extend<T: IntoIterator<Item = String>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Permissions of the user, empty if there are none.
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions>;
    /// Grants `codes` to the user. Codes missing from the catalog are skipped.
    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()>;
}

pub type PermissionRepository = PermissionRepositoryImpl<Pool>;

pub struct PermissionRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> PermissionRepositoryImpl<E>
where
    for<'a> &'a E: sqlx::Executor<'c, Database = ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions> {
        timed(async {
            let permissions = sqlx::query_scalar::<_, String>(
                "SELECT p.code FROM permissions p \
                 INNER JOIN user_permissions up ON p.id = up.permission_id \
                 WHERE up.user_id = ?",
            )
            .bind(user_id)
            .fetch(&self.executor)
            .try_collect::<Permissions>()
            .await?;
            Ok(permissions)
        })
        .await
    }

    pub async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()> {
        let res = timed(async {
            let res = sqlx::query(
                "INSERT INTO user_permissions (user_id, permission_id) \
                 SELECT ?, p.id FROM permissions p WHERE p.code IN (SELECT value FROM json_each(?)) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(Json(codes))
            .execute(&self.executor)
            .await?;
            Ok(res)
        })
        .await?;
        debug!(
            "Granted {} new permission(s) to user {user_id}",
            res.rows_affected()
        );
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for PermissionRepository {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions> {
        PermissionRepositoryImpl::get_all_for_user(self, user_id).await
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()> {
        PermissionRepositoryImpl::add_for_user(self, user_id, codes).await
    }
}
