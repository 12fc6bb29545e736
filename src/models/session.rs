//! Session Record persistence
//!
//! One row per live login, keyed by token digest, with a unique `user_id`.
//! Login replaces any prior row for the user in a single upsert statement,
//! so concurrent logins for the same user leave exactly one row behind.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveValue::Set, EntityTrait, QueryFilter};

use crate::database::{DatabaseError, DatabasePool};
use crate::entities::sessions::{ActiveModel, Column, Entity};

/// Backing store for revocable sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record `token_hash` as the only live session of `user_id`
    async fn replace(&self, user_id: i64, token_hash: &str) -> Result<(), DatabaseError>;

    /// Whether `token_hash` is a live session
    async fn exists(&self, token_hash: &str) -> Result<bool, DatabaseError>;

    /// Bump `last_activity`; returns false when the row is gone
    async fn touch(&self, token_hash: &str) -> Result<bool, DatabaseError>;

    /// Delete the session; returns false when it was already gone
    async fn revoke(&self, token_hash: &str) -> Result<bool, DatabaseError>;

    /// Delete sessions idle for longer than `max_idle`, returning how many
    async fn prune_idle(&self, max_idle: Duration) -> Result<u64, DatabaseError>;
}

/// SQL-backed store; lookups go through the `simple` breaker, mutations
/// through `write`
#[derive(Clone, Debug)]
pub struct DatabaseSessionStore {
    pool: DatabasePool,
}

impl DatabaseSessionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for DatabaseSessionStore {
    #[tracing::instrument(skip(self, token_hash))]
    async fn replace(&self, user_id: i64, token_hash: &str) -> Result<(), DatabaseError> {
        let session = ActiveModel {
            token_hash: Set(token_hash.to_string()),
            user_id: Set(user_id),
            last_activity: Set(Utc::now()),
        };

        self.pool
            .write(|db| async move {
                Entity::insert(session)
                    .on_conflict(
                        OnConflict::column(Column::UserId)
                            .update_columns([Column::TokenHash, Column::LastActivity])
                            .to_owned(),
                    )
                    .exec_without_returning(&db)
                    .await
            })
            .await?;

        tracing::debug!(user_id, "Session recorded");
        Ok(())
    }

    async fn exists(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let token_hash = token_hash.to_string();
        let session = self
            .pool
            .simple(|db| async move { Entity::find_by_id(token_hash).one(&db).await })
            .await?;

        Ok(session.is_some())
    }

    async fn touch(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let token_hash = token_hash.to_string();
        let result = self
            .pool
            .write(|db| async move {
                Entity::update_many()
                    .col_expr(Column::LastActivity, Expr::value(Utc::now()))
                    .filter(Column::TokenHash.eq(token_hash))
                    .exec(&db)
                    .await
            })
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let token_hash = token_hash.to_string();
        let result = self
            .pool
            .write(|db| async move { Entity::delete_by_id(token_hash).exec(&db).await })
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn prune_idle(&self, max_idle: Duration) -> Result<u64, DatabaseError> {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_idle)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let result = self
            .pool
            .write(|db| async move {
                Entity::delete_many()
                    .filter(Column::LastActivity.lt(cutoff))
                    .exec(&db)
                    .await
            })
            .await?;

        Ok(result.rows_affected)
    }
}
