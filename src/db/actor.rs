use crate::db::models::{DbAccount, DbInstallation, DbReviewRecord, InstallStatus, ReviewStatus};
use crate::db::ops::{AccountUpsert, InstallationUpsert, ReviewApply};
use crate::db::schema::SQLITE_INIT;
use crate::error::RevlinkError;
use chrono::{Duration as ChronoDuration, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::{str::FromStr, time::Duration};
use tracing::info;

#[derive(Debug)]
pub enum DbActorMessage {
    /// Create or refresh a linked account, returning the stored row.
    UpsertAccount(AccountUpsert, RpcReplyPort<Result<DbAccount, RevlinkError>>),

    /// Fetch an account by id.
    GetAccount(i64, RpcReplyPort<Result<Option<DbAccount>, RevlinkError>>),

    /// Fetch the installation for a (repository, account) pair.
    GetInstallation(
        i64,
        i64,
        RpcReplyPort<Result<Option<DbInstallation>, RevlinkError>>,
    ),

    /// Fetch the active installation for a repository, regardless of account.
    GetActiveInstallation(i64, RpcReplyPort<Result<Option<DbInstallation>, RevlinkError>>),

    /// Create or update an installation row.
    UpsertInstallation(
        InstallationUpsert,
        RpcReplyPort<Result<DbInstallation, RevlinkError>>,
    ),

    /// Remove an installation row (uninstall). Missing row is a no-op.
    DeleteInstallation(i64, i64, RpcReplyPort<Result<(), RevlinkError>>),

    /// List installations that are not active (reconciliation sweep input).
    ListStaleInstallations(RpcReplyPort<Result<Vec<DbInstallation>, RevlinkError>>),

    /// Fold a webhook-delivered fact into a review record.
    ApplyReview(ReviewApply, RpcReplyPort<Result<DbReviewRecord, RevlinkError>>),

    /// List review records for repositories installed by an account,
    /// newest first.
    ListReviews(i64, RpcReplyPort<Result<Vec<DbReviewRecord>, RevlinkError>>),
}

#[derive(Clone)]
pub struct DbHandle {
    actor: ActorRef<DbActorMessage>,
}

impl DbHandle {
    pub async fn upsert_account(&self, upsert: AccountUpsert) -> Result<DbAccount, RevlinkError> {
        ractor::call!(self.actor, DbActorMessage::UpsertAccount, upsert)
            .map_err(|e| RevlinkError::Ractor(format!("DbActor UpsertAccount RPC failed: {e}")))?
    }

    pub async fn get_account(&self, id: i64) -> Result<Option<DbAccount>, RevlinkError> {
        ractor::call!(self.actor, DbActorMessage::GetAccount, id)
            .map_err(|e| RevlinkError::Ractor(format!("DbActor GetAccount RPC failed: {e}")))?
    }

    pub async fn get_installation(
        &self,
        repository_id: i64,
        account_id: i64,
    ) -> Result<Option<DbInstallation>, RevlinkError> {
        ractor::call!(
            self.actor,
            DbActorMessage::GetInstallation,
            repository_id,
            account_id
        )
        .map_err(|e| RevlinkError::Ractor(format!("DbActor GetInstallation RPC failed: {e}")))?
    }

    pub async fn get_active_installation(
        &self,
        repository_id: i64,
    ) -> Result<Option<DbInstallation>, RevlinkError> {
        ractor::call!(
            self.actor,
            DbActorMessage::GetActiveInstallation,
            repository_id
        )
        .map_err(|e| {
            RevlinkError::Ractor(format!("DbActor GetActiveInstallation RPC failed: {e}"))
        })?
    }

    pub async fn upsert_installation(
        &self,
        upsert: InstallationUpsert,
    ) -> Result<DbInstallation, RevlinkError> {
        ractor::call!(self.actor, DbActorMessage::UpsertInstallation, upsert).map_err(|e| {
            RevlinkError::Ractor(format!("DbActor UpsertInstallation RPC failed: {e}"))
        })?
    }

    pub async fn delete_installation(
        &self,
        repository_id: i64,
        account_id: i64,
    ) -> Result<(), RevlinkError> {
        ractor::call!(
            self.actor,
            DbActorMessage::DeleteInstallation,
            repository_id,
            account_id
        )
        .map_err(|e| RevlinkError::Ractor(format!("DbActor DeleteInstallation RPC failed: {e}")))?
    }

    pub async fn list_stale_installations(&self) -> Result<Vec<DbInstallation>, RevlinkError> {
        ractor::call!(self.actor, DbActorMessage::ListStaleInstallations).map_err(|e| {
            RevlinkError::Ractor(format!("DbActor ListStaleInstallations RPC failed: {e}"))
        })?
    }

    pub async fn apply_review(&self, apply: ReviewApply) -> Result<DbReviewRecord, RevlinkError> {
        ractor::call!(self.actor, DbActorMessage::ApplyReview, apply)
            .map_err(|e| RevlinkError::Ractor(format!("DbActor ApplyReview RPC failed: {e}")))?
    }

    pub async fn list_reviews(&self, account_id: i64) -> Result<Vec<DbReviewRecord>, RevlinkError> {
        ractor::call!(self.actor, DbActorMessage::ListReviews, account_id)
            .map_err(|e| RevlinkError::Ractor(format!("DbActor ListReviews RPC failed: {e}")))?
    }
}

struct DbActorState {
    pool: SqlitePool,
}

struct DbActor;

#[ractor::async_trait]
impl Actor for DbActor {
    type Msg = DbActorMessage;
    type State = DbActorState;
    type Arguments = String;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        database_url: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db schema init failed: {e}")))?;

        info!("DbActor initialized");
        Ok(DbActorState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DbActorMessage::UpsertAccount(upsert, reply) => {
                let res = self.upsert_account(&state.pool, upsert).await;
                let _ = reply.send(res);
            }
            DbActorMessage::GetAccount(id, reply) => {
                let res = self.get_account(&state.pool, id).await;
                let _ = reply.send(res);
            }
            DbActorMessage::GetInstallation(repository_id, account_id, reply) => {
                let res = self
                    .get_installation(&state.pool, repository_id, account_id)
                    .await;
                let _ = reply.send(res);
            }
            DbActorMessage::GetActiveInstallation(repository_id, reply) => {
                let res = self
                    .get_active_installation(&state.pool, repository_id)
                    .await;
                let _ = reply.send(res);
            }
            DbActorMessage::UpsertInstallation(upsert, reply) => {
                let res = self.upsert_installation(&state.pool, upsert).await;
                let _ = reply.send(res);
            }
            DbActorMessage::DeleteInstallation(repository_id, account_id, reply) => {
                let res = self
                    .delete_installation(&state.pool, repository_id, account_id)
                    .await;
                let _ = reply.send(res);
            }
            DbActorMessage::ListStaleInstallations(reply) => {
                let res = self.list_stale_installations(&state.pool).await;
                let _ = reply.send(res);
            }
            DbActorMessage::ApplyReview(apply, reply) => {
                let res = self.apply_review(&state.pool, apply).await;
                let _ = reply.send(res);
            }
            DbActorMessage::ListReviews(account_id, reply) => {
                let res = self.list_reviews(&state.pool, account_id).await;
                let _ = reply.send(res);
            }
        }
        Ok(())
    }
}

impl DbActor {
    async fn upsert_account(
        &self,
        pool: &SqlitePool,
        upsert: AccountUpsert,
    ) -> Result<DbAccount, RevlinkError> {
        let now = Utc::now();
        let account = sqlx::query_as::<_, DbAccount>(
            r"
            INSERT INTO accounts
                (provider, base_url, username, name, avatar_url, token, created_at, updated_at)
            VALUES ('gitlab', ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider, base_url, username) DO UPDATE SET
                name = COALESCE(excluded.name, name),
                avatar_url = COALESCE(excluded.avatar_url, avatar_url),
                token = excluded.token,
                updated_at = excluded.updated_at
            RETURNING *
            ",
        )
        .bind(&upsert.base_url)
        .bind(&upsert.username)
        .bind(&upsert.name)
        .bind(&upsert.avatar_url)
        .bind(&upsert.token)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;
        Ok(account)
    }

    async fn get_account(
        &self,
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<DbAccount>, RevlinkError> {
        let account = sqlx::query_as::<_, DbAccount>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(account)
    }

    async fn get_installation(
        &self,
        pool: &SqlitePool,
        repository_id: i64,
        account_id: i64,
    ) -> Result<Option<DbInstallation>, RevlinkError> {
        let row = sqlx::query_as::<_, DbInstallation>(
            "SELECT * FROM installations WHERE repository_id = ? AND account_id = ?",
        )
        .bind(repository_id)
        .bind(account_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    async fn get_active_installation(
        &self,
        pool: &SqlitePool,
        repository_id: i64,
    ) -> Result<Option<DbInstallation>, RevlinkError> {
        let row = sqlx::query_as::<_, DbInstallation>(
            "SELECT * FROM installations WHERE repository_id = ? AND status = 'active'",
        )
        .bind(repository_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    async fn upsert_installation(
        &self,
        pool: &SqlitePool,
        upsert: InstallationUpsert,
    ) -> Result<DbInstallation, RevlinkError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, DbInstallation>(
            r"
            INSERT INTO installations
                (repository_id, account_id, webhook_id, callback_url,
                 status, error, installed_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repository_id, account_id) DO UPDATE SET
                webhook_id = excluded.webhook_id,
                callback_url = excluded.callback_url,
                status = excluded.status,
                error = excluded.error,
                updated_at = excluded.updated_at
            RETURNING *
            ",
        )
        .bind(upsert.repository_id)
        .bind(upsert.account_id)
        .bind(upsert.webhook_id)
        .bind(&upsert.callback_url)
        .bind(upsert.status)
        .bind(&upsert.error)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    async fn delete_installation(
        &self,
        pool: &SqlitePool,
        repository_id: i64,
        account_id: i64,
    ) -> Result<(), RevlinkError> {
        sqlx::query("DELETE FROM installations WHERE repository_id = ? AND account_id = ?")
            .bind(repository_id)
            .bind(account_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn list_stale_installations(
        &self,
        pool: &SqlitePool,
    ) -> Result<Vec<DbInstallation>, RevlinkError> {
        let rows = sqlx::query_as::<_, DbInstallation>(
            "SELECT * FROM installations WHERE status != 'active'",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Folds one event into its review record.
    ///
    /// Runs inside the actor, so events for the same (repository, mr_iid)
    /// key are applied strictly in mailbox order. `updated_at` is forced
    /// strictly monotonic even if the wall clock stalls.
    async fn apply_review(
        &self,
        pool: &SqlitePool,
        apply: ReviewApply,
    ) -> Result<DbReviewRecord, RevlinkError> {
        let (repository_id, mr_iid) = apply.key();
        let existing = sqlx::query_as::<_, DbReviewRecord>(
            "SELECT * FROM review_records WHERE repository_id = ? AND mr_iid = ?",
        )
        .bind(repository_id)
        .bind(mr_iid)
        .fetch_optional(pool)
        .await?;

        let now = Utc::now();
        let updated_at = match &existing {
            Some(e) if e.updated_at >= now => e.updated_at + ChronoDuration::milliseconds(1),
            _ => now,
        };

        let record = match (apply, existing) {
            (
                ReviewApply::Revision {
                    title,
                    branch,
                    url,
                    revision,
                    ..
                },
                None,
            ) => {
                sqlx::query_as::<_, DbReviewRecord>(
                    r"
                    INSERT INTO review_records
                        (repository_id, mr_iid, title, branch, revision,
                         status, summary, url, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
                    RETURNING *
                    ",
                )
                .bind(repository_id)
                .bind(mr_iid)
                .bind(&title)
                .bind(&branch)
                .bind(&revision)
                .bind(ReviewStatus::Pending)
                .bind(&url)
                .bind(updated_at)
                .bind(updated_at)
                .fetch_one(pool)
                .await?
            }
            (
                ReviewApply::Revision {
                    title,
                    branch,
                    url,
                    revision,
                    ..
                },
                Some(existing),
            ) => {
                // Delivery is at-least-once: an event carrying the revision
                // marker we already track is a redelivered duplicate and
                // must not restart a terminal record. Only a new (or
                // unmarked) revision resets to Pending. Fields only ever
                // fill in; an event without a title cannot blank one we
                // already have.
                let duplicate = revision.is_some() && revision == existing.revision;
                let status = if duplicate {
                    existing.status
                } else {
                    ReviewStatus::Pending
                };
                sqlx::query_as::<_, DbReviewRecord>(
                    r"
                    UPDATE review_records SET
                        status = ?,
                        title = COALESCE(?, title),
                        branch = COALESCE(?, branch),
                        revision = COALESCE(?, revision),
                        url = COALESCE(?, url),
                        updated_at = ?
                    WHERE repository_id = ? AND mr_iid = ?
                    RETURNING *
                    ",
                )
                .bind(status)
                .bind(&title)
                .bind(&branch)
                .bind(&revision)
                .bind(&url)
                .bind(updated_at)
                .bind(repository_id)
                .bind(mr_iid)
                .fetch_one(pool)
                .await?
            }
            (
                ReviewApply::Completion {
                    outcome,
                    summary,
                    url,
                    ..
                },
                None,
            ) => {
                // Out-of-order delivery: completion seen before the open
                // event. Create the record anyway; the open event fills
                // title/branch later.
                sqlx::query_as::<_, DbReviewRecord>(
                    r"
                    INSERT INTO review_records
                        (repository_id, mr_iid, title, branch, revision,
                         status, summary, url, created_at, updated_at)
                    VALUES (?, ?, NULL, NULL, NULL, ?, ?, ?, ?, ?)
                    RETURNING *
                    ",
                )
                .bind(repository_id)
                .bind(mr_iid)
                .bind(outcome)
                .bind(&summary)
                .bind(&url)
                .bind(updated_at)
                .bind(updated_at)
                .fetch_one(pool)
                .await?
            }
            (
                ReviewApply::Completion {
                    outcome,
                    summary,
                    url,
                    ..
                },
                Some(_),
            ) => {
                sqlx::query_as::<_, DbReviewRecord>(
                    r"
                    UPDATE review_records SET
                        status = ?,
                        summary = COALESCE(?, summary),
                        url = COALESCE(?, url),
                        updated_at = ?
                    WHERE repository_id = ? AND mr_iid = ?
                    RETURNING *
                    ",
                )
                .bind(outcome)
                .bind(&summary)
                .bind(&url)
                .bind(updated_at)
                .bind(repository_id)
                .bind(mr_iid)
                .fetch_one(pool)
                .await?
            }
        };
        Ok(record)
    }

    async fn list_reviews(
        &self,
        pool: &SqlitePool,
        account_id: i64,
    ) -> Result<Vec<DbReviewRecord>, RevlinkError> {
        let rows = sqlx::query_as::<_, DbReviewRecord>(
            r"
            SELECT r.* FROM review_records r
            JOIN installations i ON i.repository_id = r.repository_id
            WHERE i.account_id = ?
            ORDER BY r.updated_at DESC
            ",
        )
        .bind(account_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SQLITE_INIT).execute(pool).await?;
    Ok(())
}

/// Spawns the DB actor and returns its handle.
pub async fn spawn(database_url: &str) -> DbHandle {
    let (actor, _join) = Actor::spawn(None, DbActor, database_url.to_string())
        .await
        .expect("failed to spawn DbActor");
    DbHandle { actor }
}
