//! Postgres-backed forum store.
//!
//! Uniqueness, cascades and referential integrity are enforced by the schema
//! in `migrations/0001_forum.sql`; multi-row writes run in one transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | ForumError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Store` |
//! | PoolClosed / Other | N/A | `Store` |
//!
//! ## Runtime
//!
//! `ForumStore` is synchronous. The trait impl bridges into the async
//! methods with `block_in_place` + `Handle::block_on`, so it must be called
//! from inside a multi-threaded tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{Span, instrument};
use uuid::Uuid;

use deptforum_auth::{RegistrationRequest, Role, User};
use deptforum_conversations::Message;
use deptforum_core::{
    Aggregate, CategoryId, ExpectedVersion, ForumError, ForumResult, MessageId, RegistrationId,
    RestrictionId, TopicId, UserId,
};
use deptforum_events::{Event, EventEnvelope};
use deptforum_topics::{
    Category, FlagState, Grant, LifecycleFlag, LifecycleFlags, Restriction, RestrictionScope,
    RestrictionTarget, Stamp, Topic, TopicAccess, TopicEvent,
};

use super::{AuthorizeReply, ForumStore, TOPIC_AGGREGATE_TYPE, UserRestrictions};

/// Schema applied by [`PostgresForumStore::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_forum.sql");

#[derive(Debug, Clone)]
pub struct PostgresForumStore {
    pool: Arc<PgPool>,
}

impl PostgresForumStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> ForumResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the forum tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> ForumResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self) -> ForumResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    // ── users ───────────────────────────────────────────────────────────────

    #[instrument(skip(self, user), fields(user_id = %user.id, handle = %user.handle), err)]
    pub async fn insert_user(&self, user: User) -> ForumResult<User> {
        let mut tx = self.begin().await?;

        let pending: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM registration_requests WHERE handle = $1")
                .bind(&user.handle)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_handle", e))?;
        if pending.is_some() {
            return Err(handle_taken(&user.handle));
        }
        insert_user_row(&mut *tx, &user).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn get_user(&self, id: UserId) -> ForumResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?
            .ok_or_else(|| ForumError::not_found("user", id))?;
        user_from_row(&row)
    }

    #[instrument(skip(self), err)]
    pub async fn find_user_by_handle(&self, handle: &str) -> ForumResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE handle = $1")
            .bind(handle)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_handle", e))?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    // ── categories ──────────────────────────────────────────────────────────

    #[instrument(skip(self, category), fields(category_id = %category.id, name = %category.name), err)]
    pub async fn insert_category(&self, category: Category) -> ForumResult<Category> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, description, owner_id, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(category.id.as_uuid())
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.owner.as_uuid())
        .bind(category.active)
        .bind(category.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_category", e))?;
        Ok(category)
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    pub async fn get_category(&self, id: CategoryId) -> ForumResult<Category> {
        let row = sqlx::query("SELECT * FROM categories WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_category", e))?
            .ok_or_else(|| ForumError::not_found("category", id))?;
        category_from_row(&row)
    }

    #[instrument(skip(self), err)]
    pub async fn list_categories(&self) -> ForumResult<Vec<Category>> {
        let rows = sqlx::query("SELECT * FROM categories ORDER BY name ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_categories", e))?;
        rows.iter().map(category_from_row).collect()
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    pub async fn set_category_active(&self, id: CategoryId, active: bool) -> ForumResult<Category> {
        let row = sqlx::query("UPDATE categories SET active = $2 WHERE id = $1 RETURNING *")
            .bind(id.as_uuid())
            .bind(active)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_category_active", e))?
            .ok_or_else(|| ForumError::not_found("category", id))?;
        category_from_row(&row)
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    pub async fn delete_category(&self, id: CategoryId) -> ForumResult<()> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_category", e))?;
        if result.rows_affected() == 0 {
            return Err(ForumError::not_found("category", id));
        }
        Ok(())
    }

    // ── topics ──────────────────────────────────────────────────────────────

    #[instrument(skip(self, topic), fields(topic_id = %topic.id, category_id = %topic.category_id), err)]
    pub async fn insert_topic(&self, topic: Topic) -> ForumResult<Topic> {
        sqlx::query(
            r#"
            INSERT INTO topics (
                id, category_id, title, description, owner_id,
                total_messages, last_activity, created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(topic.id.as_uuid())
        .bind(topic.category_id.as_uuid())
        .bind(&topic.title)
        .bind(&topic.description)
        .bind(topic.owner.as_uuid())
        .bind(topic.total_messages as i64)
        .bind(topic.last_activity)
        .bind(topic.created_at)
        .bind(topic.version as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_violation(&e, FOREIGN_KEY_VIOLATION) {
                ForumError::not_found("category", topic.category_id)
            } else {
                map_sqlx_error("insert_topic", e)
            }
        })?;
        Ok(topic)
    }

    #[instrument(skip(self), fields(topic_id = %id), err)]
    pub async fn get_topic(&self, id: TopicId) -> ForumResult<Topic> {
        let row = sqlx::query("SELECT * FROM topics WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_topic", e))?
            .ok_or_else(|| ForumError::not_found("topic", id))?;
        topic_from_row(&row)
    }

    #[instrument(skip(self), err)]
    pub async fn list_topics(&self, category: Option<CategoryId>) -> ForumResult<Vec<Topic>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM topics
            WHERE ($1::uuid IS NULL OR category_id = $1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(category.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_topics", e))?;
        rows.iter().map(topic_from_row).collect()
    }

    /// Apply lifecycle events under a row lock and append them to the history.
    #[instrument(
        skip(self, events),
        fields(
            topic_id = %id,
            event_count = events.len(),
            expected_version = ?expected,
            committed_events = tracing::field::Empty
        ),
        err
    )]
    pub async fn append_topic_events(
        &self,
        id: TopicId,
        expected: ExpectedVersion,
        events: Vec<TopicEvent>,
    ) -> ForumResult<(Topic, Vec<EventEnvelope<TopicEvent>>)> {
        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT * FROM topics WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_topic", e))?
            .ok_or_else(|| ForumError::not_found("topic", id))?;
        let mut topic = topic_from_row(&row)?;
        expected.check(topic.version)?;

        let mut committed = Vec::with_capacity(events.len());
        for event in events {
            topic.apply(&event);
            let flag = event.flag();
            let state = topic.flags.get(flag);

            // Column names come from the closed `LifecycleFlag` set.
            let update = format!(
                "UPDATE topics SET {flag} = $2, {flag}_by = $3, {flag}_at = $4, version = $5 WHERE id = $1"
            );
            sqlx::query(&update)
                .bind(id.as_uuid())
                .bind(state.on)
                .bind(state.stamp.map(|s| Uuid::from(s.actor)))
                .bind(state.stamp.map(|s| s.at))
                .bind(topic.version as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_topic_flag", e))?;

            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                *id.as_uuid(),
                TOPIC_AGGREGATE_TYPE,
                topic.version,
                event,
            );
            let payload = serde_json::to_value(envelope.payload())
                .map_err(|e| ForumError::store(format!("payload serialization failed: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO topic_events (
                    event_id, topic_id, sequence_number, event_type, event_version, occurred_at, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(envelope.event_id())
            .bind(id.as_uuid())
            .bind(envelope.sequence_number() as i64)
            .bind(envelope.payload().event_type())
            .bind(envelope.payload().version() as i32)
            .bind(envelope.payload().occurred_at())
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_violation(&e, UNIQUE_VIOLATION) {
                    ForumError::conflict(format!(
                        "concurrent transition detected: sequence_number {} already exists",
                        envelope.sequence_number()
                    ))
                } else {
                    map_sqlx_error("insert_topic_event", e)
                }
            })?;

            committed.push(envelope);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_events", committed.len());
        Ok((topic, committed))
    }

    #[instrument(skip(self), fields(topic_id = %id), err)]
    pub async fn topic_history(&self, id: TopicId) -> ForumResult<Vec<EventEnvelope<TopicEvent>>> {
        self.get_topic(id).await?;
        let rows = sqlx::query(
            r#"
            SELECT event_id, sequence_number, payload
            FROM topic_events
            WHERE topic_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("topic_history", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row.try_get("payload").map_err(row_error)?;
            let event: TopicEvent = serde_json::from_value(payload)
                .map_err(|e| ForumError::store(format!("failed to deserialize topic event: {e}")))?;
            let sequence: i64 = row.try_get("sequence_number").map_err(row_error)?;
            out.push(EventEnvelope::new(
                row.try_get("event_id").map_err(row_error)?,
                *id.as_uuid(),
                TOPIC_AGGREGATE_TYPE,
                sequence as u64,
                event,
            ));
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(topic_id = %id), err)]
    pub async fn delete_topic(&self, id: TopicId) -> ForumResult<()> {
        let result = sqlx::query("DELETE FROM topics WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_topic", e))?;
        if result.rows_affected() == 0 {
            return Err(ForumError::not_found("topic", id));
        }
        Ok(())
    }

    // ── restrictions ────────────────────────────────────────────────────────

    #[instrument(
        skip(self, restriction),
        fields(target = %restriction.target, user_id = %restriction.user_id),
        err
    )]
    pub async fn insert_restriction(&self, restriction: Restriction) -> ForumResult<Restriction> {
        let (table, column) = restriction_table(restriction.target.scope());
        let insert = format!(
            "INSERT INTO {table} (id, {column}, user_id, can_view, can_reply, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        sqlx::query(&insert)
            .bind(restriction.id.as_uuid())
            .bind(target_uuid(restriction.target))
            .bind(restriction.user_id.as_uuid())
            .bind(restriction.grant.can_view)
            .bind(restriction.grant.can_reply)
            .bind(restriction.created_by.as_uuid())
            .bind(restriction.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_violation(&e, UNIQUE_VIOLATION) {
                    ForumError::already_exists(format!(
                        "restriction on {} for user {} already exists",
                        restriction.target, restriction.user_id
                    ))
                } else {
                    map_sqlx_error("insert_restriction", e)
                }
            })?;
        Ok(restriction)
    }

    #[instrument(skip(self), fields(target = %target, user_id = %user_id), err)]
    pub async fn find_restriction(
        &self,
        target: RestrictionTarget,
        user_id: UserId,
    ) -> ForumResult<Option<Restriction>> {
        let (table, column) = restriction_table(target.scope());
        let select = format!("SELECT * FROM {table} WHERE {column} = $1 AND user_id = $2");
        sqlx::query(&select)
            .bind(target_uuid(target))
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_restriction", e))?
            .map(|row| restriction_from_row(&row, target.scope()))
            .transpose()
    }

    #[instrument(skip(self), fields(target = %target), err)]
    pub async fn list_restrictions(&self, target: RestrictionTarget) -> ForumResult<Vec<Restriction>> {
        let (table, column) = restriction_table(target.scope());
        let select =
            format!("SELECT * FROM {table} WHERE {column} = $1 ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&select)
            .bind(target_uuid(target))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_restrictions", e))?;
        rows.iter()
            .map(|row| restriction_from_row(row, target.scope()))
            .collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn restrictions_for_user(&self, user_id: UserId) -> ForumResult<UserRestrictions> {
        let mut out = UserRestrictions::default();
        for scope in [RestrictionScope::Category, RestrictionScope::Topic] {
            let (table, column) = restriction_table(scope);
            let select =
                format!("SELECT {column}, can_view, can_reply FROM {table} WHERE user_id = $1");
            let rows = sqlx::query(&select)
                .bind(user_id.as_uuid())
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("restrictions_for_user", e))?;
            for row in rows {
                let target: Uuid = row.try_get(column).map_err(row_error)?;
                let grant = grant_from_row(&row)?;
                match scope {
                    RestrictionScope::Category => {
                        out.categories.insert(CategoryId::from_uuid(target), grant);
                    }
                    RestrictionScope::Topic => {
                        out.topics.insert(TopicId::from_uuid(target), grant);
                    }
                }
            }
        }
        Ok(out)
    }

    // ── messages ────────────────────────────────────────────────────────────

    /// Authorize, insert and bump the topic counters in one transaction.
    ///
    /// The topic row is locked first so concurrent posts serialize on it.
    #[instrument(
        skip(self, message, authorize),
        fields(topic_id = %message.topic_id, sender_id = %message.sender_id),
        err
    )]
    pub async fn append_message(
        &self,
        message: Message,
        authorize: AuthorizeReply<'_>,
    ) -> ForumResult<(Message, Topic)> {
        let mut tx = self.begin().await?;

        let topic_row = sqlx::query("SELECT * FROM topics WHERE id = $1 FOR UPDATE")
            .bind(message.topic_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_topic", e))?
            .ok_or_else(|| ForumError::not_found("topic", message.topic_id))?;
        let topic = topic_from_row(&topic_row)?;

        let category_row = sqlx::query("SELECT * FROM categories WHERE id = $1")
            .bind(topic.category_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_category", e))?
            .ok_or_else(|| ForumError::not_found("category", topic.category_id))?;
        let category = category_from_row(&category_row)?;

        let sender_row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(message.sender_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_sender", e))?
            .ok_or_else(|| ForumError::not_found("user", message.sender_id))?;
        let sender = user_from_row(&sender_row)?;

        let tagged: Vec<Uuid> = message.tagged_user_ids.iter().map(|id| Uuid::from(*id)).collect();
        if !tagged.is_empty() {
            let found: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = ANY($1)")
                .bind(&tagged)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("load_tagged_users", e))?;
            if let Some(missing) = tagged.iter().find(|id| !found.contains(id)) {
                return Err(ForumError::not_found("user", missing));
            }
        }

        let category_grant =
            grant_in_tx(&mut tx, RestrictionTarget::Category(category.id), sender.id).await?;
        let topic_grant = grant_in_tx(&mut tx, RestrictionTarget::Topic(topic.id), sender.id).await?;

        // Dropping `tx` on a denial rolls the transaction back.
        authorize(&TopicAccess {
            user: &sender,
            topic: &topic,
            category: &category,
            category_grant,
            topic_grant,
        })?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, topic_id, sender_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(message.topic_id.as_uuid())
        .bind(message.sender_id.as_uuid())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_message", e))?;

        for (position, user_id) in tagged.iter().enumerate() {
            sqlx::query("INSERT INTO message_tags (message_id, user_id, position) VALUES ($1, $2, $3)")
                .bind(message.id.as_uuid())
                .bind(user_id)
                .bind(position as i32)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_message_tag", e))?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE topics
            SET total_messages = total_messages + 1,
                last_activity = GREATEST(last_activity, $2)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(message.topic_id.as_uuid())
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bump_topic_counters", e))?;
        let topic = topic_from_row(&updated)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok((message, topic))
    }

    #[instrument(skip(self), err)]
    pub async fn list_messages(&self, topic: Option<TopicId>) -> ForumResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic_id, sender_id, content, created_at
            FROM messages
            WHERE ($1::uuid IS NULL OR topic_id = $1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(topic.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_messages", e))?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<_, _>>()
            .map_err(row_error)?;
        let mut tags: HashMap<Uuid, Vec<UserId>> = HashMap::new();
        if !ids.is_empty() {
            let tag_rows = sqlx::query(
                r#"
                SELECT message_id, user_id
                FROM message_tags
                WHERE message_id = ANY($1)
                ORDER BY message_id, position ASC
                "#,
            )
            .bind(&ids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_message_tags", e))?;
            for row in tag_rows {
                let message_id: Uuid = row.try_get("message_id").map_err(row_error)?;
                let user_id: Uuid = row.try_get("user_id").map_err(row_error)?;
                tags.entry(message_id)
                    .or_default()
                    .push(UserId::from_uuid(user_id));
            }
        }

        rows.iter()
            .map(|row| -> ForumResult<Message> {
                let id: Uuid = row.try_get("id").map_err(row_error)?;
                Ok(Message {
                    id: MessageId::from_uuid(id),
                    topic_id: TopicId::from_uuid(row.try_get("topic_id").map_err(row_error)?),
                    sender_id: UserId::from_uuid(row.try_get("sender_id").map_err(row_error)?),
                    content: row.try_get("content").map_err(row_error)?,
                    tagged_user_ids: tags.remove(&id).unwrap_or_default(),
                    created_at: row.try_get("created_at").map_err(row_error)?,
                })
            })
            .collect()
    }

    // ── registrations ───────────────────────────────────────────────────────

    #[instrument(skip(self, request), fields(registration_id = %request.id, handle = %request.handle), err)]
    pub async fn insert_registration(
        &self,
        request: RegistrationRequest,
    ) -> ForumResult<RegistrationRequest> {
        let mut tx = self.begin().await?;

        let taken: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE handle = $1")
            .bind(&request.handle)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_handle", e))?;
        if taken.is_some() {
            return Err(handle_taken(&request.handle));
        }

        sqlx::query(
            r#"
            INSERT INTO registration_requests (id, handle, status, version, state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(&request.handle)
        .bind(request.status.to_string())
        .bind(request.version as i64)
        .bind(registration_state(&request)?)
        .bind(request.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_violation(&e, UNIQUE_VIOLATION) {
                handle_taken(&request.handle)
            } else {
                map_sqlx_error("insert_registration", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(request)
    }

    #[instrument(skip(self), fields(registration_id = %id), err)]
    pub async fn get_registration(&self, id: RegistrationId) -> ForumResult<RegistrationRequest> {
        let row = sqlx::query("SELECT state FROM registration_requests WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_registration", e))?
            .ok_or_else(|| ForumError::not_found("registration request", id))?;
        registration_from_row(&row)
    }

    #[instrument(skip(self), err)]
    pub async fn find_registration_by_handle(
        &self,
        handle: &str,
    ) -> ForumResult<Option<RegistrationRequest>> {
        sqlx::query("SELECT state FROM registration_requests WHERE handle = $1")
            .bind(handle)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_registration_by_handle", e))?
            .map(|row| registration_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self, request), fields(registration_id = %request.id, expected_version = ?expected), err)]
    pub async fn save_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
    ) -> ForumResult<()> {
        let mut tx = self.begin().await?;
        update_registration_in_tx(&mut tx, request, expected).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, request, user), fields(registration_id = %request.id, user_id = %user.id), err)]
    pub async fn complete_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
        user: User,
    ) -> ForumResult<User> {
        let mut tx = self.begin().await?;
        update_registration_in_tx(&mut tx, request, expected).await?;
        insert_user_row(&mut *tx, &user).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(user)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared statements
// ─────────────────────────────────────────────────────────────────────────────

async fn insert_user_row<'e, E>(executor: E, user: &User) -> ForumResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO users (id, handle, email, display_name, department, role, approved, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(user.id.as_uuid())
    .bind(&user.handle)
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.department)
    .bind(user.role.as_str())
    .bind(user.approved)
    .bind(user.created_at)
    .execute(executor)
    .await
    .map_err(|e| {
        if is_violation(&e, UNIQUE_VIOLATION) {
            ForumError::already_exists(format!("user with handle '{}' already exists", user.handle))
        } else {
            map_sqlx_error("insert_user", e)
        }
    })?;
    Ok(())
}

async fn grant_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    target: RestrictionTarget,
    user_id: UserId,
) -> ForumResult<Option<Grant>> {
    let (table, column) = restriction_table(target.scope());
    let select = format!("SELECT can_view, can_reply FROM {table} WHERE {column} = $1 AND user_id = $2");
    sqlx::query(&select)
        .bind(target_uuid(target))
        .bind(user_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_restriction", e))?
        .map(|row| grant_from_row(&row))
        .transpose()
}

async fn update_registration_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    request: &RegistrationRequest,
    expected: ExpectedVersion,
) -> ForumResult<()> {
    let current: i64 =
        sqlx::query_scalar("SELECT version FROM registration_requests WHERE id = $1 FOR UPDATE")
            .bind(request.id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_registration", e))?
            .ok_or_else(|| ForumError::not_found("registration request", request.id))?;
    expected.check(current as u64)?;

    sqlx::query(
        r#"
        UPDATE registration_requests
        SET status = $2, version = $3, state = $4
        WHERE id = $1
        "#,
    )
    .bind(request.id.as_uuid())
    .bind(request.status.to_string())
    .bind(request.version as i64)
    .bind(registration_state(request)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_registration", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn user_from_row(row: &PgRow) -> ForumResult<User> {
    let role: String = row.try_get("role").map_err(row_error)?;
    Ok(User {
        id: UserId::from_uuid(row.try_get("id").map_err(row_error)?),
        handle: row.try_get("handle").map_err(row_error)?,
        email: row.try_get("email").map_err(row_error)?,
        display_name: row.try_get("display_name").map_err(row_error)?,
        department: row.try_get("department").map_err(row_error)?,
        role: role.parse::<Role>()?,
        approved: row.try_get("approved").map_err(row_error)?,
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn category_from_row(row: &PgRow) -> ForumResult<Category> {
    Ok(Category {
        id: CategoryId::from_uuid(row.try_get("id").map_err(row_error)?),
        name: row.try_get("name").map_err(row_error)?,
        description: row.try_get("description").map_err(row_error)?,
        owner: UserId::from_uuid(row.try_get("owner_id").map_err(row_error)?),
        active: row.try_get("active").map_err(row_error)?,
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn topic_from_row(row: &PgRow) -> ForumResult<Topic> {
    let mut flags = LifecycleFlags::default();
    for flag in LifecycleFlag::ALL {
        let on: bool = row.try_get(flag.as_str()).map_err(row_error)?;
        let by: Option<Uuid> = row
            .try_get(format!("{flag}_by").as_str())
            .map_err(row_error)?;
        let at: Option<DateTime<Utc>> = row
            .try_get(format!("{flag}_at").as_str())
            .map_err(row_error)?;
        *flags.get_mut(flag) = FlagState {
            on,
            stamp: by.zip(at).map(|(actor, at)| Stamp {
                actor: UserId::from_uuid(actor),
                at,
            }),
        };
    }

    let total_messages: i64 = row.try_get("total_messages").map_err(row_error)?;
    let version: i64 = row.try_get("version").map_err(row_error)?;
    Ok(Topic {
        id: TopicId::from_uuid(row.try_get("id").map_err(row_error)?),
        category_id: CategoryId::from_uuid(row.try_get("category_id").map_err(row_error)?),
        title: row.try_get("title").map_err(row_error)?,
        description: row.try_get("description").map_err(row_error)?,
        owner: UserId::from_uuid(row.try_get("owner_id").map_err(row_error)?),
        flags,
        total_messages: total_messages as u64,
        last_activity: row.try_get("last_activity").map_err(row_error)?,
        created_at: row.try_get("created_at").map_err(row_error)?,
        version: version as u64,
    })
}

fn grant_from_row(row: &PgRow) -> ForumResult<Grant> {
    Ok(Grant::new(
        row.try_get("can_view").map_err(row_error)?,
        row.try_get("can_reply").map_err(row_error)?,
    ))
}

fn restriction_from_row(row: &PgRow, scope: RestrictionScope) -> ForumResult<Restriction> {
    let (_, column) = restriction_table(scope);
    let target_id: Uuid = row.try_get(column).map_err(row_error)?;
    let target = match scope {
        RestrictionScope::Category => RestrictionTarget::Category(CategoryId::from_uuid(target_id)),
        RestrictionScope::Topic => RestrictionTarget::Topic(TopicId::from_uuid(target_id)),
    };
    Ok(Restriction {
        id: RestrictionId::from_uuid(row.try_get("id").map_err(row_error)?),
        target,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(row_error)?),
        grant: grant_from_row(row)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(row_error)?),
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn registration_state(request: &RegistrationRequest) -> ForumResult<serde_json::Value> {
    serde_json::to_value(request)
        .map_err(|e| ForumError::store(format!("registration serialization failed: {e}")))
}

fn registration_from_row(row: &PgRow) -> ForumResult<RegistrationRequest> {
    let state: serde_json::Value = row.try_get("state").map_err(row_error)?;
    serde_json::from_value(state)
        .map_err(|e| ForumError::store(format!("failed to deserialize registration request: {e}")))
}

fn restriction_table(scope: RestrictionScope) -> (&'static str, &'static str) {
    match scope {
        RestrictionScope::Category => ("category_restrictions", "category_id"),
        RestrictionScope::Topic => ("topic_restrictions", "topic_id"),
    }
}

fn target_uuid(target: RestrictionTarget) -> Uuid {
    match target {
        RestrictionTarget::Category(id) => id.into(),
        RestrictionTarget::Topic(id) => id.into(),
    }
}

fn handle_taken(handle: &str) -> ForumError {
    ForumError::already_exists(format!("handle '{handle}' is already registered or pending"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ForumError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => ForumError::already_exists(msg),
                Some(FOREIGN_KEY_VIOLATION) => ForumError::not_found(
                    "referenced row",
                    db_err.constraint().unwrap_or(operation),
                ),
                _ => ForumError::store(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            ForumError::store(format!("connection pool closed in {operation}"))
        }
        _ => ForumError::store(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_violation(err: &sqlx::Error, code: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some(code);
    }
    false
}

fn row_error(err: sqlx::Error) -> ForumError {
    ForumError::store(format!("failed to decode row: {err}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync bridge
// ─────────────────────────────────────────────────────────────────────────────

fn run<T>(fut: impl Future<Output = ForumResult<T>>) -> ForumResult<T> {
    let handle = Handle::try_current().map_err(|_| {
        ForumError::store(
            "PostgresForumStore requires async runtime (tokio). Ensure you're calling from within a tokio runtime context.",
        )
    })?;
    if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
        return Err(ForumError::store(
            "PostgresForumStore requires a multi-threaded tokio runtime",
        ));
    }
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl ForumStore for PostgresForumStore {
    fn insert_user(&self, user: User) -> ForumResult<User> {
        run(self.insert_user(user))
    }

    fn get_user(&self, id: UserId) -> ForumResult<User> {
        run(self.get_user(id))
    }

    fn find_user_by_handle(&self, handle: &str) -> ForumResult<Option<User>> {
        run(self.find_user_by_handle(handle))
    }

    fn insert_category(&self, category: Category) -> ForumResult<Category> {
        run(self.insert_category(category))
    }

    fn get_category(&self, id: CategoryId) -> ForumResult<Category> {
        run(self.get_category(id))
    }

    fn list_categories(&self) -> ForumResult<Vec<Category>> {
        run(self.list_categories())
    }

    fn set_category_active(&self, id: CategoryId, active: bool) -> ForumResult<Category> {
        run(self.set_category_active(id, active))
    }

    fn delete_category(&self, id: CategoryId) -> ForumResult<()> {
        run(self.delete_category(id))
    }

    fn insert_topic(&self, topic: Topic) -> ForumResult<Topic> {
        run(self.insert_topic(topic))
    }

    fn get_topic(&self, id: TopicId) -> ForumResult<Topic> {
        run(self.get_topic(id))
    }

    fn list_topics(&self, category: Option<CategoryId>) -> ForumResult<Vec<Topic>> {
        run(self.list_topics(category))
    }

    fn append_topic_events(
        &self,
        id: TopicId,
        expected: ExpectedVersion,
        events: Vec<TopicEvent>,
    ) -> ForumResult<(Topic, Vec<EventEnvelope<TopicEvent>>)> {
        run(self.append_topic_events(id, expected, events))
    }

    fn topic_history(&self, id: TopicId) -> ForumResult<Vec<EventEnvelope<TopicEvent>>> {
        run(self.topic_history(id))
    }

    fn delete_topic(&self, id: TopicId) -> ForumResult<()> {
        run(self.delete_topic(id))
    }

    fn insert_restriction(&self, restriction: Restriction) -> ForumResult<Restriction> {
        run(self.insert_restriction(restriction))
    }

    fn find_restriction(
        &self,
        target: RestrictionTarget,
        user_id: UserId,
    ) -> ForumResult<Option<Restriction>> {
        run(self.find_restriction(target, user_id))
    }

    fn list_restrictions(&self, target: RestrictionTarget) -> ForumResult<Vec<Restriction>> {
        run(self.list_restrictions(target))
    }

    fn restrictions_for_user(&self, user_id: UserId) -> ForumResult<UserRestrictions> {
        run(self.restrictions_for_user(user_id))
    }

    fn append_message(
        &self,
        message: Message,
        authorize: AuthorizeReply<'_>,
    ) -> ForumResult<(Message, Topic)> {
        run(self.append_message(message, authorize))
    }

    fn list_messages(&self, topic: Option<TopicId>) -> ForumResult<Vec<Message>> {
        run(self.list_messages(topic))
    }

    fn insert_registration(&self, request: RegistrationRequest) -> ForumResult<RegistrationRequest> {
        run(self.insert_registration(request))
    }

    fn get_registration(&self, id: RegistrationId) -> ForumResult<RegistrationRequest> {
        run(self.get_registration(id))
    }

    fn find_registration_by_handle(&self, handle: &str) -> ForumResult<Option<RegistrationRequest>> {
        run(self.find_registration_by_handle(handle))
    }

    fn save_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
    ) -> ForumResult<()> {
        run(self.save_registration(request, expected))
    }

    fn complete_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
        user: User,
    ) -> ForumResult<User> {
        run(self.complete_registration(request, expected, user))
    }
}
