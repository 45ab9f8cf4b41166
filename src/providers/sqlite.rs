use std::path::Path;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde_json::Value;

use crate::domains::records::{
    ChatRecord, DocumentRecord, MessageRecord, Role, StreamRecord, SuggestionRecord, UserRecord,
    Visibility, VoteRecord,
};
use crate::error::{ParleyError, Result};
use crate::interfaces::storage::{BackendKind, StorageBackend};

mod schema;
use schema::{chats, documents, messages, streams, suggestions, users, votes};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

#[derive(Queryable)]
struct UserRow {
    id: String,
    email: String,
    password: Option<String>,
}

#[derive(Queryable)]
struct ChatRow {
    id: String,
    user_id: String,
    title: String,
    visibility: String,
    created_at: i64,
    last_context: Option<String>,
}

#[derive(Queryable)]
struct MessageRow {
    id: String,
    chat_id: String,
    role: String,
    parts: String,
    attachments: String,
    created_at: i64,
}

#[derive(Queryable)]
struct VoteRow {
    chat_id: String,
    message_id: String,
    is_upvoted: bool,
}

#[derive(Queryable)]
struct DocumentRow {
    id: String,
    user_id: String,
    title: String,
    kind: String,
    content: String,
    created_at: i64,
}

#[derive(Queryable)]
struct SuggestionRow {
    id: String,
    document_id: String,
    document_created_at: i64,
    original_text: String,
    suggested_text: String,
    description: Option<String>,
    is_resolved: bool,
    user_id: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    id: &'a str,
    email: &'a str,
    password: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = chats)]
struct NewChat<'a> {
    id: &'a str,
    user_id: &'a str,
    title: &'a str,
    visibility: &'a str,
    created_at: i64,
    last_context: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessage<'a> {
    id: &'a str,
    chat_id: &'a str,
    role: &'a str,
    parts: &'a str,
    attachments: &'a str,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = votes)]
struct NewVote<'a> {
    chat_id: &'a str,
    message_id: &'a str,
    is_upvoted: bool,
}

#[derive(Insertable)]
#[diesel(table_name = documents)]
struct NewDocument<'a> {
    id: &'a str,
    user_id: &'a str,
    title: &'a str,
    kind: &'a str,
    content: &'a str,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = suggestions)]
struct NewSuggestion<'a> {
    id: &'a str,
    document_id: &'a str,
    document_created_at: i64,
    original_text: &'a str,
    suggested_text: &'a str,
    description: Option<&'a str>,
    is_resolved: bool,
    user_id: &'a str,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = streams)]
struct NewStream<'a> {
    id: &'a str,
    chat_id: &'a str,
    created_at: i64,
}

fn user_from_row(row: UserRow) -> UserRecord {
    UserRecord {
        id: row.id,
        email: row.email,
        password: row.password,
    }
}

fn chat_from_row(row: ChatRow) -> Result<ChatRecord> {
    let visibility = Visibility::parse(&row.visibility).ok_or_else(|| {
        ParleyError::Serialization(format!("unknown chat visibility '{}'", row.visibility))
    })?;
    let last_context = match row.last_context {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| ParleyError::Serialization(e.to_string()))?,
        ),
        None => None,
    };
    Ok(ChatRecord {
        id: row.id,
        user_id: row.user_id,
        title: row.title,
        visibility,
        created_at: row.created_at,
        last_context,
    })
}

fn message_from_row(row: MessageRow) -> Result<MessageRecord> {
    let role = Role::parse(&row.role)
        .ok_or_else(|| ParleyError::Serialization(format!("unknown message role '{}'", row.role)))?;
    let parts: Vec<Value> =
        serde_json::from_str(&row.parts).map_err(|e| ParleyError::Serialization(e.to_string()))?;
    let attachments: Vec<Value> = serde_json::from_str(&row.attachments)
        .map_err(|e| ParleyError::Serialization(e.to_string()))?;
    Ok(MessageRecord {
        id: row.id,
        chat_id: row.chat_id,
        role,
        parts,
        attachments,
        created_at: row.created_at,
    })
}

fn vote_from_row(row: VoteRow) -> VoteRecord {
    VoteRecord {
        chat_id: row.chat_id,
        message_id: row.message_id,
        is_upvoted: row.is_upvoted,
    }
}

fn document_from_row(row: DocumentRow) -> DocumentRecord {
    DocumentRecord {
        id: row.id,
        user_id: row.user_id,
        title: row.title,
        kind: row.kind,
        content: row.content,
        created_at: row.created_at,
    }
}

fn suggestion_from_row(row: SuggestionRow) -> SuggestionRecord {
    SuggestionRecord {
        id: row.id,
        document_id: row.document_id,
        document_created_at: row.document_created_at,
        original_text: row.original_text,
        suggested_text: row.suggested_text,
        description: row.description,
        is_resolved: row.is_resolved,
        user_id: row.user_id,
        created_at: row.created_at,
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ParleyError::Serialization(e.to_string()))
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ParleyError::Runtime(e.to_string()))?;
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| ParleyError::Runtime(e.to_string()))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| ParleyError::Runtime(e.to_string()))?;
        Ok::<_, ParleyError>(())
    })
    .await
    .map_err(|e| ParleyError::Runtime(e.to_string()))??;
    Ok(())
}

/// Durable backend over a single sqlite file. Cascading deletes run inside
/// a transaction so a crash mid-delete never leaves orphaned rows.
pub struct SqliteStorageProvider {
    pool: SqlitePool,
}

impl SqliteStorageProvider {
    pub async fn new(database_path: &str) -> Result<Self> {
        ensure_parent_dir(database_path)?;
        run_migrations(database_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(database_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| ParleyError::Runtime(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| ParleyError::Runtime(e.to_string()))
    }
}

#[async_trait]
impl StorageBackend for SqliteStorageProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn create_user(&self, user: UserRecord) -> Result<UserRecord> {
        let mut conn = self.conn().await?;
        let new_user = NewUser {
            id: &user.id,
            email: &user.email,
            password: user.password.as_deref(),
        };
        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(&mut conn)
            .await?;
        Ok(user)
    }

    async fn users_by_email(&self, email: &str) -> Result<Vec<UserRecord>> {
        let mut conn = self.conn().await?;
        let rows: Vec<UserRow> = users::table
            .filter(users::email.eq(email))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(user_from_row).collect())
    }

    async fn ensure_user(&self, user: UserRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        let new_user = NewUser {
            id: &user.id,
            email: &user.email,
            password: user.password.as_deref(),
        };
        diesel::insert_into(users::table)
            .values(&new_user)
            .on_conflict(users::id)
            .do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn save_chat(&self, chat: ChatRecord) -> Result<ChatRecord> {
        let mut conn = self.conn().await?;
        let last_context = match &chat.last_context {
            Some(value) => Some(to_json(value)?),
            None => None,
        };
        let new_chat = NewChat {
            id: &chat.id,
            user_id: &chat.user_id,
            title: &chat.title,
            visibility: chat.visibility.as_str(),
            created_at: chat.created_at,
            last_context: last_context.as_deref(),
        };
        diesel::insert_into(chats::table)
            .values(&new_chat)
            .execute(&mut conn)
            .await?;
        Ok(chat)
    }

    async fn chat_by_id(&self, id: &str) -> Result<Option<ChatRecord>> {
        let mut conn = self.conn().await?;
        let row: Option<ChatRow> = chats::table
            .filter(chats::id.eq(id))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(chat_from_row).transpose()
    }

    async fn chats_by_user(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ChatRow> = chats::table
            .filter(chats::user_id.eq(user_id))
            .order(chats::created_at.desc())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(chat_from_row).collect()
    }

    async fn delete_chat(&self, id: &str) -> Result<Option<ChatRecord>> {
        let mut conn = self.conn().await?;
        let id = id.to_string();
        let row = conn
            .transaction::<_, ParleyError, _>(|conn| {
                async move {
                    let row: Option<ChatRow> = chats::table
                        .filter(chats::id.eq(&id))
                        .first(conn)
                        .await
                        .optional()?;
                    if row.is_none() {
                        return Ok(None);
                    }
                    diesel::delete(votes::table.filter(votes::chat_id.eq(&id)))
                        .execute(conn)
                        .await?;
                    diesel::delete(messages::table.filter(messages::chat_id.eq(&id)))
                        .execute(conn)
                        .await?;
                    diesel::delete(streams::table.filter(streams::chat_id.eq(&id)))
                        .execute(conn)
                        .await?;
                    diesel::delete(chats::table.filter(chats::id.eq(&id)))
                        .execute(conn)
                        .await?;
                    Ok(row)
                }
                .scope_boxed()
            })
            .await?;
        row.map(chat_from_row).transpose()
    }

    async fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(chats::table.filter(chats::id.eq(chat_id)))
            .set(chats::title.eq(title))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_chat_visibility(&self, chat_id: &str, visibility: Visibility) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(chats::table.filter(chats::id.eq(chat_id)))
            .set(chats::visibility.eq(visibility.as_str()))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_chat_last_context(&self, chat_id: &str, context: Value) -> Result<()> {
        let mut conn = self.conn().await?;
        let raw = to_json(&context)?;
        diesel::update(chats::table.filter(chats::id.eq(chat_id)))
            .set(chats::last_context.eq(raw))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn save_messages(&self, records: Vec<MessageRecord>) -> Result<Vec<MessageRecord>> {
        if records.is_empty() {
            return Ok(records);
        }
        {
            let mut conn = self.conn().await?;
            let batch = &records;
            conn.transaction::<_, ParleyError, _>(|conn| {
                async move {
                    for record in batch {
                        let parts = to_json(&record.parts)?;
                        let attachments = to_json(&record.attachments)?;
                        let row = NewMessage {
                            id: &record.id,
                            chat_id: &record.chat_id,
                            role: record.role.as_str(),
                            parts: &parts,
                            attachments: &attachments,
                            created_at: record.created_at,
                        };
                        diesel::insert_into(messages::table)
                            .values(&row)
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await?;
        }
        Ok(records)
    }

    async fn messages_by_chat(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MessageRow> = messages::table
            .filter(messages::chat_id.eq(chat_id))
            .order(messages::created_at.asc())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn message_by_id(&self, id: &str) -> Result<Option<MessageRecord>> {
        let mut conn = self.conn().await?;
        let row: Option<MessageRow> = messages::table
            .filter(messages::id.eq(id))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(message_from_row).transpose()
    }

    async fn delete_messages_from(&self, chat_id: &str, cutoff_ms: i64) -> Result<usize> {
        let mut conn = self.conn().await?;
        let chat_id = chat_id.to_string();
        let removed = conn
            .transaction::<_, ParleyError, _>(|conn| {
                async move {
                    let doomed: Vec<String> = messages::table
                        .filter(
                            messages::chat_id
                                .eq(&chat_id)
                                .and(messages::created_at.ge(cutoff_ms)),
                        )
                        .select(messages::id)
                        .load(conn)
                        .await?;
                    if doomed.is_empty() {
                        return Ok(0);
                    }
                    diesel::delete(
                        votes::table.filter(
                            votes::chat_id
                                .eq(&chat_id)
                                .and(votes::message_id.eq_any(&doomed)),
                        ),
                    )
                    .execute(conn)
                    .await?;
                    let removed =
                        diesel::delete(messages::table.filter(messages::id.eq_any(&doomed)))
                            .execute(conn)
                            .await?;
                    Ok(removed)
                }
                .scope_boxed()
            })
            .await?;
        Ok(removed)
    }

    async fn user_message_count_since(&self, user_id: &str, since_ms: i64) -> Result<usize> {
        let mut conn = self.conn().await?;
        let chat_ids: Vec<String> = chats::table
            .filter(chats::user_id.eq(user_id))
            .select(chats::id)
            .load(&mut conn)
            .await?;
        if chat_ids.is_empty() {
            return Ok(0);
        }
        let count: i64 = messages::table
            .filter(
                messages::chat_id
                    .eq_any(&chat_ids)
                    .and(messages::role.eq(Role::User.as_str()))
                    .and(messages::created_at.ge(since_ms)),
            )
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count as usize)
    }

    async fn upsert_vote(&self, vote: VoteRecord) -> Result<VoteRecord> {
        let mut conn = self.conn().await?;
        let new_vote = NewVote {
            chat_id: &vote.chat_id,
            message_id: &vote.message_id,
            is_upvoted: vote.is_upvoted,
        };
        diesel::insert_into(votes::table)
            .values(&new_vote)
            .on_conflict((votes::chat_id, votes::message_id))
            .do_update()
            .set(votes::is_upvoted.eq(vote.is_upvoted))
            .execute(&mut conn)
            .await?;
        Ok(vote)
    }

    async fn votes_by_chat(&self, chat_id: &str) -> Result<Vec<VoteRecord>> {
        let mut conn = self.conn().await?;
        let rows: Vec<VoteRow> = votes::table
            .filter(votes::chat_id.eq(chat_id))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(vote_from_row).collect())
    }

    async fn save_document(&self, document: DocumentRecord) -> Result<DocumentRecord> {
        let mut conn = self.conn().await?;
        let new_document = NewDocument {
            id: &document.id,
            user_id: &document.user_id,
            title: &document.title,
            kind: &document.kind,
            content: &document.content,
            created_at: document.created_at,
        };
        diesel::insert_into(documents::table)
            .values(&new_document)
            .execute(&mut conn)
            .await?;
        Ok(document)
    }

    async fn documents_by_id(&self, id: &str) -> Result<Vec<DocumentRecord>> {
        let mut conn = self.conn().await?;
        let rows: Vec<DocumentRow> = documents::table
            .filter(documents::id.eq(id))
            .order(documents::created_at.asc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(document_from_row).collect())
    }

    async fn delete_documents_after(
        &self,
        id: &str,
        cutoff_ms: i64,
    ) -> Result<Vec<DocumentRecord>> {
        let mut conn = self.conn().await?;
        let id = id.to_string();
        let removed = conn
            .transaction::<_, ParleyError, _>(|conn| {
                async move {
                    let doomed: Vec<DocumentRow> = documents::table
                        .filter(
                            documents::id
                                .eq(&id)
                                .and(documents::created_at.gt(cutoff_ms)),
                        )
                        .load(conn)
                        .await?;
                    if doomed.is_empty() {
                        return Ok(Vec::new());
                    }
                    diesel::delete(
                        suggestions::table.filter(
                            suggestions::document_id
                                .eq(&id)
                                .and(suggestions::document_created_at.gt(cutoff_ms)),
                        ),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(
                        documents::table.filter(
                            documents::id
                                .eq(&id)
                                .and(documents::created_at.gt(cutoff_ms)),
                        ),
                    )
                    .execute(conn)
                    .await?;
                    Ok(doomed)
                }
                .scope_boxed()
            })
            .await?;
        Ok(removed.into_iter().map(document_from_row).collect())
    }

    async fn save_suggestions(
        &self,
        records: Vec<SuggestionRecord>,
    ) -> Result<Vec<SuggestionRecord>> {
        if records.is_empty() {
            return Ok(records);
        }
        {
            let mut conn = self.conn().await?;
            let batch = &records;
            conn.transaction::<_, ParleyError, _>(|conn| {
                async move {
                    for record in batch {
                        let row = NewSuggestion {
                            id: &record.id,
                            document_id: &record.document_id,
                            document_created_at: record.document_created_at,
                            original_text: &record.original_text,
                            suggested_text: &record.suggested_text,
                            description: record.description.as_deref(),
                            is_resolved: record.is_resolved,
                            user_id: &record.user_id,
                            created_at: record.created_at,
                        };
                        diesel::insert_into(suggestions::table)
                            .values(&row)
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await?;
        }
        Ok(records)
    }

    async fn suggestions_by_document(&self, document_id: &str) -> Result<Vec<SuggestionRecord>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SuggestionRow> = suggestions::table
            .filter(suggestions::document_id.eq(document_id))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(suggestion_from_row).collect())
    }

    async fn create_stream(&self, stream: StreamRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        let new_stream = NewStream {
            id: &stream.id,
            chat_id: &stream.chat_id,
            created_at: stream.created_at,
        };
        diesel::insert_into(streams::table)
            .values(&new_stream)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn stream_ids_by_chat(&self, chat_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = streams::table
            .filter(streams::chat_id.eq(chat_id))
            .order(streams::created_at.asc())
            .select(streams::id)
            .load(&mut conn)
            .await?;
        Ok(ids)
    }
}
