// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::crypto::hash_token;
use crate::schema::init_schema;
use crate::types::*;
use crate::{Result, StoreError};

/// Shared handle over the SQLite connection.
///
/// The connection is guarded by a mutex; every public method takes the lock
/// for the duration of one statement or one transaction.  Multi-row
/// mutations the step loop depends on (`commit_turn`, `commit_tool_results`,
/// `spawn_child`, `replace_summary`) are each a single transaction.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

pub struct NewAgent {
    pub name: String,
    pub instructions: String,
    pub model_id: Uuid,
    pub compaction_enabled: bool,
    pub continue_without_tools: bool,
}

pub struct NewModel {
    pub provider_id: Uuid,
    pub name: String,
    pub context_window: u32,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_write_cost: f64,
    pub cache_read_cost: f64,
}

pub struct NewProvider {
    pub provider_type: ProviderType,
    pub base_url: Option<String>,
    pub secret: Vec<u8>,
}

pub struct NewTask {
    pub agent_id: Uuid,
    pub parent_task_id: Option<Uuid>,
    pub project_directory: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Explicit id; generated when `None`.  The reconciler pre-allocates
    /// assistant ids so streaming chunk events can reference the row
    /// before it exists.
    pub id: Option<Uuid>,
    pub task_id: Uuid,
    pub source: MessageSource,
    pub blocks: Vec<MessageBlock>,
    pub usage: Option<Usage>,
    pub from_task_id: Option<Uuid>,
    /// Insert with `processed_time` already set.  Used for assistant turns
    /// that carry no tool calls — nothing will ever pick them up.
    pub processed: bool,
}

impl NewMessage {
    pub fn user_text(task_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            id: None,
            task_id,
            source: MessageSource::User,
            blocks: vec![MessageBlock::text(text)],
            usage: None,
            from_task_id: None,
            processed: false,
        }
    }
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::Invalid { field: "id", reason: e.to_string() })
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;
        debug!(path = %db_path.display(), "store opened");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement; the
        // connection itself is still usable for independent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Providers ────────────────────────────────────────────────────────────

    pub fn create_provider(&self, new: NewProvider) -> Result<ProviderRow> {
        let row = ProviderRow {
            id: Uuid::new_v4(),
            provider_type: new.provider_type,
            base_url: new.base_url,
            secret: new.secret,
            create_time: Utc::now(),
        };
        self.lock().execute(
            "INSERT INTO providers (id, provider_type, base_url, secret, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id.to_string(),
                row.provider_type.as_str(),
                row.base_url,
                row.secret,
                row.create_time.to_rfc3339(),
            ],
        )?;
        Ok(row)
    }

    pub fn get_provider(&self, id: Uuid) -> Result<ProviderRow> {
        self.lock()
            .query_row(
                "SELECT id, provider_type, base_url, secret, create_time
                 FROM providers WHERE id = ?1",
                [id.to_string()],
                map_provider,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("provider", id))
    }

    // ── Models ───────────────────────────────────────────────────────────────

    pub fn create_model(&self, new: NewModel) -> Result<ModelRow> {
        let row = ModelRow {
            id: Uuid::new_v4(),
            provider_id: new.provider_id,
            name: new.name,
            context_window: new.context_window,
            input_cost: new.input_cost,
            output_cost: new.output_cost,
            cache_write_cost: new.cache_write_cost,
            cache_read_cost: new.cache_read_cost,
            create_time: Utc::now(),
        };
        self.lock().execute(
            "INSERT INTO models (id, provider_id, name, context_window, input_cost,
                                 output_cost, cache_write_cost, cache_read_cost, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.id.to_string(),
                row.provider_id.to_string(),
                row.name,
                row.context_window,
                row.input_cost,
                row.output_cost,
                row.cache_write_cost,
                row.cache_read_cost,
                row.create_time.to_rfc3339(),
            ],
        )?;
        Ok(row)
    }

    pub fn get_model(&self, id: Uuid) -> Result<ModelRow> {
        self.lock()
            .query_row(
                "SELECT id, provider_id, name, context_window, input_cost, output_cost,
                        cache_write_cost, cache_read_cost, create_time
                 FROM models WHERE id = ?1",
                [id.to_string()],
                map_model,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("model", id))
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    pub fn create_agent(&self, new: NewAgent) -> Result<AgentRow> {
        let now = Utc::now();
        let row = AgentRow {
            id: Uuid::new_v4(),
            name: new.name,
            instructions: new.instructions,
            model_id: new.model_id,
            compaction_enabled: new.compaction_enabled,
            continue_without_tools: new.continue_without_tools,
            create_time: now,
            update_time: now,
        };
        self.lock().execute(
            "INSERT INTO agents (id, name, instructions, model_id, compaction_enabled,
                                 continue_without_tools, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id.to_string(),
                row.name,
                row.instructions,
                row.model_id.to_string(),
                row.compaction_enabled,
                row.continue_without_tools,
                row.create_time.to_rfc3339(),
                row.update_time.to_rfc3339(),
            ],
        )?;
        Ok(row)
    }

    pub fn get_agent(&self, id: Uuid) -> Result<AgentRow> {
        self.lock()
            .query_row(
                "SELECT id, name, instructions, model_id, compaction_enabled,
                        continue_without_tools, create_time, update_time
                 FROM agents WHERE id = ?1",
                [id.to_string()],
                map_agent,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("agent", id))
    }

    pub fn get_agent_by_name(&self, name: &str) -> Result<AgentRow> {
        self.lock()
            .query_row(
                "SELECT id, name, instructions, model_id, compaction_enabled,
                        continue_without_tools, create_time, update_time
                 FROM agents WHERE name = ?1",
                [name],
                map_agent,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("agent", name))
    }

    pub fn list_agent_names(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT name FROM agents ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    pub fn create_task(&self, new: NewTask) -> Result<TaskRow> {
        let conn = self.lock();
        let row = insert_task_inner(&conn, new, TaskPhase::Awaiting, TaskPhase::Awaiting)?;
        Ok(row)
    }

    pub fn get_task(&self, id: Uuid) -> Result<TaskRow> {
        self.lock()
            .query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
                [id.to_string()],
                map_task,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("task", id))
    }

    pub fn delete_task(&self, id: Uuid) -> Result<()> {
        let n = self.lock().execute("DELETE FROM tasks WHERE id = ?1", [id.to_string()])?;
        if n == 0 {
            return Err(StoreError::not_found("task", id));
        }
        Ok(())
    }

    pub fn children_of(&self, parent: Uuid) -> Result<Vec<TaskRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE parent_task_id = ?1 ORDER BY create_time"
        ))?;
        let rows = stmt
            .query_map([parent.to_string()], map_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_task_phase(&self, id: Uuid, phase: TaskPhase) -> Result<()> {
        let n = self.lock().execute(
            "UPDATE tasks SET phase = ?2, update_time = ?3 WHERE id = ?1",
            params![id.to_string(), phase.as_str(), Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("task", id));
        }
        Ok(())
    }

    pub fn set_desired_phase(&self, id: Uuid, phase: TaskPhase) -> Result<()> {
        let n = self.lock().execute(
            "UPDATE tasks SET desired_phase = ?2, update_time = ?3 WHERE id = ?1",
            params![id.to_string(), phase.as_str(), Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("task", id));
        }
        Ok(())
    }

    pub fn set_anchor_message(&self, id: Uuid, anchor: Option<Uuid>) -> Result<()> {
        self.lock().execute(
            "UPDATE tasks SET anchor_message_id = ?2, update_time = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                anchor.map(|a| a.to_string()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    pub fn insert_message(&self, new: NewMessage) -> Result<MessageRow> {
        let conn = self.lock();
        insert_message_inner(&conn, new)
    }

    pub fn get_message(&self, id: Uuid) -> Result<MessageRow> {
        self.lock()
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                map_message,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("message", id))
    }

    /// All messages of a task in `create_time` order (insertion order for
    /// same-timestamp rows, via the rowid tiebreak).
    pub fn list_messages(&self, task_id: Uuid) -> Result<Vec<MessageRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE task_id = ?1 ORDER BY create_time, rowid"
        ))?;
        let rows = stmt
            .query_map([task_id.to_string()], map_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Messages of a task created after the given message (replay support).
    pub fn messages_after(&self, task_id: Uuid, after: Uuid) -> Result<Vec<MessageRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE task_id = ?1
               AND rowid > (SELECT rowid FROM messages WHERE id = ?2)
             ORDER BY create_time, rowid"
        ))?;
        let rows = stmt
            .query_map(params![task_id.to_string(), after.to_string()], map_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_message_processed(&self, id: Uuid) -> Result<()> {
        let n = self.lock().execute(
            "UPDATE messages SET processed_time = ?2 WHERE id = ?1 AND processed_time IS NULL",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        // Already-processed is fine: the marker is written at most once.
        let _ = n;
        Ok(())
    }

    pub fn unprocessed_count(&self, task_id: Uuid) -> Result<u64> {
        let n: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM messages WHERE task_id = ?1 AND processed_time IS NULL",
            [task_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Task-source messages a set of children sent to this parent, oldest
    /// first.  Used by `await_tasks` to collect subtask reports.
    pub fn child_messages(&self, parent: Uuid, from: &[Uuid]) -> Result<Vec<MessageRow>> {
        let all = self.list_messages(parent)?;
        Ok(all
            .into_iter()
            .filter(|m| {
                m.source == MessageSource::Task
                    && m.from_task_id.map(|f| from.contains(&f)).unwrap_or(false)
            })
            .collect())
    }

    // ── Step transactions ────────────────────────────────────────────────────

    /// Persist one model turn atomically: mark the picked message processed,
    /// insert the assistant reply, and fold its usage into the task totals.
    pub fn commit_turn(
        &self,
        picked_id: Uuid,
        assistant: NewMessage,
        model: &ModelRow,
    ) -> Result<MessageRow> {
        let task_id = assistant.task_id;
        let usage = assistant.usage.unwrap_or_default();
        let cost = usage.cost(model);

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE messages SET processed_time = ?2 WHERE id = ?1",
            params![picked_id.to_string(), Utc::now().to_rfc3339()],
        )?;
        let row = insert_message_inner(&tx, assistant)?;
        tx.execute(
            "UPDATE tasks SET
                input_tokens = input_tokens + ?2,
                output_tokens = output_tokens + ?3,
                cache_write_tokens = cache_write_tokens + ?4,
                cache_read_tokens = cache_read_tokens + ?5,
                total_cost = total_cost + ?6,
                update_time = ?7
             WHERE id = ?1",
            params![
                task_id.to_string(),
                usage.input_tokens as i64,
                usage.output_tokens as i64,
                usage.cache_write_tokens as i64,
                usage.cache_read_tokens as i64,
                cost,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(row)
    }

    /// Persist tool results atomically: insert the system-source message
    /// and mark the interpreted assistant message processed.
    pub fn commit_tool_results(
        &self,
        assistant_id: Uuid,
        results: NewMessage,
    ) -> Result<MessageRow> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let row = insert_message_inner(&tx, results)?;
        tx.execute(
            "UPDATE messages SET processed_time = ?2 WHERE id = ?1",
            params![assistant_id.to_string(), Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(row)
    }

    /// Create a child task with its initial user message, and park the
    /// parent's desired phase at `suspended` until an await completes.
    pub fn spawn_child(
        &self,
        parent: &TaskRow,
        agent_id: Uuid,
        prompt: &str,
    ) -> Result<(TaskRow, MessageRow)> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let child = insert_task_inner(
            &tx,
            NewTask {
                agent_id,
                parent_task_id: Some(parent.id),
                project_directory: parent.project_directory.clone(),
            },
            TaskPhase::Awaiting,
            TaskPhase::Awaiting,
        )?;
        let msg = insert_message_inner(&tx, NewMessage::user_text(child.id, prompt))?;
        tx.execute(
            "UPDATE tasks SET desired_phase = ?2, update_time = ?3 WHERE id = ?1",
            params![
                parent.id.to_string(),
                TaskPhase::Suspended.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok((child, msg))
    }

    // ── Summaries ────────────────────────────────────────────────────────────

    pub fn get_task_summary(&self, task_id: Uuid) -> Result<Option<TaskSummaryRow>> {
        self.lock()
            .query_row(
                "SELECT task_id, message_anchor, content, token_budget, create_time
                 FROM task_summaries WHERE task_id = ?1",
                [task_id.to_string()],
                map_summary,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Replace the task's summary row (at most one per task).
    pub fn replace_summary(
        &self,
        task_id: Uuid,
        anchor: Uuid,
        content: &SummaryContent,
        token_budget: u32,
    ) -> Result<TaskSummaryRow> {
        let row = TaskSummaryRow {
            task_id,
            message_anchor: anchor,
            content: content.clone(),
            token_budget,
            create_time: Utc::now(),
        };
        self.lock().execute(
            "INSERT INTO task_summaries (task_id, message_anchor, content, token_budget, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(task_id) DO UPDATE SET
                message_anchor = ?2, content = ?3, token_budget = ?4, create_time = ?5",
            params![
                row.task_id.to_string(),
                row.message_anchor.to_string(),
                serde_json::to_string(&row.content)?,
                row.token_budget,
                row.create_time.to_rfc3339(),
            ],
        )?;
        Ok(row)
    }

    // ── Tokens ───────────────────────────────────────────────────────────────

    pub fn create_token(
        &self,
        name: &str,
        token_type: &str,
        expire_time: Option<DateTime<Utc>>,
        raw: &str,
    ) -> Result<TokenRow> {
        let row = TokenRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            hash: hash_token(raw),
            token_type: token_type.to_string(),
            expire_time,
            create_time: Utc::now(),
        };
        self.lock().execute(
            "INSERT INTO tokens (id, name, hash, token_type, expire_time, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id.to_string(),
                row.name,
                row.hash,
                row.token_type,
                row.expire_time.map(|t| t.to_rfc3339()),
                row.create_time.to_rfc3339(),
            ],
        )?;
        Ok(row)
    }

    /// Look up a raw token by hash.  Expired tokens resolve to `None`.
    pub fn verify_token(&self, raw: &str) -> Result<Option<TokenRow>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, name, hash, token_type, expire_time, create_time
                 FROM tokens WHERE hash = ?1",
                [hash_token(raw)],
                map_token,
            )
            .optional()?;
        Ok(row.filter(|t| !t.is_expired(Utc::now())))
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

const TASK_COLS: &str = "id, agent_id, parent_task_id, phase, desired_phase, \
     project_directory, anchor_message_id, input_tokens, output_tokens, \
     cache_write_tokens, cache_read_tokens, total_cost, create_time, update_time";

const MESSAGE_COLS: &str =
    "id, task_id, source, content, usage, processed_time, from_task_id, create_time";

fn sql_err(e: StoreError) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn map_provider(row: &Row<'_>) -> rusqlite::Result<ProviderRow> {
    let id: String = row.get(0)?;
    let ptype: String = row.get(1)?;
    let create: String = row.get(4)?;
    Ok(ProviderRow {
        id: parse_uuid(&id).map_err(sql_err)?,
        provider_type: ProviderType::parse(&ptype).map_err(sql_err)?,
        base_url: row.get(2)?,
        secret: row.get(3)?,
        create_time: parse_time(&create),
    })
}

fn map_model(row: &Row<'_>) -> rusqlite::Result<ModelRow> {
    let id: String = row.get(0)?;
    let provider: String = row.get(1)?;
    let create: String = row.get(8)?;
    Ok(ModelRow {
        id: parse_uuid(&id).map_err(sql_err)?,
        provider_id: parse_uuid(&provider).map_err(sql_err)?,
        name: row.get(2)?,
        context_window: row.get(3)?,
        input_cost: row.get(4)?,
        output_cost: row.get(5)?,
        cache_write_cost: row.get(6)?,
        cache_read_cost: row.get(7)?,
        create_time: parse_time(&create),
    })
}

fn map_agent(row: &Row<'_>) -> rusqlite::Result<AgentRow> {
    let id: String = row.get(0)?;
    let model: String = row.get(3)?;
    let create: String = row.get(6)?;
    let update: String = row.get(7)?;
    Ok(AgentRow {
        id: parse_uuid(&id).map_err(sql_err)?,
        name: row.get(1)?,
        instructions: row.get(2)?,
        model_id: parse_uuid(&model).map_err(sql_err)?,
        compaction_enabled: row.get(4)?,
        continue_without_tools: row.get(5)?,
        create_time: parse_time(&create),
        update_time: parse_time(&update),
    })
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    let id: String = row.get(0)?;
    let agent: String = row.get(1)?;
    let parent: Option<String> = row.get(2)?;
    let phase: String = row.get(3)?;
    let desired: String = row.get(4)?;
    let anchor: Option<String> = row.get(6)?;
    let create: String = row.get(12)?;
    let update: String = row.get(13)?;
    Ok(TaskRow {
        id: parse_uuid(&id).map_err(sql_err)?,
        agent_id: parse_uuid(&agent).map_err(sql_err)?,
        parent_task_id: parent.as_deref().map(parse_uuid).transpose().map_err(sql_err)?,
        phase: TaskPhase::parse(&phase).map_err(sql_err)?,
        desired_phase: TaskPhase::parse(&desired).map_err(sql_err)?,
        project_directory: row.get(5)?,
        anchor_message_id: anchor.as_deref().map(parse_uuid).transpose().map_err(sql_err)?,
        input_tokens: row.get(7)?,
        output_tokens: row.get(8)?,
        cache_write_tokens: row.get(9)?,
        cache_read_tokens: row.get(10)?,
        total_cost: row.get(11)?,
        create_time: parse_time(&create),
        update_time: parse_time(&update),
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let id: String = row.get(0)?;
    let task: String = row.get(1)?;
    let source: String = row.get(2)?;
    let content: String = row.get(3)?;
    let usage: Option<String> = row.get(4)?;
    let processed: Option<String> = row.get(5)?;
    let from_task: Option<String> = row.get(6)?;
    let create: String = row.get(7)?;
    Ok(MessageRow {
        id: parse_uuid(&id).map_err(sql_err)?,
        task_id: parse_uuid(&task).map_err(sql_err)?,
        source: MessageSource::parse(&source).map_err(sql_err)?,
        blocks: serde_json::from_str(&content)
            .map_err(|e| sql_err(StoreError::Serde(e)))?,
        usage: usage
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| sql_err(StoreError::Serde(e)))?,
        processed_time: processed.as_deref().map(parse_time),
        from_task_id: from_task.as_deref().map(parse_uuid).transpose().map_err(sql_err)?,
        create_time: parse_time(&create),
    })
}

fn map_summary(row: &Row<'_>) -> rusqlite::Result<TaskSummaryRow> {
    let task: String = row.get(0)?;
    let anchor: String = row.get(1)?;
    let content: String = row.get(2)?;
    let create: String = row.get(4)?;
    Ok(TaskSummaryRow {
        task_id: parse_uuid(&task).map_err(sql_err)?,
        message_anchor: parse_uuid(&anchor).map_err(sql_err)?,
        content: serde_json::from_str(&content).map_err(|e| sql_err(StoreError::Serde(e)))?,
        token_budget: row.get(3)?,
        create_time: parse_time(&create),
    })
}

fn map_token(row: &Row<'_>) -> rusqlite::Result<TokenRow> {
    let id: String = row.get(0)?;
    let expire: Option<String> = row.get(4)?;
    let create: String = row.get(5)?;
    Ok(TokenRow {
        id: parse_uuid(&id).map_err(sql_err)?,
        name: row.get(1)?,
        hash: row.get(2)?,
        token_type: row.get(3)?,
        expire_time: expire.as_deref().map(parse_time),
        create_time: parse_time(&create),
    })
}

// ── Insert helpers shared between plain calls and transactions ────────────────

fn insert_task_inner(
    conn: &Connection,
    new: NewTask,
    phase: TaskPhase,
    desired: TaskPhase,
) -> Result<TaskRow> {
    let now = Utc::now();
    let row = TaskRow {
        id: Uuid::new_v4(),
        agent_id: new.agent_id,
        parent_task_id: new.parent_task_id,
        phase,
        desired_phase: desired,
        project_directory: new.project_directory,
        anchor_message_id: None,
        input_tokens: 0,
        output_tokens: 0,
        cache_write_tokens: 0,
        cache_read_tokens: 0,
        total_cost: 0.0,
        create_time: now,
        update_time: now,
    };
    conn.execute(
        "INSERT INTO tasks (id, agent_id, parent_task_id, phase, desired_phase,
                            project_directory, create_time, update_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.id.to_string(),
            row.agent_id.to_string(),
            row.parent_task_id.map(|p| p.to_string()),
            row.phase.as_str(),
            row.desired_phase.as_str(),
            row.project_directory,
            row.create_time.to_rfc3339(),
            row.update_time.to_rfc3339(),
        ],
    )?;
    Ok(row)
}

fn insert_message_inner(conn: &Connection, new: NewMessage) -> Result<MessageRow> {
    let now = Utc::now();
    let row = MessageRow {
        id: new.id.unwrap_or_else(Uuid::new_v4),
        task_id: new.task_id,
        source: new.source,
        blocks: new.blocks,
        usage: new.usage,
        processed_time: new.processed.then_some(now),
        from_task_id: new.from_task_id,
        create_time: now,
    };
    conn.execute(
        "INSERT INTO messages (id, task_id, source, content, usage,
                               processed_time, from_task_id, create_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.id.to_string(),
            row.task_id.to_string(),
            row.source.as_str(),
            serde_json::to_string(&row.blocks)?,
            row.usage.as_ref().map(serde_json::to_string).transpose()?,
            row.processed_time.map(|t| t.to_rfc3339()),
            row.from_task_id.map(|f| f.to_string()),
            row.create_time.to_rfc3339(),
        ],
    )?;
    Ok(row)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
