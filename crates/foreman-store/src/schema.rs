// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions).
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            id TEXT PRIMARY KEY,
            provider_type TEXT NOT NULL,
            base_url TEXT,
            secret BLOB NOT NULL,
            create_time TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS models (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL,
            name TEXT NOT NULL,
            context_window INTEGER NOT NULL,
            input_cost REAL NOT NULL DEFAULT 0,
            output_cost REAL NOT NULL DEFAULT 0,
            cache_write_cost REAL NOT NULL DEFAULT 0,
            cache_read_cost REAL NOT NULL DEFAULT 0,
            create_time TEXT NOT NULL,
            FOREIGN KEY (provider_id) REFERENCES providers(id)
        );

        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            instructions TEXT NOT NULL,
            model_id TEXT NOT NULL,
            compaction_enabled INTEGER NOT NULL DEFAULT 1,
            continue_without_tools INTEGER NOT NULL DEFAULT 0,
            create_time TEXT NOT NULL,
            update_time TEXT NOT NULL,
            FOREIGN KEY (model_id) REFERENCES models(id)
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            parent_task_id TEXT,
            phase TEXT NOT NULL DEFAULT 'awaiting',
            desired_phase TEXT NOT NULL DEFAULT 'awaiting',
            project_directory TEXT,
            anchor_message_id TEXT,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cache_write_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            total_cost REAL NOT NULL DEFAULT 0,
            create_time TEXT NOT NULL,
            update_time TEXT NOT NULL,
            FOREIGN KEY (agent_id) REFERENCES agents(id),
            FOREIGN KEY (parent_task_id) REFERENCES tasks(id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            source TEXT NOT NULL,
            content TEXT NOT NULL,
            usage TEXT,
            processed_time TEXT,
            from_task_id TEXT,
            create_time TEXT NOT NULL,
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS task_summaries (
            task_id TEXT PRIMARY KEY,
            message_anchor TEXT NOT NULL,
            content TEXT NOT NULL,
            token_budget INTEGER NOT NULL,
            create_time TEXT NOT NULL,
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE,
            FOREIGN KEY (message_anchor) REFERENCES messages(id)
        );

        CREATE TABLE IF NOT EXISTS tokens (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            hash TEXT NOT NULL UNIQUE,
            token_type TEXT NOT NULL,
            expire_time TEXT,
            create_time TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_task_time
            ON messages(task_id, create_time);
        CREATE INDEX IF NOT EXISTS idx_messages_from_task
            ON messages(from_task_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_parent
            ON tasks(parent_task_id);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS task_summaries;
        DROP TABLE IF EXISTS messages;
        DROP TABLE IF EXISTS tasks;
        DROP TABLE IF EXISTS agents;
        DROP TABLE IF EXISTS models;
        DROP TABLE IF EXISTS providers;
        DROP TABLE IF EXISTS tokens;
        "#,
    )?;
    Ok(())
}
