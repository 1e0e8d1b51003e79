// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use rusqlite::{params, OptionalExtension, Row};

use crate::rows::{ConfigRow, ConfigUpsert};
use crate::{now, Store};

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<ConfigRow> {
    Ok(ConfigRow {
        id: row.get("id")?,
        name: row.get("name")?,
        api_format: row.get("api_format")?,
        api_key: row.get("api_key")?,
        base_url: row.get("base_url")?,
        model: row.get("model")?,
        temperature: row.get("temperature")?,
        max_tokens: row.get("max_tokens")?,
        max_context_tokens: row.get("max_context_tokens")?,
        is_default: row.get::<_, i64>("is_default")? != 0,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn create_config(&self, input: &ConfigUpsert) -> anyhow::Result<ConfigRow> {
        let conn = self.lock();
        let id = uuid::Uuid::new_v4().to_string();
        // Only one config may be the default at a time.
        if input.is_default {
            conn.execute("UPDATE configs SET is_default = 0", [])?;
        }
        conn.execute(
            "INSERT INTO configs (id, name, api_format, api_key, base_url, model, temperature, \
             max_tokens, max_context_tokens, is_default, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                input.name,
                input.api_format.clone().unwrap_or_else(|| "openai_chat".into()),
                input.api_key,
                input.base_url,
                input.model,
                input.temperature.unwrap_or(0.7),
                input.max_tokens.unwrap_or(2000),
                input.max_context_tokens.unwrap_or(0),
                input.is_default as i64,
                now(),
            ],
        )
        .context("inserting config")?;
        drop(conn);
        self.get_config(&id)?
            .context("config vanished after insert")
    }

    pub fn get_config(&self, id: &str) -> anyhow::Result<Option<ConfigRow>> {
        let conn = self.lock();
        let row = conn
            .query_row("SELECT * FROM configs WHERE id = ?1", [id], row_to_config)
            .optional()?;
        Ok(row)
    }

    pub fn get_default_config(&self) -> anyhow::Result<Option<ConfigRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT * FROM configs WHERE is_default = 1 LIMIT 1",
                [],
                row_to_config,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_configs(&self) -> anyhow::Result<Vec<ConfigRow>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM configs ORDER BY is_default DESC, created_at DESC")?;
        let rows = stmt
            .query_map([], row_to_config)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_config(&self, id: &str, input: &ConfigUpsert) -> anyhow::Result<Option<ConfigRow>> {
        {
            let conn = self.lock();
            if input.is_default {
                conn.execute("UPDATE configs SET is_default = 0", [])?;
            }
            let changed = conn.execute(
                "UPDATE configs SET name = ?2, api_format = COALESCE(?3, api_format), \
                 api_key = ?4, base_url = ?5, model = ?6, \
                 temperature = COALESCE(?7, temperature), \
                 max_tokens = COALESCE(?8, max_tokens), \
                 max_context_tokens = COALESCE(?9, max_context_tokens), \
                 is_default = ?10 \
                 WHERE id = ?1",
                params![
                    id,
                    input.name,
                    input.api_format,
                    input.api_key,
                    input.base_url,
                    input.model,
                    input.temperature,
                    input.max_tokens,
                    input.max_context_tokens,
                    input.is_default as i64,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
        }
        self.get_config(id)
    }

    pub fn delete_config(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.lock();
        let n = conn.execute("DELETE FROM configs WHERE id = ?1", [id])?;
        Ok(n > 0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(name: &str, default: bool) -> ConfigUpsert {
        ConfigUpsert {
            name: name.into(),
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
            is_default: default,
            ..ConfigUpsert::default()
        }
    }

    #[test]
    fn create_and_get_config() {
        let store = Store::open_in_memory().unwrap();
        let created = store.create_config(&upsert("dev", false)).unwrap();
        let fetched = store.get_config(&created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "dev");
        assert_eq!(fetched.api_format, "openai_chat");
        assert_eq!(fetched.max_tokens, 2000);
    }

    #[test]
    fn only_one_default_config() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_config(&upsert("a", true)).unwrap();
        let b = store.create_config(&upsert("b", true)).unwrap();
        assert!(!store.get_config(&a.id).unwrap().unwrap().is_default);
        assert!(store.get_config(&b.id).unwrap().unwrap().is_default);
        assert_eq!(store.get_default_config().unwrap().unwrap().id, b.id);
    }

    #[test]
    fn update_config_partial_fields_keep_previous() {
        let store = Store::open_in_memory().unwrap();
        let mut input = upsert("dev", false);
        input.temperature = Some(0.1);
        let created = store.create_config(&input).unwrap();

        let mut update = upsert("dev2", false);
        update.temperature = None; // COALESCE keeps 0.1
        let updated = store.update_config(&created.id, &update).unwrap().unwrap();
        assert_eq!(updated.name, "dev2");
        assert!((updated.temperature - 0.1).abs() < 1e-9);
    }

    #[test]
    fn update_missing_config_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.update_config("nope", &upsert("x", false)).unwrap().is_none());
    }

    #[test]
    fn delete_config_reports_existence() {
        let store = Store::open_in_memory().unwrap();
        let created = store.create_config(&upsert("gone", false)).unwrap();
        assert!(store.delete_config(&created.id).unwrap());
        assert!(!store.delete_config(&created.id).unwrap());
    }

    #[test]
    fn list_configs_orders_default_first() {
        let store = Store::open_in_memory().unwrap();
        store.create_config(&upsert("plain", false)).unwrap();
        store.create_config(&upsert("main", true)).unwrap();
        let all = store.list_configs().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].is_default);
    }
}
