//! Codex and Call operations.

use cadence_types::{Call, CallMode, Codex, Timestamp, new_id};
use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{TaskStore, enum_col, fmt_ts, ts_col};
use crate::{Result, StoreError};

const CODEX_COLUMNS: &str = "id, name, payload, checksum, description, created_at";

/// Hex-encoded sha256 of a codex payload.
pub fn payload_checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

impl TaskStore {
    // ── Codices ─────────────────────────────────────────────────────

    /// Store a new codex. Names are unique; a new version needs a new name.
    pub fn create_codex(
        &self,
        name: &str,
        payload: &str,
        description: Option<&str>,
        now: Timestamp,
    ) -> Result<Codex> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("codex name must not be empty".into()));
        }
        let codex = Codex {
            id: new_id(),
            name: name.to_string(),
            payload: payload.to_string(),
            checksum: payload_checksum(payload),
            description: description.map(str::to_string),
            created_at: now,
        };

        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM codices WHERE name = ?1)",
            params![codex.name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::Validation(format!(
                "codex name already in use: {}",
                codex.name
            )));
        }

        conn.execute(
            "INSERT INTO codices (id, name, payload, checksum, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                codex.id,
                codex.name,
                codex.payload,
                codex.checksum,
                codex.description,
                fmt_ts(&codex.created_at),
            ],
        )?;

        debug!(codex_id = %codex.id, name = %codex.name, "Created codex");
        Ok(codex)
    }

    pub fn get_codex(&self, id: &str) -> Result<Codex> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CODEX_COLUMNS} FROM codices WHERE id = ?1"),
            params![id],
            row_to_codex,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("codex", id))
    }

    /// Resolve a codex reference, trying the id first and then the name.
    pub fn find_codex(&self, reference: &str) -> Result<Codex> {
        let conn = self.conn();
        let by_id = conn
            .query_row(
                &format!("SELECT {CODEX_COLUMNS} FROM codices WHERE id = ?1"),
                params![reference],
                row_to_codex,
            )
            .optional()?;
        if let Some(codex) = by_id {
            return Ok(codex);
        }
        conn.query_row(
            &format!("SELECT {CODEX_COLUMNS} FROM codices WHERE name = ?1"),
            params![reference],
            row_to_codex,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("codex", reference))
    }

    /// All codices, oldest first.
    pub fn list_codices(&self) -> Result<Vec<Codex>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CODEX_COLUMNS} FROM codices ORDER BY created_at ASC, name ASC"
        ))?;
        let rows = stmt.query_map([], row_to_codex)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ── Calls ───────────────────────────────────────────────────────

    pub fn create_call(&self, codex_id: &str, mode: CallMode) -> Result<Call> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM codices WHERE id = ?1)",
            params![codex_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::not_found("codex", codex_id));
        }

        let call = Call {
            id: new_id(),
            codex_id: codex_id.to_string(),
            mode,
        };
        conn.execute(
            "INSERT INTO calls (id, codex_id, mode) VALUES (?1, ?2, ?3)",
            params![call.id, call.codex_id, call.mode.as_str()],
        )?;
        Ok(call)
    }

    pub fn get_call(&self, id: &str) -> Result<Call> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, codex_id, mode FROM calls WHERE id = ?1",
            params![id],
            |row| {
                Ok(Call {
                    id: row.get(0)?,
                    codex_id: row.get(1)?,
                    mode: enum_col(row, 2)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("call", id))
    }
}

fn row_to_codex(row: &rusqlite::Row<'_>) -> rusqlite::Result<Codex> {
    Ok(Codex {
        id: row.get(0)?,
        name: row.get(1)?,
        payload: row.get(2)?,
        checksum: row.get(3)?,
        description: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}
