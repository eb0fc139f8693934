mod schema;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use uuid::Uuid;

use crate::models::*;

/// Durable store for sessions, claims, intents, manifests and artifacts.
///
/// Every method runs under the connection lock, so each call is atomic with
/// respect to the others. Multi-statement operations that must be all or
/// nothing (`end_session`) run inside a SQL transaction.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "rocket-warden")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("warden.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Session operations
    // ============================================================

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO sessions (id, project, agent_name, intent_id, status, started_at, last_activity_at, ended_at, end_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                session.id.to_string(),
                &session.project,
                &session.agent_name,
                session.intent_id.map(|u| u.to_string()),
                session.status.as_str(),
                format_datetime(session.started_at),
                format_datetime(session.last_activity_at),
                session.ended_at.map(format_datetime),
                session.end_reason.map(|r| r.as_str()),
            ),
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let session = conn
            .query_row(
                "SELECT id, project, agent_name, intent_id, status, started_at, last_activity_at, ended_at, end_reason
                 FROM sessions WHERE id = ?",
                [id.to_string()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");

        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(project) = &filter.project {
            clauses.push("project = ?");
            params.push(Box::new(project.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(after) = filter.started_after {
            clauses.push("started_at >= ?");
            params.push(Box::new(format_datetime(after)));
        }
        if let Some(before) = filter.started_before {
            clauses.push("started_at < ?");
            params.push(Box::new(format_datetime(before)));
        }

        let sql = format!(
            "SELECT id, project, agent_name, intent_id, status, started_at, last_activity_at, ended_at, end_reason
             FROM sessions {} ORDER BY started_at",
            where_clause(&clauses)
        );
        let params_ref: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params_ref.as_slice(), session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Record activity on an active session. Returns false if the session is
    /// unknown or no longer active.
    pub fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE sessions SET last_activity_at = ? WHERE id = ? AND status = 'active'",
            (format_datetime(at), id.to_string()),
        )?;
        Ok(rows > 0)
    }

    /// Release every unreleased claim of the session and mark it ended, in one
    /// transaction. Ending an already ended session changes nothing.
    pub fn end_session(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: EndReason,
    ) -> Result<Option<SessionEnded>> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let Some(session) = tx
            .query_row(
                "SELECT id, project, agent_name, intent_id, status, started_at, last_activity_at, ended_at, end_reason
                 FROM sessions WHERE id = ?",
                [id.to_string()],
                session_from_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        if !session.is_active() {
            return Ok(Some(SessionEnded {
                session,
                released: Vec::new(),
            }));
        }

        let released = {
            let mut stmt = tx.prepare(
                "SELECT id, session_id, pattern, claim_type, created_at, released_at
                 FROM claims WHERE session_id = ? AND released_at IS NULL ORDER BY created_at",
            )?;
            let claims = stmt
                .query_map([id.to_string()], claim_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            claims
        };

        let stamp = format_datetime(at);
        tx.execute(
            "UPDATE claims SET released_at = ? WHERE session_id = ? AND released_at IS NULL",
            (&stamp, id.to_string()),
        )?;
        tx.execute(
            "UPDATE sessions SET status = 'ended', ended_at = ?, end_reason = ? WHERE id = ?",
            (&stamp, reason.as_str(), id.to_string()),
        )?;
        tx.commit()?;

        let released = released
            .into_iter()
            .map(|claim| Claim {
                released_at: Some(at),
                ..claim
            })
            .collect();

        Ok(Some(SessionEnded {
            session: Session {
                status: SessionStatus::Ended,
                ended_at: Some(at),
                end_reason: Some(reason),
                ..session
            },
            released,
        }))
    }

    // ============================================================
    // Claim operations
    // ============================================================

    pub fn insert_claim(&self, claim: &Claim) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO claims (id, session_id, pattern, claim_type, created_at, released_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                claim.id.to_string(),
                claim.session_id.to_string(),
                &claim.pattern,
                claim.claim_type.as_str(),
                format_datetime(claim.created_at),
                claim.released_at.map(format_datetime),
            ),
        )?;
        Ok(())
    }

    pub fn get_claim(&self, id: Uuid) -> Result<Option<Claim>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let claim = conn
            .query_row(
                "SELECT id, session_id, pattern, claim_type, created_at, released_at
                 FROM claims WHERE id = ?",
                [id.to_string()],
                claim_from_row,
            )
            .optional()?;
        Ok(claim)
    }

    pub fn get_claims_by_session(&self, session_id: Uuid) -> Result<Vec<Claim>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, session_id, pattern, claim_type, created_at, released_at
             FROM claims WHERE session_id = ? ORDER BY created_at",
        )?;

        let claims = stmt
            .query_map([session_id.to_string()], claim_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(claims)
    }

    /// Unreleased claims held by the active sessions of a project.
    pub fn get_active_claims(&self, project: &str) -> Result<Vec<HeldClaim>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT c.id, c.session_id, c.pattern, c.claim_type, c.created_at, c.released_at, s.agent_name
             FROM claims c JOIN sessions s ON s.id = c.session_id
             WHERE s.project = ? AND s.status = 'active' AND c.released_at IS NULL
             ORDER BY c.created_at",
        )?;

        let claims = stmt
            .query_map([project], |row| {
                Ok(HeldClaim {
                    claim: claim_from_row(row)?,
                    agent_name: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(claims)
    }

    /// Set `released_at` if it is unset. Returns the claim as stored afterwards
    /// and whether this call released it.
    pub fn release_claim(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<(Claim, bool)>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE claims SET released_at = ? WHERE id = ? AND released_at IS NULL",
            (format_datetime(at), id.to_string()),
        )?;

        let claim = conn
            .query_row(
                "SELECT id, session_id, pattern, claim_type, created_at, released_at
                 FROM claims WHERE id = ?",
                [id.to_string()],
                claim_from_row,
            )
            .optional()?;

        Ok(claim.map(|c| (c, rows > 0)))
    }

    // ============================================================
    // Intent operations
    // ============================================================

    pub fn insert_intent(&self, intent: &Intent) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO intents (id, project, author, description, contract_ref, contract_hash, acceptance_criteria, out_of_scope, status, status_reason, build_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                intent.id.to_string(),
                &intent.project,
                &intent.author,
                &intent.description,
                &intent.contract_ref,
                &intent.contract_hash,
                serde_json::to_string(&intent.acceptance_criteria)?,
                serde_json::to_string(&intent.out_of_scope)?,
                intent.status.as_str(),
                &intent.status_reason,
                &intent.build_id,
                format_datetime(intent.created_at),
                format_datetime(intent.updated_at),
            ),
        )?;
        Ok(())
    }

    pub fn get_intent(&self, id: Uuid) -> Result<Option<Intent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let intent = conn
            .query_row(
                "SELECT id, project, author, description, contract_ref, contract_hash, acceptance_criteria, out_of_scope, status, status_reason, build_id, created_at, updated_at
                 FROM intents WHERE id = ?",
                [id.to_string()],
                intent_from_row,
            )
            .optional()?;
        Ok(intent)
    }

    pub fn list_intents(&self, filter: &IntentFilter) -> Result<Vec<Intent>> {
        let conn = self.conn.lock().expect("database lock poisoned");

        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(project) = &filter.project {
            clauses.push("project = ?");
            params.push(Box::new(project.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        let sql = format!(
            "SELECT id, project, author, description, contract_ref, contract_hash, acceptance_criteria, out_of_scope, status, status_reason, build_id, created_at, updated_at
             FROM intents {} ORDER BY created_at",
            where_clause(&clauses)
        );
        let params_ref: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let intents = stmt
            .query_map(params_ref.as_slice(), intent_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(intents)
    }

    /// Compare-and-set the intent status. Returns false without writing if
    /// the stored status is not `from`.
    pub fn transition_intent(
        &self,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
        at: DateTime<Utc>,
        reason: Option<&str>,
        build_id: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE intents
             SET status = ?, updated_at = ?,
                 status_reason = COALESCE(?, status_reason),
                 build_id = COALESCE(?, build_id)
             WHERE id = ? AND status = ?",
            (
                to.as_str(),
                format_datetime(at),
                reason,
                build_id,
                id.to_string(),
                from.as_str(),
            ),
        )?;
        Ok(rows > 0)
    }

    // ============================================================
    // Manifest operations
    // ============================================================

    /// Append a manifest to its project's ledger. Fails if another manifest
    /// already occupies the same sequence number.
    pub fn append_manifest(&self, manifest: &EvidenceManifest) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO manifests (build_id, project, intent_id, sequence, created_at, files, chain_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                &manifest.build_id,
                &manifest.project,
                manifest.intent_id.to_string(),
                manifest.sequence as i64,
                format_datetime(manifest.created_at),
                serde_json::to_string(&manifest.files)?,
                &manifest.chain_hash,
            ),
        )?;
        Ok(())
    }

    pub fn get_manifest(&self, build_id: &str) -> Result<Option<EvidenceManifest>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let manifest = conn
            .query_row(
                "SELECT build_id, project, intent_id, sequence, created_at, files, chain_hash
                 FROM manifests WHERE build_id = ?",
                [build_id],
                manifest_from_row,
            )
            .optional()?;
        Ok(manifest)
    }

    pub fn latest_manifest(&self, project: &str) -> Result<Option<EvidenceManifest>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let manifest = conn
            .query_row(
                "SELECT build_id, project, intent_id, sequence, created_at, files, chain_hash
                 FROM manifests WHERE project = ? ORDER BY sequence DESC LIMIT 1",
                [project],
                manifest_from_row,
            )
            .optional()?;
        Ok(manifest)
    }

    /// Every manifest of a project, oldest first.
    pub fn get_ledger(&self, project: &str) -> Result<Vec<EvidenceManifest>> {
        self.list_manifests(&ManifestFilter {
            project: Some(project.to_string()),
            ..Default::default()
        })
    }

    pub fn list_manifests(&self, filter: &ManifestFilter) -> Result<Vec<EvidenceManifest>> {
        let conn = self.conn.lock().expect("database lock poisoned");

        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(project) = &filter.project {
            clauses.push("project = ?");
            params.push(Box::new(project.clone()));
        }
        if let Some(intent_id) = filter.intent_id {
            clauses.push("intent_id = ?");
            params.push(Box::new(intent_id.to_string()));
        }
        if let Some(after) = filter.created_after {
            clauses.push("created_at >= ?");
            params.push(Box::new(format_datetime(after)));
        }
        if let Some(before) = filter.created_before {
            clauses.push("created_at < ?");
            params.push(Box::new(format_datetime(before)));
        }

        let sql = format!(
            "SELECT build_id, project, intent_id, sequence, created_at, files, chain_hash
             FROM manifests {} ORDER BY project, sequence",
            where_clause(&clauses)
        );
        let params_ref: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let manifests = stmt
            .query_map(params_ref.as_slice(), manifest_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(manifests)
    }

    // ============================================================
    // Artifact operations
    // ============================================================

    pub fn has_artifact(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE hash = ?",
            [hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Store artifact bytes under their hash. Returns false if the hash was
    /// already present.
    pub fn put_artifact(&self, hash: &str, content: &[u8], at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "INSERT OR IGNORE INTO artifacts (hash, size, content, created_at) VALUES (?, ?, ?, ?)",
            (hash, content.len() as i64, content, format_datetime(at)),
        )?;
        Ok(rows > 0)
    }

    pub fn get_artifact(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let content = conn
            .query_row(
                "SELECT content FROM artifacts WHERE hash = ?",
                [hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }

    pub fn delete_artifact(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM artifacts WHERE hash = ?", [hash])?;
        Ok(rows > 0)
    }

    /// Whether any manifest lists a file with this content hash.
    pub fn artifact_referenced(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM manifests WHERE files LIKE ?",
            [format!("%\"{}\"%", hash)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn count_artifacts(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: parse_uuid(row.get::<_, String>(0)?),
        project: row.get(1)?,
        agent_name: row.get(2)?,
        intent_id: row.get::<_, Option<String>>(3)?.map(parse_uuid),
        status: parse_column(row, 4, "sessions.status", SessionStatus::from_str)?
            .unwrap_or(SessionStatus::Active),
        started_at: parse_datetime(row.get::<_, String>(5)?),
        last_activity_at: parse_datetime(row.get::<_, String>(6)?),
        ended_at: row.get::<_, Option<String>>(7)?.map(parse_datetime),
        end_reason: match row.get::<_, Option<String>>(8)? {
            Some(raw) => logged_fallback(EndReason::from_str(&raw), "sessions.end_reason", &raw),
            None => None,
        },
    })
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<Claim> {
    Ok(Claim {
        id: parse_uuid(row.get::<_, String>(0)?),
        session_id: parse_uuid(row.get::<_, String>(1)?),
        pattern: row.get(2)?,
        // Unknown types are read as hard so they keep blocking.
        claim_type: parse_column(row, 3, "claims.claim_type", ClaimType::from_str)?
            .unwrap_or(ClaimType::Hard),
        created_at: parse_datetime(row.get::<_, String>(4)?),
        released_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
    })
}

fn intent_from_row(row: &Row<'_>) -> rusqlite::Result<Intent> {
    Ok(Intent {
        id: parse_uuid(row.get::<_, String>(0)?),
        project: row.get(1)?,
        author: row.get(2)?,
        description: row.get(3)?,
        contract_ref: row.get(4)?,
        contract_hash: row.get(5)?,
        acceptance_criteria: json_column(row, 6, "intents.acceptance_criteria")?.unwrap_or_default(),
        out_of_scope: json_column(row, 7, "intents.out_of_scope")?.unwrap_or_default(),
        status: parse_column(row, 8, "intents.status", IntentStatus::from_str)?
            .unwrap_or(IntentStatus::Pending),
        status_reason: row.get(9)?,
        build_id: row.get(10)?,
        created_at: parse_datetime(row.get::<_, String>(11)?),
        updated_at: parse_datetime(row.get::<_, String>(12)?),
    })
}

fn manifest_from_row(row: &Row<'_>) -> rusqlite::Result<EvidenceManifest> {
    // An unreadable file list is left empty; the chain hash then no longer
    // matches and verification reports the entry.
    let files: BTreeMap<String, FileEvidence> =
        json_column(row, 5, "manifests.files")?.unwrap_or_default();

    Ok(EvidenceManifest {
        build_id: row.get(0)?,
        project: row.get(1)?,
        intent_id: parse_uuid(row.get::<_, String>(2)?),
        sequence: row.get::<_, i64>(3)? as u64,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        files,
        chain_hash: row.get(6)?,
    })
}

/// Fixed-width UTC timestamps so lexical order in SQL matches time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| {
        warn_unreadable("uuid", &s);
        Uuid::nil()
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn_unreadable("timestamp", &s);
            DateTime::<Utc>::UNIX_EPOCH
        })
}

fn warn_unreadable(column: &str, raw: &str) {
    tracing::warn!(column, value = raw, "Unreadable stored value, using fallback");
}

/// Pass `parsed` through, warning when a stored value could not be read and
/// the caller is about to substitute a default.
fn logged_fallback<T>(parsed: Option<T>, column: &str, raw: &str) -> Option<T> {
    if parsed.is_none() {
        warn_unreadable(column, raw);
    }
    parsed
}

fn parse_column<T>(
    row: &Row<'_>,
    idx: usize,
    column: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    let raw: String = row.get(idx)?;
    Ok(logged_fallback(parse(&raw), column, &raw))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
    column: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: String = row.get(idx)?;
    Ok(logged_fallback(serde_json::from_str(&raw).ok(), column, &raw))
}
