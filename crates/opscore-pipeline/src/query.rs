// crates/opscore-pipeline/src/query.rs
// ============================================================================
// Module: Pipeline Query
// Description: Cursor-paginated reads over the pipeline snapshot, in both
//              the legacy flat shape and the meta+stages envelope.
// Purpose: Answer `/v1/pipeline/projection` without re-deriving stages.
// Dependencies: rusqlite, crate::snapshot::Stage
// ============================================================================

//! ## Overview
//! [`page`] is the one read path: it takes a [`PageRequest`] (workspace,
//! optional stage filter, optional cursor, limit) and returns a
//! [`PageResult`] ordered by the `(updated_at, entity_type, entity_id)`
//! total order named in spec §4.10. [`stage_counts`] and [`watermark`]
//! back the `meta + stages` envelope shape; [`Envelope`] picks between it
//! and the legacy flat shape.

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row as SqlRow;
use rusqlite::params;

use crate::PipelineError;
use crate::snapshot::Stage;

/// Smallest and largest page size this projector will serve, per spec §4.10.
const MIN_LIMIT: u32 = 1;
const MAX_LIMIT: u32 = 200;

/// One entity's position in the pipeline view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    /// `"experiment"` or `"run"`.
    pub entity_type: String,
    /// Workspace-unique id of the entity.
    pub entity_id: String,
    /// Resolved stage identifier, e.g. `"3_execute_workspace"`.
    pub stage: String,
    /// Diagnostic code, when the stage alone does not explain the placement.
    pub diagnostic: Option<String>,
    /// RFC 3339 timestamp of the row's last mutation; the pagination cursor.
    pub updated_at: String,
}

/// Position to resume pagination from, exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// `updated_at` of the last row seen.
    pub updated_at: String,
    /// `entity_type` of the last row seen.
    pub entity_type: String,
    /// `entity_id` of the last row seen.
    pub entity_id: String,
}

/// A page request against the pipeline snapshot.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Workspace to query.
    pub workspace_id: String,
    /// Only return rows in this stage, when given.
    pub stage: Option<Stage>,
    /// Resume after this position, when given.
    pub cursor: Option<Cursor>,
    /// Requested page size; clamped to `[1, 200]`.
    pub limit: u32,
}

impl PageRequest {
    /// Builds a request for the first page of `workspace_id`, with no stage
    /// filter, at the maximum page size.
    #[must_use]
    pub fn first_page(workspace_id: impl Into<String>) -> Self {
        Self { workspace_id: workspace_id.into(), stage: None, cursor: None, limit: MAX_LIMIT }
    }

    fn clamped_limit(&self) -> u32 {
        self.limit.clamp(MIN_LIMIT, MAX_LIMIT)
    }
}

/// One page of the pipeline snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    /// Rows in `(updated_at, entity_type, entity_id)` order.
    pub items: Vec<EntityRow>,
    /// Cursor to pass back for the next page; `None` once exhausted.
    pub next_cursor: Option<Cursor>,
}

/// Per-stage row counts for one workspace, used by the `meta + stages`
/// envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageCounts {
    /// Count of rows in `1_inbox`.
    pub inbox: u64,
    /// Count of rows in `2_pending_approval`.
    pub pending_approval: u64,
    /// Count of rows in `3_execute_workspace`.
    pub execute_workspace: u64,
    /// Count of rows in `4_review_evidence`.
    pub review_evidence: u64,
    /// Count of rows in `5_promoted`.
    pub promoted: u64,
    /// Count of rows in `6_demoted`.
    pub demoted: u64,
}

impl StageCounts {
    fn increment(&mut self, stage: Stage, count: u64) {
        match stage {
            Stage::Inbox => self.inbox += count,
            Stage::PendingApproval => self.pending_approval += count,
            Stage::ExecuteWorkspace => self.execute_workspace += count,
            Stage::ReviewEvidence => self.review_evidence += count,
            Stage::Promoted => self.promoted += count,
            Stage::Demoted => self.demoted += count,
        }
    }
}

/// The two output shapes named in spec §4.10.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// The legacy shape: a bare page of rows.
    Flat(PageResult),
    /// The `?format=envelope` shape: the page plus stage statistics and the
    /// watermark event id.
    Meta {
        /// The requested page.
        page: PageResult,
        /// Per-stage counts across the whole workspace, not just this page.
        stages: StageCounts,
        /// Id of the most recently applied event reflected in this snapshot.
        watermark_event_id: Option<String>,
    },
}

/// Returns one page of the pipeline snapshot for `request.workspace_id`.
///
/// # Errors
///
/// Returns [`PipelineError`] on any underlying SQLite failure.
pub fn page(conn: &Connection, request: &PageRequest) -> Result<PageResult, PipelineError> {
    let limit = i64::from(request.clamped_limit());
    let stage_str = request.stage.map(Stage::as_str);
    let mut items = Vec::new();

    match (&request.cursor, stage_str) {
        (None, None) => {
            let mut stmt = conn.prepare(
                "SELECT entity_type, entity_id, stage, diagnostic, updated_at
                 FROM pipeline_entities WHERE workspace_id = ?1
                 ORDER BY updated_at, entity_type, entity_id LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![request.workspace_id, limit])?;
            drain_rows(&mut rows, &mut items)?;
        }
        (None, Some(stage)) => {
            let mut stmt = conn.prepare(
                "SELECT entity_type, entity_id, stage, diagnostic, updated_at
                 FROM pipeline_entities WHERE workspace_id = ?1 AND stage = ?2
                 ORDER BY updated_at, entity_type, entity_id LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![request.workspace_id, stage, limit])?;
            drain_rows(&mut rows, &mut items)?;
        }
        (Some(cursor), None) => {
            let mut stmt = conn.prepare(
                "SELECT entity_type, entity_id, stage, diagnostic, updated_at
                 FROM pipeline_entities WHERE workspace_id = ?1
                 AND (updated_at, entity_type, entity_id) > (?2, ?3, ?4)
                 ORDER BY updated_at, entity_type, entity_id LIMIT ?5",
            )?;
            let mut rows = stmt.query(params![
                request.workspace_id,
                cursor.updated_at,
                cursor.entity_type,
                cursor.entity_id,
                limit
            ])?;
            drain_rows(&mut rows, &mut items)?;
        }
        (Some(cursor), Some(stage)) => {
            let mut stmt = conn.prepare(
                "SELECT entity_type, entity_id, stage, diagnostic, updated_at
                 FROM pipeline_entities WHERE workspace_id = ?1 AND stage = ?2
                 AND (updated_at, entity_type, entity_id) > (?3, ?4, ?5)
                 ORDER BY updated_at, entity_type, entity_id LIMIT ?6",
            )?;
            let mut rows = stmt.query(params![
                request.workspace_id,
                stage,
                cursor.updated_at,
                cursor.entity_type,
                cursor.entity_id,
                limit
            ])?;
            drain_rows(&mut rows, &mut items)?;
        }
    }

    let page_full = items.len() == request.clamped_limit() as usize;
    let next_cursor = if page_full {
        items.last().map(|row| Cursor {
            updated_at: row.updated_at.clone(),
            entity_type: row.entity_type.clone(),
            entity_id: row.entity_id.clone(),
        })
    } else {
        None
    };
    Ok(PageResult { items, next_cursor })
}

fn drain_rows(rows: &mut rusqlite::Rows<'_>, items: &mut Vec<EntityRow>) -> Result<(), PipelineError> {
    while let Some(row) = rows.next()? {
        items.push(read_entity_row(row)?);
    }
    Ok(())
}

fn read_entity_row(row: &SqlRow<'_>) -> Result<EntityRow, PipelineError> {
    Ok(EntityRow {
        entity_type: row.get(0)?,
        entity_id: row.get(1)?,
        stage: row.get(2)?,
        diagnostic: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Counts every row by stage for `workspace_id`, across the whole snapshot
/// rather than just the current page.
///
/// # Errors
///
/// Returns [`PipelineError`] on any underlying SQLite failure.
pub fn stage_counts(conn: &Connection, workspace_id: &str) -> Result<StageCounts, PipelineError> {
    let mut stmt =
        conn.prepare("SELECT stage, COUNT(*) FROM pipeline_entities WHERE workspace_id = ?1 GROUP BY stage")?;
    let mut rows = stmt.query(params![workspace_id])?;
    let mut counts = StageCounts::default();
    while let Some(row) = rows.next()? {
        let raw: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        if let Some(stage) = Stage::from_str(&raw) {
            counts.increment(stage, count.try_into().unwrap_or(0));
        }
    }
    Ok(counts)
}

/// Returns the `last_event_id` of the most recently updated row for
/// `workspace_id`, the watermark surfaced by the `meta + stages` envelope.
///
/// # Errors
///
/// Returns [`PipelineError`] on any underlying SQLite failure.
pub fn watermark(conn: &Connection, workspace_id: &str) -> Result<Option<String>, PipelineError> {
    conn.query_row(
        "SELECT last_event_id FROM pipeline_entities WHERE workspace_id = ?1
         ORDER BY updated_at DESC, entity_type DESC, entity_id DESC LIMIT 1",
        params![workspace_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(PipelineError::from)
}

/// Builds the full [`Envelope`] for `request`, in either shape.
///
/// # Errors
///
/// Returns [`PipelineError`] on any underlying SQLite failure.
pub fn envelope(conn: &Connection, request: &PageRequest, format_envelope: bool) -> Result<Envelope, PipelineError> {
    let result = page(conn, request)?;
    if !format_envelope {
        return Ok(Envelope::Flat(result));
    }
    let stages = stage_counts(conn, &request.workspace_id)?;
    let watermark_event_id = watermark(conn, &request.workspace_id)?;
    Ok(Envelope::Meta { page: result, stages, watermark_event_id })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::schema::ensure_schema;

    fn seed(conn: &mut Connection) {
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        for (idx, (entity_type, entity_id, stage)) in
            [("run", "run-1", "3_execute_workspace"), ("run", "run-2", "5_promoted"), ("experiment", "exp-1", "1_inbox")]
                .into_iter()
                .enumerate()
        {
            tx.execute(
                "INSERT INTO pipeline_entities (
                    workspace_id, entity_type, entity_id, required_fields_present, stage, last_event_id, updated_at
                ) VALUES ('ws-1', ?1, ?2, 1, ?3, ?4, ?5)",
                params![entity_type, entity_id, stage, format!("evt-{idx}"), format!("2024-01-0{}T00:00:00Z", idx + 1)],
            )
            .unwrap();
        }
        tx.commit().unwrap();
    }

    #[test]
    fn pages_in_cursor_order_and_stops_short_of_limit() {
        let mut conn = Connection::open_in_memory().unwrap();
        seed(&mut conn);
        let request = PageRequest { limit: 2, ..PageRequest::first_page("ws-1") };
        let first = page(&conn, &request).unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.next_cursor.is_some());

        let request = PageRequest { cursor: first.next_cursor, ..request };
        let second = page(&conn, &request).unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn stage_filter_narrows_the_page() {
        let mut conn = Connection::open_in_memory().unwrap();
        seed(&mut conn);
        let request = PageRequest { stage: Some(Stage::Promoted), ..PageRequest::first_page("ws-1") };
        let result = page(&conn, &request).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].entity_id, "run-2");
    }

    #[test]
    fn envelope_format_includes_stage_counts_and_watermark() {
        let mut conn = Connection::open_in_memory().unwrap();
        seed(&mut conn);
        let request = PageRequest::first_page("ws-1");
        let Envelope::Meta { stages, watermark_event_id, .. } = envelope(&conn, &request, true).unwrap() else {
            panic!("expected meta envelope");
        };
        assert_eq!(stages.execute_workspace, 1);
        assert_eq!(stages.promoted, 1);
        assert_eq!(stages.inbox, 1);
        assert_eq!(watermark_event_id, Some("evt-2".to_string()));
    }

    #[test]
    fn flat_format_returns_bare_page() {
        let mut conn = Connection::open_in_memory().unwrap();
        seed(&mut conn);
        let request = PageRequest::first_page("ws-1");
        assert!(matches!(envelope(&conn, &request, false).unwrap(), Envelope::Flat(_)));
    }
}
