use crate::model::{
    EvaluationResult, EvaluationRun, NewResult, NewRun, PromptRole, PromptTemplate, RunStatus,
    RunSummary, TestCase,
};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Stored in place of a missing score. Real scores are always >= 1.
pub const SENTINEL_SCORE: f64 = 0.0;

const TERMINAL_GUARD: &str = "status NOT IN ('completed', 'failed', 'cancelled')";

const RUN_COLUMNS: &str = "id, prompt_id, prompt_version, prompt_sha256, model_id,
    judge_prompt_id, judge_model_id, total_test_cases, completed_test_cases, average_score,
    status, error, cancel_requested, started_at, completed_at";

const TEST_CASE_COLUMNS: &str = "id, key, user_prompt, expected_json, is_active";

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

pub fn encode_score(score: Option<f64>) -> f64 {
    score.unwrap_or(SENTINEL_SCORE)
}

pub fn decode_score(raw: f64) -> Option<f64> {
    if raw == SENTINEL_SCORE {
        None
    } else {
        Some(raw)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db at {}", path.display()))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)
            .context("failed to apply schema")?;
        Ok(())
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store mutex poisoned"))
    }

    // ---- test cases ----

    /// Inserts a test case, or updates the one with the same `key`. Returns its id.
    pub fn upsert_test_case(
        &self,
        key: Option<&str>,
        user_prompt: &str,
        expected_json: &Value,
        is_active: bool,
    ) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        let expected = serde_json::to_string(expected_json)?;
        match key {
            Some(key) => {
                conn.execute(
                    "INSERT INTO test_cases (key, user_prompt, expected_json, is_active, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(key) DO UPDATE SET
                       user_prompt = excluded.user_prompt,
                       expected_json = excluded.expected_json,
                       is_active = excluded.is_active",
                    params![key, user_prompt, expected, is_active, now()],
                )?;
                let id = conn.query_row(
                    "SELECT id FROM test_cases WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO test_cases (key, user_prompt, expected_json, is_active, created_at)
                     VALUES (NULL, ?1, ?2, ?3, ?4)",
                    params![user_prompt, expected, is_active, now()],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Soft delete / restore. Returns false when the id does not exist.
    pub fn set_test_case_active(&self, id: i64, active: bool) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE test_cases SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(n > 0)
    }

    pub fn list_active_test_cases(&self) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM test_cases WHERE is_active = 1 ORDER BY id",
            TEST_CASE_COLUMNS
        ))?;
        let rows = stmt.query_map([], test_case_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("failed to read test cases")
    }

    pub fn get_test_case(&self, id: i64) -> anyhow::Result<Option<TestCase>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM test_cases WHERE id = ?1", TEST_CASE_COLUMNS),
            params![id],
            test_case_from_row,
        )
        .optional()
        .context("failed to read test case")
    }

    // ---- prompts ----

    pub fn upsert_prompt(&self, prompt: &PromptTemplate) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO prompts (id, version, role, template, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id, version) DO UPDATE SET
               role = excluded.role,
               template = excluded.template",
            params![
                prompt.id,
                prompt.version,
                prompt.role.as_str(),
                prompt.template,
                now()
            ],
        )?;
        Ok(())
    }

    /// Fetches a prompt by id and version; `None` version means the latest one.
    pub fn get_prompt(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> anyhow::Result<Option<PromptTemplate>> {
        let conn = self.lock()?;
        let map = |row: &Row<'_>| -> rusqlite::Result<(String, u32, String, String)> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        };
        let row = match version {
            Some(v) => conn
                .query_row(
                    "SELECT id, version, role, template FROM prompts WHERE id = ?1 AND version = ?2",
                    params![id, v],
                    map,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT id, version, role, template FROM prompts WHERE id = ?1
                     ORDER BY version DESC LIMIT 1",
                    params![id],
                    map,
                )
                .optional()?,
        };

        let Some((id, version, role, template)) = row else {
            return Ok(None);
        };
        let role = PromptRole::parse(&role)
            .ok_or_else(|| anyhow::anyhow!("prompt '{}' has unknown role '{}'", id, role))?;
        Ok(Some(PromptTemplate {
            id,
            version,
            role,
            template,
        }))
    }

    // ---- runs ----

    /// Creates a pending run over exactly `test_case_ids`, in order.
    pub fn create_run(&self, run: &NewRun, test_case_ids: &[i64]) -> anyhow::Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (prompt_id, prompt_version, prompt_sha256, model_id,
                judge_prompt_id, judge_model_id, total_test_cases, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
            params![
                run.prompt_id,
                run.prompt_version,
                run.prompt_sha256,
                run.model_id,
                run.judge_prompt_id,
                run.judge_model_id,
                test_case_ids.len() as i64,
                now()
            ],
        )?;
        let run_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO run_test_cases (run_id, test_case_id, position) VALUES (?1, ?2, ?3)",
            )?;
            for (pos, tc) in test_case_ids.iter().enumerate() {
                stmt.execute(params![run_id, tc, pos as i64])?;
            }
        }
        tx.commit().context("failed to create run")?;
        Ok(run_id)
    }

    /// Test cases selected for a run at creation time, in processing order.
    pub fn run_test_cases(&self, run_id: i64) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.key, t.user_prompt, t.expected_json, t.is_active
             FROM run_test_cases r JOIN test_cases t ON t.id = r.test_case_id
             WHERE r.run_id = ?1
             ORDER BY r.position",
        )?;
        let rows = stmt.query_map(params![run_id], test_case_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("failed to read run test cases")
    }

    /// pending -> running. Returns false if the run was not pending.
    pub fn mark_running(&self, run_id: i64) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE runs SET status = 'running' WHERE id = ?1 AND status = 'pending'",
            params![run_id],
        )?;
        Ok(n > 0)
    }

    /// Progress never moves backwards and never touches a terminal run.
    pub fn record_progress(
        &self,
        run_id: i64,
        completed: u32,
        average_score: Option<f64>,
    ) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            &format!(
                "UPDATE runs SET completed_test_cases = ?2, average_score = ?3
                 WHERE id = ?1 AND completed_test_cases <= ?2
                   AND ?2 <= total_test_cases AND {}",
                TERMINAL_GUARD
            ),
            params![run_id, completed, average_score],
        )?;
        Ok(n > 0)
    }

    /// Moves a run into a terminal state. Returns false if it already was terminal.
    pub fn finalize_run(
        &self,
        run_id: i64,
        status: RunStatus,
        error: Option<&str>,
    ) -> anyhow::Result<bool> {
        anyhow::ensure!(
            status.is_terminal(),
            "finalize_run called with non-terminal status {}",
            status
        );
        let conn = self.lock()?;
        let n = conn.execute(
            &format!(
                "UPDATE runs SET status = ?2, error = ?3, completed_at = ?4
                 WHERE id = ?1 AND {}",
                TERMINAL_GUARD
            ),
            params![run_id, status.as_str(), error, now()],
        )?;
        Ok(n > 0)
    }

    /// Flags a run for cooperative cancellation. A run that has not started yet is
    /// cancelled immediately. Returns the status after the request, or `None` if the
    /// run does not exist.
    pub fn request_cancel(&self, run_id: i64) -> anyhow::Result<Option<RunStatus>> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "UPDATE runs SET cancel_requested = 1 WHERE id = ?1 AND {}",
                TERMINAL_GUARD
            ),
            params![run_id],
        )?;
        conn.execute(
            "UPDATE runs SET status = 'cancelled', completed_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![run_id, now()],
        )?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.map(|s| RunStatus::parse(&s)))
    }

    pub fn is_cancel_requested(&self, run_id: i64) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let flag: Option<bool> = conn
            .query_row(
                "SELECT cancel_requested FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }

    pub fn get_run(&self, run_id: i64) -> anyhow::Result<Option<EvaluationRun>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
            params![run_id],
            run_from_row,
        )
        .optional()
        .context("failed to read run")
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: u32) -> anyhow::Result<Vec<EvaluationRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit], run_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("failed to read runs")
    }

    // ---- results ----

    pub fn insert_result(&self, run_id: i64, result: &NewResult) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        let generated = result
            .generated_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let fixes = if result.repair_fixes.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&result.repair_fixes)?)
        };
        conn.execute(
            "INSERT INTO results (run_id, test_case_id, generated_json, comparison_score,
                comparison_details, judge_model_id, raw_judge_response, latency_ms, tokens_used,
                repair_fixes_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run_id,
                result.test_case_id,
                generated,
                encode_score(result.comparison_score),
                result.comparison_details,
                result.judge_model_id,
                result.raw_judge_response,
                result.latency_ms.map(|v| v as i64),
                result.tokens_used,
                fixes,
                now()
            ],
        )
        .with_context(|| {
            format!(
                "failed to insert result for run {} test case {}",
                run_id, result.test_case_id
            )
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_results(&self, run_id: i64) -> anyhow::Result<Vec<EvaluationResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_case_id, generated_json, comparison_score,
                comparison_details, judge_model_id, raw_judge_response, latency_ms, tokens_used,
                repair_fixes_json, created_at
             FROM results WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let generated: Option<String> = row.get(3)?;
            let fixes: Option<String> = row.get(10)?;
            let latency: Option<i64> = row.get(8)?;
            Ok(EvaluationResult {
                id: row.get(0)?,
                run_id: row.get(1)?,
                test_case_id: row.get(2)?,
                generated_json: generated.and_then(|s| serde_json::from_str(&s).ok()),
                comparison_score: decode_score(row.get(4)?),
                comparison_details: row.get(5)?,
                judge_model_id: row.get(6)?,
                raw_judge_response: row.get(7)?,
                latency_ms: latency.map(|v| v.max(0) as u64),
                tokens_used: row.get(9)?,
                repair_fixes: fixes
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default(),
                created_at: row.get(11)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("failed to read results")
    }

    pub fn get_run_summary(&self, run_id: i64) -> anyhow::Result<Option<RunSummary>> {
        let Some(run) = self.get_run(run_id)? else {
            return Ok(None);
        };
        let results = self.list_results(run_id)?;
        Ok(Some(RunSummary { run, results }))
    }
}

fn test_case_from_row(row: &Row<'_>) -> rusqlite::Result<TestCase> {
    let expected: String = row.get(3)?;
    let expected_json = serde_json::from_str(&expected).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(TestCase {
        id: row.get(0)?,
        key: row.get(1)?,
        user_prompt: row.get(2)?,
        expected_json,
        is_active: row.get(4)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<EvaluationRun> {
    Ok(EvaluationRun {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        prompt_version: row.get(2)?,
        prompt_sha256: row.get(3)?,
        model_id: row.get(4)?,
        judge_prompt_id: row.get(5)?,
        judge_model_id: row.get(6)?,
        total_test_cases: row.get(7)?,
        completed_test_cases: row.get(8)?,
        average_score: row.get(9)?,
        status: RunStatus::parse(&row.get::<_, String>(10)?),
        error: row.get(11)?,
        cancel_requested: row.get(12)?,
        started_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}
