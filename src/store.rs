use std::path::Path;

use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::domain::{FailureRecord, Job};
use crate::fsutil;

/// Durable job state: jobs, retry counts, and terminal failures.
///
/// Shared by the API, the dispatcher, and every worker; all operations are
/// single statements or explicit transactions, so concurrent access needs
/// no external locking. Embedded migrations run on open and tolerate a
/// no-change outcome.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub async fn open(path: &Path) -> Result<Self> {
        fsutil::ensure_parent_dir(path)
            .with_context(|| format!("creating database directory for {}", path.display()))?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("applying database migrations")?;

        Ok(Self { pool })
    }

    /// Append a pending job; the returned job carries its assigned id.
    pub async fn insert_job(&self, input_path: &str, output_path: &str) -> Result<Job> {
        let result = sqlx::query(
            "INSERT INTO jobs (input_path, output_path, done, failed, retries) \
             VALUES (?, ?, 0, 0, 0)",
        )
        .bind(input_path)
        .bind(output_path)
        .execute(&self.pool)
        .await
        .context("inserting job")?;

        Ok(Job {
            id: result.last_insert_rowid(),
            input_path: input_path.to_string(),
            output_path: output_path.to_string(),
        })
    }

    /// Jobs that are neither done nor failed, in insertion order.
    pub async fn pending_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT id, input_path, output_path FROM jobs \
             WHERE done = 0 AND failed = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("querying pending jobs")?;

        rows.iter().map(job_from_row).collect()
    }

    pub async fn mark_done(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET done = 1 WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking job {job_id} done"))?;
        Ok(())
    }

    pub async fn retries(&self, job_id: i64) -> Result<i64> {
        let retries: i64 = sqlx::query_scalar("SELECT retries FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("reading retries for job {job_id}"))?;
        Ok(retries)
    }

    pub async fn update_retries(&self, job_id: i64, retries: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET retries = ? WHERE id = ?")
            .bind(retries)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("updating retries for job {job_id}"))?;
        Ok(())
    }

    /// Terminally fail a job: the failure record insert and the `failed`
    /// flip commit together or not at all.
    pub async fn fail_job(&self, job_id: i64, process_output: &str, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.context("starting fail transaction")?;

        sqlx::query("INSERT INTO failures (job_id, process_output, error) VALUES (?, ?, ?)")
            .bind(job_id)
            .bind(process_output)
            .bind(error)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("recording failure for job {job_id}"))?;

        sqlx::query("UPDATE jobs SET failed = 1 WHERE id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("marking job {job_id} failed"))?;

        tx.commit().await.context("committing fail transaction")
    }

    /// Physically remove a job. Returns whether a row existed.
    pub async fn delete_job(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting job {job_id}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn failed_jobs(&self) -> Result<Vec<FailureRecord>> {
        let rows = sqlx::query(
            "SELECT f.id, f.job_id, f.process_output, f.error, \
                    j.input_path, j.output_path \
             FROM failures f INNER JOIN jobs j ON j.id = f.job_id \
             ORDER BY f.id",
        )
        .fetch_all(&self.pool)
        .await
        .context("querying failed jobs")?;

        rows.iter()
            .map(|row| {
                let job_id: i64 = row.try_get("job_id")?;
                Ok(FailureRecord {
                    id: row.try_get("id")?,
                    job_id,
                    process_output: row.try_get("process_output")?,
                    error: row.try_get("error")?,
                    job: Job {
                        id: job_id,
                        input_path: row.try_get("input_path")?,
                        output_path: row.try_get("output_path")?,
                    },
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("decoding failure records")
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    Ok(Job {
        id: row.try_get("id")?,
        input_path: row.try_get("input_path")?,
        output_path: row.try_get("output_path")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::open(&dir.path().join("jobs.db"))
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn insert_assigns_monotonic_ids_and_preserves_order() {
        let (_dir, store) = open_store().await;

        let first = store.insert_job("a.mp4", "a-out.mp4").await.expect("insert");
        let second = store.insert_job("b.mp4", "b-out.mp4").await.expect("insert");
        assert!(second.id > first.id);

        let pending = store.pending_jobs().await.expect("pending");
        assert_eq!(
            pending.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test]
    async fn done_and_failed_jobs_leave_the_pending_set() {
        let (_dir, store) = open_store().await;

        let done = store.insert_job("a.mp4", "a-out.mp4").await.expect("insert");
        let failed = store.insert_job("b.mp4", "b-out.mp4").await.expect("insert");
        let kept = store.insert_job("c.mp4", "c-out.mp4").await.expect("insert");

        store.mark_done(done.id).await.expect("mark done");
        store
            .fail_job(failed.id, "ffmpeg said no", "exit status 1")
            .await
            .expect("fail job");

        let pending = store.pending_jobs().await.expect("pending");
        assert_eq!(pending.iter().map(|j| j.id).collect::<Vec<_>>(), vec![kept.id]);
    }

    #[tokio::test]
    async fn reopening_rebuilds_the_same_pending_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.db");

        let before = {
            let store = JobStore::open(&path).await.expect("open store");
            store.insert_job("a.mp4", "a-out.mp4").await.expect("insert");
            let done = store.insert_job("b.mp4", "b-out.mp4").await.expect("insert");
            store.mark_done(done.id).await.expect("mark done");
            store.pending_jobs().await.expect("pending")
        };

        // A second open re-runs migrations (a no-change outcome) and sees
        // the identical pending set.
        let store = JobStore::open(&path).await.expect("reopen store");
        let after = store.pending_jobs().await.expect("pending");
        assert_eq!(
            before.iter().map(|j| j.id).collect::<Vec<_>>(),
            after.iter().map(|j| j.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn retries_roundtrip() {
        let (_dir, store) = open_store().await;
        let job = store.insert_job("a.mp4", "a-out.mp4").await.expect("insert");

        assert_eq!(store.retries(job.id).await.expect("retries"), 0);
        store.update_retries(job.id, 3).await.expect("update");
        assert_eq!(store.retries(job.id).await.expect("retries"), 3);
    }

    #[tokio::test]
    async fn fail_job_records_process_output() {
        let (_dir, store) = open_store().await;
        let job = store.insert_job("a.mp4", "a-out.mp4").await.expect("insert");

        store
            .fail_job(job.id, "stderr tail here", "decoder exited with 1")
            .await
            .expect("fail");

        let failed = store.failed_jobs().await.expect("failed jobs");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, job.id);
        assert_eq!(failed[0].process_output, "stderr tail here");
        assert_eq!(failed[0].error, "decoder exited with 1");
        assert_eq!(failed[0].job.input_path, "a.mp4");
    }

    #[tokio::test]
    async fn delete_job_reports_missing_rows() {
        let (_dir, store) = open_store().await;
        let job = store.insert_job("a.mp4", "a-out.mp4").await.expect("insert");

        assert!(store.delete_job(job.id).await.expect("delete"));
        assert!(!store.delete_job(job.id).await.expect("delete again"));
        assert!(store.pending_jobs().await.expect("pending").is_empty());
    }
}
