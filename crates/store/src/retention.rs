use std::fs;
use std::path::Path;
use std::time::Duration;

use duckdb::params;
use tracefin_core::error::{Result, TracefinError};
use tracefin_core::time::now_us;

use crate::Store;

impl Store {
    pub fn run_retention(&self, ttl: Duration, max_bytes: u64) -> Result<()> {
        self.prune_ttl(ttl)?;
        self.prune_size(max_bytes)?;
        Ok(())
    }

    /// Drops spans whose measured interval ended before the TTL cutoff.
    /// Traces whose completion time was never derived simply age out.
    pub fn prune_ttl(&self, ttl: Duration) -> Result<()> {
        let ttl_us = i64::try_from(ttl.as_micros())
            .map_err(|e| TracefinError::Internal(format!("ttl conversion failed: {e}")))?;
        let cutoff_us = now_us() - ttl_us;

        let conn = self.conn();
        conn.execute(
            "DELETE FROM spans WHERE start_us + duration_us < ?",
            params![cutoff_us],
        )
        .map_err(|e| TracefinError::Store(format!("retention spans delete failed: {e}")))?;

        Ok(())
    }

    pub fn prune_size(&self, max_bytes: u64) -> Result<()> {
        if self.db_path() == ":memory:" {
            return Ok(());
        }

        let path = Path::new(self.db_path());
        let size = fs::metadata(path)
            .map_err(|e| TracefinError::Io(format!("failed to stat db: {e}")))?
            .len();
        if size <= max_bytes {
            return Ok(());
        }

        let conn = self.conn();
        conn.execute(
            "DELETE FROM spans WHERE (tenant, trace_id, span_id) IN
             (SELECT tenant, trace_id, span_id FROM spans ORDER BY start_us ASC LIMIT 10000)",
            [],
        )
        .map_err(|e| TracefinError::Store(format!("size prune spans failed: {e}")))?;

        Ok(())
    }
}
