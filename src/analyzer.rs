//! Consumes one simulator instance's outcome stream and produces the CHR
//! (cache-hit-ratio) reports described in §4.5/§6: a per-record-count
//! series, a per-wall-clock-time series, an optional per-group series, and a
//! final summary — each written as CSV via the `csv` crate.

use crate::driver::AnalyzerMessage;
use crate::error::{Result, SimError};
use crate::request::{Outcome, UNGROUPED};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    passes: u64,
}

impl Counters {
    fn total(&self) -> u64 {
        self.hits + self.misses + self.passes
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Hit => self.hits += 1,
            Outcome::Miss => self.misses += 1,
            Outcome::Pass => self.passes += 1,
        }
    }

    fn chr(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }

    fn sub(&self, other: &Counters) -> Counters {
        Counters {
            hits: self.hits - other.hits,
            misses: self.misses - other.misses,
            passes: self.passes - other.passes,
        }
    }
}

/// Where the analyzer writes its four CSV files for one instance.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub by_count: PathBuf,
    pub by_time: PathBuf,
    pub by_group: PathBuf,
    pub summary: PathBuf,
}

impl ReportPaths {
    pub fn for_instance(output_dir: impl AsRef<Path>, label: &str) -> Self {
        let dir = output_dir.as_ref();
        Self {
            by_count: dir.join(format!("{label}_chr_by_count.csv")),
            by_time: dir.join(format!("{label}_chr_by_time.csv")),
            by_group: dir.join(format!("{label}_chr_by_group.csv")),
            summary: dir.join(format!("{label}_summary.csv")),
        }
    }
}

/// Tunable emission cadence for the three time series (§4.5/§6).
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    pub freq_records: u64,
    pub freq_seconds: f64,
    pub group_interval: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            freq_records: 1000,
            freq_seconds: 3600.0,
            group_interval: 0.0,
        }
    }
}

/// Consumes one instance's outcome stream and writes its reports.
pub struct Analyzer {
    label: String,
    config: AnalyzerConfig,
    totals: Counters,
    last_count_emit: Counters,
    last_time_emit: Counters,
    last_time_emit_at: f64,
    group_totals: HashMap<i64, Counters>,
    last_group_emit_at: f64,
    by_count: csv::Writer<std::fs::File>,
    by_time: csv::Writer<std::fs::File>,
    by_group: Option<csv::Writer<std::fs::File>>,
    paths: ReportPaths,
}

impl Analyzer {
    pub fn new(label: String, config: AnalyzerConfig, paths: ReportPaths) -> Result<Self> {
        let mut by_count = csv::Writer::from_path(&paths.by_count).map_err(|e| SimError::Report {
            path: paths.by_count.display().to_string(),
            source: e,
        })?;
        by_count
            .write_record(["Record", "Hit", "Miss", "Pass", "CHR"])
            .map_err(|e| SimError::Report {
                path: paths.by_count.display().to_string(),
                source: e,
            })?;

        let mut by_time = csv::Writer::from_path(&paths.by_time).map_err(|e| SimError::Report {
            path: paths.by_time.display().to_string(),
            source: e,
        })?;
        by_time
            .write_record(["Time", "Total", "Hit", "Miss", "Pass", "CHR"])
            .map_err(|e| SimError::Report {
                path: paths.by_time.display().to_string(),
                source: e,
            })?;

        let by_group = if config.group_interval > 0.0 {
            let mut w = csv::Writer::from_path(&paths.by_group).map_err(|e| SimError::Report {
                path: paths.by_group.display().to_string(),
                source: e,
            })?;
            w.write_record(["GroupID", "EpochSecond", "Hit", "Miss", "Pass", "CHR"])
                .map_err(|e| SimError::Report {
                    path: paths.by_group.display().to_string(),
                    source: e,
                })?;
            Some(w)
        } else {
            None
        };

        Ok(Self {
            label,
            config,
            totals: Counters::default(),
            last_count_emit: Counters::default(),
            last_time_emit: Counters::default(),
            last_time_emit_at: f64::NEG_INFINITY,
            group_totals: HashMap::new(),
            last_group_emit_at: f64::NEG_INFINITY,
            by_count,
            by_time,
            by_group,
            paths,
        })
    }

    /// Drives the analyzer until its channel closes or delivers a terminal
    /// sentinel.
    pub async fn run(mut self, mut rx: Receiver<AnalyzerMessage>) -> Result<()> {
        while let Some(message) = rx.recv().await {
            match message {
                AnalyzerMessage::Chunk {
                    window_end_time,
                    outcomes,
                    group_ids,
                } => {
                    self.ingest(window_end_time, &outcomes, &group_ids)?;
                }
                AnalyzerMessage::EndOfStream => {
                    self.finish()?;
                    info!(instance = %self.label, "analyzer reached end of stream");
                    return Ok(());
                }
                AnalyzerMessage::Fatal(reason) => {
                    warn!(instance = %self.label, %reason, "analyzer received fatal sentinel");
                    self.finish()?;
                    return Err(SimError::WorkerFailed {
                        label: self.label.clone(),
                        reason,
                    });
                }
            }
        }
        // The channel closed without an explicit sentinel (upstream task
        // panicked). Flush what we have rather than losing it silently.
        self.finish()
    }

    fn ingest(&mut self, window_end_time: f64, outcomes: &[Outcome], group_ids: &[i64]) -> Result<()> {
        for (&outcome, &group_id) in outcomes.iter().zip(group_ids.iter()) {
            self.totals.record(outcome);
            if group_id != UNGROUPED {
                self.group_totals.entry(group_id).or_default().record(outcome);
            }
        }

        while self.totals.total() - self.last_count_emit.total() >= self.config.freq_records {
            self.emit_count_row()?;
        }

        if self.last_time_emit_at.is_infinite() {
            self.last_time_emit_at = window_end_time;
        }
        if window_end_time - self.last_time_emit_at >= self.config.freq_seconds {
            self.emit_time_row(window_end_time)?;
            self.last_time_emit_at = window_end_time;
        }

        if self.config.group_interval > 0.0 {
            if self.last_group_emit_at.is_infinite() {
                self.last_group_emit_at = window_end_time;
            }
            if window_end_time - self.last_group_emit_at >= self.config.group_interval {
                self.emit_group_rows(window_end_time)?;
                self.last_group_emit_at = window_end_time;
            }
        }

        Ok(())
    }

    fn emit_count_row(&mut self) -> Result<()> {
        let row = self.totals;
        let chr = row.chr().map(|c| format!("{c:.6}")).unwrap_or_default();
        self.by_count
            .write_record([
                row.total().to_string(),
                row.hits.to_string(),
                row.misses.to_string(),
                row.passes.to_string(),
                chr,
            ])
            .map_err(|e| SimError::Report {
                path: self.paths.by_count.display().to_string(),
                source: e,
            })?;
        self.last_count_emit = row;
        Ok(())
    }

    fn emit_time_row(&mut self, window_end_time: f64) -> Result<()> {
        let window = self.totals.sub(&self.last_time_emit);
        let chr = window.chr().map(|c| format!("{c:.6}")).unwrap_or_default();
        let iso = Utc
            .timestamp_opt(window_end_time as i64, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        self.by_time
            .write_record([
                iso,
                window.total().to_string(),
                window.hits.to_string(),
                window.misses.to_string(),
                window.passes.to_string(),
                chr,
            ])
            .map_err(|e| SimError::Report {
                path: self.paths.by_time.display().to_string(),
                source: e,
            })?;
        self.last_time_emit = self.totals;
        Ok(())
    }

    fn emit_group_rows(&mut self, window_end_time: f64) -> Result<()> {
        let Some(writer) = self.by_group.as_mut() else {
            return Ok(());
        };
        for (&group_id, counters) in self.group_totals.iter() {
            let chr = counters.chr().map(|c| format!("{c:.6}")).unwrap_or_default();
            writer
                .write_record([
                    group_id.to_string(),
                    (window_end_time as i64).to_string(),
                    counters.hits.to_string(),
                    counters.misses.to_string(),
                    counters.passes.to_string(),
                    chr,
                ])
                .map_err(|e| SimError::Report {
                    path: self.paths.by_group.display().to_string(),
                    source: e,
                })?;
        }
        self.group_totals.clear();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.totals.total() > self.last_count_emit.total() {
            self.emit_count_row()?;
        }
        let mut summary = csv::Writer::from_path(&self.paths.summary).map_err(|e| SimError::Report {
            path: self.paths.summary.display().to_string(),
            source: e,
        })?;
        summary
            .write_record(["Total", "CHR", "Hit", "Miss", "Pass"])
            .map_err(|e| SimError::Report {
                path: self.paths.summary.display().to_string(),
                source: e,
            })?;
        let chr = self.totals.chr().map(|c| format!("{c:.6}")).unwrap_or_default();
        summary
            .write_record([
                self.totals.total().to_string(),
                chr,
                self.totals.hits.to_string(),
                self.totals.misses.to_string(),
                self.totals.passes.to_string(),
            ])
            .map_err(|e| SimError::Report {
                path: self.paths.summary.display().to_string(),
                source: e,
            })?;
        summary.flush()?;
        self.by_count.flush()?;
        self.by_time.flush()?;
        if let Some(w) = self.by_group.as_mut() {
            w.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chr_is_undefined_with_no_records() {
        let counters = Counters::default();
        assert!(counters.chr().is_none());
    }

    #[test]
    fn chr_counts_hits_over_all_outcomes() {
        let mut counters = Counters::default();
        counters.record(Outcome::Hit);
        counters.record(Outcome::Hit);
        counters.record(Outcome::Miss);
        counters.record(Outcome::Pass);
        assert_eq!(counters.chr(), Some(0.5));
    }

    #[tokio::test]
    async fn analyzer_writes_a_summary_on_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths::for_instance(dir.path(), "lru-200");
        let analyzer = Analyzer::new("lru-200".into(), AnalyzerConfig::default(), paths.clone()).unwrap();
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(AnalyzerMessage::Chunk {
            window_end_time: 10.0,
            outcomes: vec![Outcome::Hit, Outcome::Miss, Outcome::Pass],
            group_ids: vec![UNGROUPED, UNGROUPED, UNGROUPED],
        })
        .await
        .unwrap();
        tx.send(AnalyzerMessage::EndOfStream).await.unwrap();
        drop(tx);
        analyzer.run(rx).await.unwrap();

        let contents = std::fs::read_to_string(&paths.summary).unwrap();
        assert!(contents.contains("3,0.333333,1,1,1") || contents.contains("3,0.333333"));
    }
}
