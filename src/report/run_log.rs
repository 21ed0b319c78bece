//! Durable run log
//!
//! One JSON object per line, one line per finished run. The file is opened
//! in append mode and every record is written with a single `write_all`
//! under a lock, so concurrent runs sharing a [`RunLog`] never interleave.

use super::ReportError;
use crate::pipeline::PipelineRun;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Append-only JSON-lines sink for finished runs
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Opens (creating if needed) the log at `path`
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Io`] if the file or its parent directory cannot
    /// be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the log
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a finished run as one line
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialize`] if the run cannot be encoded and
    /// [`ReportError::Io`] if the write fails.
    pub fn publish(&self, run: &PipelineRun) -> Result<(), ReportError> {
        let mut line =
            serde_json::to_string(run).map_err(|e| ReportError::Serialize(e.to_string()))?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;

        tracing::info!(
            run_id = %run.id,
            pipeline = %run.pipeline,
            status = %run.status,
            path = %self.path.display(),
            "Published run"
        );
        Ok(())
    }
}

/// Reads every run in a log file, oldest first
///
/// # Errors
///
/// Returns [`ReportError::Io`] if the file cannot be read and
/// [`ReportError::Malformed`] for a line that is not a run record.
pub fn read_runs(path: &Path) -> Result<Vec<PipelineRun>, ReportError> {
    let reader = BufReader::new(File::open(path)?);
    let mut runs = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run = serde_json::from_str(&line).map_err(|e| ReportError::Malformed {
            path: format!("{}:{}", path.display(), index + 1),
            reason: e.to_string(),
        })?;
        runs.push(run);
    }
    Ok(runs)
}

/// Returns the last `n` runs of a log file
///
/// # Errors
///
/// Same as [`read_runs`].
pub fn tail(path: &Path, n: usize) -> Result<Vec<PipelineRun>, ReportError> {
    let mut runs = read_runs(path)?;
    let skip = runs.len().saturating_sub(n);
    Ok(runs.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Environment, Parameters, RunStatus};
    use std::sync::Arc;

    fn finished(name: &str) -> PipelineRun {
        let mut run = PipelineRun::new(name, Environment::new(), Parameters::new());
        run.finish(RunStatus::Success);
        run
    }

    #[test]
    fn test_publish_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/runs.jsonl");
        let log = RunLog::open(&path).unwrap();

        log.publish(&finished("a")).unwrap();
        log.publish(&finished("b")).unwrap();

        let runs = read_runs(&path).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].pipeline, "b");

        let last = tail(&path, 1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].pipeline, "b");
        assert_eq!(tail(&path, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        RunLog::open(&path).unwrap().publish(&finished("a")).unwrap();
        RunLog::open(&path).unwrap().publish(&finished("b")).unwrap();
        assert_eq!(read_runs(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_publish_keeps_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let log = Arc::new(RunLog::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for j in 0..5 {
                        log.publish(&finished(&format!("p{i}-{j}"))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let runs = read_runs(&path).unwrap();
        assert_eq!(runs.len(), 40);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let err = read_runs(&path).unwrap_err();
        assert!(err.to_string().contains("runs.jsonl:1"));
    }
}
