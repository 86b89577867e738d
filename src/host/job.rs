//! Print job sources.
//!
//! A job is a stream of G-code commands. Comments and blank lines are
//! stripped before the engine sees anything.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Events produced by a job source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Command(String),
    /// No more commands.
    Eof,
}

/// Where print-job commands come from.
#[async_trait]
pub trait JobSource: Send {
    async fn next_command(&mut self) -> Result<JobEvent>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

/// Command text of a G-code line with comments removed, `None` if nothing is left.
pub fn strip_comment(line: &str) -> Option<&str> {
    let code = match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let code = code.trim();
    (!code.is_empty()).then_some(code)
}

// ============================================================================
// File Job
// ============================================================================

/// G-code file streamed line by line.
pub struct FileJob {
    path: PathBuf,
    name: String,
    reader: BufReader<tokio::fs::File>,
    line_buffer: String,
}

impl FileJob {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open print job: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string());
        Ok(Self {
            path,
            name,
            reader: BufReader::new(file),
            line_buffer: String::with_capacity(256),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobSource for FileJob {
    async fn next_command(&mut self) -> Result<JobEvent> {
        loop {
            self.line_buffer.clear();
            let bytes = self
                .reader
                .read_line(&mut self.line_buffer)
                .await
                .with_context(|| format!("Failed to read {}", self.path.display()))?;
            if bytes == 0 {
                return Ok(JobEvent::Eof);
            }
            if let Some(code) = strip_comment(&self.line_buffer) {
                return Ok(JobEvent::Command(code.to_string()));
            }
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Scripted Job
// ============================================================================

/// In-memory job, for dry runs and tests.
pub struct ScriptedJob {
    commands: std::vec::IntoIter<String>,
}

impl ScriptedJob {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let commands: Vec<String> = lines
            .into_iter()
            .filter_map(|l| strip_comment(l.as_ref()).map(str::to_string))
            .collect();
        Self {
            commands: commands.into_iter(),
        }
    }
}

#[async_trait]
impl JobSource for ScriptedJob {
    async fn next_command(&mut self) -> Result<JobEvent> {
        Ok(match self.commands.next() {
            Some(cmd) => JobEvent::Command(cmd),
            None => JobEvent::Eof,
        })
    }

    fn source_name(&self) -> &str {
        "scripted"
    }
}
