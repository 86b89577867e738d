//! Print runner: streams one job to one printer through the decision engine.
//!
//! Flow control is one command in flight: write a line, then read until the
//! printer answers `ok`. Every received line goes to the engine, so firmware
//! detection, mesh responses, and save confirmations are seen wherever they
//! show up. `@` commands never reach the printer; they are routed to the
//! engine when they reach the head of the queue.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{JobEvent, JobSource};
use super::link::PrinterConnection;
use super::queue::DispatchQueue;
use crate::config::defaults::FIRMWARE_INFO_COMMAND;
use crate::engine::{parse_host_command, CommandTags, DecisionEngine, HostEvent, Interception};

/// How a print ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintSummary {
    pub outcome: PrintOutcome,
    /// Job lines pulled from the source.
    pub job_lines: u64,
    /// Lines actually written to the printer.
    pub commands_sent: u64,
}

enum Step {
    Continue,
    JobDone,
}

pub struct PrintRunner<W> {
    conn: PrinterConnection<W>,
    engine: DecisionEngine,
    queue: Arc<DispatchQueue>,
    cancel: CancellationToken,
    job_lines: u64,
    commands_sent: u64,
}

impl<W: AsyncWrite + Unpin + Send> PrintRunner<W> {
    /// `queue` must be the same queue the engine was given as its link.
    pub fn new(
        conn: PrinterConnection<W>,
        engine: DecisionEngine,
        queue: Arc<DispatchQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            engine,
            queue,
            cancel,
            job_lines: 0,
            commands_sent: 0,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Close the printer link and hand the engine back.
    pub async fn finish(self) -> DecisionEngine {
        self.conn.shutdown().await;
        self.engine
    }

    /// Identify the firmware, stream the job, and report the outcome.
    ///
    /// Link failures end the print as failed rather than returning `Err`.
    pub async fn run<J: JobSource>(&mut self, job: &mut J) -> PrintSummary {
        self.engine.on_event(HostEvent::Connected);
        self.engine.on_event(HostEvent::ClientOpened);

        let outcome = match self.handshake().await {
            Err(e) => PrintOutcome::Failed(format!("{e:#}")),
            Ok(()) => {
                info!(job = job.source_name(), "[PrintRunner] Print started");
                self.engine.on_event(HostEvent::PrintStarted);
                self.stream_job(job).await
            }
        };

        match &outcome {
            PrintOutcome::Completed => {
                info!(commands = self.commands_sent, "[PrintRunner] Print done");
                self.engine.on_event(HostEvent::PrintDone);
            }
            PrintOutcome::Cancelled => {
                info!("[PrintRunner] Print cancelled");
                self.engine.on_event(HostEvent::PrintFailed);
            }
            PrintOutcome::Failed(reason) => {
                warn!(reason = %reason, "[PrintRunner] Print failed");
                self.engine.on_event(HostEvent::PrintFailed);
            }
        }

        self.engine.on_event(HostEvent::Disconnected);
        self.queue.clear();

        PrintSummary {
            outcome,
            job_lines: self.job_lines,
            commands_sent: self.commands_sent,
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let cancel = self.cancel.clone();
        tokio::select! {
            () = cancel.cancelled() => anyhow::bail!("cancelled before firmware handshake"),
            result = self.write_and_wait(FIRMWARE_INFO_COMMAND) => {
                result.context("Firmware info request failed")
            }
        }
    }

    async fn stream_job<J: JobSource>(&mut self, job: &mut J) -> PrintOutcome {
        let cancel = self.cancel.clone();
        loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => return PrintOutcome::Cancelled,
                step = self.step(job) => step,
            };
            match step {
                Ok(Step::Continue) => {}
                Ok(Step::JobDone) => return PrintOutcome::Completed,
                Err(e) => return PrintOutcome::Failed(format!("{e:#}")),
            }
        }
    }

    async fn step<J: JobSource>(&mut self, job: &mut J) -> Result<Step> {
        if let Some(command) = self.queue.pop_priority() {
            self.dispatch(&command, CommandTags::HOST).await?;
            return Ok(Step::Continue);
        }

        if self.queue.is_held() {
            tokio::select! {
                () = self.queue.wait_for_work() => {}
                line = self.conn.next_line() => {
                    let line = line.context("Printer link lost while job was on hold")?;
                    self.engine.on_line_received(&line);
                }
            }
            return Ok(Step::Continue);
        }

        match job.next_command().await? {
            JobEvent::Eof => {
                // Drain anything the engine injected with the last job line.
                if self.queue.pending() > 0 {
                    return Ok(Step::Continue);
                }
                Ok(Step::JobDone)
            }
            JobEvent::Command(command) => {
                self.job_lines += 1;
                match self.engine.on_command_queuing(&command, CommandTags::FILE) {
                    Interception::Pass => {
                        self.dispatch(&command, CommandTags::FILE_VIA_ENGINE).await?;
                    }
                    Interception::Replace(commands) => {
                        debug!(original = %command, replacement = ?commands, "Command rewritten");
                        for replacement in &commands {
                            self.dispatch(replacement, CommandTags::FILE_VIA_ENGINE).await?;
                        }
                    }
                    Interception::Suppress => debug!(command = %command, "Command suppressed"),
                }
                Ok(Step::Continue)
            }
        }
    }

    async fn dispatch(&mut self, command: &str, tags: CommandTags) -> Result<()> {
        if let Some((name, params)) = parse_host_command(command) {
            debug!(name, params, %tags, "Host command");
            self.engine.on_host_command(name, params);
            return Ok(());
        }

        self.conn
            .send_line(command)
            .await
            .with_context(|| format!("Failed to send {command}"))?;
        self.commands_sent += 1;
        self.engine.on_command_sent(command, tags);
        self.await_ok().await
    }

    async fn write_and_wait(&mut self, command: &str) -> Result<()> {
        self.conn
            .send_line(command)
            .await
            .with_context(|| format!("Failed to send {command}"))?;
        self.commands_sent += 1;
        self.await_ok().await
    }

    async fn await_ok(&mut self) -> Result<()> {
        loop {
            let line = self
                .conn
                .next_line()
                .await
                .context("No acknowledgement from printer")?;
            self.engine.on_line_received(&line);
            if is_ack(&line) {
                return Ok(());
            }
            if line.starts_with("Error:") {
                warn!(line = %line, "[PrintRunner] Printer reported an error");
            }
        }
    }
}

/// `ok` acknowledgement, with or without trailing report (`ok T:210 /210`).
pub fn is_ack(line: &str) -> bool {
    let line = line.trim();
    line == "ok" || line.starts_with("ok ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ack() {
        assert!(is_ack("ok"));
        assert!(is_ack("ok T:210.0 /210.0 B:60.0 /60.0"));
        assert!(!is_ack("okay"));
        assert!(!is_ack("echo:busy: processing"));
    }
}
