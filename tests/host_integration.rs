//! Print Host Integration Tests
//!
//! Runs `PrintRunner` against a fake printer on an in-memory duplex stream.
//! The fake answers `M115` with a firmware report, the mesh query with a
//! canned reply, `M500` with a save confirmation, and everything with `ok`.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use smart_abl::config::AblConfig;
use smart_abl::engine::{Collaborators, DecisionEngine, EngineSettings};
use smart_abl::host::{DispatchQueue, PrintOutcome, PrintRunner, PrinterConnection, ScriptedJob};
use smart_abl::notify::TracingNotifier;
use smart_abl::storage::{FixedClock, InMemoryStore, PersistedCounters};

const MARLIN: &str = "FIRMWARE_NAME:Marlin 2.1.2.1 (Github) SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin";
const DUET: &str = "FIRMWARE_NAME: RepRapFirmware for Duet 3 FIRMWARE_VERSION: 3.4.5";

#[derive(Clone, Copy)]
struct FakePrinter {
    firmware: &'static str,
    /// Answer to `M420 V1`; `None` answers with a bare `ok`.
    mesh_reply: Option<&'static str>,
    /// Hang up after this many commands.
    hang_up_after: Option<usize>,
}

impl FakePrinter {
    fn marlin(mesh_reply: Option<&'static str>) -> Self {
        Self {
            firmware: MARLIN,
            mesh_reply,
            hang_up_after: None,
        }
    }

    /// Serve until the host closes the stream; returns every command received.
    fn spawn(self, stream: DuplexStream) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(stream);
            let mut lines = BufReader::new(reader).lines();
            let mut received = Vec::new();

            while let Ok(Some(line)) = lines.next_line().await {
                let mut replies = Vec::new();
                match line.as_str() {
                    "M115" => replies.push(self.firmware),
                    "M420 V1" => replies.extend(self.mesh_reply),
                    "M500" => replies.push("echo:Settings Stored (660 bytes; crc 39918)"),
                    _ => {}
                }
                replies.push("ok");
                received.push(line);

                if self.hang_up_after.is_some_and(|n| received.len() >= n) {
                    break;
                }
                for reply in replies {
                    if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                        return received;
                    }
                }
            }
            received
        })
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

fn settled() -> PersistedCounters {
    let mut record = PersistedCounters::fresh(today());
    record.first_time = false;
    record
}

struct Rig {
    runner: PrintRunner<tokio::io::WriteHalf<DuplexStream>>,
    printer: JoinHandle<Vec<String>>,
    store: InMemoryStore,
}

fn rig(printer: FakePrinter, record: Option<PersistedCounters>) -> Rig {
    let (host_side, printer_side) = tokio::io::duplex(4096);
    let printer = printer.spawn(printer_side);

    let (reader, writer) = tokio::io::split(host_side);
    let conn = PrinterConnection::from_parts(reader, writer, Duration::from_secs(60));

    let store = match record {
        Some(record) => InMemoryStore::with_record(record),
        None => InMemoryStore::new(),
    };
    let config = AblConfig::default();
    let queue = Arc::new(DispatchQueue::new());
    let collab = Collaborators {
        link: queue.clone(),
        notifier: Arc::new(TracingNotifier),
        policy: Arc::new(config.clone()),
        clock: Arc::new(FixedClock::new(today())),
    };
    let engine = DecisionEngine::new(
        collab,
        Box::new(store.clone()),
        EngineSettings::from_config(&config),
    );
    let runner = PrintRunner::new(conn, engine, queue, CancellationToken::new());

    Rig {
        runner,
        printer,
        store,
    }
}

#[tokio::test]
async fn test_first_print_probes_saves_and_counts() {
    let mut rig = rig(FakePrinter::marlin(Some("echo:Invalid mesh.")), None);
    let mut job = ScriptedJob::new([
        "; sliced job",
        "G28",
        "M190 S60",
        "G29 ; level",
        "G1 X10",
        "M109 S210",
    ]);

    let summary = rig.runner.run(&mut job).await;
    assert_eq!(summary.outcome, PrintOutcome::Completed);
    assert_eq!(summary.job_lines, 5);

    let engine = rig.runner.finish().await;
    let received = rig.printer.await.unwrap();
    assert_eq!(
        received,
        vec!["M115", "G28", "M190 S60", "M420 V1", "G29", "M500", "G1 X10", "M109 S210"]
    );

    let counters = engine.counters();
    assert!(!counters.first_time);
    assert_eq!(counters.prints_since_mesh, 1);
    assert_eq!(counters.last_bed_temp, 60);
    assert_eq!(counters.last_hotend_temp, 210);
    assert_eq!(rig.store.record().as_ref(), Some(counters));
}

#[tokio::test]
async fn test_valid_mesh_is_loaded_instead_of_probed() {
    let mut rig = rig(FakePrinter::marlin(Some("Bilinear Leveling Grid:")), Some(settled()));
    let mut job = ScriptedJob::new(["G28", "G29", "G1 X10"]);

    let summary = rig.runner.run(&mut job).await;
    assert_eq!(summary.outcome, PrintOutcome::Completed);

    rig.runner.finish().await;
    let received = rig.printer.await.unwrap();
    assert_eq!(received, vec!["M115", "G28", "M420 V1", "M420 S1", "G1 X10"]);
}

#[tokio::test(start_paused = true)]
async fn test_silent_query_still_releases_the_job() {
    let mut rig = rig(FakePrinter::marlin(None), Some(settled()));
    let mut job = ScriptedJob::new(["G29", "G1 X10"]);

    let summary = rig.runner.run(&mut job).await;
    assert_eq!(summary.outcome, PrintOutcome::Completed);

    let engine = rig.runner.finish().await;
    let received = rig.printer.await.unwrap();
    assert_eq!(received, vec!["M115", "M420 V1", "G29", "M500", "G1 X10"]);
    assert_eq!(engine.counters().prints_since_mesh, 1);
}

#[tokio::test]
async fn test_unknown_firmware_passes_job_through() {
    let printer = FakePrinter {
        firmware: DUET,
        mesh_reply: None,
        hang_up_after: None,
    };
    let mut rig = rig(printer, Some(settled()));
    let mut job = ScriptedJob::new(["G28", "G29", "G1 X10"]);

    let summary = rig.runner.run(&mut job).await;
    assert_eq!(summary.outcome, PrintOutcome::Completed);

    let engine = rig.runner.finish().await;
    let received = rig.printer.await.unwrap();
    assert_eq!(received, vec!["M115", "G28", "G29", "G1 X10"]);
    assert_eq!(engine.counters().prints_since_mesh, 0);
}

#[tokio::test]
async fn test_printer_hang_up_fails_the_print() {
    let printer = FakePrinter {
        hang_up_after: Some(2),
        ..FakePrinter::marlin(None)
    };
    let mut rig = rig(printer, Some(settled()));
    let mut job = ScriptedJob::new(["G28", "G1 X10", "G1 X20"]);

    let summary = rig.runner.run(&mut job).await;
    assert!(matches!(summary.outcome, PrintOutcome::Failed(_)));

    let engine = rig.runner.finish().await;
    assert_eq!(rig.printer.await.unwrap(), vec!["M115", "G28"]);
    assert_eq!(engine.counters().prints_since_mesh, 0);
}
