//! Replay a committed log through the session state machine
//!
//! The log is JSON lines, one committed entry per line:
//!
//! ```text
//! {"index": 1, "type": "register_session", "session": 1}
//! {"index": 2, "type": "command", "session": 1, "payload": {"op": "put"}}
//! {"index": 9, "type": "tick"}
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::Args;
use steward_core::{
    ApplyError, Callback, ChannelTransport, Committed, Delivery, MachineStats,
    ReplicatedStateMachine, SessionContext, SessionHandle, SessionListener,
};
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, StewardConfig};

/// Replay arguments
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON-lines file of committed entries
    pub log: PathBuf,

    /// Extra config file layered over user and project config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the session timeout, in log indexes
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stop at the first rejected entry
    #[arg(long)]
    pub stop_on_error: bool,

    /// Print the final snapshot as JSON
    #[arg(long)]
    pub snapshot: bool,
}

/// Everything one replay produced
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Callback and result lines, in apply order
    pub lines: Vec<String>,
    pub applied: usize,
    pub rejected: usize,
    pub deliveries: Vec<Delivery>,
    pub stats: MachineStats,
    pub snapshot: String,
}

type Lines = Arc<Mutex<Vec<String>>>;

fn push(lines: &Lines, line: String) {
    lines.lock().unwrap_or_else(PoisonError::into_inner).push(line);
}

/// Writes one line per lifecycle callback
struct CallbackPrinter {
    lines: Lines,
}

impl CallbackPrinter {
    fn record(&self, callback: Callback, session: &SessionHandle, ctx: &SessionContext<'_>) {
        debug!(session = %session.id, %callback, index = ctx.index(), "callback");
        let name = callback.to_string();
        push(
            &self.lines,
            format!("  {name:<10} session={} state={}", session.id, session.state),
        );
    }
}

impl SessionListener for CallbackPrinter {
    fn register(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Register, session, ctx);
    }

    fn unregister(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Unregister, session, ctx);
    }

    fn expire(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Expire, session, ctx);
    }

    fn close(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
        self.record(Callback::Close, session, ctx);
    }
}

/// Run replay command
pub async fn run(args: ReplayArgs) -> Result<()> {
    let mut config = ConfigLoader::load_with(args.config.as_deref())?;
    if let Some(timeout) = args.timeout {
        config.session.session_timeout = timeout;
        config.session.validate()?;
    }
    if args.stop_on_error {
        config.replay.stop_on_error = true;
    }

    let file = File::open(&args.log)
        .with_context(|| format!("opening log {}", args.log.display()))?;
    let report = replay(BufReader::new(file), &config).await?;

    for line in &report.lines {
        println!("{}", line);
    }
    println!();
    println!("Deliveries:");
    for delivery in &report.deliveries {
        println!(
            "  [{}] session={} {}",
            delivery.index,
            delivery.session,
            delivery.event_names().join(", ")
        );
    }
    println!();
    println!(
        "Applied {} entries ({} rejected), last index {}",
        report.applied, report.rejected, report.stats.last_applied
    );
    println!("{}", serde_json::to_string_pretty(&report.stats)?);
    if args.snapshot {
        println!("{}", report.snapshot);
    }
    Ok(())
}

/// Feed every entry in `reader` through a fresh state machine
///
/// Per-entry rejections are reported and skipped unless the config asks
/// to stop. Ordering violations always stop the replay.
pub async fn replay(reader: impl BufRead, config: &StewardConfig) -> Result<ReplayReport> {
    let lines: Lines = Arc::default();
    let (transport, mut rx) = ChannelTransport::new();
    let mut machine = ReplicatedStateMachine::builder(config.session.clone())
        .listener(CallbackPrinter {
            lines: lines.clone(),
        })
        .transport(Arc::new(transport))
        .build();

    let drain = tokio::spawn(async move {
        let mut deliveries = Vec::new();
        while let Some(delivery) = rx.recv().await {
            deliveries.push(delivery);
        }
        deliveries
    });

    let mut report = ReplayReport::default();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let committed: Committed = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid committed entry", number + 1))?;
        let index = committed.index;
        let kind = committed.entry.kind();

        match machine.apply_committed(committed) {
            Ok(output) => {
                report.applied += 1;
                push(
                    &lines,
                    format!("[{index}] {kind} -> {}", serde_json::to_string(&output)?),
                );
            }
            Err(err) if err.is_fatal() => {
                return Err(anyhow::Error::new(err).context(format!("line {}", number + 1)));
            }
            Err(ApplyError::Session(err)) if config.replay.stop_on_error => {
                anyhow::bail!("line {}: entry {index} rejected: {err}", number + 1);
            }
            Err(err) => {
                report.applied += 1;
                report.rejected += 1;
                warn!(index, entry = kind, error = %err, "replayed entry rejected");
                push(&lines, format!("[{index}] {kind} !! {err}"));
            }
        }
    }

    report.stats = machine.stats();
    report.snapshot = machine.snapshot().to_json()?;
    // Dropping the machine closes the channel and ends the drain task
    drop(machine);
    report.deliveries = drain.await?;
    report.lines = std::mem::take(&mut *lines.lock().unwrap_or_else(PoisonError::into_inner));

    info!(
        applied = report.applied,
        rejected = report.rejected,
        deliveries = report.deliveries.len(),
        "replay finished"
    );
    Ok(report)
}
