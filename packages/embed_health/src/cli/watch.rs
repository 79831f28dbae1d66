//! `embed-health watch`: feed the embedded application's console output
//! through the tap and print every health change.
//!
//! Input is read line by line from stdin:
//! - a JSON object is posted to the message channel
//! - `#load-failed` / `#load-ok` report the embedding surface's load result
//! - anything else is logged under the `embedded` target, which puts it on
//!   the log bus like any other line logged in this process

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use embed_health::config::FileConfig;
use embed_health::{EngineConfig, HealthMonitor, HealthSnapshot};
use signal_tap::{LogBus, MessageChannel};

const LOAD_FAILED_DIRECTIVE: &str = "#load-failed";
const LOAD_OK_DIRECTIVE: &str = "#load-ok";

#[derive(Debug, PartialEq)]
enum InputLine {
    LoadFailed,
    LoadSucceeded,
    Message(Value),
    Log(String),
}

fn parse_input(line: &str) -> InputLine {
    match line.trim() {
        LOAD_FAILED_DIRECTIVE => InputLine::LoadFailed,
        LOAD_OK_DIRECTIVE => InputLine::LoadSucceeded,
        trimmed => match serde_json::from_str::<Value>(trimmed) {
            Ok(payload @ Value::Object(_)) => InputLine::Message(payload),
            _ => InputLine::Log(line.to_string()),
        },
    }
}

pub async fn watch_command(
    file_config: &FileConfig,
    endpoint: &str,
    json: bool,
    bus: LogBus,
) -> Result<()> {
    let messages = MessageChannel::new();
    let monitor = HealthMonitor::spawn(
        EngineConfig::from_file(&file_config.detection),
        bus,
        messages.clone(),
    );

    monitor
        .start_session(endpoint)
        .await
        .with_context(|| format!("Failed to start session for {:?}", endpoint))?;

    let mut updates = monitor.subscribe();
    let initial = updates.borrow_and_update().clone();
    print_snapshot(&initial, json)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => forward(&monitor, &messages, &line).await?,
                    None => break,
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_snapshot(&snapshot, json)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    monitor.end_session().await?;
    print_snapshot(&monitor.snapshot(), json)?;
    monitor.shutdown().await?;
    Ok(())
}

async fn forward(monitor: &HealthMonitor, messages: &MessageChannel, line: &str) -> Result<()> {
    match parse_input(line) {
        InputLine::LoadFailed => monitor.report_load_failure().await?,
        InputLine::LoadSucceeded => monitor.report_load_success().await?,
        InputLine::Message(payload) => {
            messages.post(payload);
        }
        InputLine::Log(text) => info!(target: "embedded", "{}", text),
    }
    Ok(())
}

fn print_snapshot(snapshot: &HealthSnapshot, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        println!("{}", line);
    } else {
        println!("{}", snapshot.status_line());
        for warning in snapshot.warnings() {
            println!("  ! {}", warning);
        }
    }
    Ok(())
}
