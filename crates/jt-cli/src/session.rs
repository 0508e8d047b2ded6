//! Interactive operator session on stdin.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{select, unbounded};
use jt_control::{OperatorCommand, Runtime, Telemetry, spawn_thread};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input {
    Command(OperatorCommand),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: stop | calibrate | track-on | track-off | search-once | \
set-limits <lo> <hi> | set-step <s> | reset | cancel | status | quit";

fn number(word: Option<&str>, what: &str) -> Result<f64> {
    let Some(word) = word else {
        bail!("missing {what}");
    };
    word.parse()
        .with_context(|| format!("{what} must be a number, got {word:?}"))
}

/// Parses one operator line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Input>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let input = match verb {
        "start" => Input::Command(OperatorCommand::Start),
        "stop" => Input::Command(OperatorCommand::Stop),
        "calibrate" => Input::Command(OperatorCommand::Calibrate),
        "track-on" => Input::Command(OperatorCommand::TrackOn),
        "track-off" => Input::Command(OperatorCommand::TrackOff),
        "search-once" => Input::Command(OperatorCommand::SearchOnce),
        "set-limits" => {
            let low = number(words.next(), "low limit")?;
            let high = number(words.next(), "high limit")?;
            Input::Command(OperatorCommand::SetLimits { low, high })
        }
        "set-step" => Input::Command(OperatorCommand::SetStep {
            step: number(words.next(), "step")?,
        }),
        "reset" => Input::Command(OperatorCommand::Reset),
        "cancel" => Input::Command(OperatorCommand::Cancel),
        "status" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => bail!("unknown command {other:?}; {HELP}"),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected argument {extra:?} after {verb}");
    }
    Ok(Some(input))
}

fn print_telemetry(t: &Telemetry) {
    let pos = t
        .position
        .map_or_else(|| "?".to_owned(), |p| format!("{p:+.4} mm"));
    let avg = t.averages.map_or_else(
        || "no shots".to_owned(),
        |a| format!("I0 {:.4}  D {:.4}  R {:.4} over {}", a.i0, a.diff, a.ratio, a.count),
    );
    let jet = t
        .jet
        .map_or_else(|| "no jet".to_owned(), |j| format!("jet_x {:+.4} mm", j.jet_x));
    println!("{}  position {pos}  {avg}  {jet}", t.state);
}

/// Runs until `quit`, end of input or `running` clearing, then shuts the
/// runtime down.
pub fn run(runtime: Runtime, running: Arc<AtomicBool>) -> Result<()> {
    let status = runtime.subscribe();
    let (line_tx, line_rx) = unbounded();
    // Detached: a blocked stdin read must not hold up shutdown.
    let _reader = spawn_thread("jt-stdin", move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    })
    .context("spawning stdin reader")?;

    println!("{HELP}");
    let mut latest: Option<Telemetry> = None;
    while running.load(Ordering::SeqCst) && runtime.is_running() {
        while let Ok(t) = runtime.telemetry().try_recv() {
            latest = Some(t);
        }
        select! {
            recv(line_rx) -> line => {
                let Ok(line) = line else {
                    debug!("stdin closed");
                    break;
                };
                match parse_line(&line) {
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(Input::Help)) => println!("{HELP}"),
                    Ok(Some(Input::Status)) => match &latest {
                        Some(t) => print_telemetry(t),
                        None => println!("no telemetry yet"),
                    },
                    Ok(Some(Input::Command(OperatorCommand::Cancel))) => runtime.cancel()?,
                    Ok(Some(Input::Command(cmd))) => runtime.send(cmd)?,
                    Ok(None) => {}
                    Err(err) => eprintln!("{err:#}"),
                }
            }
            recv(status) -> event => {
                if let Ok(e) = event {
                    println!("[{}] {}", e.state, e.message);
                }
            }
            default(Duration::from_millis(200)) => {}
        }
    }

    info!("session ending");
    runtime.shutdown();
    Ok(())
}
