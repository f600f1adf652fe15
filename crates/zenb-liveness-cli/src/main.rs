mod scenario;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use zenb_liveness::{
    CaptureSink, Frame, LiveFrameCapture, LivenessConfig, LivenessSession, RunOutcome,
    SegmentIndicator, SessionEvent, SessionHandle,
};

use crate::scenario::{Scenario, ScenarioObserver};

#[derive(Parser)]
#[command(name = "zenb-liveness")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scripted scenario through a liveness session
    Simulate {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// One JSON object per event instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    ShowConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_logging() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(d) = "zenb_liveness=info".parse() {
        filter = filter.add_directive(d);
    }

    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();
    match cli.cmd {
        Commands::Simulate {
            scenario,
            config,
            json,
        } => {
            let config = LivenessConfig::load_layered(config.as_deref())?;
            let scenario = Scenario::from_file(&scenario)?;
            let outcome = simulate(config, &scenario, json).await?;
            match outcome {
                Some(outcome) if outcome.success => {}
                Some(outcome) => {
                    outcome.into_result()?;
                }
                None => return Err("liveness run did not finish".into()),
            }
        }
        Commands::ShowConfig { config } => {
            let config = LivenessConfig::load_layered(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}

async fn simulate(
    config: LivenessConfig,
    scenario: &Scenario,
    json: bool,
) -> Result<Option<RunOutcome>, Box<dyn std::error::Error>> {
    if let Some(description) = &scenario.description {
        info!(description = description.as_str(), "running scenario");
    }

    let observer = Arc::new(ScenarioObserver::new(scenario));
    let capture = Arc::new(LiveFrameCapture::new());
    let indicator = Arc::new(Mutex::new(SegmentIndicator::new()));
    let (handle, mut events) = LivenessSession::new(
        config,
        observer,
        capture.clone(),
        Box::new(indicator.clone()),
    )
    .manual_ticks()
    .spawn()?;

    let mut outcome = None;
    handle.start().await?;
    for (i, frame) in scenario.frames.iter().enumerate() {
        if frame.reset_before {
            handle.reset().await?;
            outcome = None;
        }
        for _ in 0..frame.ticks_before {
            handle.tick().await?;
        }
        let submitted = handle.submit_frame(Frame::empty(i as u64, scenario.timestamp_us(i)))?;
        if !submitted {
            warn!(frame = i, "frame dropped, session queue full");
        }
        settle(&handle, (i + 1) as u64).await?;
        print_events(&mut events, json, &mut outcome)?;
    }
    for _ in 0..scenario.ticks_after {
        handle.tick().await?;
    }

    let snapshot = handle.snapshot().await?;
    print_events(&mut events, json, &mut outcome)?;
    let stats = handle.shutdown().await?;

    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
    } else {
        for (i, step) in snapshot.checklist.iter().enumerate() {
            let mark = if step.completed { "✓" } else { " " };
            println!("[{}] {} {}", mark, i, step.label);
        }
        let indicator = indicator.lock();
        println!(
            "progress {:.0}% (segment {}), {} photo(s) captured",
            indicator.percent(),
            indicator.active_segment(),
            capture.captured_count()
        );
        println!(
            "frames: {} received, {} throttled, {} ignored, {} busy; detections: {} submitted, {} failed, {} stale",
            stats.frames_received,
            stats.frames_throttled,
            stats.frames_ignored,
            stats.frames_busy,
            stats.detections_submitted,
            stats.detections_failed,
            stats.detections_stale
        );
    }
    Ok(outcome)
}

/// Wait until the session has seen `frames` frames and every detection it
/// started has come back.
async fn settle(handle: &SessionHandle, frames: u64) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let stats = handle.snapshot().await?.stats;
        if stats.frames_received >= frames
            && stats.detections_completed == stats.detections_submitted
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn print_events(
    events: &mut UnboundedReceiver<SessionEvent>,
    json: bool,
    outcome: &mut Option<RunOutcome>,
) -> Result<(), serde_json::Error> {
    while let Ok(event) = events.try_recv() {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", describe(&event));
        }
        if let SessionEvent::Finished(o) = event {
            *outcome = Some(o);
        }
    }
    Ok(())
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Prompt { step: Some(i), label } => format!("prompt  step {}: {}", i, label),
        SessionEvent::Prompt { step: None, label } => format!("prompt  {}", label),
        SessionEvent::Progress { percent } => format!("progress {}%", percent),
        SessionEvent::Captured { step, slot } => format!("capture step {} -> slot {}", step, slot),
        SessionEvent::CaptureWarning { step, slot, reason } => {
            format!("capture step {} -> slot {} failed: {}", step, slot, reason)
        }
        SessionEvent::Invalidated { step } => format!("timeout waiting for step {}", step),
        SessionEvent::Finished(o) if o.success => {
            format!("finished: success {:?}", o.completed_steps)
        }
        SessionEvent::Finished(o) => match &o.error {
            Some(err) => format!("finished: failure ({})", err),
            None => "finished: failure".to_string(),
        },
    }
}
