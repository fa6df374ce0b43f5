use anyhow::Result;
use clap::Parser;
use client_core::{CommandOutcome, CommandSender, StatusChannel, StatusSnapshot};
use session::{channel_stream, Intent, SessionHandle, StepView};
use shared::domain::WorkflowStep;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(about = "Walks a patient through a gait test session from the terminal")]
struct Args {
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    auth_token: Option<String>,
    #[arg(long)]
    ws_path: Option<String>,
    #[arg(long)]
    advance_delay_ms: Option<u64>,
    #[arg(long)]
    no_reconnect: bool,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.api_base_url {
            settings.api_base_url = v;
        }
        if let Some(v) = self.auth_token {
            settings.auth_token = Some(v);
        }
        if let Some(v) = self.ws_path {
            settings.ws_path = v;
        }
        if let Some(v) = self.advance_delay_ms {
            settings.advance_delay_ms = v;
        }
        if self.no_reconnect {
            settings.reconnect_enabled = false;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Intent(Intent),
    Status,
    Heartbeat,
    Reconnect,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str, view: &StepView) -> Input {
    let line = line.trim();
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => Input::Empty,
        (Some("quit" | "q" | "exit"), None) => Input::Quit,
        (Some("status"), None) => Input::Status,
        (Some("heartbeat"), None) => Input::Heartbeat,
        (Some("reconnect"), None) => Input::Reconnect,
        (Some("help" | "?"), None) => Input::Help,
        (Some("step"), Some(number)) => number
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(WorkflowStep::from_index)
            .map(|step| Input::Intent(Intent::GoTo(step)))
            .unwrap_or_else(|| Input::Unknown(line.to_string())),
        (Some(key), None) => view
            .offers(key)
            .map(Input::Intent)
            .unwrap_or_else(|| Input::Unknown(line.to_string())),
        _ => Input::Unknown(line.to_string()),
    }
}

fn print_help() {
    println!("Type a button key shown in brackets, or one of:");
    println!("  step <1-3>   jump to a step");
    println!("  status       show the latest device status");
    println!("  heartbeat    ping the status channel");
    println!("  reconnect    reconnect the status channel");
    println!("  quit         end the session");
}

fn print_status(snapshot: &StatusSnapshot) {
    println!("channel: {:?}", snapshot.connection);
    println!("  device alive:         {:?}", snapshot.device_alive);
    println!("  orientation captured: {:?}", snapshot.orientation_captured);
    match &snapshot.calibration {
        Some(reading) => println!(
            "  calibration: status={} sys={} gyro={} accel={} mag={} ({}%)",
            reading.status,
            reading.sys,
            reading.gyro,
            reading.accel,
            reading.mag,
            reading.progress()
        ),
        None => println!("  calibration: no reading yet"),
    }
    if let Some(sample) = &snapshot.sensor_data {
        println!("  last sensor sample: {sample}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut settings = load_settings();
    Args::parse().apply(&mut settings);
    info!(
        api_base_url = %settings.api_base_url,
        ws_path = %settings.ws_path,
        authenticated = settings.auth_token.is_some(),
        "console: starting session"
    );

    let channel = StatusChannel::connect(settings.status_channel_config());
    let commands = CommandSender::new(&settings.command_sender_config());
    let mut reports = commands.subscribe_reports();
    let session = SessionHandle::spawn(
        settings.session_timings(),
        commands,
        channel_stream(channel.subscribe_events(), channel.watch()),
    );

    let mut states = session.subscribe();
    let mut connection = channel.watch();
    let mut last_connection = connection.borrow().connection;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("{}", session.view().render());
    print_help();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = StepView::from_state(&states.borrow_and_update());
                print!("\n{}", view.render());
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connection.borrow_and_update().connection;
                if state != last_connection {
                    println!("channel: {state:?}");
                    last_connection = state;
                }
            }
            report = reports.recv() => match report {
                Ok(report) => {
                    if let CommandOutcome::Failed(reason) = report.outcome {
                        println!("! {} was not delivered: {reason}", report.command);
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line, &session.view()) {
                    Input::Intent(intent) => {
                        session.perform(intent);
                    }
                    Input::Status => print_status(&channel.snapshot()),
                    Input::Heartbeat => {
                        if !channel.send_heartbeat() {
                            println!("channel is not connected");
                        }
                    }
                    Input::Reconnect => channel.reconnect(),
                    Input::Help => print_help(),
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Unknown(text) => println!("unknown or unavailable action: {text}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    channel.disconnect().await;
    info!("console: session closed");
    Ok(())
}
