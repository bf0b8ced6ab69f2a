use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use pulse::components::source::{Simulator, SourceRunner};
use pulse::directory::normalize_email;
use pulse::prelude::*;
use pulse::{SERVICE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.red().bold(), rest.red()))
        } else {
            Cow::Owned(line.red().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", "  ♥  pulseshell".red().bold());
    println!(
        "{}",
        format!(
            "     Shell   v{:<8} {}   v{:<8}",
            SHELL_VERSION, SERVICE_NAME, LIB_VERSION
        )
        .dimmed()
    );
    println!("{}", "-".repeat(60).dimmed());
}

/// Prints hub events as they arrive.
fn spawn_event_listener(hub: &PulseHub) {
    let mut events = hub.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PulseEvent::SampleAccepted {
                    bpm,
                    delivered,
                    failed,
                }) => println!(
                    "<-- [SAMPLE] {} BPM -> {} delivered, {} failed",
                    bpm, delivered, failed
                ),
                Ok(event) => println!("<-- [EVENT] {:?}", event),
                Err(RecvError::Lagged(skipped)) => println!("<-- [EVENT] {} skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Subscribes a sink that prints every sample under the shell handle `handle`.
async fn watch(hub: &PulseHub, handle: usize) -> SubscriptionId {
    hub.subscribe(Arc::new(move |bpm: Bpm| -> Result<(), SinkError> {
        println!("<-- [WATCH #{}] {} BPM", handle, bpm);
        Ok(())
    }))
    .await
}

#[derive(Debug, Parser)]
#[command(name = "pulseshell", version)]
#[command(about = "Interactive shell for driving a heart-rate hub")]
struct Cli {
    /// TOML configuration file; a missing file means built-in defaults.
    #[arg(long, env = "PULSE_CONFIG", default_value = "pulse.toml")]
    config: PathBuf,
}

fn print_help() {
    println!("Available commands:");
    println!("  feed <BPM>              - Ingests one raw sample.");
    println!("  sim <N>                 - Ingests N random-walk samples.");
    println!("  start                   - Starts the configured sample source.");
    println!("  stop                    - Stops the running sample source.");
    println!("  watch                   - Subscribes a printing sink.");
    println!("  unwatch <H>             - Removes a watch by its handle.");
    println!("  list                    - Shows active watches and their handles.");
    println!("  bpm                     - Prints the latest value.");
    println!("  recipient <EMAIL> <NAME> - Registers an alert recipient.");
    println!("  check <EMAIL>           - Runs the high-BPM check for a recipient.");
    println!("  status                  - Prints hub status.");
    println!("  exit                    - Quits the shell.");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    print_banner();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config = PulseConfig::load(Some(&cli.config))?;
    let simulator_config = config.source.simulator.clone();
    let source_config = config.source.clone();
    let directory = Arc::new(InMemoryDirectory::from_config(&config.recipients));
    let mailer = Arc::new(DirectoryMailer::new(
        directory.clone(),
        config.alert.sender.clone(),
    ));
    let hub = PulseHub::new(config, mailer);
    spawn_event_listener(&hub);

    // The shell's state management variables.
    let mut watches: BTreeMap<usize, SubscriptionId> = BTreeMap::new();
    let mut next_handle: usize = 0;
    let mut source_shutdown: Option<broadcast::Sender<()>> = None;

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));

    println!(
        "{} is ready. Type 'help' for commands or 'exit' to quit.",
        SERVICE_NAME.red()
    );

    loop {
        let prompt = format!("{}", ">> ".red().bold());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => {
                println!("Exiting pulseshell...");
                break;
            }
        };
        rl.add_history_entry(line.as_str())?;
        let args = line.split_whitespace().collect::<Vec<_>>();
        let Some(command) = args.first() else {
            continue;
        };

        match *command {
            "feed" => match args.get(1).map(|s| s.parse::<u32>()) {
                Some(Ok(value)) => {
                    if !hub.ingest(Bpm(value)).await {
                        println!("--> {} BPM equals the latest value; nothing sent.", value);
                    }
                }
                Some(Err(_)) => println!("Error: BPM must be a whole number."),
                None => println!("Usage: feed <BPM>"),
            },
            "sim" => match args.get(1).map(|s| s.parse::<usize>()) {
                Some(Ok(steps)) => {
                    let start = hub.latest().await.unwrap_or(source_config.fallback_bpm);
                    let mut simulator = Simulator::new(&simulator_config, start);
                    for _ in 0..steps {
                        hub.ingest(simulator.step()).await;
                    }
                }
                Some(Err(_)) => println!("Error: step count must be a whole number."),
                None => println!("Usage: sim <N>"),
            },
            "start" => {
                if source_shutdown.is_some() {
                    println!("--> The sample source is already running.");
                } else {
                    let (tx, rx) = broadcast::channel(1);
                    let runner = SourceRunner::new(hub.clone(), source_config.clone());
                    tokio::spawn(runner.run(rx));
                    source_shutdown = Some(tx);
                    println!("--> Sample source started.");
                }
            }
            "stop" => match source_shutdown.take() {
                Some(tx) => {
                    tx.send(()).ok();
                    println!("--> Sample source stopped.");
                }
                None => println!("--> No sample source is running."),
            },
            "watch" => {
                let handle = next_handle;
                next_handle += 1;
                let id = watch(&hub, handle).await;
                watches.insert(handle, id);
                println!("--> Watching with handle #{}", handle);
            }
            "unwatch" => match args.get(1).map(|s| s.parse::<usize>()) {
                Some(Ok(handle)) => match watches.remove(&handle) {
                    Some(id) => {
                        if hub.unsubscribe(id).await {
                            println!("--> Watch #{} removed.", handle);
                        } else {
                            println!("--> Error: watch #{} was no longer registered.", handle);
                        }
                    }
                    None => println!(
                        "Error: Invalid handle #{}. Use 'list' to see active watches.",
                        handle
                    ),
                },
                Some(Err(_)) => println!("Error: Handle must be a number (e.g., '0', '1')."),
                None => println!("Usage: unwatch <HANDLE>"),
            },
            "list" => {
                println!("Active watches:");
                for (handle, id) in &watches {
                    println!("  Handle #{}: {:?}", handle, id);
                }
            }
            "bpm" => match hub.latest().await {
                Some(bpm) => println!("--> {} BPM", bpm),
                None => println!("--> BPM not available yet."),
            },
            "recipient" => match (args.get(1), args.get(2..)) {
                (Some(email), Some(name)) if !name.is_empty() => {
                    directory.upsert(email, &name.join(" ")).await;
                    println!("--> Recipient {} registered.", email);
                }
                _ => println!("Usage: recipient <EMAIL> <NAME>"),
            },
            "check" => match args.get(1) {
                Some(email) => match hub.check_high_bpm(&normalize_email(email)).await {
                    Some(outcome) => match outcome.decision {
                        AlertDecision::Clear => println!("--> {} BPM is normal.", outcome.bpm),
                        AlertDecision::Dispatch => match outcome.delivery_error {
                            None => println!("--> {} BPM is high. Alert sent.", outcome.bpm),
                            Some(e) => println!("--> {} BPM is high. Alert failed: {}", outcome.bpm, e),
                        },
                        AlertDecision::Suppressed { remaining } => println!(
                            "--> {} BPM is high. Alert suppressed for another {}s.",
                            outcome.bpm,
                            remaining.as_secs()
                        ),
                    },
                    None => println!("--> BPM data not available."),
                },
                None => println!("Usage: check <EMAIL>"),
            },
            "status" => {
                let status = hub.status().await;
                println!(
                    "--> latest: {}, subscribers: {}, source: {}",
                    status
                        .latest
                        .map(|b| b.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    status.subscribers,
                    status
                        .source
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "stopped".to_string())
                );
            }
            "help" => print_help(),
            "exit" => break,
            _ => println!("Unknown command: '{}'. Type 'help'.", line.trim()),
        }
    }

    if let Some(tx) = source_shutdown {
        tx.send(()).ok();
    }
    Ok(())
}
