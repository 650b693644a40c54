use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use colored::*;
use tokio::sync::broadcast;
use tracing::warn;

use tunnelctl::cli::{Args, Command, ConfigAction, SettingsArgs};
use tunnelctl::logging::{self, DEFAULT_FILTER};
use tunnelctl::render;
use tunnelctl::{
    AppConfig, ErrorKind, Result, SettingsStore, StatusChanged, StatusClient, TomlSettingsStore,
    TunnelController, TunnelError, TunnelSettings, TunnelState,
};

type Controller = TunnelController<StatusClient, TomlSettingsStore>;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_tracing(DEFAULT_FILTER, args.log_json);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(exit_code(e.kind()))
        }
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidConfig => 2,
        ErrorKind::Busy => 3,
        ErrorKind::Timeout => 4,
        _ => 1,
    }
}

async fn run(args: Args) -> Result<()> {
    if let Command::Completions { shell } = args.command {
        clap_complete::generate(shell, &mut Args::command(), "tunnelctl", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load(&args.config)?;
    let store = TomlSettingsStore::new(&args.config);

    let mut backend = config.backend.clone();
    if let Some(url) = args.backend {
        backend.base_url = url;
    }
    let controller = TunnelController::builder(StatusClient::from_config(backend), store.clone())
        .poll_config(config.polling.clone())
        .build();

    match args.command {
        Command::Start { overrides, no_wait } => {
            start(&controller, overrides.apply(config.tunnel), no_wait).await
        }
        Command::Stop => stop(&controller).await,
        Command::Status { watch } => status(&controller, watch).await,
        Command::Config { action } => match action {
            ConfigAction::Show => show_settings(&store),
            ConfigAction::Set { overrides } => set_settings(&store, &overrides),
        },
        Command::Completions { .. } => Ok(()),
    }
}

async fn start(controller: &Controller, settings: TunnelSettings, no_wait: bool) -> Result<()> {
    let mut events = controller.subscribe();
    let ack = controller.start(settings).await?;
    println!(
        "{}",
        ack.message.as_deref().unwrap_or("Tunnel started successfully!").green()
    );
    if no_wait {
        return Ok(());
    }
    follow(controller, &mut events).await
}

async fn stop(controller: &Controller) -> Result<()> {
    // A fresh process starts Idle; learn what the backend is doing first.
    controller.refresh().await?;
    if controller.state() == TunnelState::Idle {
        println!("{}", "Tunnel is not running.".bright_black());
        return Ok(());
    }
    let ack = controller.stop().await?;
    println!(
        "{}",
        ack.message.as_deref().unwrap_or("Tunnel stopped successfully!").green()
    );
    Ok(())
}

async fn status(controller: &Controller, watch: bool) -> Result<()> {
    if !watch {
        let status = controller.refresh().await?;
        println!(
            "{}",
            render::render_event(&StatusChanged {
                state: controller.state(),
                status: Some(status),
                error: None,
            })
        );
        return Ok(());
    }

    let mut events = controller.subscribe();
    controller.watch_status().await?;
    follow(controller, &mut events).await
}

/// Print events until the current poll session ends (or Ctrl-C), then
/// surface how it ended.
async fn follow(controller: &Controller, events: &mut broadcast::Receiver<StatusChanged>) -> Result<()> {
    let done = controller.wait_for_poll();
    tokio::pin!(done);

    loop {
        tokio::select! {
            _ = &mut done => break,
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Stopped watching; the tunnel keeps running.".bright_black());
                return Ok(());
            }
            recv = events.recv() => match recv {
                Ok(event) => println!("{}", render::render_event(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    while let Ok(event) = events.try_recv() {
        println!("{}", render::render_event(&event));
    }

    let snapshot = controller.current_status();
    match snapshot.last_error {
        Some(e) if snapshot.state != TunnelState::Running => Err(e),
        _ => Ok(()),
    }
}

fn show_settings(store: &TomlSettingsStore) -> Result<()> {
    let settings = store.load_settings()?;
    println!("{} {}", "config:".bold(), store.path().display());
    println!("  provider     {}", settings.provider);
    println!("  local_port   {}", settings.local_port);
    if let Some(token) = settings.pinggy_token.as_deref() {
        println!("  pinggy_token {}", mask_token(token));
    }
    Ok(())
}

fn set_settings(store: &TomlSettingsStore, overrides: &SettingsArgs) -> Result<()> {
    if overrides.is_empty() {
        return Err(TunnelError::InvalidConfig(
            "nothing to set; pass --provider, --port or --pinggy-token".to_string(),
        ));
    }
    let settings = overrides.apply(store.load_settings()?);
    let ack = store.save_settings(&settings)?;
    if let Some(message) = ack.message {
        println!("{}", message.green());
    }
    Ok(())
}

fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(3).collect();
    format!("{visible}***")
}
