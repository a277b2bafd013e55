use std::sync::Arc;

use tokio::sync::mpsc;

use basis_core::{
    commands::CommandDispatcher,
    config::Config,
    events::{ControlPlane, EventLoop, EVENT_QUEUE_CAPACITY},
    export::LogExporter,
    logging::{self, PROGRAM, SENTRY},
    presence::PresenceStore,
    reporting,
    shutdown::ShutdownSequencer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let reporter = reporting::from_config(&cfg);
    let hook = logging::init(&cfg, reporter.clone())?;
    tracing::info!(target: PROGRAM, "Engine powering up...");
    tracing::info!(target: SENTRY, "Error reports go to {}.", reporter.destination());

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (mut client, gateway) =
        basis_discord::router::connect(&cfg.bot_token, hook, tx).await?;

    let store = Arc::new(PresenceStore::new(cfg.presence_file.clone(), reporter.clone()));
    let exporter = Arc::new(LogExporter::new(&cfg, gateway.clone(), reporter.clone()));
    let shutdown = Arc::new(ShutdownSequencer::new(
        gateway.clone(),
        gateway.clone(),
        gateway.clone(),
    ));
    let dispatcher = CommandDispatcher::new(
        cfg.owner,
        store.clone(),
        exporter,
        gateway.clone(),
        gateway.clone(),
        shutdown.clone(),
        reporter.clone(),
    );
    let plane = Arc::new(ControlPlane::new(
        cfg.owner,
        store,
        gateway.clone(),
        gateway,
        dispatcher,
        reporter.clone(),
    ));
    tokio::spawn(EventLoop::new(rx, plane).run());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                shutdown.run(None).await;
            }
            Err(e) => tracing::warn!(target: PROGRAM, error = %e, "Ctrl-C handler unavailable"),
        }
    });

    if let Err(e) = client.start().await {
        tracing::error!(
            target: PROGRAM,
            error = %e,
            "Error occurred while connecting the bot."
        );
        reporter.capture("connect", &e);
        return Err(e.into());
    }
    Ok(())
}
