mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use relayvisor::{
    resolve_backend, stop_on_signal, LogWriter, RelayBackendFactory, RelayError, Supervisor,
};

async fn run(cli: Cli) -> Result<(), RelayError> {
    let relay = cli.relay_config();
    relay.validate()?;
    let cfg = cli.supervisor_config()?;

    let kind = resolve_backend(cli.backend);
    tracing::info!(
        backend = %kind,
        choice = %cli.backend,
        source = %relay.source.url,
        sink = %relay.sink.srt_uri(),
        "starting relay"
    );
    let factory = RelayBackendFactory::new(relay, kind, cli.process_options())
        .map_err(RelayError::Startup)?;
    if let Some(spec) = factory.process_spec() {
        tracing::debug!(command = %spec.command_line(), "process backend command");
    }

    let sup = Supervisor::builder(cfg, factory)
        .with_subscribers(vec![Arc::new(LogWriter::new())])
        .build();
    let signals = stop_on_signal(sup.clone());

    let result = sup.start().await;
    signals.abort();

    let snapshot = sup.metrics().await;
    tracing::info!(
        reconnects = snapshot.total_reconnects,
        source_reconnects = snapshot.source_reconnects,
        sink_reconnects = snapshot.sink_reconnects,
        "relay stopped"
    );
    result
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise --verbose picks the default filter.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "relayvisor=debug".to_string()
        } else {
            "relayvisor=info".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to create tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, label = e.as_label(), "relay exited with an error");
            ExitCode::FAILURE
        }
    }
}
