use std::process;

use clap::Parser;
use credential_broker::{BrokerConfig, telemetry};

#[derive(Parser)]
struct BrokerArgs {
    /// Override bind address (falls back to BROKER_BIND_ADDRESS)
    #[arg(long)]
    bind: Option<String>,
    /// Verbose startup output
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("broker exited with error: {err:#}");
        process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    let args = BrokerArgs::parse();
    telemetry::init()?;

    let mut config = BrokerConfig::from_env()?;
    if let Some(bind) = args.bind.as_deref() {
        config.bind_addr = bind.parse()?;
    }
    if args.verbose {
        println!(
            "config loaded (bind={}, vault={}, events_sink={}, fallback={})",
            config.bind_addr,
            config.vault_url,
            config.events_sink().is_some(),
            config.audit_fallback_path.display()
        );
    }

    credential_broker::run(config).await
}
