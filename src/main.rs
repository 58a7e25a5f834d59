use clap::Parser;
use kube::Client;
use warden::cli::{Cli, Commands, RulesAction};
use warden::commands::{check, rules, serve};
use warden::config::AppConfig;
use warden::dispatch::Dispatcher;
use warden::observability::{init_tracing, Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(std::path::Path::new(&cli.config)).unwrap_or_default();

    init_tracing(config.json_logs);

    match cli.command {
        Commands::Serve { addr } => {
            let client = Client::try_default().await?;
            let registries = rules::build_registries(client, &config).await?;
            let rule_set = rules::load_ruleset(&config.rules_path, &registries)?;
            let metrics = Metrics::new();
            let default_action_timeout = if config.action_timeout_seconds > 0 {
                Some(std::time::Duration::from_secs(config.action_timeout_seconds))
            } else {
                None
            };
            let dispatcher = Dispatcher::new(
                std::sync::Arc::new(rule_set),
                std::sync::Arc::new(registries.actionners),
                std::sync::Arc::new(registries.outputs),
                std::sync::Arc::new(registries.notifiers),
                std::sync::Arc::new(registries.context_providers),
                std::sync::Arc::new(metrics.clone()),
            )
            .with_default_action_timeout(default_action_timeout);
            let listen_address = addr.unwrap_or(config.listen_address.clone());
            serve::serve(&listen_address, dispatcher, metrics).await?;
        }
        Commands::Check => check::run(&config).await?,
        Commands::Rules { action } => match action {
            RulesAction::Validate { path } => rules::validate(&config, path).await?,
            RulesAction::Print { path } => rules::print(&config, path).await?,
        },
    }

    Ok(())
}
