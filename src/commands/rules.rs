//! Builds the plugin registries and loads the configured rule file, shared
//! by the `check`, `rules validate`, and `rules print` subcommands and by
//! `serve`'s startup path.

use kube::Client;

use crate::actionners::aws::LambdaActionner;
use crate::actionners::calico::NetworkPolicyActionner;
use crate::actionners::kubernetes::DrainActionner;
use crate::config::AppConfig;
use crate::context_providers::InstanceMetadataProvider;
use crate::notify::{LokiNotifier, StdoutNotifier};
use crate::output::WebhookOutput;
use crate::registry::{
    ActionnerRegistry, ActionnerRegistryBuilder, ContextProviderRegistry, ContextProviderRegistryBuilder,
    NotifierRegistry, NotifierRegistryBuilder, OutputRegistry, OutputRegistryBuilder,
};
use crate::rule::RuleSet;
use crate::ruleset::load_rules_from_file;

pub struct Registries {
    pub actionners: ActionnerRegistry,
    pub outputs: OutputRegistry,
    pub notifiers: NotifierRegistry,
    pub context_providers: ContextProviderRegistry,
}

pub async fn build_registries(client: Client, config: &AppConfig) -> anyhow::Result<Registries> {
    let mut actionner_builder = ActionnerRegistryBuilder::new();
    actionner_builder.register(std::sync::Arc::new(DrainActionner::new(client.clone())))?;
    actionner_builder.register(std::sync::Arc::new(NetworkPolicyActionner::new(client.clone())))?;
    actionner_builder.register(std::sync::Arc::new(LambdaActionner::from_env().await))?;

    let mut output_builder = OutputRegistryBuilder::new();
    output_builder.register(std::sync::Arc::new(WebhookOutput::new()))?;

    let mut notifier_builder = NotifierRegistryBuilder::new();
    notifier_builder.register(std::sync::Arc::new(StdoutNotifier))?;
    if let Some(loki_url) = std::env::var("WARDEN_LOKI_URL").ok() {
        notifier_builder.register(std::sync::Arc::new(LokiNotifier::new(crate::notify::loki::LokiSettings {
            url: loki_url,
            tenant_id: std::env::var("WARDEN_LOKI_TENANT_ID").ok(),
        })))?;
    }

    let mut context_builder = ContextProviderRegistryBuilder::new();
    if config.aws_context_enabled {
        context_builder.register(std::sync::Arc::new(InstanceMetadataProvider::new()))?;
    }

    Ok(Registries {
        actionners: actionner_builder.freeze(),
        outputs: output_builder.freeze(),
        notifiers: notifier_builder.freeze(),
        context_providers: context_builder.freeze(),
    })
}

pub fn load_ruleset(path: &str, registries: &Registries) -> anyhow::Result<RuleSet> {
    load_rules_from_file(
        std::path::Path::new(path),
        &registries.actionners,
        &registries.outputs,
        &registries.notifiers,
    )
}

pub async fn validate(config: &AppConfig, path: Option<String>) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let registries = build_registries(client, config).await?;
    let path = path.unwrap_or_else(|| config.rules_path.clone());
    let rule_set = load_ruleset(&path, &registries)?;
    println!("{}: {} rule(s) validated", path, rule_set.len());
    for rule in rule_set.iter() {
        println!("  - {}", rule.name());
    }
    Ok(())
}

pub async fn print(config: &AppConfig, path: Option<String>) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let registries = build_registries(client, config).await?;
    let path = path.unwrap_or_else(|| config.rules_path.clone());
    let rule_set = load_ruleset(&path, &registries)?;
    for rule in rule_set.iter() {
        println!("{}: {}", rule.name(), rule.predicate.source().unwrap_or("<no expression>"));
    }
    Ok(())
}
