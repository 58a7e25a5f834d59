use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::{Api, Client};

use crate::config::AppConfig;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Running connectivity and rule checks...\n");

    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("cannot load kubeconfig: {e}");
        }
    };

    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {e}");
            return Ok(());
        }
    }

    print!("  List pods permission ........ ");
    let pods: Api<Pod> = Api::all(client.clone());
    match pods.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  List nodes permission ....... ");
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default()).await {
        Ok(list) => println!("OK ({} nodes)", list.items.len()),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  Rule file .................... ");
    match super::rules::build_registries(client.clone(), config).await {
        Ok(registries) => match super::rules::load_ruleset(&config.rules_path, &registries) {
            Ok(rule_set) => println!("OK ({} rules)", rule_set.len()),
            Err(e) => println!("FAIL ({e})"),
        },
        Err(e) => println!("FAIL ({e})"),
    }

    println!("\nAll checks completed.");
    Ok(())
}
