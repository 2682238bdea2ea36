//! # stokerctl CLI
//!
//! Command-line interface for the `GatewaySync` control plane.
//!
//! Similar to `fluxctl`, this tool only ever talks to the Kubernetes API
//! server: it never contacts a gateway or a Git remote directly. Triggering
//! a resync is an annotation write the reconciler's watch picks up on its
//! own (§4.4 "Annotation-driven fast path"), not an RPC.
//!
//! ## Usage
//!
//! ```bash
//! # Trigger an immediate resolve+resync for a GatewaySync record
//! stokerctl sync --namespace scada --name plant-floor-a
//!
//! # List all GatewaySync records
//! stokerctl list
//!
//! # Show status of a GatewaySync record, including per-gateway entries
//! stokerctl status --namespace scada --name plant-floor-a
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;

use stoker::annotations;
use stoker::controller::reconcile::status_aggregation::{read_status_document, status_configmap_name};
use stoker::crd::{GatewaySync, StatusDocument};

/// `GatewaySync` control plane CLI
#[derive(Parser)]
#[command(name = "stokerctl")]
#[command(about = "Trigger resyncs and inspect GatewaySync records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to current context namespace)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Request an immediate ref re-resolve and resync for a GatewaySync record
    Sync {
        /// Name of the GatewaySync record
        #[arg(short, long)]
        name: String,

        /// Ref to resolve instead of spec.gitSource.ref (branch, tag, or commit)
        #[arg(short, long)]
        r#ref: Option<String>,
    },
    /// List GatewaySync records
    List {
        /// Namespace to list records in (defaults to all namespaces)
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Show status of a GatewaySync record, including per-gateway entries
    Status {
        /// Name of the GatewaySync record
        #[arg(short, long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stokerctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client; is KUBECONFIG configured?")?;

    match cli.command {
        Commands::Sync { name, r#ref } => sync_command(client, name, cli.namespace, r#ref).await,
        Commands::List { namespace } => list_command(client, namespace.or(cli.namespace)).await,
        Commands::Status { name } => status_command(client, name, cli.namespace).await,
    }
}

/// Writes the `requested-ref` annotation the reconciler's fast path watches
/// for (§4.4). Defaults to the record's own configured ref, so a plain
/// `stokerctl sync` just means "resolve and sync now" without changing
/// which ref is tracked.
async fn sync_command(
    client: Client,
    name: String,
    namespace: Option<String>,
    r#ref: Option<String>,
) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<GatewaySync> = Api::namespaced(client, ns);

    let record = api
        .get(&name)
        .await
        .with_context(|| format!("failed to get GatewaySync '{ns}/{name}'"))?;

    let requested_ref = r#ref.unwrap_or_else(|| record.spec.git_source.r#ref.clone());
    let now = chrono::Utc::now().to_rfc3339();

    let patch = json!({
        "metadata": {
            "annotations": {
                annotations::RECORD_REQUESTED_REF: requested_ref,
                annotations::RECORD_REQUESTED_REF_INSTANT: now,
                annotations::RECORD_REQUESTED_REF_SOURCE: "stokerctl",
            }
        }
    });

    api.patch(&name, &PatchParams::apply("stokerctl").force(), &Patch::Merge(patch))
        .await
        .with_context(|| format!("failed to annotate GatewaySync '{ns}/{name}'"))?;

    println!("resync requested for {ns}/{name}");
    println!("the reconciler will resolve the ref and republish metadata shortly");
    Ok(())
}

/// Lists every `GatewaySync` record, reduced to a fast skim of readiness.
async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<GatewaySync> = if let Some(ns) = namespace {
        Api::namespaced(client, &ns)
    } else {
        Api::all(client)
    };

    let records = api
        .list(&ListParams::default())
        .await
        .context("failed to list GatewaySync records")?;

    if records.items.is_empty() {
        println!("No GatewaySync records found.");
        return Ok(());
    }

    println!("{:<30} {:<20} {:<10} {:<15}", "NAME", "NAMESPACE", "READY", "COMMIT");
    println!("{}", "-".repeat(80));

    for record in records.items {
        let name = record.metadata.name.as_deref().unwrap_or("<unknown>");
        let ns = record.metadata.namespace.as_deref().unwrap_or("<unknown>");
        let ready = record
            .status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == "Ready"))
            .map(|c| c.status.as_str())
            .unwrap_or("Unknown");
        let commit = record
            .status
            .as_ref()
            .and_then(|s| s.last_sync_commit.as_deref())
            .map(|c| c.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string());

        println!("{name:<30} {ns:<20} {ready:<10} {commit:<15}");
    }

    Ok(())
}

/// Shows a record's conditions plus its per-gateway status-document
/// entries, reading the status `ConfigMap` the same way the reconciler
/// does (§4.4 step 6).
async fn status_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<GatewaySync> = Api::namespaced(client.clone(), ns);

    let record = api
        .get(&name)
        .await
        .with_context(|| format!("failed to get GatewaySync '{ns}/{name}'"))?;

    println!("GatewaySync '{ns}/{name}'\n");
    println!("Spec:");
    println!("  Repo: {}", record.spec.git_source.repo_url);
    println!("  Ref: {}", record.spec.git_source.r#ref);
    println!("  Profiles: {}", record.spec.profiles.keys().cloned().collect::<Vec<_>>().join(", "));
    println!("  Paused: {}", record.spec.paused);

    if let Some(status) = &record.status {
        println!("\nStatus:");
        println!("  Ref resolution: {:?}", status.ref_resolution_status);
        if let Some(commit) = &status.last_sync_commit {
            println!("  Last resolved commit: {commit}");
        }
        if let Some(time) = &status.last_reconcile_time {
            println!("  Last reconcile: {time}");
        }

        if !status.conditions.is_empty() {
            println!("\nConditions:");
            for condition in &status.conditions {
                println!("  {}: {}", condition.r#type, condition.status);
                if let Some(reason) = &condition.reason {
                    println!("    Reason: {reason}");
                }
                if let Some(message) = &condition.message {
                    println!("    Message: {message}");
                }
            }
        }

        if !status.discovered_gateways.is_empty() {
            println!("\nDiscovered gateways:");
            for gw in &status.discovered_gateways {
                println!(
                    "  {} (profile={}, adjunct={}, state={})",
                    gw.gateway_name,
                    gw.profile,
                    gw.has_adjunct,
                    gw.sync_state.as_deref().unwrap_or("unknown")
                );
            }
        }
    } else {
        println!("\nStatus: not yet reconciled");
    }

    let status_cm_name = status_configmap_name(&name);
    let doc: StatusDocument = read_status_document(client, ns, &status_cm_name)
        .await
        .context("failed to read status document")?;

    if doc.is_empty() {
        println!("\n(no status document published yet)");
    } else {
        print_status_document(&doc);
    }

    Ok(())
}

fn print_status_document(doc: &StatusDocument) {
    println!("\nPer-gateway sync status:");
    for (gateway, entry) in doc {
        println!(
            "  {gateway}: {:?} commit={} lastSync={}",
            entry.sync_state,
            entry.synced_commit.as_deref().unwrap_or("-"),
            entry.last_sync_instant.as_deref().unwrap_or("-")
        );
        if let Some(err) = &entry.error_message {
            println!("    error: {err}");
        }
    }
}
