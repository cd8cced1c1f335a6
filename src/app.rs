//! Process wiring: build the shared services, start the poll loop, serve
//! the gateway, and back the maintenance subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::chat::ChatHandler;
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::engine::AutoApprovalEngine;
use crate::fields::FieldCache;
use crate::gateway::{self, AppState};
use crate::llm::{DeepSeekClient, IntentClassifier};
use crate::platform::FeishuClient;
use crate::rules::RuleStore;
use crate::tickets::TicketKind;

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { host, port } => serve(host, port).await,
        Commands::CheckRules { rules } => check_rules(rules),
        Commands::DebugForm { kind } => debug_form(&kind).await,
    }
}

async fn serve(host_override: Option<String>, port_override: Option<u16>) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(host) = host_override {
        config.host = host;
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    // A broken rules file must abort startup, not run with guessed policy.
    let rules = Arc::new(RuleStore::load(config.rules_path.clone())?);
    info!(
        path = %config.rules_path.display(),
        operators = rules.operators().len(),
        "approval rules loaded"
    );

    let platform = Arc::new(FeishuClient::new(&config));
    let fields = Arc::new(FieldCache::new(platform.clone()));
    let classifier: Arc<dyn IntentClassifier> = Arc::new(DeepSeekClient::new(&config));

    let engine = Arc::new(AutoApprovalEngine::new(
        &config,
        platform.clone(),
        rules.clone(),
        fields.clone(),
        classifier.clone(),
    ));
    let poke = engine.poke_handle();
    tokio::spawn(engine.run());

    let chat = Arc::new(ChatHandler::new(
        &config,
        platform.clone(),
        rules.clone(),
        fields,
        classifier,
        poke,
    ));

    let state = AppState {
        chat,
        platform,
        rules,
        verify_token: config.verify_token.as_deref().map(Arc::from),
        debug_token: config.debug_token.as_deref().map(Arc::from),
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "gateway listening");

    axum::serve(listener, gateway::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed");
        return;
    }
    info!("shutdown signal received");
}

/// Validates the rules file and prints the effective per-kind table.
fn check_rules(path_override: Option<PathBuf>) -> Result<()> {
    let path = path_override.unwrap_or_else(Config::default_rules_path);
    let store = RuleStore::load(path.clone())?;
    let snapshot = store.snapshot();

    println!("rules file: {}", path.display());
    let operators = store.operators();
    if operators.is_empty() {
        println!("operators: (none — auto-approval will never run)");
    } else {
        println!("operators: {}", operators.join(", "));
    }
    println!("default enabled: {}", snapshot.default_enabled);
    println!();

    for kind in TicketKind::all() {
        if snapshot.is_excluded(kind) {
            println!("{} ({kind}): excluded", kind.display_name());
            continue;
        }
        let rule = snapshot.rule(kind);
        println!(
            "{} ({kind}): auto_approve={} ai_review={}",
            kind.display_name(),
            rule.auto_approve,
            rule.ai_review
        );
        println!("  approval_code: {}", snapshot.approval_code(kind));
        if let Some(comment) = &rule.pass_comment {
            println!("  pass_comment: {comment}");
        }
    }
    Ok(())
}

/// Fetches an approval definition and prints the widget tree.
async fn debug_form(kind_slug: &str) -> Result<()> {
    let kind: TicketKind = kind_slug.parse().map_err(|_| {
        let known = TicketKind::all()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::anyhow!("unknown ticket type {kind_slug:?} (expected one of: {known})")
    })?;

    let config = Config::from_env()?;
    let platform = FeishuClient::new(&config);
    // A missing rules file is fine here; fall back to the built-in code.
    let code = match RuleStore::load(config.rules_path.clone()) {
        Ok(store) => store.snapshot().approval_code(kind).to_string(),
        Err(_) => kind.approval_code().to_string(),
    };

    let definition = platform.approval_definition(&code).await?;
    println!("{} ({code})", definition.approval_name);
    if definition.is_submit_only() {
        println!("note: free-process definition, API submission is unavailable");
    }
    println!();
    print_widgets(&definition.form_widgets(), 0);
    Ok(())
}

fn print_widgets(widgets: &[Value], indent: usize) {
    for widget in widgets {
        let id = widget["id"].as_str().unwrap_or("-");
        let widget_type = widget["type"].as_str().unwrap_or("-");
        let name = widget["name"]
            .as_str()
            .or_else(|| widget["label"].as_str())
            .or_else(|| widget["text"].as_str())
            .unwrap_or("");
        println!("{}- [{widget_type}] {name} (ID: {id})", "  ".repeat(indent));
        for key in ["children", "widgets", "items", "fields"] {
            if let Some(children) = widget[key].as_array() {
                print_widgets(children, indent + 1);
            }
        }
    }
}
