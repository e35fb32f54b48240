use crate::cli::{Cli, Commands, SettingsCommand};
use crate::session::{settings_store, BlockRow, ViewSession};
use anyhow::{anyhow, bail, Context, Result};
use crucible_embed::{PassReport, ViewScope};
use crucible_embed_config::{EmbedSettings, PersistedState, SettingsValidator};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub async fn execute(cli: Cli) -> Result<()> {
    let settings = cli.settings.as_deref();
    match &cli.command {
        Commands::Render { note } => {
            let session = ViewSession::open(&cli.vault, settings, note).await?;
            render(&session, cli.json);
            session.close().await;
        }
        Commands::Blocks { note } => {
            let session = ViewSession::open(&cli.vault, settings, note).await?;
            print_blocks(&session.blocks(), cli.json)?;
            session.close().await;
        }
        Commands::Toggle { note, block } => {
            let session = ViewSession::open(&cli.vault, settings, note).await?;
            let row = session.select(block)?;
            let collapsed = session.plugin.toggle_collapse(&row.identity).await?;
            println!(
                "{} {}",
                if collapsed { "collapsed" } else { "expanded" },
                row.label
            );
            session.close().await;
        }
        Commands::Edit {
            note,
            block,
            content,
            from_file,
        } => {
            let text = match (content, from_file) {
                (Some(text), _) => text.clone(),
                (None, Some(path)) => tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("Pass the new content with --content or --from-file"),
            };
            let session = ViewSession::open(&cli.vault, settings, note).await?;
            edit(&session, block, &text).await?;
            session.close().await;
        }
        Commands::Jump { note, block } => {
            let session = ViewSession::open(&cli.vault, settings, note).await?;
            let row = session.select(block)?;
            session.plugin.jump(&row.identity).await?;
            session.close().await;
        }
        Commands::Reconcile { note } => {
            let session = ViewSession::open(&cli.vault, settings, note).await?;
            reconcile(&session, cli.json).await?;
            session.close().await;
        }
        Commands::Settings { command } => settings_command(command, settings, cli.json).await?,
    }
    Ok(())
}

fn render(session: &ViewSession, json: bool) {
    let blocks = session.blocks();
    if json {
        let value = json!({
            "note": session.path,
            "outline": session.outline(),
            "blocks": blocks,
        });
        println!("{value:#}");
        return;
    }
    print!("{}", session.outline());
    println!();
    println!("{}: {} augmented embed(s)", session.path, blocks.len());
}

fn print_blocks(blocks: &[BlockRow], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(blocks)?);
        return Ok(());
    }
    if blocks.is_empty() {
        println!("No augmented embeds");
        return Ok(());
    }
    for row in blocks {
        println!(
            "{:>3}  {}{} {}  [{}]{}",
            row.index,
            "  ".repeat(row.depth),
            if row.collapsed { "▸" } else { "▾" },
            row.label,
            row.identity,
            if row.file != row.label {
                format!("  {}", row.file)
            } else {
                String::new()
            },
        );
    }
    Ok(())
}

async fn edit(session: &ViewSession, selector: &str, text: &str) -> Result<()> {
    let row = session.select(selector)?;
    let sessions = session.plugin.sessions();
    if !sessions.enter(&row.identity).await? {
        bail!("{} is already being edited through another block", row.file);
    }
    sessions.input(&row.identity, text).await?;
    sessions.save(&row.identity).await?;
    sessions.exit(&row.identity).await?;
    info!(file = %row.file, bytes = text.len(), "Saved embedded note");
    println!("saved {}", row.file);
    Ok(())
}

async fn reconcile(session: &ViewSession, json: bool) -> Result<()> {
    let before = session.blocks().len();
    let signalled = session.plugin.force_reconcile();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let scope = ViewScope {
        root: session.root,
        path: session.path.clone(),
    };
    let report = session.plugin.reconciler().reconcile_view(&scope).await;
    let after = session.blocks().len();

    if json {
        let mut value = report_json(&report);
        value["signalled"] = json!(signalled);
        value["before"] = json!(before);
        value["after"] = json!(after);
        println!("{value:#}");
    } else {
        println!("signalled {signalled} view(s); blocks {before} -> {after}");
        println!(
            "augmented {} unchanged {} skipped {} stripped {} rendered {}",
            report.augmented, report.unchanged, report.skipped, report.stripped, report.rendered
        );
    }
    Ok(())
}

fn report_json(report: &PassReport) -> Value {
    json!({
        "augmented": report.augmented,
        "skipped": report.skipped,
        "stripped": report.stripped,
        "unchanged": report.unchanged,
        "rendered": report.rendered,
        "suppressed": report.suppressed,
    })
}

async fn settings_command(command: &SettingsCommand, path: Option<&Path>, json: bool) -> Result<()> {
    let store = settings_store(path);
    match command {
        SettingsCommand::Show => {
            let state = PersistedState::load_from(store.as_ref()).await;
            if json {
                println!("{:#}", state.to_value()?);
            } else {
                println!("# {}", store.path().display());
                let value = serde_json::to_value(&state.settings)?;
                if let Value::Object(fields) = value {
                    for (key, value) in fields {
                        println!("{key} = {value}");
                    }
                }
                println!("collapsed blocks = {}", state.collapse_states.values().filter(|c| **c).count());
            }
        }
        SettingsCommand::Schema => {
            println!("{}", serde_json::to_string_pretty(&SettingsValidator::schema())?);
        }
        SettingsCommand::Set { assignment } => {
            let mut state = PersistedState::load_from(store.as_ref()).await;
            state.settings = apply_assignment(&state.settings, assignment)?;
            state.save_to(store.as_ref()).await?;
            println!("{assignment}");
        }
        SettingsCommand::ClearCollapsed => {
            let mut state = PersistedState::load_from(store.as_ref()).await;
            let cleared = state.collapse_states.len();
            state.collapse_states.clear();
            state.save_to(store.as_ref()).await?;
            println!("cleared {cleared} collapse flag(s)");
        }
    }
    Ok(())
}

/// Apply `field=value` to `settings`. The value is read as JSON when it
/// parses, otherwise as a string, so `16px`, `true` and `2000` all work.
fn apply_assignment(settings: &EmbedSettings, assignment: &str) -> Result<EmbedSettings> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected field=value, got '{assignment}'"))?;
    let key = key.trim();
    let raw = raw.trim();

    let mut value = serde_json::to_value(settings)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("Settings did not serialize to an object"))?;
    if !fields.contains_key(key) {
        let known: Vec<&str> = fields.keys().map(String::as_str).collect();
        bail!("Unknown setting '{key}' (known: {})", known.join(", "));
    }
    let parsed = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    fields.insert(key.to_string(), parsed);

    let updated: EmbedSettings = serde_json::from_value(value)
        .with_context(|| format!("Invalid value for '{key}': {raw}"))?;
    updated.validate()?;
    Ok(updated)
}
