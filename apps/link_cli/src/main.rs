use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use flow_client::{
    AuthFlowDataManager, HttpFinancialConnectionsApi, InstitutionSearch, SearchOptions,
};
use shared::domain::Institution;
use tokio::{
    io::{stdin, AsyncBufReadExt, BufReader},
    sync::RwLock,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod presenter;

use commands::{parse_command, UserCommand, HELP};
use config::load_settings;
use presenter::{print_flow_events, print_search_events, KnownInstitutions};

#[derive(Parser, Debug)]
#[command(about = "Link a bank account from the terminal")]
struct Args {
    #[arg(long, default_value = "link_cli.toml")]
    config: PathBuf,
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    client_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(v) = args.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = args.client_secret {
        settings.client_secret = Some(v);
    }
    let client_secret = settings
        .client_secret
        .clone()
        .context("a client secret is required (--client-secret or APP__CLIENT_SECRET)")?;

    let api = Arc::new(
        HttpFinancialConnectionsApi::new(&settings.api_base_url, settings.request_timeout())
            .with_context(|| format!("invalid api base url '{}'", settings.api_base_url))?,
    );
    let manifest = api
        .synchronize(&client_secret)
        .await
        .context("failed to synchronize the session manifest")?;
    info!(
        manifest_id = %manifest.id,
        next_pane = %manifest.next_pane,
        base_url = %api.base_url(),
        "session synchronized"
    );

    let options = SearchOptions::from_manifest(&manifest);
    let flow = AuthFlowDataManager::spawn(manifest, api.clone(), client_secret.clone());
    let search = InstitutionSearch::spawn(api, client_secret, options);
    let known: KnownInstitutions = Arc::new(RwLock::new(HashMap::new()));

    let flow_printer = tokio::spawn(print_flow_events(flow.subscribe_events()));
    let search_printer = tokio::spawn(print_search_events(search.subscribe_events(), known.clone()));

    println!("current pane: {}", flow.current_step());
    println!("{HELP}");
    search.load_featured()?;

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(commands::CommandParseError::Empty) => continue,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };

        match command {
            UserCommand::Consent => flow.accept_consent()?,
            UserCommand::Search(query) => {
                if !options.search_enabled {
                    println!("institution search is disabled for this session");
                }
                search.on_text_changed(query)?;
            }
            UserCommand::Pick(id) => {
                let institution = known
                    .read()
                    .await
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| Institution {
                        name: id.to_string(),
                        id,
                        url: None,
                    });
                println!("picking {}", institution.name);
                search.on_text_changed(String::new())?;
                flow.select_institution(institution)?;
            }
            UserCommand::Featured => search.load_featured()?,
            UserCommand::ManualEntry => {
                if !flow.manifest().allow_manual_entry {
                    println!("manual entry is not available for this session");
                }
                flow.choose_manual_entry()?;
            }
            UserCommand::Status => {
                let step = flow.versioned_step();
                println!("current pane: {} (v{})", step.pane, step.version);
            }
            UserCommand::Help => println!("{HELP}"),
            UserCommand::Quit => break,
        }
    }

    flow.shutdown();
    search.shutdown();
    // Printers end once both components have stopped and their queues drained.
    let _ = tokio::join!(flow_printer, search_printer);
    Ok(())
}
