//! Thin process entry point for the vault core.
//!
//! Two things live here, matching §1's split between this crate (the
//! cryptosystem, persistence, and agent protocol) and the interactive CLI
//! surface (an external collaborator, not reproduced in this repo):
//!
//! - `--agent`: runs the unlock daemon (`agile_vault::agent::server::Agent`)
//!   against one vault, as a background process a real CLI's client stub
//!   would spawn on demand.
//! - everything else: a minimal direct-library demo of the verbs a full
//!   interactive CLI would dispatch (`new`, `list`, `show`, `add`, `lock`,
//!   `set-password`), enough to exercise the vault core end to end without
//!   reimplementing argument parsing, templated prompts, or clipboard
//!   integration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use agile_vault::agent::client::AgentClient;
use agile_vault::agent::server::Agent;
use agile_vault::model::ItemContent;
use agile_vault::vault_api::VaultApi;
use agile_vault::vault_store;
use agile_vault::VaultError;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut agent_mode = false;
    let mut vault_path: Option<PathBuf> = None;
    let mut rest = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-agent" | "--agent" => agent_mode = true,
            "-vault" | "--vault" => {
                vault_path = iter.next().map(PathBuf::from);
            }
            other => rest.push(other.to_string()),
        }
    }

    if agent_mode {
        return run_agent(vault_path);
    }

    match run_cli(vault_path, rest) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_agent(vault_path: Option<PathBuf>) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(path) = vault_path else {
        eprintln!("--agent requires -vault <path>");
        return ExitCode::FAILURE;
    };

    let agent = Agent::open(path, Duration::from_secs(600));
    match agent.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "agent exited with an io error");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(vault_path: Option<PathBuf>, args: Vec<String>) -> Result<(), VaultError> {
    let verb = args.first().cloned().unwrap_or_default();

    if verb == "new" {
        let path = vault_path.ok_or_else(|| {
            VaultError::NotFound("-vault <path> is required".into())
        })?;
        let password = rpassword::prompt_password("Master password: ")
            .map_err(|e| VaultError::IoError(e.to_string()))?;
        let confirm = rpassword::prompt_password("Confirm: ")
            .map_err(|e| VaultError::IoError(e.to_string()))?;
        if password != confirm {
            return Err(VaultError::DecryptError("passwords did not match".into()));
        }
        vault_store::create_vault(&path, &password)?;
        println!("created vault at {}", path.display());
        return Ok(());
    }

    let path = vault_path.ok_or_else(|| VaultError::NotFound("-vault <path> is required".into()))?;
    let client = AgentClient::connect(&path)?;

    if verb == "lock" {
        client.lock()?;
        println!("vault locked");
        return Ok(());
    }

    if client.is_locked()? {
        let password = rpassword::prompt_password("Master password: ")
            .map_err(|e| VaultError::IoError(e.to_string()))?;
        client.unlock(&password)?;
    }
    client.refresh_access()?;

    let store = vault_store::open_vault(&path)?;
    let mut api = VaultApi::new(store, client);

    match verb.as_str() {
        "list" => {
            for item in api.list_items() {
                println!("{}  {:32}  {}", item.uuid, item.type_name, item.title);
            }
        }
        "show" => {
            let pattern = args.get(1).ok_or_else(|| {
                VaultError::NotFound("show requires a pattern argument".into())
            })?;
            let view = api.lookup_unique(pattern)?;
            let content = api.load_content(&view.uuid)?;
            println!("{}", serde_json::to_string_pretty(&content)?);
        }
        "add" => {
            let title = args
                .get(1)
                .ok_or_else(|| VaultError::NotFound("add requires a title argument".into()))?;
            let type_name = args.get(2).map(String::as_str).unwrap_or("webforms.WebForm");
            let item = api.add_item(title, type_name, &ItemContent::default())?;
            println!("added {}", item.uuid);
        }
        "set-password" => {
            let old = rpassword::prompt_password("Current master password: ")
                .map_err(|e| VaultError::IoError(e.to_string()))?;
            let new = rpassword::prompt_password("New master password: ")
                .map_err(|e| VaultError::IoError(e.to_string()))?;
            api.set_master_password(&old, &new, agile_vault::keystore::DEFAULT_ITERATIONS)?;
            println!("master password changed");
        }
        other => {
            eprintln!("unknown command: {other}");
            eprintln!("usage: agile-vault [-vault <path>] {{new|list|show <pattern>|add <title> [type]|lock|set-password}}");
            eprintln!("       agile-vault --agent -vault <path>");
        }
    }

    Ok(())
}
