pub mod cli;
pub mod commands;
pub mod config;
pub mod license;
pub mod secure_store;
pub mod state;
pub mod state_machine;
pub mod utils;

#[cfg(test)]
mod tests;

use cli::{Cli, Command};
use commands::license as license_commands;
use config::LicenseConfig;
use license::{machine_hash, EntitlementEvent};
use state::app_state::AppState;

pub use license::{EntitlementStateMachine, LicenseError, LicenseResult};
pub use state_machine::EntitlementState;

/// Initializes `env_logger`. Later calls are ignored.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}

pub async fn run(cli: Cli) -> Result<(), String> {
    init_logging(cli.verbose);

    let mut config = LicenseConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(url) = cli.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    log::info!("Using license store in {}", config.data_dir.display());

    let state = AppState::new(config).map_err(|e| e.to_string())?;

    match cli.command {
        Command::Machine => {
            let info = license_commands::get_machine_info(&state);
            println!("Machine id:    {}", info.machine_id);
            println!("Computer name: {}", info.computer_name);
            println!("Code hash:     {}", machine_hash(&info.machine_id));
        }
        Command::Status => print_status(&state)?,
        Command::Activate { code } => {
            license_commands::activate_license(&state, code).await?;
            print_status(&state)?;
        }
        Command::Reset => {
            license_commands::delete_activation(&state)?;
            println!("Activation removed");
        }
        Command::Watch => watch(&state).await?,
    }
    Ok(())
}

fn print_status(state: &AppState) -> Result<(), String> {
    let status = license_commands::check_license_status(state);
    let json = serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

async fn watch(state: &AppState) -> Result<(), String> {
    if !license_commands::is_entitled(state) {
        return Err("This machine is not activated".to_string());
    }

    let mut events = state.entitlement.subscribe();
    state.start_background_tasks();
    println!("Watching license; press Ctrl-C to stop");

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    let message = match &event {
                        EntitlementEvent::TrialExpired => "Trial has expired".to_string(),
                        EntitlementEvent::Revoked { message } => format!("License revoked: {}", message),
                        EntitlementEvent::Locked => "System clock manipulation detected".to_string(),
                    };
                    println!("{}", message);
                    break Err(format!("{}; please activate again", message));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Missed {} license events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break Ok(()),
            },
        }
    };

    state.stop_background_tasks().await;
    outcome
}
