//! Nessus Agent Deployer - Entry Point
//!
//! Web front-end that runs the Nessus agent playbook against operator-supplied
//! hosts, streams its output and keeps a history of every run.

use std::collections::HashMap;
use std::env;

use nessus_deployer::app::options::AppOptions;
use nessus_deployer::app::run::run;
use nessus_deployer::errors::DeployerError;
use nessus_deployer::logs::{init_logging, LogOptions};
use nessus_deployer::secrets::cipher::SecretKey;
use nessus_deployer::storage::layout::StorageLayout;
use nessus_deployer::storage::settings::Settings;
use nessus_deployer::utils::version_info;

use tokio::io::BufReader;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    let layout = match cli_args.get("home") {
        Some(home) => StorageLayout::new(home),
        None => StorageLayout::default(),
    };

    // Key management
    if cli_args.contains_key("generate-key") {
        exit_on_error(generate_key(&layout).await);
        return;
    }
    if cli_args.contains_key("encrypt") {
        exit_on_error(encrypt_stdin(&layout).await);
        return;
    }

    // Run the deployer starting here

    let settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout, &settings);

    info!(
        "Running Nessus agent deployer {} ({}) with options: {:?}",
        version.version, version.git_hash, options
    );
    if let Err(e) = run(options, settings, await_shutdown_signal()).await {
        error!("Failed to run the deployer: {e}");
        std::process::exit(1);
    }
}

fn exit_on_error(result: Result<(), DeployerError>) {
    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

/// Write a fresh key file; an existing key is never replaced
async fn generate_key(layout: &StorageLayout) -> Result<(), DeployerError> {
    let key_file = layout.key_file();
    if key_file.exists().await {
        return Err(DeployerError::ConfigError(format!(
            "Refusing to overwrite existing key file '{}'",
            key_file.path().display()
        )));
    }

    key_file
        .create_secret(&format!("{}\n", SecretKey::generate_encoded()))
        .await?;
    println!("Wrote new secret key to {}", key_file.path().display());
    Ok(())
}

/// Encrypt one line of stdin under the current key
async fn encrypt_stdin(layout: &StorageLayout) -> Result<(), DeployerError> {
    let key = SecretKey::load(&layout.key_file()).await?;

    let sealed = key
        .encrypt_line(&mut BufReader::new(tokio::io::stdin()))
        .await?;
    println!("{}", sealed.as_str());
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
