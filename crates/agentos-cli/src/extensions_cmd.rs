//! `agentos extensions` subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use colored::Colorize;

use agentos_capability::response_store::ResponseStore;
use agentos_capability::runner::CapabilityRunner;
use agentos_core::config::KernelConfig;
use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::store::{Db, TaskAuditStore};
use agentos_core::utils::{expand_home, get_data_path};
use agentos_extensions::{ExtensionHost, ExtensionStore, InstallEngine};

#[derive(Subcommand)]
pub enum ExtensionsCommands {
    /// List installed extensions
    List,

    /// Install an extension from a local package zip
    Install {
        /// Path to the package zip
        path: PathBuf,
    },

    /// Download and install an extension package
    InstallUrl {
        /// HTTPS URL of the package zip
        url: String,
        /// Expected sha256 of the package
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Enable an installed extension
    Enable { id: String },

    /// Disable an extension
    Disable { id: String },

    /// Uninstall an extension (runs its uninstall plan)
    Uninstall { id: String },

    /// Show one extension in detail
    Show { id: String },
}

fn build_host(config: &KernelConfig) -> KernelResult<ExtensionHost> {
    let db = Db::open(&expand_home(&config.store.path))?;
    db.migrate()?;
    let data_dir = get_data_path();
    Ok(ExtensionHost::new(
        ExtensionStore::new(db.clone()),
        Arc::new(InstallEngine::new(config.install.max_download_mib)),
        Arc::new(CapabilityRunner::new(
            data_dir.clone(),
            Arc::new(ResponseStore::new()),
            TaskAuditStore::new(db),
        )),
        data_dir,
    ))
}

pub async fn run(config: &KernelConfig, action: ExtensionsCommands) -> KernelResult<()> {
    let host = build_host(config)?;
    match action {
        ExtensionsCommands::List => list(&host),
        ExtensionsCommands::Install { path } => install(&host, &path, None, None).await,
        ExtensionsCommands::InstallUrl { url, sha256 } => {
            let package = download_package(&url).await?;
            install(&host, &package, Some(&url), sha256.as_deref()).await
        }
        ExtensionsCommands::Enable { id } => {
            host.store().set_enabled(&id, true)?;
            println!("{} {id}", "enabled".green());
            Ok(())
        }
        ExtensionsCommands::Disable { id } => {
            host.store().set_enabled(&id, false)?;
            println!("{} {id}", "disabled".yellow());
            Ok(())
        }
        ExtensionsCommands::Uninstall { id } => {
            let outcome = host.uninstall(&id).await?;
            if outcome.success {
                println!("{} {id}", "uninstalled".green());
                Ok(())
            } else {
                Err(KernelError::new(
                    outcome.error_code.unwrap_or(ErrorCode::Unknown),
                    format!(
                        "uninstall failed at step {}",
                        outcome.failed_step.as_deref().unwrap_or("-")
                    ),
                ))
            }
        }
        ExtensionsCommands::Show { id } => show(&host, &id),
    }
}

fn list(host: &ExtensionHost) -> KernelResult<()> {
    let records = host.store().list()?;
    if records.is_empty() {
        println!("no extensions installed");
        return Ok(());
    }
    for record in records {
        let status = format!("{:?}", record.status).to_uppercase();
        let marker = if record.enabled {
            "●".green()
        } else {
            "○".dimmed()
        };
        println!(
            "{marker} {} {} [{status}] — {}",
            record.manifest.id.bold(),
            record.manifest.version,
            record.manifest.description
        );
    }
    Ok(())
}

async fn install(
    host: &ExtensionHost,
    path: &std::path::Path,
    source_url: Option<&str>,
    sha256: Option<&str>,
) -> KernelResult<()> {
    let (extension_id, outcome) = host.install_package(path, source_url, sha256).await?;
    if outcome.success {
        println!("{} {extension_id} (progress {}%)", "installed".green(), outcome.progress);
        println!("enable it with: agentos extensions enable {extension_id}");
        Ok(())
    } else {
        Err(KernelError::new(
            outcome.error_code.unwrap_or(ErrorCode::Unknown),
            format!(
                "install failed at step {} ({}%)",
                outcome.failed_step.as_deref().unwrap_or("-"),
                outcome.progress
            ),
        ))
    }
}

async fn download_package(url: &str) -> KernelResult<PathBuf> {
    if !url.starts_with("https://") {
        return Err(KernelError::new(
            ErrorCode::DownloadFailed,
            "package downloads must use https",
        ));
    }
    let response = reqwest::get(url)
        .await
        .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;
    if !response.status().is_success() {
        return Err(KernelError::new(
            ErrorCode::DownloadFailed,
            format!("download returned {}", response.status()),
        ));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;

    let dir = get_data_path().join("downloads");
    std::fs::create_dir_all(&dir)
        .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
    let path = dir.join(format!(
        "{}.zip",
        agentos_core::utils::sha256_hex(url.as_bytes())
    ));
    std::fs::write(&path, &bytes)
        .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
    Ok(path)
}

fn show(host: &ExtensionHost, id: &str) -> KernelResult<()> {
    let record = host.store().get(id)?.ok_or_else(|| {
        KernelError::new(ErrorCode::ConfigInvalid, format!("unknown extension {id}"))
    })?;

    println!("{}", record.manifest.id.bold());
    println!("  name:        {}", record.manifest.name);
    println!("  version:     {}", record.manifest.version);
    println!("  status:      {:?}", record.status);
    println!("  enabled:     {}", record.enabled);
    if let Some(sha) = &record.sha256 {
        println!("  sha256:      {sha}");
    }
    if let Some(url) = &record.source_url {
        println!("  source:      {url}");
    }
    println!(
        "  permissions: {}",
        record
            .manifest
            .permission_names()
            .join(", ")
    );
    println!("  capabilities:");
    for capability in &record.manifest.capabilities {
        println!(
            "    {} ({:?}, runner {})",
            capability.command, capability.kind, capability.runner
        );
    }
    Ok(())
}
