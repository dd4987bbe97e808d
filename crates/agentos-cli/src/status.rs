//! `agentos status` — configuration and store health at a glance.

use colored::Colorize;

use agentos_channels::ManifestRegistry;
use agentos_core::config::KernelConfig;
use agentos_core::error::KernelResult;
use agentos_core::policy::remote::is_remotely_exposed;
use agentos_core::store::Db;
use agentos_core::utils::expand_home;
use agentos_evolution::DecisionStore;

pub fn run(config: &KernelConfig) -> KernelResult<()> {
    println!("{}", "AgentOS status".bold());

    // Store health.
    let db_path = expand_home(&config.store.path);
    let mut db = None;
    match Db::open(&db_path) {
        Ok(opened) => {
            let version = opened.schema_version()?;
            if version == 0 {
                println!(
                    "  store:     {} {} (run `agentos migrate`)",
                    db_path.display(),
                    "unmigrated".yellow()
                );
            } else {
                println!(
                    "  store:     {} {} (schema v{version})",
                    db_path.display(),
                    "ok".green()
                );
                db = Some(opened);
            }
        }
        Err(e) => println!("  store:     {} ({e})", "unreachable".red()),
    }

    // Channel plane.
    let manifests_dir = expand_home(&config.channels.manifests_dir);
    let registry = ManifestRegistry::load(&manifests_dir);
    let channel_types = registry.list_channels();
    println!(
        "  manifests: {} channel type(s) from {}",
        channel_types.len(),
        manifests_dir.display()
    );
    for id in &channel_types {
        if let Some(manifest) = registry.get_manifest(id) {
            println!("             {} v{} ({})", id.bold(), manifest.version, manifest.name);
        }
    }
    println!(
        "  policy:    default mode {:?}, {} override(s)",
        config.channels.default_policy.mode,
        config.channels.policy_overrides.len()
    );

    // Capability plane.
    println!(
        "  tools:     refresh every {}s, sandbox via {}",
        config.governance.refresh_ttl_seconds, config.sandbox.runtime_bin
    );
    println!(
        "  mcp:       servers file {}",
        expand_home(&config.mcp.servers_file).display()
    );

    // Review queue.
    if let Some(db) = db {
        let pending = DecisionStore::new(db).pending()?;
        if pending.is_empty() {
            println!("  review:    queue empty");
        } else {
            println!(
                "  review:    {} decision(s) awaiting review",
                pending.len().to_string().yellow()
            );
            for decision in pending.iter().take(5) {
                println!(
                    "             {:?} {} ({:?})",
                    decision.action, decision.extension_id, decision.review_level
                );
            }
        }
    }

    // Exposure warning.
    if is_remotely_exposed() {
        println!(
            "  {} this deployment looks remotely exposed; review channel policies",
            "warning:".yellow().bold()
        );
    }
    Ok(())
}
