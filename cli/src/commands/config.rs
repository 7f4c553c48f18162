// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `policy-host config` - show the configuration resolved from the environment

use anyhow::{Context, Result};
use colored::Colorize;

use policy_host_core::config::{ConfigError, HostConfig};

pub fn execute() -> Result<()> {
    match HostConfig::from_env() {
        Ok(config) => {
            print!("{}", render(&config));
            Ok(())
        }
        Err(ConfigError::Missing(keys)) => {
            eprintln!("{}", "Missing required environment variables:".red().bold());
            for key in &keys {
                eprintln!("  - {}", key);
            }
            Err(ConfigError::Missing(keys)).context("Incomplete host configuration")
        }
        Err(e) => Err(e).context("Invalid host configuration"),
    }
}

fn render(config: &HostConfig) -> String {
    let not_set = || "(not set)".dimmed().to_string();
    let optional = |value: Option<String>| value.unwrap_or_else(not_set);

    let mut out = String::new();
    out.push_str(&format!("{}\n\n", "Current configuration:".bold()));

    out.push_str(&format!("{}\n", "Policies:".bold()));
    out.push_str(&format!("  Storage: {}\n", config.policy_storage));
    out.push_str(&format!(
        "  Reconcile interval: {}s\n",
        config.reconcile_interval.as_secs()
    ));
    out.push_str(&format!(
        "  Alias overrides: {}\n",
        optional(config.aliases_file.as_ref().map(|p| p.display().to_string()))
    ));
    out.push('\n');

    out.push_str(&format!("{}\n", "Event queue:".bold()));
    out.push_str(&format!("  Name: {}\n", config.queue_name));
    out.push_str(&format!(
        "  Storage account: {} (resource group {}, subscription {})\n",
        config.queue_storage.account_name,
        config.queue_storage.resource_group,
        config.queue_storage.subscription_id
    ));
    out.push_str(&format!("  Poll interval: {}s\n", config.poll_interval.as_secs()));
    out.push_str(&format!("  Max batch size: {}\n", config.max_batch_size));
    out.push_str(&format!("  Poison threshold: {}\n", config.poison_threshold));
    out.push('\n');

    out.push_str(&format!("{}\n", "Runner:".bold()));
    out.push_str(&format!("  Command: {}\n", config.runner_command));
    out.push_str(&format!("  Run timeout: {}s\n", config.run_timeout.as_secs()));
    out.push_str(&format!(
        "  Output dir: {}\n",
        config
            .output_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(temporary directory)".dimmed().to_string())
    ));
    out.push_str(&format!("  Log group: {}\n", optional(config.log_group.clone())));
    out.push_str(&format!("  Metrics: {}\n", optional(config.metrics.clone())));
    out.push('\n');

    let credentials = if config.access_token.is_some() {
        "static access token".to_string()
    } else {
        "managed identity".to_string()
    };
    out.push_str(&format!("{} {}\n", "Credentials:".bold(), credentials));

    out
}
