// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `policy-host validate` - parse policy documents the way the host would
//! and report what it would schedule or subscribe to.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use policy_host_core::infrastructure::policy_loader::load_alias_table;
use policy_host_core::infrastructure::PolicyLoader;
use policy_host_core::policy::PolicyMode;

pub fn execute(files: &[PathBuf], aliases: Option<PathBuf>) -> Result<()> {
    let table = load_alias_table(aliases.as_deref()).context("Failed to load operation aliases")?;
    let loader = PolicyLoader::new(Arc::new(table));

    let mut failed = 0usize;
    for file in files {
        let (report, ok) = check_file(&loader, file);
        print!("{}", report);
        if !ok {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} policy documents failed validation", failed, files.len());
    }

    println!("{}", "All policy documents are valid".green());
    Ok(())
}

/// Human readable report for one document, and whether it loaded cleanly
fn check_file(loader: &PolicyLoader, path: &Path) -> (String, bool) {
    let mut out = format!("{}\n", path.display().to_string().bold());

    let document = match loader.load_file(path) {
        Ok(document) => document,
        Err(e) => {
            out.push_str(&format!("  {} {}\n", "✗".red(), e));
            return (out, false);
        }
    };

    for policy in &document.policies {
        out.push_str(&format!(
            "  {} {} ({}, {})\n",
            "✓".green(),
            policy.name,
            policy.resource,
            policy.mode.label()
        ));
        match &policy.mode {
            PolicyMode::Periodic { schedule } => {
                out.push_str(&format!("      schedule: {}\n", schedule));
            }
            PolicyMode::Event { .. } => {
                for operation in policy.operation_strings() {
                    out.push_str(&format!("      operation: {}\n", operation));
                }
            }
        }
    }
    for name in &document.skipped {
        out.push_str(&format!(
            "  {} {} {}\n",
            "-".dimmed(),
            name,
            "(mode not handled by the host)".dimmed()
        ));
    }
    for error in &document.errors {
        out.push_str(&format!("  {} {}\n", "✗".red(), error));
    }

    (out, document.errors.is_empty())
}
