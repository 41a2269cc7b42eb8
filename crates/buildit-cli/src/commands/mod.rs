//! CLI command implementations.

pub mod run;

use anyhow::Result;
use buildit_config::{FailureKind, WorkerConfig};
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    match WorkerConfig::load(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  interactive: {}", config.interactive);
            println!("  update-in-place: {}", config.update_in_place);
            for rule in &config.failure_rules {
                let kind = match rule.kind {
                    FailureKind::Auth => "auth",
                    FailureKind::Git => "git",
                };
                println!(
                    "  git-failure {:?} within={} kind={}",
                    rule.pattern, rule.within, kind
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
