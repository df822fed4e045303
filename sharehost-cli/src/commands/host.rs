//! `sharehost host`: distribution detection and the package commands it implies.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use sharehost_core::registry;
use sharehost_detector::{detect_distro_at, HostDistro};

/// Arguments for `sharehost host`.
#[derive(Args, Debug)]
pub struct HostArgs {
    /// Filesystem root holding `etc/os-release`.
    #[arg(long, default_value = "/")]
    pub root: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct HostReport {
    distro: HostDistro,
    install_commands: Vec<InstallCommand>,
}

#[derive(Serialize)]
struct InstallCommand {
    protocol: &'static str,
    command: String,
}

impl HostArgs {
    pub fn run(self) -> Result<()> {
        let distro = detect_distro_at(&self.root)
            .with_context(|| format!("could not detect the distribution under {}", self.root.display()))?;

        let install_commands: Vec<InstallCommand> = registry::list_all()
            .iter()
            .filter(|d| !d.packages.is_empty())
            .map(|d| {
                let line = distro.package_manager.install(d.packages);
                InstallCommand {
                    protocol: d.name,
                    command: format!("{} {}", line.program, line.args.join(" ")),
                }
            })
            .collect();

        if self.json {
            return super::print_json(&HostReport {
                distro,
                install_commands,
            });
        }

        println!(
            "{} {}",
            distro.id.bold(),
            distro.version_id.as_deref().unwrap_or("")
        );
        if !distro.id_like.is_empty() {
            println!("  like:            {}", distro.id_like.join(" "));
        }
        println!("  package manager: {}", distro.package_manager);
        for cmd in install_commands {
            println!("  {:<16} {}", format!("{}:", cmd.protocol), cmd.command.bright_black());
        }
        Ok(())
    }
}
