//! Host distribution detection for `sharehost-detector`.
//!
//! `detect_distro_at(root)` reads `<root>/etc/os-release` (falling back to
//! `<root>/usr/lib/os-release`) and maps the distribution to the package
//! manager the adapters drive. Exact `ID` matches win over `ID_LIKE` matches.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A host package manager and the command lines it is driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pacman,
}

/// A program plus its arguments, ready for a command runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl PackageManager {
    pub fn program(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pacman => "pacman",
        }
    }

    /// Index refresh to run before installing, if the manager needs one.
    pub fn refresh(self) -> Option<CommandLine> {
        match self {
            PackageManager::Apt => Some(CommandLine {
                program: "apt-get",
                args: vec!["update".into()],
            }),
            PackageManager::Pacman => Some(CommandLine {
                program: "pacman",
                args: vec!["-Sy".into(), "--noconfirm".into()],
            }),
            PackageManager::Dnf | PackageManager::Yum => None,
        }
    }

    pub fn install(self, packages: &[&str]) -> CommandLine {
        let mut args: Vec<String> = match self {
            PackageManager::Apt | PackageManager::Dnf | PackageManager::Yum => {
                vec!["install".into(), "-y".into()]
            }
            PackageManager::Pacman => vec!["-S".into(), "--noconfirm".into()],
        };
        args.extend(packages.iter().map(|p| p.to_string()));
        CommandLine {
            program: self.program(),
            args,
        }
    }

    pub fn remove(self, packages: &[&str]) -> CommandLine {
        let mut args: Vec<String> = match self {
            PackageManager::Apt | PackageManager::Dnf | PackageManager::Yum => {
                vec!["remove".into(), "-y".into()]
            }
            PackageManager::Pacman => vec!["-R".into(), "--noconfirm".into()],
        };
        args.extend(packages.iter().map(|p| p.to_string()));
        CommandLine {
            program: self.program(),
            args,
        }
    }

    /// Query that succeeds only when `package` is installed and prints its version.
    pub fn query_version(self, package: &str) -> CommandLine {
        match self {
            PackageManager::Apt => CommandLine {
                program: "dpkg-query",
                args: vec!["-W".into(), "-f=${Version}".into(), package.into()],
            },
            PackageManager::Dnf | PackageManager::Yum => CommandLine {
                program: "rpm",
                args: vec!["-q".into(), "--qf".into(), "%{VERSION}".into(), package.into()],
            },
            PackageManager::Pacman => CommandLine {
                program: "pacman",
                args: vec!["-Q".into(), package.into()],
            },
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// The detected host distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDistro {
    /// `ID` from os-release, lowercased (e.g. `"ubuntu"`).
    pub id: String,
    /// `VERSION_ID`, if present.
    pub version_id: Option<String>,
    /// `ID_LIKE`, split on whitespace.
    pub id_like: Vec<String>,
    pub package_manager: PackageManager,
}

/// Errors from distribution detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no os-release file under {root}")]
    MissingOsRelease { root: PathBuf },

    #[error("unsupported distribution '{id}'; supported: debian/ubuntu (apt), fedora/rhel/rocky/alma/centos (dnf/yum), arch (pacman)")]
    UnsupportedDistribution { id: String },
}

impl DetectError {
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::UnsupportedDistribution { .. } | DetectError::MissingOsRelease { .. } => {
                "UnsupportedDistribution"
            }
            DetectError::Io { .. } => "Io",
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect the distribution of the running host.
pub fn detect_distro() -> Result<HostDistro, DetectError> {
    detect_distro_at(Path::new("/"))
}

/// Detect the distribution of the filesystem tree rooted at `root`.
pub fn detect_distro_at(root: &Path) -> Result<HostDistro, DetectError> {
    let candidates = [
        root.join("etc").join("os-release"),
        root.join("usr").join("lib").join("os-release"),
    ];
    let Some(file) = candidates.iter().find(|p| p.exists()) else {
        return Err(DetectError::MissingOsRelease {
            root: root.to_path_buf(),
        });
    };
    let content = fs::read_to_string(file).map_err(|e| DetectError::Io {
        path: file.clone(),
        source: e,
    })?;
    distro_from_os_release(&content)
}

/// Map parsed os-release content to a distribution.
pub fn distro_from_os_release(content: &str) -> Result<HostDistro, DetectError> {
    let fields = parse_os_release(content);
    let id = fields
        .get("ID")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    let version_id = fields.get("VERSION_ID").cloned();
    let id_like: Vec<String> = fields
        .get("ID_LIKE")
        .map(|s| s.split_whitespace().map(|w| w.to_ascii_lowercase()).collect())
        .unwrap_or_default();

    let package_manager = package_manager_for(&id, version_id.as_deref())
        .or_else(|| {
            id_like
                .iter()
                .find_map(|like| package_manager_for(like, version_id.as_deref()))
        })
        .ok_or_else(|| DetectError::UnsupportedDistribution {
            id: if id.is_empty() { "unknown".into() } else { id.clone() },
        })?;

    Ok(HostDistro {
        id,
        version_id,
        id_like,
        package_manager,
    })
}

/// Parse `KEY=value` lines, stripping matching quotes. Comments and blank
/// lines are ignored.
pub fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), unquote(v.trim()).to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn package_manager_for(id: &str, version_id: Option<&str>) -> Option<PackageManager> {
    let major = version_id
        .and_then(|v| v.split('.').next())
        .and_then(|v| v.parse::<u32>().ok());
    match id {
        "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" => Some(PackageManager::Apt),
        "fedora" | "rocky" | "almalinux" => Some(PackageManager::Dnf),
        // RHEL-family releases before 8 only ship yum.
        "rhel" | "centos" => Some(match major {
            Some(m) if m < 8 => PackageManager::Yum,
            _ => PackageManager::Dnf,
        }),
        "amzn" => Some(match major {
            Some(m) if m >= 2023 => PackageManager::Dnf,
            _ => PackageManager::Yum,
        }),
        "arch" | "manjaro" | "endeavouros" => Some(PackageManager::Pacman),
        _ => None,
    }
}

fn unquote(v: &str) -> &str {
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_quotes_and_comments() {
        let fields = parse_os_release("# comment\nID=\"ubuntu\"\nVERSION_ID='22.04'\n\nNAME=Ubuntu\n");
        assert_eq!(fields.get("ID").map(String::as_str), Some("ubuntu"));
        assert_eq!(fields.get("VERSION_ID").map(String::as_str), Some("22.04"));
        assert_eq!(fields.get("NAME").map(String::as_str), Some("Ubuntu"));
    }

    #[test]
    fn apt_install_has_noninteractive_flag() {
        let cmd = PackageManager::Apt.install(&["samba", "samba-common-bin"]);
        assert_eq!(cmd.program, "apt-get");
        assert_eq!(cmd.args, vec!["install", "-y", "samba", "samba-common-bin"]);
    }

    #[test]
    fn rpm_query_prints_version_only() {
        let cmd = PackageManager::Dnf.query_version("vsftpd");
        assert_eq!(cmd.program, "rpm");
        assert!(cmd.args.contains(&"%{VERSION}".to_string()));
    }

    #[test]
    fn empty_id_is_reported_as_unknown() {
        let err = distro_from_os_release("NAME=Mystery\n").unwrap_err();
        assert!(err.to_string().contains("'unknown'"));
    }
}
