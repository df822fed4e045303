//! Host settings: storage root, native config locations, supervisor timings.
//!
//! Loaded from `<state_dir>/config.yaml`; every field has a default so a
//! missing file or a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};

pub const STATE_DIR_ENV: &str = "SHAREHOST_STATE_DIR";
pub const STORAGE_ROOT_ENV: &str = "SHAREHOST_STORAGE_ROOT";
pub const DEFAULT_STATE_DIR: &str = "/var/lib/sharehost";
pub const DEFAULT_STORAGE_ROOT: &str = "/srv/sharehost";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Every shared path must resolve inside this directory.
    pub storage_root: PathBuf,
    pub ftp: FtpSettings,
    pub sftp: SftpSettings,
    pub smb: SmbSettings,
    pub s3: S3Settings,
    pub supervisor: SupervisorSettings,
    /// TCP connect timeout of the health probe.
    pub health_timeout_ms: u64,
    /// Period of the daemon's drift reconciliation pass.
    pub reconcile_interval_secs: u64,
    /// Directory of `.tera` files overriding the embedded native templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpSettings {
    pub conf: PathBuf,
    pub userlist: PathBuf,
    pub user_conf_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SftpSettings {
    pub drop_in: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmbSettings {
    pub conf: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub binary: PathBuf,
    pub data_dir: PathBuf,
    pub env_file: PathBuf,
    pub policy_bundle: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub console_port: u16,
    /// `mc` alias pointing at the local server.
    pub mc_alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub start_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            ftp: FtpSettings::default(),
            sftp: SftpSettings::default(),
            smb: SmbSettings::default(),
            s3: S3Settings::default(),
            supervisor: SupervisorSettings::default(),
            health_timeout_ms: 1000,
            reconcile_interval_secs: 30,
            template_dir: None,
        }
    }
}

impl Default for FtpSettings {
    fn default() -> Self {
        Self {
            conf: PathBuf::from("/etc/vsftpd.conf"),
            userlist: PathBuf::from("/etc/vsftpd.userlist"),
            user_conf_dir: PathBuf::from("/etc/vsftpd/user_conf"),
        }
    }
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            drop_in: PathBuf::from("/etc/ssh/sshd_config.d/sharehost-sftp.conf"),
        }
    }
}

impl Default for SmbSettings {
    fn default() -> Self {
        Self {
            conf: PathBuf::from("/etc/samba/smb.conf"),
        }
    }
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/bin/minio"),
            data_dir: PathBuf::from("/opt/minio/data"),
            env_file: PathBuf::from("/etc/minio/minio.env"),
            policy_bundle: PathBuf::from("/etc/minio/sharehost-policies.json"),
            pid_file: PathBuf::from("/run/sharehost/minio.pid"),
            log_file: PathBuf::from("/var/log/sharehost/minio.log"),
            console_port: 9001,
            mc_alias: "sharehost".to_string(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            start_timeout_ms: 30_000,
            poll_interval_ms: 250,
        }
    }
}

impl SupervisorSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Load settings from a YAML file; a missing file yields defaults.
    pub fn load_at(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `<state_dir>/config.yaml`, then apply `SHAREHOST_STORAGE_ROOT`.
    pub fn load_for_state_dir(state_dir: &Path) -> Result<Self, StoreError> {
        let mut settings = Self::load_at(&state_dir.join(CONFIG_FILE))?;
        if let Some(root) = std::env::var_os(STORAGE_ROOT_ENV) {
            settings.storage_root = PathBuf::from(root);
        }
        Ok(settings)
    }
}

/// `SHAREHOST_STATE_DIR`, or `/var/lib/sharehost`.
pub fn state_dir_from_env() -> PathBuf {
    std::env::var_os(STATE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
}
