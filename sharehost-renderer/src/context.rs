//! Template context: serializable rendering payload built from a
//! [`DesiredConfig`].
//!
//! The context carries native primitives already derived from the abstract
//! permission level (`write_enable`, `cmds_denied`, SFTP flags, SMB lists,
//! S3 policy statements) so templates stay free of permission logic.

use serde::{Deserialize, Serialize};

use sharehost_core::types::{DesiredConfig, PermissionLevel};
use sharehost_core::Settings;

use crate::error::RenderError;

/// FTP commands denied to users who may write but not delete.
pub const FTP_DELETE_COMMANDS: &str = "DELE,RMD,RNFR";

const DEFAULT_PASV_RANGE: (u16, u16) = (40000, 50000);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeContext {
    pub protocol: String,
    pub port: u16,
    pub tls_enabled: bool,
    pub force_tls: bool,
    pub pasv_min_port: u16,
    pub pasv_max_port: u16,
    pub storage_root: String,
    pub userlist_file: String,
    pub user_conf_dir: String,
    /// Free-form `key = value` options, sorted by key.
    pub extra: Vec<OptionCtx>,
    /// Sorted by share name.
    pub shares: Vec<ShareCtx>,
    /// Per-user roots (FTP/SFTP), sorted by username.
    pub users: Vec<UserCtx>,
    /// Per-user S3 policies, sorted by username.
    pub policies: Vec<PolicyCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionCtx {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareCtx {
    pub id: String,
    pub name: String,
    /// Samba section header.
    pub section: String,
    /// S3 bucket name.
    pub bucket: String,
    pub path: String,
    pub comment: String,
    pub valid_users: Vec<String>,
    pub read_list: Vec<String>,
    pub write_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCtx {
    pub username: String,
    pub root: String,
    pub level: String,
    pub is_admin: bool,
    pub write_enable: bool,
    pub cmds_denied: Option<String>,
    /// Arguments appended to `ForceCommand internal-sftp`.
    pub sftp_flags: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCtx {
    pub name: String,
    pub username: String,
    pub statements: Vec<StatementCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementCtx {
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

impl NativeContext {
    /// Build the rendering payload for one protocol.
    pub fn from_desired(desired: &DesiredConfig, settings: &Settings) -> Self {
        let (pasv_min_port, pasv_max_port) = desired
            .settings
            .passive_port_range
            .unwrap_or(DEFAULT_PASV_RANGE);

        let shares: Vec<ShareCtx> = desired
            .shares
            .iter()
            .map(|s| {
                let names = |pred: fn(PermissionLevel) -> bool| -> Vec<String> {
                    s.grants
                        .iter()
                        .filter(|g| pred(g.level))
                        .map(|g| g.username.clone())
                        .collect()
                };
                ShareCtx {
                    id: s.id.0.clone(),
                    name: s.name.clone(),
                    section: smb_section_name(&s.name),
                    bucket: bucket_name(&s.name, &s.id.0),
                    path: s.path.display().to_string(),
                    comment: s.description.clone().unwrap_or_else(|| s.name.clone()),
                    valid_users: names(|_| true),
                    read_list: names(|l| !l.can_write()),
                    write_list: names(PermissionLevel::can_write),
                }
            })
            .collect();

        let users = desired
            .user_roots
            .iter()
            .map(|u| UserCtx {
                username: u.username.clone(),
                root: u.root.display().to_string(),
                level: u.level.to_string(),
                is_admin: u.is_admin,
                write_enable: u.level.can_write(),
                cmds_denied: (u.level == PermissionLevel::Write)
                    .then(|| FTP_DELETE_COMMANDS.to_string()),
                sftp_flags: sftp_flags(u.level).to_string(),
            })
            .collect();

        let policies = s3_policies(&shares, desired);

        NativeContext {
            protocol: desired.protocol.0.clone(),
            port: desired.port,
            tls_enabled: desired.settings.tls_enabled,
            force_tls: desired.settings.tls_enabled && desired.settings.force_tls,
            pasv_min_port,
            pasv_max_port,
            storage_root: desired.storage_root.display().to_string(),
            userlist_file: settings.ftp.userlist.display().to_string(),
            user_conf_dir: settings.ftp.user_conf_dir.display().to_string(),
            extra: desired
                .settings
                .extra
                .iter()
                .map(|(k, v)| OptionCtx {
                    key: k.clone(),
                    value: v.clone(),
                })
                .collect(),
            shares,
            users,
            policies,
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

/// `internal-sftp` flags: `-R` read-only, `-P` denies the listed requests.
pub fn sftp_flags(level: PermissionLevel) -> &'static str {
    match level {
        PermissionLevel::Read => "-R",
        PermissionLevel::Write => "-P remove,rmdir,rename",
        PermissionLevel::Full => "",
    }
}

/// S3 actions granted for a permission level on one bucket.
pub fn s3_actions(level: PermissionLevel) -> Vec<String> {
    let actions: &[&str] = match level {
        PermissionLevel::Read => &["s3:GetBucketLocation", "s3:ListBucket", "s3:GetObject"],
        PermissionLevel::Write => &[
            "s3:GetBucketLocation",
            "s3:ListBucket",
            "s3:GetObject",
            "s3:PutObject",
            "s3:ListMultipartUploadParts",
            "s3:AbortMultipartUpload",
        ],
        PermissionLevel::Full => &["s3:*"],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

/// Samba section names may not contain brackets.
pub fn smb_section_name(name: &str) -> String {
    name.chars().filter(|c| !matches!(c, '[' | ']')).collect()
}

/// S3 bucket name derived from the share name: lowercase alphanumerics and
/// hyphens, 3 to 63 characters. Falls back to the share id when the name has
/// no usable characters.
pub fn bucket_name(name: &str, id: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let mut bucket = out.trim_matches('-').to_string();
    if bucket.is_empty() {
        bucket = format!("share-{}", id.chars().take(8).collect::<String>().to_ascii_lowercase());
    }
    while bucket.len() < 3 {
        bucket.push('0');
    }
    bucket.truncate(63);
    bucket.trim_end_matches('-').to_string()
}

fn s3_policies(shares: &[ShareCtx], desired: &DesiredConfig) -> Vec<PolicyCtx> {
    use std::collections::BTreeMap;

    // username -> [(bucket, level)]
    let mut per_user: BTreeMap<&str, Vec<(&str, PermissionLevel)>> = BTreeMap::new();
    for (ctx, share) in shares.iter().zip(&desired.shares) {
        for grant in &share.grants {
            per_user
                .entry(grant.username.as_str())
                .or_default()
                .push((ctx.bucket.as_str(), grant.level));
        }
    }

    per_user
        .into_iter()
        .map(|(username, grants)| PolicyCtx {
            name: format!("sharehost-{username}"),
            username: username.to_string(),
            statements: grants
                .into_iter()
                .map(|(bucket, level)| StatementCtx {
                    actions: s3_actions(level),
                    resources: vec![
                        format!("arn:aws:s3:::{bucket}"),
                        format!("arn:aws:s3:::{bucket}/*"),
                    ],
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharehost_core::types::{NativeGrant, PathId, ProtocolName, ShareConfig, UserRoot};
    use std::path::PathBuf;

    fn desired() -> DesiredConfig {
        DesiredConfig {
            protocol: ProtocolName::from("smb"),
            port: 445,
            settings: Default::default(),
            storage_root: PathBuf::from("/srv/sharehost"),
            shares: vec![ShareConfig {
                id: PathId::from("p1"),
                name: "Team Docs".into(),
                path: PathBuf::from("/srv/sharehost/docs"),
                description: None,
                grants: vec![
                    NativeGrant {
                        username: "admin".into(),
                        level: PermissionLevel::Full,
                        implicit_admin: true,
                    },
                    NativeGrant {
                        username: "bob".into(),
                        level: PermissionLevel::Read,
                        implicit_admin: false,
                    },
                ],
            }],
            user_roots: vec![UserRoot {
                username: "carol".into(),
                root: PathBuf::from("/srv/sharehost/docs"),
                level: PermissionLevel::Write,
                is_admin: false,
            }],
        }
    }

    #[test]
    fn share_lists_split_by_level() {
        let ctx = NativeContext::from_desired(&desired(), &Settings::default());
        let share = &ctx.shares[0];
        assert_eq!(share.valid_users, vec!["admin", "bob"]);
        assert_eq!(share.read_list, vec!["bob"]);
        assert_eq!(share.write_list, vec!["admin"]);
        assert_eq!(share.bucket, "team-docs");
        assert_eq!(share.comment, "Team Docs");
    }

    #[test]
    fn write_level_denies_delete_commands() {
        let ctx = NativeContext::from_desired(&desired(), &Settings::default());
        let carol = &ctx.users[0];
        assert!(carol.write_enable);
        assert_eq!(carol.cmds_denied.as_deref(), Some(FTP_DELETE_COMMANDS));
        assert_eq!(carol.sftp_flags, "-P remove,rmdir,rename");
    }

    #[test]
    fn default_passive_range_applies() {
        let ctx = NativeContext::from_desired(&desired(), &Settings::default());
        assert_eq!((ctx.pasv_min_port, ctx.pasv_max_port), (40000, 50000));
    }

    #[test]
    fn force_tls_requires_tls() {
        let mut d = desired();
        d.settings.force_tls = true;
        let ctx = NativeContext::from_desired(&d, &Settings::default());
        assert!(!ctx.force_tls);
    }

    #[test]
    fn bucket_names_are_valid() {
        assert_eq!(bucket_name("Public", "x"), "public");
        assert_eq!(bucket_name("a", "x"), "a00");
        assert_eq!(bucket_name("___", "ABCDEF123456"), "share-abcdef12");
        assert!(bucket_name(&"x".repeat(100), "id").len() <= 63);
    }

    #[test]
    fn policies_group_grants_per_user() {
        let ctx = NativeContext::from_desired(&desired(), &Settings::default());
        let names: Vec<_> = ctx.policies.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, vec!["admin", "bob"]);
        assert_eq!(ctx.policies[1].statements[0].actions.len(), 3);
        assert_eq!(ctx.policies[0].statements[0].actions, vec!["s3:*"]);
    }
}
