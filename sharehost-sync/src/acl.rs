//! Permission translation: persisted paths and access rows to a protocol's
//! [`DesiredConfig`].
//!
//! Administrators get `full` on every path through [`effective_grants`];
//! no row is ever stored for them. When a protocol's ACL model cannot
//! express a grant, the least-privileged faithful approximation is used and
//! a warning describes what was dropped.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use sharehost_core::registry::{AclModel, ProtocolDescriptor};
use sharehost_core::store;
use sharehost_core::types::{
    is_config_safe_path, is_valid_description, is_valid_path_name, is_valid_username,
    DesiredConfig, NativeGrant, PermissionLevel, ProtocolRecord, ShareConfig,
    SharedPath, UserAccount, UserProtocolAccess, UserRoot,
};
use sharehost_core::StoreError;

/// Everything translation reads from the store. Deleted paths and revoked
/// rows still waiting to be settled grant nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessModel {
    pub paths: Vec<SharedPath>,
    pub access: Vec<UserProtocolAccess>,
    pub users: Vec<UserAccount>,
}

impl AccessModel {
    pub fn load_at(root: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            paths: store::list_shared_paths_at(root)?
                .into_iter()
                .filter(|p| !p.is_deleted())
                .collect(),
            access: store::list_access_at(root)?
                .into_iter()
                .filter(|row| !row.is_revoked())
                .collect(),
            users: store::list_users_at(root)?,
        })
    }
}

/// Desired config plus the approximations made to produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub desired: DesiredConfig,
    pub warnings: Vec<String>,
}

/// Grants on `path`: every active admin at `full`, plus each active
/// non-admin with an access row. Sorted by username.
pub fn effective_grants(path: &SharedPath, model: &AccessModel) -> Vec<NativeGrant> {
    let mut grants: Vec<NativeGrant> = model
        .users
        .iter()
        .filter(|u| u.is_active && is_valid_username(&u.username))
        .filter_map(|user| {
            if user.is_admin {
                return Some(NativeGrant {
                    username: user.username.clone(),
                    level: PermissionLevel::Full,
                    implicit_admin: true,
                });
            }
            model
                .access
                .iter()
                .find(|row| row.path_id == path.id && row.user_id == user.id && !row.is_revoked())
                .map(|row| NativeGrant {
                    username: user.username.clone(),
                    level: row.permission,
                    implicit_admin: false,
                })
        })
        .collect();
    grants.sort_by(|a, b| a.username.cmp(&b.username));
    grants
}

/// Compute the full desired configuration of `descriptor` from scratch.
pub fn translate(
    descriptor: &ProtocolDescriptor,
    record: &ProtocolRecord,
    storage_root: &Path,
    model: &AccessModel,
) -> Translation {
    let protocol = descriptor.protocol_name();
    let mut warnings = Vec::new();

    for user in &model.users {
        if user.is_active && !is_valid_username(&user.username) {
            warnings.push(format!(
                "user '{}' skipped: name is not usable in native configuration",
                user.username
            ));
        }
    }

    let mut exposed: Vec<&SharedPath> = Vec::new();
    for path in model.paths.iter().filter(|p| p.exposes(&protocol) && !p.is_deleted()) {
        // Records written behind the daemon's back skip request validation.
        if renders_safely(path) {
            exposed.push(path);
        } else {
            warnings.push(format!(
                "share '{}' skipped: name, path or description contains characters not allowed in native configuration",
                path.name.escape_debug()
            ));
        }
    }
    exposed.sort_by(|a, b| a.name.cmp(&b.name));

    let mut shares = Vec::with_capacity(exposed.len());
    for path in &exposed {
        let mut grants = effective_grants(path, model);
        if descriptor.capabilities.acl == AclModel::PerShareUserLists {
            for grant in grants.iter_mut().filter(|g| g.level == PermissionLevel::Write) {
                warnings.push(format!(
                    "{}: '{}' on share '{}' downgraded from write to read (write without delete is not expressible)",
                    descriptor.name, grant.username, path.name
                ));
                grant.level = PermissionLevel::Read;
            }
        }
        shares.push(ShareConfig {
            id: path.id.clone(),
            name: path.name.clone(),
            path: path.path.clone(),
            description: path.description.clone(),
            grants,
        });
    }

    let user_roots = if descriptor.capabilities.acl == AclModel::PerUserRoot {
        per_user_roots(descriptor, storage_root, &shares, &mut warnings)
    } else {
        Vec::new()
    };

    Translation {
        desired: DesiredConfig {
            protocol,
            port: record.settings.port.unwrap_or(descriptor.default_port),
            settings: record.settings.clone(),
            storage_root: storage_root.to_path_buf(),
            shares,
            user_roots,
        },
        warnings,
    }
}

fn renders_safely(path: &SharedPath) -> bool {
    is_valid_path_name(&path.name)
        && is_config_safe_path(&path.path)
        && path.description.as_deref().map_or(true, is_valid_description)
}

/// One root per user. Admins are rooted at the storage root; a user
/// granted several paths keeps only the first by name.
fn per_user_roots(
    descriptor: &ProtocolDescriptor,
    storage_root: &Path,
    shares: &[ShareConfig],
    warnings: &mut Vec<String>,
) -> Vec<UserRoot> {
    let mut by_user: BTreeMap<&str, Vec<(&ShareConfig, &NativeGrant)>> = BTreeMap::new();
    for share in shares {
        for grant in &share.grants {
            by_user
                .entry(grant.username.as_str())
                .or_default()
                .push((share, grant));
        }
    }

    by_user
        .into_iter()
        .map(|(username, granted)| {
            if granted.iter().any(|(_, g)| g.implicit_admin) {
                return UserRoot {
                    username: username.to_string(),
                    root: storage_root.to_path_buf(),
                    level: PermissionLevel::Full,
                    is_admin: true,
                };
            }
            let (share, grant) = granted[0];
            if granted.len() > 1 {
                let dropped: Vec<&str> = granted[1..].iter().map(|(s, _)| s.name.as_str()).collect();
                warnings.push(format!(
                    "{}: '{}' is limited to one root; rooted at '{}', not exposing {}",
                    descriptor.name,
                    username,
                    share.name,
                    dropped.join(", ")
                ));
            }
            UserRoot {
                username: username.to_string(),
                root: share.path.clone(),
                level: grant.level,
                is_admin: false,
            }
        })
        .collect()
}
