//! Shared-path, access and user edits. Every committed edit re-synchronizes
//! the protocols it touches.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;

use sharehost_core::{
    is_config_safe_path, is_valid_description, is_valid_path_name, is_valid_username, store,
    PathId, PermissionLevel, ProtocolName, ProtocolStatus, SharedPath, StoreError, UserAccount,
    UserId, UserProtocolAccess,
};
use sharehost_sync::{diff_protocol, AccessModel, ProtocolDiff};

use crate::error::{io_err, DaemonError};
use crate::orchestrator::{require_admin, Orchestrator};
use crate::report::{
    AccessChange, Caller, NewSharedPath, OperationReport, Outcome, PathChange, SharedPathUpdate,
    UserChange,
};

impl Orchestrator {
    // -----------------------------------------------------------------------
    // Shared paths
    // -----------------------------------------------------------------------

    pub fn list_paths(&self, _caller: &Caller) -> Result<Vec<SharedPath>, DaemonError> {
        self.live_paths()
    }

    fn live_paths(&self) -> Result<Vec<SharedPath>, DaemonError> {
        Ok(store::list_shared_paths_at(&self.state_dir)?
            .into_iter()
            .filter(|p| !p.is_deleted())
            .collect())
    }

    /// Create the directory if needed, persist the path and synchronize its
    /// protocols.
    pub fn create_path(&self, caller: &Caller, new: NewSharedPath) -> Result<PathChange, DaemonError> {
        require_admin(caller, "create_path")?;
        let name = validate_path_name(&new.name)?;
        let description = validate_description(new.description)?;
        let path = self.resolve_storage_path(&new.path)?;
        let protocols = self.validate_protocols(&new.protocols, &[])?;
        let existing = self.live_paths()?;
        ensure_unique(&existing, None, &name, &path)?;
        create_share_dir(&path)?;

        let now = Utc::now();
        let shared = SharedPath {
            id: PathId::generate(),
            name,
            path,
            description,
            protocols,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        store::save_shared_path_at(&self.state_dir, &shared)?;
        tracing::info!(path_id = %shared.id, name = %shared.name, path = %shared.path.display(), "shared path created");

        let sync = self.synchronize(shared.protocols.clone(), false);
        Ok(PathChange {
            path: shared,
            sync,
            pending: false,
        })
    }

    /// Synchronizes the union of the previous and new protocol sets.
    pub fn update_path(
        &self,
        caller: &Caller,
        id: &PathId,
        update: SharedPathUpdate,
    ) -> Result<PathChange, DaemonError> {
        require_admin(caller, "update_path")?;
        let mut shared = self.load_path(id)?;
        let previous = shared.protocols.clone();

        if let Some(name) = update.name {
            shared.name = validate_path_name(&name)?;
        }
        if let Some(path) = update.path {
            shared.path = self.resolve_storage_path(&path)?;
        }
        if let Some(description) = update.description {
            shared.description = validate_description(Some(description))?;
        }
        if let Some(protocols) = update.protocols {
            shared.protocols = self.validate_protocols(&protocols, &previous)?;
        }
        let existing = self.live_paths()?;
        ensure_unique(&existing, Some(id), &shared.name, &shared.path)?;
        create_share_dir(&shared.path)?;

        shared.updated_at = Utc::now();
        store::save_shared_path_at(&self.state_dir, &shared)?;
        tracing::info!(path_id = %shared.id, name = %shared.name, "shared path updated");

        let affected = previous.into_iter().chain(shared.protocols.iter().cloned());
        let sync = self.synchronize(affected, false);
        Ok(PathChange {
            path: shared,
            sync,
            pending: false,
        })
    }

    /// Removes the path and its access rows once every protocol exposing it
    /// has dropped it; until then the record stays as a tombstone. The
    /// directory itself is kept.
    pub fn delete_path(&self, caller: &Caller, id: &PathId) -> Result<PathChange, DaemonError> {
        require_admin(caller, "delete_path")?;
        let mut shared = self.load_path(id)?;
        shared.deleted_at = Some(Utc::now());
        store::save_shared_path_at(&self.state_dir, &shared)?;
        tracing::info!(path_id = %shared.id, name = %shared.name, "shared path deleted");

        let sync = self.synchronize(shared.protocols.clone(), false);
        let pending = store::load_shared_path_at(&self.state_dir, id).is_ok();
        Ok(PathChange {
            path: shared,
            sync,
            pending,
        })
    }

    /// A live (not deleted) shared path.
    fn load_path(&self, id: &PathId) -> Result<SharedPath, DaemonError> {
        match store::load_shared_path_at(&self.state_dir, id) {
            Ok(path) if !path.is_deleted() => Ok(path),
            Ok(_) | Err(StoreError::NotFound { .. }) => Err(DaemonError::NotFound {
                what: "shared path",
                id: id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Absolute path inside the storage root. Relative input is taken
    /// relative to the root; symlinks are not allowed to lead out of it.
    fn resolve_storage_path(&self, raw: &Path) -> Result<PathBuf, DaemonError> {
        let root = &self.settings.storage_root;
        if raw.as_os_str().is_empty() {
            return Err(DaemonError::InvalidPath("path must not be empty".into()));
        }
        if !is_config_safe_path(raw) {
            return Err(DaemonError::InvalidPath(format!(
                "{} must be UTF-8 without control characters",
                raw.display().to_string().escape_debug()
            )));
        }
        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(DaemonError::InvalidPath(format!(
                "{} must not contain '..'",
                raw.display()
            )));
        }
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            root.join(raw)
        };
        if !joined.starts_with(root) {
            return Err(DaemonError::InvalidPath(format!(
                "{} is outside the storage root {}",
                joined.display(),
                root.display()
            )));
        }

        if joined.exists() {
            let real = joined.canonicalize().map_err(|e| io_err(&joined, e))?;
            let real_root = root.canonicalize().map_err(|e| io_err(root, e))?;
            if !real.starts_with(&real_root) {
                return Err(DaemonError::InvalidPath(format!(
                    "{} resolves to {}, outside the storage root",
                    joined.display(),
                    real.display()
                )));
            }
            if !real.is_dir() {
                return Err(DaemonError::InvalidPath(format!(
                    "{} is not a directory",
                    joined.display()
                )));
            }
        }
        Ok(joined)
    }

    /// Known and deployed protocols, deduplicated. Protocols already on the
    /// path may stay even if they are no longer deployed.
    fn validate_protocols(
        &self,
        requested: &[ProtocolName],
        previous: &[ProtocolName],
    ) -> Result<Vec<ProtocolName>, DaemonError> {
        let mut accepted: Vec<ProtocolName> = Vec::new();
        for name in requested {
            let t = self.target(name.as_str())?;
            let key = t.descriptor.protocol_name();
            if accepted.contains(&key) {
                continue;
            }
            let status = t.slot.status();
            if !previous.contains(&key) && !status.is_deployed() {
                return Err(DaemonError::Conflict(format!(
                    "{key} is {status}; install it before exposing paths through it"
                )));
            }
            accepted.push(key);
        }
        Ok(accepted)
    }

    // -----------------------------------------------------------------------
    // Access rows
    // -----------------------------------------------------------------------

    pub fn list_access(
        &self,
        _caller: &Caller,
        path_id: Option<&PathId>,
    ) -> Result<Vec<UserProtocolAccess>, DaemonError> {
        let rows = match path_id {
            Some(id) => {
                self.load_path(id)?;
                store::list_access_for_path_at(&self.state_dir, id)?
            }
            None => {
                let live: Vec<PathId> = self.live_paths()?.into_iter().map(|p| p.id).collect();
                store::list_access_at(&self.state_dir)?
                    .into_iter()
                    .filter(|row| live.contains(&row.path_id))
                    .collect()
            }
        };
        Ok(rows.into_iter().filter(|row| !row.is_revoked()).collect())
    }

    /// Create or change a user's permission on a path.
    pub fn grant_access(
        &self,
        caller: &Caller,
        path_id: &PathId,
        user_id: &UserId,
        permission: PermissionLevel,
    ) -> Result<AccessChange, DaemonError> {
        require_admin(caller, "grant_access")?;
        let shared = self.load_path(path_id)?;
        let user = self.load_user(user_id)?;
        if user.is_admin {
            return Err(DaemonError::Conflict(format!(
                "{} is an administrator and already has full access everywhere",
                user.username
            )));
        }

        // A row still being revoked counts as absent.
        let existing =
            store::load_access_at(&self.state_dir, path_id, user_id)?.filter(|row| !row.is_revoked());
        let changed = existing.as_ref().map(|row| row.permission) != Some(permission);
        let sync = if changed {
            let row = UserProtocolAccess {
                user_id: user_id.clone(),
                path_id: path_id.clone(),
                permission,
                created_at: existing.map_or_else(Utc::now, |row| row.created_at),
                revoked_at: None,
            };
            store::save_access_at(&self.state_dir, &row)?;
            tracing::info!(path_id = %path_id, user = %user.username, permission = permission.as_str(), "access granted");
            self.synchronize(shared.protocols.clone(), false)
        } else {
            Vec::new()
        };

        Ok(AccessChange {
            path_id: path_id.clone(),
            user_id: user_id.clone(),
            permission: Some(permission),
            changed,
            sync,
            pending: false,
        })
    }

    /// Push the removal to every protocol on the path. The row is marked
    /// revoked first and deleted only once every protocol has applied the
    /// removal; a failed protocol leaves it `pending` for the next
    /// synchronization. Revoking a missing row is a no-op.
    pub fn revoke_access(
        &self,
        caller: &Caller,
        path_id: &PathId,
        user_id: &UserId,
    ) -> Result<AccessChange, DaemonError> {
        require_admin(caller, "revoke_access")?;
        let shared = self.load_path(path_id)?;
        let Some(mut row) = store::load_access_at(&self.state_dir, path_id, user_id)? else {
            return Ok(AccessChange {
                path_id: path_id.clone(),
                user_id: user_id.clone(),
                permission: None,
                changed: false,
                sync: Vec::new(),
                pending: false,
            });
        };

        // Revoking again retries the protocols that missed the removal.
        let changed = !row.is_revoked();
        if changed {
            row.revoked_at = Some(Utc::now());
            store::save_access_at(&self.state_dir, &row)?;
            tracing::info!(path_id = %path_id, user_id = %user_id, "access revoked");
        }
        let sync = self.synchronize(shared.protocols.clone(), false);
        let pending = store::load_access_at(&self.state_dir, path_id, user_id)?.is_some();
        if pending {
            tracing::warn!(path_id = %path_id, user_id = %user_id, "revocation not yet applied by every protocol");
        }
        Ok(AccessChange {
            path_id: path_id.clone(),
            user_id: user_id.clone(),
            permission: None,
            changed,
            sync,
            pending,
        })
    }

    /// Delete revoked rows and deleted paths whose removal every protocol on
    /// the path has applied in `reports`. A protocol not covered by
    /// `reports` counts only when it is uninstalled.
    pub(crate) fn settle_removals(&self, reports: &[OperationReport]) -> Result<(), DaemonError> {
        for path in store::list_shared_paths_at(&self.state_dir)? {
            let revoked: Vec<UserProtocolAccess> = store::list_access_for_path_at(&self.state_dir, &path.id)?
                .into_iter()
                .filter(|row| row.is_revoked())
                .collect();
            if !path.is_deleted() && revoked.is_empty() {
                continue;
            }
            if !path.protocols.iter().all(|p| self.removal_applied(p, reports)) {
                continue;
            }

            if path.is_deleted() {
                match store::delete_shared_path_at(&self.state_dir, &path.id) {
                    Ok(()) | Err(StoreError::NotFound { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
                tracing::info!(path_id = %path.id, name = %path.name, "shared path removed from every protocol");
                continue;
            }
            for row in revoked {
                store::delete_access_at(&self.state_dir, &row.path_id, &row.user_id)?;
                tracing::info!(path_id = %row.path_id, user_id = %row.user_id, "revocation applied by every protocol");
            }
        }
        Ok(())
    }

    fn removal_applied(&self, protocol: &ProtocolName, reports: &[OperationReport]) -> bool {
        match reports.iter().find(|r| &r.protocol == protocol) {
            Some(report) => {
                matches!(report.outcome, Outcome::Accepted | Outcome::NoOp)
                    && report.status != Some(ProtocolStatus::Error)
            }
            None => self
                .target(protocol.as_str())
                .map_or(true, |t| t.slot.status() == ProtocolStatus::Uninstalled),
        }
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn list_users(&self, _caller: &Caller) -> Result<Vec<UserAccount>, DaemonError> {
        Ok(store::list_users_at(&self.state_dir)?)
    }

    /// Mirror a user from the authentication collaborator. Promotion to
    /// administrator drops the user's explicit rows.
    pub fn upsert_user(&self, caller: &Caller, user: UserAccount) -> Result<UserChange, DaemonError> {
        require_admin(caller, "upsert_user")?;
        if !is_valid_username(&user.username) {
            return Err(DaemonError::InvalidUsername(user.username));
        }
        let users = store::list_users_at(&self.state_dir)?;
        if users
            .iter()
            .any(|u| u.username == user.username && u.id != user.id)
        {
            return Err(DaemonError::Conflict(format!(
                "username '{}' is already taken",
                user.username
            )));
        }
        let previous = users.into_iter().find(|u| u.id == user.id);
        store::save_user_at(&self.state_dir, &user)?;

        let mut dropped_access = Vec::new();
        if user.is_admin {
            for mut row in store::list_access_at(&self.state_dir)? {
                if row.user_id == user.id && !row.is_revoked() {
                    row.revoked_at = Some(Utc::now());
                    store::save_access_at(&self.state_dir, &row)?;
                    dropped_access.push(row);
                }
            }
        }

        let changed = previous.as_ref() != Some(&user);
        let sync = if changed || !dropped_access.is_empty() {
            tracing::info!(user = %user.username, admin = user.is_admin, active = user.is_active, "user updated");
            self.synchronize(Self::all_protocols(), false)
        } else {
            Vec::new()
        };
        Ok(UserChange {
            user,
            dropped_access,
            sync,
        })
    }

    fn load_user(&self, id: &UserId) -> Result<UserAccount, DaemonError> {
        match store::load_user_at(&self.state_dir, id) {
            Err(StoreError::NotFound { .. }) => Err(DaemonError::NotFound {
                what: "user",
                id: id.to_string(),
            }),
            other => Ok(other?),
        }
    }

    // -----------------------------------------------------------------------
    // Synchronization and preview
    // -----------------------------------------------------------------------

    /// Re-apply the persisted model to every deployed protocol.
    pub fn synchronize_all(&self, caller: &Caller, dry_run: bool) -> Result<Vec<OperationReport>, DaemonError> {
        require_admin(caller, "synchronize_all")?;
        Ok(self.synchronize(Self::all_protocols(), dry_run))
    }

    /// Unified diff of what synchronization would write for one protocol.
    pub fn diff(&self, caller: &Caller, name: &str) -> Result<ProtocolDiff, DaemonError> {
        require_admin(caller, "diff")?;
        let t = self.target(name)?;
        let mut record = store::load_protocol_at(&self.state_dir, &t.descriptor.protocol_name())?;
        record.status = t.slot.status();
        let model = AccessModel::load_at(&self.state_dir)?;
        Ok(diff_protocol(
            t.adapter,
            &record,
            &model,
            &self.settings.storage_root,
        )?)
    }
}

fn validate_path_name(name: &str) -> Result<String, DaemonError> {
    if is_valid_path_name(name) {
        Ok(name.to_string())
    } else {
        Err(DaemonError::InvalidPath(format!(
            "name '{name}' must be 1-100 characters without brackets or control characters"
        )))
    }
}

fn validate_description(description: Option<String>) -> Result<Option<String>, DaemonError> {
    match description.filter(|d| !d.is_empty()) {
        Some(d) if !is_valid_description(&d) => Err(DaemonError::InvalidPath(format!(
            "description '{}' must be at most 256 characters without control characters",
            d.escape_debug()
        ))),
        other => Ok(other),
    }
}

fn ensure_unique(
    existing: &[SharedPath],
    skip: Option<&PathId>,
    name: &str,
    path: &Path,
) -> Result<(), DaemonError> {
    for other in existing.iter().filter(|p| Some(&p.id) != skip) {
        if other.name.eq_ignore_ascii_case(name) {
            return Err(DaemonError::Conflict(format!(
                "a shared path named '{name}' already exists"
            )));
        }
        if other.path == path {
            return Err(DaemonError::Conflict(format!(
                "{} is already shared as '{}'",
                path.display(),
                other.name
            )));
        }
    }
    Ok(())
}

fn create_share_dir(path: &Path) -> Result<(), DaemonError> {
    std::fs::create_dir_all(path)
        .map_err(|e| DaemonError::InvalidPath(format!("cannot create {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn shared(id: &str, name: &str, path: &str) -> SharedPath {
        SharedPath {
            id: PathId::from(id),
            name: name.into(),
            path: PathBuf::from(path),
            description: None,
            protocols: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn names_and_paths_are_unique() {
        let existing = vec![shared("a", "Public", "/srv/sharehost/public")];
        assert!(ensure_unique(&existing, None, "public", Path::new("/srv/sharehost/x")).is_err());
        assert!(ensure_unique(&existing, None, "Other", Path::new("/srv/sharehost/public")).is_err());
        assert!(ensure_unique(&existing, None, "Other", Path::new("/srv/sharehost/other")).is_ok());
        // An update may keep its own name and path.
        assert!(ensure_unique(
            &existing,
            Some(&PathId::from("a")),
            "Public",
            Path::new("/srv/sharehost/public")
        )
        .is_ok());
    }

    #[test]
    fn descriptions_reject_line_breaks() {
        assert_eq!(validate_description(Some(String::new())).unwrap(), None);
        assert_eq!(
            validate_description(Some("Scans".into())).unwrap().as_deref(),
            Some("Scans")
        );
        let err = validate_description(Some("x\n   admin users = bob".into())).unwrap_err();
        assert_eq!(err.kind(), "InvalidPath");
    }

    #[test]
    fn path_names_reject_section_brackets() {
        assert!(validate_path_name("Team [A]").is_err());
        assert!(validate_path_name("").is_err());
        assert_eq!(validate_path_name("Team A").unwrap(), "Team A");
    }
}
