//! Durable YAML records for protocols, shared paths, access rows and users.
//!
//! # Storage layout
//!
//! ```text
//! <state_dir>/
//!   protocols/<name>.yaml               (status + last error + settings)
//!   paths/<path_id>.yaml                (one file per shared path)
//!   access/<path_id>/<user_id>.yaml     (one file per (user, path) grant)
//!   users/<user_id>.yaml                (read model of the auth user table)
//! ```
//!
//! Directories are created mode `0700`, files mode `0600`. Every save goes
//! through a `.tmp` sibling and a rename so a reader never sees a torn record.
//!
//! All functions take the state directory explicitly (`_at(root, ...)`); tests
//! run them against a `TempDir`.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StoreError};
use crate::types::{
    PathId, ProtocolName, ProtocolRecord, SharedPath, UserAccount, UserId, UserProtocolAccess,
};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

pub fn protocols_dir_at(root: &Path) -> PathBuf {
    root.join("protocols")
}

pub fn paths_dir_at(root: &Path) -> PathBuf {
    root.join("paths")
}

pub fn access_dir_at(root: &Path) -> PathBuf {
    root.join("access")
}

pub fn users_dir_at(root: &Path) -> PathBuf {
    root.join("users")
}

/// `<root>/protocols/<name>.yaml`; pure, no I/O.
pub fn protocol_record_path_at(root: &Path, name: &ProtocolName) -> PathBuf {
    protocols_dir_at(root).join(format!("{}.yaml", name.0))
}

/// `<root>/paths/<id>.yaml`; pure, no I/O.
pub fn shared_path_record_path_at(root: &Path, id: &PathId) -> PathBuf {
    paths_dir_at(root).join(format!("{}.yaml", id.0))
}

/// `<root>/access/<path_id>/<user_id>.yaml`; pure, no I/O.
pub fn access_record_path_at(root: &Path, path_id: &PathId, user_id: &UserId) -> PathBuf {
    access_dir_at(root)
        .join(&path_id.0)
        .join(format!("{}.yaml", user_id.0))
}

/// `<root>/users/<id>.yaml`; pure, no I/O.
pub fn user_record_path_at(root: &Path, id: &UserId) -> PathBuf {
    users_dir_at(root).join(format!("{}.yaml", id.0))
}

// ---------------------------------------------------------------------------
// 2. Protocol records
// ---------------------------------------------------------------------------

/// Load the persisted record, or a fresh `uninstalled` record when none exists.
pub fn load_protocol_at(root: &Path, name: &ProtocolName) -> Result<ProtocolRecord, StoreError> {
    let path = protocol_record_path_at(root, name);
    if !path.exists() {
        return Ok(ProtocolRecord::new(name.clone()));
    }
    read_yaml(&path)
}

pub fn save_protocol_at(root: &Path, record: &ProtocolRecord) -> Result<(), StoreError> {
    write_yaml_atomic(&protocol_record_path_at(root, &record.name), record)
}

// ---------------------------------------------------------------------------
// 3. Shared paths
// ---------------------------------------------------------------------------

pub fn load_shared_path_at(root: &Path, id: &PathId) -> Result<SharedPath, StoreError> {
    let path = shared_path_record_path_at(root, id);
    if !path.exists() {
        return Err(StoreError::NotFound {
            what: "shared path",
            path,
        });
    }
    read_yaml(&path)
}

pub fn save_shared_path_at(root: &Path, shared: &SharedPath) -> Result<(), StoreError> {
    write_yaml_atomic(&shared_path_record_path_at(root, &shared.id), shared)
}

/// Remove a shared path record together with every access row under it.
pub fn delete_shared_path_at(root: &Path, id: &PathId) -> Result<(), StoreError> {
    let path = shared_path_record_path_at(root, id);
    if !path.exists() {
        return Err(StoreError::NotFound {
            what: "shared path",
            path,
        });
    }
    let access = access_dir_at(root).join(&id.0);
    if access.exists() {
        std::fs::remove_dir_all(&access).map_err(|e| io_err(&access, e))?;
    }
    std::fs::remove_file(&path).map_err(|e| io_err(&path, e))
}

/// All shared paths, sorted by display name.
pub fn list_shared_paths_at(root: &Path) -> Result<Vec<SharedPath>, StoreError> {
    let mut paths: Vec<SharedPath> = list_yaml_dir(&paths_dir_at(root))?;
    paths.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(paths)
}

// ---------------------------------------------------------------------------
// 4. Access rows
// ---------------------------------------------------------------------------

pub fn load_access_at(
    root: &Path,
    path_id: &PathId,
    user_id: &UserId,
) -> Result<Option<UserProtocolAccess>, StoreError> {
    let path = access_record_path_at(root, path_id, user_id);
    if !path.exists() {
        return Ok(None);
    }
    read_yaml(&path).map(Some)
}

pub fn save_access_at(root: &Path, access: &UserProtocolAccess) -> Result<(), StoreError> {
    write_yaml_atomic(
        &access_record_path_at(root, &access.path_id, &access.user_id),
        access,
    )
}

/// Returns `true` when a row existed and was removed.
pub fn delete_access_at(root: &Path, path_id: &PathId, user_id: &UserId) -> Result<bool, StoreError> {
    let path = access_record_path_at(root, path_id, user_id);
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
    Ok(true)
}

/// Access rows for one shared path, sorted by user id.
pub fn list_access_for_path_at(
    root: &Path,
    path_id: &PathId,
) -> Result<Vec<UserProtocolAccess>, StoreError> {
    let mut rows: Vec<UserProtocolAccess> = list_yaml_dir(&access_dir_at(root).join(&path_id.0))?;
    rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    Ok(rows)
}

/// Every access row, sorted by (path id, user id).
pub fn list_access_at(root: &Path) -> Result<Vec<UserProtocolAccess>, StoreError> {
    let dir = access_dir_at(root);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut rows = Vec::new();
    for entry in entries {
        let path_id = PathId::from(entry.file_name().to_string_lossy().into_owned());
        rows.extend(list_access_for_path_at(root, &path_id)?);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// 5. Users
// ---------------------------------------------------------------------------

pub fn load_user_at(root: &Path, id: &UserId) -> Result<UserAccount, StoreError> {
    let path = user_record_path_at(root, id);
    if !path.exists() {
        return Err(StoreError::NotFound { what: "user", path });
    }
    read_yaml(&path)
}

pub fn save_user_at(root: &Path, user: &UserAccount) -> Result<(), StoreError> {
    write_yaml_atomic(&user_record_path_at(root, &user.id), user)
}

/// All users, sorted by username.
pub fn list_users_at(root: &Path) -> Result<Vec<UserAccount>, StoreError> {
    let mut users: Vec<UserAccount> = list_yaml_dir(&users_dir_at(root))?;
    users.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(users)
}

// ---------------------------------------------------------------------------
// Generic helpers
// ---------------------------------------------------------------------------

/// Create `dir` (mode `0700`) if absent.
pub fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

/// Serialize → `<file>.tmp` sibling → `chmod 0600` → `rename`.
pub fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let yaml = serde_yaml::to_string(value)?;
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load every `*.yaml` file directly under `dir`, in file-name order.
/// A missing directory is an empty list.
fn list_yaml_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    entries.iter().map(|e| read_yaml(&e.path())).collect()
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp"))
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PermissionLevel, ProtocolStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn make_root() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn shared(id: &str, name: &str) -> SharedPath {
        let now = Utc::now();
        SharedPath {
            id: PathId::from(id),
            name: name.to_owned(),
            path: PathBuf::from(format!("/srv/sharehost/{name}")),
            description: None,
            protocols: vec![ProtocolName::from("ftp")],
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn missing_protocol_record_defaults_to_uninstalled() {
        let root = make_root();
        let rec = load_protocol_at(root.path(), &ProtocolName::from("ftp")).expect("load");
        assert_eq!(rec.status, ProtocolStatus::Uninstalled);
    }

    #[test]
    fn protocol_record_roundtrip_and_perms() {
        let root = make_root();
        let mut rec = ProtocolRecord::new(ProtocolName::from("smb"));
        rec.status = ProtocolStatus::Running;
        save_protocol_at(root.path(), &rec).expect("save");

        let loaded = load_protocol_at(root.path(), &rec.name).expect("load");
        assert_eq!(loaded.status, ProtocolStatus::Running);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let file = protocol_record_path_at(root.path(), &rec.name);
            let mode = std::fs::metadata(&file).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
            let dir_mode = std::fs::metadata(protocols_dir_at(root.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }

    #[test]
    fn save_leaves_no_tmp_behind() {
        let root = make_root();
        let sp = shared("p1", "public");
        save_shared_path_at(root.path(), &sp).expect("save");
        let tmp = shared_path_record_path_at(root.path(), &sp.id).with_file_name("p1.yaml.tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn shared_paths_list_sorted_by_name() {
        let root = make_root();
        save_shared_path_at(root.path(), &shared("a", "zeta")).expect("save");
        save_shared_path_at(root.path(), &shared("b", "alpha")).expect("save");
        let names: Vec<_> = list_shared_paths_at(root.path())
            .expect("list")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn deleting_path_removes_its_access_rows() {
        let root = make_root();
        let sp = shared("p1", "public");
        save_shared_path_at(root.path(), &sp).expect("save");
        save_access_at(
            root.path(),
            &UserProtocolAccess {
                user_id: UserId::from("u1"),
                path_id: sp.id.clone(),
                permission: PermissionLevel::Read,
                created_at: Utc::now(),
                revoked_at: None,
            },
        )
        .expect("save access");

        delete_shared_path_at(root.path(), &sp.id).expect("delete");
        assert!(list_access_at(root.path()).expect("list").is_empty());
        assert!(matches!(
            load_shared_path_at(root.path(), &sp.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_missing_access_reports_false() {
        let root = make_root();
        let removed =
            delete_access_at(root.path(), &PathId::from("p"), &UserId::from("u")).expect("delete");
        assert!(!removed);
    }

    #[test]
    fn corrupt_record_is_parse_error_with_path() {
        let root = make_root();
        let dir = users_dir_at(root.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("u1.yaml"), "- not: [a mapping").unwrap();
        let err = load_user_at(root.path(), &UserId::from("u1")).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().contains("u1.yaml"));
    }
}
