//! Static protocol catalog.
//!
//! Descriptors are `'static` data and never change at runtime. Iteration order
//! is declaration order, not lexical: the dashboard lists protocols in the
//! order operators expect to see them.

use crate::error::RegistryError;
use crate::types::ProtocolName;

/// Which adapter implementation drives a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Ftp,
    Sftp,
    Smb,
    S3,
    /// Registered but not implemented; install/start report `NotImplemented`.
    Stub,
}

/// How a protocol's native configuration expresses per-user permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclModel {
    /// Per-share user lists (`read list` / `write list`). Cannot express
    /// write-without-delete.
    PerShareUserLists,
    /// One chroot root and one permission set per user. Cannot express
    /// different levels on different paths, nor more than one root.
    PerUserRoot,
    /// Per-user policy documents over per-share buckets. Exact.
    PerUserPolicy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub acl: AclModel,
    pub tls: bool,
}

/// Immutable description of one supported protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub name: &'static str,
    pub display_name: &'static str,
    pub default_port: u16,
    pub adapter: AdapterKind,
    /// Service units managed by the supervisor; empty for process-supervised
    /// daemons.
    pub units: &'static [&'static str],
    /// Distribution packages providing the daemon.
    pub packages: &'static [&'static str],
    pub capabilities: Capabilities,
}

impl ProtocolDescriptor {
    pub fn protocol_name(&self) -> ProtocolName {
        ProtocolName::from(self.name)
    }

    pub fn is_stub(&self) -> bool {
        self.adapter == AdapterKind::Stub
    }
}

static CATALOG: &[ProtocolDescriptor] = &[
    ProtocolDescriptor {
        name: "ftp",
        display_name: "FTP/FTPS",
        default_port: 21,
        adapter: AdapterKind::Ftp,
        units: &["vsftpd"],
        packages: &["vsftpd"],
        capabilities: Capabilities {
            acl: AclModel::PerUserRoot,
            tls: true,
        },
    },
    ProtocolDescriptor {
        name: "sftp",
        display_name: "SFTP",
        default_port: 22,
        adapter: AdapterKind::Sftp,
        units: &["sshd"],
        packages: &["openssh-server"],
        capabilities: Capabilities {
            acl: AclModel::PerUserRoot,
            tls: false,
        },
    },
    ProtocolDescriptor {
        name: "smb",
        display_name: "SMB/CIFS",
        default_port: 445,
        adapter: AdapterKind::Smb,
        units: &["smbd", "nmbd"],
        packages: &["samba"],
        capabilities: Capabilities {
            acl: AclModel::PerShareUserLists,
            tls: false,
        },
    },
    ProtocolDescriptor {
        name: "s3",
        display_name: "S3 (MinIO)",
        default_port: 9000,
        adapter: AdapterKind::S3,
        units: &[],
        packages: &[],
        capabilities: Capabilities {
            acl: AclModel::PerUserPolicy,
            tls: true,
        },
    },
    ProtocolDescriptor {
        name: "nfs",
        display_name: "NFS",
        default_port: 2049,
        adapter: AdapterKind::Stub,
        units: &["nfs-server"],
        packages: &["nfs-kernel-server"],
        capabilities: Capabilities {
            acl: AclModel::None,
            tls: false,
        },
    },
    ProtocolDescriptor {
        name: "webdav",
        display_name: "WebDAV",
        default_port: 8080,
        adapter: AdapterKind::Stub,
        units: &[],
        packages: &[],
        capabilities: Capabilities {
            acl: AclModel::None,
            tls: true,
        },
    },
    ProtocolDescriptor {
        name: "nextcloud",
        display_name: "NextCloud",
        default_port: 8081,
        adapter: AdapterKind::Stub,
        units: &[],
        packages: &[],
        capabilities: Capabilities {
            acl: AclModel::None,
            tls: true,
        },
    },
];

/// Look up a protocol by name (case-insensitive).
pub fn describe(name: &str) -> Result<&'static ProtocolDescriptor, RegistryError> {
    let wanted = name.to_ascii_lowercase();
    CATALOG
        .iter()
        .find(|d| d.name == wanted)
        .ok_or_else(|| RegistryError::UnknownProtocol {
            name: name.to_owned(),
            known: CATALOG
                .iter()
                .map(|d| d.name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Every registered protocol, in declaration order.
pub fn list_all() -> &'static [ProtocolDescriptor] {
    CATALOG
}
