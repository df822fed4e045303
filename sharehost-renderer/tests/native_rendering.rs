use std::path::PathBuf;

use sharehost_core::types::{
    DesiredConfig, NativeGrant, PathId, PermissionLevel, ProtocolName, ProtocolSettings,
    ShareConfig, UserRoot,
};
use sharehost_core::Settings;
use sharehost_renderer::{NativeTarget, Renderer};

fn grant(user: &str, level: PermissionLevel, admin: bool) -> NativeGrant {
    NativeGrant {
        username: user.to_string(),
        level,
        implicit_admin: admin,
    }
}

fn share(name: &str, grants: Vec<NativeGrant>) -> ShareConfig {
    ShareConfig {
        id: PathId::from(format!("id-{name}")),
        name: name.to_string(),
        path: PathBuf::from(format!("/srv/sharehost/{}", name.to_lowercase())),
        description: Some(format!("{name} files")),
        grants,
    }
}

fn desired(protocol: &str, shares: Vec<ShareConfig>, roots: Vec<UserRoot>) -> DesiredConfig {
    DesiredConfig {
        protocol: ProtocolName::from(protocol),
        port: 445,
        settings: ProtocolSettings::default(),
        storage_root: PathBuf::from("/srv/sharehost"),
        shares,
        user_roots: roots,
    }
}

fn render_one(desired: &DesiredConfig, target: NativeTarget) -> String {
    let settings = Settings::default();
    let renderer = Renderer::new(&settings).expect("renderer");
    renderer
        .render(desired, target, &settings)
        .expect("render")
        .remove(0)
        .content
}

#[test]
fn smb_public_share_lists_only_admin() {
    let d = desired(
        "smb",
        vec![share("Public", vec![grant("root", PermissionLevel::Full, true)])],
        vec![],
    );
    let conf = render_one(&d, NativeTarget::Samba);
    assert!(conf.contains("[Public]"));
    assert!(conf.contains("path = /srv/sharehost/public"));
    assert!(conf.contains("valid users = root\n"));
    assert!(conf.contains("write list = root\n"));
    assert!(conf.contains("read list = \n"));
    assert!(conf.contains("smb ports = 445"));
}

#[test]
fn smb_share_without_users_is_unavailable() {
    let d = desired("smb", vec![share("Empty", vec![])], vec![]);
    let conf = render_one(&d, NativeTarget::Samba);
    assert!(conf.contains("available = no"));
    assert!(!conf.contains("valid users"));
}

#[test]
fn sftp_drop_in_has_chroot_and_forced_command_per_user() {
    let d = desired(
        "sftp",
        vec![],
        vec![
            UserRoot {
                username: "alice".into(),
                root: PathBuf::from("/srv/sharehost/docs"),
                level: PermissionLevel::Read,
                is_admin: false,
            },
            UserRoot {
                username: "root".into(),
                root: PathBuf::from("/srv/sharehost"),
                level: PermissionLevel::Full,
                is_admin: true,
            },
        ],
    );
    let conf = render_one(&d, NativeTarget::SftpDropIn);
    assert!(conf.contains("Match User alice\n    ChrootDirectory /srv/sharehost/docs"));
    assert!(conf.contains("ForceCommand internal-sftp -R\n"));
    assert!(conf.contains("Match User root\n    ChrootDirectory /srv/sharehost\n    ForceCommand internal-sftp\n"));
}

#[test]
fn vsftpd_conf_honours_tls_and_passive_settings() {
    let mut d = desired("ftp", vec![], vec![]);
    d.port = 2121;
    d.settings.tls_enabled = true;
    d.settings.force_tls = true;
    d.settings.passive_port_range = Some((30000, 30010));
    let conf = render_one(&d, NativeTarget::Vsftpd);
    assert!(conf.contains("listen_port=2121"));
    assert!(conf.contains("ssl_enable=YES"));
    assert!(conf.contains("force_local_logins_ssl=YES"));
    assert!(conf.contains("pasv_min_port=30000"));
    assert!(conf.contains("pasv_max_port=30010"));
    assert!(conf.contains("userlist_deny=NO"));
}

#[test]
fn minio_bundle_is_valid_json_with_per_user_policies() {
    let d = desired(
        "s3",
        vec![
            share(
                "Media",
                vec![
                    grant("bob", PermissionLevel::Write, false),
                    grant("root", PermissionLevel::Full, true),
                ],
            ),
            share("Public", vec![grant("root", PermissionLevel::Full, true)]),
        ],
        vec![],
    );
    let json = render_one(&d, NativeTarget::MinioPolicies);
    let value: serde_json::Value = serde_json::from_str(&json)
        .unwrap_or_else(|e| panic!("invalid JSON: {e}\n{json}"));

    assert_eq!(value["buckets"], serde_json::json!(["media", "public"]));
    let policies = value["policies"].as_array().expect("policies array");
    assert_eq!(policies.len(), 2);
    assert_eq!(policies[0]["user"], "bob");
    let bob_actions = policies[0]["document"]["Statement"][0]["Action"]
        .as_array()
        .expect("actions");
    assert!(bob_actions.iter().any(|a| a == "s3:PutObject"));
    assert!(!bob_actions.iter().any(|a| a == "s3:DeleteObject" || a == "s3:*"));
    assert_eq!(
        policies[1]["document"]["Statement"].as_array().map(Vec::len),
        Some(2)
    );
}

#[test]
fn empty_minio_bundle_is_valid_json() {
    let d = desired("s3", vec![], vec![]);
    let json = render_one(&d, NativeTarget::MinioPolicies);
    serde_json::from_str::<serde_json::Value>(&json).expect("valid JSON");
}
