//! Tera rendering engine: [`NativeTarget`] enum and [`Renderer`].
//!
//! # Output mapping (paths come from [`Settings`])
//!
//! | Target        | Output path(s)                                              |
//! |---------------|-------------------------------------------------------------|
//! | Vsftpd        | `ftp.conf`, `ftp.userlist`, `ftp.user_conf_dir/<username>`  |
//! | SftpDropIn    | `sftp.drop_in`                                              |
//! | Samba         | `smb.conf`                                                  |
//! | MinioPolicies | `s3.policy_bundle`                                          |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use sharehost_core::types::DesiredConfig;
use sharehost_core::Settings;

use crate::context::NativeContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/_header.tera", include_str!("templates/_partials/header.tera")),
    ("vsftpd/vsftpd.conf.tera", include_str!("templates/vsftpd/vsftpd.conf.tera")),
    ("vsftpd/userlist.tera", include_str!("templates/vsftpd/userlist.tera")),
    ("vsftpd/user.conf.tera", include_str!("templates/vsftpd/user.conf.tera")),
    ("sshd/sftp.conf.tera", include_str!("templates/sshd/sftp.conf.tera")),
    ("samba/smb.conf.tera", include_str!("templates/samba/smb.conf.tera")),
    ("minio/policies.json.tera", include_str!("templates/minio/policies.json.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() && path.extension().and_then(|s| s.to_str()) == Some("tera") {
            out.push(path);
        }
    }
    Ok(())
}

/// `.tera` files under `dir`, keyed by their path relative to `dir`.
fn load_override_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::with_capacity(files.len());
    for path in files {
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((normalize_template_name(rel), contents));
    }
    Ok(templates)
}

fn build_tera(override_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, content)| (normalize_template_name(Path::new(name)), content.to_string()))
        .collect();
    if let Some(dir) = override_dir {
        templates.extend(load_override_templates(dir)?);
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// NativeTarget
// ---------------------------------------------------------------------------

/// Native configuration formats the adapters install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeTarget {
    Vsftpd,
    SftpDropIn,
    Samba,
    MinioPolicies,
}

impl NativeTarget {
    pub fn all() -> &'static [NativeTarget] {
        &[
            NativeTarget::Vsftpd,
            NativeTarget::SftpDropIn,
            NativeTarget::Samba,
            NativeTarget::MinioPolicies,
        ]
    }

    /// Fixed templates, one per fixed output path. Per-user files come on top.
    pub fn template_names(&self) -> &'static [&'static str] {
        match self {
            NativeTarget::Vsftpd => &["vsftpd/vsftpd.conf.tera", "vsftpd/userlist.tera"],
            NativeTarget::SftpDropIn => &["sshd/sftp.conf.tera"],
            NativeTarget::Samba => &["samba/smb.conf.tera"],
            NativeTarget::MinioPolicies => &["minio/policies.json.tera"],
        }
    }

    /// Fixed output paths, same order as `template_names`.
    pub fn output_paths(&self, settings: &Settings) -> Vec<PathBuf> {
        match self {
            NativeTarget::Vsftpd => vec![settings.ftp.conf.clone(), settings.ftp.userlist.clone()],
            NativeTarget::SftpDropIn => vec![settings.sftp.drop_in.clone()],
            NativeTarget::Samba => vec![settings.smb.conf.clone()],
            NativeTarget::MinioPolicies => vec![settings.s3.policy_bundle.clone()],
        }
    }

    fn per_user_template(&self) -> Option<&'static str> {
        match self {
            NativeTarget::Vsftpd => Some("vsftpd/user.conf.tera"),
            _ => None,
        }
    }
}

/// One rendered file and where it belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub content: String,
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine with optional operator overrides.
///
/// `override_dir` may contain `.tera` files named like the embedded ones
/// (e.g. `samba/smb.conf.tera`) which replace the defaults.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(override_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(TemplateEngine {
            tera: build_tera(override_dir)?,
        })
    }

    /// Render every output file of `target` from `ctx`.
    pub fn render(
        &self,
        ctx: &NativeContext,
        target: NativeTarget,
        settings: &Settings,
    ) -> Result<Vec<RenderedFile>, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let names = target.template_names();
        let paths = target.output_paths(settings);
        debug_assert_eq!(names.len(), paths.len(), "{target:?}");

        let mut results = Vec::with_capacity(names.len() + ctx.users.len());
        for (name, path) in names.iter().zip(paths) {
            results.push(RenderedFile {
                path,
                content: self.tera.render(name, &tera_ctx)?,
            });
        }

        if let Some(user_tpl) = target.per_user_template() {
            for user in &ctx.users {
                let mut user_ctx = tera_ctx.clone();
                user_ctx.insert("user", user);
                results.push(RenderedFile {
                    path: settings.ftp.user_conf_dir.join(&user.username),
                    content: self.tera.render(user_tpl, &user_ctx)?,
                });
            }
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders a [`DesiredConfig`] into native files. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Embedded templates plus overrides from `settings.template_dir`.
    pub fn new(settings: &Settings) -> Result<Self, RenderError> {
        Ok(Renderer {
            engine: TemplateEngine::new(settings.template_dir.as_deref())?,
        })
    }

    pub fn render(
        &self,
        desired: &DesiredConfig,
        target: NativeTarget,
        settings: &Settings,
    ) -> Result<Vec<RenderedFile>, RenderError> {
        let ctx = NativeContext::from_desired(desired, settings);
        self.engine.render(&ctx, target, settings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sharehost_core::types::{
        NativeGrant, PathId, PermissionLevel, ProtocolName, ShareConfig, UserRoot,
    };

    fn desired(protocol: &str) -> DesiredConfig {
        DesiredConfig {
            protocol: ProtocolName::from(protocol),
            port: 21,
            settings: Default::default(),
            storage_root: PathBuf::from("/srv/sharehost"),
            shares: vec![ShareConfig {
                id: PathId::from("p1"),
                name: "Public".into(),
                path: PathBuf::from("/srv/sharehost/public"),
                description: None,
                grants: vec![NativeGrant {
                    username: "admin".into(),
                    level: PermissionLevel::Full,
                    implicit_admin: true,
                }],
            }],
            user_roots: vec![UserRoot {
                username: "admin".into(),
                root: PathBuf::from("/srv/sharehost"),
                level: PermissionLevel::Full,
                is_admin: true,
            }],
        }
    }

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new(&Settings::default()).expect("embedded templates must parse");
    }

    #[test]
    fn every_target_renders() {
        let renderer = Renderer::new(&Settings::default()).unwrap();
        for target in NativeTarget::all() {
            let files = renderer
                .render(&desired("ftp"), *target, &Settings::default())
                .unwrap_or_else(|e| panic!("render failed for {target:?}: {e}"));
            assert!(!files.is_empty(), "{target:?}");
        }
    }

    #[test]
    fn vsftpd_emits_one_file_per_user() {
        let renderer = Renderer::new(&Settings::default()).unwrap();
        let settings = Settings::default();
        let files = renderer
            .render(&desired("ftp"), NativeTarget::Vsftpd, &settings)
            .unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[2].path, settings.ftp.user_conf_dir.join("admin"));
        assert!(files[2].content.contains("local_root=/srv/sharehost"));
        assert!(!files[2].content.contains("cmds_denied"));
    }

    #[test]
    fn output_paths_count_matches_template_count() {
        let settings = Settings::default();
        for target in NativeTarget::all() {
            assert_eq!(
                target.template_names().len(),
                target.output_paths(&settings).len(),
                "{target:?}"
            );
        }
    }

    #[test]
    fn override_dir_replaces_embedded_template() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("samba")).unwrap();
        std::fs::write(dir.path().join("samba/smb.conf.tera"), "# custom {{ port }}\n").unwrap();
        let settings = Settings {
            template_dir: Some(dir.path().to_path_buf()),
            ..Settings::default()
        };
        let renderer = Renderer::new(&settings).unwrap();
        let files = renderer
            .render(&desired("smb"), NativeTarget::Samba, &settings)
            .unwrap();
        assert_eq!(files[0].content, "# custom 21\n");
    }

    #[test]
    fn no_crlf_in_any_rendered_output() {
        let renderer = Renderer::new(&Settings::default()).unwrap();
        for target in NativeTarget::all() {
            for file in renderer
                .render(&desired("ftp"), *target, &Settings::default())
                .unwrap()
            {
                assert!(!file.content.contains('\r'), "{}", file.path.display());
            }
        }
    }
}
