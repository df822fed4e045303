//! # sharehost-renderer
//!
//! Tera-based engine that renders protocol-native configuration files
//! (vsftpd, sshd drop-in, smb.conf, MinIO policy bundle) from a
//! [`DesiredConfig`](sharehost_core::DesiredConfig).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sharehost_core::{DesiredConfig, Settings};
//! use sharehost_renderer::{NativeTarget, Renderer};
//!
//! fn render_samba(desired: &DesiredConfig, settings: &Settings) {
//!     if let Ok(renderer) = Renderer::new(settings) {
//!         if let Ok(files) = renderer.render(desired, NativeTarget::Samba, settings) {
//!             for file in files {
//!                 println!("{}: {} bytes", file.path.display(), file.content.len());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::NativeContext;
pub use engine::{NativeTarget, RenderedFile, Renderer, TemplateEngine};
pub use error::RenderError;
