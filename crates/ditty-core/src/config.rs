// SPDX-License-Identifier: CEPL-1.0
//! `ditty.toml` loading.
//!
//! Every field has a default, so a missing file or a file that only sets a
//! couple of keys is valid. Unknown keys are ignored.

use serde::Deserialize;
use std::{fmt, fs, io, path::Path, path::PathBuf, str::FromStr};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "ditty.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown backend `{0}` (expected one of: vk, gl, d3d11, d3d12, metal)")]
    UnknownBackend(String),
}

/// Config and CLI both go through `FromStr`, so names match the same way in
/// either place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum BackendKind {
    #[default]
    Vk,
    Gl,
    D3d11,
    D3d12,
    Metal,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Vk => "vk",
            BackendKind::Gl => "gl",
            BackendKind::D3d11 => "d3d11",
            BackendKind::D3d12 => "d3d12",
            BackendKind::Metal => "metal",
        }
    }

    /// Whether this build carries the backend at all.
    pub fn is_available(self) -> bool {
        match self {
            BackendKind::Vk | BackendKind::Gl => true,
            BackendKind::D3d11 | BackendKind::D3d12 => cfg!(windows),
            BackendKind::Metal => cfg!(target_os = "macos"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vk" | "vulkan" => Ok(BackendKind::Vk),
            "gl" | "opengl" => Ok(BackendKind::Gl),
            "d3d11" => Ok(BackendKind::D3d11),
            "d3d12" => Ok(BackendKind::D3d12),
            "metal" | "mtl" => Ok(BackendKind::Metal),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClearMode {
    /// New random color every frame.
    #[default]
    Random,
    Fixed,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "ditty".to_string(),
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub backend: BackendKind,
    pub clear: ClearMode,
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    /// Debug layers / validation. Ignored in release builds.
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            backend: BackendKind::Vk,
            clear: ClearMode::Random,
            clear_color: default_clear(),
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            validation: true,
        }
    }
}

pub fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    /// Loads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse_at(&s, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("{} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Self::parse_at(s, Path::new("<string>"))
    }

    fn parse_at(s: &str, path: &Path) -> Result<Self, ConfigError> {
        let parse_err = |source: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let table: toml::Table = toml::from_str(s).map_err(parse_err)?;

        // Checked up front so a bad name surfaces as `UnknownBackend` rather
        // than a generic parse error.
        if let Some(name) = table
            .get("render")
            .and_then(|r| r.get("backend"))
            .and_then(toml::Value::as_str)
        {
            name.parse::<BackendKind>()?;
        }

        toml::Value::Table(table).try_into().map_err(parse_err)
    }

    /// Validation only applies to debug builds.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.render.validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 480);
        assert_eq!(cfg.render.backend, BackendKind::Vk);
        assert_eq!(cfg.render.clear, ClearMode::Random);
        assert!(cfg.render.vsync);
    }

    #[test]
    fn partial_render_table_keeps_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [render]
            backend = "gl"
            clear = "fixed"
            clear_color = [1.0, 0.0, 0.5, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.backend, BackendKind::Gl);
        assert_eq!(cfg.render.clear, ClearMode::Fixed);
        assert_eq!(cfg.render.clear_color, [1.0, 0.0, 0.5, 1.0]);
        assert_eq!(cfg.render.vsync_mode, VsyncMode::Mailbox);
        assert_eq!(cfg.window, WindowCfg::default());
    }

    #[test]
    fn backend_aliases_in_toml() {
        let cfg = AppCfg::parse("[render]\nbackend = \"vulkan\"").unwrap();
        assert_eq!(cfg.render.backend, BackendKind::Vk);
        let cfg = AppCfg::parse("[render]\nbackend = \"d3d12\"").unwrap();
        assert_eq!(cfg.render.backend, BackendKind::D3d12);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(AppCfg::parse("[render\nvsync = ").is_err());
        assert!(AppCfg::parse("[render]\nvsync = \"yes\"").is_err());
    }

    #[test]
    fn backend_from_str() {
        assert_eq!("VK".parse::<BackendKind>().unwrap(), BackendKind::Vk);
        assert_eq!(" opengl ".parse::<BackendKind>().unwrap(), BackendKind::Gl);
        assert_eq!("d3d11".parse::<BackendKind>().unwrap(), BackendKind::D3d11);
        assert_eq!("Metal".parse::<BackendKind>().unwrap(), BackendKind::Metal);
        let err = "dx9".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(ref s) if s == "dx9"));
    }

    #[test]
    fn backend_display_round_trips_through_from_str() {
        for kind in [
            BackendKind::Vk,
            BackendKind::Gl,
            BackendKind::D3d11,
            BackendKind::D3d12,
            BackendKind::Metal,
        ] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn direct3d_only_on_windows() {
        assert!(BackendKind::Vk.is_available());
        assert!(BackendKind::Gl.is_available());
        assert_eq!(BackendKind::D3d12.is_available(), cfg!(windows));
        assert_eq!(BackendKind::Metal.is_available(), cfg!(target_os = "macos"));
    }

    #[test]
    fn config_backend_names_match_cli_names() {
        for name in ["VK", " Vulkan ", "OpenGL", "D3D12", "mtl"] {
            let cfg = AppCfg::parse(&format!("[render]\nbackend = \"{name}\"")).unwrap();
            assert_eq!(cfg.render.backend, name.parse::<BackendKind>().unwrap());
        }
    }

    #[test]
    fn unknown_backend_in_config_is_typed() {
        let err = AppCfg::parse("[render]\nbackend = \"dx9\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(ref s) if s == "dx9"));
    }

    #[test]
    fn load_reports_unknown_backend() {
        let path = std::env::temp_dir().join(format!(
            "ditty-config-backend-test-{}.toml",
            std::process::id()
        ));
        fs::write(&path, "[render]\nbackend = \"glide\"\n").unwrap();
        let err = AppCfg::load(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, ConfigError::UnknownBackend(ref s) if s == "glide"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("ditty-config-test-does-not-exist.toml");
        let cfg = AppCfg::load(&path).unwrap();
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let path = std::env::temp_dir().join(format!("ditty-config-test-{}.toml", std::process::id()));
        fs::write(&path, "[window]\nwidth = -3\n").unwrap();
        let err = AppCfg::load(&path).unwrap_err();
        fs::remove_file(&path).ok();
        match err {
            ConfigError::Parse { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
