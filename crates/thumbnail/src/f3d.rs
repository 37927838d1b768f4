use crate::error::{ErrorKind, Result};
use crate::renderer::{RenderOptions, Renderer};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::instrument;

const FLATPAK_APP: &str = "io.github.f3d_app.f3d";

/// The [f3d](https://f3d.app) viewer, driven headless through its CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum F3dRenderer {
    /// A directly executable binary.
    Binary { path: PathBuf },
    /// A Flatpak-installed application.
    Flatpak { flatpak: PathBuf, app_id: String },
}
impl F3dRenderer {
    /// Finds f3d on `PATH`, falling back to a Flatpak installation.
    pub fn discover() -> Result<Self> {
        for exe in ["f3d", "f3d.exe"] {
            if let Ok(path) = which::which(exe) {
                tracing::debug!(path = %path.display(), "Discovered f3d executable");
                return Ok(Self::Binary { path });
            }
        }
        tracing::info!("f3d executable not found in PATH");
        if let Ok(flatpak) = which::which("flatpak") {
            tracing::trace!(flatpak = %flatpak.display(), "Discovered Flatpak on system; searching installed apps");
            if Command::new(&flatpak).args(["info", FLATPAK_APP]).output().is_ok_and(|o| o.status.success()) {
                return Ok(Self::Flatpak { flatpak, app_id: FLATPAK_APP.to_string() });
            }
        } else {
            tracing::info!("Flatpak not found; skipping containerized f3d checks.");
        }
        exn::bail!(ErrorKind::RendererNotFound);
    }

    /// Uses an explicitly configured executable.
    pub fn with_executable(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            exn::bail!(ErrorKind::RendererNotFound);
        }
        Ok(Self::Binary { path })
    }

    fn command(&self) -> Command {
        match self {
            Self::Binary { path } => Command::new(path),
            Self::Flatpak { flatpak, app_id } => {
                let mut command = Command::new(flatpak);
                command.args(["run", "--filesystem=host", app_id.as_str()]);
                command
            },
        }
    }

    fn arguments(model: &Path, options: &RenderOptions, save_to: &Path) -> Vec<String> {
        let mut args = vec![
            model.display().to_string(),
            format!("--output={}", save_to.display()),
            format!("--resolution={},{}", options.size, options.size),
        ];
        if let Some(background) = &options.background {
            args.push(format!("--background-color={background}"));
        }
        if let Some(material) = &options.material {
            args.push(format!("--color={material}"));
        }
        args
    }
}

impl Renderer for F3dRenderer {
    #[instrument(level = "debug", skip(self, options), fields(model = %model.display()))]
    fn render_to(&self, model: &Path, options: &RenderOptions, save_to: &Path) -> Result<()> {
        let output = self
            .command()
            .args(Self::arguments(model, options, save_to))
            .output()
            .or_raise(|| ErrorKind::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(model = %model.display(), stderr = %stderr.trim(), "f3d failed to render model");
            match output.status.code() {
                Some(code) => exn::bail!(ErrorKind::RendererFailed(code)),
                None => exn::bail!(ErrorKind::RendererCrashed),
            }
        }
        if !save_to.is_file() {
            exn::bail!(ErrorKind::NoOutput(save_to.to_path_buf()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        let options = RenderOptions { size: 512, material: Some("0.8,0.1,0.1".into()), background: None };
        let args = F3dRenderer::arguments(Path::new("/m/cube.stl"), &options, Path::new("/t/out.png"));
        assert_eq!(
            args,
            vec!["/m/cube.stl", "--output=/t/out.png", "--resolution=512,512", "--color=0.8,0.1,0.1"]
        );
    }

    #[test]
    fn test_explicit_executable_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = F3dRenderer::with_executable(dir.path().join("f3d")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::RendererNotFound));
    }
}
