//! Project file and path conversion

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// On-disk project description
///
/// Both paths are relative to the directory holding the project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub name: String,
    #[serde(default = "default_asset_root")]
    pub asset_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_scene: Option<String>,
}

fn default_asset_root() -> String {
    "Assets".to_string()
}

impl ProjectFile {
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Converts between absolute paths and asset-root-relative paths
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPaths {
    project_dir: PathBuf,
    asset_root: PathBuf,
}

impl ProjectPaths {
    pub fn new(project_dir: impl Into<PathBuf>, asset_root: &str) -> Self {
        let project_dir = project_dir.into();
        let asset_root = normalize(&project_dir.join(asset_root));
        Self {
            project_dir,
            asset_root,
        }
    }

    /// Paths for a project file located at `project_path`
    pub fn for_project(project_path: &Path, file: &ProjectFile) -> Self {
        let dir = project_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(dir, &file.asset_root)
    }

    /// Paths rooted directly at `root`, used when no project file is open
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            asset_root: root.clone(),
            project_dir: root,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Resolve a path relative to the asset root. Absolute paths pass through.
    pub fn to_absolute(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            normalize(relative)
        } else {
            normalize(&self.asset_root.join(relative))
        }
    }

    /// Asset-root-relative form with `/` separators, or `None` outside the root
    pub fn to_project_relative(&self, absolute: impl AsRef<Path>) -> Option<String> {
        let absolute = normalize(absolute.as_ref());
        let relative = absolute.strip_prefix(&self.asset_root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Start scene of the project, if it names one
    pub fn start_scene(&self, file: &ProjectFile) -> Option<PathBuf> {
        file.start_scene
            .as_ref()
            .map(|scene| normalize(&self.project_dir.join(scene)))
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_round_trip() {
        let paths = ProjectPaths::new("/projects/demo", "Assets");
        let abs = paths.to_absolute("Textures/brick.png");
        assert_eq!(abs, PathBuf::from("/projects/demo/Assets/Textures/brick.png"));
        assert_eq!(
            paths.to_project_relative(&abs).as_deref(),
            Some("Textures/brick.png")
        );
        assert_eq!(paths.to_project_relative("/elsewhere/file.png"), None);
    }

    #[test]
    fn dot_segments_are_resolved() {
        let paths = ProjectPaths::new("/projects/demo", "./Assets");
        assert_eq!(
            paths.to_absolute("Materials/../Textures/a.png"),
            PathBuf::from("/projects/demo/Assets/Textures/a.png")
        );
    }

    #[test]
    fn project_file_defaults() {
        let file: ProjectFile = serde_json::from_str(r#"{ "name": "Demo" }"#).unwrap();
        assert_eq!(file.asset_root, "Assets");
        let paths = ProjectPaths::for_project(Path::new("/p/demo.project.json"), &file);
        assert_eq!(paths.asset_root(), Path::new("/p/Assets"));
        assert_eq!(paths.start_scene(&file), None);
    }
}
