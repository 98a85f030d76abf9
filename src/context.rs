//! Explicit engine context passed to everything that resolves assets

use crate::assets::{AssetDatabase, ProjectFile, ProjectPaths};
use crate::backend::GraphicsBackend;
use crate::error::EngineResult;
use crate::render::graveyard::ResourceGraveyard;
use crate::resources::{MaterialManager, MeshManager, ShaderManager, TextureManager};
use std::path::{Path, PathBuf};

/// Project paths, asset index and resource caches of one open project
pub struct EngineContext {
    pub paths: ProjectPaths,
    pub assets: AssetDatabase,
    pub shaders: ShaderManager,
    pub textures: TextureManager,
    pub materials: MaterialManager,
    pub meshes: MeshManager,
}

impl EngineContext {
    pub fn new(paths: ProjectPaths, assets: AssetDatabase) -> Self {
        Self {
            paths,
            assets,
            shaders: ShaderManager::new(),
            textures: TextureManager::new(),
            materials: MaterialManager::new(),
            meshes: MeshManager::new(),
        }
    }

    /// Context with no project: paths resolve under `root`, the asset index is empty
    pub fn without_project(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::new(ProjectPaths::rooted_at(root.clone()), AssetDatabase::new(root))
    }

    /// Open a project file and index its asset root
    pub fn open_project(project_path: &Path) -> EngineResult<(Self, ProjectFile)> {
        let file = ProjectFile::load(project_path)?;
        let paths = ProjectPaths::for_project(project_path, &file);
        let assets = AssetDatabase::scan(paths.asset_root())?;
        log::info!("Opened project '{}' ({} assets)", file.name, assets.len());
        Ok((Self::new(paths, assets), file))
    }

    /// Release every cached GPU object
    pub fn dispose<B: GraphicsBackend>(&mut self, backend: &mut B) {
        let mut graveyard = ResourceGraveyard::new();
        self.textures.dispose(&mut graveyard);
        graveyard.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_project_indexes_assets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Assets/Materials")).unwrap();
        std::fs::write(dir.path().join("Assets/Materials/a.mat.json"), "{}").unwrap();
        let project_path = dir.path().join("demo.project.json");
        ProjectFile {
            name: "Demo".into(),
            asset_root: "Assets".into(),
            start_scene: Some("Assets/main.scene.json".into()),
        }
        .save(&project_path)
        .unwrap();

        let (ctx, file) = EngineContext::open_project(&project_path).unwrap();
        assert_eq!(file.name, "Demo");
        assert_eq!(ctx.assets.len(), 1);
        assert_eq!(
            ctx.paths.start_scene(&file).unwrap(),
            dir.path().join("Assets/main.scene.json")
        );
    }
}
