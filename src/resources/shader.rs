//! Shader programs keyed by (vertex path, fragment path)
//!
//! A program is the vertex source followed by the fragment source, compiled
//! as one WGSL module with `vs_main` and `fs_main` entry points. Paths are
//! either `builtin:<name>` or asset-root-relative files. Programs that fail
//! to load or validate are cached as unusable; draws using them are skipped.

use crate::assets::ProjectPaths;
use std::collections::HashMap;
use std::rc::Rc;

pub const BUILTIN_PREFIX: &str = "builtin:";
pub const DEFAULT_VERTEX_SHADER: &str = "builtin:standard.vert";
pub const DEFAULT_FRAGMENT_SHADER: &str = "builtin:standard.frag";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub vertex: String,
    /// Empty for depth-only programs
    pub fragment: String,
}

impl ShaderKey {
    pub fn new(vertex: &str, fragment: &str) -> Self {
        Self {
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
        }
    }

    pub fn has_fragment(&self) -> bool {
        !self.fragment.is_empty()
    }
}

/// A combined, validated shader module
#[derive(Debug)]
pub struct ShaderProgram {
    pub key: ShaderKey,
    pub source: String,
    error: Option<String>,
}

impl ShaderProgram {
    pub fn is_usable(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn label(&self) -> String {
        if self.key.has_fragment() {
            format!("{} + {}", self.key.vertex, self.key.fragment)
        } else {
            self.key.vertex.clone()
        }
    }
}

/// Parse and validate a WGSL module, checking the required entry points
pub fn validate_wgsl(source: &str, needs_fragment: bool) -> Result<(), String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| e.to_string())?;

    let has_entry = |stage: naga::ShaderStage, name: &str| {
        module
            .entry_points
            .iter()
            .any(|ep| ep.stage == stage && ep.name == name)
    };
    if !has_entry(naga::ShaderStage::Vertex, "vs_main") {
        return Err("missing @vertex fn vs_main".into());
    }
    if needs_fragment && !has_entry(naga::ShaderStage::Fragment, "fs_main") {
        return Err("missing @fragment fn fs_main".into());
    }
    Ok(())
}

/// Resolve-and-cache map of shader programs
pub struct ShaderManager {
    builtins: HashMap<String, &'static str>,
    cache: HashMap<ShaderKey, Rc<ShaderProgram>>,
}

impl Default for ShaderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderManager {
    /// Manager with the renderer's built-in sources registered
    pub fn new() -> Self {
        let mut manager = Self {
            builtins: HashMap::new(),
            cache: HashMap::new(),
        };
        for (name, source) in crate::render::builtin_shader_sources() {
            manager.register_builtin(name, source);
        }
        manager
    }

    pub fn register_builtin(&mut self, name: &str, source: &'static str) {
        self.builtins.insert(name.to_string(), source);
    }

    fn read_source(&self, paths: &ProjectPaths, path: &str) -> Result<String, String> {
        if let Some(name) = path.strip_prefix(BUILTIN_PREFIX) {
            return self
                .builtins
                .get(name)
                .map(|s| s.to_string())
                .ok_or_else(|| format!("no built-in shader named {}", name));
        }
        let absolute = paths.to_absolute(path);
        std::fs::read_to_string(&absolute).map_err(|e| format!("{}: {}", absolute.display(), e))
    }

    /// Program for the pair, loading and validating it on first use
    pub fn get(&mut self, paths: &ProjectPaths, vertex: &str, fragment: &str) -> Rc<ShaderProgram> {
        let key = ShaderKey::new(vertex, fragment);
        if let Some(program) = self.cache.get(&key) {
            return program.clone();
        }

        let mut source = String::new();
        let mut error = None;
        match self.read_source(paths, vertex) {
            Ok(s) => source.push_str(&s),
            Err(e) => error = Some(e),
        }
        if key.has_fragment() && error.is_none() {
            match self.read_source(paths, fragment) {
                Ok(s) => {
                    source.push('\n');
                    source.push_str(&s);
                }
                Err(e) => error = Some(e),
            }
        }
        if error.is_none() {
            error = validate_wgsl(&source, key.has_fragment()).err();
        }

        let program = Rc::new(ShaderProgram { key: key.clone(), source, error });
        match program.error() {
            Some(e) => log::error!("Shader {} failed to compile: {}", program.label(), e),
            None => log::debug!("Compiled shader {}", program.label()),
        }
        self.cache.insert(key, program.clone());
        program
    }

    /// Drop a cached program so it is reloaded from disk on next use
    pub fn invalidate(&mut self, vertex: &str, fragment: &str) {
        self.cache.remove(&ShaderKey::new(vertex, fragment));
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER)]
    #[case("builtin:shadow.vert", "")]
    #[case("builtin:skybox.vert", "builtin:skybox.frag")]
    #[case("builtin:brdf_lut.vert", "builtin:brdf_lut.frag")]
    fn builtin_programs_validate(#[case] vertex: &str, #[case] fragment: &str) {
        let mut shaders = ShaderManager::new();
        let program = shaders.get(&ProjectPaths::rooted_at("/"), vertex, fragment);
        assert!(program.is_usable(), "{:?}", program.error());
    }

    #[test]
    fn broken_source_is_cached_as_unusable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.frag.wgsl"), "fn fs_main( {").unwrap();
        let paths = ProjectPaths::rooted_at(dir.path());
        let mut shaders = ShaderManager::new();

        let program = shaders.get(&paths, DEFAULT_VERTEX_SHADER, "bad.frag.wgsl");
        assert!(!program.is_usable());
        let again = shaders.get(&paths, DEFAULT_VERTEX_SHADER, "bad.frag.wgsl");
        assert!(Rc::ptr_eq(&program, &again));
        assert_eq!(shaders.cached_count(), 1);
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let source = "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
        assert!(validate_wgsl(source, true).unwrap_err().contains("vs_main"));
    }
}
