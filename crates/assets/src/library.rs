use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use stagehand_ecs::MaterialId;

use crate::material::{MaterialDesc, MaterialResolver, ResolveError};

/// Errors from material library file operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate material id {0:?}")]
    Duplicate(MaterialId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LibraryEntry {
    id: MaterialId,
    name: String,
    #[serde(default)]
    desc: MaterialDesc,
}

/// Named materials persisted as a JSON list.
///
/// Serves as the material resolver for the desktop and CLI apps. Editing a
/// material returns its id so the caller can forward the "material changed"
/// notification to the viewport.
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    materials: BTreeMap<MaterialId, (String, MaterialDesc)>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a material.
    pub fn set_material(
        &mut self,
        id: MaterialId,
        name: impl Into<String>,
        desc: MaterialDesc,
    ) -> MaterialId {
        self.materials.insert(id, (name.into(), desc));
        id
    }

    pub fn remove(&mut self, id: MaterialId) -> Option<MaterialDesc> {
        self.materials.remove(&id).map(|(_, desc)| desc)
    }

    pub fn get(&self, id: MaterialId) -> Option<&MaterialDesc> {
        self.materials.get(&id).map(|(_, desc)| desc)
    }

    pub fn name(&self, id: MaterialId) -> Option<&str> {
        self.materials.get(&id).map(|(name, _)| name.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = MaterialId> + '_ {
        self.materials.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Save the library to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let entries: Vec<LibraryEntry> = self
            .materials
            .iter()
            .map(|(id, (name, desc))| LibraryEntry {
                id: *id,
                name: name.clone(),
                desc: desc.clone(),
            })
            .collect();
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &entries)?;
        Ok(())
    }

    /// Load a library from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let file = std::fs::File::open(path)?;
        let entries: Vec<LibraryEntry> = serde_json::from_reader(file)?;
        let mut library = Self::new();
        for entry in entries {
            if library.materials.contains_key(&entry.id) {
                return Err(AssetError::Duplicate(entry.id));
            }
            library.set_material(entry.id, entry.name, entry.desc);
        }
        tracing::info!(count = library.len(), "material library loaded");
        Ok(library)
    }
}

impl MaterialResolver for MaterialLibrary {
    fn resolve(&mut self, id: MaterialId) -> Result<MaterialDesc, ResolveError> {
        let desc = self.get(id).ok_or(ResolveError::NotFound(id))?;
        let valid = desc.base_color.is_finite()
            && desc.emissive.is_finite()
            && (0.0..=1.0).contains(&desc.metallic)
            && (0.0..=1.0).contains(&desc.roughness);
        if !valid {
            return Err(ResolveError::Invalid {
                id,
                reason: "parameters out of range".into(),
            });
        }
        Ok(desc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MaterialCache;
    use glam::Vec4;

    fn tinted(r: f32, g: f32, b: f32) -> MaterialDesc {
        MaterialDesc {
            base_color: Vec4::new(r, g, b, 1.0),
            ..MaterialDesc::default()
        }
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut lib = MaterialLibrary::new();
        lib.set_material(MaterialId(1), "red", tinted(1.0, 0.0, 0.0));
        lib.set_material(MaterialId(2), "glass", MaterialDesc {
            transparent: true,
            ..tinted(0.8, 0.9, 1.0)
        });
        lib.save(tmp.path()).unwrap();

        let loaded = MaterialLibrary::load(tmp.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.name(MaterialId(1)), Some("red"));
        assert!(loaded.get(MaterialId(2)).unwrap().transparent);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"[{"id": 4, "name": "plain"}]"#).unwrap();
        let lib = MaterialLibrary::load(tmp.path()).unwrap();
        assert_eq!(lib.get(MaterialId(4)), Some(&MaterialDesc::default()));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"[{"id": 1, "name": "a"}, {"id": 1, "name": "b"}]"#,
        )
        .unwrap();
        assert!(matches!(
            MaterialLibrary::load(tmp.path()),
            Err(AssetError::Duplicate(MaterialId(1)))
        ));
    }

    #[test]
    fn resolve_rejects_invalid_parameters() {
        let mut lib = MaterialLibrary::new();
        lib.set_material(MaterialId(1), "bad", MaterialDesc {
            roughness: 3.0,
            ..MaterialDesc::default()
        });
        assert!(matches!(
            lib.resolve(MaterialId(1)),
            Err(ResolveError::Invalid { .. })
        ));
        assert_eq!(lib.resolve(MaterialId(9)), Err(ResolveError::NotFound(MaterialId(9))));
    }

    #[test]
    fn edit_then_invalidate_reaches_cache() {
        let mut lib = MaterialLibrary::new();
        lib.set_material(MaterialId(1), "m", tinted(1.0, 0.0, 0.0));
        let mut cache = MaterialCache::new(lib);
        assert_eq!(cache.get(MaterialId(1)).desc.base_color.x, 1.0);

        let changed = cache
            .resolver_mut()
            .set_material(MaterialId(1), "m", tinted(0.0, 1.0, 0.0));
        cache.invalidate(changed);
        assert_eq!(cache.get(MaterialId(1)).desc.base_color.y, 1.0);
    }
}
