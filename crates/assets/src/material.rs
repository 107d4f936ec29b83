use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use stagehand_ecs::MaterialId;

/// Opaque texture reference owned by the external asset system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadingMode {
    #[default]
    Lit,
    Unlit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaterialTextures {
    pub albedo: Option<TextureHandle>,
    pub normal: Option<TextureHandle>,
    pub metallic_roughness: Option<TextureHandle>,
    pub emissive: Option<TextureHandle>,
}

/// What a resolver hands back for a material id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialDesc {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub textures: MaterialTextures,
    pub shading: ShadingMode,
    /// Drawn in the transparent pass, sorted back to front.
    pub transparent: bool,
}

impl Default for MaterialDesc {
    /// The "default/white" material, also used as the fallback.
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            textures: MaterialTextures::default(),
            shading: ShadingMode::Lit,
            transparent: false,
        }
    }
}

/// A resolved material as the render passes consume it.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRuntime {
    pub id: MaterialId,
    pub desc: MaterialDesc,
    /// True when the resolver failed and this is the white fallback.
    pub is_fallback: bool,
    /// Bumped on every reload so backends can refresh uploaded parameters.
    pub generation: u32,
}

impl MaterialRuntime {
    pub fn is_transparent(&self) -> bool {
        self.desc.transparent
    }
}

/// Errors a material resolver can report.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("material {0:?} not found")]
    NotFound(MaterialId),
    #[error("material {id:?} is invalid: {reason}")]
    Invalid { id: MaterialId, reason: String },
}

/// The material-resolve callback supplied by the asset system.
pub trait MaterialResolver {
    fn resolve(&mut self, id: MaterialId) -> Result<MaterialDesc, ResolveError>;
}

impl<F> MaterialResolver for F
where
    F: FnMut(MaterialId) -> Result<MaterialDesc, ResolveError>,
{
    fn resolve(&mut self, id: MaterialId) -> Result<MaterialDesc, ResolveError> {
        self(id)
    }
}

/// Counters for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub loads: u64,
    pub failures: u64,
}

#[derive(Debug)]
struct Entry {
    runtime: Arc<MaterialRuntime>,
    stale: bool,
}

/// Material id → resolved runtime, with explicit invalidation.
///
/// Not thread-safe by intent; owned and used by the render thread only.
#[derive(Debug)]
pub struct MaterialCache<R> {
    resolver: R,
    entries: HashMap<MaterialId, Entry>,
    stats: CacheStats,
}

impl<R: MaterialResolver> MaterialCache<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Resolved material for `id`, loading on a miss or a stale entry.
    /// Never fails: a resolver error caches the white fallback.
    pub fn get(&mut self, id: MaterialId) -> Arc<MaterialRuntime> {
        if let Some(entry) = self.entries.get(&id) {
            if !entry.stale {
                self.stats.hits += 1;
                return Arc::clone(&entry.runtime);
            }
        }

        let generation = self
            .entries
            .get(&id)
            .map_or(0, |e| e.runtime.generation.wrapping_add(1));
        self.stats.loads += 1;
        let runtime = match self.resolver.resolve(id) {
            Ok(desc) => MaterialRuntime {
                id,
                desc,
                is_fallback: false,
                generation,
            },
            Err(err) => {
                self.stats.failures += 1;
                tracing::warn!(?id, %err, "material resolve failed, using fallback");
                MaterialRuntime {
                    id,
                    desc: MaterialDesc::default(),
                    is_fallback: true,
                    generation,
                }
            }
        };
        let runtime = Arc::new(runtime);
        self.entries.insert(
            id,
            Entry {
                runtime: Arc::clone(&runtime),
                stale: false,
            },
        );
        runtime
    }

    /// "Material changed" notification: the next `get` reloads this entry.
    /// Returns false when the id was never requested.
    pub fn invalidate(&mut self, id: MaterialId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.stale = true;
                tracing::debug!(?id, "material invalidated");
                true
            }
            None => false,
        }
    }

    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stale = true;
        }
    }

    /// Cached runtime without triggering a load (may be stale).
    pub fn peek(&self, id: MaterialId) -> Option<&Arc<MaterialRuntime>> {
        self.entries.get(&id).map(|e| &e.runtime)
    }

    pub fn is_stale(&self, id: MaterialId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.stale)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn red() -> MaterialDesc {
        MaterialDesc {
            base_color: Vec4::new(1.0, 0.0, 0.0, 1.0),
            ..MaterialDesc::default()
        }
    }

    #[derive(Default)]
    struct MapResolver {
        materials: HashMap<MaterialId, MaterialDesc>,
        calls: usize,
    }

    impl MaterialResolver for MapResolver {
        fn resolve(&mut self, id: MaterialId) -> Result<MaterialDesc, ResolveError> {
            self.calls += 1;
            self.materials
                .get(&id)
                .cloned()
                .ok_or(ResolveError::NotFound(id))
        }
    }

    #[test]
    fn hit_after_first_load() {
        let mut resolver = MapResolver::default();
        resolver.materials.insert(MaterialId(1), red());
        let mut cache = MaterialCache::new(resolver);

        let a = cache.get(MaterialId(1));
        let b = cache.get(MaterialId(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.resolver().calls, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn failure_caches_fallback_once() {
        let mut cache = MaterialCache::new(MapResolver::default());
        for _ in 0..5 {
            let m = cache.get(MaterialId(42));
            assert!(m.is_fallback);
            assert_eq!(m.desc.base_color, Vec4::ONE);
        }
        assert_eq!(cache.resolver().calls, 1);
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn every_requested_id_stays_present() {
        let mut resolver = MapResolver::default();
        resolver.materials.insert(MaterialId(1), red());
        let mut cache = MaterialCache::new(resolver);
        for id in 0..10 {
            cache.get(MaterialId(id));
        }
        for id in 0..10 {
            assert!(cache.peek(MaterialId(id)).is_some());
        }
        cache.invalidate_all();
        for id in 0..10 {
            assert!(cache.peek(MaterialId(id)).is_some());
        }
    }

    #[test]
    fn invalidate_reloads_updated_parameters() {
        let mut resolver = MapResolver::default();
        resolver.materials.insert(MaterialId(1), red());
        let mut cache = MaterialCache::new(resolver);
        assert_eq!(cache.get(MaterialId(1)).desc.base_color.x, 1.0);

        cache
            .resolver_mut()
            .materials
            .insert(MaterialId(1), MaterialDesc {
                base_color: Vec4::new(0.0, 0.0, 1.0, 1.0),
                ..MaterialDesc::default()
            });
        // Without invalidation the old parameters are kept.
        assert_eq!(cache.get(MaterialId(1)).desc.base_color.x, 1.0);

        assert!(cache.invalidate(MaterialId(1)));
        assert!(cache.is_stale(MaterialId(1)));
        let reloaded = cache.get(MaterialId(1));
        assert_eq!(reloaded.desc.base_color.z, 1.0);
        assert_eq!(reloaded.generation, 1);
    }

    #[test]
    fn invalidate_only_touches_one_entry() {
        let mut resolver = MapResolver::default();
        resolver.materials.insert(MaterialId(1), red());
        resolver.materials.insert(MaterialId(2), red());
        let mut cache = MaterialCache::new(resolver);
        cache.get(MaterialId(1));
        cache.get(MaterialId(2));
        cache.invalidate(MaterialId(1));
        assert!(cache.is_stale(MaterialId(1)));
        assert!(!cache.is_stale(MaterialId(2)));
        assert!(!cache.invalidate(MaterialId(99)));
    }

    #[test]
    fn closure_resolver() {
        let mut cache = MaterialCache::new(|id: MaterialId| {
            if id.0 == 7 {
                Ok(MaterialDesc {
                    transparent: true,
                    ..MaterialDesc::default()
                })
            } else {
                Err(ResolveError::NotFound(id))
            }
        });
        assert!(cache.get(MaterialId(7)).is_transparent());
        assert!(cache.get(MaterialId(8)).is_fallback);
    }
}
