//! Material and mesh resolution for the viewport.
//!
//! Resources are requested by id every frame; the caches here make those
//! lookups O(1) and total: a requested id always yields a usable resource,
//! falling back to a white material or a cube primitive when the external
//! collaborator cannot provide one.
//!
//! # Invariants
//! - A previously requested material id is never absent from the cache.
//! - A failing load is cached as its fallback and not retried every frame.
//! - Custom meshes are loaded at most once per (mesh, submesh) key.

mod library;
mod material;
mod mesh;
mod primitives;

pub use library::{AssetError, MaterialLibrary};
pub use material::{
    CacheStats, MaterialCache, MaterialDesc, MaterialResolver, MaterialRuntime, MaterialTextures,
    ResolveError, ShadingMode, TextureHandle,
};
pub use mesh::{
    GeometryHandle, GeometrySlot, MeshCache, MeshData, MeshProvider, MeshVertex, NoMeshProvider,
};
pub use primitives::{DEFAULT_CUSTOM_RADIUS, GeometryDescriptor, PrimitiveLibrary};
