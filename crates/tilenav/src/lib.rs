//! Tiled navigation mesh query engine
//!
//! Answers shortest-path and path-length queries over a tiled polygon mesh
//! produced by an offline generator. Tiles are decoded from binary blobs and
//! stitched lazily into one cross-tile polygon graph; queries run A* over
//! that graph, pull string paths through the resulting corridors and cast
//! short 2D rays along the surface.
//!
//! The usual request sequence:
//!
//! 1. [`NavMeshQuery::find_nearest_poly`] to localize the endpoints,
//! 2. [`NavMeshQuery::find_path`] for the polygon corridor,
//! 3. [`NavMeshQuery::find_straight_path`] for the polyline.
//!
//! [`Pathfinder`] wraps that sequence together with lazy tile loading
//! through a [`TileLoader`].

pub mod binary_format;
pub mod filter;
pub mod nav_mesh;
pub mod nav_mesh_builder;
pub mod nav_mesh_query;
pub mod node_pool;
pub mod pathfinder;
pub mod poly_query;
pub mod poly_ref;
pub mod status;
pub mod tile;

pub use filter::{DefaultQueryFilter, QueryFilter};
pub use nav_mesh::{NavMesh, NavMeshParams};
pub use nav_mesh_builder::{build_tile_blob, OffMeshParams, TileBuildParams, TilePolygon};
pub use nav_mesh_query::{
    NavMeshQuery, RaycastHit, StraightPathFlags, StraightPathOptions, StraightPathVertex,
};
pub use pathfinder::{Pathfinder, TileLoader};
pub use poly_query::{CollectPolysQuery, FindNearestPolyQuery, PolyQuery};
pub use poly_ref::PolyRef;
pub use status::Status;
pub use tile::{
    MeshHeader, MeshTile, OffMeshConnection, Poly, PolyFlags, PolyType, EXT_LINK, MAX_AREAS,
    NULL_LINK, OFFMESH_CON_BIDIR, VERTS_PER_POLYGON,
};

#[cfg(test)]
mod test_mesh_helpers;


#[cfg(test)]
mod straight_path_tests;
