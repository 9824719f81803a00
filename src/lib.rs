//! Adaptive hierarchical Cartesian meshes.
//!
//! A mesh here is a quadtree (2D) or octree (3D) whose leaf cells tile a
//! tensor-product domain, with every leaf independently refinable or
//! coarsenable. The crate exposes the mesh as a numerical object: cell
//! centers, widths and volumes, face and edge coordinates with areas and
//! lengths, and the sparse differential operators (face divergence, edge
//! curl) acting on discrete fields living on those entities. Resolution
//! transitions produce hanging faces and edges; these stay part of the
//! enumeration, flagged per axis, and deflation matrices relate the
//! reduced degree-of-freedom set to the per-cell full enumeration.
//!
//! The pieces, bottom up:
//!
//!  - [`zorder`]: the bijection between (lattice corner, level) pointers
//!    and 64-bit cell ids whose sort order is the canonical traversal.
//!  - [`tree`]: the active leaf set with refine/coarsen/insert primitives
//!    and constant-ish-time neighbor queries across levels.
//!  - [`mesh`]: geometry from per-axis spacings, the numbering pass that
//!    enumerates faces/edges/nodes with hanging classification, operator
//!    assembly, and the [`TreeMesh`] facade with lazily rebuilt caches.
//!
//! ```
//! use treemesh::TreeMesh;
//!
//! // An 8x8 unit domain, refined around a point.
//! let mut mesh = TreeMesh::unit(2, 3).unwrap();
//! mesh.refine(
//!     |cell| {
//!         let (dx, dy) = (cell.center[0] - 0.25, cell.center[1] - 0.25);
//!         if (dx * dx + dy * dy).sqrt() < 0.25 {
//!             3
//!         } else {
//!             1
//!         }
//!     },
//!     true,
//! );
//! let total: f64 = mesh.vol().unwrap().iter().sum();
//! assert!((total - 1.0).abs() < 1e-12);
//! ```

pub mod errors;
pub mod mesh;
pub mod tree;
pub mod zorder;

pub use errors::MeshError;
pub use mesh::{Cell, CellProbe, DeflationKind, Snapshot, TreeMesh};
pub use tree::{CellTree, Neighbor};
pub use zorder::{CellId, Pointer};
