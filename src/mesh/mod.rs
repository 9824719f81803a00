//! The user-facing mesh: per-axis spacings plus a refinement tree, with
//! lazily rebuilt enumeration artifacts and sparse operators on top.
//!
//! A mesh is mutated through refine/coarsen/insert calls and read through
//! accessors that force the numbering on first use. Any successful
//! mutation bumps the structural version and drops every cached artifact;
//! failed mutations leave both the leaf set and the caches untouched.

use std::cell::OnceCell;
use std::sync::Arc;

use nalgebra_sparse::csr::CsrMatrix;
use ndarray::Array2;

use crate::errors::MeshError;
use crate::tree::{CellTree, Neighbor};
use crate::zorder::{CellId, Pointer};

pub(crate) mod geometry;
pub(crate) mod numbering;
pub(crate) mod operators;

#[cfg(test)]
pub(crate) mod testing;

use geometry::Axes;
use numbering::Numbering;
pub use operators::DeflationKind;

/// What a refinement predicate sees for one cell: its geometric center
/// (trailing coordinates zero in 2D) and its current level. The predicate
/// returns the level it wants the cell refined to; returning anything at
/// or below the current level leaves the cell alone.
#[derive(Debug, Clone, Copy)]
pub struct CellProbe {
    pub center: [f64; 3],
    pub level: u32,
}

/// An adaptively refined tensor-product mesh in two or three dimensions.
///
/// # Examples
///
/// ```
/// use treemesh::TreeMesh;
///
/// let mut mesh = TreeMesh::new(vec![vec![0.25; 4], vec![0.25; 4]], 2).unwrap();
/// mesh.refine_to(1);
/// assert_eq!(mesh.n_cells(), 4);
/// assert_eq!(mesh.cell(0).unwrap().center(), vec![0.25, 0.25]);
/// ```
pub struct TreeMesh {
    axes: Axes,
    tree: CellTree,
    version: u64,
    numbering: OnceCell<Arc<Numbering>>,
    div: OnceCell<CsrMatrix<f64>>,
    curl: OnceCell<CsrMatrix<f64>>,
}

impl TreeMesh {
    /// Builds a mesh covering the tensor-product domain described by the
    /// per-axis spacing vectors, each of length `2^levels`, starting from
    /// the single root cell.
    pub fn new(h: Vec<Vec<f64>>, levels: u32) -> Result<TreeMesh, MeshError> {
        let axes = Axes::new(h, levels)?;
        let tree = CellTree::new(axes.dim(), levels);
        Ok(TreeMesh {
            axes,
            tree,
            version: 0,
            numbering: OnceCell::new(),
            div: OnceCell::new(),
            curl: OnceCell::new(),
        })
    }

    /// Convenience constructor for a uniform unit-domain mesh with `2^levels`
    /// cells per axis.
    pub fn unit(dim: usize, levels: u32) -> Result<TreeMesh, MeshError> {
        if dim != 2 && dim != 3 {
            return Err(MeshError::InvalidSpec(format!(
                "expected 2 or 3 axes, got {dim}"
            )));
        }
        let n = 1usize << levels;
        let h = vec![vec![1.0 / n as f64; n]; dim];
        TreeMesh::new(h, levels)
    }

    pub fn dim(&self) -> usize {
        self.axes.dim()
    }

    pub fn levels(&self) -> u32 {
        self.tree.levels()
    }

    /// Monotonic counter bumped by every successful structural mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Total volume of the tensor-product domain.
    pub fn domain_volume(&self) -> f64 {
        (0..self.dim()).map(|d| self.axes.domain_extent(d)).product()
    }

    pub fn spacings(&self, axis: usize) -> &[f64] {
        self.axes.spacings(axis)
    }

    // -- id plumbing ----------------------------------------------------

    /// Packs a pointer into its cell id.
    pub fn index(&self, pointer: &Pointer) -> CellId {
        self.tree.index(pointer)
    }

    /// Unpacks a cell id.
    pub fn pointer(&self, id: CellId) -> Pointer {
        self.tree.pointer(id)
    }

    pub fn contains(&self, pointer: &Pointer) -> bool {
        self.tree.contains(pointer)
    }

    pub fn contains_id(&self, id: CellId) -> bool {
        self.tree.contains_id(id)
    }

    /// The neighbor across a face; see [`CellTree::next_cell`].
    pub fn next_cell(&self, pointer: &Pointer, axis: usize, positive: bool) -> Option<Neighbor> {
        self.tree.next_cell(pointer, axis, positive)
    }

    pub fn is_balanced(&self) -> bool {
        self.tree.is_balanced()
    }

    // -- mutation -------------------------------------------------------

    fn invalidate(&mut self) {
        self.version += 1;
        self.numbering = OnceCell::new();
        self.div = OnceCell::new();
        self.curl = OnceCell::new();
    }

    /// Splits one leaf into its `2^D` children.
    pub fn refine_cell(&mut self, pointer: &Pointer) -> Result<Vec<CellId>, MeshError> {
        let added = self.tree.refine_cell(pointer)?;
        self.invalidate();
        Ok(added)
    }

    /// Merges a full sibling group back into its parent.
    pub fn coarsen_cell(&mut self, pointer: &Pointer) -> Result<CellId, MeshError> {
        let parent = self.tree.coarsen_cell(pointer)?;
        self.invalidate();
        Ok(parent)
    }

    /// Admits every listed cell as a leaf by splitting the ancestors that
    /// cover it. All pointers are validated before the first split.
    pub fn insert_cells(&mut self, pointers: &[Pointer]) -> Result<(), MeshError> {
        for p in pointers {
            if !self.tree.is_valid_pointer(p) {
                return Err(MeshError::OutOfBounds {
                    pointer: *p,
                    reason: "not a representable cell",
                });
            }
        }
        let before = self.tree.len();
        for p in pointers {
            self.tree.insert_cell(p)?;
        }
        if self.tree.len() != before {
            self.invalidate();
        }
        Ok(())
    }

    /// [`insert_cells`](Self::insert_cells) over precomputed leaf ids.
    pub fn insert_cell_ids(&mut self, ids: &[CellId]) -> Result<(), MeshError> {
        let pointers: Vec<Pointer> = ids.iter().map(|&id| self.tree.pointer(id)).collect();
        self.insert_cells(&pointers)
    }

    fn probe(&self, pointer: &Pointer) -> CellProbe {
        let w = self.tree.width(pointer.level);
        CellProbe {
            center: self.axes.center(pointer, w),
            level: pointer.level,
        }
    }

    /// Refines every leaf whose requested level (as returned by the
    /// predicate) exceeds its current level; with `recursive`, newly
    /// created cells are re-examined until the mesh is quiescent.
    pub fn refine<F>(&mut self, mut target: F, recursive: bool)
    where
        F: FnMut(&CellProbe) -> u32,
    {
        let mut cells = self.tree.leaf_ids();
        let mut mutated = false;
        loop {
            let mut added = Vec::new();
            for &id in &cells {
                let ptr = self.tree.pointer(id);
                if ptr.level >= self.tree.levels() {
                    continue;
                }
                if target(&self.probe(&ptr)) > ptr.level {
                    if let Ok(new) = self.tree.refine_cell(&ptr) {
                        added.extend(new);
                        mutated = true;
                    }
                }
            }
            if !recursive || added.is_empty() {
                break;
            }
            added.sort_unstable();
            cells = added;
        }
        if mutated {
            log::trace!("refine pass grew the mesh to {} leaves", self.tree.len());
            self.invalidate();
        }
    }

    /// Refines every cell to the given level.
    pub fn refine_to(&mut self, level: u32) {
        self.refine(|_| level, true);
    }

    /// Coarsens sibling groups whose requested level (evaluated at the
    /// parent's center) lies below their current level, repeatedly when
    /// `recursive`.
    pub fn coarsen<F>(&mut self, mut target: F, recursive: bool)
    where
        F: FnMut(&CellProbe) -> u32,
    {
        let mut mutated = false;
        loop {
            let mut changed = false;
            for id in self.tree.leaf_ids() {
                if !self.tree.contains_id(id) {
                    continue;
                }
                let ptr = self.tree.pointer(id);
                if ptr.level == 0 {
                    continue;
                }
                let parent = self.tree.parent(&ptr);
                if target(&self.probe(&parent)) < ptr.level
                    && self.tree.coarsen_cell(&ptr).is_ok()
                {
                    changed = true;
                    mutated = true;
                }
            }
            if !recursive || !changed {
                break;
            }
        }
        if mutated {
            self.invalidate();
        }
    }

    // -- enumeration ----------------------------------------------------

    pub(crate) fn numbering(&self) -> Result<&Numbering, MeshError> {
        if let Some(nm) = self.numbering.get() {
            return Ok(nm.as_ref());
        }
        let built = Arc::new(Numbering::build(&self.axes, &self.tree)?);
        Ok(self.numbering.get_or_init(|| built).as_ref())
    }

    /// Forces construction of the face/edge/node enumeration. Idempotent.
    pub fn number(&self) -> Result<(), MeshError> {
        self.numbering().map(|_| ())
    }

    /// An immutable, shareable view of the current enumeration for
    /// downstream readers.
    pub fn snapshot(&self) -> Result<Snapshot, MeshError> {
        self.numbering()?;
        let numbering = self
            .numbering
            .get()
            .cloned()
            .expect("numbering was just built");
        Ok(Snapshot {
            version: self.version,
            numbering,
        })
    }

    // -- counts ---------------------------------------------------------

    /// Number of active leaf cells.
    pub fn n_cells(&self) -> usize {
        self.tree.len()
    }

    pub fn n_faces(&self) -> Result<usize, MeshError> {
        Ok(self.numbering()?.n_faces())
    }

    pub fn n_faces_x(&self) -> Result<usize, MeshError> {
        Ok(self.numbering()?.f_count[0])
    }

    pub fn n_faces_y(&self) -> Result<usize, MeshError> {
        Ok(self.numbering()?.f_count[1])
    }

    pub fn n_faces_z(&self) -> Result<usize, MeshError> {
        self.require_3d("z faces")?;
        Ok(self.numbering()?.f_count[2])
    }

    pub fn n_edges(&self) -> Result<usize, MeshError> {
        Ok(self.numbering()?.n_edges())
    }

    pub fn n_edges_x(&self) -> Result<usize, MeshError> {
        Ok(self.numbering()?.e_count[0])
    }

    pub fn n_edges_y(&self) -> Result<usize, MeshError> {
        Ok(self.numbering()?.e_count[1])
    }

    pub fn n_edges_z(&self) -> Result<usize, MeshError> {
        self.require_3d("z edges")?;
        Ok(self.numbering()?.e_count[2])
    }

    pub fn n_nodes(&self) -> Result<usize, MeshError> {
        Ok(self.numbering()?.n_nodes())
    }

    fn require_3d(&self, what: &str) -> Result<(), MeshError> {
        if self.dim() != 3 {
            return Err(MeshError::Unsupported(format!(
                "{what} exist on 3D meshes only"
            )));
        }
        Ok(())
    }

    // -- measures and grids --------------------------------------------

    /// Leaf volumes in canonical order.
    pub fn vol(&self) -> Result<&[f64], MeshError> {
        Ok(&self.numbering()?.vol)
    }

    /// Face areas, x block then y then z.
    pub fn area(&self) -> Result<&[f64], MeshError> {
        Ok(&self.numbering()?.area_all)
    }

    /// Edge lengths, x block then y then z.
    pub fn edge_lengths(&self) -> Result<&[f64], MeshError> {
        Ok(&self.numbering()?.edge_all)
    }

    /// Per-leaf extents, one row per cell.
    pub fn h_gridded(&self) -> Result<&Array2<f64>, MeshError> {
        Ok(&self.numbering()?.h_gridded)
    }

    /// Cell centers, one row per cell.
    pub fn grid_cc(&self) -> Result<&Array2<f64>, MeshError> {
        Ok(&self.numbering()?.grid_cc)
    }

    /// Node positions, one row per node.
    pub fn grid_n(&self) -> Result<&Array2<f64>, MeshError> {
        Ok(&self.numbering()?.grid_n)
    }

    pub fn grid_fx(&self) -> Result<&Array2<f64>, MeshError> {
        Ok(&self.numbering()?.f_grid[0])
    }

    pub fn grid_fy(&self) -> Result<&Array2<f64>, MeshError> {
        Ok(&self.numbering()?.f_grid[1])
    }

    pub fn grid_fz(&self) -> Result<&Array2<f64>, MeshError> {
        self.require_3d("z faces")?;
        Ok(&self.numbering()?.f_grid[2])
    }

    pub fn grid_ex(&self) -> Result<&Array2<f64>, MeshError> {
        Ok(&self.numbering()?.e_grid[0])
    }

    pub fn grid_ey(&self) -> Result<&Array2<f64>, MeshError> {
        Ok(&self.numbering()?.e_grid[1])
    }

    pub fn grid_ez(&self) -> Result<&Array2<f64>, MeshError> {
        self.require_3d("z edges")?;
        Ok(&self.numbering()?.e_grid[2])
    }

    /// Indices (into the per-axis face block) of x faces at resolution
    /// transitions.
    pub fn hanging_faces_x(&self) -> Result<&[usize], MeshError> {
        Ok(&self.numbering()?.f_hanging[0])
    }

    pub fn hanging_faces_y(&self) -> Result<&[usize], MeshError> {
        Ok(&self.numbering()?.f_hanging[1])
    }

    pub fn hanging_faces_z(&self) -> Result<&[usize], MeshError> {
        self.require_3d("z faces")?;
        Ok(&self.numbering()?.f_hanging[2])
    }

    pub fn hanging_edges_x(&self) -> Result<&[usize], MeshError> {
        Ok(&self.numbering()?.e_hanging[0])
    }

    pub fn hanging_edges_y(&self) -> Result<&[usize], MeshError> {
        Ok(&self.numbering()?.e_hanging[1])
    }

    pub fn hanging_edges_z(&self) -> Result<&[usize], MeshError> {
        self.require_3d("z edges")?;
        Ok(&self.numbering()?.e_hanging[2])
    }

    // -- operators ------------------------------------------------------

    /// The sparse face divergence, rebuilt lazily after mutations.
    pub fn face_divergence(&self) -> Result<&CsrMatrix<f64>, MeshError> {
        if let Some(m) = self.div.get() {
            return Ok(m);
        }
        let m = operators::face_divergence(self.numbering()?);
        Ok(self.div.get_or_init(|| m))
    }

    /// The sparse edge curl (3D meshes only).
    pub fn edge_curl(&self) -> Result<&CsrMatrix<f64>, MeshError> {
        if let Some(m) = self.curl.get() {
            return Ok(m);
        }
        let m = operators::edge_curl(self.numbering()?)?;
        Ok(self.curl.get_or_init(|| m))
    }

    /// Permutation from this mesh's cell order to the tensor-product cell
    /// order; defined on uniformly refined meshes.
    pub fn permute_cells(&self) -> Result<CsrMatrix<f64>, MeshError> {
        operators::permute_cells(&self.tree, self.numbering()?)
    }

    pub fn permute_faces(&self) -> Result<CsrMatrix<f64>, MeshError> {
        operators::permute_faces(&self.tree, self.numbering()?)
    }

    pub fn permute_edges(&self) -> Result<CsrMatrix<f64>, MeshError> {
        operators::permute_edges(&self.tree, self.numbering()?)
    }

    /// The deflation matrix expanding the reduced enumeration of the given
    /// family into the per-cell full enumeration.
    pub fn deflation_matrix(&self, kind: DeflationKind) -> Result<CsrMatrix<f64>, MeshError> {
        Ok(operators::deflation(
            &self.axes,
            &self.tree,
            self.numbering()?,
            kind,
        ))
    }

    // -- cell views -----------------------------------------------------

    /// The `i`-th cell in canonical order.
    ///
    /// Panics when `i` is out of range, like slice indexing.
    pub fn cell(&self, i: usize) -> Result<Cell<'_>, MeshError> {
        let nm = self.numbering()?;
        assert!(i < nm.n_cells(), "cell index {i} out of range");
        let id = nm.leaves[i];
        Ok(Cell {
            mesh: self,
            ordinal: i,
            id,
            pointer: self.tree.pointer(id),
        })
    }

    /// All cells in canonical order.
    pub fn cells(&self) -> Result<impl Iterator<Item = Cell<'_>>, MeshError> {
        let leaves = self.numbering()?.leaves.clone();
        Ok(leaves.into_iter().enumerate().map(move |(i, id)| Cell {
            mesh: self,
            ordinal: i,
            id,
            pointer: self.tree.pointer(id),
        }))
    }

    pub(crate) fn tree(&self) -> &CellTree {
        &self.tree
    }

    pub(crate) fn axes(&self) -> &Axes {
        &self.axes
    }
}

/// A lightweight view of one leaf cell.
#[derive(Clone, Copy)]
pub struct Cell<'a> {
    mesh: &'a TreeMesh,
    ordinal: usize,
    id: CellId,
    pointer: Pointer,
}

impl Cell<'_> {
    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn pointer(&self) -> Pointer {
        self.pointer
    }

    pub fn level(&self) -> u32 {
        self.pointer.level
    }

    /// Position of this cell in the canonical ordering.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Geometric center, `dim` coordinates.
    pub fn center(&self) -> Vec<f64> {
        let w = self.mesh.tree.width(self.pointer.level);
        self.mesh.axes.center(&self.pointer, w)[..self.mesh.dim()].to_vec()
    }

    /// Extent along every axis, `dim` values.
    pub fn extent(&self) -> Vec<f64> {
        let w = self.mesh.tree.width(self.pointer.level);
        self.mesh.axes.extent(&self.pointer, w)[..self.mesh.dim()].to_vec()
    }

    pub fn volume(&self) -> f64 {
        let w = self.mesh.tree.width(self.pointer.level);
        self.mesh.axes.volume(&self.pointer, w)
    }

    /// Ids of this cell's corner nodes into the node grid, canonical
    /// corner order (lower axis fastest).
    pub fn nodes(&self) -> Result<&[u32], MeshError> {
        Ok(&self.mesh.numbering()?.c2n[self.ordinal])
    }
}

/// A frozen view of one numbered mesh state, cheap to clone and safe to
/// hand to concurrent readers while the mesh itself keeps mutating.
#[derive(Clone)]
pub struct Snapshot {
    version: u64,
    numbering: Arc<Numbering>,
}

impl Snapshot {
    /// The structural version this snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn dim(&self) -> usize {
        self.numbering.dim
    }

    pub fn n_cells(&self) -> usize {
        self.numbering.n_cells()
    }

    pub fn n_faces(&self) -> usize {
        self.numbering.n_faces()
    }

    pub fn n_edges(&self) -> usize {
        self.numbering.n_edges()
    }

    pub fn n_nodes(&self) -> usize {
        self.numbering.n_nodes()
    }

    pub fn leaves(&self) -> &[CellId] {
        &self.numbering.leaves
    }

    pub fn vol(&self) -> &[f64] {
        &self.numbering.vol
    }

    pub fn area(&self) -> &[f64] {
        &self.numbering.area_all
    }

    pub fn edge_lengths(&self) -> &[f64] {
        &self.numbering.edge_all
    }

    pub fn grid_cc(&self) -> &Array2<f64> {
        &self.numbering.grid_cc
    }

    pub fn hanging_faces(&self, axis: usize) -> &[usize] {
        &self.numbering.f_hanging[axis]
    }

    pub fn hanging_edges(&self, axis: usize) -> &[usize] {
        &self.numbering.e_hanging[axis]
    }
}
