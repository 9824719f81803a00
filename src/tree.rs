use std::collections::BTreeSet;

use crate::errors::MeshError;
use crate::zorder::{decode, encode, max_levels, CellId, Pointer};

/// The result of a neighbor query in one axis direction.
///
/// `Same` names a leaf of equal or larger size sharing the queried face
/// (the pointee's level tells the two cases apart). `Smaller` holds the
/// `2^(D-1)` entries covering the face from the finer side, in canonical
/// in-plane order (lower axis fastest); each entry may itself be `Smaller`
/// when the tree is not balanced, so the structure nests. A query that
/// steps outside the domain yields no neighbor at all (`Option::None` at
/// the call site).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Neighbor {
    Same(CellId),
    Smaller(Vec<Neighbor>),
}

impl Neighbor {
    /// All leaf ids reachable through this neighbor, in traversal order.
    pub fn leaves(&self) -> Vec<CellId> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<CellId>) {
        match self {
            Neighbor::Same(id) => out.push(*id),
            Neighbor::Smaller(list) => {
                for n in list {
                    n.collect(out);
                }
            }
        }
    }

    /// Depth of `Smaller` nesting; zero for `Same`.
    pub fn depth(&self) -> usize {
        match self {
            Neighbor::Same(_) => 0,
            Neighbor::Smaller(list) => 1 + list.iter().map(Neighbor::depth).max().unwrap_or(0),
        }
    }
}

/// The refinement tree: a set of leaf cells whose boxes tile the domain.
///
/// Cells are stored as bare ids in an ordered set, so containment and the
/// refine/coarsen primitives are `O(log nC)` and iterating the set yields
/// the canonical leaf order directly. The tree knows nothing about
/// geometry; it works purely on the integer lattice.
#[derive(Debug, Clone)]
pub struct CellTree {
    dim: usize,
    levels: u32,
    cells: BTreeSet<CellId>,
}

impl CellTree {
    /// A tree holding the single root cell.
    pub fn new(dim: usize, levels: u32) -> CellTree {
        debug_assert!(dim == 2 || dim == 3);
        debug_assert!(levels <= max_levels(dim));
        let mut cells = BTreeSet::new();
        cells.insert(encode(dim, &Pointer::root()));
        CellTree { dim, levels, cells }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Number of active leaves.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell extent in lattice units at the given level.
    pub fn width(&self, level: u32) -> u32 {
        debug_assert!(level <= self.levels);
        1 << (self.levels - level)
    }

    pub fn index(&self, pointer: &Pointer) -> CellId {
        encode(self.dim, pointer)
    }

    pub fn pointer(&self, id: CellId) -> Pointer {
        decode(self.dim, id)
    }

    pub fn contains_id(&self, id: CellId) -> bool {
        self.cells.contains(&id)
    }

    pub fn contains(&self, pointer: &Pointer) -> bool {
        self.contains_id(self.index(pointer))
    }

    /// Leaf ids in ascending (canonical) order.
    pub fn leaf_ids(&self) -> Vec<CellId> {
        self.cells.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.iter().copied()
    }

    /// Whether the pointer addresses a representable cell: level within
    /// range, coordinates inside the lattice and aligned to the cell width.
    pub fn is_valid_pointer(&self, pointer: &Pointer) -> bool {
        if pointer.level > self.levels {
            return false;
        }
        let w = self.width(pointer.level);
        let side = 1u32 << self.levels;
        (0..self.dim).all(|d| pointer.ij[d] < side && pointer.ij[d] % w == 0)
            && pointer.ij[self.dim..].iter().all(|&c| c == 0)
    }

    /// The parent pointer one level up.
    pub fn parent(&self, pointer: &Pointer) -> Pointer {
        debug_assert!(pointer.level >= 1);
        let w = self.width(pointer.level - 1);
        let mut ij = [0u32; 3];
        for d in 0..self.dim {
            ij[d] = pointer.ij[d] - pointer.ij[d] % w;
        }
        Pointer {
            ij,
            level: pointer.level - 1,
        }
    }

    /// The `2^D` children of a cell, canonical order (lower axis fastest).
    pub fn children(&self, pointer: &Pointer) -> Vec<Pointer> {
        debug_assert!(pointer.level < self.levels);
        let hw = self.width(pointer.level + 1);
        (0..1usize << self.dim)
            .map(|m| {
                let mut ij = pointer.ij;
                for d in 0..self.dim {
                    if m >> d & 1 == 1 {
                        ij[d] += hw;
                    }
                }
                Pointer {
                    ij,
                    level: pointer.level + 1,
                }
            })
            .collect()
    }

    /// Splits a leaf into its `2^D` children and returns the new ids.
    pub fn refine_cell(&mut self, pointer: &Pointer) -> Result<Vec<CellId>, MeshError> {
        let id = self.index(pointer);
        if !self.cells.contains(&id) {
            return Err(MeshError::OutOfBounds {
                pointer: *pointer,
                reason: "not an active leaf",
            });
        }
        if pointer.level >= self.levels {
            return Err(MeshError::OutOfBounds {
                pointer: *pointer,
                reason: "already at the finest level",
            });
        }
        self.cells.remove(&id);
        let added: Vec<CellId> = self
            .children(pointer)
            .iter()
            .map(|c| self.index(c))
            .collect();
        for &c in &added {
            self.cells.insert(c);
        }
        Ok(added)
    }

    /// Replaces a full sibling group by its parent. The named cell and all
    /// `2^D - 1` siblings must be active leaves.
    pub fn coarsen_cell(&mut self, pointer: &Pointer) -> Result<CellId, MeshError> {
        if pointer.level == 0 {
            return Err(MeshError::OutOfBounds {
                pointer: *pointer,
                reason: "the root cell cannot be coarsened",
            });
        }
        if !self.contains(pointer) {
            return Err(MeshError::OutOfBounds {
                pointer: *pointer,
                reason: "not an active leaf",
            });
        }
        let parent = self.parent(pointer);
        let siblings: Vec<CellId> = self
            .children(&parent)
            .iter()
            .map(|c| self.index(c))
            .collect();
        if !siblings.iter().all(|s| self.cells.contains(s)) {
            return Err(MeshError::OutOfBounds {
                pointer: *pointer,
                reason: "sibling cells are not all active leaves",
            });
        }
        for s in &siblings {
            self.cells.remove(s);
        }
        let pid = self.index(&parent);
        self.cells.insert(pid);
        Ok(pid)
    }

    /// Makes the named cell a leaf by splitting the ancestor leaf that
    /// currently covers it, level by level. A region already refined to or
    /// beyond the requested cell is left untouched.
    pub fn insert_cell(&mut self, pointer: &Pointer) -> Result<(), MeshError> {
        if !self.is_valid_pointer(pointer) {
            return Err(MeshError::OutOfBounds {
                pointer: *pointer,
                reason: "not a representable cell",
            });
        }
        if self.contains(pointer) {
            return Ok(());
        }
        let mut ancestor = *pointer;
        while ancestor.level > 0 && !self.contains(&ancestor) {
            ancestor = self.parent(&ancestor);
        }
        if !self.contains(&ancestor) {
            // The target region is already subdivided finer than requested.
            return Ok(());
        }
        while ancestor.level < pointer.level {
            self.refine_cell(&ancestor)?;
            let hw = self.width(ancestor.level + 1);
            for d in 0..self.dim {
                if pointer.ij[d] >= ancestor.ij[d] + hw {
                    ancestor.ij[d] += hw;
                }
            }
            ancestor.level += 1;
        }
        Ok(())
    }

    fn inside(&self, pointer: &Pointer) -> bool {
        let side = 1u32 << self.levels;
        (0..self.dim).all(|d| pointer.ij[d] < side)
    }

    /// The neighbor of `pointer` across its face on the given axis and
    /// direction, or `None` when the face lies on the domain boundary.
    ///
    /// Resolution proceeds in three stages: probe for a same-size leaf,
    /// descend one level toward the face when the neighborhood is finer
    /// (recursing from virtual half-size cells inside `pointer`, so deeper
    /// refinement nests naturally), and fall back to the parent pointer
    /// when the neighborhood is coarser.
    pub fn next_cell(&self, pointer: &Pointer, axis: usize, positive: bool) -> Option<Neighbor> {
        debug_assert!(axis < self.dim);
        let w = self.width(pointer.level);
        let mut candidate = *pointer;
        if positive {
            candidate.ij[axis] += w;
        } else {
            candidate.ij[axis] = pointer.ij[axis].checked_sub(w)?;
        }
        if !self.inside(&candidate) {
            return None;
        }
        let cid = self.index(&candidate);
        if self.cells.contains(&cid) {
            return Some(Neighbor::Same(cid));
        }
        if pointer.level + 1 <= self.levels {
            let mut probe = candidate;
            probe.level += 1;
            if !positive {
                // The half of the candidate adjacent to our shared face.
                probe.ij[axis] += w / 2;
            }
            if self.cells.contains(&self.index(&probe)) {
                let hw = w / 2;
                let mut base = *pointer;
                base.level = pointer.level + 1;
                if positive {
                    base.ij[axis] += hw;
                }
                let others: Vec<usize> = (0..self.dim).filter(|&d| d != axis).collect();
                let mut list = Vec::with_capacity(1 << others.len());
                for m in 0..1usize << others.len() {
                    let mut child = base;
                    for (bit, &d) in others.iter().enumerate() {
                        if m >> bit & 1 == 1 {
                            child.ij[d] += hw;
                        }
                    }
                    if let Some(n) = self.next_cell(&child, axis, positive) {
                        list.push(n);
                    }
                }
                return Some(Neighbor::Smaller(list));
            }
        }
        if pointer.level == 0 {
            return None;
        }
        self.next_cell(&self.parent(pointer), axis, positive)
    }

    /// Whether every pair of face-adjacent leaves differs by at most one
    /// level.
    pub fn is_balanced(&self) -> bool {
        for id in self.iter() {
            let ptr = self.pointer(id);
            for axis in 0..self.dim {
                for positive in [false, true] {
                    if let Some(n) = self.next_cell(&ptr, axis, positive) {
                        if n.depth() > 1 {
                            return false;
                        }
                        for other in n.leaves() {
                            let lvl = self.pointer(other).level;
                            if lvl.abs_diff(ptr.level) > 1 {
                                return false;
                            }
                        }
                    }
                }
            }
        }
        true
    }

    /// Total lattice volume of the leaf set; equals `2^(D * levels)` iff
    /// the leaves tile the domain.
    pub fn lattice_volume(&self) -> u128 {
        self.iter()
            .map(|id| {
                let w = self.width(self.pointer(id).level) as u128;
                w.pow(self.dim as u32)
            })
            .sum()
    }

    /// Whether the leaf boxes tile the domain exactly.
    pub fn is_partition(&self) -> bool {
        let side = 1u128 << self.levels;
        self.lattice_volume() == side.pow(self.dim as u32)
    }
}
