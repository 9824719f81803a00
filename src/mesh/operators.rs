use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix;

use crate::errors::MeshError;
use crate::mesh::geometry::Axes;
use crate::mesh::numbering::{line_key, segments_between, Numbering, Segment};
use crate::tree::{CellTree, Neighbor};
use std::collections::HashMap;

/// Which degree-of-freedom family a deflation matrix expands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeflationKind {
    Cells,
    Faces,
    Edges,
}

/// The face divergence: cells x faces, each incidence entry contributing
/// `sign * area / vol`. Fluxes over the slots of a cell telescope exactly,
/// including across hanging transitions where the plus slot carries one
/// entry per small face.
pub(crate) fn face_divergence(nm: &Numbering) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(nm.n_cells(), nm.n_faces());
    for i in 0..nm.n_cells() {
        for axis in 0..nm.dim {
            for (sign, slot) in [(-1.0, 2 * axis), (1.0, 2 * axis + 1)] {
                for &f in &nm.c2f[i][slot] {
                    let local = f as usize;
                    let col = nm.face_global(axis, local);
                    coo.push(i, col, sign * nm.f_area[axis][local] / nm.vol[i]);
                }
            }
        }
    }
    log::debug!("assembled face divergence with {} entries", coo.nnz());
    CsrMatrix::from(&coo)
}

/// The boundary of face `(axis, local)` as reduced edge segments with
/// right-hand-rule signs for the face normal: +u along the v-low side,
/// +v along the u-high side, then the reverses, with (n, u, v) the cyclic
/// axis triple. Each side expands into the minimal segments covering it,
/// so the two faces flanking any junction of a cell boundary meet on
/// identical segment sets and their circulations cancel term by term.
fn face_boundary(nm: &Numbering, axis: usize, local: usize) -> Vec<(usize, usize, f64)> {
    let (p, x) = nm.f_owner[axis][local];
    let w = nm.width(p.level);
    let u = (axis + 1) % 3;
    let v = (axis + 2) % 3;
    let sides = [
        (u, p.ij[u], v, p.ij[v], 1.0),
        (v, p.ij[v], u, p.ij[u] + w, 1.0),
        (u, p.ij[u], v, p.ij[v] + w, -1.0),
        (v, p.ij[v], u, p.ij[u], -1.0),
    ];
    let mut out = Vec::with_capacity(8);
    for (t, start, other_axis, other_coord, sign) in sides {
        let mut at = [0u32; 3];
        at[other_axis] = other_coord;
        at[axis] = x;
        let key = line_key(3, t, &at);
        let Some(cuts) = nm.line_cuts.get(&key) else {
            continue;
        };
        for (lo, hi) in segments_between(cuts, start, start + w) {
            let seg = Segment { line: key, lo, hi };
            out.push((t, nm.seg_ids[&seg] as usize, sign));
        }
    }
    out
}

/// The edge curl: faces x edges, Stokes-cell form. Each row holds the
/// oriented boundary circulation of one face scaled by `1 / area`, so the
/// divergence of every curl row cancels exactly.
pub(crate) fn edge_curl(nm: &Numbering) -> Result<CsrMatrix<f64>, MeshError> {
    if nm.dim != 3 {
        return Err(MeshError::Unsupported(
            "the edge curl is defined for 3D meshes only".into(),
        ));
    }
    let mut coo = CooMatrix::new(nm.n_faces(), nm.n_edges());
    for axis in 0..3 {
        for local in 0..nm.f_count[axis] {
            let row = nm.face_global(axis, local);
            let area = nm.f_area[axis][local];
            for (t, e, sign) in face_boundary(nm, axis, local) {
                let col = nm.edge_global(t, e);
                coo.push(row, col, sign * nm.e_len[t][e] / area);
            }
        }
    }
    log::debug!("assembled edge curl with {} entries", coo.nnz());
    Ok(CsrMatrix::from(&coo))
}

/// The per-cell ("full") face enumeration: every cell records a face at
/// its own cross-section on both sides of every axis, shared only between
/// equal-level neighbors. The coarse side of a hanging transition thus
/// keeps one virtual face covering the fine faces of the reduced set.
pub(crate) struct FullFaces {
    pub count: [usize; 3],
    /// Full-face areas, per axis.
    pub area: [Vec<f64>; 3],
    /// (full local row, reduced local col) pairs per axis, unit weight.
    pub map: [Vec<(usize, usize)>; 3],
}

pub(crate) fn full_faces(axes: &Axes, tree: &CellTree, nm: &Numbering) -> FullFaces {
    let dim = nm.dim;
    let mut count = [0usize; 3];
    let mut area: [Vec<f64>; 3] = Default::default();
    let mut map: [Vec<(usize, usize)>; 3] = Default::default();
    for (i, &cid) in nm.leaves.iter().enumerate() {
        let p = tree.pointer(cid);
        let w = tree.width(p.level);
        for axis in 0..dim {
            let own = axes.face_area(&p, w, axis);
            let shared_minus = matches!(
                tree.next_cell(&p, axis, false),
                Some(Neighbor::Same(other)) if tree.pointer(other).level == p.level
            );
            if !shared_minus {
                let row = count[axis];
                count[axis] += 1;
                area[axis].push(own);
                for &f in &nm.c2f[i][2 * axis] {
                    map[axis].push((row, f as usize));
                }
            }
            let row = count[axis];
            count[axis] += 1;
            area[axis].push(own);
            for &f in &nm.c2f[i][2 * axis + 1] {
                map[axis].push((row, f as usize));
            }
        }
    }
    FullFaces { count, area, map }
}

/// The per-cell full edge enumeration: each cell's own edge spans,
/// deduplicated between cells sharing an identical span.
pub(crate) struct FullEdges {
    pub count: [usize; 3],
    pub len: [Vec<f64>; 3],
    pub map: [Vec<(usize, usize)>; 3],
}

pub(crate) fn full_edges(axes: &Axes, tree: &CellTree, nm: &Numbering) -> FullEdges {
    let dim = nm.dim;
    let mut count = [0usize; 3];
    let mut len: [Vec<f64>; 3] = Default::default();
    let mut map: [Vec<(usize, usize)>; 3] = Default::default();
    let mut seen: HashMap<Segment, usize> = HashMap::new();
    for &cid in &nm.leaves {
        let p = tree.pointer(cid);
        let w = tree.width(p.level);
        for t in 0..dim {
            let others: Vec<usize> = (0..dim).filter(|&d| d != t).collect();
            for m in 0..1usize << others.len() {
                let mut at = p.ij;
                for (bit, &d) in others.iter().enumerate() {
                    if m >> bit & 1 == 1 {
                        at[d] += w;
                    }
                }
                let key = line_key(dim, t, &at);
                let span = Segment {
                    line: key,
                    lo: p.ij[t],
                    hi: p.ij[t] + w,
                };
                if seen.contains_key(&span) {
                    continue;
                }
                let row = count[t];
                count[t] += 1;
                seen.insert(span, row);
                len[t].push(axes.span(t, span.lo, span.hi));
                let Some(cuts) = nm.line_cuts.get(&key) else {
                    continue;
                };
                for (lo, hi) in segments_between(cuts, span.lo, span.hi) {
                    let seg = Segment { line: key, lo, hi };
                    map[t].push((row, nm.seg_ids[&seg] as usize));
                }
            }
        }
    }
    FullEdges { count, len, map }
}

/// The deflation matrix for the requested family: full x reduced, with a
/// unit entry wherever a reduced degree of freedom covers (part of) a full
/// one. Identity rows everywhere except the coarse side of hanging
/// transitions.
pub(crate) fn deflation(
    axes: &Axes,
    tree: &CellTree,
    nm: &Numbering,
    kind: DeflationKind,
) -> CsrMatrix<f64> {
    match kind {
        DeflationKind::Cells => CsrMatrix::identity(nm.n_cells()),
        DeflationKind::Faces => {
            let full = full_faces(axes, tree, nm);
            assemble_block_map(nm.dim, &full.count, &nm.f_count, &full.map)
        }
        DeflationKind::Edges => {
            let full = full_edges(axes, tree, nm);
            assemble_block_map(nm.dim, &full.count, &nm.e_count, &full.map)
        }
    }
}

fn assemble_block_map(
    dim: usize,
    full_count: &[usize; 3],
    reduced_count: &[usize; 3],
    map: &[Vec<(usize, usize)>; 3],
) -> CsrMatrix<f64> {
    let n_full: usize = full_count[..dim].iter().sum();
    let n_reduced: usize = reduced_count[..dim].iter().sum();
    let mut coo = CooMatrix::new(n_full, n_reduced);
    for axis in 0..dim {
        let row_off: usize = full_count[..axis].iter().sum();
        let col_off: usize = reduced_count[..axis].iter().sum();
        for &(r, c) in &map[axis] {
            coo.push(row_off + r, col_off + c, 1.0);
        }
    }
    CsrMatrix::from(&coo)
}

fn require_uniform(tree: &CellTree, nm: &Numbering) -> Result<(), MeshError> {
    let finest = tree.levels();
    for &cid in &nm.leaves {
        if tree.pointer(cid).level != finest {
            return Err(MeshError::InvariantViolation(
                "permutations are defined only when every leaf is at the finest level".into(),
            ));
        }
    }
    Ok(())
}

/// Permutation taking this mesh's cell ordering to the tensor-product
/// ordering (first axis fastest). Defined on uniformly refined meshes.
pub(crate) fn permute_cells(tree: &CellTree, nm: &Numbering) -> Result<CsrMatrix<f64>, MeshError> {
    require_uniform(tree, nm)?;
    let side = 1usize << tree.levels();
    let mut coo = CooMatrix::new(nm.n_cells(), nm.n_cells());
    for (j, &cid) in nm.leaves.iter().enumerate() {
        let p = tree.pointer(cid);
        let mut ti = 0usize;
        let mut mult = 1usize;
        for d in 0..nm.dim {
            ti += p.ij[d] as usize * mult;
            mult *= side;
        }
        coo.push(ti, j, 1.0);
    }
    Ok(CsrMatrix::from(&coo))
}

// Row-major (first axis fastest) index into a grid with side+1 slots along
// `plus_axis` and side slots along the other axes.
fn tensor_block_index(dim: usize, side: usize, plus_axis: usize, lat: &[usize; 3]) -> usize {
    let mut idx = 0usize;
    let mut mult = 1usize;
    for d in 0..dim {
        let extent = if d == plus_axis { side + 1 } else { side };
        idx += lat[d] * mult;
        mult *= extent;
    }
    idx
}

/// Permutation taking this mesh's face ordering to the tensor-product face
/// ordering. Defined on uniformly refined meshes.
pub(crate) fn permute_faces(tree: &CellTree, nm: &Numbering) -> Result<CsrMatrix<f64>, MeshError> {
    require_uniform(tree, nm)?;
    let dim = nm.dim;
    let side = 1usize << tree.levels();
    let per_axis_total = (side + 1) * side.pow(dim as u32 - 1);
    let mut coo = CooMatrix::new(nm.n_faces(), nm.n_faces());
    for axis in 0..dim {
        let offset = axis * per_axis_total;
        for local in 0..nm.f_count[axis] {
            let (p, x) = nm.f_owner[axis][local];
            let mut lat = [0usize; 3];
            for d in 0..dim {
                lat[d] = p.ij[d] as usize;
            }
            lat[axis] = x as usize;
            let ti = offset + tensor_block_index(dim, side, axis, &lat);
            coo.push(ti, nm.face_global(axis, local), 1.0);
        }
    }
    Ok(CsrMatrix::from(&coo))
}

/// Permutation taking this mesh's edge ordering to the tensor-product
/// edge ordering. Defined on uniformly refined meshes.
pub(crate) fn permute_edges(tree: &CellTree, nm: &Numbering) -> Result<CsrMatrix<f64>, MeshError> {
    require_uniform(tree, nm)?;
    let dim = nm.dim;
    let side = 1usize << tree.levels();
    let per_axis_total = side * (side + 1).pow(dim as u32 - 1);
    let mut coo = CooMatrix::new(nm.n_edges(), nm.n_edges());
    for (seg, &local) in &nm.seg_ids {
        let t = seg.line.axis;
        let offset = t * per_axis_total;
        let mut lat = [0usize; 3];
        lat[t] = seg.lo as usize;
        let mut n = 0;
        for d in 0..dim {
            if d != t {
                lat[d] = seg.line.perp[n] as usize;
                n += 1;
            }
        }
        // Edge grids run `side` along the tangent and `side + 1` across.
        let mut idx = 0usize;
        let mut mult = 1usize;
        for d in 0..dim {
            let extent = if d == t { side } else { side + 1 };
            idx += lat[d] * mult;
            mult *= extent;
        }
        coo.push(offset + idx, nm.edge_global(t, local as usize), 1.0);
    }
    Ok(CsrMatrix::from(&coo))
}
