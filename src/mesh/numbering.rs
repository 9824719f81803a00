use std::collections::{BTreeSet, HashMap};

use ndarray::Array2;

use crate::errors::MeshError;
use crate::mesh::geometry::Axes;
use crate::tree::{CellTree, Neighbor};
use crate::zorder::{CellId, Pointer};

/// A lattice line carrying edges tangent to `axis`, identified by the
/// lattice coordinates of the remaining axes in ascending axis order
/// (`perp[1]` is unused in 2D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LineKey {
    pub axis: usize,
    pub perp: [u32; 2],
}

/// A lattice interval `[lo, hi]` on one line; the unit of the reduced edge
/// enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Segment {
    pub line: LineKey,
    pub lo: u32,
    pub hi: u32,
}

pub(crate) fn line_key(dim: usize, axis: usize, at: &[u32; 3]) -> LineKey {
    let mut perp = [0u32; 2];
    let mut n = 0;
    for (d, &coord) in at.iter().enumerate().take(dim) {
        if d != axis {
            perp[n] = coord;
            n += 1;
        }
    }
    LineKey { axis, perp }
}

/// The lines carrying the `2^(D-1)` edges of a cell tangent to `axis`,
/// in canonical in-plane order.
fn edge_lines(dim: usize, axis: usize, p: &Pointer, w: u32) -> Vec<LineKey> {
    let others: Vec<usize> = (0..dim).filter(|&d| d != axis).collect();
    (0..1usize << others.len())
        .map(|m| {
            let mut at = p.ij;
            for (bit, &d) in others.iter().enumerate() {
                if m >> bit & 1 == 1 {
                    at[d] += w;
                }
            }
            line_key(dim, axis, &at)
        })
        .collect()
}

/// Consecutive cut pairs of `cuts` restricted to `[lo, hi]`.
pub(crate) fn segments_between(cuts: &[u32], lo: u32, hi: u32) -> Vec<(u32, u32)> {
    let inner: Vec<u32> = cuts
        .iter()
        .copied()
        .filter(|&c| lo <= c && c <= hi)
        .collect();
    inner.windows(2).map(|w| (w[0], w[1])).collect()
}

#[derive(Default)]
struct FaceAxis {
    area: Vec<f64>,
    center: Vec<[f64; 3]>,
    hanging: Vec<usize>,
    owner: Vec<(Pointer, u32)>,
}

impl FaceAxis {
    fn push(
        &mut self,
        axes: &Axes,
        w: u32,
        axis: usize,
        p: &Pointer,
        positive: bool,
        hanging: bool,
    ) -> u32 {
        let local = self.area.len();
        self.area.push(axes.face_area(p, w, axis));
        self.center.push(axes.face_center(p, w, axis, positive));
        if hanging {
            self.hanging.push(local);
        }
        self.owner
            .push((*p, p.ij[axis] + if positive { w } else { 0 }));
        local as u32
    }
}

#[derive(Default)]
struct EdgeAxis {
    len: Vec<f64>,
    center: Vec<[f64; 3]>,
    hanging_flags: Vec<bool>,
}

/// The complete enumeration pass over a frozen leaf set: canonical cell
/// ordering, face ids with cell incidence and hanging classification, the
/// reduced edge set as minimal lattice segments, and deduplicated corner
/// nodes. Everything downstream (operators, deflation, permutations) is
/// assembled from this snapshot.
pub(crate) struct Numbering {
    pub dim: usize,
    pub levels: u32,
    pub leaves: Vec<CellId>,
    pub ordinal: HashMap<CellId, usize>,
    pub vol: Vec<f64>,
    pub grid_cc: Array2<f64>,
    pub h_gridded: Array2<f64>,

    pub f_count: [usize; 3],
    pub f_area: [Vec<f64>; 3],
    pub area_all: Vec<f64>,
    pub f_grid: [Array2<f64>; 3],
    pub f_hanging: [Vec<usize>; 3],
    /// Per face: the cell whose cross-section the face is, plus the face's
    /// lattice coordinate on the normal axis.
    pub f_owner: [Vec<(Pointer, u32)>; 3],
    /// Per cell ordinal, per slot (2*axis = minus, 2*axis+1 = plus), the
    /// attached per-axis local face ids.
    pub c2f: Vec<[Vec<u32>; 6]>,

    pub e_count: [usize; 3],
    pub e_len: [Vec<f64>; 3],
    pub edge_all: Vec<f64>,
    pub e_grid: [Array2<f64>; 3],
    pub e_hanging: [Vec<usize>; 3],
    pub line_cuts: HashMap<LineKey, Vec<u32>>,
    pub seg_ids: HashMap<Segment, u32>,

    pub grid_n: Array2<f64>,
    pub c2n: Vec<Vec<u32>>,
}

impl Numbering {
    pub fn build(axes: &Axes, tree: &CellTree) -> Result<Numbering, MeshError> {
        let dim = tree.dim();
        let levels = tree.levels();
        if !tree.is_partition() {
            return Err(MeshError::InvariantViolation(format!(
                "{} leaves do not tile the domain",
                tree.len()
            )));
        }

        let leaves = tree.leaf_ids();
        let nc = leaves.len();
        let ordinal: HashMap<CellId, usize> =
            leaves.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        // Per-cell measures in canonical order.
        let mut vol = Vec::with_capacity(nc);
        let mut cc_flat = Vec::with_capacity(nc * dim);
        let mut hg_flat = Vec::with_capacity(nc * dim);
        for &cid in &leaves {
            let p = tree.pointer(cid);
            let w = tree.width(p.level);
            vol.push(axes.volume(&p, w));
            cc_flat.extend_from_slice(&axes.center(&p, w)[..dim]);
            hg_flat.extend_from_slice(&axes.extent(&p, w)[..dim]);
        }

        // Faces. The minus side is owned only at the domain boundary; every
        // interior face is recorded while visiting the cell on its lesser
        // side, so each is created exactly once.
        let mut faces: [FaceAxis; 3] = Default::default();
        let mut c2f: Vec<[Vec<u32>; 6]> = vec![Default::default(); nc];
        for (i, &cid) in leaves.iter().enumerate() {
            let p = tree.pointer(cid);
            let w = tree.width(p.level);
            for axis in 0..dim {
                if tree.next_cell(&p, axis, false).is_none() {
                    let f = faces[axis].push(axes, w, axis, &p, false, false);
                    c2f[i][2 * axis].push(f);
                }
                match tree.next_cell(&p, axis, true) {
                    None => {
                        let f = faces[axis].push(axes, w, axis, &p, true, false);
                        c2f[i][2 * axis + 1].push(f);
                    }
                    Some(Neighbor::Same(other)) => {
                        let hanging = tree.pointer(other).level != p.level;
                        let f = faces[axis].push(axes, w, axis, &p, true, hanging);
                        c2f[i][2 * axis + 1].push(f);
                        c2f[ordinal[&other]][2 * axis].push(f);
                    }
                    Some(n @ Neighbor::Smaller(_)) => {
                        for small in n.leaves() {
                            let sp = tree.pointer(small);
                            let sw = tree.width(sp.level);
                            let f = faces[axis].push(axes, sw, axis, &sp, false, true);
                            c2f[ordinal[&small]][2 * axis].push(f);
                            c2f[i][2 * axis + 1].push(f);
                        }
                    }
                }
            }
        }

        // Edges. Every cell contributes its edge spans to the lattice lines
        // they lie on; the reduced edge set is the minimal segments between
        // span endpoints, so the spans of coarse and fine cells meeting on
        // a line decompose over the same segments.
        let mut cut_sets: HashMap<LineKey, BTreeSet<u32>> = HashMap::new();
        let mut line_spans: HashMap<LineKey, Vec<(u32, u32)>> = HashMap::new();
        for &cid in &leaves {
            let p = tree.pointer(cid);
            let w = tree.width(p.level);
            for t in 0..dim {
                let lo = p.ij[t];
                for key in edge_lines(dim, t, &p, w) {
                    let cuts = cut_sets.entry(key).or_default();
                    cuts.insert(lo);
                    cuts.insert(lo + w);
                    line_spans.entry(key).or_default().push((lo, lo + w));
                }
            }
        }
        let line_cuts: HashMap<LineKey, Vec<u32>> = cut_sets
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect();

        let mut edges: [EdgeAxis; 3] = Default::default();
        let mut seg_ids: HashMap<Segment, u32> = HashMap::new();
        for &cid in &leaves {
            let p = tree.pointer(cid);
            let w = tree.width(p.level);
            for t in 0..dim {
                for key in edge_lines(dim, t, &p, w) {
                    for (lo, hi) in segments_between(&line_cuts[&key], p.ij[t], p.ij[t] + w) {
                        let segment = Segment { line: key, lo, hi };
                        if seg_ids.contains_key(&segment) {
                            continue;
                        }
                        let local = edges[t].len.len() as u32;
                        edges[t].len.push(axes.span(t, lo, hi));
                        edges[t].center.push(edge_center(axes, dim, &segment));
                        edges[t].hanging_flags.push(false);
                        seg_ids.insert(segment, local);
                    }
                }
            }
        }
        // An edge hangs when some incident cell holds it only as part of a
        // longer span.
        for (segment, &local) in &seg_ids {
            let spans = &line_spans[&segment.line];
            let strict = spans
                .iter()
                .any(|&(a, b)| a <= segment.lo && segment.hi <= b && segment.hi - segment.lo < b - a);
            if strict {
                edges[segment.line.axis].hanging_flags[local as usize] = true;
            }
        }

        // Corner nodes, deduplicated in first-visit order.
        let mut node_ids: HashMap<[u32; 3], u32> = HashMap::new();
        let mut n_flat: Vec<f64> = Vec::new();
        let mut c2n: Vec<Vec<u32>> = Vec::with_capacity(nc);
        for &cid in &leaves {
            let p = tree.pointer(cid);
            let w = tree.width(p.level);
            let mut ids = Vec::with_capacity(1 << dim);
            for m in 0..1usize << dim {
                let mut at = p.ij;
                for d in 0..dim {
                    if m >> d & 1 == 1 {
                        at[d] += w;
                    }
                }
                let id = match node_ids.get(&at) {
                    Some(&id) => id,
                    None => {
                        let id = node_ids.len() as u32;
                        node_ids.insert(at, id);
                        for d in 0..dim {
                            n_flat.push(axes.node(d, at[d]));
                        }
                        id
                    }
                };
                ids.push(id);
            }
            c2n.push(ids);
        }

        let f_count = [
            faces[0].area.len(),
            faces[1].area.len(),
            faces[2].area.len(),
        ];
        let e_count = [
            edges[0].len.len(),
            edges[1].len.len(),
            edges[2].len.len(),
        ];
        let mut area_all = Vec::with_capacity(f_count.iter().sum());
        for fa in faces.iter().take(dim) {
            area_all.extend_from_slice(&fa.area);
        }
        let mut edge_all = Vec::with_capacity(e_count.iter().sum());
        for ea in edges.iter().take(dim) {
            edge_all.extend_from_slice(&ea.len);
        }

        log::debug!(
            "numbered {} cells, {} faces ({} hanging), {} edges, {} nodes",
            nc,
            area_all.len(),
            faces.iter().map(|f| f.hanging.len()).sum::<usize>(),
            edge_all.len(),
            node_ids.len(),
        );

        let grid = |rows: &[[f64; 3]]| -> Array2<f64> {
            let flat: Vec<f64> = rows.iter().flat_map(|r| r[..dim].to_vec()).collect();
            Array2::from_shape_vec((rows.len(), dim), flat).expect("rectangular grid")
        };

        Ok(Numbering {
            dim,
            levels,
            vol,
            grid_cc: Array2::from_shape_vec((nc, dim), cc_flat).expect("rectangular grid"),
            h_gridded: Array2::from_shape_vec((nc, dim), hg_flat).expect("rectangular grid"),
            f_count,
            f_area: [
                faces[0].area.clone(),
                faces[1].area.clone(),
                faces[2].area.clone(),
            ],
            area_all,
            f_grid: [
                grid(&faces[0].center),
                grid(&faces[1].center),
                grid(&faces[2].center),
            ],
            f_hanging: [
                faces[0].hanging.clone(),
                faces[1].hanging.clone(),
                faces[2].hanging.clone(),
            ],
            f_owner: [
                faces[0].owner.clone(),
                faces[1].owner.clone(),
                faces[2].owner.clone(),
            ],
            c2f,
            e_count,
            e_len: [
                edges[0].len.clone(),
                edges[1].len.clone(),
                edges[2].len.clone(),
            ],
            edge_all,
            e_grid: [
                grid(&edges[0].center),
                grid(&edges[1].center),
                grid(&edges[2].center),
            ],
            e_hanging: [
                flags_to_indices(&edges[0].hanging_flags),
                flags_to_indices(&edges[1].hanging_flags),
                flags_to_indices(&edges[2].hanging_flags),
            ],
            line_cuts,
            seg_ids,
            grid_n: Array2::from_shape_vec((node_ids.len(), dim), n_flat)
                .expect("rectangular grid"),
            c2n,
            leaves,
            ordinal,
        })
    }

    pub fn width(&self, level: u32) -> u32 {
        1 << (self.levels - level)
    }

    pub fn n_cells(&self) -> usize {
        self.leaves.len()
    }

    pub fn n_faces(&self) -> usize {
        self.f_count[..self.dim].iter().sum()
    }

    pub fn n_edges(&self) -> usize {
        self.e_count[..self.dim].iter().sum()
    }

    pub fn n_nodes(&self) -> usize {
        self.grid_n.nrows()
    }

    /// Global face index of a per-axis local id: the per-axis blocks are
    /// concatenated x, y, [z].
    pub fn face_global(&self, axis: usize, local: usize) -> usize {
        self.f_count[..axis].iter().sum::<usize>() + local
    }

    pub fn edge_global(&self, axis: usize, local: usize) -> usize {
        self.e_count[..axis].iter().sum::<usize>() + local
    }
}

fn flags_to_indices(flags: &[bool]) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter_map(|(i, &f)| f.then_some(i))
        .collect()
}

fn edge_center(axes: &Axes, dim: usize, seg: &Segment) -> [f64; 3] {
    let t = seg.line.axis;
    let mut c = [0.0; 3];
    let mut n = 0;
    for d in 0..dim {
        if d != t {
            c[d] = axes.node(d, seg.line.perp[n]);
            n += 1;
        }
    }
    c[t] = 0.5 * (axes.node(t, seg.lo) + axes.node(t, seg.hi));
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_2d(hx: Vec<f64>, hy: Vec<f64>, levels: u32) -> (Axes, CellTree) {
        let axes = Axes::new(vec![hx, hy], levels).unwrap();
        let tree = CellTree::new(2, levels);
        (axes, tree)
    }

    #[test]
    fn test_uniform_quadrants() {
        let (axes, mut tree) = mesh_2d(vec![0.25; 4], vec![0.25; 4], 2);
        tree.refine_cell(&Pointer::root()).unwrap();
        let nm = Numbering::build(&axes, &tree).unwrap();
        assert_eq!(nm.n_cells(), 4);
        assert_eq!(nm.f_count[0], 6);
        assert_eq!(nm.f_count[1], 6);
        assert_eq!(nm.e_count[0], 6);
        assert_eq!(nm.e_count[1], 6);
        assert_eq!(nm.n_nodes(), 9);
        assert!(nm.f_hanging[0].is_empty());
        assert!(nm.f_hanging[1].is_empty());
        // Face centers along x, canonical order.
        let fx = &nm.f_grid[0];
        assert_eq!(fx.nrows(), 6);
        assert_eq!(fx.row(0).to_vec(), vec![0.0, 0.25]);
        assert_eq!(fx.row(1).to_vec(), vec![0.5, 0.25]);
        assert_eq!(fx.row(2).to_vec(), vec![1.0, 0.25]);
        assert_eq!(fx.row(3).to_vec(), vec![0.0, 0.75]);
        // All faces are half-length.
        assert!(nm.area_all.iter().all(|&a| a == 0.5));
    }

    #[test]
    fn test_hanging_faces_nonuniform() {
        let hx: Vec<f64> = [1.0, 2.0, 1.0, 5.0, 2.0, 3.0, 1.0, 1.0]
            .iter()
            .map(|v| v / 16.0)
            .collect();
        let hy = vec![1.0 / 8.0; 8];
        let (axes, mut tree) = mesh_2d(hx, hy, 3);
        tree.refine_cell(&Pointer::new2(0, 0, 0)).unwrap();
        tree.refine_cell(&Pointer::new2(4, 4, 1)).unwrap();
        tree.refine_cell(&Pointer::new2(0, 0, 1)).unwrap();
        tree.refine_cell(&Pointer::new2(2, 2, 2)).unwrap();
        let nm = Numbering::build(&axes, &tree).unwrap();
        assert_eq!(nm.n_cells(), 13);
        assert_eq!(nm.f_count[0], 18);
        assert_eq!(nm.f_hanging[0].len(), 7);
        assert_eq!(nm.f_count[1], 18);
        assert_eq!(nm.f_hanging[1].len(), 7);
        // This mesh is symmetric across the diagonal, so edges mirror
        // faces.
        assert_eq!(nm.e_count, [18, 18, 0]);
        let total: f64 = nm.vol.iter().sum();
        approx::assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_incidence_slots() {
        let (axes, mut tree) = mesh_2d(vec![0.25; 4], vec![0.25; 4], 2);
        tree.refine_cell(&Pointer::root()).unwrap();
        tree.refine_cell(&Pointer::new2(0, 0, 1)).unwrap();
        let nm = Numbering::build(&axes, &tree).unwrap();
        // The (2,0) quadrant sees two smaller neighbors across its minus-x
        // face.
        let big = nm.ordinal[&tree.index(&Pointer::new2(2, 0, 1))];
        assert_eq!(nm.c2f[big][0].len(), 2);
        assert_eq!(nm.c2f[big][1].len(), 1);
        // Every cell has at least one face in every slot.
        for slots in &nm.c2f {
            for slot in &slots[..4] {
                assert!(!slot.is_empty());
            }
        }
    }

    #[test]
    fn test_edge_segments_split_at_transitions() {
        let (axes, mut tree) = mesh_2d(vec![0.25; 4], vec![0.25; 4], 2);
        tree.refine_cell(&Pointer::root()).unwrap();
        tree.refine_cell(&Pointer::new2(0, 0, 1)).unwrap();
        let nm = Numbering::build(&axes, &tree).unwrap();
        // The line y = 2 between the refined quadrant and its coarse upper
        // neighbor is cut at x = 1 by the fine cells, so the coarse span
        // [0, 2] decomposes into two segments.
        let key = line_key(2, 0, &[0, 2, 0]);
        assert_eq!(nm.line_cuts[&key], vec![0, 1, 2, 4]);
        // Both sub-segments hang.
        let lo = Segment { line: key, lo: 0, hi: 1 };
        let hi = Segment { line: key, lo: 1, hi: 2 };
        let lo_id = nm.seg_ids[&lo] as usize;
        let hi_id = nm.seg_ids[&hi] as usize;
        assert!(nm.e_hanging[0].contains(&lo_id));
        assert!(nm.e_hanging[0].contains(&hi_id));
    }

    #[test]
    fn test_node_dedup() {
        let (axes, mut tree) = mesh_2d(vec![0.5, 0.5], vec![0.5, 0.5], 1);
        tree.refine_cell(&Pointer::root()).unwrap();
        let nm = Numbering::build(&axes, &tree).unwrap();
        // 3x3 tensor corners.
        assert_eq!(nm.n_nodes(), 9);
        assert_eq!(nm.c2n[0], vec![0, 1, 2, 3]);
        assert_eq!(nm.grid_n.row(0).to_vec(), vec![0.0, 0.0]);
        assert_eq!(nm.grid_n.row(3).to_vec(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_three_dimensional_counts() {
        let axes = Axes::new(vec![vec![0.25; 4]; 3], 2).unwrap();
        let mut tree = CellTree::new(3, 2);
        tree.refine_cell(&Pointer::root()).unwrap();
        tree.refine_cell(&Pointer::new3(0, 0, 0, 1)).unwrap();
        let nm = Numbering::build(&axes, &tree).unwrap();
        assert_eq!(nm.n_cells(), 15);
        assert_eq!(nm.f_count, [22, 22, 22]);
        assert_eq!(nm.e_count, [32, 32, 32]);
        assert_eq!(nm.f_hanging[0].len(), 4);
        assert_eq!(nm.f_hanging[1].len(), 4);
        assert_eq!(nm.f_hanging[2].len(), 4);
        assert_eq!(nm.e_hanging[0].len(), 6);
        assert_eq!(nm.n_nodes(), 46);
        let total: f64 = nm.vol.iter().sum();
        approx::assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }
}
