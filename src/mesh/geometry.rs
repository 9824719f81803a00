use crate::errors::MeshError;
use crate::zorder::{max_levels, Pointer};

/// Per-axis spacing tables of a tensor-product domain.
///
/// Positions are derived from the spacing vectors on demand; no cell
/// caches its own geometry. Extents are computed as sums over spacing
/// slices rather than as differences of node positions, so quantities that
/// must agree between refinements of the same spacings (areas, volumes,
/// edge lengths) match bit for bit.
#[derive(Debug, Clone)]
pub(crate) struct Axes {
    h: Vec<Vec<f64>>,
    nodes: Vec<Vec<f64>>,
}

impl Axes {
    /// Validates and adopts the spacing vectors: two or three axes, each
    /// of length `2^levels` with strictly positive entries.
    pub fn new(h: Vec<Vec<f64>>, levels: u32) -> Result<Axes, MeshError> {
        let dim = h.len();
        if dim != 2 && dim != 3 {
            return Err(MeshError::InvalidSpec(format!(
                "expected 2 or 3 axes, got {dim}"
            )));
        }
        if levels > max_levels(dim) {
            return Err(MeshError::InvalidSpec(format!(
                "levels = {levels} exceeds the {dim}D maximum of {}",
                max_levels(dim)
            )));
        }
        let expect = 1usize << levels;
        for (d, hd) in h.iter().enumerate() {
            if hd.len() != expect {
                return Err(MeshError::InvalidSpec(format!(
                    "axis {d} has {} spacings, expected 2^{levels} = {expect}",
                    hd.len()
                )));
            }
            if let Some(bad) = hd.iter().find(|&&v| !(v > 0.0) || !v.is_finite()) {
                return Err(MeshError::InvalidSpec(format!(
                    "axis {d} contains a non-positive spacing {bad}"
                )));
            }
        }
        let nodes = h
            .iter()
            .map(|hd| {
                let mut acc = Vec::with_capacity(hd.len() + 1);
                let mut sum = 0.0;
                acc.push(0.0);
                for v in hd {
                    sum += v;
                    acc.push(sum);
                }
                acc
            })
            .collect();
        Ok(Axes { h, nodes })
    }

    pub fn dim(&self) -> usize {
        self.h.len()
    }

    pub fn spacings(&self, axis: usize) -> &[f64] {
        &self.h[axis]
    }

    /// Tensor node position `axis`-wise at lattice coordinate `i`.
    pub fn node(&self, axis: usize, i: u32) -> f64 {
        self.nodes[axis][i as usize]
    }

    /// Length of the lattice span `[a, b)` along an axis.
    pub fn span(&self, axis: usize, a: u32, b: u32) -> f64 {
        self.h[axis][a as usize..b as usize].iter().sum()
    }

    /// Total domain extent along an axis.
    pub fn domain_extent(&self, axis: usize) -> f64 {
        *self.nodes[axis]
            .last()
            .unwrap_or(&0.0)
    }

    /// Low corner of the cell with lattice width `w`.
    pub fn origin(&self, p: &Pointer, _w: u32) -> [f64; 3] {
        let mut out = [0.0; 3];
        for d in 0..self.dim() {
            out[d] = self.node(d, p.ij[d]);
        }
        out
    }

    /// Extent of the cell along every axis.
    pub fn extent(&self, p: &Pointer, w: u32) -> [f64; 3] {
        let mut out = [0.0; 3];
        for d in 0..self.dim() {
            out[d] = self.span(d, p.ij[d], p.ij[d] + w);
        }
        out
    }

    /// Geometric center of the cell.
    pub fn center(&self, p: &Pointer, w: u32) -> [f64; 3] {
        let o = self.origin(p, w);
        let e = self.extent(p, w);
        let mut out = [0.0; 3];
        for d in 0..self.dim() {
            out[d] = o[d] + e[d] / 2.0;
        }
        out
    }

    /// Cell volume (area in 2D).
    pub fn volume(&self, p: &Pointer, w: u32) -> f64 {
        let e = self.extent(p, w);
        e[..self.dim()].iter().product()
    }

    /// Area of the cell's face normal to `axis` (in-plane extent product;
    /// a length in 2D).
    pub fn face_area(&self, p: &Pointer, w: u32, axis: usize) -> f64 {
        let e = self.extent(p, w);
        (0..self.dim()).filter(|&d| d != axis).map(|d| e[d]).product()
    }

    /// Center of the cell's minus (`positive == false`) or plus face
    /// normal to `axis`.
    pub fn face_center(&self, p: &Pointer, w: u32, axis: usize, positive: bool) -> [f64; 3] {
        let mut c = self.center(p, w);
        c[axis] = if positive {
            self.node(axis, p.ij[axis] + w)
        } else {
            self.node(axis, p.ij[axis])
        };
        c
    }
}
