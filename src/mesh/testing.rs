//! Test support: a plain tensor-product mesh in the conventional
//! first-axis-fastest ordering, used to cross-check the adaptive mesh on
//! uniform refinements, plus small sparse-matrix assertions.

use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix;

pub(crate) struct TensorMesh {
    h: Vec<Vec<f64>>,
    n: Vec<usize>,
}

impl TensorMesh {
    pub fn new(h: Vec<Vec<f64>>) -> TensorMesh {
        let n = h.iter().map(|hd| hd.len()).collect();
        TensorMesh { h, n }
    }

    pub fn dim(&self) -> usize {
        self.h.len()
    }

    pub fn n_cells(&self) -> usize {
        self.n.iter().product()
    }

    fn lat(&self, mut flat: usize) -> [usize; 3] {
        let mut out = [0usize; 3];
        for d in 0..self.dim() {
            out[d] = flat % self.n[d];
            flat /= self.n[d];
        }
        out
    }

    pub fn vol(&self) -> Vec<f64> {
        (0..self.n_cells())
            .map(|ci| {
                let lat = self.lat(ci);
                (0..self.dim()).map(|d| self.h[d][lat[d]]).product()
            })
            .collect()
    }

    fn face_dims(&self, axis: usize) -> Vec<usize> {
        (0..self.dim())
            .map(|d| self.n[d] + usize::from(d == axis))
            .collect()
    }

    fn edge_dims(&self, axis: usize) -> Vec<usize> {
        (0..self.dim())
            .map(|d| self.n[d] + usize::from(d != axis))
            .collect()
    }

    fn block_len(dims: &[usize]) -> usize {
        dims.iter().product()
    }

    fn block_index(dims: &[usize], lat: &[usize; 3]) -> usize {
        let mut idx = 0;
        let mut mult = 1;
        for (d, &extent) in dims.iter().enumerate() {
            idx += lat[d] * mult;
            mult *= extent;
        }
        idx
    }

    fn block_lat(dims: &[usize], mut flat: usize) -> [usize; 3] {
        let mut out = [0usize; 3];
        for (d, &extent) in dims.iter().enumerate() {
            out[d] = flat % extent;
            flat /= extent;
        }
        out
    }

    pub fn area(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for axis in 0..self.dim() {
            let dims = self.face_dims(axis);
            for fi in 0..Self::block_len(&dims) {
                let lat = Self::block_lat(&dims, fi);
                let a: f64 = (0..self.dim())
                    .filter(|&d| d != axis)
                    .map(|d| self.h[d][lat[d]])
                    .product();
                out.push(a);
            }
        }
        out
    }

    pub fn edge(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for axis in 0..self.dim() {
            let dims = self.edge_dims(axis);
            for ei in 0..Self::block_len(&dims) {
                let lat = Self::block_lat(&dims, ei);
                out.push(self.h[axis][lat[axis]]);
            }
        }
        out
    }

    fn face_global(&self, axis: usize, lat: &[usize; 3]) -> usize {
        let mut off = 0;
        for a in 0..axis {
            off += Self::block_len(&self.face_dims(a));
        }
        off + Self::block_index(&self.face_dims(axis), lat)
    }

    fn edge_global(&self, axis: usize, lat: &[usize; 3]) -> usize {
        let mut off = 0;
        for a in 0..axis {
            off += Self::block_len(&self.edge_dims(a));
        }
        off + Self::block_index(&self.edge_dims(axis), lat)
    }

    pub fn face_div(&self) -> CsrMatrix<f64> {
        let area = self.area();
        let vol = self.vol();
        let n_f: usize = (0..self.dim())
            .map(|a| Self::block_len(&self.face_dims(a)))
            .sum();
        let mut coo = CooMatrix::new(self.n_cells(), n_f);
        for ci in 0..self.n_cells() {
            let lat = self.lat(ci);
            for axis in 0..self.dim() {
                for (sign, shift) in [(-1.0, 0usize), (1.0, 1usize)] {
                    let mut fl = lat;
                    fl[axis] += shift;
                    let fi = self.face_global(axis, &fl);
                    coo.push(ci, fi, sign * area[fi] / vol[ci]);
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    pub fn edge_curl(&self) -> CsrMatrix<f64> {
        assert_eq!(self.dim(), 3);
        let area = self.area();
        let edge = self.edge();
        let n_f: usize = (0..3).map(|a| Self::block_len(&self.face_dims(a))).sum();
        let n_e: usize = (0..3).map(|a| Self::block_len(&self.edge_dims(a))).sum();
        let mut coo = CooMatrix::new(n_f, n_e);
        for axis in 0..3 {
            let u = (axis + 1) % 3;
            let v = (axis + 2) % 3;
            let dims = self.face_dims(axis);
            for fi_local in 0..Self::block_len(&dims) {
                let lat = Self::block_lat(&dims, fi_local);
                let fi = self.face_global(axis, &lat);
                // +u at v low, +v at u high, -u at v high, -v at u low.
                let sides = [
                    (u, v, 0usize, 1.0),
                    (v, u, 1usize, 1.0),
                    (u, v, 1usize, -1.0),
                    (v, u, 0usize, -1.0),
                ];
                for (t, across, shift, sign) in sides {
                    let mut el = lat;
                    el[across] += shift;
                    let ei = self.edge_global(t, &el);
                    coo.push(fi, ei, sign * edge[ei] / area[fi]);
                }
            }
        }
        CsrMatrix::from(&coo)
    }
}

/// Number of stored entries that are not exactly zero.
pub(crate) fn nnz_pruned(m: &CsrMatrix<f64>) -> usize {
    m.values().iter().filter(|&&v| v != 0.0).count()
}

/// Sparse matrix-vector product.
pub(crate) fn apply(m: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    assert_eq!(m.ncols(), x.len());
    let mut out = vec![0.0; m.nrows()];
    for (i, j, v) in m.triplet_iter() {
        out[i] += v * x[j];
    }
    out
}

/// Asserts that two sparse matrices are exactly equal: same shape and a
/// difference with no surviving entries.
pub(crate) fn assert_csr_exact_eq(a: &CsrMatrix<f64>, b: &CsrMatrix<f64>) {
    assert_eq!(a.nrows(), b.nrows());
    assert_eq!(a.ncols(), b.ncols());
    let diff = a - b;
    assert_eq!(nnz_pruned(&diff), 0, "matrices differ");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_counts_2d() {
        let m = TensorMesh::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(m.n_cells(), 4);
        assert_eq!(m.vol(), vec![3.0, 6.0, 4.0, 8.0]);
        // x faces: 3 columns of node positions, 2 rows.
        assert_eq!(m.area().len(), 3 * 2 + 2 * 3);
        assert_eq!(m.edge().len(), 2 * 3 + 3 * 2);
    }

    #[test]
    fn test_tensor_identities_3d() {
        let m = TensorMesh::new(vec![
            vec![1.0, 2.0, 3.0, 4.0],
            vec![5.0, 6.0, 7.0, 8.0],
            vec![9.0, 10.0, 11.0, 12.0],
        ]);
        let dc = &m.face_div() * &m.edge_curl();
        assert_eq!(nnz_pruned(&dc), 0);
    }
}
