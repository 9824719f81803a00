use lazy_static::lazy_static;

/// Deepest refinement level addressable by the cell id encoding in two
/// dimensions. A 2D id interleaves three bit lanes (i, j, level), so 20
/// lattice bits per axis fit comfortably in a `u64`.
pub const MAX_LEVELS_2D: u32 = 20;

/// Deepest refinement level addressable in three dimensions, where the id
/// interleaves four lanes (i, j, k, level).
pub const MAX_LEVELS_3D: u32 = 15;

/// The deepest refinement level supported for a mesh of the given
/// dimension.
pub fn max_levels(dim: usize) -> u32 {
    if dim == 3 {
        MAX_LEVELS_3D
    } else {
        MAX_LEVELS_2D
    }
}

/// A cell addressed by its low corner on the finest-level integer lattice
/// plus its refinement level.
///
/// For a mesh refined down to `levels`, a cell at level `l` spans
/// `2^(levels - l)` lattice units along every axis, and each coordinate of
/// its low corner is a multiple of that width. `ij[2]` is zero for 2D
/// meshes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub ij: [u32; 3],
    pub level: u32,
}

impl Pointer {
    /// The root pointer: the single level-0 cell covering the domain.
    pub fn root() -> Pointer {
        Pointer {
            ij: [0, 0, 0],
            level: 0,
        }
    }

    /// A 2D pointer. The third lattice coordinate is left at zero.
    pub fn new2(i: u32, j: u32, level: u32) -> Pointer {
        Pointer {
            ij: [i, j, 0],
            level,
        }
    }

    /// A 3D pointer.
    pub fn new3(i: u32, j: u32, k: u32, level: u32) -> Pointer {
        Pointer {
            ij: [i, j, k],
            level,
        }
    }
}

/// A CellId is a 64-bit integer that uniquely identifies a cell of the
/// refinement tree. It has the following format:
///
///   id = interleave(i0, i1, [i2], level)
///
/// i.e. bit b of the first lattice coordinate lands at bit (D+1)*b of the
/// id, bit b of the second coordinate at (D+1)*b + 1, and so on, with the
/// level occupying the most significant lane. The encoding has the
/// following properties:
///
///  - It is a bijection between valid pointers and ids, so ids can be
///    stored bare in ordered sets and decoded on demand.
///
///  - Among cells of equal level, ascending id order is exactly the
///    Z-order (Morton) traversal of their low corners, which keeps
///    spatially close cells close in the ordering.
///
///  - Sorting a mixed-level leaf set yields the canonical traversal order
///    used for numbering cells, faces, and edges.
///
/// Ids are meaningful only together with the dimension of the mesh that
/// produced them.
///
/// # Examples
///
/// ```
/// use treemesh::zorder::{encode, Pointer};
///
/// // The root cell always encodes to zero.
/// assert_eq!(encode(2, &Pointer::root()).raw(), 0);
/// // A level-1 quadrant of an 8x8 (levels = 3) lattice.
/// assert_eq!(encode(2, &Pointer::new2(4, 0, 1)).raw(), 68);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Wraps a raw id. No validation is performed; decoding an id that was
    /// not produced by `encode` for the same dimension yields an
    /// unspecified pointer.
    pub const fn new(raw: u64) -> CellId {
        CellId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Lookup tables spreading one input byte across every third (stride 3,
/// 2D) or fourth (stride 4, 3D) output bit. Interleaving a pointer then
/// reduces to a few table lookups per lane.
const SPREAD_TABLE_SIZE: usize = 1 << 8;

lazy_static! {
    static ref SPREAD_TABLES: ([u64; SPREAD_TABLE_SIZE], [u64; SPREAD_TABLE_SIZE]) =
        init_spread_tables();
}

fn init_spread_tables() -> ([u64; SPREAD_TABLE_SIZE], [u64; SPREAD_TABLE_SIZE]) {
    let mut by3 = [0u64; SPREAD_TABLE_SIZE];
    let mut by4 = [0u64; SPREAD_TABLE_SIZE];
    for byte in 0..SPREAD_TABLE_SIZE {
        let mut s3 = 0u64;
        let mut s4 = 0u64;
        for bit in 0..8 {
            if byte >> bit & 1 == 1 {
                s3 |= 1 << (3 * bit);
                s4 |= 1 << (4 * bit);
            }
        }
        by3[byte] = s3;
        by4[byte] = s4;
    }
    (by3, by4)
}

fn spread(value: u32, stride: usize) -> u64 {
    debug_assert!(stride == 3 || stride == 4);
    debug_assert!(value < 1 << 21);
    let table = if stride == 3 {
        &SPREAD_TABLES.0
    } else {
        &SPREAD_TABLES.1
    };
    let mut out = 0u64;
    let mut v = value;
    let mut shift = 0;
    while v != 0 {
        out |= table[(v & 0xff) as usize] << shift;
        v >>= 8;
        shift += 8 * stride;
    }
    out
}

fn compact(mut lanes: u64, stride: usize) -> u32 {
    let mut out = 0u32;
    let mut bit = 0;
    while lanes != 0 {
        if lanes & 1 == 1 {
            out |= 1 << bit;
        }
        lanes >>= stride;
        bit += 1;
    }
    out
}

/// Packs a pointer into its cell id by bit-interleaving the lattice
/// coordinates and the level.
pub fn encode(dim: usize, pointer: &Pointer) -> CellId {
    debug_assert!(dim == 2 || dim == 3);
    debug_assert!(pointer.level <= max_levels(dim));
    let stride = dim + 1;
    let mut id = spread(pointer.level, stride) << dim;
    for d in 0..dim {
        id |= spread(pointer.ij[d], stride) << d;
    }
    CellId(id)
}

/// Splits a cell id back into its pointer. Inverse of [`encode`] for the
/// same dimension.
///
/// # Examples
///
/// ```
/// use treemesh::zorder::{decode, encode, Pointer};
///
/// let p = Pointer::new3(2, 4, 6, 3);
/// assert_eq!(decode(3, encode(3, &p)), p);
/// ```
pub fn decode(dim: usize, id: CellId) -> Pointer {
    debug_assert!(dim == 2 || dim == 3);
    let stride = dim + 1;
    let mut ij = [0u32; 3];
    for (d, out) in ij.iter_mut().enumerate().take(dim) {
        *out = compact(id.0 >> d, stride);
    }
    Pointer {
        ij,
        level: compact(id.0 >> dim, stride),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_zero() {
        assert_eq!(encode(2, &Pointer::root()).raw(), 0);
        assert_eq!(encode(3, &Pointer::root()).raw(), 0);
    }

    #[test]
    fn test_known_ids_2d() {
        // Hand-checked ids on an 8x8 (levels = 3) lattice.
        assert_eq!(encode(2, &Pointer::new2(4, 0, 1)).raw(), 68);
        assert_eq!(encode(2, &Pointer::new2(0, 4, 1)).raw(), 132);
        assert_eq!(encode(2, &Pointer::new2(2, 0, 2)).raw(), 40);
        assert_eq!(encode(2, &Pointer::new2(4, 4, 2)).raw(), 224);
        assert_eq!(encode(2, &Pointer::new2(2, 2, 3)).raw(), 60);
        assert_eq!(encode(2, &Pointer::new2(3, 3, 3)).raw(), 63);
    }

    #[test]
    fn test_known_ids_3d() {
        assert_eq!(encode(3, &Pointer::new3(2, 0, 0, 1)).raw(), 24);
    }

    #[test]
    fn test_round_trip_2d() {
        for level in 0..=4u32 {
            for i in 0..16 {
                for j in 0..16 {
                    let p = Pointer::new2(i, j, level);
                    assert_eq!(decode(2, encode(2, &p)), p);
                }
            }
        }
    }

    #[test]
    fn test_round_trip_3d() {
        for level in 0..=3u32 {
            for i in 0..8 {
                for j in 0..8 {
                    for k in 0..8 {
                        let p = Pointer::new3(i, j, k, level);
                        assert_eq!(decode(3, encode(3, &p)), p);
                    }
                }
            }
        }
    }

    #[test]
    fn test_round_trip_high_bits() {
        let p = Pointer::new2((1 << MAX_LEVELS_2D) - 1, 12345, MAX_LEVELS_2D);
        assert_eq!(decode(2, encode(2, &p)), p);
        let p = Pointer::new3((1 << MAX_LEVELS_3D) - 1, 777, 1 << 14, MAX_LEVELS_3D);
        assert_eq!(decode(3, encode(3, &p)), p);
    }

    #[test]
    fn test_same_level_order_is_morton() {
        // For equal levels, id order must follow the Morton traversal:
        // stepping the row-major scan of a 2x2 block visits (0,0), (1,0),
        // (0,1), (1,1) in ascending id order.
        let ids: Vec<u64> = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .map(|&(i, j)| encode(2, &Pointer::new2(i, j, 3)).raw())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
