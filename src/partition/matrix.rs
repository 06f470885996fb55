use ndarray::{Array2, ArrayView2, Axis, ErrorKind, ShapeError, concatenate, s};

use super::Partition;
use crate::{
    error::{EngineError, Result},
    job::Operation,
};

/// Dense row-major matrix as handled by the engine.
pub type Matrix = Array2<f64>;

/// Plain nested array representation used on the wire.
pub type NestedMatrix = Vec<Vec<f64>>;

/// Position of a block inside the block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCoord {
    pub row: usize,
    pub col: usize,
}

/// Layout of a square matrix cut into `per_side x per_side` square blocks.
///
/// Origins are assigned row-major: `origin = row * per_side + col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    dim: usize,
    per_side: usize,
    block_size: usize,
}

impl BlockGrid {
    /// Creates a new `BlockGrid`.
    ///
    /// # Arguments
    /// * `dim` - The dimension of the square matrix.
    /// * `blocks` - The total amount of blocks, must be a perfect square.
    ///
    /// # Errors
    /// `NotPerfectSquare` if `blocks` is not a non zero perfect square and
    /// `BlockSizeMismatch` if `dim` cannot be cut evenly. Ragged trailing
    /// blocks are rejected rather than dropped.
    pub fn new(dim: usize, blocks: usize) -> Result<Self> {
        let per_side = exact_sqrt(blocks)
            .filter(|&k| k > 0)
            .ok_or(EngineError::NotPerfectSquare(blocks))?;

        if dim == 0 || dim % per_side != 0 {
            return Err(EngineError::BlockSizeMismatch {
                dim,
                blocks_per_side: per_side,
            });
        }

        Ok(Self {
            dim,
            per_side,
            block_size: dim / per_side,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn per_side(&self) -> usize {
        self.per_side
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total amount of blocks.
    pub fn len(&self) -> usize {
        self.per_side * self.per_side
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn coord(&self, origin: usize) -> BlockCoord {
        BlockCoord {
            row: origin / self.per_side,
            col: origin % self.per_side,
        }
    }

    pub fn origin(&self, coord: BlockCoord) -> usize {
        coord.row * self.per_side + coord.col
    }

    /// Every block coordinate in origin order.
    pub fn coords(&self) -> impl Iterator<Item = BlockCoord> + '_ {
        (0..self.len()).map(|origin| self.coord(origin))
    }

    /// Copies the block at `coord` out of `m`.
    pub fn tile(&self, m: ArrayView2<'_, f64>, coord: BlockCoord) -> Matrix {
        let bs = self.block_size;
        let (r0, c0) = (coord.row * bs, coord.col * bs);
        m.slice(s![r0..r0 + bs, c0..c0 + bs]).to_owned()
    }

    /// Writes `block` in place of the block at `coord` of `out`.
    pub fn place(&self, out: &mut Matrix, coord: BlockCoord, block: &Matrix) {
        let bs = self.block_size;
        let (r0, c0) = (coord.row * bs, coord.col * bs);
        out.slice_mut(s![r0..r0 + bs, c0..c0 + bs]).assign(block);
    }
}

/// Aligned blocks of two equally sized square matrices.
///
/// `blocks_a[i]` and `blocks_b[i]` cover the same region and share origin `i`.
#[derive(Debug, Clone)]
pub struct MatrixSplit {
    pub grid: BlockGrid,
    pub blocks_a: Vec<Partition<Matrix>>,
    pub blocks_b: Vec<Partition<Matrix>>,
}

/// Cuts `a` and `b` into `n` aligned square blocks each.
///
/// # Arguments
/// * `a` - The left operand, must be square.
/// * `b` - The right operand, must be square with the same dimension as `a`.
/// * `n` - The amount of blocks per matrix, a perfect square dividing the dimension evenly.
///
/// # Returns
/// Both block lists in row-major origin order.
pub fn split_matrix_pair(a: &Matrix, b: &Matrix, n: usize) -> Result<MatrixSplit> {
    let dim = square_dim(a)?;
    let other = square_dim(b)?;
    if dim != other {
        return Err(EngineError::DimensionMismatch { left: dim, right: other });
    }

    let grid = BlockGrid::new(dim, n)?;
    let cut = |m: &Matrix| -> Vec<Partition<Matrix>> {
        grid.coords()
            .enumerate()
            .map(|(origin, coord)| Partition::new(origin, grid.tile(m.view(), coord)))
            .collect()
    };

    Ok(MatrixSplit {
        grid,
        blocks_a: cut(a),
        blocks_b: cut(b),
    })
}

impl MatrixSplit {
    /// Builds the operand pair each device receives for `operation`.
    ///
    /// Element-wise operations get the aligned pair `(A_ij, B_ij)`. A product
    /// gets the row band `A_i*` and the column band `B_*j`, so that the device's
    /// result is exactly block `C_ij` of `A x B`.
    ///
    /// # Errors
    /// `JobMismatch` if `operation` does not take matrices.
    pub fn operands(
        &self,
        operation: Operation,
    ) -> Result<Vec<Partition<(NestedMatrix, NestedMatrix)>>> {
        match operation {
            Operation::MatrixMultiply => self.band_operands(),
            Operation::MatrixAdd | Operation::Hadamard => Ok(self
                .blocks_a
                .iter()
                .zip(&self.blocks_b)
                .map(|(a, b)| {
                    let pair = (to_nested(a.data().view()), to_nested(b.data().view()));
                    Partition::new(a.origin(), pair)
                })
                .collect()),
            _ => Err(EngineError::JobMismatch(
                "operation does not take matrix operands",
            )),
        }
    }

    fn band_operands(&self) -> Result<Vec<Partition<(NestedMatrix, NestedMatrix)>>> {
        let k = self.grid.per_side();

        let row_bands = (0..k)
            .map(|row| {
                let views: Vec<_> = self.blocks_a[row * k..(row + 1) * k]
                    .iter()
                    .map(|p| p.data().view())
                    .collect();
                concatenate(Axis(1), &views[..])
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let col_bands = (0..k)
            .map(|col| {
                let views: Vec<_> = (0..k)
                    .map(|row| self.blocks_b[row * k + col].data().view())
                    .collect();
                concatenate(Axis(0), &views[..])
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(self
            .grid
            .coords()
            .enumerate()
            .map(|(origin, c)| {
                let pair = (
                    to_nested(row_bands[c.row].view()),
                    to_nested(col_bands[c.col].view()),
                );
                Partition::new(origin, pair)
            })
            .collect())
    }
}

/// Converts a matrix into nested rows.
pub fn to_nested(m: ArrayView2<'_, f64>) -> NestedMatrix {
    m.outer_iter().map(|row| row.to_vec()).collect()
}

/// Converts nested rows back into a matrix.
///
/// # Errors
/// Returns a `ShapeError` if the rows are ragged.
pub fn from_nested(rows: NestedMatrix) -> std::result::Result<Matrix, ShapeError> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != ncols) {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape));
    }

    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat)
}

fn square_dim(m: &Matrix) -> Result<usize> {
    let (rows, cols) = m.dim();
    if rows != cols {
        return Err(EngineError::NotSquare { rows, cols });
    }
    Ok(rows)
}

/// The integer square root of `n` if `n` is a perfect square.
pub(crate) fn exact_sqrt(n: usize) -> Option<usize> {
    let square = |k: usize| k.checked_mul(k);

    let mut k = (n as f64).sqrt() as usize;
    while square(k).map_or(true, |sq| sq > n) {
        k -= 1;
    }
    while square(k + 1).is_some_and(|sq| sq <= n) {
        k += 1;
    }
    (square(k) == Some(n)).then_some(k)
}
