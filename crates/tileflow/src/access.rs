//! Affine access maps describing which tile moves at each loop iteration.
//!
//! An [`AccessMap`] selects a set of tensor dimensions and gives, for each of
//! them, a linear combination of iteration variables plus a constant offset.
//! Resolving the map yields tile coordinates: along every dimension the larger
//! endpoint of a transfer is split into `larger / smaller` tiles and the
//! coordinate picks one of them. Dimensions that are not selected resolve to 0.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};
use crate::tensor::Tensor;
use crate::var::IterVarRef;

/// `constant + sum(coefficient * var)` over named loop variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffineExpr {
    pub terms: Vec<(String, i64)>,
    pub constant: i64,
}

impl AffineExpr {
    pub fn constant(value: i64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, bindings: &HashMap<String, i64>) -> FlowResult<i64> {
        let mut value = self.constant;
        for (var, coefficient) in &self.terms {
            let bound = bindings
                .get(var)
                .ok_or_else(|| FlowError::UnboundIterationVar {
                    var: var.clone(),
                    context: format!("index expression {self}"),
                })?;
            value = coefficient
                .checked_mul(*bound)
                .and_then(|term| value.checked_add(term))
                .ok_or_else(|| shape_error(format!("index expression {self} overflows i64")))?;
        }
        Ok(value)
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        for (var, coefficient) in &self.terms {
            let magnitude = coefficient.unsigned_abs();
            if wrote {
                f.write_str(if *coefficient < 0 { " - " } else { " + " })?;
            } else if *coefficient < 0 {
                f.write_str("-")?;
            }
            if magnitude == 1 {
                write!(f, "{var}")?;
            } else {
                write!(f, "{magnitude}*{var}")?;
            }
            wrote = true;
        }
        if !wrote {
            return write!(f, "{}", self.constant);
        }
        match self.constant {
            0 => Ok(()),
            c if c < 0 => write!(f, " - {}", c.unsigned_abs()),
            c => write!(f, " + {c}"),
        }
    }
}

/// Symbolic tile coordinates, one expression per tensor dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileIndex(pub Vec<AffineExpr>);

impl TileIndex {
    pub fn dims(&self) -> &[AffineExpr] {
        &self.0
    }

    pub fn evaluate(&self, bindings: &HashMap<String, i64>) -> FlowResult<Vec<i64>> {
        self.0.iter().map(|expr| expr.evaluate(bindings)).collect()
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (axis, expr) in self.0.iter().enumerate() {
            if axis > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{expr}")?;
        }
        f.write_str("]")
    }
}

/// Affine tile access pattern attached to an [`crate::AttachedEdge`].
///
/// `coefficients[j][k]` is the weight of `iteration_vars[j]` in the coordinate
/// of `selected_dims[k]`, so the matrix has one row per iteration variable.
/// An empty `iteration_vars` list describes a single transfer that does not
/// depend on any loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessMap {
    selected_dims: Vec<usize>,
    coefficients: Vec<Vec<i64>>,
    offsets: Vec<i64>,
    iteration_vars: Vec<IterVarRef>,
}

impl AccessMap {
    pub fn new(
        selected_dims: Vec<usize>,
        coefficients: Vec<Vec<i64>>,
        offsets: Vec<i64>,
        iteration_vars: Vec<IterVarRef>,
    ) -> FlowResult<Self> {
        if coefficients.len() != iteration_vars.len() {
            return Err(shape_error(format!(
                "{} coefficient rows for {} iteration vars",
                coefficients.len(),
                iteration_vars.len()
            )));
        }
        if let Some((row, width)) = coefficients
            .iter()
            .enumerate()
            .map(|(row, coeffs)| (row, coeffs.len()))
            .find(|(_, width)| *width != selected_dims.len())
        {
            return Err(shape_error(format!(
                "coefficient row {row} has {width} entries for {} selected dims",
                selected_dims.len()
            )));
        }
        if offsets.len() != selected_dims.len() {
            return Err(shape_error(format!(
                "{} offsets for {} selected dims",
                offsets.len(),
                selected_dims.len()
            )));
        }
        let mut seen_dims = HashSet::new();
        if let Some(dim) = selected_dims.iter().find(|dim| !seen_dims.insert(**dim)) {
            return Err(shape_error(format!("dimension {dim} is selected twice")));
        }
        let mut seen_vars = HashSet::new();
        if let Some(var) = iteration_vars
            .iter()
            .find(|var| !seen_vars.insert(var.name()))
        {
            return Err(FlowError::DuplicateIterationVar {
                name: var.name().to_string(),
                context: "access map".to_string(),
            });
        }
        Ok(Self {
            selected_dims,
            coefficients,
            offsets,
            iteration_vars,
        })
    }

    /// Loop-independent transfer of the whole tile.
    pub fn bulk() -> Self {
        Self {
            selected_dims: Vec::new(),
            coefficients: Vec::new(),
            offsets: Vec::new(),
            iteration_vars: Vec::new(),
        }
    }

    pub fn selected_dims(&self) -> &[usize] {
        &self.selected_dims
    }

    pub fn coefficients(&self) -> &[Vec<i64>] {
        &self.coefficients
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    pub fn iteration_vars(&self) -> &[IterVarRef] {
        &self.iteration_vars
    }

    pub fn is_loop_invariant(&self) -> bool {
        self.iteration_vars.is_empty()
    }

    pub fn uses_var(&self, name: &str) -> bool {
        self.iteration_vars.iter().any(|var| var.name() == name)
    }

    /// Symbolic tile index over a tensor of the given rank.
    pub fn index_expr(&self, rank: usize) -> TileIndex {
        let dims = (0..rank)
            .map(|dim| match self.selected_position(dim) {
                Some(k) => AffineExpr {
                    terms: self
                        .iteration_vars
                        .iter()
                        .zip(&self.coefficients)
                        .filter(|(_, row)| row[k] != 0)
                        .map(|(var, row)| (var.name().to_string(), row[k]))
                        .collect(),
                    constant: self.offsets[k],
                },
                None => AffineExpr::constant(0),
            })
            .collect();
        TileIndex(dims)
    }

    /// Concrete tile coordinates for one assignment of the iteration vars,
    /// given in declaration order.
    pub fn resolve(&self, rank: usize, values: &[i64]) -> FlowResult<Vec<i64>> {
        if values.len() != self.iteration_vars.len() {
            return Err(shape_error(format!(
                "{} iteration values for {} iteration vars",
                values.len(),
                self.iteration_vars.len()
            )));
        }
        let mut coords = vec![0; rank];
        for (k, dim) in self.selected_dims.iter().enumerate() {
            let Some(slot) = coords.get_mut(*dim) else {
                return Err(shape_error(format!(
                    "dimension {dim} is out of range for rank {rank}"
                )));
            };
            *slot = values
                .iter()
                .zip(&self.coefficients)
                .try_fold(self.offsets[k], |acc, (value, row)| {
                    value.checked_mul(row[k]).and_then(|term| acc.checked_add(term))
                })
                .ok_or_else(|| {
                    shape_error(format!("tile coordinate along dimension {dim} overflows i64"))
                })?;
        }
        Ok(coords)
    }

    /// Checks the map against the endpoints of the transfer it describes.
    pub(crate) fn check_endpoints(&self, edge: &str, from: &Tensor, to: &Tensor) -> FlowResult<()> {
        if from.rank() != to.rank() {
            return Err(shape_error(format!(
                "{edge} joins rank {} and rank {} tensors",
                from.rank(),
                to.rank()
            )));
        }
        if let Some(dim) = self.selected_dims.iter().find(|dim| **dim >= from.rank()) {
            return Err(shape_error(format!(
                "{edge} selects dimension {dim} of rank {} tensors",
                from.rank()
            )));
        }
        let tiles = tile_counts(edge, from, to)?;
        for (dim, count) in tiles.iter().enumerate() {
            if *count > 1 && self.selected_position(dim).is_none() {
                return Err(FlowError::UnderSpecifiedAccess {
                    edge: edge.to_string(),
                    dim,
                    tiles: *count,
                });
            }
        }
        if self.iteration_vars.iter().any(|var| var.is_empty()) {
            return Ok(());
        }
        for (k, dim) in self.selected_dims.iter().enumerate() {
            let Some((min, max)) = self.coordinate_bounds(k) else {
                return Err(shape_error(format!(
                    "{edge} tile coordinate along dimension {dim} overflows i64"
                )));
            };
            let count = tiles[*dim];
            if min < 0 || max >= count as i64 {
                return Err(FlowError::AccessOutOfBounds {
                    edge: edge.to_string(),
                    dim: *dim,
                    min,
                    max,
                    tiles: count,
                });
            }
        }
        Ok(())
    }

    fn selected_position(&self, dim: usize) -> Option<usize> {
        self.selected_dims.iter().position(|selected| *selected == dim)
    }

    /// Smallest and largest coordinate along `selected_dims[k]` over every
    /// non-empty loop range, or `None` when the arithmetic leaves `i64`.
    fn coordinate_bounds(&self, k: usize) -> Option<(i64, i64)> {
        let mut min = self.offsets[k];
        let mut max = self.offsets[k];
        for (var, row) in self.iteration_vars.iter().zip(&self.coefficients) {
            let first = row[k].checked_mul(var.low())?;
            let last = row[k].checked_mul(var.high() - 1)?;
            min = min.checked_add(first.min(last))?;
            max = max.checked_add(first.max(last))?;
        }
        Some((min, max))
    }
}

/// Number of tiles along each dimension of a transfer between `from` and `to`.
pub(crate) fn tile_counts(edge: &str, from: &Tensor, to: &Tensor) -> FlowResult<Vec<usize>> {
    from.shape()
        .iter()
        .zip(to.shape())
        .enumerate()
        .map(|(dim, (a, b))| {
            let (larger, smaller) = if a >= b { (a, b) } else { (b, a) };
            if larger % smaller != 0 {
                return Err(shape_error(format!(
                    "{edge} dimension {dim}: extent {larger} is not a multiple of {smaller}"
                )));
            }
            Ok(larger / smaller)
        })
        .collect()
}

fn shape_error(reason: String) -> FlowError {
    FlowError::AccessMapShape { reason }
}
