//! Affine accesses in closed form.
//!
//! Access indices are composed through `affine.apply` producers and
//! constants until they are linear combinations of leaf values (block
//! arguments or results of other operations).

use crate::affine::AffineExpr;
use crate::graph::{Graph, OpId, ValueId};
use crate::ops::OpKind;
use std::collections::BTreeMap;
use std::fmt;

/// `sum(coeff * leaf) + constant`, with no zero coefficients stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LinearExpr {
    pub coeffs: BTreeMap<ValueId, i64>,
    pub constant: i64,
}

impl LinearExpr {
    pub fn constant(value: i64) -> Self {
        LinearExpr {
            coeffs: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn leaf(value: ValueId) -> Self {
        let mut coeffs = BTreeMap::new();
        coeffs.insert(value, 1);
        LinearExpr { coeffs, constant: 0 }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn coeff(&self, value: ValueId) -> i64 {
        self.coeffs.get(&value).copied().unwrap_or(0)
    }

    pub fn checked_add(&self, other: &LinearExpr) -> Option<LinearExpr> {
        let mut out = self.clone();
        out.constant = out.constant.checked_add(other.constant)?;
        for (&v, &c) in &other.coeffs {
            let sum = out.coeff(v).checked_add(c)?;
            if sum == 0 {
                out.coeffs.remove(&v);
            } else {
                out.coeffs.insert(v, sum);
            }
        }
        Some(out)
    }

    pub fn checked_scale(&self, factor: i64) -> Option<LinearExpr> {
        if factor == 0 {
            return Some(LinearExpr::default());
        }
        let mut coeffs = BTreeMap::new();
        for (&v, &c) in &self.coeffs {
            coeffs.insert(v, c.checked_mul(factor)?);
        }
        Some(LinearExpr {
            coeffs,
            constant: self.constant.checked_mul(factor)?,
        })
    }

    pub fn checked_sub(&self, other: &LinearExpr) -> Option<LinearExpr> {
        self.checked_add(&other.checked_scale(-1)?)
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (v, c) in &self.coeffs {
            write!(f, "{}*{:?} + ", c, v)?;
        }
        write!(f, "{}", self.constant)
    }
}

/// Closed form of `value`: integer constants fold, flattenable single-result
/// `affine.apply` results are expanded, anything else is a leaf.
pub fn linearize_value(graph: &Graph, value: ValueId) -> LinearExpr {
    let Some(def) = graph.defining_op(value) else {
        return LinearExpr::leaf(value);
    };
    match graph.kind(def) {
        OpKind::Constant(lit) => match lit.as_i64() {
            Some(c) if graph.value_type(value).is_integer() => LinearExpr::constant(c),
            _ => LinearExpr::leaf(value),
        },
        OpKind::AffineApply { map } if map.num_results() == 1 => {
            let operands = &graph.op(def).operands;
            map.results[0]
                .flatten(map.num_dims, map.num_symbols)
                .and_then(|row| compose_row(graph, &row, operands))
                .unwrap_or_else(|| LinearExpr::leaf(value))
        }
        _ => LinearExpr::leaf(value),
    }
}

/// Substitutes `operands` into a flattened row `[coeffs.., constant]`.
pub fn compose_row(graph: &Graph, row: &[i64], operands: &[ValueId]) -> Option<LinearExpr> {
    let (constant, coeffs) = row.split_last()?;
    if coeffs.len() != operands.len() {
        return None;
    }
    let mut out = LinearExpr::constant(*constant);
    for (&coeff, &operand) in coeffs.iter().zip(operands) {
        if coeff != 0 {
            out = out.checked_add(&linearize_value(graph, operand).checked_scale(coeff)?)?;
        }
    }
    Some(out)
}

/// Composes one affine expression over `operands`; `None` when it is not
/// pure affine or the arithmetic overflows.
pub fn compose_expr(
    graph: &Graph,
    expr: &AffineExpr,
    num_dims: u32,
    num_symbols: u32,
    operands: &[ValueId],
) -> Option<LinearExpr> {
    let row = expr.flatten(num_dims, num_symbols)?;
    compose_row(graph, &row, operands)
}

/// An `affine.load` or `affine.store` with its composed indices.
#[derive(Debug, Clone)]
pub struct MemRefAccess {
    pub op: OpId,
    pub memref: ValueId,
    pub is_store: bool,
    /// One entry per map result; `None` for a result that is not affine.
    pub indices: Vec<Option<LinearExpr>>,
}

impl MemRefAccess {
    pub fn from_op(graph: &Graph, op: OpId) -> Option<Self> {
        let is_store = match graph.kind(op) {
            OpKind::AffineLoad { .. } => false,
            OpKind::AffineStore { .. } => true,
            _ => return None,
        };
        let map = graph.access_map(op)?;
        let operands = graph.access_indices(op);
        let indices = map
            .results
            .iter()
            .map(|r| compose_expr(graph, r, map.num_dims, map.num_symbols, operands))
            .collect();
        Some(MemRefAccess {
            op,
            memref: graph.memref_operand(op)?,
            is_store,
            indices,
        })
    }

    pub fn rank(&self) -> usize {
        self.indices.len()
    }

    pub fn is_fully_affine(&self) -> bool {
        self.indices.iter().all(Option::is_some)
    }
}

/// Same buffer and provably the same element on every execution.
impl PartialEq for MemRefAccess {
    fn eq(&self, other: &Self) -> bool {
        self.memref == other.memref
            && self.indices.len() == other.indices.len()
            && self
                .indices
                .iter()
                .zip(&other.indices)
                .all(|(a, b)| matches!((a, b), (Some(a), Some(b)) if a == b))
    }
}
