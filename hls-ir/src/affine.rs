//! Affine expressions, maps and integer sets.
//!
//! Expressions are built through folding constructors (`+`, `*`, `floor_div`,
//! ...) so that constant sub-terms collapse eagerly. A map or set refers to
//! its inputs positionally: dimensions first, then symbols.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AffineExpr {
    Dim(u32),
    Symbol(u32),
    Constant(i64),
    Add(Box<AffineExpr>, Box<AffineExpr>),
    Mul(Box<AffineExpr>, Box<AffineExpr>),
    Mod(Box<AffineExpr>, Box<AffineExpr>),
    FloorDiv(Box<AffineExpr>, Box<AffineExpr>),
    CeilDiv(Box<AffineExpr>, Box<AffineExpr>),
}

pub(crate) fn floor_div(lhs: i64, rhs: i64) -> Option<i64> {
    if rhs == 0 {
        return None;
    }
    let q = lhs.checked_div(rhs)?;
    if lhs % rhs != 0 && ((lhs < 0) != (rhs < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn ceil_div(lhs: i64, rhs: i64) -> Option<i64> {
    floor_div(lhs.checked_neg()?, rhs)?.checked_neg()
}

fn modulo(lhs: i64, rhs: i64) -> Option<i64> {
    lhs.checked_sub(rhs.checked_mul(floor_div(lhs, rhs)?)?)
}

impl AffineExpr {
    pub fn dim(position: u32) -> Self {
        AffineExpr::Dim(position)
    }

    pub fn symbol(position: u32) -> Self {
        AffineExpr::Symbol(position)
    }

    pub fn constant(value: i64) -> Self {
        AffineExpr::Constant(value)
    }

    pub fn as_constant(&self) -> Option<i64> {
        match self {
            AffineExpr::Constant(c) => Some(*c),
            _ => None,
        }
    }

    pub fn floor_div(self, rhs: impl Into<AffineExpr>) -> Self {
        let rhs = rhs.into();
        match (&self, &rhs) {
            (AffineExpr::Constant(l), AffineExpr::Constant(r)) => match floor_div(*l, *r) {
                Some(v) => AffineExpr::Constant(v),
                None => AffineExpr::FloorDiv(Box::new(self), Box::new(rhs)),
            },
            (_, AffineExpr::Constant(1)) => self,
            _ => AffineExpr::FloorDiv(Box::new(self), Box::new(rhs)),
        }
    }

    pub fn ceil_div(self, rhs: impl Into<AffineExpr>) -> Self {
        let rhs = rhs.into();
        match (&self, &rhs) {
            (AffineExpr::Constant(l), AffineExpr::Constant(r)) => match ceil_div(*l, *r) {
                Some(v) => AffineExpr::Constant(v),
                None => AffineExpr::CeilDiv(Box::new(self), Box::new(rhs)),
            },
            (_, AffineExpr::Constant(1)) => self,
            _ => AffineExpr::CeilDiv(Box::new(self), Box::new(rhs)),
        }
    }

    pub fn modulo(self, rhs: impl Into<AffineExpr>) -> Self {
        let rhs = rhs.into();
        match (&self, &rhs) {
            (AffineExpr::Constant(l), AffineExpr::Constant(r)) => match modulo(*l, *r) {
                Some(v) => AffineExpr::Constant(v),
                None => AffineExpr::Mod(Box::new(self), Box::new(rhs)),
            },
            (_, AffineExpr::Constant(1)) => AffineExpr::Constant(0),
            _ => AffineExpr::Mod(Box::new(self), Box::new(rhs)),
        }
    }

    /// True when the expression contains no `mod`/`floordiv`/`ceildiv` and
    /// every product has a constant side.
    pub fn is_pure_affine(&self) -> bool {
        match self {
            AffineExpr::Dim(_) | AffineExpr::Symbol(_) | AffineExpr::Constant(_) => true,
            AffineExpr::Add(l, r) => l.is_pure_affine() && r.is_pure_affine(),
            AffineExpr::Mul(l, r) => {
                l.is_pure_affine()
                    && r.is_pure_affine()
                    && (l.as_constant().is_some() || r.as_constant().is_some())
            }
            AffineExpr::Mod(..) | AffineExpr::FloorDiv(..) | AffineExpr::CeilDiv(..) => false,
        }
    }

    /// Evaluates the expression. `None` on division by zero, overflow or an
    /// out-of-range input position.
    pub fn eval(&self, dims: &[i64], symbols: &[i64]) -> Option<i64> {
        match self {
            AffineExpr::Dim(p) => dims.get(*p as usize).copied(),
            AffineExpr::Symbol(p) => symbols.get(*p as usize).copied(),
            AffineExpr::Constant(c) => Some(*c),
            AffineExpr::Add(l, r) => l.eval(dims, symbols)?.checked_add(r.eval(dims, symbols)?),
            AffineExpr::Mul(l, r) => l.eval(dims, symbols)?.checked_mul(r.eval(dims, symbols)?),
            AffineExpr::Mod(l, r) => modulo(l.eval(dims, symbols)?, r.eval(dims, symbols)?),
            AffineExpr::FloorDiv(l, r) => floor_div(l.eval(dims, symbols)?, r.eval(dims, symbols)?),
            AffineExpr::CeilDiv(l, r) => ceil_div(l.eval(dims, symbols)?, r.eval(dims, symbols)?),
        }
    }

    /// Flattens into `[dim coeffs.., symbol coeffs.., constant]`.
    ///
    /// Fails for semi-affine terms: `mod`, `floordiv`, `ceildiv` over
    /// non-constants and products of two non-constant terms.
    pub fn flatten(&self, num_dims: u32, num_symbols: u32) -> Option<Vec<i64>> {
        let width = (num_dims + num_symbols) as usize + 1;
        let mut row = vec![0i64; width];
        match self {
            AffineExpr::Dim(p) => {
                if *p >= num_dims {
                    return None;
                }
                row[*p as usize] = 1;
            }
            AffineExpr::Symbol(p) => {
                if *p >= num_symbols {
                    return None;
                }
                row[(num_dims + p) as usize] = 1;
            }
            AffineExpr::Constant(c) => row[width - 1] = *c,
            AffineExpr::Add(l, r) => {
                let l = l.flatten(num_dims, num_symbols)?;
                let r = r.flatten(num_dims, num_symbols)?;
                for i in 0..width {
                    row[i] = l[i].checked_add(r[i])?;
                }
            }
            AffineExpr::Mul(l, r) => {
                let l = l.flatten(num_dims, num_symbols)?;
                let r = r.flatten(num_dims, num_symbols)?;
                let (scale, other) = if is_constant_row(&l) {
                    (l[width - 1], r)
                } else if is_constant_row(&r) {
                    (r[width - 1], l)
                } else {
                    return None;
                };
                for i in 0..width {
                    row[i] = other[i].checked_mul(scale)?;
                }
            }
            AffineExpr::Mod(l, r) | AffineExpr::FloorDiv(l, r) | AffineExpr::CeilDiv(l, r) => {
                let l = l.flatten(num_dims, num_symbols)?;
                let r = r.flatten(num_dims, num_symbols)?;
                if !is_constant_row(&l) || !is_constant_row(&r) {
                    return None;
                }
                let (a, b) = (l[width - 1], r[width - 1]);
                row[width - 1] = match self {
                    AffineExpr::Mod(..) => modulo(a, b)?,
                    AffineExpr::FloorDiv(..) => floor_div(a, b)?,
                    _ => ceil_div(a, b)?,
                };
            }
        }
        Some(row)
    }

    /// Renders the expression with the given names standing in for inputs.
    pub fn render(&self, dims: &[String], symbols: &[String]) -> String {
        let name = |names: &[String], p: u32, prefix: char| {
            names
                .get(p as usize)
                .cloned()
                .unwrap_or_else(|| format!("{}{}", prefix, p))
        };
        match self {
            AffineExpr::Dim(p) => name(dims, *p, 'd'),
            AffineExpr::Symbol(p) => name(symbols, *p, 's'),
            AffineExpr::Constant(c) => c.to_string(),
            AffineExpr::Add(l, r) => {
                let lhs = l.render(dims, symbols);
                match r.as_ref() {
                    AffineExpr::Constant(c) if *c < 0 => format!("{} - {}", lhs, c.unsigned_abs()),
                    AffineExpr::Mul(x, k) if k.as_constant() == Some(-1) => {
                        format!("{} - {}", lhs, x.render_operand(dims, symbols))
                    }
                    _ => format!("{} + {}", lhs, r.render(dims, symbols)),
                }
            }
            AffineExpr::Mul(l, r) => {
                if r.as_constant() == Some(-1) {
                    return format!("-{}", l.render_operand(dims, symbols));
                }
                format!(
                    "{} * {}",
                    l.render_operand(dims, symbols),
                    r.render_operand(dims, symbols)
                )
            }
            AffineExpr::Mod(l, r) => self.render_binary(l, r, "mod", dims, symbols),
            AffineExpr::FloorDiv(l, r) => self.render_binary(l, r, "floordiv", dims, symbols),
            AffineExpr::CeilDiv(l, r) => self.render_binary(l, r, "ceildiv", dims, symbols),
        }
    }

    fn render_binary(
        &self,
        l: &AffineExpr,
        r: &AffineExpr,
        op: &str,
        dims: &[String],
        symbols: &[String],
    ) -> String {
        format!(
            "{} {} {}",
            l.render_operand(dims, symbols),
            op,
            r.render_operand(dims, symbols)
        )
    }

    fn render_operand(&self, dims: &[String], symbols: &[String]) -> String {
        match self {
            AffineExpr::Dim(_) | AffineExpr::Symbol(_) | AffineExpr::Constant(_) => {
                self.render(dims, symbols)
            }
            _ => format!("({})", self.render(dims, symbols)),
        }
    }
}

fn is_constant_row(row: &[i64]) -> bool {
    row[..row.len() - 1].iter().all(|&c| c == 0)
}

impl From<i64> for AffineExpr {
    fn from(value: i64) -> Self {
        AffineExpr::Constant(value)
    }
}

impl Add for AffineExpr {
    type Output = AffineExpr;

    fn add(self, rhs: AffineExpr) -> AffineExpr {
        match (&self, &rhs) {
            (AffineExpr::Constant(l), AffineExpr::Constant(r)) => match l.checked_add(*r) {
                Some(v) => AffineExpr::Constant(v),
                None => AffineExpr::Add(Box::new(self), Box::new(rhs)),
            },
            (AffineExpr::Constant(0), _) => rhs,
            (_, AffineExpr::Constant(0)) => self,
            // Keep constants on the right.
            (AffineExpr::Constant(_), _) => AffineExpr::Add(Box::new(rhs), Box::new(self)),
            _ => AffineExpr::Add(Box::new(self), Box::new(rhs)),
        }
    }
}

impl Add<i64> for AffineExpr {
    type Output = AffineExpr;

    fn add(self, rhs: i64) -> AffineExpr {
        self + AffineExpr::Constant(rhs)
    }
}

impl Mul for AffineExpr {
    type Output = AffineExpr;

    fn mul(self, rhs: AffineExpr) -> AffineExpr {
        match (&self, &rhs) {
            (AffineExpr::Constant(l), AffineExpr::Constant(r)) => match l.checked_mul(*r) {
                Some(v) => AffineExpr::Constant(v),
                None => AffineExpr::Mul(Box::new(self), Box::new(rhs)),
            },
            (AffineExpr::Constant(0), _) | (_, AffineExpr::Constant(0)) => AffineExpr::Constant(0),
            (AffineExpr::Constant(1), _) => rhs,
            (_, AffineExpr::Constant(1)) => self,
            (AffineExpr::Constant(_), _) => AffineExpr::Mul(Box::new(rhs), Box::new(self)),
            _ => AffineExpr::Mul(Box::new(self), Box::new(rhs)),
        }
    }
}

impl Mul<i64> for AffineExpr {
    type Output = AffineExpr;

    fn mul(self, rhs: i64) -> AffineExpr {
        self * AffineExpr::Constant(rhs)
    }
}

impl Neg for AffineExpr {
    type Output = AffineExpr;

    fn neg(self) -> AffineExpr {
        self * -1
    }
}

impl Sub for AffineExpr {
    type Output = AffineExpr;

    fn sub(self, rhs: AffineExpr) -> AffineExpr {
        self + (-rhs)
    }
}

impl Sub<i64> for AffineExpr {
    type Output = AffineExpr;

    fn sub(self, rhs: i64) -> AffineExpr {
        match rhs.checked_neg() {
            Some(neg) => self + neg,
            None => self - AffineExpr::Constant(rhs),
        }
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&[], &[]))
    }
}

fn input_names(num_dims: u32, num_symbols: u32) -> (Vec<String>, Vec<String>) {
    (
        (0..num_dims).map(|i| format!("d{}", i)).collect(),
        (0..num_symbols).map(|i| format!("s{}", i)).collect(),
    )
}

fn split_operands(operands: &[String], num_dims: u32) -> (&[String], &[String]) {
    let split = (num_dims as usize).min(operands.len());
    operands.split_at(split)
}

/// A multi-result affine function of `num_dims` dimensions and
/// `num_symbols` symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffineMap {
    pub num_dims: u32,
    pub num_symbols: u32,
    pub results: Vec<AffineExpr>,
}

impl AffineMap {
    pub fn new(num_dims: u32, num_symbols: u32, results: Vec<AffineExpr>) -> Self {
        AffineMap {
            num_dims,
            num_symbols,
            results,
        }
    }

    /// `() -> (value)`
    pub fn constant(value: i64) -> Self {
        AffineMap::new(0, 0, vec![AffineExpr::Constant(value)])
    }

    /// `(d0, .., dn-1) -> (d0, .., dn-1)`
    pub fn identity(rank: u32) -> Self {
        AffineMap::new(rank, 0, (0..rank).map(AffineExpr::Dim).collect())
    }

    pub fn num_inputs(&self) -> usize {
        (self.num_dims + self.num_symbols) as usize
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    pub fn single_constant_result(&self) -> Option<i64> {
        match self.results.as_slice() {
            [only] => only.as_constant(),
            _ => None,
        }
    }

    pub fn eval(&self, inputs: &[i64]) -> Option<Vec<i64>> {
        if inputs.len() != self.num_inputs() {
            return None;
        }
        let (dims, symbols) = inputs.split_at(self.num_dims as usize);
        self.results.iter().map(|r| r.eval(dims, symbols)).collect()
    }

    /// Renders the results with operand names substituted for inputs.
    pub fn render(&self, operands: &[String]) -> String {
        let (dims, symbols) = split_operands(operands, self.num_dims);
        self.results
            .iter()
            .map(|r| r.render(dims, symbols))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (dims, symbols) = input_names(self.num_dims, self.num_symbols);
        write!(f, "({})", dims.join(", "))?;
        if !symbols.is_empty() {
            write!(f, "[{}]", symbols.join(", "))?;
        }
        let mut names = dims;
        names.extend(symbols);
        write!(f, " -> ({})", self.render(&names))
    }
}

/// A conjunction of affine constraints, each `expr == 0` or `expr >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegerSet {
    pub num_dims: u32,
    pub num_symbols: u32,
    pub constraints: Vec<AffineExpr>,
    pub eq_flags: Vec<bool>,
}

impl IntegerSet {
    pub fn new(
        num_dims: u32,
        num_symbols: u32,
        constraints: Vec<AffineExpr>,
        eq_flags: Vec<bool>,
    ) -> Self {
        assert_eq!(
            constraints.len(),
            eq_flags.len(),
            "every constraint needs an equality flag"
        );
        IntegerSet {
            num_dims,
            num_symbols,
            constraints,
            eq_flags,
        }
    }

    pub fn num_inputs(&self) -> usize {
        (self.num_dims + self.num_symbols) as usize
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Whether the point satisfies every constraint.
    pub fn contains(&self, inputs: &[i64]) -> Option<bool> {
        if inputs.len() != self.num_inputs() {
            return None;
        }
        let (dims, symbols) = inputs.split_at(self.num_dims as usize);
        for (expr, &is_eq) in self.constraints.iter().zip(&self.eq_flags) {
            let v = expr.eval(dims, symbols)?;
            if (is_eq && v != 0) || (!is_eq && v < 0) {
                return Some(false);
            }
        }
        Some(true)
    }

    pub fn render(&self, operands: &[String]) -> String {
        let (dims, symbols) = split_operands(operands, self.num_dims);
        self.constraints
            .iter()
            .zip(&self.eq_flags)
            .map(|(c, &eq)| format!("{} {} 0", c.render(dims, symbols), if eq { "==" } else { ">=" }))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for IntegerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (dims, symbols) = input_names(self.num_dims, self.num_symbols);
        write!(f, "({})", dims.join(", "))?;
        if !symbols.is_empty() {
            write!(f, "[{}]", symbols.join(", "))?;
        }
        let mut names = dims;
        names.extend(symbols);
        write!(f, " : ({})", self.render(&names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(p: u32) -> AffineExpr {
        AffineExpr::dim(p)
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(AffineExpr::constant(2) + 3, AffineExpr::Constant(5));
        assert_eq!(d(0) * 1, d(0));
        assert_eq!(d(0) * 0, AffineExpr::Constant(0));
        assert_eq!(d(0) + 0, d(0));
        assert_eq!(AffineExpr::constant(7).floor_div(2), AffineExpr::Constant(3));
        assert_eq!(AffineExpr::constant(-7).floor_div(2), AffineExpr::Constant(-4));
        assert_eq!(AffineExpr::constant(-7).ceil_div(2), AffineExpr::Constant(-3));
        assert_eq!(AffineExpr::constant(-7).modulo(2), AffineExpr::Constant(1));
    }

    #[test]
    fn test_eval() {
        let e = d(0) * 2 + AffineExpr::symbol(0) - 1;
        assert_eq!(e.eval(&[3], &[10]), Some(15));
        let m = d(0).modulo(4);
        assert_eq!(m.eval(&[-1], &[]), Some(3));
        assert_eq!(d(0).floor_div(d(1)).eval(&[1, 0], &[]), None);
    }

    #[test]
    fn test_flatten() {
        let e = d(0) * 3 + AffineExpr::symbol(0) * -2 + 5;
        assert_eq!(e.flatten(2, 1), Some(vec![3, 0, -2, 5]));
        assert_eq!(d(0).modulo(2).flatten(1, 0), None);
        assert_eq!((d(0) * d(1)).flatten(2, 0), None);
        assert_eq!(AffineExpr::constant(9).floor_div(2).flatten(0, 0), Some(vec![4]));
        assert_eq!(d(3).flatten(1, 0), None);
    }

    #[test]
    fn test_map_display_and_eval() {
        let map = AffineMap::new(2, 1, vec![d(0) + 1, d(1) - AffineExpr::symbol(0)]);
        assert_eq!(map.to_string(), "(d0, d1)[s0] -> (d0 + 1, d1 - s0)");
        assert_eq!(map.eval(&[1, 5, 2]), Some(vec![2, 3]));
        assert_eq!(map.eval(&[1]), None);
        assert_eq!(AffineMap::constant(4).single_constant_result(), Some(4));
        assert_eq!(AffineMap::identity(2).single_constant_result(), None);
    }

    #[test]
    fn test_integer_set() {
        let set = IntegerSet::new(1, 0, vec![d(0) - 3], vec![true]);
        assert_eq!(set.contains(&[3]), Some(true));
        assert_eq!(set.contains(&[2]), Some(false));
        assert_eq!(set.to_string(), "(d0) : (d0 - 3 == 0)");

        let range = IntegerSet::new(1, 0, vec![d(0), AffineExpr::constant(9) - d(0)], vec![false, false]);
        assert_eq!(range.contains(&[0]), Some(true));
        assert_eq!(range.contains(&[10]), Some(false));
    }

    #[test]
    fn test_render_with_operands() {
        let map = AffineMap::new(1, 0, vec![d(0) * 2 - 1]);
        assert_eq!(map.render(&["%i".to_string()]), "%i * 2 - 1");
    }
}
