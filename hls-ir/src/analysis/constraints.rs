//! Integer constraint systems and an emptiness test.
//!
//! Rows are `[c_0, .., c_{n-1}, constant]` and read `sum(c_i * x_i) + constant`
//! compared against zero. Emptiness uses Gaussian elimination on unit
//! equalities followed by Fourier-Motzkin with GCD tightening. The test is
//! sound for emptiness: when it answers `true` there is no integer point.
//! It may miss some empty systems, and answers `false` when it gives up.

/// Combined row count beyond which elimination is abandoned.
const MAX_ROWS: usize = 2048;

#[derive(Debug, Clone, Default)]
pub struct FlatConstraints {
    num_vars: usize,
    equalities: Vec<Vec<i64>>,
    inequalities: Vec<Vec<i64>>,
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.min(i64::MAX as u64) as i64
}

fn floor_div(a: i64, b: i64) -> i64 {
    let (d, r) = (a / b, a % b);
    if r != 0 && ((r < 0) != (b < 0)) {
        d - 1
    } else {
        d
    }
}

impl FlatConstraints {
    pub fn new(num_vars: usize) -> Self {
        FlatConstraints {
            num_vars,
            equalities: Vec::new(),
            inequalities: Vec::new(),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Appends a variable, widening every existing row. Returns its index.
    pub fn add_var(&mut self) -> usize {
        let pos = self.num_vars;
        for row in self.equalities.iter_mut().chain(self.inequalities.iter_mut()) {
            row.insert(pos, 0);
        }
        self.num_vars += 1;
        pos
    }

    /// `row == 0`
    pub fn add_equality(&mut self, row: Vec<i64>) {
        assert_eq!(row.len(), self.num_vars + 1, "row width mismatch");
        self.equalities.push(row);
    }

    /// `row >= 0`
    pub fn add_inequality(&mut self, row: Vec<i64>) {
        assert_eq!(row.len(), self.num_vars + 1, "row width mismatch");
        self.inequalities.push(row);
    }

    pub fn num_constraints(&self) -> usize {
        self.equalities.len() + self.inequalities.len()
    }

    /// Whether the system provably has no integer solution.
    pub fn is_empty(&self) -> bool {
        let mut system = self.clone();
        match system.eliminate_all() {
            Some(empty) => empty,
            None => {
                log::trace!("constraint system too large or overflowed; assuming non-empty");
                false
            }
        }
    }

    /// Runs elimination to completion. `Some(true)` proves emptiness;
    /// `None` means overflow or blow-up.
    fn eliminate_all(&mut self) -> Option<bool> {
        if self.normalize_equalities()? {
            return Some(true);
        }
        self.substitute_unit_equalities()?;
        if self.normalize_equalities()? {
            return Some(true);
        }
        for eq in std::mem::take(&mut self.equalities) {
            let neg = eq.iter().map(|c| c.checked_neg()).collect::<Option<Vec<_>>>()?;
            self.inequalities.push(eq);
            self.inequalities.push(neg);
        }
        loop {
            if self.tighten_inequalities()? {
                return Some(true);
            }
            let Some(var) = self.pick_fm_var() else {
                return Some(false);
            };
            self.fourier_motzkin(var)?;
            if self.inequalities.len() > MAX_ROWS {
                return None;
            }
        }
    }

    /// Divides each equality by the GCD of its coefficients. Returns
    /// `Some(true)` if some equality has no integer solution.
    fn normalize_equalities(&mut self) -> Option<bool> {
        let n = self.num_vars;
        let mut kept = Vec::with_capacity(self.equalities.len());
        for mut row in std::mem::take(&mut self.equalities) {
            let g = row[..n].iter().fold(0, |acc, &c| gcd(acc, c));
            if g == 0 {
                if row[n] != 0 {
                    return Some(true);
                }
                continue;
            }
            if row[n] % g != 0 {
                return Some(true);
            }
            for c in row.iter_mut() {
                *c /= g;
            }
            kept.push(row);
        }
        self.equalities = kept;
        Some(false)
    }

    /// Uses each equality with a +-1 coefficient to eliminate that variable
    /// from every other row.
    fn substitute_unit_equalities(&mut self) -> Option<()> {
        let n = self.num_vars;
        let mut i = 0;
        while i < self.equalities.len() {
            let Some(var) = (0..n).find(|&v| self.equalities[i][v].abs() == 1) else {
                i += 1;
                continue;
            };
            let pivot = self.equalities.swap_remove(i);
            let unit = pivot[var];
            for row in self.equalities.iter_mut().chain(self.inequalities.iter_mut()) {
                let factor = row[var];
                if factor == 0 {
                    continue;
                }
                // row -= factor * unit * pivot, which zeroes row[var]
                let scale = factor.checked_mul(unit)?;
                for (r, &p) in row.iter_mut().zip(&pivot) {
                    *r = r.checked_sub(scale.checked_mul(p)?)?;
                }
            }
            i = 0;
        }
        Some(())
    }

    /// Normalizes inequalities by GCD, flooring the constant, and checks
    /// constant rows. Returns `Some(true)` on a violated constant row.
    fn tighten_inequalities(&mut self) -> Option<bool> {
        let n = self.num_vars;
        let mut kept = Vec::with_capacity(self.inequalities.len());
        for mut row in std::mem::take(&mut self.inequalities) {
            let g = row[..n].iter().fold(0, |acc, &c| gcd(acc, c));
            if g == 0 {
                if row[n] < 0 {
                    return Some(true);
                }
                continue;
            }
            if g > 1 {
                for c in row[..n].iter_mut() {
                    *c /= g;
                }
                row[n] = floor_div(row[n], g);
            }
            if !kept.contains(&row) {
                kept.push(row);
            }
        }
        self.inequalities = kept;
        Some(false)
    }

    /// The variable whose elimination creates the fewest new rows, among
    /// variables that still appear.
    fn pick_fm_var(&self) -> Option<usize> {
        (0..self.num_vars)
            .filter_map(|v| {
                let pos = self.inequalities.iter().filter(|r| r[v] > 0).count();
                let neg = self.inequalities.iter().filter(|r| r[v] < 0).count();
                (pos + neg > 0).then_some((pos * neg, v))
            })
            .min()
            .map(|(_, v)| v)
    }

    fn fourier_motzkin(&mut self, var: usize) -> Option<()> {
        let (mut lower, mut upper, mut rest) = (Vec::new(), Vec::new(), Vec::new());
        for row in std::mem::take(&mut self.inequalities) {
            match row[var].signum() {
                1 => lower.push(row),
                -1 => upper.push(row),
                _ => rest.push(row),
            }
        }
        for lo in &lower {
            for up in &upper {
                let (a, b) = (lo[var], up[var].checked_neg()?);
                let combined = lo
                    .iter()
                    .zip(up)
                    .map(|(&l, &u)| b.checked_mul(l)?.checked_add(a.checked_mul(u)?))
                    .collect::<Option<Vec<_>>>()?;
                rest.push(combined);
            }
        }
        self.inequalities = rest;
        Some(())
    }
}
