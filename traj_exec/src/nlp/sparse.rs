//! Sparse symmetric linear algebra for the Newton steps of the solvers
//!
//! Collocation problems couple each variable with a handful of neighbours
//! along the track. Once the variables are reordered with reverse
//! Cuthill-McKee the nonzeros of the Hessian sit in a narrow envelope around
//! the diagonal, which a skyline Cholesky factorisation fills without any
//! further fill-in bookkeeping.

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Lower triangle of a symmetric matrix stored row by row, each row from its
/// first nonzero column up to the diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct SkylineMatrix {
    /// First stored column of each row.
    first: Vec<usize>,

    /// Offset of each row in `values`.
    start: Vec<usize>,

    values: Vec<f64>,
}

/// Cholesky factor `L` of a [`SkylineMatrix`], with the same profile.
#[derive(Debug, Clone)]
pub struct SkylineCholesky {
    factor: SkylineMatrix,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SkylineMatrix {
    /// Zero matrix where row `i` stores the columns `first[i]..=i`.
    ///
    /// Entries of `first` greater than their row are clamped to the row.
    pub fn zeros(first: Vec<usize>) -> Self {
        let first: Vec<usize> = first.into_iter().enumerate().map(|(i, f)| f.min(i)).collect();

        let mut start = Vec::with_capacity(first.len());
        let mut len = 0;
        for (i, f) in first.iter().enumerate() {
            start.push(len);
            len += i - f + 1;
        }

        Self {
            first,
            start,
            values: vec![0.0; len],
        }
    }

    /// Profile of a matrix whose nonzeros are given by `neighbours`, the
    /// off-diagonal columns of each row.
    pub fn from_neighbours(neighbours: &[Vec<usize>]) -> Self {
        let first = neighbours
            .iter()
            .enumerate()
            .map(|(i, n)| n.iter().cloned().fold(i, usize::min))
            .collect();

        Self::zeros(first)
    }

    pub fn dim(&self) -> usize {
        self.first.len()
    }

    /// Number of stored entries.
    pub fn stored(&self) -> usize {
        self.values.len()
    }

    pub fn fill_zero(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Value at `(i, j)`, zero outside the profile.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (i, j) = if i >= j { (i, j) } else { (j, i) };
        if j < self.first[i] {
            0.0
        } else {
            self.values[self.start[i] + j - self.first[i]]
        }
    }

    /// Add `value` to `(i, j)` and, by symmetry, to `(j, i)`.
    ///
    /// Returns `false` if the entry is outside the profile, leaving the
    /// matrix unchanged.
    pub fn add(&mut self, i: usize, j: usize, value: f64) -> bool {
        let (i, j) = if i >= j { (i, j) } else { (j, i) };
        if j < self.first[i] {
            return false;
        }
        self.values[self.start[i] + j - self.first[i]] += value;
        true
    }

    /// Largest absolute value on the diagonal.
    pub fn max_diagonal(&self) -> f64 {
        (0..self.dim()).map(|i| self.get(i, i).abs()).fold(0.0, f64::max)
    }

    /// Copy of the matrix where the rows and columns flagged in `pinned` are
    /// replaced by the identity and `shift` is added to the other diagonal
    /// entries.
    pub fn shifted(&self, shift: f64, pinned: &[bool]) -> Self {
        let mut out = self.clone();

        for i in 0..self.dim() {
            let row = out.start[i];
            for j in self.first[i]..=i {
                let v = &mut out.values[row + j - self.first[i]];
                if pinned[i] || pinned[j] {
                    *v = 0.0;
                }
                if i == j {
                    *v += if pinned[i] { 1.0 } else { shift };
                }
            }
        }

        out
    }

    /// Factorise the matrix as `L * L^T`.
    ///
    /// Returns `None` if the matrix is not numerically positive definite.
    pub fn cholesky(&self) -> Option<SkylineCholesky> {
        let mut l = self.clone();

        for i in 0..l.dim() {
            let fi = l.first[i];
            let ri = l.start[i];

            for j in fi..i {
                let fj = l.first[j];
                let rj = l.start[j];
                let from = fi.max(fj);

                let mut sum = l.values[ri + j - fi];
                for k in from..j {
                    sum -= l.values[ri + k - fi] * l.values[rj + k - fj];
                }
                l.values[ri + j - fi] = sum / l.values[rj + j - fj];
            }

            let mut diag = l.values[ri + i - fi];
            for k in fi..i {
                let v = l.values[ri + k - fi];
                diag -= v * v;
            }
            if !(diag > 0.0) || !diag.is_finite() {
                return None;
            }
            l.values[ri + i - fi] = diag.sqrt();
        }

        Some(SkylineCholesky { factor: l })
    }
}

impl SkylineCholesky {
    /// Solve `A x = b` in place.
    pub fn solve(&self, b: &mut [f64]) {
        let l = &self.factor;

        // L y = b
        for i in 0..l.dim() {
            let (fi, ri) = (l.first[i], l.start[i]);
            let mut sum = b[i];
            for k in fi..i {
                sum -= l.values[ri + k - fi] * b[k];
            }
            b[i] = sum / l.values[ri + i - fi];
        }

        // L^T x = y
        for i in (0..l.dim()).rev() {
            let (fi, ri) = (l.first[i], l.start[i]);
            b[i] /= l.values[ri + i - fi];
            let xi = b[i];
            for k in fi..i {
                b[k] -= l.values[ri + k - fi] * xi;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Reverse Cuthill-McKee ordering of an undirected graph.
///
/// `adjacency` lists the neighbours of every node. Returns the nodes in
/// their new order, so `order[new] == old`. Each connected component is
/// walked breadth first from one of its lowest degree nodes, visiting
/// neighbours by increasing degree.
pub fn reverse_cuthill_mckee(adjacency: &[Vec<usize>]) -> Vec<usize> {
    let n = adjacency.len();
    let degree: Vec<usize> = adjacency.iter().map(|a| a.len()).collect();

    let mut by_degree: Vec<usize> = (0..n).collect();
    by_degree.sort_by_key(|&i| (degree[i], i));

    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    for &root in by_degree.iter() {
        if visited[root] {
            continue;
        }

        visited[root] = true;
        let mut head = order.len();
        order.push(root);

        while head < order.len() {
            let node = order[head];
            head += 1;

            let mut next: Vec<usize> = adjacency[node].iter().cloned().filter(|&j| !visited[j]).collect();
            next.sort_by_key(|&j| (degree[j], j));
            next.dedup();

            for j in next {
                visited[j] = true;
                order.push(j);
            }
        }
    }

    order.reverse();
    order
}

/// Inverse of a permutation.
pub fn invert(order: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; order.len()];
    for (new, &old) in order.iter().enumerate() {
        inverse[old] = new;
    }
    inverse
}

#[cfg(test)]
mod test {
    use super::*;

    /// Neighbours of a chain of `n` nodes numbered in a scattered order.
    fn scattered_chain(n: usize) -> (Vec<usize>, Vec<Vec<usize>>) {
        let label: Vec<usize> = (0..n).map(|i| (i * 7) % n).collect();
        let mut adjacency = vec![Vec::new(); n];
        for i in 1..n {
            adjacency[label[i]].push(label[i - 1]);
            adjacency[label[i - 1]].push(label[i]);
        }
        (label, adjacency)
    }

    fn bandwidth(adjacency: &[Vec<usize>], position: &[usize]) -> usize {
        adjacency
            .iter()
            .enumerate()
            .flat_map(|(i, a)| a.iter().map(move |&j| (i, j)))
            .map(|(i, j)| (position[i] as isize - position[j] as isize).abs() as usize)
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_rcm_recovers_chain() {
        let (label, adjacency) = scattered_chain(20);
        assert!(bandwidth(&adjacency, &label) > 1);

        let order = reverse_cuthill_mckee(&adjacency);
        let position = invert(&order);

        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
        assert_eq!(bandwidth(&adjacency, &position), 1);
    }

    #[test]
    fn test_rcm_disconnected() {
        let adjacency = vec![vec![2], vec![], vec![0]];
        let order = reverse_cuthill_mckee(&adjacency);

        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[test]
    fn test_profile() {
        let m = SkylineMatrix::from_neighbours(&[vec![], vec![0], vec![], vec![1, 2]]);
        assert_eq!(m.dim(), 4);
        // Rows store 1, 2, 1 and 3 entries
        assert_eq!(m.stored(), 7);

        let mut m = m;
        assert!(m.add(0, 1, 2.0));
        assert!(m.add(3, 1, -1.0));
        assert!(!m.add(3, 0, 1.0));
        assert_eq!(m.get(1, 0), 2.0);
        assert_eq!(m.get(1, 3), -1.0);
        assert_eq!(m.get(2, 0), 0.0);
    }

    #[test]
    fn test_cholesky_solve_tridiagonal() {
        let n = 6;
        let neighbours: Vec<Vec<usize>> = (0..n).map(|i| if i > 0 { vec![i - 1] } else { vec![] }).collect();
        let mut m = SkylineMatrix::from_neighbours(&neighbours);
        for i in 0..n {
            m.add(i, i, 4.0);
            if i > 0 {
                m.add(i, i - 1, -1.0);
            }
        }

        let x: Vec<f64> = (0..n).map(|i| i as f64 - 2.5).collect();
        let mut b: Vec<f64> = (0..n)
            .map(|i| (0..n).map(|j| m.get(i, j) * x[j]).sum())
            .collect();

        m.cholesky().unwrap().solve(&mut b);
        for i in 0..n {
            assert!((b[i] - x[i]).abs() < 1e-12, "{:?}", b);
        }
    }

    #[test]
    fn test_cholesky_with_envelope_fill() {
        // Row 3 reaches back to column 0 past zeros, which fill in
        let mut m = SkylineMatrix::zeros(vec![0, 0, 1, 0]);
        let dense = [
            [5.0, 1.0, 0.0, 1.0],
            [1.0, 4.0, 1.0, 0.0],
            [0.0, 1.0, 3.0, 1.0],
            [1.0, 0.0, 1.0, 6.0],
        ];
        for i in 0..4 {
            for j in 0..=i {
                if dense[i][j] != 0.0 {
                    assert!(m.add(i, j, dense[i][j]));
                }
            }
        }

        let mut b = [1.0, 2.0, 3.0, 4.0];
        m.cholesky().unwrap().solve(&mut b);

        for i in 0..4 {
            let ax: f64 = (0..4).map(|j| dense[i][j] * b[j]).sum();
            assert!((ax - (i + 1) as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn test_indefinite_and_shift() {
        let mut m = SkylineMatrix::zeros(vec![0, 0]);
        m.add(0, 0, 1.0);
        m.add(1, 1, -1.0);
        assert!(m.cholesky().is_none());

        // A shift makes it definite, a pinned row becomes the identity
        assert!(m.shifted(2.0, &[false, false]).cholesky().is_some());

        let pinned = m.shifted(0.5, &[false, true]);
        assert_eq!(pinned.get(1, 1), 1.0);
        assert_eq!(pinned.get(0, 0), 1.5);
        assert!(pinned.cholesky().is_some());
    }
}
