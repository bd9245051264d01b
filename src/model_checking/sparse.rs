use std::ops::Range;

use super::types::OptimizationDirection;
use super::value_type::SolverValue;

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixEntry<V> {
    pub column: usize,
    pub value: V,
}

/// Row-grouped sparse matrix. Each row group is a state, each row of a group
/// one of its choices.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<V> {
    row_group_indices: Vec<usize>,
    row_indices: Vec<usize>,
    entries: Vec<MatrixEntry<V>>,
    column_count: usize,
}

impl<V: SolverValue> SparseMatrix<V> {
    pub fn row_group_count(&self) -> usize {
        self.row_group_indices.len() - 1
    }

    pub fn row_count(&self) -> usize {
        self.row_indices.len() - 1
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Group boundaries; has `row_group_count() + 1` entries.
    pub fn row_group_indices(&self) -> &[usize] {
        &self.row_group_indices
    }

    pub fn row_group(&self, group: usize) -> Range<usize> {
        self.row_group_indices[group]..self.row_group_indices[group + 1]
    }

    pub fn row_group_size(&self, group: usize) -> usize {
        self.row_group_indices[group + 1] - self.row_group_indices[group]
    }

    pub fn first_empty_row_group(&self) -> Option<usize> {
        (0..self.row_group_count()).find(|group| self.row_group_size(*group) == 0)
    }

    pub fn has_trivial_row_grouping(&self) -> bool {
        self.row_group_indices.iter().enumerate().all(|(i, start)| i == *start)
    }

    pub fn row(&self, row: usize) -> &[MatrixEntry<V>] {
        &self.entries[self.row_indices[row]..self.row_indices[row + 1]]
    }

    /// Row `offset` of `group`.
    pub fn group_row(&self, group: usize, offset: usize) -> &[MatrixEntry<V>] {
        debug_assert!(offset < self.row_group_size(group));
        self.row(self.row_group_indices[group] + offset)
    }

    /// All entries of the rows of `group`.
    pub fn row_group_entries(&self, group: usize) -> &[MatrixEntry<V>] {
        let rows = self.row_group(group);
        &self.entries[self.row_indices[rows.start]..self.row_indices[rows.end]]
    }

    pub fn multiply_row_with_vector(&self, row: usize, x: &[V]) -> V {
        self.row(row)
            .iter()
            .fold(V::zero(), |sum, entry| sum + entry.value.clone() * x[entry.column].clone())
    }

    /// Backward transitions: row `s` lists every state with a choice reaching
    /// `s` together with the summed probability over those choices.
    pub fn transpose(&self) -> SparseMatrix<V> {
        let mut predecessors: Vec<Vec<MatrixEntry<V>>> = vec![Vec::new(); self.column_count];
        for group in 0..self.row_group_count() {
            for entry in self.row_group_entries(group) {
                let row = &mut predecessors[entry.column];
                match row.last_mut() {
                    Some(last) if last.column == group => {
                        last.value = last.value.clone() + entry.value.clone();
                    }
                    _ => row.push(MatrixEntry { column: group, value: entry.value.clone() }),
                }
            }
        }
        let mut builder = SparseMatrixBuilder::new();
        for row in predecessors {
            builder.new_row_group();
            builder.add_row(row.into_iter().map(|e| (e.column, e.value)));
        }
        builder.build(self.row_group_count())
    }

    /// Resolves the nondeterminism: one row per group, chosen by the local
    /// index in `scheduler`.
    pub fn select_rows_from_row_groups(&self, scheduler: &[usize]) -> SparseMatrix<V> {
        debug_assert_eq!(scheduler.len(), self.row_group_count());
        let mut builder = SparseMatrixBuilder::new();
        for (group, choice) in scheduler.iter().enumerate() {
            builder.new_row_group();
            builder.add_row(
                self.group_row(group, *choice)
                    .iter()
                    .map(|e| (e.column, e.value.clone())),
            );
        }
        builder.build(self.column_count)
    }

    /// Optimal value of `group` over its rows and the local index of the
    /// first row attaining it.
    pub fn optimal_value_for_row_group(&self, dir: OptimizationDirection, group: usize, x: &[V], b: &[V]) -> (V, usize) {
        let rows = self.row_group(group);
        debug_assert!(!rows.is_empty(), "row group {} has no rows", group);
        let start = rows.start;
        let mut best = self.multiply_row_with_vector(start, x) + b[start].clone();
        let mut best_row = start;
        for row in rows.skip(1) {
            let value = self.multiply_row_with_vector(row, x) + b[row].clone();
            if dir.improves(&best, &value) {
                best = value;
                best_row = row;
            }
        }
        (best, best_row - start)
    }

    /// `result[g] = opt_{r in g} (A_r x + b_r)`, optionally recording the
    /// optimal local choice per group.
    pub fn multiply_and_reduce(
        &self,
        dir: OptimizationDirection,
        x: &[V],
        b: &[V],
        result: &mut [V],
        mut choices: Option<&mut [usize]>,
    ) {
        for group in 0..self.row_group_count() {
            let (value, choice) = self.optimal_value_for_row_group(dir, group, x, b);
            result[group] = value;
            if let Some(choices) = choices.as_mut() {
                choices[group] = choice;
            }
        }
    }

    /// In-place variant of `multiply_and_reduce`: later groups already see
    /// the updated values of earlier ones.
    pub fn multiply_and_reduce_gauss_seidel(&self, dir: OptimizationDirection, x: &mut [V], b: &[V]) {
        for group in 0..self.row_group_count() {
            let (value, _) = self.optimal_value_for_row_group(dir, group, x, b);
            x[group] = value;
        }
    }

    /// `result = A x + b` for a matrix with one row per group.
    pub fn multiply(&self, x: &[V], b: Option<&[V]>, result: &mut [V]) {
        for (row, target) in result.iter_mut().enumerate().take(self.row_count()) {
            let mut value = self.multiply_row_with_vector(row, x);
            if let Some(b) = b {
                value = value + b[row].clone();
            }
            *target = value;
        }
    }

    /// Rebuilds the matrix in another numeric type.
    pub fn convert<W: SolverValue>(&self) -> SparseMatrix<W> {
        SparseMatrix {
            row_group_indices: self.row_group_indices.clone(),
            row_indices: self.row_indices.clone(),
            entries: self
                .entries
                .iter()
                .map(|e| MatrixEntry {
                    column: e.column,
                    value: convert_value(&e.value),
                })
                .collect(),
            column_count: self.column_count,
        }
    }
}

pub fn convert_value<V: SolverValue, W: SolverValue>(value: &V) -> W {
    if V::IS_EXACT || W::IS_EXACT {
        W::from_rational(&value.to_rational())
    } else {
        W::from_double(value.to_double())
    }
}

pub fn convert_vector<V: SolverValue, W: SolverValue>(values: &[V]) -> Vec<W> {
    values.iter().map(convert_value).collect()
}

#[derive(Debug, Clone)]
pub struct SparseMatrixBuilder<V> {
    row_group_indices: Vec<usize>,
    row_indices: Vec<usize>,
    entries: Vec<MatrixEntry<V>>,
}

impl<V: SolverValue> SparseMatrixBuilder<V> {
    pub fn new() -> SparseMatrixBuilder<V> {
        SparseMatrixBuilder {
            row_group_indices: Vec::new(),
            row_indices: vec![0],
            entries: Vec::new(),
        }
    }

    /// Starts a new row group at the next row.
    pub fn new_row_group(&mut self) {
        self.row_group_indices.push(self.row_indices.len() - 1);
    }

    /// Appends a row to the current group. Entries are sorted by column and
    /// duplicate columns are summed.
    pub fn add_row<I: IntoIterator<Item = (usize, V)>>(&mut self, row: I) {
        debug_assert!(!self.row_group_indices.is_empty(), "row added before the first row group");
        let mut row: Vec<(usize, V)> = row.into_iter().collect();
        row.sort_by_key(|(column, _)| *column);
        let row_start = self.entries.len();
        for (column, value) in row {
            let len = self.entries.len();
            if len > row_start && self.entries[len - 1].column == column {
                self.entries[len - 1].value = self.entries[len - 1].value.clone() + value;
            } else {
                self.entries.push(MatrixEntry { column, value });
            }
        }
        self.row_indices.push(self.entries.len());
    }

    pub fn current_row_count(&self) -> usize {
        self.row_indices.len() - 1
    }

    /// Row groups without rows are kept; solvers reject them before iterating.
    pub fn build(mut self, column_count: usize) -> SparseMatrix<V> {
        self.row_group_indices.push(self.row_indices.len() - 1);
        debug_assert!(self.entries.iter().all(|e| e.column < column_count));
        SparseMatrix {
            row_group_indices: self.row_group_indices,
            row_indices: self.row_indices,
            entries: self.entries,
            column_count,
        }
    }
}

impl<V: SolverValue> Default for SparseMatrixBuilder<V> {
    fn default() -> Self {
        SparseMatrixBuilder::new()
    }
}

/// Builds a matrix from per-state choice lists; row `[(s', p), ..]`.
pub fn matrix_from_groups<V: SolverValue>(groups: Vec<Vec<Vec<(usize, V)>>>) -> SparseMatrix<V> {
    let column_count = groups.len();
    let mut builder = SparseMatrixBuilder::new();
    for group in groups {
        builder.new_row_group();
        for row in group {
            builder.add_row(row);
        }
    }
    builder.build(column_count)
}

/// Compares two vectors entrywise up to `precision`, absolutely or relative
/// to the entries of `new`.
pub fn equal_modulo_precision<V: SolverValue>(old: &[V], new: &[V], precision: &V, relative: bool) -> bool {
    old.iter()
        .zip(new.iter())
        .all(|(a, b)| values_equal_modulo_precision(a, b, precision, relative))
}

pub fn equal_modulo_precision_filtered<V: SolverValue>(
    old: &[V],
    new: &[V],
    filter: &[bool],
    precision: &V,
    relative: bool,
) -> bool {
    filter
        .iter()
        .enumerate()
        .filter(|(_, relevant)| **relevant)
        .all(|(i, _)| values_equal_modulo_precision(&old[i], &new[i], precision, relative))
}

fn values_equal_modulo_precision<V: SolverValue>(a: &V, b: &V, precision: &V, relative: bool) -> bool {
    if relative {
        if b.is_zero() {
            return a.abs() <= *precision;
        }
        ((a.clone() - b.clone()) / b.clone()).abs() <= *precision
    } else {
        (a.clone() - b.clone()).abs() <= *precision
    }
}

/// `target[group] = source[row_group_indices[group] + choices[group]]`.
pub fn select_vector_values<V: Clone>(choices: &[usize], row_group_indices: &[usize], source: &[V]) -> Vec<V> {
    choices
        .iter()
        .enumerate()
        .map(|(group, choice)| source[row_group_indices[group] + choice].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn small_mdp() -> SparseMatrix<f64> {
        matrix_from_groups(vec![
            vec![vec![(1, 0.5), (2, 0.5)], vec![(0, 1.0)]],
            vec![vec![(2, 1.0)]],
            vec![vec![(2, 0.25), (0, 0.75)]],
        ])
    }

    #[test]
    fn test_row_groups() {
        let m = small_mdp();
        assert_eq!(m.row_group_count(), 3);
        assert_eq!(m.row_count(), 4);
        assert_eq!(m.row_group_indices(), &[0, 2, 3, 4]);
        assert_eq!(m.row_group(0), 0..2);
        assert!(!m.has_trivial_row_grouping());
        let row = m.group_row(2, 0);
        assert_eq!(row[0], MatrixEntry { column: 0, value: 0.75 });
        assert_eq!(m.row_group_entries(0).len(), 3);
    }

    #[test]
    fn test_transpose_sums_choices() {
        let m = matrix_from_groups(vec![
            vec![vec![(1, 0.5), (0, 0.5)], vec![(1, 1.0)]],
            vec![vec![(1, 1.0)]],
        ]);
        let t = m.transpose();
        assert!(t.has_trivial_row_grouping());
        assert_eq!(t.row(0), &[MatrixEntry { column: 0, value: 0.5 }]);
        assert_eq!(
            t.row(1),
            &[MatrixEntry { column: 0, value: 1.5 }, MatrixEntry { column: 1, value: 1.0 }]
        );
    }

    #[test]
    fn test_select_rows() {
        let m = small_mdp();
        let induced = m.select_rows_from_row_groups(&[1, 0, 0]);
        assert!(induced.has_trivial_row_grouping());
        assert_eq!(induced.row(0), &[MatrixEntry { column: 0, value: 1.0 }]);
        assert_eq!(select_vector_values(&[1, 0, 0], m.row_group_indices(), &[1, 2, 3, 4]), vec![2, 3, 4]);
    }

    #[test]
    fn test_multiply_row() {
        let m = small_mdp();
        assert_eq!(m.multiply_row_with_vector(0, &[0.0, 2.0, 4.0]), 3.0);
    }

    #[test]
    fn test_multiply_and_reduce_records_choices() {
        let m = small_mdp();
        let x = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 0.5, 0.0, 0.0];
        let mut result = vec![0.0; 3];
        let mut choices = vec![0; 3];
        m.multiply_and_reduce(OptimizationDirection::Maximize, &x, &b, &mut result, Some(&mut choices));
        assert_eq!(result, vec![1.5, 0.0, 0.75]);
        assert_eq!(choices, vec![1, 0, 0]);
        m.multiply_and_reduce(OptimizationDirection::Minimize, &x, &b, &mut result, Some(&mut choices));
        assert_eq!(result[0], 0.0);
        assert_eq!(choices[0], 0);
    }

    #[test]
    fn test_gauss_seidel_reads_updated_values() {
        let m = matrix_from_groups(vec![vec![vec![(1, 1.0)]], vec![vec![(1, 1.0)]]]);
        let mut x = vec![0.0, 0.0];
        m.multiply_and_reduce_gauss_seidel(OptimizationDirection::Maximize, &mut x, &[0.0, 1.0]);
        assert_eq!(x, vec![0.0, 1.0]);
        m.multiply_and_reduce_gauss_seidel(OptimizationDirection::Maximize, &mut x, &[0.0, 1.0]);
        assert_eq!(x, vec![1.0, 2.0]);
    }

    #[test]
    fn test_equal_modulo_precision() {
        assert!(equal_modulo_precision(&[1.0, 2.0], &[1.0005, 2.0], &1e-3, false));
        assert!(!equal_modulo_precision(&[1.0, 2.0], &[1.0, 2.1], &1e-3, false));
        assert!(equal_modulo_precision(&[100.0], &[100.05], &1e-3, true));
        assert!(equal_modulo_precision_filtered(&[1.0, 2.0], &[1.0, 9.0], &[true, false], &1e-3, false));
    }
}
