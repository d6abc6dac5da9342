//! Random-intercept design for nested grouping levels.

use crate::data::{Columns, NestedRandomEffects};
use crate::error::{CasiError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Indicator matrix for one grouping level.
#[derive(Debug, Clone)]
pub struct GroupingLevel {
    /// Level name (`site`, `site:pid`).
    pub name: String,
    /// Unique group IDs in order of first appearance.
    pub group_ids: Vec<String>,
    /// Group index for each row.
    pub group_indices: Vec<usize>,
}

impl GroupingLevel {
    pub fn n_groups(&self) -> usize {
        self.group_ids.len()
    }

    /// Number of observations per group.
    pub fn observations_per_group(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_groups()];
        for &idx in &self.group_indices {
            counts[idx] += 1;
        }
        counts
    }
}

/// Design matrix for nested random intercepts (Z matrix).
///
/// Columns are laid out level by level: all site intercepts first, then all
/// profile-within-site intercepts.
#[derive(Debug, Clone)]
pub struct RandomDesignMatrix {
    /// The Z matrix (rows × total groups across levels).
    pub matrix: DMatrix<f64>,
    /// Grouping levels, outermost first.
    pub levels: Vec<GroupingLevel>,
}

impl RandomDesignMatrix {
    /// Build the random intercept design from a column source.
    ///
    /// The group key at level `k` concatenates the values of levels
    /// `0..=k`, so profile `P1` at two different sites forms two groups.
    pub fn from_nested<C: Columns + ?Sized>(
        source: &C,
        random: &NestedRandomEffects,
    ) -> Result<Self> {
        if random.levels.is_empty() {
            return Err(CasiError::InvalidParameter(
                "at least one grouping level is required".to_string(),
            ));
        }

        let n_rows = source.n_rows();
        let raw: Vec<Vec<String>> = random
            .levels
            .iter()
            .map(|name| {
                source
                    .column(name)?
                    .iter()
                    .enumerate()
                    .map(|(row, v)| {
                        v.level_label().ok_or_else(|| CasiError::InvalidValue {
                            value: "NA".to_string(),
                            row,
                            column: name.clone(),
                        })
                    })
                    .collect::<Result<Vec<String>>>()
            })
            .collect::<Result<_>>()?;

        let mut levels = Vec::with_capacity(random.n_levels());
        for k in 0..random.n_levels() {
            let mut group_map: HashMap<String, usize> = HashMap::new();
            let mut group_ids: Vec<String> = Vec::new();
            let mut group_indices: Vec<usize> = Vec::with_capacity(n_rows);

            for row in 0..n_rows {
                let key = raw[..=k]
                    .iter()
                    .map(|col| col[row].as_str())
                    .collect::<Vec<_>>()
                    .join(":");
                let idx = match group_map.get(&key) {
                    Some(&idx) => idx,
                    None => {
                        let idx = group_ids.len();
                        group_map.insert(key.clone(), idx);
                        group_ids.push(key);
                        idx
                    }
                };
                group_indices.push(idx);
            }

            levels.push(GroupingLevel {
                name: random.group_label(k),
                group_ids,
                group_indices,
            });
        }

        let total: usize = levels.iter().map(|l| l.n_groups()).sum();
        let mut z = DMatrix::zeros(n_rows, total);
        let mut offset = 0;
        for level in &levels {
            for (row, &g) in level.group_indices.iter().enumerate() {
                z[(row, offset + g)] = 1.0;
            }
            offset += level.n_groups();
        }

        Ok(Self { matrix: z, levels })
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Total number of random intercepts (columns in Z).
    pub fn n_random_effects(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the Z matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Column range of level `k` inside Z.
    pub fn level_range(&self, k: usize) -> std::ops::Range<usize> {
        let start: usize = self.levels[..k].iter().map(|l| l.n_groups()).sum();
        start..start + self.levels[k].n_groups()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnFrame;

    fn create_test_frame() -> ColumnFrame {
        ColumnFrame::new()
            .with_categorical("site", &["A", "A", "A", "B", "B", "B"])
            .with_categorical("pid", &["P1", "P1", "P2", "P1", "P2", "P2"])
    }

    #[test]
    fn test_nested_levels() {
        let frame = create_test_frame();
        let z = RandomDesignMatrix::from_nested(&frame, &NestedRandomEffects::site_profile())
            .unwrap();

        assert_eq!(z.levels.len(), 2);
        assert_eq!(z.levels[0].group_ids, vec!["A", "B"]);
        assert_eq!(z.levels[1].group_ids, vec!["A:P1", "A:P2", "B:P1", "B:P2"]);
        assert_eq!(z.levels[1].name, "site:pid");
        assert_eq!(z.n_random_effects(), 6);
        assert_eq!(z.level_range(1), 2..6);
        assert_eq!(z.levels[1].observations_per_group(), vec![2, 1, 1, 2]);
    }

    #[test]
    fn test_each_row_has_one_indicator_per_level() {
        let frame = create_test_frame();
        let z = RandomDesignMatrix::from_nested(&frame, &NestedRandomEffects::site_profile())
            .unwrap();

        for i in 0..z.n_rows() {
            let row_sum: f64 = (0..z.n_random_effects()).map(|j| z.matrix[(i, j)]).sum();
            assert_eq!(row_sum, 2.0);
        }
    }

    #[test]
    fn test_empty_levels_rejected() {
        let frame = create_test_frame();
        let random = NestedRandomEffects { levels: vec![] };
        assert!(RandomDesignMatrix::from_nested(&frame, &random).is_err());
    }
}
