use instant_distance::{Builder, HnswMap, Search};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Below this many points a query scans every point exactly; above it
/// we build an HNSW index
pub const EXACT_SEARCH_LIMIT: usize = 4096;

const HNSW_SEED: u64 = 42;

/// A dictionary for fast nearest-neighbour look-up of named points
pub struct ColumnDict<T> {
    dict: Option<HnswMap<VecPoint, usize>>,
    pub data_vec: Vec<VecPoint>,
    pub names: Vec<T>,
    pub name2index: HashMap<T, usize>,
}

impl<T> ColumnDict<T>
where
    T: Clone + Eq + Hash + Debug + Display + Sync,
{
    pub fn from_points(data_vec: Vec<VecPoint>, names: Vec<T>) -> Self {
        debug_assert_eq!(
            data_vec.len(),
            names.len(),
            "Data and names must have the same length"
        );

        let name2index = names
            .iter()
            .enumerate()
            .map(|(j, x)| (x.clone(), j))
            .collect::<HashMap<_, _>>();

        let dict = if data_vec.len() > EXACT_SEARCH_LIMIT {
            let indices = (0..data_vec.len()).collect::<Vec<_>>();
            Some(
                Builder::default()
                    .seed(HNSW_SEED)
                    .build(data_vec.clone(), indices),
            )
        } else {
            None
        };

        ColumnDict {
            dict,
            data_vec,
            names,
            name2index,
        }
    }

    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    /// k-nearest neighbours of a named point, excluding itself
    ///
    /// * `query_name` - the name of the point to match
    /// * `knn` - the number of nearest neighbours to return
    ///
    /// Returns neighbour names and Euclidean distances, nearest first.
    pub fn search_others(&self, query_name: &T, knn: usize) -> anyhow::Result<(Vec<T>, Vec<f32>)> {
        let &self_idx = self
            .name2index
            .get(query_name)
            .ok_or_else(|| anyhow::anyhow!("name {} not found", query_name))?;

        let query = &self.data_vec[self_idx];
        let nquery = knn.min(self.len().saturating_sub(1));

        let hits: Vec<(usize, f32)> = match &self.dict {
            Some(dict) => {
                let mut search = Search::default();
                dict.search(query, &mut search)
                    .filter(|item| *item.value != self_idx)
                    .take(nquery)
                    .map(|item| (*item.value, item.distance))
                    .collect()
            }
            None => {
                let mut all: Vec<(usize, f32)> = self
                    .data_vec
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != self_idx)
                    .map(|(j, x)| (j, query.distance_to(x)))
                    .collect();
                all.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.0.cmp(&b.0))
                });
                all.truncate(nquery);
                all
            }
        };

        Ok(hits
            .into_iter()
            .map(|(j, d)| (self.names[j].clone(), d))
            .unzip())
    }
}

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

impl VecPoint {
    fn distance_to(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}

pub trait MakeVecPoint {
    fn to_vp(&self) -> VecPoint;
}

impl MakeVecPoint for Vec<f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint { data: self.clone() }
    }
}

impl MakeVecPoint for nalgebra::DVectorView<'_, f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.iter().cloned().collect(),
        }
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.distance_to(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_others_excludes_self() -> anyhow::Result<()> {
        let points = vec![
            vec![0.0, 0.0].to_vp(),
            vec![1.0, 0.0].to_vp(),
            vec![3.0, 0.0].to_vp(),
            vec![10.0, 0.0].to_vp(),
        ];
        let dict = ColumnDict::from_points(points, vec![0usize, 1, 2, 3]);

        let (names, dists) = dict.search_others(&1, 2)?;
        assert_eq!(names, vec![0, 2]);
        assert_eq!(dists, vec![1.0, 2.0]);

        let (names, _) = dict.search_others(&3, 10)?;
        assert_eq!(names.len(), 3);
        assert!(!names.contains(&3));
        Ok(())
    }

    #[test]
    fn test_unknown_name() {
        let dict = ColumnDict::from_points(vec![vec![0.0].to_vp()], vec!["a".to_string()]);
        assert!(dict.search_others(&"b".to_string(), 1).is_err());
    }
}
