use fnv::FnvHashMap as HashMap;
use std::hash::Hash;

/// partition membership vector into groups of indexes
/// # Arguments
/// * `membership` - a vector of membership (E.g., cluster assignment)
/// # Returns
/// A hashmap: cluster/group name -> indexes of the elements (ascending)
pub fn partition_by_membership<T>(membership: &[T]) -> HashMap<T, Vec<usize>>
where
    T: Eq + Hash + Clone,
{
    let mut groups: HashMap<T, Vec<usize>> = HashMap::default();
    for (elem, k) in membership.iter().enumerate() {
        groups.entry(k.clone()).or_default().push(elem);
    }
    groups
}

/// Generate minibatch intervals
/// * `ntot` - number of total samples
/// * `batch_size` - the size of each batch
pub fn generate_minibatch_intervals(ntot: usize, batch_size: usize) -> Vec<(usize, usize)> {
    let batch_size = batch_size.max(1);
    let num_batches = ntot.div_ceil(batch_size);
    (0..num_batches)
        .map(|b| {
            let lb: usize = b * batch_size;
            let ub: usize = ((b + 1) * batch_size).min(ntot);
            (lb, ub)
        })
        .collect::<Vec<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minibatch_intervals() {
        assert_eq!(
            generate_minibatch_intervals(10, 3),
            vec![(0, 3), (3, 6), (6, 9), (9, 10)]
        );
        assert_eq!(generate_minibatch_intervals(6, 3), vec![(0, 3), (3, 6)]);
        assert_eq!(generate_minibatch_intervals(1, 100), vec![(0, 1)]);
        assert!(generate_minibatch_intervals(0, 5).is_empty());
    }

    #[test]
    fn test_partition_by_membership() {
        let groups = partition_by_membership(&["a", "b", "a", "c"]);
        assert_eq!(groups[&"a"], vec![0, 2]);
        assert_eq!(groups[&"c"], vec![3]);
        assert_eq!(groups.len(), 3);
    }
}
