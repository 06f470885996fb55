use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    hash::{BuildHasher, Hash},
    num::NonZeroUsize,
};

use super::Partition;
use crate::error::{EngineError, Result};

/// A collection that can be cut into at most `n` non empty pieces of its own kind.
pub trait Splittable: Sized {
    /// Splits `self` into at most `n` pieces.
    ///
    /// # Arguments
    /// * `n` - The desired amount of pieces.
    ///
    /// # Returns
    /// The pieces in canonical order. Never contains an empty piece, so fewer
    /// than `n` pieces are returned when the collection is small.
    fn split_into(self, n: NonZeroUsize) -> Vec<Self>;
}

/// Splits `input` into at most `n` partitions tagged `0..`.
///
/// # Errors
/// Returns `InvalidPartitionCount` if `n` is zero.
pub fn split_collection<C: Splittable>(input: C, n: usize) -> Result<Vec<Partition<C>>> {
    let n = NonZeroUsize::new(n).ok_or(EngineError::InvalidPartitionCount)?;

    let partitions = input
        .split_into(n)
        .into_iter()
        .enumerate()
        .map(|(origin, chunk)| Partition::new(origin, chunk))
        .collect();

    Ok(partitions)
}

/// Contiguous chunks of `ceil(len / n)` elements, the last one may be shorter.
fn ceil_chunks<T>(items: Vec<T>, n: NonZeroUsize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let size = items.len().div_ceil(n.get());
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter();

    loop {
        let chunk: Vec<T> = iter.by_ref().take(size).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }

    chunks
}

/// Same amount of chunks as `ceil_chunks` but with sizes differing by at most one.
fn balanced_chunks<T>(items: Vec<T>, n: NonZeroUsize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let len = items.len();
    let count = len.div_ceil(len.div_ceil(n.get()));
    let base = len / count;
    let extra = len % count;

    let mut iter = items.into_iter();
    (0..count)
        .map(|i| {
            let size = base + usize::from(i < extra);
            iter.by_ref().take(size).collect()
        })
        .collect()
}

impl<T> Splittable for Vec<T> {
    fn split_into(self, n: NonZeroUsize) -> Vec<Self> {
        ceil_chunks(self, n)
    }
}

impl<T: Ord> Splittable for BTreeSet<T> {
    fn split_into(self, n: NonZeroUsize) -> Vec<Self> {
        let items: Vec<T> = self.into_iter().collect();
        balanced_chunks(items, n)
            .into_iter()
            .map(BTreeSet::from_iter)
            .collect()
    }
}

impl<T, S> Splittable for HashSet<T, S>
where
    T: Ord + Hash + Eq,
    S: BuildHasher + Default,
{
    fn split_into(self, n: NonZeroUsize) -> Vec<Self> {
        // Hash iteration order is arbitrary, sort to get stable chunk boundaries.
        let mut items: Vec<T> = self.into_iter().collect();
        items.sort_unstable();

        balanced_chunks(items, n)
            .into_iter()
            .map(HashSet::from_iter)
            .collect()
    }
}

impl<K: Ord, V> Splittable for BTreeMap<K, V> {
    fn split_into(self, n: NonZeroUsize) -> Vec<Self> {
        let pairs: Vec<(K, V)> = self.into_iter().collect();
        ceil_chunks(pairs, n)
            .into_iter()
            .map(BTreeMap::from_iter)
            .collect()
    }
}

impl<K, V, S> Splittable for HashMap<K, V, S>
where
    K: Ord + Hash + Eq,
    S: BuildHasher + Default,
{
    fn split_into(self, n: NonZeroUsize) -> Vec<Self> {
        let mut pairs: Vec<(K, V)> = self.into_iter().collect();
        pairs.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        ceil_chunks(pairs, n)
            .into_iter()
            .map(HashMap::from_iter)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins<T>(partitions: &[Partition<T>]) -> Vec<usize> {
        partitions.iter().map(Partition::origin).collect()
    }

    #[test]
    fn sequence_chunks_are_ceil_sized_and_ordered() {
        let input: Vec<u32> = (1..=10).collect();
        let parts = split_collection(input.clone(), 4).unwrap();

        let sizes: Vec<_> = parts.iter().map(|p| p.data().len()).collect();
        assert_eq!(sizes, [3, 3, 3, 1]);
        assert_eq!(origins(&parts), [0, 1, 2, 3]);

        let joined: Vec<u32> = parts.into_iter().flat_map(Partition::into_data).collect();
        assert_eq!(joined, input);
    }

    #[test]
    fn sequence_concatenation_and_count_hold_for_many_shapes() {
        for len in 0..60usize {
            for n in 1..12usize {
                let input: Vec<usize> = (0..len).collect();
                let parts = split_collection(input.clone(), n).unwrap();

                let expected = if len == 0 { 0 } else { len.div_ceil(len.div_ceil(n)) };
                assert_eq!(parts.len(), expected, "len={len} n={n}");
                assert!(parts.len() <= n);
                assert!(parts.iter().all(|p| !p.data().is_empty()));
                assert_eq!(origins(&parts), (0..parts.len()).collect::<Vec<_>>());

                let joined: Vec<usize> =
                    parts.into_iter().flat_map(Partition::into_data).collect();
                assert_eq!(joined, input, "len={len} n={n}");
            }
        }
    }

    #[test]
    fn short_input_yields_fewer_partitions() {
        let parts = split_collection(vec!['a', 'b'], 5).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].data(), &['a']);
        assert_eq!(parts[1].data(), &['b']);
    }

    #[test]
    fn empty_input_yields_no_partitions() {
        let parts = split_collection(Vec::<i32>::new(), 3).unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn zero_partitions_is_rejected() {
        let res = split_collection(vec![1, 2, 3], 0);
        assert!(matches!(res, Err(EngineError::InvalidPartitionCount)));
    }

    #[test]
    fn set_chunks_are_balanced_and_lossless() {
        for len in 1..50i64 {
            for n in 1..9usize {
                let input: HashSet<i64> = (0..len).map(|x| x * 7 - 20).collect();
                let parts = split_collection(input.clone(), n).unwrap();

                assert_eq!(parts.len(), (len as usize).div_ceil((len as usize).div_ceil(n)));

                let sizes: Vec<usize> = parts.iter().map(|p| p.data().len()).collect();
                let max = sizes.iter().copied().max().unwrap();
                let min = sizes.iter().copied().min().unwrap();
                assert!(max - min <= 1, "sizes {sizes:?}");

                let total: usize = sizes.iter().sum();
                assert_eq!(total, input.len());

                let union: HashSet<i64> =
                    parts.into_iter().flat_map(Partition::into_data).collect();
                assert_eq!(union, input);
            }
        }
    }

    #[test]
    fn set_split_is_deterministic() {
        let input: HashSet<String> = (0..37).map(|i| format!("item-{i}")).collect();

        let first = split_collection(input.clone(), 4).unwrap();
        let second = split_collection(input, 4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn btree_set_uses_sorted_order() {
        let input: BTreeSet<u8> = [5, 1, 4, 2, 3].into_iter().collect();
        let parts = split_collection(input, 2).unwrap();

        assert_eq!(parts[0].data(), &BTreeSet::from([1, 2, 3]));
        assert_eq!(parts[1].data(), &BTreeSet::from([4, 5]));
    }

    #[test]
    fn map_keys_partition_losslessly() {
        let input: HashMap<String, usize> = (0..23).map(|i| (format!("k{i:02}"), i)).collect();
        let parts = split_collection(input.clone(), 4).unwrap();

        let sizes: Vec<_> = parts.iter().map(|p| p.data().len()).collect();
        assert_eq!(sizes, [6, 6, 6, 5]);

        let mut seen = HashMap::new();
        for part in parts {
            for (k, v) in part.into_data() {
                assert!(seen.insert(k, v).is_none(), "key appeared twice");
            }
        }
        assert_eq!(seen, input);
    }

    #[test]
    fn btree_map_chunks_follow_key_order() {
        let input: BTreeMap<u32, &str> = [(3, "c"), (1, "a"), (2, "b")].into_iter().collect();
        let parts = split_collection(input, 2).unwrap();

        assert_eq!(parts[0].data().keys().copied().collect::<Vec<_>>(), [1, 2]);
        assert_eq!(parts[1].data().keys().copied().collect::<Vec<_>>(), [3]);
    }
}
