//! Data-parallel loop helpers. With the `parallel` feature the work is handed
//! to Rayon when the caller asks for it; otherwise everything runs on the
//! calling thread. Both paths visit the same indices and collect results in
//! index order.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Maps every index in `0..len` through `f` and collects the results in order.
#[cfg(feature = "parallel")]
pub fn map_indices<T, F>(parallel: bool, len: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if parallel {
        (0..len).into_par_iter().map(f).collect()
    } else {
        (0..len).map(f).collect()
    }
}

#[cfg(not(feature = "parallel"))]
pub fn map_indices<T, F>(_parallel: bool, len: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..len).map(f).collect()
}

/// Runs `f` on every element with its index.
#[cfg(feature = "parallel")]
pub fn for_each_mut<T, F>(parallel: bool, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    if parallel {
        items
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, item)| f(index, item));
    } else {
        items
            .iter_mut()
            .enumerate()
            .for_each(|(index, item)| f(index, item));
    }
}

#[cfg(not(feature = "parallel"))]
pub fn for_each_mut<T, F>(_parallel: bool, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    items
        .iter_mut()
        .enumerate()
        .for_each(|(index, item)| f(index, item));
}

/// Stable sort by key.
#[cfg(feature = "parallel")]
pub fn sort_by_key<T, K, F>(parallel: bool, items: &mut [T], key: F)
where
    T: Send,
    K: Ord,
    F: Fn(&T) -> K + Sync,
{
    if parallel {
        items.par_sort_by_key(key);
    } else {
        items.sort_by_key(key);
    }
}

#[cfg(not(feature = "parallel"))]
pub fn sort_by_key<T, K, F>(_parallel: bool, items: &mut [T], key: F)
where
    T: Send,
    K: Ord,
    F: Fn(&T) -> K + Sync,
{
    items.sort_by_key(key);
}
