//! Sorting for ValueList
//!
//! Natural orderings delegate to the slice sorts. Orderings driven by a
//! fallible comparator sort an index permutation first and only reorder
//! the list once every comparison succeeded, so a failing comparator
//! leaves the list untouched.

use std::cmp::Ordering;

use super::{Value, ValueList};
use crate::error::Result;

/// Stable bottom-up merge sort of `0..values.len()`.
fn merge_sort_indices<F>(values: &[Value], cmp: &mut F) -> Result<Vec<usize>>
where
    F: FnMut(&Value, &Value) -> Result<Ordering>,
{
    let n = values.len();
    let mut src: Vec<usize> = (0..n).collect();
    let mut dst = vec![0usize; n];
    let mut width = 1;
    while width < n {
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                // take from the right run only when strictly smaller
                if cmp(&values[src[j]], &values[src[i]])? == Ordering::Less {
                    dst[k] = src[j];
                    j += 1;
                } else {
                    dst[k] = src[i];
                    i += 1;
                }
                k += 1;
            }
            while i < mid {
                dst[k] = src[i];
                i += 1;
                k += 1;
            }
            while j < end {
                dst[k] = src[j];
                j += 1;
                k += 1;
            }
            start += 2 * width;
        }
        std::mem::swap(&mut src, &mut dst);
        width *= 2;
    }
    Ok(src)
}

/// Unstable quicksort of `0..values.len()` with an explicit work stack.
fn quick_sort_indices<F>(values: &[Value], cmp: &mut F) -> Result<Vec<usize>>
where
    F: FnMut(&Value, &Value) -> Result<Ordering>,
{
    let mut idx: Vec<usize> = (0..values.len()).collect();
    let mut stack = vec![(0usize, idx.len())];
    while let Some((lo, hi)) = stack.pop() {
        if hi - lo < 2 {
            continue;
        }
        let mid = lo + (hi - lo) / 2;
        idx.swap(mid, hi - 1);
        let pivot = idx[hi - 1];
        let mut store = lo;
        for i in lo..hi - 1 {
            if cmp(&values[idx[i]], &values[pivot])? == Ordering::Less {
                idx.swap(i, store);
                store += 1;
            }
        }
        idx.swap(store, hi - 1);
        stack.push((lo, store));
        stack.push((store + 1, hi));
    }
    Ok(idx)
}

impl ValueList {
    fn apply_permutation(&mut self, order: Vec<usize>) {
        let entries = self.entries_mut();
        let mut old = std::mem::take(entries);
        *entries = order.into_iter().map(|i| std::mem::take(&mut old[i])).collect();
    }

    /// Sort ascending by natural (soft) ordering
    pub fn sort(&mut self) {
        self.entries_mut().sort_unstable_by(Value::compare_soft);
    }

    /// Sort descending by natural (soft) ordering
    pub fn sort_descending(&mut self) {
        self.entries_mut().sort_unstable_by(|a, b| b.compare_soft(a));
    }

    /// Stable ascending sort by natural ordering
    pub fn sort_stable(&mut self) {
        self.entries_mut().sort_by(Value::compare_soft);
    }

    /// Stable descending sort by natural ordering
    pub fn sort_stable_descending(&mut self) {
        self.entries_mut().sort_by(|a, b| b.compare_soft(a));
    }

    /// Sort ascending with a fallible comparator
    pub fn sort_with<F>(&mut self, mut cmp: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Result<Ordering>,
    {
        let order = quick_sort_indices(self.as_slice(), &mut cmp)?;
        self.apply_permutation(order);
        Ok(())
    }

    /// Sort descending with a fallible comparator
    pub fn sort_descending_with<F>(&mut self, mut cmp: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Result<Ordering>,
    {
        self.sort_with(|a, b| cmp(a, b).map(Ordering::reverse))
    }

    /// Stable ascending sort with a fallible comparator
    pub fn sort_stable_with<F>(&mut self, mut cmp: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Result<Ordering>,
    {
        let order = merge_sort_indices(self.as_slice(), &mut cmp)?;
        self.apply_permutation(order);
        Ok(())
    }

    /// Stable descending sort with a fallible comparator; equal elements keep their order
    pub fn sort_stable_descending_with<F>(&mut self, mut cmp: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Result<Ordering>,
    {
        self.sort_stable_with(|a, b| cmp(a, b).map(Ordering::reverse))
    }

    /// Smallest element by natural ordering
    pub fn min(&self) -> Option<&Value> {
        self.iter().min_by(|a, b| a.compare_soft(b))
    }

    /// Largest element by natural ordering
    pub fn max(&self) -> Option<&Value> {
        self.iter().max_by(|a, b| a.compare_soft(b))
    }
}
