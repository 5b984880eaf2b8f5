//! Chronological k-way merge of per-signal streams
//!
//! Each input must already yield items in non-decreasing timestamp order.
//! The merge keeps exactly one head item per live input in a min-heap, so
//! memory grows with the number of inputs and not with their length.
//! Equal timestamps come out in input order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::iter::FusedIterator;

use crate::range::Sample;

/// Items that carry a timestamp
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

impl Timestamped for Sample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl<P> Timestamped for (f64, P) {
    fn timestamp(&self) -> f64 {
        self.0
    }
}

struct HeapEntry<T> {
    timestamp: f64,
    source: usize,
    item: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Merged stream returned by [`merge`]
///
/// Errors from an input are passed through at the point where they occur in
/// that input; the input keeps contributing afterwards. An exhausted input is
/// dropped right away.
pub struct Merge<I, T> {
    sources: Vec<Option<I>>,
    heap: BinaryHeap<Reverse<HeapEntry<T>>>,
    // Inputs whose head must be pulled before the next pop
    stale: Vec<usize>,
}

/// Merge time-ordered inputs into one time-ordered stream
pub fn merge<S, I, T, E>(inputs: S) -> Merge<I, T>
where
    S: IntoIterator<Item = I>,
    I: Iterator<Item = Result<T, E>>,
    T: Timestamped,
{
    let sources: Vec<Option<I>> = inputs.into_iter().map(Some).collect();
    // Popped from the back, so the first input is pulled first
    let stale = (0..sources.len()).rev().collect();
    Merge {
        heap: BinaryHeap::with_capacity(sources.len()),
        sources,
        stale,
    }
}

impl<I, T> Merge<I, T> {
    /// Inputs that have not been exhausted yet
    pub fn live_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
    }
}

impl<I, T, E> Iterator for Merge<I, T>
where
    I: Iterator<Item = Result<T, E>>,
    T: Timestamped,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(source) = self.stale.pop() {
            let Some(input) = self.sources.get_mut(source).and_then(Option::as_mut) else {
                continue;
            };
            match input.next() {
                Some(Ok(item)) => self.heap.push(Reverse(HeapEntry {
                    timestamp: item.timestamp(),
                    source,
                    item,
                })),
                Some(Err(e)) => {
                    self.stale.push(source);
                    return Some(Err(e));
                }
                None => self.sources[source] = None,
            }
        }

        let Reverse(entry) = self.heap.pop()?;
        self.stale.push(entry.source);
        Some(Ok(entry.item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let mut upper = Some(self.heap.len());
        for input in self.sources.iter().flatten() {
            upper = match (upper, input.size_hint().1) {
                (Some(total), Some(n)) => total.checked_add(n),
                _ => None,
            };
        }
        (self.heap.len(), upper)
    }
}

impl<I, T, E> FusedIterator for Merge<I, T>
where
    I: Iterator<Item = Result<T, E>>,
    T: Timestamped,
{
}
