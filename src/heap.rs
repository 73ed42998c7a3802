//! Bounded binary min-heap.
//!
//! Fixed capacity keeps the memory of one sorting worker deterministic. The order
//! is a fallible comparator because comparing two file-backed records may have to
//! read from disk.

use std::cmp::Ordering;
use std::io;

/// Array-backed binary min-heap with a capacity fixed at construction.
///
/// `push` and `pop` are O(log n). Pushing into a full heap is a logic error (the
/// caller must drain first) and panics. After a comparator error the heap order is
/// unspecified; callers treat such errors as fatal.
pub struct BoundedHeap<E, C>
where
    C: Fn(&E, &E) -> io::Result<Ordering>,
{
    data: Vec<E>,
    capacity: usize,
    compare: C,
}

impl<E, C> BoundedHeap<E, C>
where
    C: Fn(&E, &E) -> io::Result<Ordering>,
{
    pub fn new(capacity: usize, compare: C) -> Self {
        BoundedHeap {
            data: Vec::with_capacity(capacity),
            capacity,
            compare,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// The current minimum, if any.
    pub fn peek(&self) -> Option<&E> {
        self.data.first()
    }

    /// Inserts `item`, sifting it up until its parent is not greater.
    ///
    /// # Panics
    /// Panics when the heap is full.
    pub fn push(&mut self, item: E) -> io::Result<()> {
        assert!(self.data.len() < self.capacity, "bounded heap is full");
        self.data.push(item);
        let mut index = self.data.len() - 1;
        while index > 0 {
            let parent = (index - 1) / 2;
            if (self.compare)(&self.data[index], &self.data[parent])? != Ordering::Less {
                break;
            }
            self.data.swap(index, parent);
            index = parent;
        }
        Ok(())
    }

    /// Removes and returns the minimum, or `None` when empty.
    pub fn pop(&mut self) -> io::Result<Option<E>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let last = self.data.len() - 1;
        self.data.swap(0, last);
        let top = self.data.pop();
        self.sift_down()?;
        Ok(top)
    }

    /// Moves the root down, swapping with the smaller child while it is greater
    /// than either child. The left child wins ties.
    fn sift_down(&mut self) -> io::Result<()> {
        let len = self.data.len();
        let mut index = 0;
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && (self.compare)(&self.data[right], &self.data[left])? == Ordering::Less {
                child = right;
            }
            if (self.compare)(&self.data[child], &self.data[index])? != Ordering::Less {
                break;
            }
            self.data.swap(index, child);
            index = child;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::io;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::BoundedHeap;

    fn int_heap(capacity: usize) -> BoundedHeap<i32, fn(&i32, &i32) -> io::Result<Ordering>> {
        BoundedHeap::new(capacity, |a, b| Ok(a.cmp(b)))
    }

    #[rstest]
    #[case(vec![3, 1, 2])]
    #[case(vec![1])]
    #[case(vec![5, 5, 5, 1, 1])]
    #[case(vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0])]
    fn test_pop_returns_ascending(#[case] items: Vec<i32>) {
        let mut heap = int_heap(items.len());
        for item in &items {
            heap.push(*item).unwrap();
        }
        assert!(heap.is_full());

        let mut drained = Vec::new();
        while let Some(item) = heap.pop().unwrap() {
            drained.push(item);
        }
        let mut expected = items;
        expected.sort_unstable();
        assert_eq!(drained, expected);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_peek_tracks_minimum() {
        let mut heap = int_heap(4);
        assert!(heap.peek().is_none());
        heap.push(7).unwrap();
        assert_eq!(heap.peek(), Some(&7));
        heap.push(3).unwrap();
        assert_eq!(heap.peek(), Some(&3));
        heap.push(5).unwrap();
        assert_eq!(heap.peek(), Some(&3));
        assert_eq!(heap.pop().unwrap(), Some(3));
        assert_eq!(heap.peek(), Some(&5));
    }

    #[test]
    #[should_panic(expected = "bounded heap is full")]
    fn test_push_over_capacity_panics() {
        let mut heap = int_heap(2);
        heap.push(1).unwrap();
        heap.push(2).unwrap();
        heap.push(3).unwrap();
    }

    #[test]
    fn test_interleaved_push_pop_keeps_min() {
        let mut items: Vec<i32> = (0..200).collect();
        items.shuffle(&mut rand::thread_rng());

        let mut heap = int_heap(64);
        let mut drained = Vec::new();
        for chunk in items.chunks(64) {
            for item in chunk {
                heap.push(*item).unwrap();
            }
            // drain half, refill on the next round
            for _ in 0..chunk.len() / 2 {
                drained.push(heap.pop().unwrap().unwrap());
            }
            while let Some(item) = heap.pop().unwrap() {
                drained.push(item);
            }
        }
        let mut sorted = drained.clone();
        sorted.sort_unstable();
        // every element came out exactly once
        assert_eq!(sorted, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_comparator_error_propagates() {
        let mut heap: BoundedHeap<i32, _> = BoundedHeap::new(4, |a: &i32, b: &i32| {
            if *a < 0 || *b < 0 {
                Err(io::Error::new(io::ErrorKind::Other, "bad element"))
            } else {
                Ok(a.cmp(b))
            }
        });
        heap.push(1).unwrap();
        assert!(heap.push(-1).is_err());
    }
}
