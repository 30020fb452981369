//! Sequence mutation interception
//!
//! The structural mutators of [`ArrayRef`]. Each one performs the plain
//! operation and, when the sequence is observed, observes any inserted
//! elements and notifies the sequence's structural dependency.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::error::{ReactiveError, Result};
use crate::observer::observe_array;
use crate::value::{ArrayData, ArrayRef, Value};

type Inserted = SmallVec<[Value; 4]>;

impl ArrayRef {
    /// Run `op` on the backing vector, then observe `inserted` and notify.
    ///
    /// The borrow is released before observation or notification so that
    /// subscribers may read the sequence.
    fn mutate<R>(&self, op: impl FnOnce(&mut ArrayData) -> (R, Inserted)) -> Result<R> {
        let (result, inserted) = {
            let mut data = self.data_mut();
            if data.frozen {
                return Err(ReactiveError::FrozenSequence);
            }
            op(&mut data)
        };
        if let Some(observer) = self.observer() {
            observe_array(&inserted);
            observer.dep().notify();
        }
        Ok(result)
    }

    /// Append elements, returning the new length
    pub fn push<V: Into<Value>>(&self, items: impl IntoIterator<Item = V>) -> Result<usize> {
        let items: Inserted = items.into_iter().map(Into::into).collect();
        self.mutate(|data| {
            data.items.extend(items.iter().cloned());
            (data.items.len(), items)
        })
    }

    /// Remove and return the last element
    pub fn pop(&self) -> Result<Option<Value>> {
        self.mutate(|data| (data.items.pop(), Inserted::new()))
    }

    /// Remove and return the first element
    pub fn shift(&self) -> Result<Option<Value>> {
        self.mutate(|data| {
            let first = if data.items.is_empty() {
                None
            } else {
                Some(data.items.remove(0))
            };
            (first, Inserted::new())
        })
    }

    /// Prepend elements, keeping their order. Returns the new length.
    pub fn unshift<V: Into<Value>>(&self, items: impl IntoIterator<Item = V>) -> Result<usize> {
        let items: Inserted = items.into_iter().map(Into::into).collect();
        self.mutate(|data| {
            data.items.splice(0..0, items.iter().cloned());
            (data.items.len(), items)
        })
    }

    /// Remove `delete_count` elements at `start` and insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the sequence. Returns the
    /// removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Result<Vec<Value>> {
        self.mutate(|data| {
            let start = start.min(data.items.len());
            let end = start + delete_count.min(data.items.len() - start);
            let removed: Vec<Value> = data.items.splice(start..end, items.iter().cloned()).collect();
            (removed, Inserted::from_vec(items))
        })
    }

    /// Sort by the default order: string form ascending, undefined last
    pub fn sort(&self) -> Result<()> {
        self.sort_by(Value::default_order)
    }

    /// Sort with a comparator.
    ///
    /// A snapshot is sorted, so the comparator may read the sequence and
    /// other state freely. If the sequence was frozen meanwhile it is left
    /// unsorted.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        let mut sorted = {
            let data = self.data();
            if data.frozen {
                return Err(ReactiveError::FrozenSequence);
            }
            data.items.clone()
        };
        sorted.sort_by(&mut compare);
        self.mutate(|data| {
            // Anything pushed while sorting lands after the sorted run
            let start = sorted.len().min(data.items.len());
            let pushed: Vec<Value> = data.items.drain(start..).collect();
            data.items = sorted;
            data.items.extend(pushed);
            ((), Inserted::new())
        })
    }

    /// Reverse in place
    pub fn reverse(&self) -> Result<()> {
        self.mutate(|data| {
            data.items.reverse();
            ((), Inserted::new())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dep::{pop_target, push_target};
    use crate::observer::observe;
    use crate::value::ObjectRef;
    use crate::watcher::Watcher;
    use pretty_assertions::assert_eq;

    fn nums(arr: &ArrayRef) -> Vec<f64> {
        arr.to_vec().iter().filter_map(Value::as_number).collect()
    }

    fn observed(items: &[i32]) -> ArrayRef {
        let arr: ArrayRef = items.iter().copied().collect();
        observe(&Value::from(arr.clone()), false);
        arr
    }

    /// A lazy watcher subscribed to the sequence's structural dependency
    fn subscriber(arr: &ArrayRef) -> Watcher {
        let w = Watcher::builder(|| Ok(Value::Undefined))
            .lazy()
            .build()
            .unwrap();
        w.evaluate_if_dirty().unwrap();
        push_target(Some(w.clone()));
        arr.observer().unwrap().dep().depend();
        pop_target();
        w
    }

    #[test]
    fn test_push_returns_length_and_notifies() {
        let arr = observed(&[1, 2]);
        let w = subscriber(&arr);
        assert_eq!(arr.push([3]).unwrap(), 3);
        assert_eq!(nums(&arr), vec![1.0, 2.0, 3.0]);
        assert!(w.is_dirty());
    }

    #[test]
    fn test_pop_and_shift() {
        let arr = observed(&[1, 2, 3]);
        assert_eq!(arr.pop().unwrap(), Some(Value::from(3)));
        assert_eq!(arr.shift().unwrap(), Some(Value::from(1)));
        assert_eq!(nums(&arr), vec![2.0]);
    }

    #[test]
    fn test_pop_on_empty_still_notifies() {
        let arr = observed(&[]);
        let w = subscriber(&arr);
        assert_eq!(arr.pop().unwrap(), None);
        assert!(w.is_dirty());
    }

    #[test]
    fn test_unshift_keeps_order() {
        let arr = observed(&[3]);
        assert_eq!(arr.unshift([1, 2]).unwrap(), 3);
        assert_eq!(nums(&arr), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_splice_clamps() {
        let arr = observed(&[1, 2, 3, 4]);
        let removed = arr.splice(1, 10, vec![Value::from(9)]).unwrap();
        assert_eq!(removed, vec![Value::from(2), Value::from(3), Value::from(4)]);
        assert_eq!(nums(&arr), vec![1.0, 9.0]);

        let removed = arr.splice(7, 1, vec![Value::from(5)]).unwrap();
        assert!(removed.is_empty());
        assert_eq!(nums(&arr), vec![1.0, 9.0, 5.0]);
    }

    #[test]
    fn test_inserted_elements_are_observed() {
        let arr = observed(&[]);
        let item = ObjectRef::from_pairs([("n", 1)]);
        arr.push([item.clone()]).unwrap();
        assert!(item.observer().is_some());

        let spliced = ObjectRef::new();
        arr.splice(0, 0, vec![Value::from(spliced.clone())]).unwrap();
        assert!(spliced.observer().is_some());
    }

    #[test]
    fn test_unobserved_sequence_does_not_observe_inserts() {
        let arr = ArrayRef::new();
        let item = ObjectRef::new();
        arr.push([item.clone()]).unwrap();
        assert!(item.observer().is_none());
        assert!(arr.observer().is_none());
    }

    #[test]
    fn test_default_sort_is_lexicographic() {
        let arr = observed(&[10, 9, 1]);
        arr.sort().unwrap();
        assert_eq!(nums(&arr), vec![1.0, 10.0, 9.0]);
    }

    #[test]
    fn test_sort_by_and_reverse() {
        let arr = observed(&[3, 1, 2]);
        let w = subscriber(&arr);
        arr.sort_by(|a, b| {
            a.as_number()
                .unwrap_or(0.0)
                .total_cmp(&b.as_number().unwrap_or(0.0))
        })
        .unwrap();
        assert_eq!(nums(&arr), vec![1.0, 2.0, 3.0]);
        assert!(w.is_dirty());

        arr.reverse().unwrap();
        assert_eq!(nums(&arr), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_frozen_sequence_rejects_mutation() {
        let arr: ArrayRef = [1].into_iter().collect();
        arr.freeze();
        assert!(matches!(arr.push([2]), Err(ReactiveError::FrozenSequence)));
        assert!(matches!(arr.sort(), Err(ReactiveError::FrozenSequence)));
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn test_sort_keeps_contents_when_frozen_mid_sort() {
        let arr = observed(&[3, 1, 2]);
        let (target, seen_len) = (arr.clone(), std::cell::Cell::new(0));
        let result = arr.sort_by(|a, b| {
            seen_len.set(target.len());
            target.freeze();
            a.as_number()
                .unwrap_or(0.0)
                .total_cmp(&b.as_number().unwrap_or(0.0))
        });

        assert!(matches!(result, Err(ReactiveError::FrozenSequence)));
        assert_eq!(seen_len.get(), 3);
        assert_eq!(nums(&arr), vec![3.0, 1.0, 2.0]);
    }
}
