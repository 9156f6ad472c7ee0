//! Reorder, insert and delete over sequences whose `order` mirrors position.
use thiserror::Error;
use uuid::Uuid;

use crate::{Scene, ScriptLine};
use timeline::TimelineClip;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("index {index} is out of range for {len} items")]
    OutOfRange { index: usize, len: usize },
    #[error("index {index} is locked (frontier at {frontier})")]
    Locked { index: usize, frontier: usize },
    #[error("no item with id {0}")]
    NotFound(String),
}

/// An identifiable item stored in an ordered sequence.
pub trait OrderedItem {
    fn id(&self) -> &str;
    fn order(&self) -> usize;
    fn set_order(&mut self, order: usize);
}

impl OrderedItem for ScriptLine {
    fn id(&self) -> &str {
        &self.id
    }
    fn order(&self) -> usize {
        self.order
    }
    fn set_order(&mut self, order: usize) {
        self.order = order;
    }
}

impl OrderedItem for Scene {
    fn id(&self) -> &str {
        &self.id
    }
    fn order(&self) -> usize {
        self.order
    }
    fn set_order(&mut self, order: usize) {
        self.order = order;
    }
}

impl OrderedItem for TimelineClip {
    fn id(&self) -> &str {
        &self.id
    }
    fn order(&self) -> usize {
        self.order
    }
    fn set_order(&mut self, order: usize) {
        self.order = order;
    }
}

/// Reassign `order` to match position.
pub fn renumber<T: OrderedItem>(items: &mut [T]) {
    for (i, item) in items.iter_mut().enumerate() {
        item.set_order(i);
    }
}

/// Whether every item's `order` equals its index.
pub fn is_dense<T: OrderedItem>(items: &[T]) -> bool {
    items.iter().enumerate().all(|(i, item)| item.order() == i)
}

pub fn position_of<T: OrderedItem>(items: &[T], id: &str) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}

/// Move the item at `from` to `to`. Returns `Ok(false)` when nothing moves.
pub fn reorder<T: OrderedItem>(items: &mut Vec<T>, from: usize, to: usize) -> Result<bool, OrderError> {
    let len = items.len();
    for index in [from, to] {
        if index >= len {
            return Err(OrderError::OutOfRange { index, len });
        }
    }
    if from == to {
        return Ok(false);
    }
    let item = items.remove(from);
    items.insert(to, item);
    renumber(items);
    Ok(true)
}

/// Like [`reorder`], but neither endpoint may sit below `frontier`.
pub fn reorder_unlocked<T: OrderedItem>(
    items: &mut Vec<T>,
    from: usize,
    to: usize,
    frontier: usize,
) -> Result<bool, OrderError> {
    check_unlocked(from, frontier)?;
    check_unlocked(to, frontier)?;
    reorder(items, from, to)
}

pub fn check_unlocked(index: usize, frontier: usize) -> Result<(), OrderError> {
    if index < frontier {
        return Err(OrderError::Locked { index, frontier });
    }
    Ok(())
}

/// Place `item` at `position` (clamped to the end) and renumber.
pub fn insert_at<T: OrderedItem>(items: &mut Vec<T>, position: usize, item: T) -> usize {
    let position = position.min(items.len());
    items.insert(position, item);
    renumber(items);
    position
}

/// Remove by id and compact the remaining orders.
pub fn remove_by_id<T: OrderedItem>(items: &mut Vec<T>, id: &str) -> Result<T, OrderError> {
    let index = position_of(items, id).ok_or_else(|| OrderError::NotFound(id.to_string()))?;
    let removed = items.remove(index);
    renumber(items);
    Ok(removed)
}

/// Index one past the last item matching `locked`; everything before it is read-only.
pub fn lock_frontier<T, F>(items: &[T], locked: F) -> usize
where
    F: Fn(&T) -> bool,
{
    items.iter().rposition(locked).map_or(0, |i| i + 1)
}

/// Placeholder id for an item the backend has not yet named.
pub fn temp_id(prefix: &str) -> String {
    format!("{prefix}-tmp-{}", Uuid::new_v4().simple())
}

pub fn is_temp_id(id: &str) -> bool {
    id.contains("-tmp-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<ScriptLine> {
        let mut v: Vec<_> = (0..n)
            .map(|i| ScriptLine::new(format!("l{i}"), "mom"))
            .collect();
        renumber(&mut v);
        v
    }

    fn ids(items: &[ScriptLine]) -> Vec<&str> {
        items.iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn every_reorder_keeps_orders_dense() {
        let mut items = lines(6);
        // Walk a deterministic but scrambled sequence of moves.
        let mut seed = 7usize;
        for _ in 0..200 {
            seed = (seed * 31 + 11) % 997;
            let from = seed % 6;
            let to = (seed / 6) % 6;
            reorder(&mut items, from, to).unwrap();
            assert!(is_dense(&items));
            let mut sorted = ids(&items);
            sorted.sort();
            assert_eq!(sorted, ["l0", "l1", "l2", "l3", "l4", "l5"]);
        }
    }

    #[test]
    fn reorder_moves_item() {
        let mut items = lines(4);
        assert!(reorder(&mut items, 0, 2).unwrap());
        assert_eq!(ids(&items), ["l1", "l2", "l0", "l3"]);
        assert!(reorder(&mut items, 3, 0).unwrap());
        assert_eq!(ids(&items), ["l3", "l1", "l2", "l0"]);
    }

    #[test]
    fn reorder_noops() {
        let mut items = lines(3);
        assert!(!reorder(&mut items, 1, 1).unwrap());
        assert_eq!(
            reorder(&mut items, 0, 3),
            Err(OrderError::OutOfRange { index: 3, len: 3 })
        );
        assert_eq!(ids(&items), ["l0", "l1", "l2"]);
    }

    #[test]
    fn frontier_blocks_locked_moves() {
        let mut items = lines(5);
        assert_eq!(
            reorder_unlocked(&mut items, 3, 1, 2),
            Err(OrderError::Locked { index: 1, frontier: 2 })
        );
        assert_eq!(
            reorder_unlocked(&mut items, 0, 4, 2),
            Err(OrderError::Locked { index: 0, frontier: 2 })
        );
        assert!(reorder_unlocked(&mut items, 4, 2, 2).unwrap());
        assert_eq!(ids(&items), ["l0", "l1", "l4", "l2", "l3"]);
    }

    #[test]
    fn insert_and_remove_compact() {
        let mut items = lines(3);
        let at = insert_at(&mut items, 1, ScriptLine::new("new", "dad"));
        assert_eq!(at, 1);
        assert_eq!(ids(&items), ["l0", "new", "l1", "l2"]);
        assert!(is_dense(&items));
        assert_eq!(insert_at(&mut items, 99, ScriptLine::new("tail", "dad")), 4);

        let removed = remove_by_id(&mut items, "l1").unwrap();
        assert_eq!(removed.id, "l1");
        assert_eq!(ids(&items), ["l0", "new", "l2", "tail"]);
        assert!(is_dense(&items));
        assert!(remove_by_id(&mut items, "l1").is_err());
    }

    #[test]
    fn frontier_is_past_last_locked_item() {
        let items = lines(5);
        assert_eq!(lock_frontier(&items, |_| false), 0);
        assert_eq!(lock_frontier(&items, |l| l.id == "l0" || l.id == "l2"), 3);
        assert_eq!(lock_frontier(&items, |_| true), 5);
    }

    #[test]
    fn temp_ids_are_recognisable() {
        let id = temp_id("line");
        assert!(is_temp_id(&id));
        assert_ne!(id, temp_id("line"));
        assert!(!is_temp_id("l1"));
    }
}
