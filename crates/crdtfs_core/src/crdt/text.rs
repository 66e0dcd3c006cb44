//! Replicated character sequence (RGA).
//!
//! Each character is an item identified by the [`OperationId`] that created
//! it. An insertion names the character it goes after (its origin); deletes
//! only set a tombstone flag, so positions referenced by concurrent
//! operations never disappear.

use super::clock::OperationId;

#[derive(Debug, Clone)]
struct Item {
    id: OperationId,
    ch: char,
    deleted: bool,
}

/// Collaborative text of one file.
#[derive(Debug, Clone, Default)]
pub struct RgaText {
    items: Vec<Item>,
    visible: usize,
}

impl RgaText {
    /// An empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, id: &OperationId) -> Option<usize> {
        self.items.iter().position(|item| item.id == *id)
    }

    /// Whether the character `id` has been integrated (deleted or not).
    pub fn contains(&self, id: &OperationId) -> bool {
        self.index_of(id).is_some()
    }

    /// Integrate a run of characters.
    ///
    /// The first character goes after `origin` (the start of the text when
    /// `None`) and has id `first`; character `i` has id `first.offset(i)` and
    /// goes after character `i - 1`. The caller checks that `origin` is
    /// present. Returns the number of characters inserted.
    pub fn integrate_insert(
        &mut self,
        first: OperationId,
        origin: Option<OperationId>,
        text: &str,
    ) -> usize {
        let mut origin = origin;
        let mut inserted = 0;
        for (i, ch) in text.chars().enumerate() {
            let id = first.offset(i as u64);
            if self.contains(&id) {
                origin = Some(id);
                continue;
            }
            self.integrate_char(id, origin, ch);
            origin = Some(id);
            inserted += 1;
        }
        inserted
    }

    fn integrate_char(&mut self, id: OperationId, origin: Option<OperationId>, ch: char) {
        let mut idx = match origin {
            Some(origin) => self.index_of(&origin).map_or(self.items.len(), |i| i + 1),
            None => 0,
        };
        // Anything right of the origin with a larger id was inserted
        // concurrently (or later, on top of such an insert) and sorts first.
        while idx < self.items.len() && self.items[idx].id > id {
            idx += 1;
        }
        self.items.insert(
            idx,
            Item {
                id,
                ch,
                deleted: false,
            },
        );
        self.visible += 1;
    }

    /// Tombstone the given characters.
    ///
    /// Unknown and already deleted targets are ignored. Returns how many
    /// characters became invisible.
    pub fn delete(&mut self, targets: &[OperationId]) -> usize {
        let mut removed = 0;
        for target in targets {
            if let Some(idx) = self.index_of(target) {
                let item = &mut self.items[idx];
                if !item.deleted {
                    item.deleted = true;
                    removed += 1;
                }
            }
        }
        self.visible -= removed;
        removed
    }

    /// The visible character a local insertion at `pos` must follow.
    ///
    /// `pos` is clamped to the visible length.
    pub fn origin_for_position(&self, pos: usize) -> Option<OperationId> {
        if pos == 0 {
            return None;
        }
        let pos = pos.min(self.visible);
        self.items
            .iter()
            .filter(|item| !item.deleted)
            .nth(pos - 1)
            .map(|item| item.id)
    }

    /// Ids of the visible characters in `pos .. pos + len` (clamped).
    pub fn visible_ids(&self, pos: usize, len: usize) -> Vec<OperationId> {
        self.items
            .iter()
            .filter(|item| !item.deleted)
            .skip(pos)
            .take(len)
            .map(|item| item.id)
            .collect()
    }

    /// Number of visible characters.
    pub fn len(&self) -> usize {
        self.visible
    }

    /// Whether no character is visible.
    pub fn is_empty(&self) -> bool {
        self.visible == 0
    }
}

impl std::fmt::Display for RgaText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        for item in self.items.iter().filter(|item| !item.deleted) {
            f.write_char(item.ch)?;
        }
        Ok(())
    }
}
