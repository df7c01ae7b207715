//! Recorded move timeline with a replay cursor.
//!
//! Entry 0 is always the pre-game position (no notation). The cursor is
//! either live, meaning "display the current match position", or an index
//! into the recorded entries. Mutation always snaps the cursor back to
//! live first so the recorded line matches what is displayed afterwards.

use serde::{Deserialize, Serialize};

/// One recorded position. `notation` is `None` only for the starting entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub notation: Option<String>,
    pub fen: String,
}

/// What a navigation step resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineView {
    /// Display the stored position.
    Stored(String),
    /// Back at the live position; display the current match position.
    Live,
    /// The cursor did not move.
    Unchanged,
}

#[derive(Debug, Default, Clone)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    /// `None` = live cursor.
    cursor: Option<usize>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded plies (the starting entry does not count).
    pub fn ply_count(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.cursor.is_none()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Seed entry 0 with the pre-game position. Replaces the starting
    /// entry if one is already present.
    pub fn set_initial(&mut self, fen: String) {
        if self.entries.is_empty() {
            self.entries.push(TimelineEntry { notation: None, fen });
        } else {
            self.entries[0].fen = fen;
        }
    }

    /// Append a played ply. If nothing has been recorded yet, a starting
    /// entry is inserted first (filled in by [`set_initial`]). Forces the
    /// cursor back to live.
    ///
    /// [`set_initial`]: Timeline::set_initial
    pub fn record(&mut self, notation: String, fen: String) {
        if self.entries.is_empty() {
            self.entries.push(TimelineEntry { notation: None, fen: String::new() });
        }
        self.entries.push(TimelineEntry { notation: Some(notation), fen });
        self.cursor = None;
    }

    /// Drop the most recent ply. The starting entry is never removed.
    /// Forces the cursor back to live.
    pub fn undo_last(&mut self) {
        if self.entries.len() > 1 {
            self.entries.pop();
        }
        self.cursor = None;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn can_step_back(&self) -> bool {
        match self.cursor {
            None => self.entries.len() > 1,
            Some(idx) => idx > 0,
        }
    }

    pub fn can_step_forward(&self) -> bool {
        self.cursor.is_some()
    }

    /// Move the cursor one ply back.
    pub fn step_back(&mut self) -> TimelineView {
        if !self.can_step_back() {
            return TimelineView::Unchanged;
        }
        let idx = match self.cursor {
            None => self.entries.len() - 2,
            Some(idx) => idx - 1,
        };
        self.cursor = Some(idx);
        TimelineView::Stored(self.entries[idx].fen.clone())
    }

    /// Move the cursor one ply forward. Stepping past the last stored
    /// entry returns to live rather than re-serving the stored duplicate
    /// of the current position.
    pub fn step_forward(&mut self) -> TimelineView {
        let idx = match self.cursor {
            None => return TimelineView::Unchanged,
            Some(idx) => idx + 1,
        };
        if idx >= self.entries.len() - 1 {
            self.cursor = None;
            return TimelineView::Live;
        }
        self.cursor = Some(idx);
        TimelineView::Stored(self.entries[idx].fen.clone())
    }

    /// Absolute positioning. Jumping to the last entry returns to live.
    pub fn jump_to(&mut self, index: usize) -> TimelineView {
        if self.entries.is_empty() || index >= self.entries.len() {
            return TimelineView::Unchanged;
        }
        if index == self.entries.len() - 1 {
            self.cursor = None;
            return TimelineView::Live;
        }
        self.cursor = Some(index);
        TimelineView::Stored(self.entries[index].fen.clone())
    }

    pub fn jump_to_start(&mut self) -> TimelineView {
        self.jump_to(0)
    }

    pub fn jump_to_end(&mut self) -> TimelineView {
        self.cursor = None;
        TimelineView::Live
    }

    /// Index currently displayed; the last index when live.
    pub fn view_index(&self) -> usize {
        match self.cursor {
            Some(idx) => idx,
            None => self.entries.len().saturating_sub(1),
        }
    }

    /// Rebuild from a persisted record. The cursor comes back live.
    pub fn restore(&mut self, entries: Vec<TimelineEntry>) {
        self.entries = entries;
        self.cursor = None;
    }
}
