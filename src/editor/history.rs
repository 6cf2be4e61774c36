//! Bounded undo/redo history over immutable images.

use std::collections::VecDeque;
use std::sync::Arc;

use image::RgbaImage;

/// Ordered snapshots with a cursor. Entry 0 is always the original.
///
/// Pushing while the cursor is not at the end drops the redo tail. Once the
/// length would exceed the cap, the oldest entry after the original is
/// evicted.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Arc<RgbaImage>>,
    cursor: usize,
    cap: usize,
}

impl History {
    /// Start a history at `original`. `cap` is raised to 2 if smaller, so the
    /// original plus one edit always fit.
    #[must_use]
    pub fn new(original: Arc<RgbaImage>, cap: usize) -> Self {
        let mut entries = VecDeque::with_capacity(cap.min(64));
        entries.push_back(original);
        Self {
            entries,
            cursor: 0,
            cap: cap.max(2),
        }
    }

    /// Append `image` after the cursor and move the cursor onto it.
    pub fn push(&mut self, image: Arc<RgbaImage>) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(image);
        while self.entries.len() > self.cap {
            // Index 0 is the original and is never evicted.
            self.entries.remove(1);
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Step back. Returns `false` at the original.
    pub fn undo(&mut self) -> bool {
        if self.can_undo() {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    /// Step forward. Returns `false` at the newest entry.
    pub fn redo(&mut self) -> bool {
        if self.can_redo() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Drop everything but the original.
    pub fn reset(&mut self) {
        self.entries.truncate(1);
        self.cursor = 0;
    }

    /// Whether [`History::undo`] would move.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    /// Whether [`History::redo`] would move.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// The entry under the cursor.
    #[must_use]
    pub fn current(&self) -> &Arc<RgbaImage> {
        &self.entries[self.cursor]
    }

    /// The original image.
    #[must_use]
    pub fn original(&self) -> &Arc<RgbaImage> {
        &self.entries[0]
    }

    /// Cursor position.
    #[must_use]
    pub fn index(&self) -> usize {
        self.cursor
    }

    /// Number of entries, including the original.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the original is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }
}
