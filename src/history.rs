/// How a new state enters the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop anything after the cursor, then append.
    Branch,
    /// Discard everything; the new state becomes the only one.
    ReplaceAll,
}

/// Linear undo/redo over immutable states.
///
/// `cursor` is `None` exactly when `entries` is empty; otherwise it indexes the current entry.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: Vec<T>,
    cursor: Option<usize>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self { entries: Vec::new(), cursor: None }
    }
}

impl<T> History<T> {
    pub fn write(&mut self, value: T, mode: WriteMode) {
        match mode {
            WriteMode::ReplaceAll => self.entries.clear(),
            WriteMode::Branch => {
                let keep = self.cursor.map_or(0, |i| i + 1);
                self.entries.truncate(keep);
            }
        }
        self.entries.push(value);
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn undo(&mut self) {
        if let Some(i) = self.cursor.filter(|&i| i > 0) {
            self.cursor = Some(i - 1);
        }
    }

    pub fn redo(&mut self) {
        if self.can_redo() {
            self.cursor = self.cursor.map(|i| i + 1);
        }
    }

    pub fn current(&self) -> Option<&T> {
        self.cursor.and_then(|i| self.entries.get(i))
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(i) if i > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(i) if i + 1 < self.entries.len())
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    #[cfg(test)]
    /// Cursor in the `-1..len` convention; `-1` means empty.
    pub fn index(&self) -> isize {
        self.cursor.map_or(-1, |i| i as isize)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[T] {
        &self.entries
    }
}
