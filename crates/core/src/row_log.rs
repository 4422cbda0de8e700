/// Append-only row storage. Rows are never removed or reordered.
#[derive(Debug, Clone)]
pub struct RowLog<T> {
    rows: Vec<T>,
}

impl<T> Default for RowLog<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> RowLog<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends one page in arrival order and returns how many rows it held.
    pub fn append_page(&mut self, page: impl IntoIterator<Item = T>) -> usize {
        let before = self.rows.len();
        self.rows.extend(page);
        self.rows.len() - before
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.rows
    }

    #[must_use]
    pub fn visible_rows(&self, start: usize, limit: usize) -> &[T] {
        if limit == 0 || start >= self.rows.len() {
            return &[];
        }

        let end = start.saturating_add(limit).min(self.rows.len());
        &self.rows[start..end]
    }
}
