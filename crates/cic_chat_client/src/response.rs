//! Ordered log of answer fragments.

/// Append-only sequence of delta texts in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseLog {
    fragments: Vec<String>,
}

impl ResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: String) {
        self.fragments.push(fragment);
    }

    /// The answer so far: all fragments concatenated.
    pub fn current_text(&self) -> String {
        self.fragments.concat()
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
