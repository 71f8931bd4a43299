//! Terminal rendering of streamed answer text.

/// How answer text is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// Markdown source passes through untouched.
    #[default]
    Markdown,
    /// Inline markers and heading hashes are dropped.
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line {
    Start,
    Hashes,
    Text,
}

/// Incremental renderer; state carries across fragment boundaries.
#[derive(Debug, Clone)]
pub struct TextRenderer {
    mode: RenderMode,
    line: Line,
}

impl TextRenderer {
    pub fn new(mode: RenderMode) -> Self {
        Self {
            mode,
            line: Line::Start,
        }
    }

    /// Render one delta.
    pub fn render(&mut self, fragment: &str) -> String {
        match self.mode {
            RenderMode::Markdown => fragment.to_string(),
            RenderMode::Plain => fragment.chars().filter_map(|c| self.plain(c)).collect(),
        }
    }

    fn plain(&mut self, c: char) -> Option<char> {
        if matches!(c, '*' | '`') {
            return None;
        }
        match (self.line, c) {
            (_, '\n') => {
                self.line = Line::Start;
                Some(c)
            }
            (Line::Start | Line::Hashes, '#') => {
                self.line = Line::Hashes;
                None
            }
            (Line::Hashes, ' ') => {
                self.line = Line::Text;
                None
            }
            _ => {
                self.line = Line::Text;
                Some(c)
            }
        }
    }
}
