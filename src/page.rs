use std::path::PathBuf;

/// A diagram cropped out of a page and written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CroppedDiagram {
    /// 1-based position of the source box in the detection response.
    pub index: usize,
    pub path: PathBuf,
}

/// Everything extracted from one input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    /// 1-based position in the input list.
    pub page_number: usize,
    pub image_name: String,
    pub text: String,
    pub diagrams: Vec<CroppedDiagram>,
}

impl PageContent {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Non-blank lines of the transcription, untrimmed.
    pub fn text_lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().filter(|line| !line.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> PageContent {
        PageContent {
            page_number: 1,
            image_name: "p1.jpg".to_string(),
            text: text.to_string(),
            diagrams: Vec::new(),
        }
    }

    #[test]
    fn whitespace_only_text_counts_as_empty() {
        assert!(!page(" \n\t\n").has_text());
        assert!(page("x").has_text());
    }

    #[test]
    fn blank_lines_are_dropped_but_indentation_kept() {
        let page = page("first\n\n   \n  indented\r\nlast");
        assert_eq!(
            page.text_lines().collect::<Vec<_>>(),
            vec!["first", "  indented", "last"]
        );
    }
}
