// ABOUTME: Serves random stanzas from a poem file, used as flavour text
// ABOUTME: Stanzas are blank-line separated; a missing file degrades to empty

use rand::seq::SliceRandom;
use std::path::Path;

/// A poem split into stanzas.
#[derive(Debug, Default)]
pub struct Verses {
    stanzas: Vec<String>,
}

impl Verses {
    /// Group a text into stanzas on blank lines.
    pub fn from_text(text: &str) -> Verses {
        let mut stanzas = Vec::new();
        let mut current = String::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    stanzas.push(std::mem::take(&mut current));
                }
            } else {
                if !current.is_empty() {
                    current.push('\n');
                }
                current.push_str(line);
            }
        }
        if !current.is_empty() {
            stanzas.push(current);
        }
        Verses { stanzas }
    }

    /// Load a poem from disk.
    pub async fn load(path: &Path) -> std::io::Result<Verses> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Verses::from_text(&text))
    }

    pub fn is_empty(&self) -> bool {
        self.stanzas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stanzas.len()
    }

    /// A uniformly random stanza, or `None` when the collection is empty.
    pub fn random_stanza(&self) -> Option<&str> {
        self.stanzas
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POEM: &str = "line one\nline two\n\nsecond stanza\n\n\n\nthird\nstanza here\n";

    #[test]
    fn splits_on_blank_lines() {
        let verses = Verses::from_text(POEM);
        assert_eq!(verses.len(), 3);
        assert_eq!(verses.random_stanza().map(|s| s.is_empty()), Some(false));
    }

    #[test]
    fn consecutive_blanks_do_not_create_empty_stanzas() {
        let verses = Verses::from_text("a\n\n\n\nb\n");
        assert_eq!(verses.len(), 2);
    }

    #[test]
    fn empty_text_serves_nothing() {
        let verses = Verses::from_text("");
        assert!(verses.is_empty());
        assert_eq!(verses.random_stanza(), None);
    }
}
