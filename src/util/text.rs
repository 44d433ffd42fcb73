//! Term extraction for full-text indexing.

use unicode_segmentation::UnicodeSegmentation;

/// Split text into lower-cased terms on Unicode word boundaries.
pub fn terms(text: &str) -> Vec<String> {
    text.unicode_words().map(|word| word.to_lowercase()).collect()
}
