//! Joining OCR fragments into a single text.

/// Join OCR fragments with single spaces, in order.
///
/// Fragments are used exactly as the OCR engine returned them: no trimming,
/// normalization or deduplication.
pub fn assemble<S: AsRef<str>>(fragments: &[S]) -> String {
    let mut text = String::new();
    for (idx, fragment) in fragments.iter().enumerate() {
        if idx > 0 {
            text.push(' ');
        }
        text.push_str(fragment.as_ref());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_with_single_spaces_in_order() {
        assert_eq!(assemble(&["a", "b"]), "a b");
        assert_eq!(assemble(&["नमस्ते", "संसार", "hello"]), "नमस्ते संसार hello");
    }

    #[test]
    fn empty_input_gives_empty_text() {
        let fragments: Vec<String> = vec![];
        assert_eq!(assemble(&fragments), "");
    }

    #[test]
    fn fragments_are_not_trimmed_or_deduplicated() {
        assert_eq!(assemble(&[" a ", "a", ""]), " a  a ");
    }
}
