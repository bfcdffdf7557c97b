//! Slug helper used for entity ids and backup file names.

/// Lowercase `text` and collapse every run of non-alphanumeric characters
/// into a single `_`, trimming separators at both ends.
///
/// Returns `"unknown"` when nothing alphanumeric is left.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(ch);
        } else {
            pending_separator = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("unknown");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_lowercase_and_join_words_with_underscore() {
        assert_eq!(slugify("My Backup"), "my_backup");
    }

    #[test]
    fn should_collapse_runs_of_separators() {
        assert_eq!(slugify("Living -- Room  (2)"), "living_room_2");
    }

    #[test]
    fn should_trim_leading_and_trailing_separators() {
        assert_eq!(slugify("  __Kitchen__ "), "kitchen");
    }

    #[test]
    fn should_fall_back_to_unknown_when_nothing_is_left() {
        assert_eq!(slugify("!!!"), "unknown");
    }
}
