//! Normalization helpers for user-supplied text.

/// Normalize an email address for storage and comparison.
///
/// Recipient binding compares the requester's address against the bundle's
/// stored address; both sides must go through this first.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Reduce a filename to a safe character set for download headers and
/// archive entry names. Everything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Doc@Example.COM \n"), "doc@example.com");
        assert_eq!(normalize_email("doc@example.com"), "doc@example.com");
    }

    #[test]
    fn filenames_keep_safe_characters() {
        assert_eq!(safe_file_name("blood-work_2024.pdf"), "blood-work_2024.pdf");
    }

    #[test]
    fn filenames_replace_everything_else() {
        assert_eq!(safe_file_name("raio x (tórax).pdf"), "raio_x__t_rax_.pdf");
        assert_eq!(safe_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(safe_file_name("a\"b\\c"), "a_b_c");
    }
}
