//! File-name sanitizing for provider-supplied strings.

/// Longest name [`sanitize`] returns, in characters.
pub const MAX_NAME_CHARS: usize = 200;

const REPLACEMENT: char = '_';

fn is_illegal(c: char) -> bool {
    matches!(c, '/' | '?' | '<' | '>' | '\\' | ':' | '*' | '|' | '"' | ' ')
        || c.is_control()
}

fn is_windows_reserved(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).to_ascii_lowercase();
    match stem.as_str() {
        "con" | "prn" | "aux" | "nul" => true,
        _ => match stem.as_bytes() {
            [a, b, c, digit] => {
                matches!(&[*a, *b, *c], b"com" | b"lpt") && digit.is_ascii_digit()
            }
            _ => false,
        },
    }
}

/// Make an arbitrary string usable as a single path segment.
///
/// Separators, shell-hostile punctuation, spaces and control characters
/// become `_`. Names made only of dots, Windows device names and trailing
/// dots or spaces are neutralized the same way. The result is capped at
/// [`MAX_NAME_CHARS`].
pub fn sanitize(input: &str) -> String {
    let mut name: String = input
        .chars()
        .map(|c| if is_illegal(c) { REPLACEMENT } else { c })
        .collect();

    if !name.is_empty() && name.chars().all(|c| c == '.') {
        name = REPLACEMENT.to_string();
    }
    if is_windows_reserved(&name) {
        name = REPLACEMENT.to_string();
    }

    let trimmed = name.trim_end_matches(['.', ' ']);
    if trimmed.len() != name.len() {
        name = format!("{trimmed}{REPLACEMENT}");
    }

    name.chars().take(MAX_NAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_illegal() {
        assert_eq!(sanitize("a/b c?d"), "a_b_c_d");
        assert_eq!(sanitize("GitHub: Where | the *world* builds"), "GitHub__Where___the__world__builds");
        assert_eq!(sanitize("tab\u{7}bell"), "tab_bell");
    }

    #[test]
    fn test_dot_names() {
        assert_eq!(sanitize("."), "_");
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize("..."), "_");
        assert_eq!(sanitize(".hidden"), ".hidden");
    }

    #[test]
    fn test_windows_reserved() {
        assert_eq!(sanitize("CON"), "_");
        assert_eq!(sanitize("com1.txt"), "_");
        assert_eq!(sanitize("lpt9"), "_");
        assert_eq!(sanitize("console"), "console");
        assert_eq!(sanitize("com10"), "com10");
    }

    #[test]
    fn test_trailing_dots() {
        assert_eq!(sanitize("Loading..."), "Loading_");
    }

    #[test]
    fn test_length_cap() {
        let long = "é".repeat(500);
        assert_eq!(sanitize(&long).chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_plain_name_untouched() {
        assert_eq!(sanitize("Example_Domain"), "Example_Domain");
        assert_eq!(sanitize(""), "");
    }
}
