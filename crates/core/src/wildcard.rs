//! Shell-style wildcard matching (fnmatch semantics, case-sensitive).
//!
//! Patterns are translated to an anchored [`regex::Regex`]:
//!
//! | Pattern  | Matches                                  |
//! |----------|------------------------------------------|
//! | `*`      | any run of characters, including none    |
//! | `?`      | exactly one character                    |
//! | `[seq]`  | one character from `seq` (ranges allowed)|
//! | `[!seq]` | one character not in `seq`               |
//!
//! Everything else matches literally. An unterminated `[` is a literal.

use regex::Regex;

/// Translate a wildcard pattern into regex source, anchored at both ends.
pub fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?s)^");

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; a `]` directly after `[` or `[!` is literal.
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                    continue;
                }

                let mut class = String::from("[");
                let mut k = i;
                if chars[k] == '!' {
                    class.push('^');
                    k += 1;
                }
                for &member in &chars[k..j] {
                    match member {
                        '\\' | '[' | ']' | '&' | '~' => {
                            class.push('\\');
                            class.push(member);
                        }
                        '^' if class.len() == 1 => class.push_str(r"\^"),
                        other => class.push(other),
                    }
                }
                class.push(']');
                out.push_str(&class);
                i = j + 1;
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }

    out.push('$');
    out
}

/// Whether `text` matches the wildcard `pattern` in full.
///
/// A pattern whose character class does not compile (e.g. a reversed
/// range like `[z-a]`) matches nothing.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    match Regex::new(&translate(pattern)) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_only_itself() {
        assert!(wildcard_match("3D Slicer", "3D Slicer"));
        assert!(!wildcard_match("3D Slicer", "3D Slicer 5"));
        assert!(!wildcard_match("3D Slicer", "3d slicer"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*", "anything at all"));
        assert!(wildcard_match("4.*", "4.3.1"));
        assert!(wildcard_match("4.3*", "4.3.1"));
        assert!(!wildcard_match("4.*", "5.0.0"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(wildcard_match("4.?.1", "4.3.1"));
        assert!(!wildcard_match("4.?.1", "4.10.1"));
        assert!(!wildcard_match("?", ""));
    }

    #[test]
    fn dot_is_literal() {
        assert!(!wildcard_match("4.3", "4x3"));
        assert!(wildcard_match("a+b(c)", "a+b(c)"));
    }

    #[test]
    fn character_classes() {
        assert!(wildcard_match("4.[0-3].1", "4.3.1"));
        assert!(!wildcard_match("4.[0-2].1", "4.3.1"));
        assert!(wildcard_match("4.[!0-2].1", "4.3.1"));
        assert!(!wildcard_match("4.[!3].1", "4.3.1"));
        assert!(wildcard_match("[]]", "]"));
    }

    #[test]
    fn unterminated_bracket_is_literal() {
        assert!(wildcard_match("v[1", "v[1"));
        assert!(!wildcard_match("v[1", "v1"));
    }

    #[test]
    fn translate_anchors_pattern() {
        assert_eq!(translate("a*"), "(?s)^a.*$");
    }
}
