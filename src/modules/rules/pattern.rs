//! Wildcard patterns for rule conditions.
//!
//! `*` matches any run of characters (including none), `?` matches exactly
//! one. A pattern may contain at most three wildcard characters.

/// Most wildcard characters allowed in one pattern.
pub const MAX_WILDCARDS: usize = 3;

/// Longest allowed pattern.
pub const MAX_PATTERN_LEN: usize = 128;

/// A compiled wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    source: String,
    chars: Vec<char>,
    case_insensitive: bool,
}

impl WildcardPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the pattern is empty, longer
    /// than 128 characters, or has more than three wildcards.
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self, String> {
        if pattern.is_empty() {
            return Err("pattern is empty".to_string());
        }
        if pattern.chars().count() > MAX_PATTERN_LEN {
            return Err(format!("'{pattern}' is longer than {MAX_PATTERN_LEN} characters"));
        }
        let wildcards = pattern.chars().filter(|c| matches!(c, '*' | '?')).count();
        if wildcards > MAX_WILDCARDS {
            return Err(format!(
                "'{pattern}' has {wildcards} wildcards, at most {MAX_WILDCARDS} are allowed"
            ));
        }
        Ok(Self::unchecked(pattern, case_insensitive))
    }

    /// Compile a pattern without the length and wildcard limits.
    #[must_use]
    pub fn unchecked(pattern: &str, case_insensitive: bool) -> Self {
        Self {
            source: pattern.to_string(),
            chars: pattern.chars().collect(),
            case_insensitive,
        }
    }

    /// Get the pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether `input` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        if self.source.is_ascii() && input.is_ascii() {
            let ci = self.case_insensitive;
            glob(self.source.as_bytes(), input.as_bytes(), b'*', b'?', |p, i| {
                if ci {
                    p.eq_ignore_ascii_case(&i)
                } else {
                    p == i
                }
            })
        } else {
            let input: Vec<char> = input.chars().collect();
            let ci = self.case_insensitive;
            glob(&self.chars, &input, '*', '?', |p, i| {
                p == i || (ci && p.to_lowercase().eq(i.to_lowercase()))
            })
        }
    }
}

/// Iterative glob match with single-star backtracking.
fn glob<T, F>(pattern: &[T], input: &[T], many: T, one: T, eq: F) -> bool
where
    T: Copy + PartialEq,
    F: Fn(T, T) -> bool,
{
    let (mut p, mut i) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while i < input.len() {
        if p < pattern.len() && pattern[p] == many {
            backtrack = Some((p, i));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == one || eq(pattern[p], input[i])) {
            p += 1;
            i += 1;
        } else if let Some((star, start)) = backtrack {
            p = star + 1;
            i = start + 1;
            backtrack = Some((star, start + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == many)
}
