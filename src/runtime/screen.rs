use once_cell::sync::Lazy;
use regex::Regex;

/// Statement-level keywords that never belong inside a filter.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "union", "select", "insert", "update", "delete", "drop", "alter", "create", "truncate",
    "exec", "execute", "attach", "detach", "pragma",
];

const FORBIDDEN_SEQUENCES: &[&str] = &["--", "/*", "*/", ";", "#", "`", "\\", "\0"];

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("identifier pattern")
});

static TAUTOLOGY_RE: Lazy<Regex> = Lazy::new(|| {
    let operand = r#"(?:'\w*'|"\w*"|\d+)"#;
    Regex::new(&format!(
        r"(?i)\bor\s+{operand}\s*(?:=|<>|!=)\s*{operand}|\bor\s+true\b"
    ))
    .expect("tautology pattern")
});

/// Deny-list screen for raw filter text and field names.
///
/// A candidate is flagged when it contains comment markers, statement
/// separators, NUL bytes, backticks or backslashes, unbalanced quotes or
/// parentheses, an `OR <literal> = <literal>` tautology, or a whole-word
/// statement keyword. Field names must also be dotted identifiers.
#[derive(Clone, Debug)]
pub struct InjectionScreen {
    keywords: Regex,
}

impl Default for InjectionScreen {
    fn default() -> Self {
        Self {
            keywords: keyword_regex(DEFAULT_KEYWORDS.iter().copied())
                .expect("default keyword pattern"),
        }
    }
}

impl InjectionScreen {
    /// Creates a screen with the default keyword list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a screen that also denies `extra` keywords.
    pub fn with_keywords<I, S>(extra: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra: Vec<String> = extra
            .into_iter()
            .map(|kw| kw.as_ref().trim().to_owned())
            .filter(|kw| !kw.is_empty())
            .collect();
        let all = DEFAULT_KEYWORDS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str));
        Ok(Self {
            keywords: keyword_regex(all)?,
        })
    }

    /// Returns true when `candidate` looks like an injection attempt.
    pub fn is_suspicious(&self, candidate: &str) -> bool {
        if FORBIDDEN_SEQUENCES
            .iter()
            .any(|seq| candidate.contains(seq))
        {
            return true;
        }
        if candidate.matches('\'').count() % 2 != 0 || candidate.matches('"').count() % 2 != 0 {
            return true;
        }
        !parens_balanced(candidate)
            || self.keywords.is_match(candidate)
            || TAUTOLOGY_RE.is_match(candidate)
    }

    /// Returns true when `field` is not a safe field name.
    pub fn is_suspicious_field(&self, field: &str) -> bool {
        !IDENTIFIER_RE.is_match(field) || self.keywords.is_match(field)
    }
}

/// Parentheses outside quoted text must nest and close, so raw text cannot
/// escape the group a backend wraps it in.
fn parens_balanced(candidate: &str) -> bool {
    let mut depth = 0usize;
    let mut quote = None;
    for ch in candidate.chars() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => match depth.checked_sub(1) {
                Some(next) => depth = next,
                None => return false,
            },
            (None, _) => {}
        }
    }
    depth == 0
}

fn keyword_regex<'a, I>(keywords: I) -> Result<Regex, regex::Error>
where
    I: IntoIterator<Item = &'a str>,
{
    let alternation = keywords
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
}
