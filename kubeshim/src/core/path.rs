//! Paths into structured payloads.
//!
//! A [`Path`] is an ordered list of [`Segment`]s. Paths are either built
//! explicitly (segment by segment, or with the [`path!`](crate::path) macro)
//! or parsed from the dotted shorthand:
//!
//! ```text
//! metadata.name
//! spec.containers[0].image
//! metadata.annotations["app.kubernetes.io/name"]
//! ```
//!
//! Bracketed, quoted keys are how keys containing `.`, `/`, `[` or other
//! special characters are addressed.

use std::fmt;

use thiserror::Error;

/// One navigation step: an object key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<&String> for Segment {
    fn from(key: &String) -> Self {
        Segment::Key(key.clone())
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

/// Error returned by [`Path::parse`] for malformed dotted paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path `{input}` at offset {offset}: {message}")]
pub struct PathError {
    pub input: String,
    pub offset: usize,
    pub message: &'static str,
}

/// An owned sequence of segments. The empty path addresses the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(Segment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(Segment::Index(index));
        self
    }

    /// Parse the dotted shorthand. The empty string is the root path.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let chars: Vec<char> = input.chars().collect();
        let err = |offset: usize, message: &'static str| PathError {
            input: input.to_string(),
            offset,
            message,
        };

        let mut segments = Vec::new();
        let mut pos = 0;
        // True at the start and right after a `.`.
        let mut expect_segment = true;

        while pos < chars.len() {
            match chars[pos] {
                '[' => {
                    pos += 1;
                    match chars.get(pos) {
                        Some(&quote @ ('"' | '\'')) => {
                            pos += 1;
                            let mut key = String::new();
                            loop {
                                match chars.get(pos) {
                                    None => return Err(err(pos, "unterminated quoted key")),
                                    Some('\\') => {
                                        pos += 1;
                                        let Some(&escaped) = chars.get(pos) else {
                                            return Err(err(pos, "dangling escape"));
                                        };
                                        key.push(escaped);
                                        pos += 1;
                                    }
                                    Some(&c) if c == quote => {
                                        pos += 1;
                                        break;
                                    }
                                    Some(&c) => {
                                        key.push(c);
                                        pos += 1;
                                    }
                                }
                            }
                            segments.push(Segment::Key(key));
                        }
                        _ => {
                            let start = pos;
                            while pos < chars.len() && chars[pos].is_ascii_digit() {
                                pos += 1;
                            }
                            if start == pos {
                                return Err(err(start, "expected an index or a quoted key"));
                            }
                            let digits: String = chars[start..pos].iter().collect();
                            let index = digits
                                .parse::<usize>()
                                .map_err(|_| err(start, "index out of range"))?;
                            segments.push(Segment::Index(index));
                        }
                    }
                    if chars.get(pos) != Some(&']') {
                        return Err(err(pos, "expected `]`"));
                    }
                    pos += 1;
                    expect_segment = false;
                }
                '.' => {
                    if expect_segment {
                        return Err(err(pos, "empty segment"));
                    }
                    pos += 1;
                    if pos == chars.len() {
                        return Err(err(pos, "trailing `.`"));
                    }
                    expect_segment = true;
                }
                ']' => return Err(err(pos, "unexpected `]`")),
                _ => {
                    if !expect_segment {
                        return Err(err(pos, "expected `.` or `[`"));
                    }
                    let start = pos;
                    while pos < chars.len() && !matches!(chars[pos], '.' | '[' | ']') {
                        pos += 1;
                    }
                    segments.push(Segment::Key(chars[start..pos].iter().collect()));
                    expect_segment = false;
                }
            }
        }

        Ok(Path(segments))
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Path(segments)
    }
}

impl AsRef<[Segment]> for Path {
    fn as_ref(&self) -> &[Segment] {
        &self.0
    }
}

impl std::str::FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(key) if is_bare_key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                Segment::Key(key) => {
                    f.write_str("[\"")?;
                    for c in key.chars() {
                        if c == '"' || c == '\\' {
                            f.write_str("\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                    f.write_str("\"]")?;
                }
            }
        }
        Ok(())
    }
}

fn is_bare_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Build a segment array: `path!["metadata", "labels", "app"]`, `path!["items", 0usize]`.
#[macro_export]
macro_rules! path {
    ($($segment:expr),* $(,)?) => {
        [$($crate::core::path::Segment::from($segment)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_dotted_keys() {
        let path = Path::parse("metadata.name").expect("parse");
        assert_eq!(
            path.segments(),
            &[Segment::from("metadata"), Segment::from("name")]
        );
    }

    #[test]
    fn parses_indices_and_quoted_keys() {
        let path = Path::parse(r#"spec.containers[0].env["x.y/z"]"#).expect("parse");
        assert_eq!(
            path.segments(),
            &[
                Segment::from("spec"),
                Segment::from("containers"),
                Segment::Index(0),
                Segment::from("env"),
                Segment::from("x.y/z"),
            ]
        );
    }

    #[test]
    fn parses_single_quotes_and_escapes() {
        let path = Path::parse(r#"a['it\'s']"#).expect("parse");
        assert_eq!(path.segments(), &[Segment::from("a"), Segment::from("it's")]);
    }

    #[test]
    fn empty_input_is_root() {
        assert!(Path::parse("").expect("parse").is_root());
    }

    #[test]
    fn rejects_malformed_paths() {
        for input in ["a..b", ".a", "a.", "a[", "a[x]", "a[0", "a[0]b", r#"a["x"#, "a]"] {
            assert!(Path::parse(input).is_err(), "expected error for {input}");
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        let path = Path::root()
            .key("metadata")
            .key("annotations")
            .key("kubernetes.io/created-by")
            .key("quote\"d")
            .index(3);
        let rendered = path.to_string();
        assert_eq!(
            rendered,
            r#"metadata.annotations["kubernetes.io/created-by"]["quote\"d"][3]"#
        );
        assert_eq!(Path::parse(&rendered).expect("parse"), path);
    }

    #[test]
    fn path_macro_mixes_keys_and_indices() {
        let segments = crate::path!["items", 2usize, "name"];
        assert_eq!(segments[1], Segment::Index(2));
    }
}
