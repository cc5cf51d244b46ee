//! Paths into the store tree
//!
//! A [`Path`] is a slash-delimited sequence of segments naming a node. Paths are
//! immutable values; two paths are equal when their segments are equal.
//!
//! ## Segment rules
//!
//! - Segments must not be empty (`/a//b` is rejected, leading/trailing slashes are ignored)
//! - Segments must not contain NUL bytes
//! - Segments must not contain any of `.`, `#`, `$`, `[`, `]`
//! - Segments must not exceed [`MAX_SEGMENT_BYTES`]
//!
//! The root path has no segments and displays as `/`.

use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a single segment in bytes
pub const MAX_SEGMENT_BYTES: usize = 768;

/// Characters the store refuses inside a segment
pub const FORBIDDEN_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// Segment validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    /// Segment is empty (e.g. `a//b`)
    #[error("path segment cannot be empty")]
    EmptySegment,

    /// Segment contains NUL byte (\0)
    #[error("path segment cannot contain NUL bytes")]
    ContainsNul,

    /// Segment contains a character the store reserves
    #[error("path segment '{segment}' contains forbidden character '{ch}'")]
    ForbiddenChar {
        /// Offending segment
        segment: String,
        /// First forbidden character found
        ch: char,
    },

    /// Segment exceeds maximum length
    #[error("path segment too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Actual segment length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },
}

impl PathError {
    /// Short reason code used in logs and error records
    pub fn reason_code(&self) -> &'static str {
        match self {
            PathError::EmptySegment => "empty_segment",
            PathError::ContainsNul => "contains_nul",
            PathError::ForbiddenChar { .. } => "forbidden_char",
            PathError::TooLong { .. } => "segment_too_long",
        }
    }
}

/// Validate a single path segment
pub fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment.contains('\x00') {
        return Err(PathError::ContainsNul);
    }
    if let Some(ch) = segment.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(PathError::ForbiddenChar {
            segment: segment.to_string(),
            ch,
        });
    }
    if segment.len() > MAX_SEGMENT_BYTES {
        return Err(PathError::TooLong {
            actual: segment.len(),
            max: MAX_SEGMENT_BYTES,
        });
    }
    Ok(())
}

/// Address of a node in the store tree
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path {
    segments: SmallVec<[String; 4]>,
}

impl Path {
    /// The root of the tree
    pub fn root() -> Self {
        Path::default()
    }

    /// Parse a slash-delimited path
    ///
    /// # Examples
    ///
    /// ```
    /// use canopy_core::Path;
    ///
    /// let path = Path::parse("/jobs/42").unwrap();
    /// assert_eq!(path.segments(), ["jobs", "42"]);
    /// assert_eq!(path.to_string(), "/jobs/42");
    /// assert!(Path::parse("jobs/a.b").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let trimmed = input.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Path::root());
        }
        let mut segments = SmallVec::new();
        for segment in trimmed.split('/') {
            validate_segment(segment)?;
            segments.push(segment.to_string());
        }
        Ok(Path { segments })
    }

    /// Build a path from already-split segments
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = SmallVec::new();
        for segment in segments {
            let segment = segment.into();
            validate_segment(&segment)?;
            out.push(segment);
        }
        Ok(Path { segments: out })
    }

    /// Path of a direct child
    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Path { segments })
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Path { segments })
    }

    /// Last segment, `None` for the root
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// All segments in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` equals `other` or is one of its ancestors
    pub fn contains(&self, other: &Path) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }

    /// True if either path contains the other
    pub fn overlaps(&self, other: &Path) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Segments of `other` below `self`, if `self` contains it
    pub fn relative<'a>(&self, other: &'a Path) -> Option<&'a [String]> {
        if self.contains(other) {
            Some(&other.segments[self.segments.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self)
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}
