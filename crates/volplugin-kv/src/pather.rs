//! Key path construction.
//!
//! A `PathBuilder` holds an ordered list of segments and knows how to render
//! them for a particular store flavor. etcd keys carry a leading separator,
//! consul keys do not, so the same logical path renders as `/volplugin/a` or
//! `volplugin/a` without the calling code knowing which store it talks to.
//!
//! Builders are immutable values: `append`, `replace`, and `combine` return a
//! new builder and leave the receiver untouched.

use std::fmt;

use volplugin_common::{Result, VolpluginError};

/// Separator used by both supported store flavors
pub const SEPARATOR: char = '/';

/// Builds hierarchical key paths for a key-value store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathBuilder {
    segments: Vec<String>,
    separator: char,
    lead_sep: bool,
}

impl PathBuilder {
    /// A multi-level `prefix` such as `org/volplugin` becomes one segment per
    /// level, so no segment ever holds the separator.
    fn new(prefix: &str, separator: char, lead_sep: bool) -> Self {
        Self {
            segments: prefix
                .split(separator)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            separator,
            lead_sep,
        }
    }

    /// Builder rooted at `prefix` that renders with a leading separator.
    pub fn etcd(prefix: impl AsRef<str>) -> Self {
        Self::new(prefix.as_ref(), SEPARATOR, true)
    }

    /// Builder rooted at `prefix` that renders without a leading separator.
    pub fn consul(prefix: impl AsRef<str>) -> Self {
        Self::new(prefix.as_ref(), SEPARATOR, false)
    }

    fn validate<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            let name = name.as_ref();
            if name.contains(self.separator) {
                return Err(VolpluginError::InvalidPath(name.to_string()));
            }
        }

        Ok(())
    }

    /// Return a copy with `names` added after the existing segments.
    pub fn append<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        self.validate(names)?;

        let mut next = self.clone();
        next.segments
            .extend(names.iter().map(|name| name.as_ref().to_string()));
        Ok(next)
    }

    /// Return a copy whose segments are exactly `names`.
    ///
    /// Useful to move to another namespace while keeping this builder's
    /// rendering rules.
    pub fn replace<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        self.validate(names)?;

        let mut next = self.clone();
        next.segments = names.iter().map(|name| name.as_ref().to_string()).collect();
        Ok(next)
    }

    /// Append every segment of `other` to a copy of this builder.
    pub fn combine(&self, other: &PathBuilder) -> Result<Self> {
        self.validate(other.segments.as_slice())?;
        self.append(other.segments.as_slice())
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn has_leading_separator(&self) -> bool {
        self.lead_sep
    }

    /// Strip this builder's rendered path, and surrounding separators, from
    /// a full key.
    pub fn trim<'a>(&self, key: &'a str) -> &'a str {
        let prefix = self.segments.join(&self.separator.to_string());
        let key = key.trim_matches(self.separator);
        key.strip_prefix(prefix.as_str())
            .unwrap_or(key)
            .trim_matches(self.separator)
    }
}

impl fmt::Display for PathBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lead_sep {
            write!(f, "{}", self.separator)?;
        }
        write!(f, "{}", self.segments.join(&self.separator.to_string()))
    }
}
