use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::{
    codec::encode_key,
    error::{Error, Result},
};

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment
            .chars()
            .any(|c| c == '.' || c == ';' || c.is_whitespace())
}

fn valid_tag_part(part: &str) -> bool {
    valid_segment(part) && !part.contains('=')
}

/// Tag set of a metric.
///
/// Keys are unique and iterate in ascending order, which is also the order
/// they are written on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tags {
    tags: BTreeMap<String, String>,
}
impl Tags {
    pub fn new() -> Self {
        Self {
            tags: BTreeMap::new(),
        }
    }
    pub fn try_from_iter<I, K, V>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut tags = Self::new();
        for (key, value) in iter {
            tags.insert(key, value)?;
        }
        Ok(tags)
    }

    /// Returns the previous value when `key` was already present.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        let key = key.into();
        let value = value.into();
        if !valid_tag_part(&key) || !valid_tag_part(&value) {
            return Err(Error::InvalidTag { key, value });
        }
        Ok(self.tags.insert(key, value))
    }
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
    pub fn len(&self) -> usize {
        self.tags.len()
    }
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Parses `key=value,key2=value2`. The empty string is the empty tag set.
impl FromStr for Tags {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut tags = Self::new();
        if s.is_empty() {
            return Ok(tags);
        }
        for entry in s.split(',') {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(Error::InvalidTag {
                    key: entry.to_string(),
                    value: String::new(),
                });
            };
            tags.insert(key, value)?;
        }
        Ok(tags)
    }
}

/// Identity of a metric: a dotted name path plus its tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    path: Vec<String>,
    tags: Tags,
}
impl MetricKey {
    /// Segments are lower-cased before validation.
    pub fn new<I, S>(path: I, tags: Tags) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = path
            .into_iter()
            .map(|segment| lower_segment(segment.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if path.is_empty() {
            return Err(Error::EmptyName);
        }
        Ok(Self { path, tags })
    }

    /// Child metric with `segment` appended to this metric's path.
    ///
    /// The child carries `tags` in place of the parent's tags; pass
    /// `self.tags().clone()` to inherit them.
    pub fn sub_metric(&self, segment: &str, tags: Tags) -> Result<Self> {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend(self.path.iter().cloned());
        path.push(lower_segment(segment)?);
        Ok(Self { path, tags })
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }
    pub fn tags(&self) -> &Tags {
        &self.tags
    }
    /// Dotted name without tags.
    pub fn name(&self) -> String {
        self.path.join(".")
    }
}

fn lower_segment(segment: &str) -> Result<String> {
    let segment = segment.to_lowercase();
    if !valid_segment(&segment) {
        return Err(Error::InvalidSegment(segment));
    }
    Ok(segment)
}

/// Parses a dotted prefix such as `servers.web01` into an untagged key.
impl FromStr for MetricKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::EmptyName);
        }
        Self::new(s.split('.'), Tags::new())
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        encode_key(f, self)
    }
}
