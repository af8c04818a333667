use std::fmt;

/// A hierarchical datastore key such as `/blocks/abcd`.
///
/// Keys are always cleaned: a single leading `/`, no empty or `.`
/// segments, `..` pops the previous segment, and no trailing `/`. The root
/// key is `/`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DsKey(String);

impl DsKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in key.as_ref().split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        Self(format!("/{}", segments.join("/")))
    }

    pub fn root() -> Self {
        Self("/".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment; empty for the root.
    pub fn name(&self) -> &str {
        self.segments().last().unwrap_or("")
    }

    pub fn child(&self, name: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.0, name.as_ref()))
    }

    /// `self` followed by the segments of `other`.
    pub fn join(&self, other: &DsKey) -> Self {
        if other.is_root() {
            return self.clone();
        }
        if self.is_root() {
            return other.clone();
        }
        Self(format!("{}{}", self.0, other.0))
    }

    /// True if `other` lies strictly below `self`.
    pub fn is_ancestor_of(&self, other: &DsKey) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// True if `other` equals `self` or lies below it.
    pub fn contains(&self, other: &DsKey) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// `self` with `prefix` removed, or `None` if `prefix` does not contain
    /// it. Stripping a key from itself yields the root.
    pub fn strip_prefix(&self, prefix: &DsKey) -> Option<DsKey> {
        if prefix.is_root() {
            return Some(self.clone());
        }
        if self == prefix {
            return Some(DsKey::root());
        }
        if prefix.is_ancestor_of(self) {
            return Some(Self(self.0[prefix.0.len()..].to_owned()));
        }
        None
    }
}

impl fmt::Debug for DsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DsKey").field(&self.0).finish()
    }
}

impl fmt::Display for DsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DsKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for DsKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_cleaned() {
        assert_eq!(DsKey::new("blocks").as_str(), "/blocks");
        assert_eq!(DsKey::new("//a//b/").as_str(), "/a/b");
        assert_eq!(DsKey::new("/a/./b/../c").as_str(), "/a/c");
        assert_eq!(DsKey::new("").as_str(), "/");
        assert!(DsKey::new("/..").is_root());
    }

    #[test]
    fn ancestry() {
        let blocks = DsKey::new("/blocks");
        assert!(blocks.is_ancestor_of(&DsKey::new("/blocks/abc")));
        assert!(!blocks.is_ancestor_of(&DsKey::new("/blocksabc")));
        assert!(!blocks.is_ancestor_of(&blocks));
        assert!(blocks.contains(&blocks));
        assert!(DsKey::root().is_ancestor_of(&blocks));
        assert!(!DsKey::root().is_ancestor_of(&DsKey::root()));
    }

    #[test]
    fn join_and_strip_are_inverse() {
        let prefix = DsKey::new("/blocks");
        let key = DsKey::new("/abc");
        let joined = prefix.join(&key);
        assert_eq!(joined.as_str(), "/blocks/abc");
        assert_eq!(joined.strip_prefix(&prefix), Some(key));
        assert_eq!(prefix.strip_prefix(&prefix), Some(DsKey::root()));
        assert_eq!(DsKey::new("/other").strip_prefix(&prefix), None);
        assert_eq!(DsKey::root().join(&prefix), prefix);
    }

    #[test]
    fn child_and_name() {
        let key = DsKey::root().child("abc");
        assert_eq!(key.as_str(), "/abc");
        assert_eq!(key.name(), "abc");
        assert_eq!(DsKey::root().name(), "");
    }
}
