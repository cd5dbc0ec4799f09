/*!
 * Process Names
 * Inline-optimized names for handles, looked up by the facade's `find`
 */

use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;
use std::fmt;

/// Human-readable process name; not required to be unique
///
/// # Performance
///
/// Names up to 23 bytes are stored inline, so naming a handle on the
/// submission path does not allocate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ProcessName {
    inner: SmartString,
}

impl ProcessName {
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: SmartString::new(),
        }
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    /// Check if the name is stored inline (no heap allocation)
    #[inline]
    pub fn is_inline(&self) -> bool {
        self.inner.is_inline()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for ProcessName {
    #[inline]
    fn from(s: &str) -> Self {
        Self {
            inner: SmartString::from(s),
        }
    }
}

impl From<String> for ProcessName {
    #[inline]
    fn from(s: String) -> Self {
        Self {
            inner: SmartString::from(s),
        }
    }
}

impl From<&String> for ProcessName {
    #[inline]
    fn from(s: &String) -> Self {
        Self::from(s.as_str())
    }
}

impl AsRef<str> for ProcessName {
    #[inline(always)]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for ProcessName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ProcessName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_inline() {
        let name = ProcessName::from("physics.step");
        assert!(name.is_inline());
        assert_eq!(name, "physics.step");
    }

    #[test]
    fn test_long_names_heap_allocated() {
        let name = ProcessName::from("streaming.texture.upload.for.the.entire.world");
        assert!(!name.is_inline());
        assert!(name.as_str().starts_with("streaming"));
    }

    #[test]
    fn test_serialization() {
        let name = ProcessName::from("timer");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"timer\"");
        let back: ProcessName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
