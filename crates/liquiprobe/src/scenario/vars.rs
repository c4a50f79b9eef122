//! `${name}` interpolation over captured variables and fixture values.

use std::collections::BTreeMap;

use crate::fixture::Fixtures;
use crate::result::{ProbeError, ProbeResult};

/// Values visible to one scenario run
#[derive(Debug, Clone, Default)]
pub struct Variables {
    captured: BTreeMap<String, String>,
    fixtures: Fixtures,
}

impl Variables {
    /// Start from a fixture set
    #[must_use]
    pub fn new(fixtures: Fixtures) -> Self {
        Self {
            captured: BTreeMap::new(),
            fixtures,
        }
    }

    /// Store a captured value, shadowing any fixture of the same name
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.captured.insert(name.into(), value.into());
    }

    /// Look up a name; captures win over fixtures
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.captured
            .get(name)
            .map(String::as_str)
            .or_else(|| self.fixtures.value(name))
    }

    /// Fixture set
    #[must_use]
    pub const fn fixtures(&self) -> &Fixtures {
        &self.fixtures
    }

    /// Captured values so far
    #[must_use]
    pub const fn captured(&self) -> &BTreeMap<String, String> {
        &self.captured
    }

    /// Replace every `${name}` in `text`
    pub fn interpolate(&self, text: &str) -> ProbeResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let name = after[..end].trim();
            let value = self.get(name).ok_or_else(|| ProbeError::UnknownVariable { name: name.to_string() })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Names referenced as `${name}` in `text`
#[must_use]
pub fn references(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        names.push(after[..end].trim().to_string());
        rest = &after[end + 1..];
    }
    names
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn vars() -> Variables {
        let mut vars = Variables::new(Fixtures::new().with_value("keyword", "Apple"));
        vars.set("amount", "₱1,000.00");
        vars
    }

    #[test]
    fn test_interpolate() {
        let v = vars();
        assert_eq!(v.interpolate("search ${keyword}").unwrap(), "search Apple");
        assert_eq!(v.interpolate("${amount}/${ keyword }").unwrap(), "₱1,000.00/Apple");
        assert_eq!(v.interpolate("no vars").unwrap(), "no vars");
        assert_eq!(v.interpolate("dangling ${open").unwrap(), "dangling ${open");
    }

    #[test]
    fn test_unknown_variable() {
        let err = vars().interpolate("${nope}").unwrap_err();
        assert!(matches!(err, ProbeError::UnknownVariable { name } if name == "nope"));
    }

    #[test]
    fn test_capture_shadows_fixture() {
        let mut v = vars();
        v.set("keyword", "Banana");
        assert_eq!(v.get("keyword"), Some("Banana"));
    }

    #[test]
    fn test_references() {
        assert_eq!(references("${a} and ${b}"), ["a", "b"]);
        assert!(references("plain").is_empty());
    }
}
