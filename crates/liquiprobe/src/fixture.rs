//! Fixture provisioning.
//!
//! Scenarios never read ambient test data. Each scenario asks a
//! [`FixtureProvider`] for its own [`Fixtures`] set and receives credentials
//! and literal values as explicit parameters.
//!
//! Generated values are drawn fresh per provisioning: a pattern such as
//! `##-####` becomes `48-1930`, so concurrent workers creating records do not
//! collide on unique columns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::result::{ProbeError, ProbeResult};

/// Placeholder replaced by a random decimal digit
pub const DIGIT_PLACEHOLDER: char = '#';

/// A login identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Email typed into the login form
    pub email: String,
    /// Password typed into the login form
    pub password: String,
}

impl Credentials {
    /// Create credentials
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

// Passwords stay out of logs and reports.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fixture section of the runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Named login identities
    pub credentials: BTreeMap<String, Credentials>,
    /// Named literal values
    pub values: BTreeMap<String, String>,
    /// Named digit patterns, regenerated per scenario
    pub generated: BTreeMap<String, String>,
}

/// One scenario's isolated fixture set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fixtures {
    credentials: BTreeMap<String, Credentials>,
    values: BTreeMap<String, String>,
}

impl Fixtures {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a login identity
    #[must_use]
    pub fn with_credentials(mut self, name: impl Into<String>, credentials: Credentials) -> Self {
        self.credentials.insert(name.into(), credentials);
        self
    }

    /// Add a literal value
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Look up a login identity
    pub fn credentials(&self, name: &str) -> ProbeResult<&Credentials> {
        self.credentials.get(name).ok_or_else(|| ProbeError::UnknownFixture { name: name.to_string() })
    }

    /// Look up a value
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Names of all values
    pub fn value_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Supplies an isolated fixture set per scenario
pub trait FixtureProvider: Send + Sync {
    /// Provision fixtures for the named scenario
    fn provision(&self, scenario: &str) -> ProbeResult<Fixtures>;
}

/// Provider backed by the configuration file
#[derive(Debug, Clone, Default)]
pub struct ConfigFixtures {
    config: FixtureConfig,
}

impl ConfigFixtures {
    /// Wrap a fixture configuration
    #[must_use]
    pub const fn new(config: FixtureConfig) -> Self {
        Self { config }
    }
}

impl FixtureProvider for ConfigFixtures {
    fn provision(&self, scenario: &str) -> ProbeResult<Fixtures> {
        let mut fixtures = Fixtures {
            credentials: self.config.credentials.clone(),
            values: self.config.values.clone(),
        };
        for (name, pattern) in &self.config.generated {
            let value = fill_digits(pattern);
            tracing::debug!(scenario, fixture = %name, %value, "generated fixture value");
            fixtures.values.insert(name.clone(), value);
        }
        Ok(fixtures)
    }
}

/// Replace every `#` in `pattern` with a random digit
#[must_use]
pub fn fill_digits(pattern: &str) -> String {
    let mut entropy = RandomDigits::default();
    pattern
        .chars()
        .map(|c| if c == DIGIT_PLACEHOLDER { entropy.next_digit() } else { c })
        .collect()
}

/// Digit source over v4 UUID randomness
#[derive(Default)]
struct RandomDigits {
    pool: Vec<u8>,
}

impl RandomDigits {
    fn next_digit(&mut self) -> char {
        loop {
            if self.pool.is_empty() {
                self.pool = uuid::Uuid::new_v4().as_bytes().to_vec();
            }
            // rejection sampling keeps digits uniform
            if let Some(byte) = self.pool.pop().filter(|b| *b < 250) {
                return char::from(b'0' + byte % 10);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> FixtureConfig {
        serde_yaml_ng::from_str(
            r"
credentials:
  admin: { email: test@gmail.com, password: Dswd@12345 }
values:
  missing_keyword: Apple
generated:
  employee_id: '##-####'
",
        )
        .unwrap()
    }

    #[test]
    fn test_fill_digits_shape() {
        let id = fill_digits("##-####");
        assert_eq!(id.len(), 7);
        assert_eq!(&id[2..3], "-");
        assert!(id.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
        assert_eq!(fill_digits("no digits"), "no digits");
    }

    #[test]
    fn test_provision_is_isolated_per_scenario() {
        let provider = ConfigFixtures::new(config());
        let a = provider.provision("a").unwrap();
        let b = provider.provision("b").unwrap();
        assert_eq!(a.credentials("admin").unwrap().email, "test@gmail.com");
        assert_eq!(a.value("missing_keyword"), Some("Apple"));
        assert!(a.value("employee_id").is_some());
        assert!(b.value("employee_id").is_some());
        // twelve random digits colliding is not a realistic outcome
        let wide = FixtureConfig {
            generated: [("k".to_string(), "############".to_string())].into(),
            ..FixtureConfig::default()
        };
        let wide = ConfigFixtures::new(wide);
        assert_ne!(wide.provision("x").unwrap().value("k"), wide.provision("y").unwrap().value("k"));
    }

    #[test]
    fn test_unknown_credentials() {
        let err = Fixtures::new().credentials("nobody").unwrap_err();
        assert!(matches!(err, ProbeError::UnknownFixture { name } if name == "nobody"));
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let creds = Credentials::new("a@b.c", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
