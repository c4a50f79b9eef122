//! YAML reading and writing for scenario and config files.
//!
//! Enum variants are written as single-key maps (`navigate: { url: /login }`,
//! `url_contains: /dashboard`) rather than YAML tags (`!navigate`), at any
//! depth.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml_ng::with::singleton_map_recursive;

/// Parse one document
pub fn from_str<T: DeserializeOwned>(yaml: &str) -> Result<T, serde_yaml_ng::Error> {
    singleton_map_recursive::deserialize(serde_yaml_ng::Deserializer::from_str(yaml))
}

/// Parse every `---`-separated document
pub fn documents<T: DeserializeOwned>(yaml: &str) -> Result<Vec<T>, serde_yaml_ng::Error> {
    serde_yaml_ng::Deserializer::from_str(yaml)
        .map(singleton_map_recursive::deserialize)
        .collect()
}

/// Serialize with enum variants as single-key maps
pub fn to_string<T: Serialize>(value: &T) -> Result<String, serde_yaml_ng::Error> {
    let mut out = Vec::new();
    let mut serializer = serde_yaml_ng::Serializer::new(&mut out);
    singleton_map_recursive::serialize(value, &mut serializer)?;
    String::from_utf8(out).map_err(|e| serde::ser::Error::custom(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::wait::UrlPattern;

    #[test]
    fn test_map_form_variant() {
        let p: UrlPattern = from_str("contains: /liquidation-report/").unwrap();
        assert_eq!(p, UrlPattern::Contains("/liquidation-report/".into()));
    }

    #[test]
    fn test_written_variants_read_back() {
        let patterns = vec![UrlPattern::Prefix("http://lg.test".into()), UrlPattern::Any];
        let text = to_string(&patterns).unwrap();
        assert!(text.contains("prefix: http://lg.test"), "{text}");
        let back: Vec<UrlPattern> = from_str(&text).unwrap();
        assert_eq!(back, patterns);
    }

    #[test]
    fn test_documents() {
        let all: Vec<UrlPattern> = documents("exact: /a\n---\nregex: ^/b\n").unwrap();
        assert_eq!(all, [UrlPattern::Exact("/a".into()), UrlPattern::Regex("^/b".into())]);
    }
}
