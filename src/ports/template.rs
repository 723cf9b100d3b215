//! Expands `$PORT`/`${PORT}`/`${PORT:name}` tokens in environment values.
//! Never errors: anything it can't resolve is left exactly as written.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn named_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{PORT:([A-Za-z0-9._-]+)\}").unwrap())
}

fn own_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{PORT\}|\$PORT\b").unwrap())
}

/// Two passes: named tokens first (left untouched when the referenced
/// service has no entry in `named_ports`), then the service's own port.
pub fn apply_port_template(
    value: &str,
    own_port: Option<u16>,
    named_ports: &HashMap<String, u16>,
) -> String {
    let pass1 = named_token().replace_all(value, |caps: &regex::Captures| {
        named_ports
            .get(&caps[1])
            .map(u16::to_string)
            .unwrap_or_else(|| caps[0].to_string())
    });

    match own_port {
        Some(port) => own_token().replace_all(&pass1, port.to_string()).into_owned(),
        None => pass1.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_own_port_tokens() {
        assert_eq!(
            apply_port_template("http://localhost:$PORT", Some(3001), &HashMap::new()),
            "http://localhost:3001"
        );
        assert_eq!(
            apply_port_template("http://localhost:${PORT}", Some(3001), &HashMap::new()),
            "http://localhost:3001"
        );
    }

    #[test]
    fn leaves_own_port_token_when_missing() {
        assert_eq!(
            apply_port_template("http://localhost:$PORT", None, &HashMap::new()),
            "http://localhost:$PORT"
        );
    }

    #[test]
    fn expands_named_tokens_from_map() {
        let mut named = HashMap::new();
        named.insert("api".to_string(), 4100u16);
        assert_eq!(
            apply_port_template("${PORT:api}", None, &named),
            "4100"
        );
    }

    #[test]
    fn preserves_named_token_with_no_matching_entry() {
        assert_eq!(
            apply_port_template("${PORT:ghost}", None, &HashMap::new()),
            "${PORT:ghost}"
        );
    }

    #[test]
    fn does_not_match_similarly_prefixed_identifiers() {
        assert_eq!(
            apply_port_template("$PORTAL", Some(3000), &HashMap::new()),
            "$PORTAL"
        );
    }
}
