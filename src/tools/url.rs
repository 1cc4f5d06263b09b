use std::sync::OnceLock;

use regex::Regex;

use crate::tools::types::ToolError;

pub const DEFAULT_SEARCH_TEMPLATE: &str = "https://www.google.com/search?q={query}";

fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://").expect("static regex"))
}

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9\-]+\.)+[A-Za-z]{2,}(:\d{1,5})?([/?#].*)?$").expect("static regex")
    })
}

fn local_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(localhost|127\.0\.0\.1|\d{1,3}(\.\d{1,3}){3})(:\d{1,5})?([/?#].*)?$")
            .expect("static regex")
    })
}

/// Turns user input into a navigable URL.
///
/// Inputs with a scheme pass through. Loopback and bare IPv4 hosts get
/// `http://`, domain-like inputs get `https://`, anything else becomes a
/// search using `search_template` (`{query}` is replaced).
pub fn normalize_url(input: &str, search_template: &str) -> Result<String, ToolError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ToolError::invalid_params("navigate_to_url: url is empty"));
    }

    if scheme_re().is_match(trimmed) || ["about:", "data:", "javascript:"].iter().any(|p| trimmed.starts_with(p)) {
        return Ok(trimmed.to_string());
    }

    if !trimmed.contains(char::is_whitespace) {
        if local_re().is_match(trimmed) {
            return Ok(format!("http://{trimmed}"));
        }
        if domain_re().is_match(trimmed) {
            return Ok(format!("https://{trimmed}"));
        }
    }

    let template = if search_template.contains("{query}") {
        search_template
    } else {
        DEFAULT_SEARCH_TEMPLATE
    };
    Ok(template.replace("{query}", &urlencoding::encode(trimmed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        normalize_url(s, DEFAULT_SEARCH_TEMPLATE).unwrap()
    }

    #[test]
    fn bare_domain_gets_https() {
        assert_eq!(norm("example.com"), "https://example.com");
        assert_eq!(norm("docs.rs/tokio?x=1"), "https://docs.rs/tokio?x=1");
    }

    #[test]
    fn free_text_becomes_search() {
        assert_eq!(
            norm("quarterly report"),
            "https://www.google.com/search?q=quarterly%20report"
        );
        assert!(norm("rust").starts_with("https://www.google.com/search?q=rust"));
    }

    #[test]
    fn schemes_and_local_hosts() {
        assert_eq!(norm("http://example.com/a"), "http://example.com/a");
        assert_eq!(norm("about:blank"), "about:blank");
        assert_eq!(norm("localhost:3000/app"), "http://localhost:3000/app");
        assert_eq!(norm("192.168.1.10"), "http://192.168.1.10");
    }

    #[test]
    fn custom_template_and_empty_input() {
        let url = normalize_url("a b", "https://duckduckgo.com/?q={query}").unwrap();
        assert_eq!(url, "https://duckduckgo.com/?q=a%20b");
        assert!(normalize_url("  ", DEFAULT_SEARCH_TEMPLATE).is_err());
    }
}
