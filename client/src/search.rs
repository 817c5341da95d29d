//! Address bar input → destination URL.

use indexmap::IndexMap;

/// Turns address-bar input into a URL, using `template` for searches.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, input: &str, template: &str) -> String;
}

/// Input that already is a URL with a host or a hierarchical path is used
/// as-is; a bare host such as `example.com/path` gets `http://`; anything
/// else, opaque schemes like `mailto:` included, becomes a search.
pub struct SearchResolver;

impl AddressResolver for SearchResolver {
    fn resolve(&self, input: &str, template: &str) -> String {
        let input = input.trim();

        if let Ok(url) = url::Url::parse(input) {
            if url.has_host() || !url.cannot_be_a_base() {
                return url.to_string();
            }
        }

        if !input.contains(char::is_whitespace) {
            if let Ok(url) = url::Url::parse(&format!("http://{input}")) {
                if url.host_str().is_some_and(|h| h.contains('.')) {
                    return url.to_string();
                }
            }
        }

        template.replace("%s", &urlencoding::encode(input))
    }
}

/// Named search templates with a default.
#[derive(Debug, Clone)]
pub struct SearchEngines {
    templates: IndexMap<String, String>,
    default: String,
}

impl SearchEngines {
    /// `default` must name one of `templates`.
    pub fn new(templates: IndexMap<String, String>, default: String) -> Self {
        Self { templates, default }
    }

    /// Template for `engine`, falling back to the default engine.
    pub fn template(&self, engine: Option<&str>) -> &str {
        engine
            .and_then(|name| self.templates.get(name))
            .or_else(|| self.templates.get(&self.default))
            .map_or("%s", String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DDG: &str = "https://duckduckgo.com/?q=%s";

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            SearchResolver.resolve("https://example.com/a?b=c", DDG),
            "https://example.com/a?b=c"
        );
        assert_eq!(
            SearchResolver.resolve("  HTTPS://Example.COM  ", DDG),
            "https://example.com/"
        );
    }

    #[test]
    fn bare_hosts_get_http() {
        assert_eq!(
            SearchResolver.resolve("example.com/docs", DDG),
            "http://example.com/docs"
        );
        assert_eq!(
            SearchResolver.resolve("localhost:8080", DDG),
            "https://duckduckgo.com/?q=localhost%3A8080"
        );
    }

    #[test]
    fn everything_else_is_a_search() {
        assert_eq!(
            SearchResolver.resolve("rust async traits", DDG),
            "https://duckduckgo.com/?q=rust%20async%20traits"
        );
    }

    #[test]
    fn opaque_scheme_inputs_are_searches() {
        assert_eq!(
            SearchResolver.resolve("mailto:someone", DDG),
            "https://duckduckgo.com/?q=mailto%3Asomeone"
        );
        assert_eq!(
            SearchResolver.resolve("file:///tmp/x", DDG),
            "file:///tmp/x"
        );
    }

    #[test]
    fn unknown_engine_falls_back_to_default() {
        let mut templates = IndexMap::new();
        templates.insert("ddg".to_string(), DDG.to_string());
        templates.insert("bing".to_string(), "https://www.bing.com/search?q=%s".to_string());
        let engines = SearchEngines::new(templates, "ddg".to_string());

        assert_eq!(engines.template(Some("bing")), "https://www.bing.com/search?q=%s");
        assert_eq!(engines.template(Some("altavista")), DDG);
        assert_eq!(engines.template(None), DDG);
    }
}
