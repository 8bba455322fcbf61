//! Per-provider matchers
//!
//! Each catalog entry compiles into a `ProviderMatcher`: a list of literal
//! tokens (hostnames first, then match strings) and an optional compiled
//! pattern. Token tests are cheap substring scans; the pattern is only
//! consulted when a provider declares no tokens at all.

use regex::Regex;

use crate::types::MatchMethod;

/// A successful provider test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMatch {
    pub method: MatchMethod,
    /// The token or the matched pattern text
    pub value: String,
}

/// Compiled matching data for one provider.
#[derive(Debug, Clone)]
pub struct ProviderMatcher {
    /// Tokens as declared, in declaration order
    tokens: Vec<String>,
    /// Lowercased tokens, same order as `tokens`
    tokens_lower: Vec<String>,
    pattern: Option<Regex>,
    pattern_error: Option<String>,
}

impl ProviderMatcher {
    /// Compile tokens and pattern. A pattern that fails to compile leaves the
    /// matcher without one; the error is kept for diagnostics.
    pub fn compile(name: &str, hostnames: &[String], match_strings: &[String], pattern: Option<&str>) -> Self {
        let tokens: Vec<String> = hostnames
            .iter()
            .chain(match_strings.iter())
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let tokens_lower = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();

        let (pattern, pattern_error) = match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(source) => match Regex::new(source) {
                Ok(re) => (Some(re), None),
                Err(e) => {
                    log::warn!("provider '{}': pattern failed to compile, skipping pattern matching: {}", name, e);
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };

        Self {
            tokens,
            tokens_lower,
            pattern,
            pattern_error,
        }
    }

    pub fn has_tokens(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn has_pattern(&self) -> bool {
        self.pattern.is_some()
    }

    /// Compile error message when a declared pattern was rejected.
    pub fn pattern_error(&self) -> Option<&str> {
        self.pattern_error.as_deref()
    }

    /// Test the corpus. `corpus_lower` must be `corpus` lowercased (ASCII);
    /// callers compute it once per pass.
    pub fn test(&self, corpus: &str, corpus_lower: &str) -> Option<ProviderMatch> {
        if self.has_tokens() {
            return self
                .tokens_lower
                .iter()
                .position(|token| corpus_lower.contains(token.as_str()))
                .map(|idx| ProviderMatch {
                    method: MatchMethod::HostnameToken,
                    value: self.tokens[idx].clone(),
                });
        }

        let pattern = self.pattern.as_ref()?;
        pattern.find(corpus).map(|m| ProviderMatch {
            method: MatchMethod::Pattern,
            value: m.as_str().to_string(),
        })
    }
}
