use std::collections::HashSet;

use fancy_regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// URL matcher for intercept rules: an exact URL, or a glob where `*`
/// matches within one path segment and `**` matches across segments.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    raw: String,
    regex: Option<Regex>,
}

impl UrlPattern {
    pub fn exact(url: impl Into<String>) -> Self {
        Self {
            raw: url.into(),
            regex: None,
        }
    }

    pub fn glob(pattern: impl Into<String>) -> Result<Self> {
        let raw = pattern.into();
        let regex = Regex::new(&glob_to_regex(&raw))
            .map_err(|err| Error::InvalidUrlPattern(format!("{raw}: {err}")))?;
        Ok(Self {
            raw,
            regex: Some(regex),
        })
    }

    /// Exact unless the pattern contains a `*`.
    pub fn from_spec(spec: &str) -> Result<Self> {
        if spec.contains('*') {
            Self::glob(spec)
        } else {
            Ok(Self::exact(spec))
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(url).unwrap_or(false),
            None => self.raw == url,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '?' | '|' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    out
}

/// What a matched rule does to the triggering request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSpec {
    /// Deterministic stubbed HTTP response.
    Stub { status: u16, body: Value },
    /// Stubbed 200 response whose body is a named fixture.
    Fixture(String),
    /// Connection-level failure, distinct from any HTTP status.
    ForceNetworkError,
    /// Record the request under its alias, then hand it to the transport.
    Passthrough,
}

#[derive(Debug)]
pub(crate) struct InterceptRule {
    pub(crate) method: String,
    pub(crate) pattern: UrlPattern,
    pub(crate) response: ResponseSpec,
    pub(crate) alias: Option<String>,
    pub(crate) once: bool,
    pub(crate) consumed: bool,
    pub(crate) seq: u64,
}

/// Resolution of a dispatched request as observed by `wait_for_alias`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Pending,
    Status(u16),
    NetworkError,
}

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub alias: Option<String>,
    pub outcome: RequestOutcome,
}

/// Result of waiting on an alias: either a resolved status code or the
/// forced-network-error marker, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitedResponse {
    pub status: Option<u16>,
    pub network_error: bool,
}

/// Reply from the pass-through transport standing in for the real network.
#[derive(Debug, Clone)]
pub enum TransportReply {
    Response { status: u16, body: Value },
    Unreachable,
}

/// Ordered intercept rule chain with an implicit pass-through terminal
/// rule, plus the request log that alias waits observe.
pub struct Interceptor {
    rules: Vec<InterceptRule>,
    aliases: HashSet<String>,
    log: Vec<RequestRecord>,
    next_seq: u64,
}

impl Interceptor {
    pub(crate) fn new() -> Self {
        Self {
            rules: Vec::new(),
            aliases: HashSet::new(),
            log: Vec::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn register(
        &mut self,
        method: &str,
        pattern: UrlPattern,
        response: ResponseSpec,
        alias: Option<&str>,
        once: bool,
    ) -> Result<()> {
        if let Some(alias) = alias {
            if !self.aliases.insert(alias.to_string()) {
                return Err(Error::DuplicateAlias(alias.to_string()));
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(method, pattern = pattern.raw(), alias, "intercept rule registered");
        self.rules.push(InterceptRule {
            method: method.to_ascii_uppercase(),
            pattern,
            response,
            alias: alias.map(str::to_string),
            once,
            consumed: false,
            seq,
        });
        Ok(())
    }

    /// Most recently registered live rule wins; `once` rules are consumed
    /// by the match. Returns the matched rule's response and alias.
    pub(crate) fn match_request(
        &mut self,
        method: &str,
        url: &str,
    ) -> Option<(ResponseSpec, Option<String>)> {
        let upper = method.to_ascii_uppercase();
        let idx = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| {
                !rule.consumed && rule.method == upper && rule.pattern.matches(url)
            })
            .max_by_key(|(_, rule)| rule.seq)
            .map(|(idx, _)| idx)?;
        let rule = &mut self.rules[idx];
        if rule.once {
            rule.consumed = true;
        }
        Some((rule.response.clone(), rule.alias.clone()))
    }

    pub(crate) fn log_request(
        &mut self,
        method: &str,
        url: &str,
        alias: Option<String>,
    ) -> usize {
        debug!(method, url, ?alias, "request dispatched");
        self.log.push(RequestRecord {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            alias,
            outcome: RequestOutcome::Pending,
        });
        self.log.len() - 1
    }

    pub(crate) fn resolve(&mut self, record: usize, outcome: RequestOutcome) {
        if let Some(entry) = self.log.get_mut(record) {
            debug!(url = %entry.url, ?outcome, "request resolved");
            entry.outcome = outcome;
        }
    }

    pub fn requests(&self) -> &[RequestRecord] {
        &self.log
    }

    /// First resolved request carrying `alias`, if any.
    pub(crate) fn resolved_for_alias(&self, alias: &str) -> Option<WaitedResponse> {
        self.log
            .iter()
            .filter(|record| record.alias.as_deref() == Some(alias))
            .find_map(|record| match record.outcome {
                RequestOutcome::Pending => None,
                RequestOutcome::Status(status) => Some(WaitedResponse {
                    status: Some(status),
                    network_error: false,
                }),
                RequestOutcome::NetworkError => Some(WaitedResponse {
                    status: None,
                    network_error: true,
                }),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_matches_segments() -> Result<()> {
        let single = UrlPattern::glob("https://api.test/todos/*")?;
        assert!(single.matches("https://api.test/todos/1"));
        assert!(!single.matches("https://api.test/todos/1/comments"));

        let deep = UrlPattern::glob("https://api.test/**")?;
        assert!(deep.matches("https://api.test/todos/1/comments"));
        Ok(())
    }

    #[test]
    fn last_registered_rule_wins() -> Result<()> {
        let mut interceptor = Interceptor::new();
        let url = "https://api.test/todos/1";
        interceptor.register(
            "GET",
            UrlPattern::exact(url),
            ResponseSpec::Stub { status: 500, body: Value::Null },
            Some("first"),
            true,
        )?;
        interceptor.register(
            "GET",
            UrlPattern::exact(url),
            ResponseSpec::Stub { status: 200, body: json!({"ok": true}) },
            Some("second"),
            true,
        )?;

        let (response, alias) = interceptor.match_request("get", url).expect("match");
        assert_eq!(alias.as_deref(), Some("second"));
        assert!(matches!(response, ResponseSpec::Stub { status: 200, .. }));

        // Consumed second rule leaves the first as the winner.
        let (_, alias) = interceptor.match_request("GET", url).expect("match");
        assert_eq!(alias.as_deref(), Some("first"));
        assert!(interceptor.match_request("GET", url).is_none());
        Ok(())
    }

    #[test]
    fn duplicate_alias_is_rejected() -> Result<()> {
        let mut interceptor = Interceptor::new();
        interceptor.register(
            "GET",
            UrlPattern::exact("https://a.test/x"),
            ResponseSpec::ForceNetworkError,
            Some("dup"),
            true,
        )?;
        let err = interceptor
            .register(
                "GET",
                UrlPattern::exact("https://a.test/y"),
                ResponseSpec::ForceNetworkError,
                Some("dup"),
                true,
            )
            .expect_err("duplicate alias must be rejected");
        assert_eq!(err, Error::DuplicateAlias("dup".into()));
        Ok(())
    }

    #[test]
    fn unmatched_method_passes_through() -> Result<()> {
        let mut interceptor = Interceptor::new();
        interceptor.register(
            "POST",
            UrlPattern::exact("https://a.test/x"),
            ResponseSpec::ForceNetworkError,
            None,
            true,
        )?;
        assert!(interceptor.match_request("GET", "https://a.test/x").is_none());
        Ok(())
    }
}
