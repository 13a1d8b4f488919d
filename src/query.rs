use unicode_normalization::UnicodeNormalization;

use crate::dom::NodeId;
use crate::poll::{Poll, PollOptions, poll_until};
use crate::session::Session;
use crate::{Error, Result};

/// Case-preserving text filter applied to an element's rendered text,
/// NFC-normalized on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    Substring(String),
    Exact(String),
}

impl TextMatch {
    pub(crate) fn matches(&self, text: &str) -> bool {
        let text = normalize(text);
        match self {
            Self::Substring(needle) => text.contains(&normalize(needle)),
            Self::Exact(expected) => text.trim() == normalize(expected).trim(),
        }
    }

    pub(crate) fn describe(&self) -> &str {
        match self {
            Self::Substring(needle) => needle,
            Self::Exact(expected) => expected,
        }
    }
}

fn normalize(text: &str) -> String {
    text.nfc().collect()
}

/// What a step acts on: a selector, optionally narrowed by text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub selector: String,
    pub text: Option<TextMatch>,
}

impl Target {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: None,
        }
    }

    /// Selector plus substring text filter, like `cy.contains(sel, text)`.
    pub fn containing(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: Some(TextMatch::Substring(text.into())),
        }
    }

    pub fn with_exact_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: Some(TextMatch::Exact(text.into())),
        }
    }

    pub fn describe(&self) -> String {
        match &self.text {
            Some(text) => format!("{} (text: {:?})", self.selector, text.describe()),
            None => self.selector.clone(),
        }
    }

    pub(crate) fn not_found(&self) -> Error {
        Error::ElementNotFound {
            selector: self.selector.clone(),
            text: self.text.as_ref().map(|t| t.describe().to_string()),
        }
    }
}

/// Ephemeral reference to a matched element. The underlying DOM may mutate
/// between steps, so every access revalidates against the live document
/// instead of trusting the cached node id.
#[derive(Debug, Clone)]
pub struct ElementHandle {
    target: Target,
    node: NodeId,
}

impl ElementHandle {
    pub(crate) fn new(target: Target, node: NodeId) -> Self {
        Self { target, node }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The node this handle resolved to at query time. Prefer `resolve`.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Revalidates: the remembered node must still be connected and still
    /// match; otherwise the live document is re-queried for a fresh match.
    pub fn resolve(&self, session: &Session) -> Result<NodeId> {
        let live = find_all_now(session, &self.target)?;
        if live.contains(&self.node) {
            return Ok(self.node);
        }
        live.first().copied().ok_or_else(|| self.target.not_found())
    }
}

/// All current matches, re-queried from the live document root.
pub(crate) fn find_all_now(session: &Session, target: &Target) -> Result<Vec<NodeId>> {
    let mut nodes = session.dom().query_selector_all(&target.selector)?;
    if let Some(text) = &target.text {
        nodes.retain(|node| text.matches(&session.dom().text_content(*node)));
    }
    Ok(nodes)
}

/// Retries until the target exists, failing with `ElementNotFound` after
/// the poll window. Each attempt re-queries from the document root; no
/// handle is cached across retries.
pub fn find(session: &mut Session, target: &Target, opts: PollOptions) -> Result<ElementHandle> {
    let outcome = poll_until(session, opts, |session| {
        let nodes = find_all_now(session, target)?;
        Ok(match nodes.first() {
            Some(node) => Poll::Ready(*node),
            None => Poll::Pending(format!("no element matching {}", target.describe())),
        })
    })?;
    match outcome {
        Ok(node) => Ok(ElementHandle::new(target.clone(), node)),
        Err(_) => Err(target.not_found()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_match_is_case_preserving() {
        let matcher = TextMatch::Substring("Felipe".into());
        assert!(matcher.matches("signed: Felipe Barra"));
        assert!(!matcher.matches("signed: felipe barra"));
    }

    #[test]
    fn exact_match_trims_whitespace() {
        let matcher = TextMatch::Exact("VIP".into());
        assert!(matcher.matches("  VIP\n"));
        assert!(!matcher.matches("VIP guest"));
    }
}
