use tracing::debug;

use crate::dom::NodeId;
use crate::poll::{Poll, PollOptions, poll_until};
use crate::query::{Target, find_all_now};
use crate::session::Session;
use crate::{Error, Result, truncate_chars};

/// What an assertion checks about its target. Negative predicates
/// (`NotExist`, `NotVisible`, and friends) succeed as soon as they hold,
/// even when the target matches nothing at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Visible,
    NotVisible,
    Exist,
    NotExist,
    Checked,
    NotChecked,
    ValueEquals(String),
    AttrEquals(String, String),
    NotAttrEquals(String, String),
    CountEquals(usize),
    TextContains(String),
    TextEquals(String),
}

impl Predicate {
    pub fn describe(&self) -> String {
        match self {
            Self::Visible => "be visible".into(),
            Self::NotVisible => "not be visible".into(),
            Self::Exist => "exist".into(),
            Self::NotExist => "not exist".into(),
            Self::Checked => "be checked".into(),
            Self::NotChecked => "not be checked".into(),
            Self::ValueEquals(value) => format!("have value {value:?}"),
            Self::AttrEquals(name, value) => format!("have attribute {name}={value:?}"),
            Self::NotAttrEquals(name, value) => {
                format!("not have attribute {name}={value:?}")
            }
            Self::CountEquals(count) => format!("match {count} element(s)"),
            Self::TextContains(text) => format!("contain text {text:?}"),
            Self::TextEquals(text) => format!("have text {text:?}"),
        }
    }

    /// Whether a match is required before the predicate can be evaluated.
    fn needs_match(&self) -> bool {
        !matches!(self, Self::NotExist | Self::NotVisible | Self::CountEquals(_))
    }

    /// Evaluates against the current matches. Returns `Ok` when satisfied,
    /// `Err(observed)` with a rendering of the current state otherwise.
    fn check(
        &self,
        session: &Session,
        matches: &[NodeId],
    ) -> Result<std::result::Result<(), String>> {
        if let Self::CountEquals(expected) = self {
            return Ok(if matches.len() == *expected {
                Ok(())
            } else {
                Err(format!("{} element(s)", matches.len()))
            });
        }

        let Some(&node) = matches.first() else {
            return Ok(match self {
                Self::NotExist | Self::NotVisible => Ok(()),
                _ => Err("no matching element".into()),
            });
        };

        Ok(match self {
            Self::Exist => Ok(()),
            Self::NotExist => Err(format!("still present: {}", session.node_snippet(node))),
            Self::Visible => {
                if session.node_visible(node) {
                    Ok(())
                } else {
                    Err(format!("hidden: {}", session.node_snippet(node)))
                }
            }
            Self::NotVisible => {
                if session.node_visible(node) {
                    Err("element visible".into())
                } else {
                    Ok(())
                }
            }
            Self::Checked => {
                if session.node_checked(node)? {
                    Ok(())
                } else {
                    Err("unchecked".into())
                }
            }
            Self::NotChecked => {
                if session.node_checked(node)? {
                    Err("checked".into())
                } else {
                    Ok(())
                }
            }
            Self::ValueEquals(expected) => {
                let actual = session.node_value(node)?;
                if actual == *expected {
                    Ok(())
                } else {
                    Err(format!("value {actual:?}"))
                }
            }
            Self::AttrEquals(name, expected) => match session.node_attr(node, name) {
                Some(actual) if actual == *expected => Ok(()),
                Some(actual) => Err(format!("{name}={actual:?}")),
                None => Err(format!("{name} absent")),
            },
            Self::NotAttrEquals(name, unexpected) => match session.node_attr(node, name) {
                Some(actual) if actual == *unexpected => Err(format!("{name}={actual:?}")),
                _ => Ok(()),
            },
            Self::TextContains(expected) => {
                let actual = session.node_text(node);
                if actual.contains(expected.as_str()) {
                    Ok(())
                } else {
                    Err(format!("text {:?}", truncate_chars(&actual, 120)))
                }
            }
            Self::TextEquals(expected) => {
                let actual = session.node_text(node);
                if actual.trim() == expected.trim() {
                    Ok(())
                } else {
                    Err(format!("text {:?}", truncate_chars(&actual, 120)))
                }
            }
            Self::CountEquals(_) => unreachable!("handled above"),
        })
    }
}

/// Retrying assertion with the session's default poll window.
pub fn expect(session: &mut Session, target: &Target, predicate: &Predicate) -> Result<()> {
    let opts = session.poll_options();
    expect_with(session, target, predicate, opts)
}

/// Retrying assertion: re-queries the target and re-evaluates the
/// predicate each attempt, ticking the session in between. Fails with the
/// last observed state once the window is exhausted.
pub fn expect_with(
    session: &mut Session,
    target: &Target,
    predicate: &Predicate,
    opts: PollOptions,
) -> Result<()> {
    debug!(target = %target.describe(), predicate = %predicate.describe(), "expect");
    let outcome = poll_until(session, opts, |session| {
        let matches = find_all_now(session, target)?;
        if matches.is_empty() && predicate.needs_match() {
            return Ok(Poll::Pending(format!(
                "no element matching {}",
                target.describe()
            )));
        }
        Ok(match predicate.check(session, &matches)? {
            Ok(()) => Poll::Ready(()),
            Err(observed) => Poll::Pending(observed),
        })
    })?;
    outcome.map_err(|last_observed| Error::AssertionTimeout {
        target: target.describe(),
        predicate: predicate.describe(),
        last_observed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_predicates_pass_without_matches() -> Result<()> {
        let mut session = Session::new();
        session.register_static_page("https://app.test/", "<html><body></body></html>");
        session.navigate("https://app.test/")?;
        let opts = PollOptions::new(100, 50);
        expect_with(&mut session, &Target::new("#gone"), &Predicate::NotExist, opts)?;
        expect_with(&mut session, &Target::new("#gone"), &Predicate::NotVisible, opts)?;
        Ok(())
    }

    #[test]
    fn timeout_reports_last_observed_state() -> Result<()> {
        let mut session = Session::new();
        session.register_static_page(
            "https://app.test/",
            "<html><body><p id=\"note\">draft</p></body></html>",
        );
        session.navigate("https://app.test/")?;
        let err = expect_with(
            &mut session,
            &Target::new("#note"),
            &Predicate::TextEquals("final".into()),
            PollOptions::new(100, 50),
        )
        .expect_err("must time out");
        match err {
            Error::AssertionTimeout { last_observed, .. } => {
                assert!(last_observed.contains("draft"), "{last_observed}");
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }
}
