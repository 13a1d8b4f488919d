//! Deterministic browser-interaction test harness.
//!
//! The crate embeds a small live DOM (arena nodes, an HTML parser, a CSS
//! selector engine) so browser-style end-to-end scenarios run fully
//! in-process and reproducibly. A [`Session`] owns one scenario's world:
//! the document, its event listeners, a network interceptor, a virtual
//! clock, and fixtures. Commands drive the DOM through a strictly ordered
//! [`CommandQueue`], retrying predicates handle "eventually" semantics, and
//! a [`Suite`] runs isolated scenarios and reports pass/fail.
//!
//! Page behavior is supplied by the test as Rust closures wired to the
//! parsed document; markup and literal strings are external fixtures.

use thiserror::Error as ThisError;

mod assert;
mod clock;
mod dom;
mod fixture;
mod html;
mod net;
mod poll;
mod query;
mod queue;
mod scenario;
mod selector;
mod session;

pub use assert::{Predicate, expect, expect_with};
pub use clock::{PendingTimer, VirtualClock, utc_midnight_ms};
pub use dom::NodeId;
pub use fixture::FixtureStore;
pub use net::{
    Interceptor, RequestOutcome, RequestRecord, ResponseSpec, TransportReply, UrlPattern,
    WaitedResponse,
};
pub use poll::PollOptions;
pub use query::{ElementHandle, Target, TextMatch, find};
pub use queue::{Command, CommandQueue, SelectChoice, UploadMode};
pub use scenario::{RunReport, ScenarioResult, Status, Suite};
pub use session::{EventState, FetchOutcome, Session};

pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by the harness. Every step failure is fatal to
/// its scenario; the orchestrator records the message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("html parse error: {0}")]
    HtmlParse(String),
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("invalid url pattern: {0}")]
    InvalidUrlPattern(String),
    #[error("element not found: {selector}{}", text_suffix(.text))]
    ElementNotFound {
        selector: String,
        text: Option<String>,
    },
    #[error(
        "assertion timed out for {target}: expected {predicate}, last observed {last_observed}"
    )]
    AssertionTimeout {
        target: String,
        predicate: String,
        last_observed: String,
    },
    #[error("no request matched alias within timeout: {0}")]
    NetworkInterceptFailure(String),
    #[error("forced network error for {0}")]
    ForcedNetworkError(String),
    #[error("navigation failure: {0}")]
    NavigationFailure(String),
    #[error("duplicate intercept alias: {0}")]
    DuplicateAlias(String),
    #[error("fixture {name}: {reason}")]
    Fixture { name: String, reason: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

fn text_suffix(text: &Option<String>) -> String {
    match text {
        Some(text) => format!(" (text: {text:?})"),
        None => String::new(),
    }
}

pub(crate) fn truncate_chars(input: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for (count, ch) in input.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        out.push(ch);
    }
    out
}
