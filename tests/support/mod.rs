//! Shared scenario fixture: a small interaction playground page, the Rust
//! wiring that gives it behavior, and a canned transport for its API.
#![allow(dead_code)]

use std::sync::Once;

use serde_json::json;

use browser_harness::{Result, Session, TransportReply, utc_midnight_ms};

pub const PAGE_URL: &str = "https://playground.test/index.html";
pub const TODO_URL: &str = "https://api.test/todos/1";

/// Pinned page date: 2019-11-09 UTC.
pub const FROZEN_EPOCH_MS: i64 = 1_573_257_600_000;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn page_html() -> &'static str {
    r#"<html>
<body>
  <h1>Interaction Playground</h1>

  <section id="subscription">
    <button id="subscribe-button" type="button">Subscribe</button>
    <p id="subscribe-message" hidden></p>
  </section>

  <section id="signature">
    <textarea id="signature-input"></textarea>
    <p id="signature-preview"></p>
    <input id="signature-check" type="checkbox">
  </section>

  <section id="choices">
    <input type="radio" name="answer" id="answer-yes" value="yes">
    <input type="radio" name="answer" id="answer-no" value="no">
    <p id="answer-display"></p>
  </section>

  <section id="picker">
    <select id="tier-select">
      <option value="" disabled selected>Select a tier</option>
      <option value="basic">Basic</option>
      <option value="standard">Standard</option>
      <option value="vip">VIP</option>
    </select>
    <p id="tier-display"></p>
    <select id="fruit-select" multiple>
      <option value="apple">Apple</option>
      <option value="banana">Banana</option>
      <option value="cherry">Cherry</option>
    </select>
    <p id="fruit-display"></p>
  </section>

  <section id="upload">
    <input id="file-input" type="file">
    <p id="file-display"></p>
  </section>

  <section id="todo">
    <button id="todo-button" type="button">Get TODO</button>
    <p id="todo-display"></p>
    <p id="todo-error" hidden></p>
  </section>

  <section id="clock">
    <p id="date-display"></p>
    <button id="timer-button" type="button">Start</button>
    <p id="timer-status" hidden></p>
  </section>

  <section id="level">
    <input id="level-range" type="range" value="0">
    <p id="level-display">Level: 0</p>
  </section>

  <section id="dates">
    <input id="date-input" type="date">
    <p id="date-echo"></p>
  </section>

  <section id="code">
    <button id="code-button" type="button">Get code</button>
    <span id="code-display"></span>
    <input id="code-input" type="text">
    <button id="code-submit" type="button">Submit code</button>
    <p id="code-feedback"></p>
  </section>

  <section id="downloads">
    <a id="download-link" href="example.txt">Download a text file</a>
  </section>

  <ul id="animals">
    <li>cat</li>
    <li>dog</li>
    <li>bird</li>
    <li>fish</li>
    <li>frog</li>
  </ul>

  <form id="signup-form">
    <input id="email-input" type="text">
    <input id="password-input" type="password">
    <button id="toggle-password" type="button">Show password</button>
    <button type="submit">Sign up</button>
  </form>
  <p id="form-message" hidden></p>
</body>
</html>"#
}

/// Installs the page's behavior on a freshly parsed document. Runs again
/// on every reload, so nothing here may leak state across navigations.
pub fn wire_playground(session: &mut Session) -> Result<()> {
    let today = session.today_utc();
    session.set_text("#date-display", &format!("Current date: {today}"))?;

    session.on("#subscribe-button", "click", |session, _event| {
        session.set_text("#subscribe-message", "You have been successfully subscribed!")?;
        session.show("#subscribe-message")
    })?;

    session.on("#signature-input", "input", |session, event| {
        let text = session.node_value(event.target)?;
        session.set_text("#signature-preview", &text)
    })?;
    session.on("#signature-check", "change", |session, event| {
        if session.node_checked(event.target)? {
            session.show("#signature-preview")
        } else {
            session.hide("#signature-preview")
        }
    })?;

    // Radio changes bubble up to the section.
    session.on("#choices", "change", |session, event| {
        let value = session.node_value(event.target)?;
        session.set_text("#answer-display", &format!("You picked: {value}"))
    })?;

    // The page shouts the picked tier back, like a confirmation banner.
    session.on("#tier-select", "change", |session, _event| {
        let texts = session.selected_texts_of("#tier-select")?;
        let picked = texts.first().cloned().unwrap_or_default();
        session.set_text(
            "#tier-display",
            &format!("You've selected: {}", picked.to_uppercase()),
        )
    })?;
    session.on("#fruit-select", "change", |session, _event| {
        let values = session.selected_values_of("#fruit-select")?;
        session.set_text("#fruit-display", &format!("Fruits: {}", values.join(", ")))
    })?;

    session.on("#file-input", "change", |session, event| {
        let files = session.node_selected_files(event.target);
        let name = files.first().cloned().unwrap_or_default();
        session.set_text(
            "#file-display",
            &format!("The following file has been selected for upload: {name}"),
        )
    })?;

    session.on("#todo-button", "click", |session, _event| {
        session.hide("#todo-error")?;
        session.fetch("GET", TODO_URL, |session, outcome| {
            if outcome.network_error {
                session.set_text("#todo-error", "Network error! Please try again later.")?;
                return session.show("#todo-error");
            }
            match outcome.status {
                Some(200) => {
                    let title = outcome
                        .body
                        .as_ref()
                        .and_then(|body| body["title"].as_str())
                        .unwrap_or("<missing title>")
                        .to_string();
                    session.set_text("#todo-display", &format!("TODO: {title}"))
                }
                Some(status) => {
                    session.set_text(
                        "#todo-error",
                        &format!("The server returned a {status} error."),
                    )?;
                    session.show("#todo-error")
                }
                None => Ok(()),
            }
        })
    })?;

    session.on("#timer-button", "click", |session, _event| {
        session.set_text("#timer-status", "Loading...")?;
        session.show("#timer-status")?;
        session.set_timeout(2_000, |session| {
            session.set_text("#timer-status", "Done!")
        });
        Ok(())
    })?;

    session.on("#level-range", "change", |session, event| {
        let value = session.node_value(event.target)?;
        session.set_text("#level-display", &format!("Level: {value}"))
    })?;

    session.on("#date-input", "input", |session, event| {
        let value = session.node_value(event.target)?;
        session.set_text("#date-echo", &format!("You selected: {value}"))
    })?;

    session.on("#code-button", "click", |session, _event| {
        let code = session.now_ms().to_string();
        session.set_text("#code-display", &code)
    })?;
    session.on("#code-submit", "click", |session, _event| {
        let expected = session.text_of("#code-display")?;
        let typed = session.value_of("#code-input")?;
        if !expected.is_empty() && typed == expected {
            session.set_text("#code-feedback", "Congrats! The code is correct.")
        } else {
            session.set_text("#code-feedback", "Wrong code. Try again.")
        }
    })?;

    session.on("#download-link", "click", |session, event| {
        event.prevent_default();
        session.save_download("example.txt", "Hello, World!")?;
        Ok(())
    })?;

    session.on("#toggle-password", "click", |session, _event| {
        let current = session
            .attr_of("#password-input", "type")?
            .unwrap_or_default();
        if current == "password" {
            session.set_attr("#password-input", "type", "text")
        } else {
            session.set_attr("#password-input", "type", "password")
        }
    })?;

    session.on("#signup-form", "submit", |session, event| {
        event.prevent_default();
        session.set_text("#form-message", "Thanks for signing up!")?;
        session.show("#form-message")
    })?;

    Ok(())
}

/// Account secret injected via the environment, with a fixed fallback so
/// the suite also runs unconfigured. The value must never appear in step
/// descriptions or traces.
pub fn account_password() -> String {
    std::env::var("PLAYGROUND_PASSWORD")
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "s3cret-value".into())
}

/// Stands in for the real API: only the canonical TODO endpoint answers.
pub fn todo_transport(method: &str, url: &str) -> TransportReply {
    if method.eq_ignore_ascii_case("GET") && url == TODO_URL {
        TransportReply::Response {
            status: 200,
            body: json!({
                "id": 1,
                "title": "delectus aut autem",
                "completed": false,
                "userId": 1,
            }),
        }
    } else {
        TransportReply::Unreachable
    }
}

/// Fresh session on the playground page with a frozen clock and the
/// canned transport installed.
pub fn session_with_page() -> Result<Session> {
    init_tracing();
    let mut session = Session::new();
    session.set_transport(todo_transport);
    session.freeze_clock(utc_midnight_ms(2019, 11, 9));
    session.register_page(PAGE_URL, page_html(), wire_playground);
    session.navigate(PAGE_URL)?;
    Ok(session)
}
