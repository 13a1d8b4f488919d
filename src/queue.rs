use tracing::debug;

use crate::query::Target;
use crate::session::Session;
use crate::{Error, Result};

/// How an option of a `<select>` is picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectChoice {
    /// 1-based position among the selectable (non-disabled) options.
    Index(usize),
    /// The option's effective value (its `value` attribute, else its text).
    Value(String),
    /// The option's trimmed visible text.
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Select,
    DragDrop,
}

/// A single step of a scenario. Commands carry their target description so
/// a failure report can name the exact step that broke.
#[derive(Clone)]
pub enum Command {
    Navigate(String),
    Reload,
    Click(Target),
    TypeText {
        target: Target,
        text: String,
        /// Masked values never appear in step descriptions or logs.
        masked: bool,
    },
    Check(Target),
    Uncheck(Target),
    SelectOption {
        target: Target,
        choice: SelectChoice,
    },
    SelectMany {
        target: Target,
        values: Vec<String>,
    },
    Upload {
        target: Target,
        file_name: String,
        mode: UploadMode,
    },
    SetRange {
        target: Target,
        value: i64,
    },
    Focus(Target),
    Blur(Target),
    Submit(Target),
    WaitForAlias(String),
    AdvanceClock(i64),
}

impl Command {
    pub fn describe(&self) -> String {
        match self {
            Self::Navigate(url) => format!("navigate to {url}"),
            Self::Reload => "reload".into(),
            Self::Click(target) => format!("click {}", target.describe()),
            Self::TypeText { target, text, masked } => {
                if *masked {
                    format!("type <masked> into {}", target.describe())
                } else {
                    format!("type {text:?} into {}", target.describe())
                }
            }
            Self::Check(target) => format!("check {}", target.describe()),
            Self::Uncheck(target) => format!("uncheck {}", target.describe()),
            Self::SelectOption { target, choice } => {
                let choice = match choice {
                    SelectChoice::Index(idx) => format!("option #{idx}"),
                    SelectChoice::Value(value) => format!("value {value:?}"),
                    SelectChoice::Text(text) => format!("text {text:?}"),
                };
                format!("select {choice} in {}", target.describe())
            }
            Self::SelectMany { target, values } => {
                format!("select {values:?} in {}", target.describe())
            }
            Self::Upload { target, file_name, mode } => {
                let how = match mode {
                    UploadMode::Select => "select",
                    UploadMode::DragDrop => "drag-drop",
                };
                format!("upload {file_name:?} ({how}) to {}", target.describe())
            }
            Self::SetRange { target, value } => {
                format!("set range {} to {value}", target.describe())
            }
            Self::Focus(target) => format!("focus {}", target.describe()),
            Self::Blur(target) => format!("blur {}", target.describe()),
            Self::Submit(target) => format!("submit {}", target.describe()),
            Self::WaitForAlias(alias) => format!("wait for @{alias}"),
            Self::AdvanceClock(delta_ms) => format!("advance clock by {delta_ms}ms"),
        }
    }

    /// Resolves the target with retry, then applies the interaction.
    pub(crate) fn execute(&self, session: &mut Session) -> Result<()> {
        match self {
            Self::Navigate(url) => session.navigate(url),
            Self::Reload => session.reload(),
            Self::Click(target) => {
                let node = resolve(session, target)?;
                session.click_node(node)
            }
            Self::TypeText { target, text, .. } => {
                let node = resolve(session, target)?;
                session.type_text_node(node, text)
            }
            Self::Check(target) => {
                let node = resolve(session, target)?;
                session.set_checked_node(node, true)
            }
            Self::Uncheck(target) => {
                let node = resolve(session, target)?;
                session.set_checked_node(node, false)
            }
            Self::SelectOption { target, choice } => {
                let node = resolve(session, target)?;
                let value = option_value_for_choice(session, node, choice)?;
                session.select_values_node(node, &[value])
            }
            Self::SelectMany { target, values } => {
                let node = resolve(session, target)?;
                session.select_values_node(node, values)
            }
            Self::Upload { target, file_name, mode } => {
                let node = resolve(session, target)?;
                session.upload_node(node, file_name, *mode == UploadMode::DragDrop)
            }
            Self::SetRange { target, value } => {
                let node = resolve(session, target)?;
                session.set_range_node(node, *value)
            }
            Self::Focus(target) => {
                let node = resolve(session, target)?;
                session.focus_node(node)
            }
            Self::Blur(target) => {
                let node = resolve(session, target)?;
                session.blur_node(node)
            }
            Self::Submit(target) => {
                let node = resolve(session, target)?;
                session.submit_node(node)
            }
            Self::WaitForAlias(alias) => {
                session.wait_for_alias(alias)?;
                Ok(())
            }
            Self::AdvanceClock(delta_ms) => {
                session.advance_clock(*delta_ms)?;
                Ok(())
            }
        }
    }
}

fn resolve(session: &mut Session, target: &Target) -> Result<crate::dom::NodeId> {
    let opts = session.poll_options();
    Ok(crate::query::find(session, target, opts)?.node())
}

fn option_value_for_choice(
    session: &Session,
    select: crate::dom::NodeId,
    choice: &SelectChoice,
) -> Result<String> {
    let options = session.selectable_options(select);
    match choice {
        SelectChoice::Index(idx) => {
            if *idx == 0 || *idx > options.len() {
                return Err(Error::InvalidCommand(format!(
                    "option index {idx} out of range 1..={}",
                    options.len()
                )));
            }
            session.dom().option_effective_value(options[idx - 1])
        }
        SelectChoice::Value(value) => {
            for option in &options {
                let effective = session.dom().option_effective_value(*option)?;
                if effective == *value {
                    return Ok(effective);
                }
            }
            Err(Error::InvalidCommand(format!("no option with value {value:?}")))
        }
        SelectChoice::Text(text) => {
            for option in &options {
                if session.dom().text_content(*option).trim() == text.trim() {
                    return session.dom().option_effective_value(*option);
                }
            }
            Err(Error::InvalidCommand(format!("no option with text {text:?}")))
        }
    }
}

/// Strictly ordered steps. `run` executes in FIFO order and stops at the
/// first failure, dropping every queued step after it.
#[derive(Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Runs every queued step in order. On failure the remaining steps are
    /// discarded and the error names the step that broke.
    pub fn run(&mut self, session: &mut Session) -> Result<()> {
        let commands = std::mem::take(&mut self.commands);
        for command in commands {
            debug!(step = %command.describe(), "queue step");
            session.perform(command)?;
        }
        Ok(())
    }
}
