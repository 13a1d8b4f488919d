use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::{Error, Result};

type SetupFn = Rc<dyn Fn(&mut Session) -> Result<()>>;
type BodyFn = Rc<dyn Fn(&mut Session) -> Result<()>>;

struct Scenario {
    name: String,
    body: BodyFn,
    skip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Status {
    Passed,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub status: Status,
}

/// Aggregate outcome of a suite run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.status == Status::Passed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|result| matches!(result.status, Status::Failed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.status == Status::Skipped)
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }

    /// Nonzero exactly when at least one scenario failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed() > 0 { 1 } else { 0 }
    }

    /// Machine-readable report for CI tooling.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| Error::Io(err.to_string()))
    }
}

/// Ordered collection of isolated scenarios. Every scenario gets a fresh
/// `Session` prepared by the suite's setup hooks; a failure is fatal to its
/// own scenario only, and siblings still run.
#[derive(Default)]
pub struct Suite {
    name: String,
    setup: Vec<SetupFn>,
    scenarios: Vec<Scenario>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            setup: Vec::new(),
            scenarios: Vec::new(),
        }
    }

    /// Registers a page every scenario's session starts from. Sugar for a
    /// setup hook that registers and navigates.
    pub fn page(
        &mut self,
        url: impl Into<String>,
        html: impl Into<String>,
        wiring: impl Fn(&mut Session) -> Result<()> + 'static,
    ) -> &mut Self {
        let url = url.into();
        let html = html.into();
        let wiring = Rc::new(wiring);
        self.setup.push(Rc::new(move |session| {
            let wiring = wiring.clone();
            session.register_page(url.clone(), html.clone(), move |session| wiring(session));
            session.navigate(&url)
        }));
        self
    }

    /// Runs before every scenario, after earlier hooks, on the fresh
    /// session. Hooks run in registration order.
    pub fn before_each(&mut self, hook: impl Fn(&mut Session) -> Result<()> + 'static) -> &mut Self {
        self.setup.push(Rc::new(hook));
        self
    }

    pub fn scenario(
        &mut self,
        name: impl Into<String>,
        body: impl Fn(&mut Session) -> Result<()> + 'static,
    ) -> &mut Self {
        self.scenarios.push(Scenario {
            name: name.into(),
            body: Rc::new(body),
            skip: false,
        });
        self
    }

    /// Registered but never executed; reported as skipped.
    pub fn skip(&mut self, name: impl Into<String>) -> &mut Self {
        self.scenarios.push(Scenario {
            name: name.into(),
            body: Rc::new(|_| Ok(())),
            skip: true,
        });
        self
    }

    /// Runs every scenario against its own fresh session. A setup-hook
    /// failure counts against the scenario it was preparing.
    pub fn run(&self) -> RunReport {
        info!(suite = %self.name, scenarios = self.scenarios.len(), "suite start");
        let mut report = RunReport::default();
        for scenario in &self.scenarios {
            if scenario.skip {
                debug!(scenario = %scenario.name, "skipped");
                report.results.push(ScenarioResult {
                    name: scenario.name.clone(),
                    status: Status::Skipped,
                });
                continue;
            }

            let status = match self.run_one(scenario) {
                Ok(()) => Status::Passed,
                Err((err, step)) => {
                    let message = match step {
                        Some(step) => format!("{err} (at step: {step})"),
                        None => err,
                    };
                    warn!(scenario = %scenario.name, %message, "scenario failed");
                    Status::Failed(message)
                }
            };
            report.results.push(ScenarioResult {
                name: scenario.name.clone(),
                status,
            });
        }
        info!(suite = %self.name, summary = %report.summary(), "suite done");
        report
    }

    fn run_one(&self, scenario: &Scenario) -> std::result::Result<(), (String, Option<String>)> {
        let mut session = Session::new();
        for hook in &self.setup {
            if let Err(err) = hook(&mut session) {
                return Err((err.to_string(), session.last_step().map(str::to_string)));
            }
        }
        debug!(scenario = %scenario.name, "scenario start");
        (scenario.body)(&mut session)
            .map_err(|err| (err.to_string(), session.last_step().map(str::to_string)))
    }
}
