//! Login State Machine
//!
//! Pure driver for a scripted login. The session feeds it server text and
//! timeouts; it answers with what to do next. It never touches a socket,
//! which keeps step ordering testable without a server.

use regex::{Regex, RegexBuilder};

use crate::error::Result;
use crate::models::LoginConfig;
use crate::terminal::output::clean_text;
use crate::terminal::prompt::tail;

/// Most recent text kept while waiting for a login cue
pub const MAX_WINDOW_BYTES: usize = 64 * 1024;

/// What the session should do after feeding the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAction {
    /// Write this reply (newline appended by the caller)
    Send(String),
    /// Keep reading
    Wait,
    /// Login finished successfully
    Succeeded,
    /// Login failed; the session should disconnect
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the cue of the step at this index
    Step(usize),
    /// All replies sent; waiting for a success or failure pattern
    Verdict,
    Done,
}

#[derive(Debug)]
struct CompiledStep {
    expect: Regex,
    send: String,
}

/// Step-by-step login driver
#[derive(Debug)]
pub struct LoginMachine {
    steps: Vec<CompiledStep>,
    success: Vec<Regex>,
    failure: Vec<Regex>,
    phase: Phase,
    /// Raw text received since the last reply went out, at most
    /// [`MAX_WINDOW_BYTES`] of it
    window: String,
    replies_sent: usize,
}

impl LoginMachine {
    /// Compile the login script; fails on an invalid pattern
    pub fn new(config: &LoginConfig) -> Result<Self> {
        let steps = config
            .steps
            .iter()
            .map(|step| {
                Ok(CompiledStep {
                    expect: RegexBuilder::new(&step.expect)
                        .case_insensitive(true)
                        .build()?,
                    send: step.send.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let success = compile_all(&config.success_patterns)?;
        let failure = compile_all(&config.failure_patterns)?;

        let phase = if steps.is_empty() {
            Phase::Verdict
        } else {
            Phase::Step(0)
        };

        Ok(Self {
            steps,
            success,
            failure,
            phase,
            window: String::new(),
            replies_sent: 0,
        })
    }

    /// Feed newly received text and get the next action
    pub fn on_output(&mut self, text: &str) -> LoginAction {
        self.window.push_str(text);
        if self.window.len() > MAX_WINDOW_BYTES {
            self.window = tail(&self.window, MAX_WINDOW_BYTES).to_string();
        }
        let clean = clean_text(&self.window);

        match self.phase {
            Phase::Step(index) => {
                if self.replies_sent > 0 {
                    if let Some(pattern) = first_match(&self.failure, &clean) {
                        return self.fail(format!("server rejected login (matched '{}')", pattern));
                    }
                }

                let step = &self.steps[index];
                if !step.expect.is_match(&clean) {
                    return LoginAction::Wait;
                }

                let reply = step.send.clone();
                self.window.clear();
                self.replies_sent += 1;
                self.phase = if index + 1 < self.steps.len() {
                    Phase::Step(index + 1)
                } else {
                    Phase::Verdict
                };
                LoginAction::Send(reply)
            }
            Phase::Verdict => {
                if first_match(&self.success, &clean).is_some() {
                    self.phase = Phase::Done;
                    return LoginAction::Succeeded;
                }
                if let Some(pattern) = first_match(&self.failure, &clean) {
                    return self.fail(format!("server rejected login (matched '{}')", pattern));
                }
                LoginAction::Wait
            }
            Phase::Done => LoginAction::Succeeded,
        }
    }

    /// The current wait ran out of time
    pub fn on_timeout(&mut self) -> LoginAction {
        match self.phase {
            Phase::Step(index) => {
                let expect = self.steps[index].expect.as_str().to_string();
                self.fail(format!("timed out waiting for '{}'", expect))
            }
            Phase::Verdict if self.success.is_empty() => {
                self.phase = Phase::Done;
                LoginAction::Succeeded
            }
            Phase::Verdict => self.fail("timed out waiting for a success pattern".to_string()),
            Phase::Done => LoginAction::Succeeded,
        }
    }

    /// Index of the step whose cue is awaited, if still in the step phase
    pub fn current_step(&self) -> Option<usize> {
        match self.phase {
            Phase::Step(index) => Some(index),
            _ => None,
        }
    }

    /// Number of replies handed out so far
    pub fn replies_sent(&self) -> usize {
        self.replies_sent
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }

    fn fail(&mut self, reason: String) -> LoginAction {
        self.phase = Phase::Done;
        LoginAction::Failed(reason)
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(Into::into))
        .collect()
}

fn first_match<'a>(patterns: &'a [Regex], text: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| p.is_match(text))
        .map(|p| p.as_str())
}
