//! Scripted command runner for tests
//!
//! Records every invocation and answers from a list of rules. The most
//! recently registered matching rule wins; unmatched invocations succeed
//! with no output. Responders may touch the filesystem to emulate the side
//! effects of the real tool (a clone creating a directory, make producing
//! an image).

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use super::{CommandOutput, CommandRunner, Invocation, ToolError};

type Matcher = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;
type Responder = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

struct Rule {
    matcher: Matcher,
    respond: Responder,
}

/// In-process runner with scripted responses
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    missing: Mutex<Vec<String>>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer invocations accepted by `matcher` with `respond`
    pub fn on<M, R>(&self, matcher: M, respond: R) -> &Self
    where
        M: Fn(&Invocation) -> bool + Send + Sync + 'static,
        R: Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                matcher: Box::new(matcher),
                respond: Box::new(respond),
            });
        self
    }

    /// Answer every invocation of `program`
    pub fn on_program<R>(&self, program: &str, respond: R) -> &Self
    where
        R: Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    {
        let program = program.to_string();
        self.on(move |inv| inv.program == program, respond)
    }

    /// Make `program` fail to launch as if it were not installed
    pub fn missing(&self, program: &str) -> &Self {
        self.missing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(program.to_string());
        self
    }

    /// Every invocation so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invocations of `program`, in order
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|inv| inv.program == program)
            .collect()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ToolError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());

        let is_missing = self
            .missing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| *p == invocation.program);
        if is_missing {
            return Err(ToolError::NotFound {
                program: invocation.program.clone(),
            });
        }

        let mut output = {
            let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
            rules
                .iter()
                .rev()
                .find(|rule| (rule.matcher)(invocation))
                .map(|rule| (rule.respond)(invocation))
                .unwrap_or_else(CommandOutput::ok)
        };

        // Mirror the real runner: redirected output lands in the log, not the result.
        if let Some(ref log) = invocation.log {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log)
                .map_err(|source| ToolError::Log {
                    path: log.clone(),
                    source,
                })?;
            let _ = file.write_all(output.stdout.as_bytes());
            let _ = file.write_all(output.stderr.as_bytes());
            output.stdout.clear();
            output.stderr.clear();
        }

        Ok(output)
    }
}
