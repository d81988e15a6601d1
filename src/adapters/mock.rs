//! Scripted test doubles for the host ports.
//!
//! `ScriptedCommandRunner` answers commands from substring rules and keeps
//! a log of everything it was asked to run; unmatched commands succeed
//! silently. `FixedDriveEnumerator` returns a canned drive list.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::ports::{CommandOutput, CommandRunner, DriveEnumerator};
use crate::error::Result;
use crate::hardware::DriveInfo;

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    output: CommandOutput,
    /// Remaining uses; `None` means unlimited
    remaining: Option<usize>,
}

/// Command runner driven by substring rules.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command containing `pattern` with `output`. Rules are
    /// checked in the order they were added.
    pub fn on(&self, pattern: impl Into<String>, output: CommandOutput) {
        self.rules.lock().push(Rule {
            pattern: pattern.into(),
            output,
            remaining: None,
        });
    }

    /// Like [`on`](Self::on), but the rule is dropped after one match.
    pub fn once(&self, pattern: impl Into<String>, output: CommandOutput) {
        self.rules.lock().push(Rule {
            pattern: pattern.into(),
            output,
            remaining: Some(1),
        });
    }

    /// Every command executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// True if any executed command contains `fragment`.
    pub fn ran(&self, fragment: &str) -> bool {
        self.log.lock().iter().any(|c| c.contains(fragment))
    }

    /// Number of executed commands containing `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        self.log.lock().iter().filter(|c| c.contains(fragment)).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    fn answer(&self, command: &str) -> CommandOutput {
        let mut rules = self.rules.lock();
        let Some(idx) = rules.iter().position(|r| command.contains(&r.pattern)) else {
            return CommandOutput::ok();
        };
        let output = rules[idx].output.clone();
        if let Some(remaining) = rules[idx].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(idx);
            }
        }
        output
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn execute(&self, command: &str) -> CommandOutput {
        self.log.lock().push(command.to_string());
        self.answer(command)
    }
}

/// Drive enumerator returning a fixed list.
#[derive(Debug, Clone, Default)]
pub struct FixedDriveEnumerator {
    drives: Vec<DriveInfo>,
}

impl FixedDriveEnumerator {
    pub fn new(drives: Vec<DriveInfo>) -> Self {
        Self { drives }
    }
}

#[async_trait]
impl DriveEnumerator for FixedDriveEnumerator {
    async fn list_drives(&self) -> Result<Vec<DriveInfo>> {
        Ok(self.drives.clone())
    }
}
