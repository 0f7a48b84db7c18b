use std::fmt;

use stave_pool::{Mutation, Pool, PoolError};
use stave_types::NodeId;
use tracing::{debug, warn};

use crate::command::DynCommand;
use crate::error::{CommandError, CommandResult};

// ---------------------------------------------------------------------------
// CommandState
// ---------------------------------------------------------------------------

/// Lifecycle of one command execution.
///
/// `Created -> Validated -> Applied` on success, `Created -> Rejected` when
/// validation fails, `Created -> Validated -> Failed` when `run()` fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    Created,
    Validated,
    Applied,
    Rejected,
    Failed,
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Rejected | Self::Failed)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Effect of a successfully applied command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Executed {
    /// Events in emission order.
    pub events: Vec<Mutation>,
    /// Node ids created while running, in creation order.
    pub minted: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One command travelling through the execution state machine.
pub struct Execution<'c> {
    command: &'c dyn DynCommand,
    target: NodeId,
    state: CommandState,
}

impl<'c> Execution<'c> {
    pub fn new(target: NodeId, command: &'c dyn DynCommand) -> Self {
        Self {
            command,
            target,
            state: CommandState::Created,
        }
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    fn expect_state(&self, expected: CommandState, action: &'static str) -> CommandResult<()> {
        if self.state != expected {
            return Err(CommandError::InvalidState {
                command: self.command.name().to_string(),
                action,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Run the read-only precondition check.
    pub fn validate(&mut self, pool: &Pool) -> CommandResult<()> {
        self.expect_state(CommandState::Created, "validate")?;
        let checked = pool
            .get(self.target)
            .map_err(CommandError::from)
            .and_then(|_| self.command.validate(self.target, pool));
        match checked {
            Ok(()) => {
                self.state = CommandState::Validated;
                Ok(())
            }
            Err(e) => {
                self.state = CommandState::Rejected;
                debug!(command = self.command.name(), target = %self.target, error = %e, "command rejected");
                Err(e)
            }
        }
    }

    /// Run the command atomically.
    ///
    /// On any error from `run()` or from the post-run checks, every mutation
    /// is rolled back before the error is returned.
    pub fn apply(&mut self, pool: &mut Pool) -> CommandResult<Executed> {
        self.expect_state(CommandState::Validated, "apply")?;
        pool.take_minted();
        match run_atomically(pool, self.target, self.command) {
            Ok(events) => {
                self.state = CommandState::Applied;
                let minted = pool.take_minted();
                debug!(
                    command = self.command.name(),
                    target = %self.target,
                    events = events.len(),
                    minted = minted.len(),
                    "command applied"
                );
                Ok(Executed { events, minted })
            }
            Err(e) => {
                self.state = CommandState::Failed;
                pool.take_minted();
                Err(e)
            }
        }
    }
}

/// Fail if the command left the pool outside a command boundary state.
fn check_boundary(pool: &Pool) -> Result<(), PoolError> {
    if let Some(node) = pool.floating().next() {
        return Err(PoolError::OwnershipViolation {
            node,
            reason: "node left floating at end of command".into(),
        });
    }
    if let Some(d) = pool.dangling_references().into_iter().next() {
        return Err(PoolError::DanglingReference {
            holder: d.holder,
            field: d.field,
            target: d.target,
        });
    }
    Ok(())
}

fn run_atomically(
    pool: &mut Pool,
    target: NodeId,
    command: &dyn DynCommand,
) -> CommandResult<Vec<Mutation>> {
    let mark = pool.journal_mark();
    let outcome = command
        .run(target, pool)
        .and_then(|()| check_boundary(pool).map_err(CommandError::from));
    match outcome {
        Ok(()) => Ok(pool.take_journal_since(mark)),
        Err(e) => {
            let undone = pool.journal_since(mark).len();
            pool.rollback_to(mark)
                .map_err(|source| CommandError::RollbackFailed {
                    command: command.name().to_string(),
                    source,
                })?;
            warn!(command = command.name(), %target, undone, error = %e, "command failed, rolled back");
            Err(CommandError::RuntimeFailed {
                command: command.name().to_string(),
                source: Box::new(e),
            })
        }
    }
}

/// Validate and apply a command.
pub fn execute(pool: &mut Pool, target: NodeId, command: &dyn DynCommand) -> CommandResult<Executed> {
    let mut execution = Execution::new(target, command);
    execution.validate(pool)?;
    execution.apply(pool)
}

/// Re-run a logged command, skipping validation.
///
/// `minted` are the ids recorded when the command first ran; the replay
/// must consume exactly those. Any failure is a divergence from the log.
pub fn replay(
    pool: &mut Pool,
    target: NodeId,
    command: &dyn DynCommand,
    minted: Vec<NodeId>,
) -> CommandResult<Vec<Mutation>> {
    pool.take_minted();
    pool.preset_ids(minted);
    let result = run_atomically(pool, target, command);
    let leftover = pool.take_unused_preset();
    pool.take_minted();
    let diverged = |reason: String| CommandError::ReplayDiverged {
        command: command.name().to_string(),
        reason,
    };
    match result {
        Ok(events) if leftover.is_empty() => Ok(events),
        Ok(events) => {
            pool.revert(&events).map_err(|e| diverged(e.to_string()))?;
            pool.take_journal();
            Err(diverged(format!("{} recorded id(s) were not used", leftover.len())))
        }
        Err(CommandError::RuntimeFailed { source, .. }) => Err(diverged(source.to_string())),
        Err(e) => Err(diverged(e.to_string())),
    }
}
