//! Per-directive execution state machine.
//!
//! ```text
//! PENDING -> EVALUATE_PRECONDITION -> { SKIPPED | RUN }
//! RUN -> EVALUATE_POSTCONDITION -> { RUN | DONE }
//! any -> HALTED | FAILED
//! ```
//!
//! The machine only decides; the interpreter runs commands between steps and
//! reports failures or halts back through [`DirectiveLoop::fail`] and
//! [`DirectiveLoop::halt`].
//!
//! In dry-run mode no expression is evaluated. Every condition reads as
//! false: `if` and `while` directives are skipped, `unless`, `until` and
//! unconditional directives run exactly once.

use crate::core::types::Conditional;
use crate::error::DroverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Pending,
    EvaluatePrecondition,
    Skipped,
    Run,
    EvaluatePostcondition,
    Done,
    Halted,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Skipped | Self::Done | Self::Halted | Self::Failed)
    }
}

/// What the interpreter should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Execute the directive's commands; carries the 1-based iteration.
    Run(u32),
    /// The machine reached a terminal state.
    Stop(LoopState),
}

#[derive(Debug)]
pub struct DirectiveLoop<'a> {
    conditional: &'a Conditional,
    max_loops: u32,
    dry_run: bool,
    runs: u32,
    state: LoopState,
}

impl<'a> DirectiveLoop<'a> {
    pub fn new(conditional: &'a Conditional, max_loops: u32, dry_run: bool) -> Self {
        Self {
            conditional,
            max_loops,
            dry_run,
            runs: 0,
            state: LoopState::Pending,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Advance to the next action, evaluating the conditional when needed.
    pub fn next<F>(&mut self, mut evaluate: F) -> Result<LoopAction, DroverError>
    where
        F: FnMut(&str) -> Result<bool, DroverError>,
    {
        let dry_run = self.dry_run;
        let mut holds = |expr: &str| if dry_run { Ok(false) } else { evaluate(expr) };
        loop {
            match self.state {
                LoopState::Pending => self.state = LoopState::EvaluatePrecondition,
                LoopState::EvaluatePrecondition => {
                    let proceed = match self.conditional {
                        Conditional::None | Conditional::Until(_) => true,
                        Conditional::If(expr) | Conditional::While(expr) => holds(expr.as_str())?,
                        Conditional::Unless(expr) => !holds(expr.as_str())?,
                    };
                    self.state = if proceed {
                        LoopState::Run
                    } else {
                        LoopState::Skipped
                    };
                }
                LoopState::Run => {
                    if self.runs >= self.max_loops {
                        self.state = LoopState::Failed;
                        return Err(DroverError::MaxLoopsExceeded {
                            max_loops: self.max_loops,
                        });
                    }
                    self.runs += 1;
                    self.state = LoopState::EvaluatePostcondition;
                    return Ok(LoopAction::Run(self.runs));
                }
                LoopState::EvaluatePostcondition => {
                    let again = !dry_run
                        && match self.conditional {
                            Conditional::While(expr) => holds(expr.as_str())?,
                            Conditional::Until(expr) => !holds(expr.as_str())?,
                            Conditional::None | Conditional::If(_) | Conditional::Unless(_) => {
                                false
                            }
                        };
                    self.state = if again {
                        LoopState::Run
                    } else {
                        LoopState::Done
                    };
                }
                terminal => return Ok(LoopAction::Stop(terminal)),
            }
        }
    }

    /// Mark the directive failed; further calls to `next` stop immediately.
    pub fn fail(&mut self) {
        self.state = LoopState::Failed;
    }

    pub fn halt(&mut self) {
        self.state = LoopState::Halted;
    }
}
