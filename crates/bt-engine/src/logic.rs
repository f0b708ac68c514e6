//! Composite decorator logic.
//!
//! A child entry may combine its decorators with a boolean expression stored
//! in prefix order: every operator token opens a frame expecting a fixed
//! number of operands, every `Test` token produces one operand. Frames are
//! folded into their parent as soon as their last operand arrives.

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum LogicOp {
    /// Evaluate the decorator in this slot of the child entry.
    Test(usize),
    And(u16),
    Or(u16),
    Not(u16),
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    op: LogicOp,
    num_left: u16,
    forced: Option<bool>,
}

impl Frame {
    fn new(op: LogicOp, num_left: u16) -> Self {
        Self {
            op,
            num_left,
            forced: None,
        }
    }
}

/// Decide whether the decorators of one child entry allow execution.
///
/// `test(slot)` returns the decorator's check with its `inverse` flag applied,
/// or `None` when the slot holds no decorator; missing decorators count as
/// "not allowed".
///
/// Without `ops` the result is the AND of every decorator, and every
/// decorator is asked even after one has failed.
///
/// With `ops`, a `Test` inside a frame that already has a forced result
/// (`false` for `And`, `true` for `Or`) reuses that result instead of asking
/// the decorator. Frames nested below a forced frame still ask theirs.
pub fn evaluate<F>(ops: &[LogicOp], decorator_count: usize, mut test: F) -> bool
where
    F: FnMut(usize) -> Option<bool>,
{
    if ops.is_empty() {
        let mut allowed = true;
        for slot in 0..decorator_count {
            allowed &= test(slot).unwrap_or(false);
        }
        return allowed;
    }

    let mut stack: Vec<Frame> = Vec::with_capacity(4);
    let mut result = false;

    for op in ops {
        match *op {
            LogicOp::Test(slot) => {
                let value = match stack.last().and_then(|frame| frame.forced) {
                    Some(forced) => forced,
                    None => test(slot).unwrap_or(false),
                };
                result = fold(&mut stack, value);
                if stack.is_empty() {
                    break;
                }
            }
            LogicOp::And(n) | LogicOp::Or(n) | LogicOp::Not(n) => stack.push(Frame::new(*op, n)),
        }
    }

    tracing::trace!(ops = ops.len(), result, "decorator logic evaluated");
    result
}

fn fold(stack: &mut Vec<Frame>, mut value: bool) -> bool {
    loop {
        let Some(frame) = stack.last_mut() else {
            return value;
        };
        frame.num_left = frame.num_left.saturating_sub(1);

        match frame.op {
            LogicOp::And(_) if frame.forced.is_none() && !value => frame.forced = Some(false),
            LogicOp::Or(_) if frame.forced.is_none() && value => frame.forced = Some(true),
            LogicOp::Not(_) => value = !value,
            _ => {}
        }

        if frame.num_left > 0 {
            return value;
        }

        let done = *frame;
        stack.pop();
        value = done.forced.unwrap_or(value);
    }
}

/// Structural problems in a logic sequence, reported by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicDefect {
    SlotOutOfRange(usize),
    EmptyOperator,
    NotArity,
    TrailingTokens,
    MissingOperands,
}

impl LogicDefect {
    pub fn reason(self) -> &'static str {
        match self {
            LogicDefect::SlotOutOfRange(_) => "test slot out of range",
            LogicDefect::EmptyOperator => "operator without operands",
            LogicDefect::NotArity => "not takes exactly one operand",
            LogicDefect::TrailingTokens => "tokens after the expression is complete",
            LogicDefect::MissingOperands => "expression ends before all operands arrived",
        }
    }
}

/// Check that `ops` forms exactly one complete expression over
/// `decorator_count` slots.
pub fn validate(ops: &[LogicOp], decorator_count: usize) -> Result<(), LogicDefect> {
    if ops.is_empty() {
        return Ok(());
    }

    // Operands each open frame is still waiting for.
    let mut pending: Vec<u16> = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        if i > 0 && pending.is_empty() {
            return Err(LogicDefect::TrailingTokens);
        }
        match *op {
            LogicOp::Test(slot) => {
                if slot >= decorator_count {
                    return Err(LogicDefect::SlotOutOfRange(slot));
                }
                complete_operand(&mut pending);
            }
            LogicOp::Not(n) if n != 1 => return Err(LogicDefect::NotArity),
            LogicOp::And(0) | LogicOp::Or(0) => return Err(LogicDefect::EmptyOperator),
            LogicOp::And(n) | LogicOp::Or(n) | LogicOp::Not(n) => pending.push(n),
        }
    }

    if pending.is_empty() {
        Ok(())
    } else {
        Err(LogicDefect::MissingOperands)
    }
}

fn complete_operand(pending: &mut Vec<u16>) {
    while let Some(left) = pending.last_mut() {
        *left -= 1;
        if *left > 0 {
            return;
        }
        pending.pop();
    }
}
