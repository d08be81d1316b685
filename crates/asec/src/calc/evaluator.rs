// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Postfix stack machine.

use super::{Op, Program};
use crate::config::{CALC_NUM_INPUTS, CALC_STACK_SIZE, CALC_TRUE_HIGH, CALC_TRUE_LOW};
use crate::error::EvalError;

/// Whether a condition result counts as TRUE.
///
/// Only values strictly inside `(0.99, 1.01)` qualify, so `2.0` and `NaN`
/// are false.
#[inline]
pub fn is_true(value: f64) -> bool {
    value > CALC_TRUE_LOW && value < CALC_TRUE_HIGH
}

struct Stack {
    slots: [f64; CALC_STACK_SIZE],
    len: usize,
}

impl Stack {
    fn push(&mut self, value: f64, op: Op) -> Result<(), EvalError> {
        let slot = self
            .slots
            .get_mut(self.len)
            .ok_or(EvalError::InvalidOperand { op: op.name() })?;
        *slot = value;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self, op: Op) -> Result<f64, EvalError> {
        if self.len == 0 {
            return Err(EvalError::InvalidOperand { op: op.name() });
        }
        self.len -= 1;
        Ok(self.slots[self.len])
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn unary(op: Op, x: f64) -> Result<f64, EvalError> {
    let value = match op {
        Op::Neg => -x,
        Op::Not => flag(x == 0.0),
        Op::BitNot => f64::from(!(x as i32)),
        Op::Abs => x.abs(),
        Op::Sqrt => {
            if x < 0.0 {
                return Err(EvalError::InvalidOperand { op: op.name() });
            }
            x.sqrt()
        }
        Op::Exp => x.exp(),
        Op::Ln => x.ln(),
        Op::Log10 => x.log10(),
        Op::Acos => x.acos(),
        Op::Asin => x.asin(),
        Op::Atan => x.atan(),
        Op::Cos => x.cos(),
        Op::Cosh => x.cosh(),
        Op::Sin => x.sin(),
        Op::Sinh => x.sinh(),
        Op::Tan => x.tan(),
        Op::Tanh => x.tanh(),
        Op::Ceil => x.ceil(),
        Op::Floor => x.floor(),
        Op::Nint => x.round(),
        _ => return Err(EvalError::InvalidOperand { op: op.name() }),
    };
    Ok(value)
}

fn binary(op: Op, a: f64, b: f64) -> Result<f64, EvalError> {
    let value = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => {
            if b == 0.0 {
                return Err(EvalError::DivideByZero);
            }
            a / b
        }
        Op::Mod => {
            let divisor = b as i32;
            if divisor == 0 {
                return Err(EvalError::DivideByZero);
            }
            f64::from((a as i32).wrapping_rem(divisor))
        }
        Op::Pow => {
            if a < 0.0 && b.fract() != 0.0 {
                return Err(EvalError::InvalidOperand { op: op.name() });
            }
            a.powf(b)
        }
        Op::Atan2 => b.atan2(a),
        Op::Max => {
            if a < b {
                b
            } else {
                a
            }
        }
        Op::Min => {
            if a > b {
                b
            } else {
                a
            }
        }
        Op::Lt => flag(a < b),
        Op::Le => flag(a <= b),
        Op::Gt => flag(a > b),
        Op::Ge => flag(a >= b),
        Op::Eq => flag(a == b),
        Op::Ne => flag(a != b),
        Op::And => flag(a != 0.0 && b != 0.0),
        Op::Or => flag(a != 0.0 || b != 0.0),
        Op::BitAnd => f64::from((a as i32) & (b as i32)),
        Op::BitOr => f64::from((a as i32) | (b as i32)),
        Op::BitXor => f64::from((a as i32) ^ (b as i32)),
        Op::Shl => f64::from((a as i32).wrapping_shl(b as i32 as u32)),
        Op::Shr => f64::from((a as i32).wrapping_shr(b as i32 as u32)),
        _ => return Err(EvalError::InvalidOperand { op: op.name() }),
    };
    Ok(value)
}

/// Run `program` against the input vector.
///
/// Pure: no shared state, no allocation, bounded by the program length.
pub fn evaluate(program: &Program, inputs: &[f64; CALC_NUM_INPUTS]) -> Result<f64, EvalError> {
    let mut stack = Stack {
        slots: [0.0; CALC_STACK_SIZE],
        len: 0,
    };
    let ops = program.ops();
    let mut pc = 0;

    while let Some(&op) = ops.get(pc) {
        pc += 1;
        match op {
            Op::Push(value) => stack.push(value, op)?,
            Op::Fetch(index) => stack.push(inputs[index as usize % CALC_NUM_INPUTS], op)?,
            Op::BranchIfZero(target) => {
                if stack.pop(op)? == 0.0 {
                    pc = target;
                }
            }
            Op::Branch(target) => pc = target,
            Op::Join => {}
            _ if op.pops() == 1 => {
                let x = stack.pop(op)?;
                stack.push(unary(op, x)?, op)?;
            }
            _ => {
                let b = stack.pop(op)?;
                let a = stack.pop(op)?;
                stack.push(binary(op, a, b)?, op)?;
            }
        }
    }

    let result = stack.pop(Op::Join)?;
    if stack.len != 0 {
        return Err(EvalError::InvalidOperand { op: "END" });
    }
    Ok(result)
}
