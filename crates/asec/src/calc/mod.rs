// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CALC expression language
//!
//! Rule conditions are written as infix expressions over twelve numeric
//! inputs `A`..`L`, compiled once into a flat postfix [`Program`] and then
//! evaluated by a small stack machine whenever an input changes.
//!
//! # Architecture
//!
//! ```text
//! "A>0 && B<10"
//!      |
//!      v
//! lexer::Lexer        (tokens)
//!      |
//!      v
//! compiler::compile   (shunting-yard, arity + stack-depth checks)
//!      |
//!      v
//! Program             ops: [Fetch(0) Push(0) Gt Fetch(1) Push(10) Lt And]
//!      |              inputs_used: {A, B}
//!      v
//! evaluator::evaluate (fixed-size stack, no allocation)
//! ```
//!
//! # Truth
//!
//! A condition holds only when its result lies strictly inside
//! `(0.99, 1.01)`. Any other value, including `2.0`, counts as false.
//!
//! # Example
//!
//! ```
//! use asec::calc::{compile, evaluate, is_true};
//!
//! let program = compile("A>0 && B<10").unwrap();
//! let mut inputs = [0.0; 12];
//! inputs[0] = 1.0;
//! inputs[1] = 5.0;
//! assert!(is_true(evaluate(&program, &inputs).unwrap()));
//! ```

mod compiler;
mod evaluator;
mod lexer;

pub use compiler::compile;
pub use evaluator::{evaluate, is_true};

use crate::config::CALC_NUM_INPUTS;

// ---------------------------------------------------------------------------
// Input bitset
// ---------------------------------------------------------------------------

/// Set of input slots (A..L), one bit per slot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InputMask(u16);

impl InputMask {
    pub const EMPTY: InputMask = InputMask(0);
    pub const ALL: InputMask = InputMask((1 << CALC_NUM_INPUTS) - 1);

    /// Mask holding only `index`. Out-of-range indices yield an empty mask.
    pub fn single(index: usize) -> Self {
        if index < CALC_NUM_INPUTS {
            InputMask(1 << index)
        } else {
            InputMask::EMPTY
        }
    }

    pub fn from_bits(bits: u16) -> Self {
        InputMask(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, index: usize) -> bool {
        index < CALC_NUM_INPUTS && self.0 & (1 << index) != 0
    }

    pub fn insert(&mut self, index: usize) {
        self.0 |= Self::single(index).0;
    }

    pub fn remove(&mut self, index: usize) {
        self.0 &= !Self::single(index).0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: InputMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: InputMask) -> InputMask {
        InputMask(self.0 | other.0)
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Slot indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..CALC_NUM_INPUTS).filter(move |&i| self.contains(i))
    }
}

impl std::fmt::Debug for InputMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letters: String = self.iter().filter_map(input_letter).collect();
        write!(f, "InputMask({{{}}})", letters)
    }
}

/// Slot index for an input letter, case-insensitive.
pub fn input_index(letter: char) -> Option<usize> {
    let upper = letter.to_ascii_uppercase();
    if ('A'..='L').contains(&upper) {
        Some(upper as usize - 'A' as usize)
    } else {
        None
    }
}

/// Upper-case letter naming slot `index`.
pub fn input_letter(index: usize) -> Option<char> {
    if index < CALC_NUM_INPUTS {
        Some((b'A' + index as u8) as char)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Bytecode
// ---------------------------------------------------------------------------

/// One postfix instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Push a literal
    Push(f64),
    /// Push input slot n
    Fetch(u8),

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,

    Neg,
    Not,
    BitNot,

    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Acos,
    Asin,
    Atan,
    Cos,
    Cosh,
    Sin,
    Sinh,
    Tan,
    Tanh,
    Ceil,
    Floor,
    Nint,

    Atan2,
    Max,
    Min,

    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,

    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,

    /// `?`: pop the condition, jump to the target when it is zero
    BranchIfZero(usize),
    /// `:`: end of the true branch, jump over the false branch
    Branch(usize),
    /// End of a conditional
    Join,
}

impl Op {
    /// Values consumed from the stack.
    pub(crate) fn pops(self) -> usize {
        match self {
            Op::Push(_) | Op::Fetch(_) | Op::Branch(_) | Op::Join => 0,
            Op::Neg
            | Op::Not
            | Op::BitNot
            | Op::Abs
            | Op::Sqrt
            | Op::Exp
            | Op::Ln
            | Op::Log10
            | Op::Acos
            | Op::Asin
            | Op::Atan
            | Op::Cos
            | Op::Cosh
            | Op::Sin
            | Op::Sinh
            | Op::Tan
            | Op::Tanh
            | Op::Ceil
            | Op::Floor
            | Op::Nint
            | Op::BranchIfZero(_) => 1,
            _ => 2,
        }
    }

    /// Values produced.
    pub(crate) fn pushes(self) -> usize {
        match self {
            Op::BranchIfZero(_) | Op::Branch(_) | Op::Join => 0,
            _ => 1,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Op::Push(_) => "CONST",
            Op::Fetch(_) => "FETCH",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Pow => "^",
            Op::Neg => "NEG",
            Op::Not => "!",
            Op::BitNot => "~",
            Op::Abs => "ABS",
            Op::Sqrt => "SQRT",
            Op::Exp => "EXP",
            Op::Ln => "LN",
            Op::Log10 => "LOG",
            Op::Acos => "ACOS",
            Op::Asin => "ASIN",
            Op::Atan => "ATAN",
            Op::Cos => "COS",
            Op::Cosh => "COSH",
            Op::Sin => "SIN",
            Op::Sinh => "SINH",
            Op::Tan => "TAN",
            Op::Tanh => "TANH",
            Op::Ceil => "CEIL",
            Op::Floor => "FLOOR",
            Op::Nint => "NINT",
            Op::Atan2 => "ATAN2",
            Op::Max => "MAX",
            Op::Min => "MIN",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::And => "&&",
            Op::Or => "||",
            Op::BitAnd => "&",
            Op::BitOr => "|",
            Op::BitXor => "XOR",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::BranchIfZero(_) => "?",
            Op::Branch(_) => ":",
            Op::Join => "END",
        }
    }
}

/// A compiled CALC expression.
///
/// Only [`compile`] builds programs, so every `Program` has passed the
/// stack-depth check and its branch targets are in range.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    ops: Box<[Op]>,
    inputs_used: InputMask,
    max_depth: usize,
    source: String,
}

impl Program {
    pub(crate) fn new(ops: Vec<Op>, inputs_used: InputMask, max_depth: usize, source: &str) -> Self {
        Self {
            ops: ops.into_boxed_slice(),
            inputs_used,
            max_depth,
            source: source.to_string(),
        }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Inputs read by the program.
    pub fn inputs_used(&self) -> InputMask {
        self.inputs_used
    }

    /// Deepest stack the program reaches.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Infix text the program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}
