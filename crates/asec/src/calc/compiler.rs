// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Infix to postfix translation.
//!
//! Operator-precedence (shunting-yard) compiler. Each pending operator
//! carries an in-stack priority; an incoming operator first flushes every
//! pending operator whose in-stack priority is at least its own incoming
//! priority.
//!
//! | Priority | Operators |
//! |----------|-----------|
//! | 1 | `\|\|` `\|` `OR` `XOR` |
//! | 2 | `&&` `&` `AND` `>>` `<<` |
//! | 3 | `<` `<=` `>` `>=` `==` `=` `!=` `#` |
//! | 4 | `+` `-` |
//! | 5 | `*` `/` `%` |
//! | 6 | `^` `**` |
//! | 7 (in stack), 8 (incoming) | unary `-` `!` `~` `NOT` |
//!
//! `?` and `:` sit below every operator; functions bind tighter than
//! anything because they are emitted as soon as their `)` is seen.

use super::lexer::{Function, Lexer, Token};
use super::{InputMask, Op, Program};
use crate::config::{CALC_STACK_SIZE, MAX_CALC_LENGTH};
use crate::error::CompileError;

const UNARY_IN_STACK: u8 = 7;

fn binary_priority(op: Op) -> u8 {
    match op {
        Op::Or | Op::BitOr | Op::BitXor => 1,
        Op::And | Op::BitAnd | Op::Shl | Op::Shr => 2,
        Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::Eq | Op::Ne => 3,
        Op::Add | Op::Sub => 4,
        Op::Mul | Op::Div | Op::Mod => 5,
        _ => 6,
    }
}

/// Entry on the operator stack.
enum Pending {
    Operator { op: Op, priority: u8 },
    Paren {
        function: Option<Function>,
        args: usize,
        position: usize,
    },
    /// A `:` whose false branch is still open; `branch` is the index of the
    /// `Branch` op to patch once the matching `Join` is emitted.
    Else { branch: usize },
}

struct Compiler {
    ops: Vec<Op>,
    stack: Vec<Pending>,
    /// `?` ops not yet matched by `:`, with the paren depth they opened at.
    open_ifs: Vec<(usize, usize)>,
    depth: usize,
    operand_needed: bool,
}

/// Compile an infix CALC expression.
///
/// On error nothing is returned but the error; there is no partial program.
pub fn compile(infix: &str) -> Result<Program, CompileError> {
    if infix.len() > MAX_CALC_LENGTH {
        return Err(CompileError::TooLong {
            length: infix.len(),
            max: MAX_CALC_LENGTH,
        });
    }
    if infix.trim().is_empty() {
        return Err(CompileError::Empty);
    }

    let mut compiler = Compiler {
        ops: Vec::new(),
        stack: Vec::new(),
        open_ifs: Vec::new(),
        depth: 0,
        operand_needed: true,
    };
    let mut lexer = Lexer::new(infix);

    loop {
        let (token, position) = lexer.next_token()?;
        match token {
            Token::Number(value) => compiler.operand(Op::Push(value), position)?,
            Token::Input(index) => compiler.operand(Op::Fetch(index), position)?,
            Token::Function(function) => {
                if !compiler.operand_needed {
                    return Err(operator_expected(position));
                }
                match lexer.next_token()? {
                    (Token::LParen, _) => {}
                    (_, at) => {
                        return Err(CompileError::MalformedSequence {
                            position: at,
                            detail: "'(' expected after function name",
                        })
                    }
                }
                compiler.open_paren(Some(function), position);
            }
            Token::LParen => {
                if !compiler.operand_needed {
                    return Err(operator_expected(position));
                }
                compiler.open_paren(None, position);
            }
            Token::RParen => compiler.close_paren(position)?,
            Token::Comma => compiler.comma(position)?,
            Token::Unary(op) => compiler.unary(op, position)?,
            Token::Minus => {
                if compiler.operand_needed {
                    compiler.unary(Op::Neg, position)?;
                } else {
                    compiler.binary(Op::Sub, position)?;
                }
            }
            Token::Binary(op) => compiler.binary(op, position)?,
            Token::Question => compiler.question(position)?,
            Token::Colon => compiler.colon(position)?,
            Token::Assign => return Err(CompileError::AssignmentNotAllowed { position }),
            Token::Eof => {
                compiler.finish(position)?;
                break;
            }
        }
    }

    let max_depth = verify_stack(&compiler.ops)?;
    let inputs_used = compiler.ops.iter().fold(InputMask::EMPTY, |mask, op| match op {
        Op::Fetch(index) => mask.union(InputMask::single(*index as usize)),
        _ => mask,
    });

    Ok(Program::new(compiler.ops, inputs_used, max_depth, infix))
}

fn operator_expected(position: usize) -> CompileError {
    CompileError::MalformedSequence {
        position,
        detail: "operator expected",
    }
}

fn operand_expected(position: usize) -> CompileError {
    CompileError::MalformedSequence {
        position,
        detail: "operand expected",
    }
}

impl Compiler {
    fn operand(&mut self, op: Op, position: usize) -> Result<(), CompileError> {
        if !self.operand_needed {
            return Err(operator_expected(position));
        }
        self.ops.push(op);
        self.operand_needed = false;
        Ok(())
    }

    fn open_paren(&mut self, function: Option<Function>, position: usize) {
        self.stack.push(Pending::Paren {
            function,
            args: 1,
            position,
        });
        self.depth += 1;
    }

    fn unary(&mut self, op: Op, position: usize) -> Result<(), CompileError> {
        if !self.operand_needed {
            return Err(operator_expected(position));
        }
        // Incoming unary priority beats every in-stack priority, nothing to flush.
        self.stack.push(Pending::Operator {
            op,
            priority: UNARY_IN_STACK,
        });
        Ok(())
    }

    fn binary(&mut self, op: Op, position: usize) -> Result<(), CompileError> {
        if self.operand_needed {
            return Err(operand_expected(position));
        }
        let priority = binary_priority(op);
        while let Some(Pending::Operator { op: top, priority: p }) = self.stack.last() {
            if *p < priority {
                break;
            }
            self.ops.push(*top);
            self.stack.pop();
        }
        self.stack.push(Pending::Operator { op, priority });
        self.operand_needed = true;
        Ok(())
    }

    /// Emit every pending operator down to the nearest paren or `:`.
    fn flush_operators(&mut self) {
        while let Some(Pending::Operator { op, .. }) = self.stack.last() {
            self.ops.push(*op);
            self.stack.pop();
        }
    }

    /// Emit operators and close conditionals down to the nearest paren.
    fn flush_group(&mut self) {
        loop {
            match self.stack.last() {
                Some(Pending::Operator { op, .. }) => {
                    self.ops.push(*op);
                }
                Some(Pending::Else { branch }) => {
                    let join = self.ops.len();
                    self.ops[*branch] = Op::Branch(join);
                    self.ops.push(Op::Join);
                }
                Some(Pending::Paren { .. }) | None => return,
            }
            self.stack.pop();
        }
    }

    fn check_conditionals_closed(&self, position: usize) -> Result<(), CompileError> {
        match self.open_ifs.last() {
            Some(&(_, depth)) if depth == self.depth => Err(CompileError::MalformedSequence {
                position,
                detail: "'?' without matching ':'",
            }),
            _ => Ok(()),
        }
    }

    fn close_paren(&mut self, position: usize) -> Result<(), CompileError> {
        if self.operand_needed {
            return Err(operand_expected(position));
        }
        self.check_conditionals_closed(position)?;
        self.flush_group();
        match self.stack.pop() {
            Some(Pending::Paren {
                function: Some(function),
                args,
                ..
            }) => {
                if args != function.arity {
                    return Err(CompileError::ArgumentCount {
                        function: function.name,
                        expected: function.arity,
                        found: args,
                    });
                }
                self.ops.push(function.op);
            }
            Some(Pending::Paren { function: None, .. }) => {}
            _ => return Err(CompileError::UnbalancedParentheses { position }),
        }
        self.depth -= 1;
        Ok(())
    }

    fn comma(&mut self, position: usize) -> Result<(), CompileError> {
        if self.operand_needed {
            return Err(operand_expected(position));
        }
        self.check_conditionals_closed(position)?;
        self.flush_group();
        match self.stack.last_mut() {
            Some(Pending::Paren {
                function: Some(_),
                args,
                ..
            }) => *args += 1,
            _ => {
                return Err(CompileError::MalformedSequence {
                    position,
                    detail: "',' outside function arguments",
                })
            }
        }
        self.operand_needed = true;
        Ok(())
    }

    fn question(&mut self, position: usize) -> Result<(), CompileError> {
        if self.operand_needed {
            return Err(operand_expected(position));
        }
        self.flush_operators();
        self.open_ifs.push((self.ops.len(), self.depth));
        self.ops.push(Op::BranchIfZero(0));
        self.operand_needed = true;
        Ok(())
    }

    fn colon(&mut self, position: usize) -> Result<(), CompileError> {
        if self.operand_needed {
            return Err(operand_expected(position));
        }
        self.flush_operators();
        let branch_if = match self.open_ifs.last() {
            Some(&(index, depth)) if depth == self.depth => index,
            _ => {
                return Err(CompileError::MalformedSequence {
                    position,
                    detail: "':' without matching '?'",
                })
            }
        };
        self.open_ifs.pop();
        let branch = self.ops.len();
        self.ops.push(Op::Branch(0));
        self.ops[branch_if] = Op::BranchIfZero(branch + 1);
        self.stack.push(Pending::Else { branch });
        self.operand_needed = true;
        Ok(())
    }

    fn finish(&mut self, position: usize) -> Result<(), CompileError> {
        if self.operand_needed {
            return Err(CompileError::MalformedSequence {
                position,
                detail: "incomplete expression",
            });
        }
        self.check_conditionals_closed(position)?;
        self.flush_group();
        if let Some(Pending::Paren { position, .. }) = self.stack.last() {
            return Err(CompileError::UnbalancedParentheses {
                position: *position,
            });
        }
        Ok(())
    }
}

/// Walk every control path and check that no op underflows, that both arms
/// of each conditional leave the same depth, and that exactly one value
/// remains. Returns the deepest stack reached.
fn verify_stack(ops: &[Op]) -> Result<usize, CompileError> {
    let mut depth_at: Vec<Option<usize>> = vec![None; ops.len() + 1];
    depth_at[0] = Some(0);
    let mut max_depth = 0;

    fn merge(slot: &mut Option<usize>, depth: usize) -> Result<(), CompileError> {
        match *slot {
            None => {
                *slot = Some(depth);
                Ok(())
            }
            Some(d) if d == depth => Ok(()),
            Some(_) => Err(CompileError::MalformedSequence {
                position: 0,
                detail: "conditional branches leave different stack depths",
            }),
        }
    }

    for (pc, op) in ops.iter().enumerate() {
        let Some(depth) = depth_at[pc] else {
            continue;
        };
        if depth < op.pops() {
            return Err(CompileError::MalformedSequence {
                position: 0,
                detail: "operator is missing an operand",
            });
        }
        let after = depth - op.pops() + op.pushes();
        max_depth = max_depth.max(after);

        match *op {
            Op::Branch(target) => merge(&mut depth_at[target], after)?,
            Op::BranchIfZero(target) => {
                merge(&mut depth_at[target], after)?;
                merge(&mut depth_at[pc + 1], after)?;
            }
            _ => merge(&mut depth_at[pc + 1], after)?,
        }
    }

    if depth_at[ops.len()] != Some(1) {
        return Err(CompileError::MalformedSequence {
            position: 0,
            detail: "expression does not reduce to a single value",
        });
    }
    if max_depth > CALC_STACK_SIZE {
        return Err(CompileError::TooComplex {
            depth: max_depth,
            max: CALC_STACK_SIZE,
        });
    }
    Ok(max_depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(infix: &str) -> Vec<Op> {
        compile(infix).unwrap().ops().to_vec()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            ops("A+B*C"),
            vec![Op::Fetch(0), Op::Fetch(1), Op::Fetch(2), Op::Mul, Op::Add]
        );
        assert_eq!(
            ops("(A+B)*C"),
            vec![Op::Fetch(0), Op::Fetch(1), Op::Add, Op::Fetch(2), Op::Mul]
        );
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            ops("A-B-C"),
            vec![Op::Fetch(0), Op::Fetch(1), Op::Sub, Op::Fetch(2), Op::Sub]
        );
    }

    #[test]
    fn test_unary_minus_disambiguation() {
        assert_eq!(ops("-A"), vec![Op::Fetch(0), Op::Neg]);
        assert_eq!(ops("A-B"), vec![Op::Fetch(0), Op::Fetch(1), Op::Sub]);
        assert_eq!(
            ops("A*-B"),
            vec![Op::Fetch(0), Op::Fetch(1), Op::Neg, Op::Mul]
        );
        assert_eq!(ops("--A"), vec![Op::Fetch(0), Op::Neg, Op::Neg]);
    }

    #[test]
    fn test_logic_binds_looser_than_comparison() {
        assert_eq!(
            ops("A>0 && B<10"),
            vec![
                Op::Fetch(0),
                Op::Push(0.0),
                Op::Gt,
                Op::Fetch(1),
                Op::Push(10.0),
                Op::Lt,
                Op::And,
            ]
        );
    }

    #[test]
    fn test_functions() {
        assert_eq!(ops("ABS(A)"), vec![Op::Fetch(0), Op::Abs]);
        assert_eq!(
            ops("MAX(A,B+1)"),
            vec![Op::Fetch(0), Op::Fetch(1), Op::Push(1.0), Op::Add, Op::Max]
        );
        assert_eq!(
            ops("-SQRT(A)^2"),
            vec![Op::Fetch(0), Op::Sqrt, Op::Neg, Op::Push(2.0), Op::Pow]
        );
    }

    #[test]
    fn test_conditional_targets() {
        // A ? B : C
        assert_eq!(
            ops("A?B:C"),
            vec![
                Op::Fetch(0),
                Op::BranchIfZero(4),
                Op::Fetch(1),
                Op::Branch(5),
                Op::Fetch(2),
                Op::Join,
            ]
        );
    }

    #[test]
    fn test_inputs_used() {
        let p = compile("A + c*L").unwrap();
        assert_eq!(p.inputs_used().iter().collect::<Vec<_>>(), vec![0, 2, 11]);
        assert!(compile("PI>3").unwrap().inputs_used().is_empty());
    }

    #[test]
    fn test_max_depth() {
        assert_eq!(compile("A").unwrap().max_depth(), 1);
        assert_eq!(compile("A+(B+(C+D))").unwrap().max_depth(), 4);
    }

    #[test]
    fn test_rejects_assignment() {
        assert_eq!(
            compile("A:=1"),
            Err(CompileError::AssignmentNotAllowed { position: 1 })
        );
    }

    #[test]
    fn test_rejects_unbalanced() {
        assert!(matches!(
            compile("(A+B"),
            Err(CompileError::UnbalancedParentheses { position: 0 })
        ));
        assert!(matches!(
            compile("A+B)"),
            Err(CompileError::UnbalancedParentheses { position: 3 })
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["A B", "A+", "*A", "A+*B", "()", "A(B)", "A?B", "A:B", "(A?B):C", "A,B"] {
            assert!(
                matches!(compile(bad), Err(CompileError::MalformedSequence { .. })),
                "expected malformed for {:?}, got {:?}",
                bad,
                compile(bad)
            );
        }
    }

    #[test]
    fn test_rejects_unknown_identifier() {
        assert!(matches!(
            compile("A > LIMIT"),
            Err(CompileError::UnknownIdentifier { position: 4, .. })
        ));
        assert!(matches!(
            compile("M"),
            Err(CompileError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_arity() {
        assert_eq!(
            compile("MAX(A)"),
            Err(CompileError::ArgumentCount {
                function: "MAX",
                expected: 2,
                found: 1
            })
        );
        assert!(matches!(
            compile("ABS(A,B)"),
            Err(CompileError::ArgumentCount { found: 2, .. })
        ));
    }

    #[test]
    fn test_function_needs_paren() {
        assert!(matches!(
            compile("ABS A"),
            Err(CompileError::MalformedSequence { .. })
        ));
    }

    #[test]
    fn test_empty_and_long() {
        assert_eq!(compile("   "), Err(CompileError::Empty));
        let long = "A+".repeat(MAX_CALC_LENGTH) + "A";
        assert!(matches!(compile(&long), Err(CompileError::TooLong { .. })));
    }

    #[test]
    fn test_too_complex() {
        // Deep enough programs cannot fit the length limit, so drive the verifier directly.
        let mut ops = Vec::new();
        for _ in 0..=CALC_STACK_SIZE {
            ops.push(Op::Push(1.0));
        }
        for _ in 0..CALC_STACK_SIZE {
            ops.push(Op::Add);
        }
        assert!(matches!(
            verify_stack(&ops),
            Err(CompileError::TooComplex { depth: 81, .. })
        ));
    }

    #[test]
    fn test_source_is_kept() {
        assert_eq!(compile("a > 1").unwrap().source(), "a > 1");
    }
}
