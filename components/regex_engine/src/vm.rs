//! Backtracking matcher.
//!
//! The VM runs the compiled ops left-to-right over the input. A backtrack
//! stack of `{pc, sp, capture snapshot}` frames records the alternatives of
//! split instructions; failure pops the top frame. Capture slots hold
//! UTF-16 offsets, `-1` meaning the group did not participate.

use crate::compiler::{ReOp, RegexProgram};
use crate::range_builder::{canonicalize, is_line_terminator, is_word_unit, ranges_contain};

/// Backtrack stack depth cap; exceeding it fails the match.
const MAX_BACKTRACK: usize = 1 << 20;

/// Result of a successful match: capture offsets, `2 * capture_count`
/// entries, `-1` for non-participating groups.
pub type Captures = Vec<i32>;

impl RegexProgram {
    /// Match anchored at `start`. Returns the capture array on success.
    pub fn match_at(&self, input: &[u16], start: usize) -> Option<Captures> {
        if start > input.len() {
            return None;
        }
        let mut captures = vec![-1i32; self.capture_count as usize * 2];
        let mut scratch = vec![0usize; self.scratch_count as usize];
        if run(
            &self.ops,
            input,
            start,
            &mut captures,
            &mut scratch,
            self.flags.ignore_case(),
            self.flags.multiline(),
        ) {
            Some(captures)
        } else {
            None
        }
    }

    /// Search left-to-right for the first position where the pattern
    /// matches.
    pub fn search(&self, input: &[u16], start: usize) -> Option<Captures> {
        for at in start..=input.len() {
            if let Some(captures) = self.match_at(input, at) {
                return Some(captures);
            }
        }
        None
    }
}

struct Frame {
    pc: usize,
    sp: usize,
    captures: Captures,
    scratch: Vec<usize>,
}

fn run(
    ops: &[ReOp],
    input: &[u16],
    start: usize,
    captures: &mut Captures,
    scratch: &mut Vec<usize>,
    ignore_case: bool,
    multiline: bool,
) -> bool {
    let mut stack: Vec<Frame> = Vec::new();
    let mut pc = 0usize;
    let mut sp = start;

    macro_rules! fail {
        () => {
            match stack.pop() {
                Some(frame) => {
                    pc = frame.pc;
                    sp = frame.sp;
                    *captures = frame.captures;
                    *scratch = frame.scratch;
                    continue;
                }
                None => return false,
            }
        };
    }

    loop {
        match &ops[pc] {
            ReOp::Char(unit) => {
                if sp < input.len() && input[sp] == *unit {
                    sp += 1;
                    pc += 1;
                } else {
                    fail!();
                }
            }
            ReOp::CharCI(unit) => {
                if sp < input.len() && canonicalize(input[sp]) == *unit {
                    sp += 1;
                    pc += 1;
                } else {
                    fail!();
                }
            }
            ReOp::Class { invert, ranges } => {
                if sp < input.len() {
                    let unit = input[sp];
                    let mut hit = ranges_contain(ranges, unit);
                    if !hit && ignore_case {
                        hit = ranges_contain(ranges, canonicalize(unit));
                    }
                    if hit != *invert {
                        sp += 1;
                        pc += 1;
                        continue;
                    }
                }
                fail!();
            }
            ReOp::LineStart => {
                if sp == 0 || (multiline && is_line_terminator(input[sp - 1])) {
                    pc += 1;
                } else {
                    fail!();
                }
            }
            ReOp::LineEnd => {
                if sp == input.len() || (multiline && is_line_terminator(input[sp])) {
                    pc += 1;
                } else {
                    fail!();
                }
            }
            ReOp::WordBoundary { invert } => {
                let before = sp > 0 && is_word_unit(input[sp - 1]);
                let after = sp < input.len() && is_word_unit(input[sp]);
                if (before != after) != *invert {
                    pc += 1;
                } else {
                    fail!();
                }
            }
            ReOp::Save(slot) => {
                captures[*slot as usize] = sp as i32;
                pc += 1;
            }
            ReOp::ResetCaptures { from, to } => {
                for slot in *from..*to {
                    captures[slot as usize] = -1;
                }
                pc += 1;
            }
            ReOp::Jump(delta) => {
                pc = offset(pc, *delta);
            }
            ReOp::SplitNextFirst(delta) => {
                if stack.len() >= MAX_BACKTRACK {
                    fail!();
                }
                stack.push(Frame {
                    pc: offset(pc, *delta),
                    sp,
                    captures: captures.clone(),
                    scratch: scratch.clone(),
                });
                pc += 1;
            }
            ReOp::SplitGotoFirst(delta) => {
                if stack.len() >= MAX_BACKTRACK {
                    fail!();
                }
                stack.push(Frame {
                    pc: pc + 1,
                    sp,
                    captures: captures.clone(),
                    scratch: scratch.clone(),
                });
                pc = offset(pc, *delta);
            }
            ReOp::BackReference(index) => {
                let lo = captures[*index as usize * 2];
                let hi = captures[*index as usize * 2 + 1];
                if lo < 0 || hi < 0 {
                    // a group that did not participate matches the empty
                    // string
                    pc += 1;
                    continue;
                }
                let (lo, hi) = (lo as usize, hi as usize);
                let len = hi - lo;
                if sp + len > input.len() {
                    fail!();
                }
                let matched = if ignore_case {
                    input[lo..hi]
                        .iter()
                        .zip(&input[sp..sp + len])
                        .all(|(&a, &b)| canonicalize(a) == canonicalize(b))
                } else {
                    input[lo..hi] == input[sp..sp + len]
                };
                if matched {
                    sp += len;
                    pc += 1;
                } else {
                    fail!();
                }
            }
            ReOp::SetPos(slot) => {
                scratch[*slot as usize] = sp;
                pc += 1;
            }
            ReOp::ProgressJump { slot, delta } => {
                if sp > scratch[*slot as usize] {
                    pc = offset(pc, *delta);
                } else {
                    pc += 1;
                }
            }
            ReOp::Lookahead { body, negated } => {
                let mut sub_captures = captures.clone();
                let mut sub_scratch = scratch.clone();
                let matched = run(
                    body,
                    input,
                    sp,
                    &mut sub_captures,
                    &mut sub_scratch,
                    ignore_case,
                    multiline,
                );
                if *negated {
                    if matched {
                        fail!();
                    }
                    // captures inside a failed or negated lookahead are
                    // discarded
                    pc += 1;
                } else {
                    if !matched {
                        fail!();
                    }
                    *captures = sub_captures;
                    pc += 1;
                }
            }
            ReOp::Match => return true,
        }
    }
}

fn offset(pc: usize, delta: i32) -> usize {
    (pc as i64 + delta as i64) as usize
}
