//! Lowers a parsed pattern to backtracking bytecode.
//!
//! Captures are numbered left-to-right by opening paren; slot `2k`/`2k+1`
//! hold group `k`'s start/end offsets. Quantifiers expand to split/loop
//! sequences with an empty-match progress guard on unbounded loops.
//! Lookahead assertions compile to sub-programs whose success is inverted
//! for `(?!…)`.

use crate::flags::RegexFlags;
use crate::parser::{Alternative, Disjunction, ParsedPattern, Term, QUANT_INFINITY};
use crate::range_builder::{canonicalize, CharRange};

/// One backtracking-VM instruction. Branch deltas are relative to the
/// instruction's own index.
#[derive(Debug, Clone, PartialEq)]
pub enum ReOp {
    /// Exact code-unit match.
    Char(u16),
    /// Case-insensitive match against a canonicalized unit.
    CharCI(u16),
    Class {
        invert: bool,
        ranges: Vec<CharRange>,
    },
    LineStart,
    LineEnd,
    WordBoundary {
        invert: bool,
    },
    /// Store the current position into capture slot `0`-based `slot`.
    Save(u16),
    /// Clear capture slots `[from, to)` to the did-not-participate
    /// sentinel. Emitted at quantified-group iteration entry.
    ResetCaptures {
        from: u16,
        to: u16,
    },
    Jump(i32),
    /// Try the next instruction first; on failure resume at `delta`.
    SplitNextFirst(i32),
    /// Try `delta` first; on failure resume at the next instruction.
    SplitGotoFirst(i32),
    BackReference(u16),
    /// Record the current position in scratch register `slot`.
    SetPos(u16),
    /// Loop edge: jump by `delta` only if the position advanced since
    /// `SetPos(slot)`. Falls through on an empty iteration.
    ProgressJump {
        slot: u16,
        delta: i32,
    },
    Lookahead {
        body: Vec<ReOp>,
        negated: bool,
    },
    Match,
}

/// A compiled regex: bytecode, capture count and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexProgram {
    pub ops: Vec<ReOp>,
    /// Capture groups including the whole match (group 0).
    pub capture_count: u16,
    pub scratch_count: u16,
    pub flags: RegexFlags,
}

/// Compile a parsed pattern.
pub fn compile(pattern: &ParsedPattern, flags: RegexFlags) -> RegexProgram {
    let mut compiler = Compiler {
        ops: Vec::new(),
        scratch_count: 0,
        flags,
    };
    compiler.ops.push(ReOp::Save(0));
    compiler.emit_disjunction(&pattern.body);
    compiler.ops.push(ReOp::Save(1));
    compiler.ops.push(ReOp::Match);
    RegexProgram {
        ops: compiler.ops,
        capture_count: pattern.capture_count,
        scratch_count: compiler.scratch_count,
        flags,
    }
}

struct Compiler {
    ops: Vec<ReOp>,
    scratch_count: u16,
    flags: RegexFlags,
}

impl Compiler {
    fn pc(&self) -> usize {
        self.ops.len()
    }

    fn emit(&mut self, op: ReOp) -> usize {
        let pc = self.pc();
        self.ops.push(op);
        pc
    }

    fn patch(&mut self, at: usize, target: usize) {
        let delta = target as i32 - at as i32;
        match &mut self.ops[at] {
            ReOp::Jump(d)
            | ReOp::SplitNextFirst(d)
            | ReOp::SplitGotoFirst(d)
            | ReOp::ProgressJump { delta: d, .. } => *d = delta,
            other => unreachable!("patching non-branch op {:?}", other),
        }
    }

    fn new_scratch(&mut self) -> u16 {
        let slot = self.scratch_count;
        self.scratch_count += 1;
        slot
    }

    fn emit_disjunction(&mut self, disjunction: &Disjunction) {
        let alternatives = &disjunction.alternatives;
        if alternatives.len() == 1 {
            self.emit_alternative(&alternatives[0]);
            return;
        }
        let mut exits = Vec::with_capacity(alternatives.len() - 1);
        for (i, alternative) in alternatives.iter().enumerate() {
            if i + 1 < alternatives.len() {
                let split = self.emit(ReOp::SplitNextFirst(0));
                self.emit_alternative(alternative);
                exits.push(self.emit(ReOp::Jump(0)));
                let next = self.pc();
                self.patch(split, next);
            } else {
                self.emit_alternative(alternative);
            }
        }
        let end = self.pc();
        for exit in exits {
            self.patch(exit, end);
        }
    }

    fn emit_alternative(&mut self, alternative: &Alternative) {
        for term in &alternative.terms {
            self.emit_term(term);
        }
    }

    fn emit_term(&mut self, term: &Term) {
        match term {
            Term::LineStart => {
                self.emit(ReOp::LineStart);
            }
            Term::LineEnd => {
                self.emit(ReOp::LineEnd);
            }
            Term::WordBoundary { invert } => {
                self.emit(ReOp::WordBoundary { invert: *invert });
            }
            Term::Char(unit) => {
                if self.flags.ignore_case() {
                    self.emit(ReOp::CharCI(canonicalize(*unit)));
                } else {
                    self.emit(ReOp::Char(*unit));
                }
            }
            Term::Class { invert, ranges } => {
                self.emit(ReOp::Class {
                    invert: *invert,
                    ranges: ranges.clone(),
                });
            }
            Term::BackReference(index) => {
                self.emit(ReOp::BackReference(*index));
            }
            Term::Group { body, capture } => match capture {
                Some(index) => {
                    self.emit(ReOp::Save(index * 2));
                    self.emit_disjunction(body);
                    self.emit(ReOp::Save(index * 2 + 1));
                }
                None => self.emit_disjunction(body),
            },
            Term::Lookahead { body, negated } => {
                // sub-program; success or failure is inverted for (?!)
                let mut sub = Compiler {
                    ops: Vec::new(),
                    scratch_count: self.scratch_count,
                    flags: self.flags,
                };
                sub.emit_disjunction(body);
                sub.emit(ReOp::Match);
                self.scratch_count = sub.scratch_count;
                self.emit(ReOp::Lookahead {
                    body: sub.ops,
                    negated: *negated,
                });
            }
            Term::Quantified {
                target,
                min,
                max,
                greedy,
            } => self.emit_quantified(target, *min, *max, *greedy),
        }
    }

    fn emit_quantified(&mut self, target: &Term, min: u32, max: u32, greedy: bool) {
        let reset = capture_span(target);

        // mandatory prefix
        for _ in 0..min {
            self.emit_body(target, reset);
        }
        if max == min {
            return;
        }

        if max == QUANT_INFINITY {
            // unbounded tail with empty-match guard
            let slot = self.new_scratch();
            let loop_start = self.pc();
            let split = if greedy {
                self.emit(ReOp::SplitNextFirst(0))
            } else {
                self.emit(ReOp::SplitGotoFirst(0))
            };
            self.emit(ReOp::SetPos(slot));
            self.emit_body(target, reset);
            let back = self.emit(ReOp::ProgressJump { slot, delta: 0 });
            self.patch(back, loop_start);
            let exit = self.pc();
            self.patch(split, exit);
        } else {
            // bounded optional suffix: a chain of optional copies, every
            // split escaping to the common exit
            let mut splits = Vec::new();
            for _ in 0..(max - min) {
                let split = if greedy {
                    self.emit(ReOp::SplitNextFirst(0))
                } else {
                    self.emit(ReOp::SplitGotoFirst(0))
                };
                splits.push(split);
                self.emit_body(target, reset);
            }
            let exit = self.pc();
            for split in splits {
                self.patch(split, exit);
            }
        }
    }

    /// Emit the quantifier body, clearing its capture slots at entry so a
    /// group that does not participate in this iteration reads as
    /// undefined.
    fn emit_body(&mut self, target: &Term, reset: Option<(u16, u16)>) {
        if let Some((lo, hi)) = reset {
            self.emit(ReOp::ResetCaptures {
                from: lo * 2,
                to: hi * 2 + 2,
            });
        }
        self.emit_term(target);
    }
}

/// Inclusive range of capture indices inside a term, if any.
fn capture_span(term: &Term) -> Option<(u16, u16)> {
    fn walk(term: &Term, lo: &mut Option<u16>, hi: &mut Option<u16>) {
        match term {
            Term::Group { body, capture } => {
                if let Some(index) = capture {
                    *lo = Some(lo.map_or(*index, |l| l.min(*index)));
                    *hi = Some(hi.map_or(*index, |h| h.max(*index)));
                }
                walk_disjunction(body, lo, hi);
            }
            Term::Lookahead { body, .. } => walk_disjunction(body, lo, hi),
            Term::Quantified { target, .. } => walk(target, lo, hi),
            _ => {}
        }
    }
    fn walk_disjunction(d: &Disjunction, lo: &mut Option<u16>, hi: &mut Option<u16>) {
        for alternative in &d.alternatives {
            for term in &alternative.terms {
                walk(term, lo, hi);
            }
        }
    }
    let (mut lo, mut hi) = (None, None);
    walk(term, &mut lo, &mut hi);
    match (lo, hi) {
        (Some(lo), Some(hi)) => Some((lo, hi)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn compile_str(pattern: &str, flags: RegexFlags) -> RegexProgram {
        let units: Vec<u16> = pattern.encode_utf16().collect();
        compile(&parse(&units, flags).unwrap(), flags)
    }

    #[test]
    fn test_whole_match_is_wrapped_in_saves() {
        let program = compile_str("a", RegexFlags::empty());
        assert_eq!(program.ops.first(), Some(&ReOp::Save(0)));
        assert_eq!(program.ops.last(), Some(&ReOp::Match));
        assert_eq!(program.ops[program.ops.len() - 2], ReOp::Save(1));
        assert_eq!(program.capture_count, 1);
    }

    #[test]
    fn test_capture_group_emits_save_pair() {
        let program = compile_str("(a)", RegexFlags::empty());
        assert!(program.ops.contains(&ReOp::Save(2)));
        assert!(program.ops.contains(&ReOp::Save(3)));
        assert_eq!(program.capture_count, 2);
    }

    #[test]
    fn test_non_capturing_group_emits_no_saves() {
        let program = compile_str("(?:a)", RegexFlags::empty());
        assert!(!program.ops.contains(&ReOp::Save(2)));
        assert_eq!(program.capture_count, 1);
    }

    #[test]
    fn test_star_has_progress_guard() {
        let program = compile_str("a*", RegexFlags::empty());
        assert!(program
            .ops
            .iter()
            .any(|op| matches!(op, ReOp::ProgressJump { .. })));
        assert_eq!(program.scratch_count, 1);
    }

    #[test]
    fn test_bounded_quantifier_expands() {
        let program = compile_str("a{2,4}", RegexFlags::empty());
        let chars = program
            .ops
            .iter()
            .filter(|op| matches!(op, ReOp::Char(_)))
            .count();
        assert_eq!(chars, 4);
        assert_eq!(program.scratch_count, 0);
    }

    #[test]
    fn test_ignore_case_canonicalizes_chars() {
        let program = compile_str("a", RegexFlags::IGNORE_CASE);
        assert!(program.ops.contains(&ReOp::CharCI('A' as u16)));
    }

    #[test]
    fn test_lookahead_compiles_sub_program() {
        let program = compile_str("(?!ab)", RegexFlags::empty());
        let Some(ReOp::Lookahead { body, negated: true }) = program
            .ops
            .iter()
            .find(|op| matches!(op, ReOp::Lookahead { .. }))
        else {
            panic!("expected lookahead op");
        };
        assert_eq!(body.last(), Some(&ReOp::Match));
    }

    #[test]
    fn test_quantified_capture_group_resets() {
        let program = compile_str("(a)*", RegexFlags::empty());
        assert!(program
            .ops
            .iter()
            .any(|op| matches!(op, ReOp::ResetCaptures { from: 2, to: 4 })));
    }
}
