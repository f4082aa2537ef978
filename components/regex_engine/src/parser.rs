//! Recursive-descent regex parser over UTF-16 code units.
//!
//! Grammar: `disjunction ::= alternative ('|' alternative)*`;
//! `alternative ::= term*`; `term ::= assertion | atom quantifier?`;
//! `atom ::= '.' | character | escape | class | '(' disjunction ')' |
//! '(?:' … ')' | '(?=' … ')' | '(?!' … ')'`.

use crate::flags::RegexFlags;
use crate::range_builder::{CharRange, RangeBuilder};
use thiserror::Error;

/// Patterns above this size are rejected outright.
pub const MAX_PATTERN_SIZE: usize = 1024 * 1024;

/// Marker for an unbounded quantifier maximum.
pub const QUANT_INFINITY: u32 = u32::MAX;

const EOS: i32 = -1;
const ZWNJ: u16 = 0x200C;
const ZWJ: u16 = 0x200D;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegexError {
    #[error("unexpected character in pattern")]
    UnexpectedCharacter,
    #[error("number in pattern is too big")]
    NumberTooBig,
    #[error("invalid character range in class")]
    InvalidRange,
    #[error("invalid quantifier")]
    InvalidQuantifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disjunction {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// `^`
    LineStart,
    /// `$`
    LineEnd,
    /// `\b` / `\B`
    WordBoundary { invert: bool },
    /// `(?=…)` / `(?!…)`
    Lookahead { body: Disjunction, negated: bool },
    /// `(…)` / `(?:…)`; capture index is assigned left-to-right by opening
    /// paren, starting at 1.
    Group {
        body: Disjunction,
        capture: Option<u16>,
    },
    Char(u16),
    Class {
        invert: bool,
        ranges: Vec<CharRange>,
    },
    BackReference(u16),
    Quantified {
        target: Box<Term>,
        min: u32,
        max: u32,
        greedy: bool,
    },
}

/// A parsed pattern: the AST plus the number of capture slots including the
/// whole-match group 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPattern {
    pub body: Disjunction,
    pub capture_count: u16,
}

/// Parse a pattern.
pub fn parse(source: &[u16], flags: RegexFlags) -> Result<ParsedPattern, RegexError> {
    if source.len() > MAX_PATTERN_SIZE {
        return Err(RegexError::UnexpectedCharacter);
    }
    let mut parser = Parser::new(source, flags);
    let body = parser.parse_disjunction(EOS)?;
    if parser.c != EOS {
        return Err(RegexError::UnexpectedCharacter);
    }
    Ok(ParsedPattern {
        body,
        capture_count: parser.captures + 1,
    })
}

struct Parser<'a> {
    flags: RegexFlags,
    source: &'a [u16],
    pos: usize,
    c: i32,
    captures: u16,
}

impl<'a> Parser<'a> {
    fn new(source: &'a [u16], flags: RegexFlags) -> Self {
        let mut parser = Parser {
            flags,
            source,
            pos: 0,
            c: EOS,
            captures: 0,
        };
        parser.advance();
        parser
    }

    fn advance(&mut self) {
        if self.pos == self.source.len() {
            self.c = EOS;
        } else {
            self.c = self.source[self.pos] as i32;
            self.pos += 1;
        }
    }

    fn push_back(&mut self) {
        if self.pos < 2 {
            self.c = EOS;
        } else {
            self.c = self.source[self.pos - 2] as i32;
            self.pos -= 1;
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), RegexError> {
        if self.c != ch as i32 {
            return Err(RegexError::UnexpectedCharacter);
        }
        self.advance();
        Ok(())
    }

    fn parse_disjunction(&mut self, end: i32) -> Result<Disjunction, RegexError> {
        let mut alternatives = vec![self.parse_alternative(end)?];
        while self.c == '|' as i32 {
            self.advance();
            alternatives.push(self.parse_alternative(end)?);
        }
        Ok(Disjunction { alternatives })
    }

    fn parse_alternative(&mut self, end: i32) -> Result<Alternative, RegexError> {
        let mut terms = Vec::new();
        while self.c >= 0 && self.c != '|' as i32 && self.c != end {
            let mut atom = false;
            let target = match self.c {
                c if c == '^' as i32 => {
                    self.advance();
                    Term::LineStart
                }
                c if c == '$' as i32 => {
                    self.advance();
                    Term::LineEnd
                }
                c if c == '(' as i32 => {
                    self.advance();
                    atom = true;
                    if self.c == '?' as i32 {
                        self.advance();
                        if self.c == '=' as i32 {
                            self.advance();
                            let body = self.parse_disjunction(')' as i32)?;
                            self.expect(')')?;
                            Term::Lookahead {
                                body,
                                negated: false,
                            }
                        } else if self.c == '!' as i32 {
                            self.advance();
                            let body = self.parse_disjunction(')' as i32)?;
                            self.expect(')')?;
                            Term::Lookahead {
                                body,
                                negated: true,
                            }
                        } else if self.c == ':' as i32 {
                            self.advance();
                            let body = self.parse_disjunction(')' as i32)?;
                            self.expect(')')?;
                            Term::Group {
                                body,
                                capture: None,
                            }
                        } else {
                            return Err(RegexError::UnexpectedCharacter);
                        }
                    } else {
                        // capture index assigned by opening paren order
                        self.captures += 1;
                        let index = self.captures;
                        let body = self.parse_disjunction(')' as i32)?;
                        self.expect(')')?;
                        Term::Group {
                            body,
                            capture: Some(index),
                        }
                    }
                }
                c if c == '.' as i32 => {
                    self.advance();
                    atom = true;
                    Term::Class {
                        invert: false,
                        ranges: RangeBuilder::escape_class_ranges('.'),
                    }
                }
                c if c == '\\' as i32 => {
                    self.advance();
                    if self.c == 'b' as i32 {
                        self.advance();
                        Term::WordBoundary { invert: false }
                    } else if self.c == 'B' as i32 {
                        self.advance();
                        Term::WordBoundary { invert: true }
                    } else {
                        atom = true;
                        self.parse_atom_escape()?
                    }
                }
                c if c == '[' as i32 => {
                    atom = true;
                    self.parse_character_class()?
                }
                _ => {
                    if !is_pattern_character(self.c) {
                        return Err(RegexError::UnexpectedCharacter);
                    }
                    atom = true;
                    let unit = self.c as u16;
                    self.advance();
                    Term::Char(unit)
                }
            };
            let target = if atom && is_quantifier_prefix_start(self.c) {
                self.parse_quantifier(target)?
            } else {
                target
            };
            terms.push(target);
        }
        Ok(Alternative { terms })
    }

    fn parse_atom_escape(&mut self) -> Result<Term, RegexError> {
        match self.c {
            c if c == 'f' as i32 => {
                self.advance();
                Ok(Term::Char(0x0C))
            }
            c if c == 'n' as i32 => {
                self.advance();
                Ok(Term::Char(0x0A))
            }
            c if c == 'r' as i32 => {
                self.advance();
                Ok(Term::Char(0x0D))
            }
            c if c == 't' as i32 => {
                self.advance();
                Ok(Term::Char(0x09))
            }
            c if c == 'v' as i32 => {
                self.advance();
                Ok(Term::Char(0x0B))
            }
            c if c == 'c' as i32 => {
                // control letter
                self.advance();
                if !is_ascii_alpha(self.c) {
                    return Err(RegexError::UnexpectedCharacter);
                }
                let unit = (self.c as u16) % 32;
                self.advance();
                Ok(Term::Char(unit))
            }
            c if c == 'x' as i32 => {
                self.advance();
                let unit = self.parse_hex_escape(2)?;
                Ok(Term::Char(unit))
            }
            c if c == 'u' as i32 => {
                self.advance();
                let unit = self.parse_hex_escape(4)?;
                Ok(Term::Char(unit))
            }
            c if c == ZWNJ as i32 => {
                self.advance();
                Ok(Term::Char(ZWNJ))
            }
            c if c == ZWJ as i32 => {
                self.advance();
                Ok(Term::Char(ZWJ))
            }
            c if c == 'd' as i32
                || c == 'D' as i32
                || c == 's' as i32
                || c == 'S' as i32
                || c == 'w' as i32
                || c == 'W' as i32 =>
            {
                let class = self.c as u8 as char;
                self.advance();
                Ok(Term::Class {
                    invert: false,
                    ranges: RangeBuilder::escape_class_ranges(class),
                })
            }
            c if c == '0' as i32 => {
                self.advance();
                Ok(Term::Char(0))
            }
            c if ('1' as i32..='9' as i32).contains(&c) => {
                let numeric = self.parse_decimal_integer()?;
                let reference = numeric as u16;
                if reference as f64 != numeric {
                    return Err(RegexError::NumberTooBig);
                }
                Ok(Term::BackReference(reference))
            }
            c => {
                if is_identifier_part(c) || c < 0 {
                    Err(RegexError::UnexpectedCharacter)
                } else {
                    let unit = c as u16;
                    self.advance();
                    Ok(Term::Char(unit))
                }
            }
        }
    }

    fn parse_hex_escape(&mut self, len: usize) -> Result<u16, RegexError> {
        let mut result: u16 = 0;
        for i in 0..len {
            let digit = hex_value(self.c);
            match digit {
                Some(d) => {
                    result = result * 16 + d as u16;
                    self.advance();
                }
                None => {
                    for _ in 0..i {
                        self.push_back();
                    }
                    return Err(RegexError::UnexpectedCharacter);
                }
            }
        }
        Ok(result)
    }

    fn parse_decimal_integer(&mut self) -> Result<f64, RegexError> {
        debug_assert!(is_decimal_digit(self.c));
        let mut result = 0.0f64;
        while self.c >= 0 && is_decimal_digit(self.c) {
            result = result * 10.0 + (self.c - '0' as i32) as f64;
            if result > 1e18 {
                return Err(RegexError::NumberTooBig);
            }
            self.advance();
        }
        Ok(result)
    }

    fn parse_character_class(&mut self) -> Result<Term, RegexError> {
        debug_assert_eq!(self.c, '[' as i32);
        self.advance();
        let mut ranges = RangeBuilder::new(self.flags.ignore_case());
        let invert = self.c == '^' as i32;
        if invert {
            self.advance();
        }
        while self.c >= 0 && self.c != ']' as i32 {
            let (ranged1, start) = self.parse_class_atom()?;
            if self.c == '-' as i32 {
                // ClassAtom - ClassAtom ClassRanges
                self.advance();
                if self.c < 0 {
                    return Err(RegexError::UnexpectedCharacter);
                } else if self.c == ']' as i32 {
                    ranges.add_or_escaped(ranged1, start);
                    ranges.add('-' as u16, false);
                    break;
                } else {
                    let (ranged2, last) = self.parse_class_atom()?;
                    if ranged1 != 0 || ranged2 != 0 {
                        // an escape class cannot bound a range; the dash is
                        // literal
                        ranges.add_or_escaped(ranged1, start);
                        ranges.add('-' as u16, false);
                        ranges.add_or_escaped(ranged2, last);
                    } else {
                        if !RangeBuilder::is_valid_range(start, last) {
                            return Err(RegexError::InvalidRange);
                        }
                        ranges.add_range(start, last, true);
                    }
                }
            } else {
                ranges.add_or_escaped(ranged1, start);
            }
        }
        self.expect(']')?;
        Ok(Term::Class {
            invert,
            ranges: ranges.finish(),
        })
    }

    /// Parse one class atom. Returns `(ranged, unit)`: `ranged` is a
    /// `dDsSwW` escape-class letter, or 0 when `unit` is a plain code unit.
    fn parse_class_atom(&mut self) -> Result<(u16, u16), RegexError> {
        if self.c != '\\' as i32 {
            let unit = self.c as u16;
            self.advance();
            return Ok((0, unit));
        }
        self.advance();
        match self.c {
            c if c == 'w' as i32
                || c == 'W' as i32
                || c == 'd' as i32
                || c == 'D' as i32
                || c == 's' as i32
                || c == 'S' as i32 =>
            {
                let class = self.c as u16;
                self.advance();
                Ok((class, 0))
            }
            c if c == 'f' as i32 => {
                self.advance();
                Ok((0, 0x0C))
            }
            c if c == 'n' as i32 => {
                self.advance();
                Ok((0, 0x0A))
            }
            c if c == 'r' as i32 => {
                self.advance();
                Ok((0, 0x0D))
            }
            c if c == 't' as i32 => {
                self.advance();
                Ok((0, 0x09))
            }
            c if c == 'v' as i32 => {
                self.advance();
                Ok((0, 0x0B))
            }
            c if c == 'c' as i32 => {
                self.advance();
                if !is_ascii_alpha(self.c) {
                    return Err(RegexError::UnexpectedCharacter);
                }
                let unit = (self.c as u16) % 32;
                self.advance();
                Ok((0, unit))
            }
            c if c == 'x' as i32 => {
                self.advance();
                Ok((0, self.parse_hex_escape(2)?))
            }
            c if c == 'u' as i32 => {
                self.advance();
                Ok((0, self.parse_hex_escape(4)?))
            }
            c if c == ZWNJ as i32 => {
                self.advance();
                Ok((0, ZWNJ))
            }
            c if c == ZWJ as i32 => {
                self.advance();
                Ok((0, ZWJ))
            }
            c if is_decimal_digit(c) => {
                let numeric = self.parse_decimal_integer()?;
                let unit = numeric as u16;
                if unit as f64 != numeric {
                    return Err(RegexError::NumberTooBig);
                }
                Ok((0, unit))
            }
            c => {
                if is_identifier_part(c) || c < 0 {
                    Err(RegexError::UnexpectedCharacter)
                } else {
                    let unit = c as u16;
                    self.advance();
                    Ok((0, unit))
                }
            }
        }
    }

    fn parse_quantifier(&mut self, target: Term) -> Result<Term, RegexError> {
        let (min, max) = match self.c {
            c if c == '*' as i32 => {
                self.advance();
                (0, QUANT_INFINITY)
            }
            c if c == '+' as i32 => {
                self.advance();
                (1, QUANT_INFINITY)
            }
            c if c == '?' as i32 => {
                self.advance();
                (0, 1)
            }
            c if c == '{' as i32 => {
                self.advance();
                if !is_decimal_digit(self.c) {
                    return Err(RegexError::UnexpectedCharacter);
                }
                let numeric1 = self.parse_decimal_integer()?;
                let min = if numeric1 >= QUANT_INFINITY as f64 {
                    QUANT_INFINITY
                } else {
                    numeric1 as u32
                };
                let max;
                if self.c == ',' as i32 {
                    self.advance();
                    if self.c == '}' as i32 {
                        max = QUANT_INFINITY;
                    } else {
                        if !is_decimal_digit(self.c) {
                            return Err(RegexError::UnexpectedCharacter);
                        }
                        let numeric2 = self.parse_decimal_integer()?;
                        max = if numeric2 >= QUANT_INFINITY as f64 {
                            QUANT_INFINITY
                        } else {
                            numeric2 as u32
                        };
                    }
                } else if self.c == '}' as i32 {
                    max = min;
                } else {
                    return Err(RegexError::UnexpectedCharacter);
                }
                self.expect('}')?;
                (min, max)
            }
            _ => return Err(RegexError::UnexpectedCharacter),
        };
        if max < min {
            return Err(RegexError::InvalidQuantifier);
        }
        // trailing '?' flips greediness unless the quantifier is exact
        let mut greedy = true;
        if self.c == '?' as i32 {
            self.advance();
            if max != min {
                greedy = false;
            }
        }
        if min == 1 && max == 1 {
            return Ok(target);
        }
        Ok(Term::Quantified {
            target: Box::new(target),
            min,
            max,
            greedy,
        })
    }
}

fn is_pattern_character(c: i32) -> bool {
    if c < 0 {
        return false;
    }
    !matches!(
        c as u16 as u8 as char,
        '^' | '$' | '\\' | '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|'
    ) || c > 0x7F
}

fn is_quantifier_prefix_start(c: i32) -> bool {
    c == '*' as i32 || c == '+' as i32 || c == '?' as i32 || c == '{' as i32
}

fn is_decimal_digit(c: i32) -> bool {
    ('0' as i32..='9' as i32).contains(&c)
}

fn is_ascii_alpha(c: i32) -> bool {
    ('a' as i32..='z' as i32).contains(&c) || ('A' as i32..='Z' as i32).contains(&c)
}

fn is_identifier_part(c: i32) -> bool {
    is_ascii_alpha(c) || is_decimal_digit(c) || c == '_' as i32 || c == '$' as i32
}

fn hex_value(c: i32) -> Option<u8> {
    match c {
        c if is_decimal_digit(c) => Some((c - '0' as i32) as u8),
        c if ('a' as i32..='f' as i32).contains(&c) => Some((c - 'a' as i32 + 10) as u8),
        c if ('A' as i32..='F' as i32).contains(&c) => Some((c - 'A' as i32 + 10) as u8),
        _ => None,
    }
}
