//! String.prototype algorithms over UTF-16 code units.
//!
//! These are pure: they take code-unit slices and compiled regex programs
//! and return owned results. The engine layer owns heap allocation and
//! argument coercion.

use regex_engine::RegexProgram;

/// Whitespace and line terminators stripped by `trim`.
pub fn is_trimmed(unit: u16) -> bool {
    matches!(
        unit,
        0x0009 | 0x000A | 0x000B | 0x000C | 0x000D | 0x0020 | 0x00A0 | 0x1680
            | 0x2000..=0x200A | 0x2028 | 0x2029 | 0x202F | 0x205F | 0x3000 | 0xFEFF
    )
}

pub fn char_at(units: &[u16], index: i64) -> Vec<u16> {
    if index < 0 || index as usize >= units.len() {
        Vec::new()
    } else {
        vec![units[index as usize]]
    }
}

pub fn char_code_at(units: &[u16], index: i64) -> Option<u16> {
    if index < 0 || index as usize >= units.len() {
        None
    } else {
        Some(units[index as usize])
    }
}

pub fn index_of(units: &[u16], needle: &[u16], position: f64) -> Option<usize> {
    let from = clamp_index(position, units.len());
    if needle.is_empty() {
        return Some(from);
    }
    if needle.len() > units.len() {
        return None;
    }
    (from..=units.len() - needle.len()).find(|&i| &units[i..i + needle.len()] == needle)
}

pub fn last_index_of(units: &[u16], needle: &[u16], position: f64) -> Option<usize> {
    let from = if position.is_nan() {
        units.len()
    } else {
        clamp_index(position, units.len())
    };
    if needle.is_empty() {
        return Some(from.min(units.len()));
    }
    if needle.len() > units.len() {
        return None;
    }
    let last = from.min(units.len() - needle.len());
    (0..=last).rev().find(|&i| &units[i..i + needle.len()] == needle)
}

/// `String.prototype.slice`: negative offsets count from the end.
pub fn slice(units: &[u16], start: f64, end: f64) -> Vec<u16> {
    let len = units.len() as f64;
    let from = relative_index(start, len);
    let to = relative_index(end, len);
    if from < to {
        units[from..to].to_vec()
    } else {
        Vec::new()
    }
}

/// `String.prototype.substring`: offsets clamp and swap.
pub fn substring(units: &[u16], start: f64, end: f64) -> Vec<u16> {
    let len = units.len();
    let a = clamp_index(start, len);
    let b = clamp_index(end, len);
    let (from, to) = if a <= b { (a, b) } else { (b, a) };
    units[from..to].to_vec()
}

/// Legacy `String.prototype.substr`: negative `start` is an offset from
/// the end; `length` defaults to infinity.
pub fn substr(units: &[u16], start: f64, length: f64) -> Vec<u16> {
    let len = units.len() as f64;
    let from = if start.is_nan() {
        0.0
    } else if start < 0.0 {
        (len + start.trunc()).max(0.0)
    } else {
        start.trunc().min(len)
    };
    let count = if length.is_nan() {
        0.0
    } else {
        length.trunc().clamp(0.0, len - from)
    };
    let from = from as usize;
    units[from..from + count as usize].to_vec()
}

/// `String.prototype.repeat`. A negative count yields the empty string.
pub fn repeat(units: &[u16], count: f64) -> Vec<u16> {
    if count.is_nan() || count <= 0.0 {
        return Vec::new();
    }
    let count = count.trunc() as usize;
    let mut out = Vec::with_capacity(units.len() * count);
    for _ in 0..count {
        out.extend_from_slice(units);
    }
    out
}

/// Removes leading and trailing whitespace and line terminators.
pub fn trim(units: &[u16]) -> Vec<u16> {
    let start = units.iter().position(|&u| !is_trimmed(u)).unwrap_or(units.len());
    let end = units.iter().rposition(|&u| !is_trimmed(u)).map_or(start, |i| i + 1);
    units[start..end].to_vec()
}

pub fn concat(left: &[u16], right: &[u16]) -> Vec<u16> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    out.extend_from_slice(left);
    out.extend_from_slice(right);
    out
}

fn clamp_index(value: f64, len: usize) -> usize {
    if value.is_nan() {
        return 0;
    }
    value.trunc().clamp(0.0, len as f64) as usize
}

fn relative_index(value: f64, len: f64) -> usize {
    let v = if value.is_nan() { 0.0 } else { value.trunc() };
    if v < 0.0 {
        (len + v).max(0.0) as usize
    } else {
        v.min(len) as usize
    }
}

// ---- replace ----

#[derive(Debug, Clone, Copy, PartialEq)]
enum SubstState {
    Normal,
    Dollar,
    Digit,
    DigitZero,
}

/// Expand `$$`, `$&`, ``$` ``, `$'` and `$n`/`$nn` in a replacement
/// template. `captures` holds match offsets, slot pairs per group;
/// out-of-range references are preserved literally.
pub fn get_substitution(replacement: &[u16], input: &[u16], captures: &[i32]) -> Vec<u16> {
    let group_count = captures.len() / 2;
    let matched_start = captures[0] as usize;
    let matched_end = captures[1] as usize;
    let mut out = Vec::with_capacity(replacement.len());
    let mut state = SubstState::Normal;
    let mut upper_digit = 0u16;

    let append_group = |out: &mut Vec<u16>, n: usize| {
        let (lo, hi) = (captures[n * 2], captures[n * 2 + 1]);
        if lo != -1 && hi != -1 {
            out.extend_from_slice(&input[lo as usize..hi as usize]);
        }
    };

    for &unit in replacement {
        match state {
            SubstState::Normal => {
                if unit == '$' as u16 {
                    state = SubstState::Dollar;
                } else {
                    out.push(unit);
                }
            }
            SubstState::Dollar => match unit {
                u if u == '$' as u16 => {
                    state = SubstState::Normal;
                    out.push('$' as u16);
                }
                u if u == '&' as u16 => {
                    state = SubstState::Normal;
                    out.extend_from_slice(&input[matched_start..matched_end]);
                }
                u if u == '`' as u16 => {
                    state = SubstState::Normal;
                    out.extend_from_slice(&input[..matched_start]);
                }
                u if u == '\'' as u16 => {
                    state = SubstState::Normal;
                    out.extend_from_slice(&input[matched_end..]);
                }
                u if is_digit(u) => {
                    state = if u == '0' as u16 {
                        SubstState::DigitZero
                    } else {
                        SubstState::Digit
                    };
                    upper_digit = u;
                }
                u => {
                    state = SubstState::Normal;
                    out.push('$' as u16);
                    out.push(u);
                }
            },
            SubstState::Digit => {
                if is_digit(unit) {
                    let single = digit_value(upper_digit);
                    let twin = single * 10 + digit_value(unit);
                    if twin < group_count {
                        append_group(&mut out, twin);
                    } else if single < group_count {
                        append_group(&mut out, single);
                        out.push(unit);
                    } else {
                        out.push('$' as u16);
                        out.push(upper_digit);
                        out.push(unit);
                    }
                } else if digit_value(upper_digit) < group_count {
                    append_group(&mut out, digit_value(upper_digit));
                    out.push(unit);
                } else {
                    out.push('$' as u16);
                    out.push(upper_digit);
                    out.push(unit);
                }
                state = SubstState::Normal;
            }
            SubstState::DigitZero => {
                if is_digit(unit) {
                    let twin = digit_value(unit);
                    if twin != 0 && twin < group_count {
                        append_group(&mut out, twin);
                    } else {
                        out.push('$' as u16);
                        out.push('0' as u16);
                        out.push(unit);
                    }
                } else {
                    // $0 never refers to a group
                    out.push('$' as u16);
                    out.push('0' as u16);
                    out.push(unit);
                }
                state = SubstState::Normal;
            }
        }
    }

    match state {
        SubstState::Dollar => out.push('$' as u16),
        SubstState::Digit => {
            let single = digit_value(upper_digit);
            if single < group_count {
                append_group(&mut out, single);
            } else {
                out.push('$' as u16);
                out.push(upper_digit);
            }
        }
        SubstState::DigitZero => {
            out.push('$' as u16);
            out.push('0' as u16);
        }
        SubstState::Normal => {}
    }
    out
}

fn is_digit(unit: u16) -> bool {
    ('0' as u16..='9' as u16).contains(&unit)
}

fn digit_value(unit: u16) -> usize {
    (unit - '0' as u16) as usize
}

/// Regex replace with a replacement callback receiving the capture array.
/// Honours the global flag, advancing past empty matches.
pub fn replace_regex_with<F>(input: &[u16], program: &RegexProgram, mut replacer: F) -> Vec<u16>
where
    F: FnMut(&[i32]) -> Vec<u16>,
{
    let mut out = Vec::with_capacity(input.len());
    if program.flags.global() {
        let mut previous = 0usize;
        let mut not_matched = 0usize;
        while previous <= input.len() {
            let Some(captures) = program.search(input, previous) else {
                break;
            };
            let start = captures[0] as usize;
            let end = captures[1] as usize;
            out.extend_from_slice(&input[not_matched..start]);
            not_matched = end;
            previous = if previous == end { end + 1 } else { end };
            out.extend_from_slice(&replacer(&captures));
        }
        out.extend_from_slice(&input[not_matched..]);
    } else if let Some(captures) = program.search(input, 0) {
        out.extend_from_slice(&input[..captures[0] as usize]);
        out.extend_from_slice(&replacer(&captures));
        out.extend_from_slice(&input[captures[1] as usize..]);
    } else {
        out.extend_from_slice(input);
    }
    out
}

/// Regex replace with a `$`-template.
pub fn replace_regex(input: &[u16], program: &RegexProgram, template: &[u16]) -> Vec<u16> {
    replace_regex_with(input, program, |captures| {
        get_substitution(template, input, captures)
    })
}

/// String-pattern replace: first occurrence only, `$` substitutions apply
/// with the match as group 0.
pub fn replace_string(input: &[u16], pattern: &[u16], template: &[u16]) -> Vec<u16> {
    match index_of(input, pattern, 0.0) {
        None => input.to_vec(),
        Some(at) => {
            let captures = [at as i32, (at + pattern.len()) as i32];
            let mut out = Vec::with_capacity(input.len());
            out.extend_from_slice(&input[..at]);
            out.extend_from_slice(&get_substitution(template, input, &captures));
            out.extend_from_slice(&input[at + pattern.len()..]);
            out
        }
    }
}

// ---- split ----

/// Regex split per ECMAScript semantics: capture groups participate in the
/// output (`None` when a group did not match).
pub fn split_with_regex(
    input: &[u16],
    program: &RegexProgram,
    limit: u32,
) -> Vec<Option<Vec<u16>>> {
    let mut out: Vec<Option<Vec<u16>>> = Vec::new();
    if limit == 0 {
        return out;
    }
    if input.is_empty() {
        if program.match_at(input, 0).is_none() {
            out.push(Some(Vec::new()));
        }
        return out;
    }
    let size = input.len();
    let mut p = 0usize;
    let mut q = 0usize;
    while q < size {
        let Some(captures) = program.match_at(input, q) else {
            q += 1;
            continue;
        };
        let e = captures[1] as usize;
        if e == p {
            q += 1;
            continue;
        }
        out.push(Some(input[p..q].to_vec()));
        if out.len() == limit as usize {
            return out;
        }
        for group in 1..captures.len() / 2 {
            let (lo, hi) = (captures[group * 2], captures[group * 2 + 1]);
            out.push(if lo < 0 {
                None
            } else {
                Some(input[lo as usize..hi as usize].to_vec())
            });
            if out.len() == limit as usize {
                return out;
            }
        }
        p = e;
        q = e;
    }
    out.push(Some(input[p..].to_vec()));
    out
}

// ---- case conversion ----

/// Result of the locale case hook for one code unit.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseMapping {
    /// Replace with a single code point.
    Map(u32),
    /// Drop the unit entirely.
    Remove,
    /// Replace with an explicit sequence, up to 4 UTF-16 units.
    Expand(Vec<u16>),
}

/// Pure locale hook consulted before the default mapping. `prev`/`next`
/// give one unit of context.
pub type LocaleCaseHook =
    fn(locale: &str, unit: u16, prev: Option<u16>, next: Option<u16>, upper: bool) -> Option<CaseMapping>;

/// Locale mappings for Turkish and Azerbaijani dotted/dotless i.
pub fn default_locale_hook(
    locale: &str,
    unit: u16,
    _prev: Option<u16>,
    _next: Option<u16>,
    upper: bool,
) -> Option<CaseMapping> {
    let lang = locale.split(['-', '_']).next().unwrap_or(locale);
    if lang != "tr" && lang != "az" {
        return None;
    }
    if upper && unit == 'i' as u16 {
        return Some(CaseMapping::Map(0x0130)); // İ
    }
    if !upper {
        if unit == 'I' as u16 {
            return Some(CaseMapping::Map(0x0131)); // ı
        }
        if unit == 0x0130 {
            return Some(CaseMapping::Map('i' as u32));
        }
    }
    None
}

pub fn to_upper_case(units: &[u16], locale: Option<&str>, hook: LocaleCaseHook) -> Vec<u16> {
    convert_case(units, locale, hook, true)
}

pub fn to_lower_case(units: &[u16], locale: Option<&str>, hook: LocaleCaseHook) -> Vec<u16> {
    convert_case(units, locale, hook, false)
}

fn convert_case(
    units: &[u16],
    locale: Option<&str>,
    hook: LocaleCaseHook,
    upper: bool,
) -> Vec<u16> {
    let mut out = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let unit = units[i];
        if let Some(locale) = locale {
            let prev = if i > 0 { Some(units[i - 1]) } else { None };
            let next = units.get(i + 1).copied();
            if let Some(mapping) = hook(locale, unit, prev, next, upper) {
                match mapping {
                    CaseMapping::Map(cp) => push_code_point(&mut out, cp),
                    CaseMapping::Remove => {}
                    CaseMapping::Expand(seq) => {
                        debug_assert!(seq.len() <= 4);
                        out.extend_from_slice(&seq);
                    }
                }
                i += 1;
                continue;
            }
        }
        // default mapping; surrogate pairs convert as a single code point
        let (cp, consumed) = decode_unit(units, i);
        match char::from_u32(cp) {
            Some(c) => {
                if upper {
                    for mapped in c.to_uppercase() {
                        push_code_point(&mut out, mapped as u32);
                    }
                } else {
                    for mapped in c.to_lowercase() {
                        push_code_point(&mut out, mapped as u32);
                    }
                }
            }
            None => out.push(unit),
        }
        i += consumed;
    }
    out
}

fn decode_unit(units: &[u16], i: usize) -> (u32, usize) {
    let unit = units[i];
    if (0xD800..0xDC00).contains(&unit) {
        if let Some(&low) = units.get(i + 1) {
            if (0xDC00..0xE000).contains(&low) {
                let cp = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                return (cp, 2);
            }
        }
    }
    (unit as u32, 1)
}

fn push_code_point(out: &mut Vec<u16>, cp: u32) {
    if let Some(c) = char::from_u32(cp) {
        let mut buf = [0u16; 2];
        out.extend_from_slice(c.encode_utf16(&mut buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex_engine::{compile_pattern, RegexFlags};

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn text(units: &[u16]) -> String {
        String::from_utf16(units).unwrap()
    }

    fn program(pattern: &str, flags: &str) -> RegexProgram {
        compile_pattern(&units(pattern), RegexFlags::parse(flags).unwrap()).unwrap()
    }

    #[test]
    fn test_index_of() {
        let s = units("abcabc");
        assert_eq!(index_of(&s, &units("b"), 0.0), Some(1));
        assert_eq!(index_of(&s, &units("b"), 2.0), Some(4));
        assert_eq!(index_of(&s, &units("zz"), 0.0), None);
        assert_eq!(index_of(&s, &units(""), 3.0), Some(3));
    }

    #[test]
    fn test_last_index_of() {
        let s = units("abcabc");
        assert_eq!(last_index_of(&s, &units("b"), f64::NAN), Some(4));
        assert_eq!(last_index_of(&s, &units("b"), 3.0), Some(1));
    }

    #[test]
    fn test_slice_and_substring() {
        let s = units("hello");
        assert_eq!(text(&slice(&s, 1.0, 3.0)), "el");
        assert_eq!(text(&slice(&s, -3.0, f64::INFINITY)), "llo");
        assert_eq!(text(&slice(&s, 3.0, 1.0)), "");
        // substring swaps its arguments
        assert_eq!(text(&substring(&s, 3.0, 1.0)), "el");
        assert_eq!(text(&substring(&s, -2.0, 2.0)), "he");
    }

    #[test]
    fn test_substr_legacy() {
        let s = units("hello");
        assert_eq!(text(&substr(&s, 1.0, 3.0)), "ell");
        assert_eq!(text(&substr(&s, -3.0, f64::INFINITY)), "llo");
        assert_eq!(text(&substr(&s, -100.0, 2.0)), "he");
        assert_eq!(text(&substr(&s, 2.0, f64::INFINITY)), "llo");
    }

    #[test]
    fn test_repeat_negative_is_empty() {
        let s = units("ab");
        assert_eq!(text(&repeat(&s, 3.0)), "ababab");
        assert_eq!(text(&repeat(&s, -1.0)), "");
        assert_eq!(text(&repeat(&s, 0.0)), "");
    }

    #[test]
    fn test_trim() {
        assert_eq!(text(&trim(&units("  \t\nx y\u{2028} "))), "x y");
        assert_eq!(text(&trim(&units("\u{00A0}\u{FEFF}"))), "");
    }

    #[test]
    fn test_char_access() {
        let s = units("ab");
        assert_eq!(text(&char_at(&s, 1)), "b");
        assert_eq!(char_at(&s, 2), Vec::<u16>::new());
        assert_eq!(char_code_at(&s, 0), Some('a' as u16));
        assert_eq!(char_code_at(&s, -1), None);
    }

    #[test]
    fn test_substitution_patterns() {
        // S3: "Java123".replace(/(\w+?)(\d+)/, "$2-$1") => "123-Java"
        let input = units("Java123");
        let p = program(r"(\w+?)(\d+)", "");
        let out = replace_regex(&input, &p, &units("$2-$1"));
        assert_eq!(text(&out), "123-Java");
    }

    #[test]
    fn test_substitution_special_dollars() {
        let input = units("abcd");
        let p = program("bc", "");
        assert_eq!(text(&replace_regex(&input, &p, &units("[$&]"))), "a[bc]d");
        assert_eq!(text(&replace_regex(&input, &p, &units("[$`]"))), "a[a]d");
        assert_eq!(text(&replace_regex(&input, &p, &units("[$']"))), "a[d]d");
        assert_eq!(text(&replace_regex(&input, &p, &units("$$"))), "a$d");
    }

    #[test]
    fn test_substitution_out_of_range_is_literal() {
        let input = units("ab");
        let p = program("(a)", "");
        assert_eq!(text(&replace_regex(&input, &p, &units("$2"))), "$2b");
        assert_eq!(text(&replace_regex(&input, &p, &units("$1x"))), "axb");
        // $12 falls back to $1 followed by '2' when there is no group 12
        assert_eq!(text(&replace_regex(&input, &p, &units("$12"))), "a2b");
        // trailing dollar stays literal
        assert_eq!(text(&replace_regex(&input, &p, &units("x$"))), "x$b");
    }

    #[test]
    fn test_global_replace_advances_on_empty_match() {
        let input = units("abc");
        let p = program("x*", "g");
        let out = replace_regex(&input, &p, &units("-"));
        // matches the empty string at every position
        assert_eq!(text(&out), "-a-b-c-");
    }

    #[test]
    fn test_replace_with_function() {
        let input = units("a1b2");
        let p = program(r"\d", "g");
        let out = replace_regex_with(&input, &p, |caps| {
            let d = input[caps[0] as usize];
            vec![d, d]
        });
        assert_eq!(text(&out), "a11b22");
    }

    #[test]
    fn test_replace_string_pattern() {
        let input = units("1+1=2");
        assert_eq!(text(&replace_string(&input, &units("+"), &units("-"))), "1-1=2");
        // only the first occurrence
        assert_eq!(text(&replace_string(&input, &units("1"), &units("9"))), "9+1=2");
        assert_eq!(
            text(&replace_string(&input, &units("="), &units("[$&$`]"))),
            "1+1[=1+1]2"
        );
        assert_eq!(text(&replace_string(&input, &units("zz"), &units("x"))), "1+1=2");
    }

    #[test]
    fn test_split_with_regex_includes_captures() {
        let input = units("a1b2c");
        let p = program(r"(\d)", "");
        let parts = split_with_regex(&input, &p, u32::MAX);
        let parts: Vec<Option<String>> =
            parts.iter().map(|p| p.as_ref().map(|u| text(u))).collect();
        assert_eq!(
            parts,
            vec![
                Some("a".into()),
                Some("1".into()),
                Some("b".into()),
                Some("2".into()),
                Some("c".into())
            ]
        );
    }

    #[test]
    fn test_split_with_regex_undefined_groups() {
        let input = units("ab");
        let p = program("(x)|b", "");
        let parts = split_with_regex(&input, &p, u32::MAX);
        assert_eq!(parts.len(), 3);
        assert!(parts[1].is_none());
    }

    #[test]
    fn test_split_empty_input() {
        let p = program(",", "");
        let parts = split_with_regex(&[], &p, u32::MAX);
        assert_eq!(parts, vec![Some(Vec::new())]);

        // a pattern matching the empty string yields an empty list
        let p = program("x*", "");
        assert!(split_with_regex(&[], &p, u32::MAX).is_empty());
    }

    #[test]
    fn test_split_limit() {
        let input = units("a,b,c");
        let p = program(",", "");
        let parts = split_with_regex(&input, &p, 2);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_case_conversion_default() {
        assert_eq!(text(&to_upper_case(&units("abÇ"), None, default_locale_hook)), "ABÇ");
        assert_eq!(text(&to_lower_case(&units("ABÇ"), None, default_locale_hook)), "abç");
    }

    #[test]
    fn test_case_conversion_expands_in_place() {
        // ß uppercases to SS
        assert_eq!(text(&to_upper_case(&units("straße"), None, default_locale_hook)), "STRASSE");
    }

    #[test]
    fn test_case_conversion_turkish_locale() {
        assert_eq!(
            text(&to_upper_case(&units("i"), Some("tr"), default_locale_hook)),
            "\u{0130}"
        );
        assert_eq!(
            text(&to_lower_case(&units("I"), Some("tr-TR"), default_locale_hook)),
            "\u{0131}"
        );
        // other locales keep the default mapping
        assert_eq!(text(&to_upper_case(&units("i"), Some("en"), default_locale_hook)), "I");
    }

    #[test]
    fn test_case_conversion_surrogate_pairs_pass_through() {
        // Deseret small letter long i uppercases within the astral plane
        let input: Vec<u16> = "\u{10428}".encode_utf16().collect();
        let out = to_upper_case(&input, None, default_locale_hook);
        assert_eq!(text(&out), "\u{10400}");
    }
}
