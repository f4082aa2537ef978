//! RFC 5646 language-tag scanner.
//!
//! Accepts `langtag | privateuse | grandfathered` and records the parsed
//! components. The scanner validates the ABNF only; it does not consult
//! subtag registries.

use rustc_hash::FxHashMap;

/// Grandfathered tags that do not match the `langtag` production.
const IRREGULAR: [&str; 17] = [
    "en-GB-oed",
    "i-ami",
    "i-bnn",
    "i-default",
    "i-enochian",
    "i-hak",
    "i-klingon",
    "i-lux",
    "i-mingo",
    "i-navajo",
    "i-pwn",
    "i-tao",
    "i-tay",
    "i-tsu",
    "sgn-BE-FR",
    "sgn-BE-NL",
    "sgn-CH-DE",
];

/// Grandfathered tags that match `langtag` but carry registered meanings.
const REGULAR: [&str; 9] = [
    "art-lojban",
    "cel-gaulish",
    "no-bok",
    "no-nyn",
    "zh-guoyu",
    "zh-hakka",
    "zh-min",
    "zh-min-nan",
    "zh-xiang",
];

/// Classification of a grandfathered tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grandfathered {
    Irregular,
    Regular,
}

/// A scanned language tag.
#[derive(Debug, Clone, Default)]
pub struct LanguageTag {
    pub well_formed: bool,
    pub grandfathered: Option<Grandfathered>,
    pub language: String,
    pub extlang: Vec<String>,
    pub script: String,
    pub region: String,
    pub variants: Vec<String>,
    /// Extensions keyed by singleton, in scan order per singleton.
    pub extensions: FxHashMap<char, Vec<String>>,
    pub privateuse: Vec<String>,
}

/// Scan a candidate tag.
pub fn scan(source: &str) -> LanguageTag {
    let mut scanner = Scanner::new(source);
    scanner.verify();
    scanner.result
}

const EOS: i32 = -1;

struct Scanner<'a> {
    source: &'a [u8],
    /// Index one past the current character.
    pos: usize,
    c: i32,
    /// Case-insensitive singleton uniqueness: digits and both letter cases
    /// fold into a shared id space.
    unique: u64,
    result: LanguageTag,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Scanner {
            source: source.as_bytes(),
            pos: 0,
            c: EOS,
            unique: 0,
            result: LanguageTag::default(),
        }
    }

    fn verify(&mut self) {
        self.init(0);
        if self.scan_langtag(0) {
            self.result.well_formed = true;
            return;
        }
        self.clear();
        self.init(0);
        if self.scan_privateuse(0) && self.is_eos() {
            self.result.well_formed = true;
            return;
        }
        self.clear();
        if let Some(kind) = grandfathered_kind(std::str::from_utf8(self.source).unwrap_or("")) {
            self.result.well_formed = true;
            self.result.grandfathered = Some(kind);
        }
    }

    fn clear(&mut self) {
        self.result = LanguageTag::default();
        self.unique = 0;
    }

    // cursor

    fn init(&mut self, pos: usize) {
        self.pos = pos;
        self.advance();
    }

    fn advance(&mut self) {
        if self.pos == self.source.len() {
            self.c = EOS;
        } else {
            self.c = self.source[self.pos] as i32;
            self.pos += 1;
        }
    }

    fn current(&self) -> usize {
        if self.pos == self.source.len() && self.c != EOS {
            return self.pos;
        }
        if self.c == EOS {
            self.source.len()
        } else {
            self.pos - 1
        }
    }

    fn is_eos(&self) -> bool {
        self.c < 0
    }

    /// A subtag boundary: end of string or a following dash.
    fn maybe_valid(&self) -> bool {
        self.is_eos() || self.c == '-' as i32
    }

    fn text(&self, from: usize, to: usize) -> String {
        String::from_utf8_lossy(&self.source[from..to]).into_owned()
    }

    /// `-` then the next subtag, or end of input. Returns false when the
    /// production must stop and the caller should check EOS.
    fn expect_next_tag(&mut self) -> bool {
        if self.c != '-' as i32 {
            return false;
        }
        self.advance();
        true
    }

    // productions

    fn scan_langtag(&mut self, restore: usize) -> bool {
        // langtag = language ["-" script] ["-" region] *("-" variant)
        //           *("-" extension) ["-" privateuse]
        if !self.scan_language(restore) {
            self.init(restore);
            return false;
        }

        let mut restore2 = self.current();
        if !self.expect_next_tag() {
            return self.is_eos();
        }
        self.scan_script(restore2);

        restore2 = self.current();
        if !self.expect_next_tag() {
            return self.is_eos();
        }
        self.scan_region(restore2);

        // a failed scan restores the cursor to the pending dash, so each
        // section re-consumes it
        restore2 = self.current();
        if !self.expect_next_tag() {
            return self.is_eos();
        }
        while self.scan_variant(restore2) {
            restore2 = self.current();
            if !self.expect_next_tag() {
                return self.is_eos();
            }
        }

        restore2 = self.current();
        if !self.expect_next_tag() {
            return self.is_eos();
        }
        while self.scan_extension(restore2) {
            restore2 = self.current();
            if !self.expect_next_tag() {
                return self.is_eos();
            }
        }

        restore2 = self.current();
        if !self.expect_next_tag() {
            return self.is_eos();
        }
        self.scan_privateuse(restore2);
        if !self.is_eos() {
            self.init(restore);
            return false;
        }
        true
    }

    fn scan_language(&mut self, restore: usize) -> bool {
        // language = 2*3ALPHA ["-" extlang] / 4ALPHA / 5*8ALPHA
        let restore2 = self.current();
        if self.expect_language_first() {
            return true;
        }

        self.init(restore2);
        if self.expect_alpha(4) && self.maybe_valid() {
            self.result.language = self.text(restore2, self.current());
            return true;
        }

        self.init(restore2);
        if !self.expect_alpha(5) {
            self.init(restore);
            return false;
        }
        for _ in 0..3 {
            if self.is_eos() || !is_alpha(self.c) {
                break;
            }
            self.advance();
        }
        if !self.maybe_valid() {
            self.init(restore);
            return false;
        }
        self.result.language = self.text(restore2, self.current());
        true
    }

    fn expect_language_first(&mut self) -> bool {
        // 2*3ALPHA ["-" extlang], extlang = 3ALPHA *2("-" 3ALPHA)
        let start = self.current();
        if !self.expect_alpha(2) {
            return false;
        }
        if !self.is_eos() && is_alpha(self.c) {
            self.advance();
        }

        let mut restore = self.current();
        self.result.language = self.text(start, restore);

        if self.c != '-' as i32 {
            return self.is_eos();
        }
        self.advance();

        {
            let s = self.current();
            if !self.expect_alpha(3) || !self.maybe_valid() {
                self.init(restore);
                return true;
            }
            restore = self.current();
            let text = self.text(s, restore);
            self.result.extlang.push(text);
        }

        for _ in 0..2 {
            if self.c != '-' as i32 {
                debug_assert!(self.is_eos());
                return true;
            }
            self.advance();
            let s = self.current();
            if !self.expect_alpha(3) || !self.maybe_valid() {
                self.init(restore);
                return true;
            }
            restore = self.current();
            let text = self.text(s, restore);
            self.result.extlang.push(text);
        }
        true
    }

    fn scan_script(&mut self, restore: usize) -> bool {
        // script = 4ALPHA
        let s = self.current();
        if !self.expect_alpha(4) || !self.maybe_valid() {
            self.init(restore);
            return false;
        }
        self.result.script = self.text(s, self.current());
        true
    }

    fn scan_region(&mut self, restore: usize) -> bool {
        // region = 2ALPHA / 3DIGIT
        let restore2 = self.current();
        if self.expect_alpha(2) && self.maybe_valid() {
            self.result.region = self.text(restore2, self.current());
            return true;
        }

        self.init(restore2);
        for _ in 0..3 {
            if self.is_eos() || !is_digit(self.c) {
                self.init(restore);
                return false;
            }
            self.advance();
        }
        if !self.maybe_valid() {
            self.init(restore);
            return false;
        }
        self.result.region = self.text(restore2, self.current());
        true
    }

    fn scan_variant(&mut self, restore: usize) -> bool {
        // variant = 5*8alphanum / (DIGIT 3alphanum)
        let restore2 = self.current();
        if self.expect_alphanum(5) {
            for _ in 0..3 {
                if self.is_eos() || !is_alphanum(self.c) {
                    break;
                }
                self.advance();
            }
            if self.maybe_valid() {
                let text = self.text(restore2, self.current());
                self.result.variants.push(text);
                return true;
            }
        }

        self.init(restore2);
        if self.is_eos() || !is_digit(self.c) {
            self.init(restore);
            return false;
        }
        self.advance();
        if !self.expect_alphanum(3) || !self.maybe_valid() {
            self.init(restore);
            return false;
        }
        let text = self.text(restore2, self.current());
        self.result.variants.push(text);
        true
    }

    fn scan_extension(&mut self, restore: usize) -> bool {
        // extension = singleton 1*("-" (2*8alphanum)); "x" is reserved
        if self.is_eos() || !is_alphanum(self.c) || self.c == 'x' as i32 || self.c == 'X' as i32 {
            self.init(restore);
            return false;
        }
        let target = self.c as u8 as char;
        let id = singleton_id(target);
        if self.unique & (1 << id) != 0 {
            self.init(restore);
            return false;
        }
        self.advance();

        let mut s = self.pos;
        if !self.expect_extension_or_private_following(2) {
            self.init(restore);
            return false;
        }

        self.unique |= 1 << id;
        let text = self.text(s, self.current());
        self.result.extensions.entry(target).or_default().push(text);
        loop {
            let restore2 = self.current();
            s = self.pos;
            if !self.expect_extension_or_private_following(2) {
                self.init(restore2);
                return true;
            }
            let text = self.text(s, self.current());
            self.result.extensions.entry(target).or_default().push(text);
        }
    }

    fn scan_privateuse(&mut self, restore: usize) -> bool {
        // privateuse = "x" 1*("-" (1*8alphanum))
        if self.c != 'x' as i32 && self.c != 'X' as i32 {
            self.init(restore);
            return false;
        }
        self.advance();

        let mut s = self.pos;
        if !self.expect_extension_or_private_following(1) {
            self.init(restore);
            return false;
        }

        let text = self.text(s, self.current());
        self.result.privateuse.push(text);
        loop {
            let restore2 = self.current();
            s = self.pos;
            if !self.expect_extension_or_private_following(1) {
                self.init(restore2);
                return true;
            }
            let text = self.text(s, self.current());
            self.result.privateuse.push(text);
        }
    }

    fn expect_extension_or_private_following(&mut self, n: usize) -> bool {
        if self.c != '-' as i32 {
            return false;
        }
        self.advance();
        if !self.expect_alphanum(n) {
            return false;
        }
        for _ in 0..(8 - n) {
            if self.is_eos() || !is_alphanum(self.c) {
                break;
            }
            self.advance();
        }
        self.maybe_valid()
    }

    fn expect_alphanum(&mut self, n: usize) -> bool {
        for _ in 0..n {
            if self.is_eos() || !is_alphanum(self.c) {
                return false;
            }
            self.advance();
        }
        true
    }

    fn expect_alpha(&mut self, n: usize) -> bool {
        for _ in 0..n {
            if self.is_eos() || !is_alpha(self.c) {
                return false;
            }
            self.advance();
        }
        true
    }
}

/// Singleton id, 0..61: digits, then letters. Upper and lower case fold to
/// the same id, making extension uniqueness case-insensitive.
fn singleton_id(c: char) -> u32 {
    debug_assert!(c.is_ascii_alphanumeric());
    if c.is_ascii_digit() {
        return c as u32 - '0' as u32;
    }
    c.to_ascii_lowercase() as u32 - 'a' as u32 + 10
}

fn grandfathered_kind(tag: &str) -> Option<Grandfathered> {
    if IRREGULAR.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
        return Some(Grandfathered::Irregular);
    }
    if REGULAR.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
        return Some(Grandfathered::Regular);
    }
    None
}

fn is_alpha(c: i32) -> bool {
    (c >= 'a' as i32 && c <= 'z' as i32) || (c >= 'A' as i32 && c <= 'Z' as i32)
}

fn is_digit(c: i32) -> bool {
    c >= '0' as i32 && c <= '9' as i32
}

fn is_alphanum(c: i32) -> bool {
    is_alpha(c) || is_digit(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_language() {
        let tag = scan("en");
        assert!(tag.well_formed);
        assert_eq!(tag.language, "en");
    }

    #[test]
    fn test_full_langtag() {
        let tag = scan("zh-cmn-Hans-CN-pinyin-u-co-phonebk-x-private");
        assert!(tag.well_formed);
        assert_eq!(tag.language, "zh");
        assert_eq!(tag.extlang, vec!["cmn"]);
        assert_eq!(tag.script, "Hans");
        assert_eq!(tag.region, "CN");
        assert_eq!(tag.variants, vec!["pinyin"]);
        assert_eq!(tag.extensions.get(&'u'), Some(&vec!["co".to_string(), "phonebk".to_string()]));
        assert_eq!(tag.privateuse, vec!["private"]);
    }

    #[test]
    fn test_numeric_region() {
        let tag = scan("es-419");
        assert!(tag.well_formed);
        assert_eq!(tag.region, "419");
    }

    #[test]
    fn test_digit_variant() {
        let tag = scan("de-CH-1996");
        assert!(tag.well_formed);
        assert_eq!(tag.variants, vec!["1996"]);
    }

    #[test]
    fn test_privateuse_only() {
        let tag = scan("x-whatever-abc");
        assert!(tag.well_formed);
        assert!(tag.language.is_empty());
        assert_eq!(tag.privateuse, vec!["whatever", "abc"]);
    }

    #[test]
    fn test_grandfathered_irregular() {
        // S5
        let tag = scan("i-klingon");
        assert!(tag.well_formed);
        assert_eq!(tag.grandfathered, Some(Grandfathered::Irregular));
    }

    #[test]
    fn test_grandfathered_regular() {
        let tag = scan("zh-min-nan");
        assert!(tag.well_formed);
        assert_eq!(tag.grandfathered, Some(Grandfathered::Regular));
    }

    #[test]
    fn test_duplicate_singleton_rejected() {
        assert!(scan("en-a-bbb-ccc").well_formed);
        assert!(!scan("en-a-bbb-a-ccc").well_formed);
    }

    #[test]
    fn test_singleton_uniqueness_is_case_insensitive() {
        assert!(!scan("en-a-bbb-A-ccc").well_formed);
    }

    #[test]
    fn test_x_not_a_singleton() {
        // "x" introduces private use, not an extension
        let tag = scan("en-x-foo");
        assert!(tag.well_formed);
        assert!(tag.extensions.is_empty());
        assert_eq!(tag.privateuse, vec!["foo"]);
    }

    #[test]
    fn test_malformed_tags() {
        assert!(!scan("").well_formed);
        assert!(!scan("a").well_formed);
        assert!(!scan("en--US").well_formed);
        assert!(!scan("123").well_formed);
        assert!(!scan("en-a").well_formed);
        assert!(!scan("x-").well_formed);
        assert!(!scan("toolonglanguage").well_formed);
    }

    #[test]
    fn test_four_alpha_language() {
        let tag = scan("abcd");
        assert!(tag.well_formed);
        assert_eq!(tag.language, "abcd");
    }

    #[test]
    fn test_long_language() {
        let tag = scan("abcdefgh");
        assert!(tag.well_formed);
        assert_eq!(tag.language, "abcdefgh");
    }
}
