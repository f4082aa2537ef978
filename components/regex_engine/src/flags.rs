//! Regex compile flags.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegexFlags: u8 {
        const IGNORE_CASE = 0b001;
        const MULTILINE = 0b010;
        const GLOBAL = 0b100;
    }
}

impl RegexFlags {
    /// Parse a flag string (`"i"`, `"m"`, `"g"` in any order, no
    /// duplicates).
    pub fn parse(s: &str) -> Option<RegexFlags> {
        let mut flags = RegexFlags::empty();
        for c in s.chars() {
            let flag = match c {
                'i' => RegexFlags::IGNORE_CASE,
                'm' => RegexFlags::MULTILINE,
                'g' => RegexFlags::GLOBAL,
                _ => return None,
            };
            if flags.contains(flag) {
                return None;
            }
            flags |= flag;
        }
        Some(flags)
    }

    pub fn ignore_case(self) -> bool {
        self.contains(RegexFlags::IGNORE_CASE)
    }

    pub fn multiline(self) -> bool {
        self.contains(RegexFlags::MULTILINE)
    }

    pub fn global(self) -> bool {
        self.contains(RegexFlags::GLOBAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        assert_eq!(RegexFlags::parse(""), Some(RegexFlags::empty()));
        let gim = RegexFlags::parse("gim").unwrap();
        assert!(gim.global() && gim.ignore_case() && gim.multiline());
        assert_eq!(RegexFlags::parse("gg"), None);
        assert_eq!(RegexFlags::parse("x"), None);
    }
}
