//! String builder over 16-bit code units.

use crate::heap::Heap;
use crate::string::Fiber;
use core_types::{EngineError, StringHandle};

/// Accumulates code units and builds a string cell.
///
/// # Examples
///
/// ```
/// use memory_manager::{Heap, StringBuilder};
///
/// let mut heap = Heap::new();
/// let mut builder = StringBuilder::new();
/// builder.append_ascii("x = ");
/// builder.append_char('4');
/// let s = builder.build(&mut heap, true).unwrap();
/// assert_eq!(heap.string_to_rust(s), "x = 4");
/// ```
#[derive(Debug, Default)]
pub struct StringBuilder {
    units: Vec<u16>,
}

impl StringBuilder {
    pub fn new() -> Self {
        StringBuilder { units: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StringBuilder {
            units: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn append(&mut self, unit: u16) {
        self.units.push(unit);
    }

    pub fn append_char(&mut self, c: char) {
        let mut buf = [0u16; 2];
        self.units.extend_from_slice(c.encode_utf16(&mut buf));
    }

    /// Append an ASCII run. Debug-asserts the claim.
    pub fn append_ascii(&mut self, s: &str) {
        debug_assert!(s.is_ascii());
        self.units.extend(s.bytes().map(|b| b as u16));
    }

    pub fn append_units(&mut self, units: &[u16]) {
        self.units.extend_from_slice(units);
    }

    /// Append an existing heap string, flattening it first.
    pub fn append_string(&mut self, heap: &mut Heap, handle: StringHandle) {
        let units = heap.string_units(handle);
        self.units.extend_from_slice(&units);
    }

    /// Append a substring `[from, to)` of a heap string.
    pub fn append_substring(
        &mut self,
        heap: &mut Heap,
        handle: StringHandle,
        from: usize,
        to: usize,
    ) {
        let units = heap.string_units(handle);
        self.units.extend_from_slice(&units[from..to]);
    }

    /// Build the string. When `is_8bit_hint` is false but every appended
    /// unit is ≤ 0x7F the builder still emits 8-bit storage.
    pub fn build(self, heap: &mut Heap, is_8bit_hint: bool) -> Result<StringHandle, EngineError> {
        let fiber = if is_8bit_hint || self.units.iter().all(|&u| u <= 0x7F) {
            Fiber::from_units(&self.units)
        } else if self.units.iter().all(|&u| u <= 0xFF) {
            Fiber::Eight(self.units.iter().map(|&u| u as u8).collect())
        } else {
            Fiber::Sixteen(self.units.into())
        };
        heap.new_string_from_fiber(fiber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_appends() {
        let mut heap = Heap::new();
        let mut builder = StringBuilder::new();
        builder.append('a' as u16);
        builder.append_ascii("bc");
        builder.append_char('é');
        let s = builder.build(&mut heap, false).unwrap();
        assert_eq!(heap.string_to_rust(s), "abcé");
    }

    #[test]
    fn test_wide_hint_with_ascii_content_downgrades() {
        let mut heap = Heap::new();
        let mut builder = StringBuilder::new();
        builder.append_ascii("plain");
        let s = builder.build(&mut heap, false).unwrap();
        assert!(heap.string_is_8bit(s));
    }

    #[test]
    fn test_wide_content_stays_wide() {
        let mut heap = Heap::new();
        let mut builder = StringBuilder::new();
        builder.append(0x3042);
        let s = builder.build(&mut heap, false).unwrap();
        assert!(!heap.string_is_8bit(s));
        assert_eq!(heap.string_len(s), 1);
    }

    #[test]
    fn test_append_heap_string_and_substring() {
        let mut heap = Heap::new();
        let base = heap.new_string("hello world").unwrap();
        let mut builder = StringBuilder::new();
        builder.append_substring(&mut heap, base, 0, 5);
        builder.append_ascii("!");
        builder.append_string(&mut heap, base);
        let s = builder.build(&mut heap, true).unwrap();
        assert_eq!(heap.string_to_rust(s), "hello!hello world");
    }
}
