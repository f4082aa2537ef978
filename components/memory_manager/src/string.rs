//! Rope strings: flat fibers and cords.
//!
//! A string cell is either a flat fiber (8-bit or 16-bit storage) or a cord,
//! a binary node over two child strings with cached length and 8-bit-ness.
//! Concatenation builds cords without copying; `Heap::flatten` materializes
//! a cord into a single fiber in place and is idempotent.

use crate::cell::{CellRef, Trace, Tracer};
use core_types::StringHandle;

/// Flat character storage. 8-bit fibers hold Latin-1 code units; 16-bit
/// fibers hold UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fiber {
    Eight(Box<[u8]>),
    Sixteen(Box<[u16]>),
}

impl Fiber {
    /// Build a fiber from UTF-16 units, choosing 8-bit storage when every
    /// unit fits.
    pub fn from_units(units: &[u16]) -> Fiber {
        if units.iter().all(|&u| u <= 0xFF) {
            Fiber::Eight(units.iter().map(|&u| u as u8).collect())
        } else {
            Fiber::Sixteen(units.into())
        }
    }

    pub fn from_str(s: &str) -> Fiber {
        if s.is_ascii() {
            Fiber::Eight(s.as_bytes().into())
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            Fiber::from_units(&units)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Fiber::Eight(b) => b.len(),
            Fiber::Sixteen(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_8bit(&self) -> bool {
        matches!(self, Fiber::Eight(_))
    }

    pub fn at(&self, index: usize) -> u16 {
        match self {
            Fiber::Eight(b) => b[index] as u16,
            Fiber::Sixteen(w) => w[index],
        }
    }

    /// The UTF-16 view of this fiber.
    pub fn units(&self) -> Vec<u16> {
        match self {
            Fiber::Eight(b) => b.iter().map(|&c| c as u16).collect(),
            Fiber::Sixteen(w) => w.to_vec(),
        }
    }

    pub fn to_rust_string(&self) -> String {
        match self {
            Fiber::Eight(b) => b.iter().map(|&c| c as char).collect(),
            Fiber::Sixteen(w) => String::from_utf16_lossy(w),
        }
    }
}

/// A string cell: flat fiber or cord.
#[derive(Debug)]
pub enum StringCell {
    Flat(Fiber),
    Cord {
        left: StringHandle,
        right: StringHandle,
        len: u32,
        is_8bit: bool,
    },
}

impl StringCell {
    pub fn len(&self) -> usize {
        match self {
            StringCell::Flat(f) => f.len(),
            StringCell::Cord { len, .. } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True iff every leaf under this cell is 8-bit.
    pub fn is_8bit(&self) -> bool {
        match self {
            StringCell::Flat(f) => f.is_8bit(),
            StringCell::Cord { is_8bit, .. } => *is_8bit,
        }
    }
}

impl Trace for StringCell {
    fn trace(&self, tracer: &mut Tracer) {
        if let StringCell::Cord { left, right, .. } = self {
            tracer.edge(CellRef::String(*left));
            tracer.edge(CellRef::String(*right));
        }
    }
}
