//! Cell headers and the tracing contract.
//!
//! Every heap-managed object is a cell: a slot with a small header carrying
//! the kind discriminator, the mark bit and the intrusive free-list link.
//! Cells declare their outgoing edges to the collector through [`Trace`].

use core_types::{ObjectHandle, StringHandle, Value};

/// Discriminator for the cell families the heap manages.
///
/// Each kind maps to one size class: all cells of a kind share a slot size
/// and live in blocks dedicated to that class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    String,
    Object,
    Environment,
}

/// Header present on every slot.
#[derive(Debug, Clone, Copy)]
pub struct CellHeader {
    pub kind: CellKind,
    pub marked: bool,
    /// Link to the next free slot in the owning block, when this slot is on
    /// the free list.
    pub next_free: Option<u32>,
}

impl CellHeader {
    pub fn new(kind: CellKind) -> Self {
        CellHeader {
            kind,
            marked: false,
            next_free: None,
        }
    }
}

/// A typed reference discovered while tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRef {
    String(StringHandle),
    Object(ObjectHandle),
    Environment(EnvHandle),
}

/// Handle to an environment cell. Environments never appear as values; they
/// are reached through function cells and activation frames only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvHandle(pub u32);

/// Collects the outgoing edges of a cell during marking.
pub struct Tracer {
    worklist: Vec<CellRef>,
}

impl Tracer {
    pub(crate) fn new() -> Self {
        Tracer {
            worklist: Vec::new(),
        }
    }

    pub fn edge(&mut self, r: CellRef) {
        self.worklist.push(r);
    }

    /// Record a value edge; only string and object values refer to cells.
    pub fn value(&mut self, v: Value) {
        if v.is_string() {
            self.worklist.push(CellRef::String(v.as_string()));
        } else if v.is_object() {
            self.worklist.push(CellRef::Object(v.as_object()));
        }
    }

    pub(crate) fn pop(&mut self) -> Option<CellRef> {
        self.worklist.pop()
    }
}

/// Implemented by every cell body; enumerates the cell's outgoing edges.
pub trait Trace {
    fn trace(&self, tracer: &mut Tracer);
}
