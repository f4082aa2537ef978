//! The garbage-collected heap.
//!
//! One typed arena per cell kind; each arena is a list of fixed-slot blocks
//! with block-local free lists. Collection is stop-the-world mark-sweep:
//! roots are supplied by the caller at a safepoint, marking follows each
//! cell's declared edges, and sweeping walks blocks in address order.

use crate::block::{slots_per_block, Block};
use crate::cell::{CellKind, CellRef, EnvHandle, Trace, Tracer};
use crate::hidden_class::{PropertyAttributes, ShapeRegistry};
use crate::object::{
    ClassTag, JsEnvironment, JsObject, PropertyDescriptor, PropertySlot,
};
use crate::string::{Fiber, StringCell};
use core_types::{EngineError, ObjectHandle, StringHandle, Symbol, Value};
use std::cmp::Ordering;
use tracing::debug;

/// Aggregate collection statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub collections: u64,
    pub cells_freed: u64,
    pub live_cells: usize,
}

struct Arena<T: Trace> {
    kind: CellKind,
    blocks: Vec<Block<T>>,
    /// Blocks known to have a free slot, most recently freed last.
    non_full: Vec<u32>,
    slots_per_block: u32,
    live: usize,
}

impl<T: Trace> Arena<T> {
    fn new(kind: CellKind) -> Self {
        Arena {
            kind,
            blocks: Vec::new(),
            non_full: Vec::new(),
            slots_per_block: slots_per_block(std::mem::size_of::<T>().max(1)),
            live: 0,
        }
    }

    /// Allocate from a block with a non-empty free list; request a new
    /// block only when every block of the class is full.
    fn allocate(&mut self, body: T) -> u32 {
        while let Some(&block_index) = self.non_full.last() {
            if !self.blocks[block_index as usize].has_free_slot() {
                // stale entry from a previous cycle
                self.non_full.pop();
                continue;
            }
            let block = &mut self.blocks[block_index as usize];
            let slot = block.allocate(body).expect("block has a free slot");
            if !block.has_free_slot() {
                self.non_full.pop();
            }
            self.live += 1;
            return block_index * self.slots_per_block + slot;
        }
        self.allocate_slow(body)
    }

    fn allocate_slow(&mut self, body: T) -> u32 {
        let block_index = self.blocks.len() as u32;
        let mut block = Block::new(self.kind, self.slots_per_block);
        let slot = block.allocate(body).expect("fresh block has free slots");
        if block.has_free_slot() {
            self.non_full.push(block_index);
        }
        self.blocks.push(block);
        self.live += 1;
        block_index * self.slots_per_block + slot
    }

    fn get(&self, index: u32) -> &T {
        let (block, slot) = (index / self.slots_per_block, index % self.slots_per_block);
        self.blocks[block as usize]
            .get(slot)
            .expect("stale cell handle")
    }

    fn get_mut(&mut self, index: u32) -> &mut T {
        let (block, slot) = (index / self.slots_per_block, index % self.slots_per_block);
        self.blocks[block as usize]
            .get_mut(slot)
            .expect("stale cell handle")
    }

    fn mark(&mut self, index: u32) -> bool {
        let (block, slot) = (index / self.slots_per_block, index % self.slots_per_block);
        self.blocks[block as usize].mark(slot)
    }

    /// Sweep every block in address order. Returns cells freed.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        self.non_full.clear();
        for (block_index, block) in self.blocks.iter_mut().enumerate() {
            freed += block.sweep();
            if block.has_free_slot() {
                self.non_full.push(block_index as u32);
            }
        }
        self.live -= freed;
        freed
    }
}

/// Outcome of a prototype-chain property read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyLookup {
    Data(Value),
    /// Accessor slot found; the caller invokes the getter with the receiver.
    Accessor { get: Option<Value> },
    NotFound,
}

/// Outcome of a prototype-chain property write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PutOutcome {
    Done,
    /// Inherited or own setter; the caller invokes it with the receiver.
    CallSetter(Value),
    /// Rejected by writability or extensibility. TypeError when strict.
    Rejected,
}

/// The engine heap.
pub struct Heap {
    strings: Arena<StringCell>,
    objects: Arena<JsObject>,
    environments: Arena<JsEnvironment>,
    pub shapes: ShapeRegistry,
    allocated_since_gc: usize,
    gc_threshold: usize,
    hard_limit: usize,
    stats: GcStats,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            strings: Arena::new(CellKind::String),
            objects: Arena::new(CellKind::Object),
            environments: Arena::new(CellKind::Environment),
            shapes: ShapeRegistry::new(),
            allocated_since_gc: 0,
            gc_threshold: 64 * 1024,
            hard_limit: 16 * 1024 * 1024,
            stats: GcStats::default(),
        }
    }

    fn bump(&mut self) -> Result<(), EngineError> {
        if self.total_live() >= self.hard_limit {
            return Err(EngineError::OutOfMemory);
        }
        self.allocated_since_gc += 1;
        Ok(())
    }

    fn total_live(&self) -> usize {
        self.strings.live + self.objects.live + self.environments.live
    }

    /// True when enough cells were allocated since the last cycle that the
    /// VM should collect at its next safepoint.
    pub fn needs_collection(&self) -> bool {
        self.allocated_since_gc >= self.gc_threshold
    }

    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.gc_threshold = threshold;
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            live_cells: self.total_live(),
            ..self.stats
        }
    }

    // ---- strings ----

    pub fn new_string(&mut self, s: &str) -> Result<StringHandle, EngineError> {
        self.new_string_from_fiber(Fiber::from_str(s))
    }

    pub fn new_string_from_units(&mut self, units: &[u16]) -> Result<StringHandle, EngineError> {
        self.new_string_from_fiber(Fiber::from_units(units))
    }

    pub fn new_string_from_fiber(&mut self, fiber: Fiber) -> Result<StringHandle, EngineError> {
        self.bump()?;
        Ok(StringHandle(self.strings.allocate(StringCell::Flat(fiber))))
    }

    /// Concatenate without copying: builds a cord over the operands. Empty
    /// operands short-circuit.
    pub fn concat_strings(
        &mut self,
        left: StringHandle,
        right: StringHandle,
    ) -> Result<StringHandle, EngineError> {
        let (left_len, left_8bit) = {
            let cell = self.strings.get(left.0);
            (cell.len(), cell.is_8bit())
        };
        let (right_len, right_8bit) = {
            let cell = self.strings.get(right.0);
            (cell.len(), cell.is_8bit())
        };
        if left_len == 0 {
            return Ok(right);
        }
        if right_len == 0 {
            return Ok(left);
        }
        self.bump()?;
        Ok(StringHandle(self.strings.allocate(StringCell::Cord {
            left,
            right,
            len: (left_len + right_len) as u32,
            is_8bit: left_8bit && right_8bit,
        })))
    }

    pub fn string_len(&self, handle: StringHandle) -> usize {
        self.strings.get(handle.0).len()
    }

    pub fn string_is_8bit(&self, handle: StringHandle) -> bool {
        self.strings.get(handle.0).is_8bit()
    }

    /// Code unit at `index` without flattening: O(depth) on cords.
    pub fn string_at(&self, handle: StringHandle, index: usize) -> u16 {
        let mut current = handle;
        let mut index = index;
        loop {
            match self.strings.get(current.0) {
                StringCell::Flat(fiber) => return fiber.at(index),
                StringCell::Cord { left, right, .. } => {
                    let left_len = self.strings.get(left.0).len();
                    if index < left_len {
                        current = *left;
                    } else {
                        index -= left_len;
                        current = *right;
                    }
                }
            }
        }
    }

    /// Materialize a cord into a single flat fiber, in place. Flat strings
    /// are returned as-is, so flattening is idempotent and memoized.
    pub fn flatten(&mut self, handle: StringHandle) -> &Fiber {
        let is_flat = matches!(self.strings.get(handle.0), StringCell::Flat(_));
        if !is_flat {
            let mut units = Vec::with_capacity(self.string_len(handle));
            // iterative in-order walk over the cord tree
            let mut stack = vec![handle];
            while let Some(current) = stack.pop() {
                match self.strings.get(current.0) {
                    StringCell::Flat(fiber) => match fiber {
                        Fiber::Eight(bytes) => units.extend(bytes.iter().map(|&b| b as u16)),
                        Fiber::Sixteen(words) => units.extend_from_slice(words),
                    },
                    StringCell::Cord { left, right, .. } => {
                        stack.push(*right);
                        stack.push(*left);
                    }
                }
            }
            *self.strings.get_mut(handle.0) = StringCell::Flat(Fiber::from_units(&units));
        }
        match self.strings.get(handle.0) {
            StringCell::Flat(fiber) => fiber,
            StringCell::Cord { .. } => unreachable!("cord was flattened above"),
        }
    }

    /// UTF-16 view of the string, flattening first.
    pub fn string_units(&mut self, handle: StringHandle) -> Vec<u16> {
        self.flatten(handle).units()
    }

    pub fn string_to_rust(&mut self, handle: StringHandle) -> String {
        self.flatten(handle).to_rust_string()
    }

    /// Content equality over flattened views.
    pub fn string_eq(&mut self, a: StringHandle, b: StringHandle) -> bool {
        if a == b {
            return true;
        }
        if self.string_len(a) != self.string_len(b) {
            return false;
        }
        let a_units = self.string_units(a);
        let b_units = self.string_units(b);
        a_units == b_units
    }

    /// Value hash: strings hash by flattened content, everything else by
    /// bit pattern, so equal values hash equally across representations.
    pub fn hash_value(&mut self, value: Value) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        if value.is_string() {
            self.string_units(value.as_string()).hash(&mut hasher);
        } else {
            value.bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Lexicographic ordering over UTF-16 code units.
    pub fn string_cmp(&mut self, a: StringHandle, b: StringHandle) -> Ordering {
        let a_units = self.string_units(a);
        let b_units = self.string_units(b);
        a_units.cmp(&b_units)
    }

    pub fn substring(
        &mut self,
        handle: StringHandle,
        from: usize,
        to: usize,
    ) -> Result<StringHandle, EngineError> {
        let units = self.string_units(handle);
        let to = to.min(units.len());
        let from = from.min(to);
        self.new_string_from_units(&units[from..to])
    }

    /// First occurrence of `pattern` at or after `from`.
    pub fn string_find(
        &mut self,
        handle: StringHandle,
        pattern: StringHandle,
        from: usize,
    ) -> Option<usize> {
        let haystack = self.string_units(handle);
        let needle = self.string_units(pattern);
        find_units(&haystack, &needle, from)
    }

    /// Last occurrence of `pattern` starting at or before `from`.
    pub fn string_rfind(
        &mut self,
        handle: StringHandle,
        pattern: StringHandle,
        from: usize,
    ) -> Option<usize> {
        let haystack = self.string_units(handle);
        let needle = self.string_units(pattern);
        rfind_units(&haystack, &needle, from)
    }

    /// Split by a separator string, up to `limit` pieces.
    ///
    /// `"".split("")` is empty; an empty separator otherwise yields the
    /// input's code units.
    pub fn string_split(
        &mut self,
        handle: StringHandle,
        separator: StringHandle,
        limit: u32,
    ) -> Result<Vec<StringHandle>, EngineError> {
        let input = self.string_units(handle);
        let sep = self.string_units(separator);
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        if sep.is_empty() {
            // "".split("") => []
            for unit in input.iter().take(limit as usize) {
                out.push(self.new_string_from_units(&[*unit])?);
            }
            return Ok(out);
        }
        let mut start = 0;
        let mut pos = 0;
        while pos + sep.len() <= input.len() {
            if input[pos..pos + sep.len()] == sep[..] {
                out.push(self.new_string_from_units(&input[start..pos])?);
                if out.len() == limit as usize {
                    return Ok(out);
                }
                pos += sep.len();
                start = pos;
            } else {
                pos += 1;
            }
        }
        out.push(self.new_string_from_units(&input[start..])?);
        Ok(out)
    }

    // ---- objects ----

    pub fn new_object(
        &mut self,
        class: ClassTag,
        prototype: Option<ObjectHandle>,
    ) -> Result<ObjectHandle, EngineError> {
        self.bump()?;
        let shape = self.shapes.root();
        Ok(ObjectHandle(
            self.objects.allocate(JsObject::new(shape, class, prototype)),
        ))
    }

    pub fn object(&self, handle: ObjectHandle) -> &JsObject {
        self.objects.get(handle.0)
    }

    pub fn object_mut(&mut self, handle: ObjectHandle) -> &mut JsObject {
        self.objects.get_mut(handle.0)
    }

    pub fn new_environment(
        &mut self,
        values: Vec<Value>,
        parent: Option<EnvHandle>,
    ) -> Result<EnvHandle, EngineError> {
        self.bump()?;
        Ok(EnvHandle(
            self.environments.allocate(JsEnvironment { values, parent }),
        ))
    }

    pub fn environment(&self, handle: EnvHandle) -> &JsEnvironment {
        self.environments.get(handle.0)
    }

    pub fn environment_mut(&mut self, handle: EnvHandle) -> &mut JsEnvironment {
        self.environments.get_mut(handle.0)
    }

    /// Property read along the prototype chain. Accessor results are
    /// returned to the caller, which invokes the getter with the receiver.
    pub fn get_property(&self, object: ObjectHandle, key: Symbol) -> PropertyLookup {
        let mut current = object;
        loop {
            let obj = self.objects.get(current.0);
            if let Some(own) = obj.get_own(key) {
                return match own.value {
                    PropertySlot::Data(v) => PropertyLookup::Data(v),
                    PropertySlot::Accessor { get, .. } => PropertyLookup::Accessor { get },
                };
            }
            match obj.prototype() {
                Some(proto) => current = proto,
                None => return PropertyLookup::NotFound,
            }
        }
    }

    /// Property write. Assigns into an existing own data slot, reports a
    /// setter to call, or adds a new own property (shape transition).
    pub fn set_property(
        &mut self,
        object: ObjectHandle,
        key: Symbol,
        value: Value,
    ) -> PutOutcome {
        // own property first
        if let Some(own) = self.objects.get(object.0).get_own(key) {
            match own.value {
                PropertySlot::Data(_) => {
                    if !own.attributes.is_writable() {
                        return PutOutcome::Rejected;
                    }
                    self.objects
                        .get_mut(object.0)
                        .set_slot_value(own.slot, PropertySlot::Data(value));
                    return PutOutcome::Done;
                }
                PropertySlot::Accessor { set, .. } => {
                    return match set {
                        Some(setter) => PutOutcome::CallSetter(setter),
                        None => PutOutcome::Rejected,
                    };
                }
            }
        }
        // inherited accessors and read-only data properties block the write
        let mut current = self.objects.get(object.0).prototype();
        while let Some(proto) = current {
            let obj = self.objects.get(proto.0);
            if let Some(own) = obj.get_own(key) {
                match own.value {
                    PropertySlot::Accessor { set, .. } => {
                        return match set {
                            Some(setter) => PutOutcome::CallSetter(setter),
                            None => PutOutcome::Rejected,
                        };
                    }
                    PropertySlot::Data(_) => {
                        if !own.attributes.is_writable() {
                            return PutOutcome::Rejected;
                        }
                        break;
                    }
                }
            }
            current = obj.prototype();
        }
        if !self.objects.get(object.0).is_extensible() {
            return PutOutcome::Rejected;
        }
        let registry = &self.shapes;
        self.objects.get_mut(object.0).add_property(
            registry,
            key,
            PropertyAttributes::plain_data(),
            PropertySlot::Data(value),
        );
        PutOutcome::Done
    }

    pub fn define_own_property(
        &mut self,
        object: ObjectHandle,
        key: Symbol,
        desc: &PropertyDescriptor,
    ) -> bool {
        let registry = &self.shapes;
        self.objects
            .get_mut(object.0)
            .define_own_property(registry, key, desc)
    }

    pub fn delete_property(&mut self, object: ObjectHandle, key: Symbol) -> bool {
        let registry = &self.shapes;
        self.objects.get_mut(object.0).delete(registry, key)
    }

    // ---- collection ----

    /// Stop-the-world mark-sweep. `roots` are value roots (register file,
    /// globals, constants); `cell_roots` are typed roots such as frame
    /// environments and intrinsic objects.
    pub fn collect(&mut self, roots: &[Value], cell_roots: &[CellRef]) {
        let mut tracer = Tracer::new();
        for v in roots {
            tracer.value(*v);
        }
        for r in cell_roots {
            tracer.edge(*r);
        }
        while let Some(r) = tracer.pop() {
            match r {
                CellRef::String(h) => {
                    if self.strings.mark(h.0) {
                        self.strings.get(h.0).trace(&mut tracer);
                    }
                }
                CellRef::Object(h) => {
                    if self.objects.mark(h.0) {
                        self.objects.get(h.0).trace(&mut tracer);
                    }
                }
                CellRef::Environment(h) => {
                    if self.environments.mark(h.0) {
                        self.environments.get(h.0).trace(&mut tracer);
                    }
                }
            }
        }
        let freed =
            self.strings.sweep() + self.objects.sweep() + self.environments.sweep();
        self.stats.collections += 1;
        self.stats.cells_freed += freed as u64;
        self.allocated_since_gc = 0;
        debug!(freed, live = self.total_live(), "gc cycle complete");
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn find_units(haystack: &[u16], needle: &[u16], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn rfind_units(haystack: &[u16], needle: &[u16], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    let last = from.min(haystack.len() - needle.len());
    (0..=last).rev().find(|&i| &haystack[i..i + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intern(heap: &mut Heap, s: &str) -> StringHandle {
        heap.new_string(s).unwrap()
    }

    #[test]
    fn test_concat_builds_cord_and_flattens() {
        let mut heap = Heap::new();
        let hello = intern(&mut heap, "hello ");
        let world = intern(&mut heap, "world");
        let joined = heap.concat_strings(hello, world).unwrap();

        assert_eq!(heap.string_len(joined), 11);
        assert_eq!(heap.string_at(joined, 6), 'w' as u16);
        assert_eq!(heap.string_to_rust(joined), "hello world");
        // flattening is idempotent
        let len_after = heap.flatten(joined).len();
        assert_eq!(len_after, 11);
        assert_eq!(heap.string_to_rust(joined), "hello world");
    }

    #[test]
    fn test_concat_with_empty_short_circuits() {
        let mut heap = Heap::new();
        let empty = intern(&mut heap, "");
        let x = intern(&mut heap, "x");
        assert_eq!(heap.concat_strings(empty, x).unwrap(), x);
        assert_eq!(heap.concat_strings(x, empty).unwrap(), x);
    }

    #[test]
    fn test_cord_is_8bit_iff_all_leaves_are() {
        let mut heap = Heap::new();
        let ascii = intern(&mut heap, "abc");
        let wide = intern(&mut heap, "日本");
        let mixed = heap.concat_strings(ascii, wide).unwrap();
        let narrow = heap.concat_strings(ascii, ascii).unwrap();
        assert!(!heap.string_is_8bit(mixed));
        assert!(heap.string_is_8bit(narrow));
    }

    #[test]
    fn test_string_eq_and_cmp_on_flattened_views() {
        let mut heap = Heap::new();
        let a1 = intern(&mut heap, "ab");
        let a = intern(&mut heap, "a");
        let b = intern(&mut heap, "b");
        let a2 = heap.concat_strings(a, b).unwrap();
        assert!(heap.string_eq(a1, a2));
        let c = intern(&mut heap, "ac");
        assert_eq!(heap.string_cmp(a1, c), Ordering::Less);
    }

    #[test]
    fn test_hash_value_by_content_for_strings() {
        let mut heap = Heap::new();
        let a1 = intern(&mut heap, "same");
        let a2 = intern(&mut heap, "same");
        let b = intern(&mut heap, "other");
        assert_eq!(
            heap.hash_value(Value::from_string(a1)),
            heap.hash_value(Value::from_string(a2))
        );
        assert_ne!(
            heap.hash_value(Value::from_string(a1)),
            heap.hash_value(Value::from_string(b))
        );
        // non-strings hash by bit pattern
        assert_eq!(
            heap.hash_value(Value::from_i32(5)),
            heap.hash_value(Value::from_i32(5))
        );
        assert_ne!(
            heap.hash_value(Value::from_i32(5)),
            heap.hash_value(Value::from_f64(5.0))
        );
    }

    #[test]
    fn test_find_and_rfind() {
        let mut heap = Heap::new();
        let s = intern(&mut heap, "abcabc");
        let needle = intern(&mut heap, "bc");
        assert_eq!(heap.string_find(s, needle, 0), Some(1));
        assert_eq!(heap.string_find(s, needle, 2), Some(4));
        assert_eq!(heap.string_rfind(s, needle, 5), Some(4));
        assert_eq!(heap.string_rfind(s, needle, 3), Some(1));
    }

    #[test]
    fn test_split_semantics() {
        let mut heap = Heap::new();
        let ab = intern(&mut heap, "ab");
        let empty = intern(&mut heap, "");

        // "ab".split("") => ["a", "b"]
        let parts = heap.string_split(ab, empty, u32::MAX).unwrap();
        let parts: Vec<String> = parts.iter().map(|&h| heap.string_to_rust(h)).collect();
        assert_eq!(parts, vec!["a", "b"]);

        // "".split("") => []
        let parts = heap.string_split(empty, empty, u32::MAX).unwrap();
        assert!(parts.is_empty());

        let csv = intern(&mut heap, "a,b,,c");
        let comma = intern(&mut heap, ",");
        let parts = heap.string_split(csv, comma, u32::MAX).unwrap();
        let parts: Vec<String> = parts.iter().map(|&h| heap.string_to_rust(h)).collect();
        assert_eq!(parts, vec!["a", "b", "", "c"]);
    }

    #[test]
    fn test_property_chain_lookup() {
        let mut heap = Heap::new();
        let proto = heap.new_object(ClassTag::Object, None).unwrap();
        let obj = heap.new_object(ClassTag::Object, Some(proto)).unwrap();
        let key = Symbol::Index(1);

        assert_eq!(heap.get_property(obj, key), PropertyLookup::NotFound);
        assert_eq!(heap.set_property(proto, key, Value::from_i32(5)), PutOutcome::Done);
        assert_eq!(heap.get_property(obj, key), PropertyLookup::Data(Value::from_i32(5)));

        // shadowing write creates an own property
        assert_eq!(heap.set_property(obj, key, Value::from_i32(6)), PutOutcome::Done);
        assert_eq!(heap.get_property(obj, key), PropertyLookup::Data(Value::from_i32(6)));
        assert_eq!(heap.get_property(proto, key), PropertyLookup::Data(Value::from_i32(5)));
    }

    #[test]
    fn test_set_rejected_by_readonly_prototype_property() {
        let mut heap = Heap::new();
        let proto = heap.new_object(ClassTag::Object, None).unwrap();
        let obj = heap.new_object(ClassTag::Object, Some(proto)).unwrap();
        let key = Symbol::Index(1);
        heap.define_own_property(
            proto,
            key,
            &PropertyDescriptor::data_with(Value::from_i32(1), false, true, true),
        );
        assert_eq!(heap.set_property(obj, key, Value::from_i32(2)), PutOutcome::Rejected);
    }

    #[test]
    fn test_collect_frees_unreachable_keeps_reachable() {
        let mut heap = Heap::new();
        let keep = intern(&mut heap, "keep");
        let _drop1 = intern(&mut heap, "drop1");
        let _drop2 = intern(&mut heap, "drop2");
        let before = heap.stats().live_cells;

        heap.collect(&[Value::from_string(keep)], &[]);

        let stats = heap.stats();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.live_cells, before - 2);
        assert_eq!(heap.string_to_rust(keep), "keep");
    }

    #[test]
    fn test_collect_traces_object_graph() {
        let mut heap = Heap::new();
        let name = intern(&mut heap, "payload");
        let proto = heap.new_object(ClassTag::Object, None).unwrap();
        let obj = heap.new_object(ClassTag::Object, Some(proto)).unwrap();
        heap.set_property(obj, Symbol::Index(0), Value::from_string(name));

        heap.collect(&[Value::from_object(obj)], &[]);

        // prototype and the string reached through the slot both survive
        assert_eq!(
            heap.get_property(obj, Symbol::Index(0)),
            PropertyLookup::Data(Value::from_string(name))
        );
        assert_eq!(heap.string_to_rust(name), "payload");
        assert!(heap.object(proto).prototype().is_none());
    }

    #[test]
    fn test_collect_handles_cycles() {
        let mut heap = Heap::new();
        let a = heap.new_object(ClassTag::Object, None).unwrap();
        let b = heap.new_object(ClassTag::Object, None).unwrap();
        heap.set_property(a, Symbol::Index(0), Value::from_object(b));
        heap.set_property(b, Symbol::Index(0), Value::from_object(a));

        // cycle is reachable: survives
        heap.collect(&[Value::from_object(a)], &[]);
        assert_eq!(heap.stats().live_cells, 2);

        // cycle is unreachable: reclaimed
        heap.collect(&[], &[]);
        assert_eq!(heap.stats().live_cells, 0);
    }

    #[test]
    fn test_swept_slots_are_reused() {
        let mut heap = Heap::new();
        let _garbage = intern(&mut heap, "garbage");
        heap.collect(&[], &[]);
        let replacement = intern(&mut heap, "replacement");
        assert_eq!(heap.string_to_rust(replacement), "replacement");
        assert_eq!(heap.stats().live_cells, 1);
    }
}
