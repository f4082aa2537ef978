//! Shapes: hidden classes describing object property layout.
//!
//! Shapes form a transition tree. Adding property `p` with attributes `a` to
//! an object with shape `S` moves the object to the unique child `S'`,
//! allocating the child on first use and memoizing it so objects built with
//! the same property sequence share layout.

use bitflags::bitflags;
use core_types::Symbol;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

bitflags! {
    /// Property attribute bits. `ACCESSOR` is the internal bit marking a
    /// getter/setter slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyAttributes: u8 {
        const WRITABLE = 0b0001;
        const ENUMERABLE = 0b0010;
        const CONFIGURABLE = 0b0100;
        const ACCESSOR = 0b1000;
    }
}

impl PropertyAttributes {
    /// Attributes of a plain assignment (`obj.x = v`).
    pub fn plain_data() -> Self {
        Self::WRITABLE | Self::ENUMERABLE | Self::CONFIGURABLE
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    pub fn is_enumerable(self) -> bool {
        self.contains(Self::ENUMERABLE)
    }

    pub fn is_configurable(self) -> bool {
        self.contains(Self::CONFIGURABLE)
    }

    pub fn is_accessor(self) -> bool {
        self.contains(Self::ACCESSOR)
    }
}

/// A node in the shape transition tree.
///
/// The root shape has no key; every other shape appends one property to its
/// parent's layout. `slot` is the index of that property in the object's
/// value array.
#[derive(Debug)]
pub struct Shape {
    /// Identity for inline caches. Unique per shape node.
    id: u64,
    parent: Option<Rc<Shape>>,
    key: Option<(Symbol, PropertyAttributes)>,
    slot: u32,
    transitions: RefCell<FxHashMap<(Symbol, PropertyAttributes), Rc<Shape>>>,
}

impl Shape {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of slots an object with this shape owns.
    pub fn slot_count(&self) -> u32 {
        match self.key {
            Some(_) => self.slot + 1,
            None => 0,
        }
    }

    /// Walk the shape chain for `key`; returns `(slot, attributes)`.
    pub fn lookup(&self, key: Symbol) -> Option<(u32, PropertyAttributes)> {
        let mut current = self;
        loop {
            if let Some((k, attrs)) = current.key {
                if k == key {
                    return Some((current.slot, attrs));
                }
            }
            match &current.parent {
                Some(parent) => current = parent,
                None => return None,
            }
        }
    }

    /// Own keys in insertion order with their attributes.
    pub fn keys_in_order(&self) -> Vec<(Symbol, PropertyAttributes)> {
        let mut keys = Vec::new();
        let mut current = self;
        loop {
            if let Some(entry) = current.key {
                keys.push(entry);
            }
            match &current.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        keys.reverse();
        keys
    }
}

/// Allocates shapes and owns the root of the transition tree.
#[derive(Debug)]
pub struct ShapeRegistry {
    root: Rc<Shape>,
    next_id: std::cell::Cell<u64>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        ShapeRegistry {
            root: Rc::new(Shape {
                id: 0,
                parent: None,
                key: None,
                slot: 0,
                transitions: RefCell::new(FxHashMap::default()),
            }),
            next_id: std::cell::Cell::new(1),
        }
    }

    pub fn root(&self) -> Rc<Shape> {
        Rc::clone(&self.root)
    }

    /// The unique child of `shape` for `(key, attributes)`, allocating and
    /// memoizing it on first use.
    pub fn transition(
        &self,
        shape: &Rc<Shape>,
        key: Symbol,
        attributes: PropertyAttributes,
    ) -> Rc<Shape> {
        if let Some(child) = shape.transitions.borrow().get(&(key, attributes)) {
            return Rc::clone(child);
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let child = Rc::new(Shape {
            id,
            parent: Some(Rc::clone(shape)),
            key: Some((key, attributes)),
            slot: shape.slot_count(),
            transitions: RefCell::new(FxHashMap::default()),
        });
        shape
            .transitions
            .borrow_mut()
            .insert((key, attributes), Rc::clone(&child));
        child
    }

    /// Rebuild a shape for the given property sequence. Used when an object
    /// leaves the shared tree (property deletion, attribute change).
    pub fn shape_for_sequence(&self, entries: &[(Symbol, PropertyAttributes)]) -> Rc<Shape> {
        let mut shape = self.root();
        for &(key, attrs) in entries {
            shape = self.transition(&shape, key, attrs);
        }
        shape
    }
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
