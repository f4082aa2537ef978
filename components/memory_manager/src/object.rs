//! JavaScript objects: shape-indexed slots, descriptors, prototype link.
//!
//! An object is a shape pointer plus a value array indexed by shape slot.
//! Data slots hold a value; accessor slots hold getter/setter function
//! values. Attribute bits live in the shape, so objects built with the same
//! property sequence share layout.

use crate::cell::{CellRef, EnvHandle, Trace, Tracer};
use crate::hidden_class::{PropertyAttributes, Shape, ShapeRegistry};
use core_types::{ObjectHandle, Symbol, Value};
use std::any::Any;
use std::rc::Rc;

/// Class tag of an object, used by intrinsics and `toString` branding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassTag {
    Object,
    Function,
    Array,
    Error,
    String,
    Number,
    Boolean,
    RegExp,
}

/// How a function object executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Index into the engine's registered chunk table.
    Bytecode(u32),
    /// Index into the engine's native-function table.
    Native(u32),
}

/// Callable payload of a function object.
#[derive(Debug, Clone, Copy)]
pub struct FunctionData {
    pub kind: FunctionKind,
    /// Captured environment, for closures.
    pub environment: Option<EnvHandle>,
}

/// One property slot.
#[derive(Debug, Clone)]
pub enum PropertySlot {
    Data(Value),
    Accessor { get: Option<Value>, set: Option<Value> },
}

/// A property descriptor as supplied to `define_own_property`. Absent
/// fields keep (or default) the current state per ES5 8.12.9.
#[derive(Debug, Clone, Default)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub get: Option<Value>,
    pub set: Option<Value>,
    pub writable: Option<bool>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    pub fn data(value: Value) -> Self {
        PropertyDescriptor {
            value: Some(value),
            writable: Some(true),
            enumerable: Some(true),
            configurable: Some(true),
            ..Default::default()
        }
    }

    pub fn data_with(value: Value, writable: bool, enumerable: bool, configurable: bool) -> Self {
        PropertyDescriptor {
            value: Some(value),
            writable: Some(writable),
            enumerable: Some(enumerable),
            configurable: Some(configurable),
            ..Default::default()
        }
    }

    pub fn accessor(get: Option<Value>, set: Option<Value>) -> Self {
        PropertyDescriptor {
            get,
            set,
            enumerable: Some(true),
            configurable: Some(true),
            ..Default::default()
        }
    }

    fn is_accessor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    fn is_data(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    fn is_generic(&self) -> bool {
        !self.is_accessor() && !self.is_data()
    }
}

/// Result of an own-property probe.
#[derive(Debug, Clone)]
pub struct OwnProperty {
    pub slot: u32,
    pub attributes: PropertyAttributes,
    pub value: PropertySlot,
}

/// A JavaScript object.
#[derive(Debug)]
pub struct JsObject {
    shape: Rc<Shape>,
    slots: Vec<PropertySlot>,
    prototype: Option<ObjectHandle>,
    class: ClassTag,
    extensible: bool,
    /// Callable payload, present iff `class == Function`.
    pub function: Option<FunctionData>,
    /// Host payload (compiled regex program, boxed primitive, …). Must not
    /// hold cell references; the collector does not look inside.
    pub internal: Option<Box<dyn Any>>,
}

impl JsObject {
    pub fn new(shape: Rc<Shape>, class: ClassTag, prototype: Option<ObjectHandle>) -> Self {
        JsObject {
            shape,
            slots: Vec::new(),
            prototype,
            class,
            extensible: true,
            function: None,
            internal: None,
        }
    }

    pub fn shape(&self) -> &Rc<Shape> {
        &self.shape
    }

    pub fn shape_id(&self) -> u64 {
        self.shape.id()
    }

    pub fn class(&self) -> ClassTag {
        self.class
    }

    pub fn prototype(&self) -> Option<ObjectHandle> {
        self.prototype
    }

    pub fn set_prototype(&mut self, prototype: Option<ObjectHandle>) {
        self.prototype = prototype;
    }

    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }

    pub fn is_callable(&self) -> bool {
        self.function.is_some()
    }

    /// Read a slot directly. Used by inline-cache hits, which have already
    /// validated the shape.
    pub fn slot_value(&self, slot: u32) -> &PropertySlot {
        &self.slots[slot as usize]
    }

    pub fn set_slot_value(&mut self, slot: u32, value: PropertySlot) {
        self.slots[slot as usize] = value;
    }

    /// Own-property lookup through the shape chain.
    pub fn get_own(&self, key: Symbol) -> Option<OwnProperty> {
        let (slot, attributes) = self.shape.lookup(key)?;
        Some(OwnProperty {
            slot,
            attributes,
            value: self.slots[slot as usize].clone(),
        })
    }

    /// Add a brand-new property, transitioning the shape. The caller has
    /// checked that the key is not present.
    pub fn add_property(
        &mut self,
        registry: &ShapeRegistry,
        key: Symbol,
        attributes: PropertyAttributes,
        value: PropertySlot,
    ) {
        debug_assert!(self.shape.lookup(key).is_none());
        self.shape = registry.transition(&self.shape, key, attributes);
        debug_assert_eq!(self.shape.slot_count() as usize, self.slots.len() + 1);
        self.slots.push(value);
    }

    /// ES5 8.12.9 DefineOwnProperty. Returns false on rejection; the caller
    /// raises TypeError when strict.
    pub fn define_own_property(
        &mut self,
        registry: &ShapeRegistry,
        key: Symbol,
        desc: &PropertyDescriptor,
    ) -> bool {
        let current = self.get_own(key);
        let current = match current {
            None => {
                if !self.extensible {
                    return false;
                }
                let (attributes, slot) = if desc.is_accessor() {
                    let mut attrs = PropertyAttributes::ACCESSOR;
                    if desc.enumerable == Some(true) {
                        attrs |= PropertyAttributes::ENUMERABLE;
                    }
                    if desc.configurable == Some(true) {
                        attrs |= PropertyAttributes::CONFIGURABLE;
                    }
                    (
                        attrs,
                        PropertySlot::Accessor {
                            get: desc.get,
                            set: desc.set,
                        },
                    )
                } else {
                    let mut attrs = PropertyAttributes::empty();
                    if desc.writable == Some(true) {
                        attrs |= PropertyAttributes::WRITABLE;
                    }
                    if desc.enumerable == Some(true) {
                        attrs |= PropertyAttributes::ENUMERABLE;
                    }
                    if desc.configurable == Some(true) {
                        attrs |= PropertyAttributes::CONFIGURABLE;
                    }
                    (
                        attrs,
                        PropertySlot::Data(desc.value.unwrap_or(Value::UNDEFINED)),
                    )
                };
                self.add_property(registry, key, attributes, slot);
                return true;
            }
            Some(current) => current,
        };

        if desc.is_generic() && desc.enumerable.is_none() && desc.configurable.is_none() {
            return true;
        }

        let cur_attrs = current.attributes;
        if !cur_attrs.is_configurable() {
            if desc.configurable == Some(true) {
                return false;
            }
            if let Some(enumerable) = desc.enumerable {
                if enumerable != cur_attrs.is_enumerable() {
                    return false;
                }
            }
            if !desc.is_generic() {
                if desc.is_accessor() != cur_attrs.is_accessor() {
                    return false;
                }
                if cur_attrs.is_accessor() {
                    if let PropertySlot::Accessor { get, set } = &current.value {
                        if desc.get.is_some() && desc.get != *get {
                            return false;
                        }
                        if desc.set.is_some() && desc.set != *set {
                            return false;
                        }
                    }
                } else {
                    if !cur_attrs.is_writable() {
                        if desc.writable == Some(true) {
                            return false;
                        }
                        if let (Some(new), PropertySlot::Data(old)) = (desc.value, &current.value)
                        {
                            if new.bits() != old.bits() {
                                return false;
                            }
                        }
                    }
                }
            }
        }

        // compute the resulting attributes and slot contents
        let mut attrs = cur_attrs;
        if let Some(enumerable) = desc.enumerable {
            attrs.set(PropertyAttributes::ENUMERABLE, enumerable);
        }
        if let Some(configurable) = desc.configurable {
            attrs.set(PropertyAttributes::CONFIGURABLE, configurable);
        }

        let new_slot = if desc.is_accessor() {
            attrs |= PropertyAttributes::ACCESSOR;
            attrs.remove(PropertyAttributes::WRITABLE);
            let (old_get, old_set) = match &current.value {
                PropertySlot::Accessor { get, set } => (*get, *set),
                PropertySlot::Data(_) => (None, None),
            };
            PropertySlot::Accessor {
                get: desc.get.or(old_get),
                set: desc.set.or(old_set),
            }
        } else if desc.is_data() {
            attrs.remove(PropertyAttributes::ACCESSOR);
            if let Some(writable) = desc.writable {
                attrs.set(PropertyAttributes::WRITABLE, writable);
            }
            let old = match &current.value {
                PropertySlot::Data(v) => *v,
                PropertySlot::Accessor { .. } => Value::UNDEFINED,
            };
            PropertySlot::Data(desc.value.unwrap_or(old))
        } else {
            current.value.clone()
        };

        if attrs != cur_attrs {
            self.change_attributes(registry, key, attrs);
        }
        self.slots[current.slot as usize] = new_slot;
        true
    }

    /// Delete an own property. Returns false when the property exists but
    /// is not configurable. Deletion leaves the shared transition tree: the
    /// remaining sequence is rebuilt from the root.
    pub fn delete(&mut self, registry: &ShapeRegistry, key: Symbol) -> bool {
        let current = match self.get_own(key) {
            None => return true,
            Some(c) => c,
        };
        if !current.attributes.is_configurable() {
            return false;
        }
        let keys = self.shape.keys_in_order();
        let mut remaining = Vec::with_capacity(keys.len() - 1);
        let mut values = Vec::with_capacity(keys.len() - 1);
        for (i, &(k, attrs)) in keys.iter().enumerate() {
            if k == key {
                continue;
            }
            remaining.push((k, attrs));
            values.push(self.slots[i].clone());
        }
        self.shape = registry.shape_for_sequence(&remaining);
        self.slots = values;
        true
    }

    /// Change the attributes of an existing key, rebuilding the shape
    /// lineage.
    fn change_attributes(
        &mut self,
        registry: &ShapeRegistry,
        key: Symbol,
        attributes: PropertyAttributes,
    ) {
        let mut entries = self.shape.keys_in_order();
        for entry in entries.iter_mut() {
            if entry.0 == key {
                entry.1 = attributes;
            }
        }
        self.shape = registry.shape_for_sequence(&entries);
    }

    /// Enumerable own keys in insertion order.
    pub fn own_enumerable_keys(&self) -> Vec<Symbol> {
        self.shape
            .keys_in_order()
            .iter()
            .filter(|(_, attrs)| attrs.is_enumerable())
            .map(|&(k, _)| k)
            .collect()
    }

    /// All own keys in insertion order.
    pub fn own_keys(&self) -> Vec<Symbol> {
        self.shape.keys_in_order().iter().map(|&(k, _)| k).collect()
    }
}

impl Trace for JsObject {
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(proto) = self.prototype {
            tracer.edge(CellRef::Object(proto));
        }
        for slot in &self.slots {
            match slot {
                PropertySlot::Data(v) => tracer.value(*v),
                PropertySlot::Accessor { get, set } => {
                    if let Some(get) = get {
                        tracer.value(*get);
                    }
                    if let Some(set) = set {
                        tracer.value(*set);
                    }
                }
            }
        }
        if let Some(function) = &self.function {
            if let Some(env) = function.environment {
                tracer.edge(CellRef::Environment(env));
            }
        }
    }
}

/// An environment cell: captured variable slots plus the enclosing
/// environment.
#[derive(Debug)]
pub struct JsEnvironment {
    pub values: Vec<Value>,
    pub parent: Option<EnvHandle>,
}

impl Trace for JsEnvironment {
    fn trace(&self, tracer: &mut Tracer) {
        for v in &self.values {
            tracer.value(*v);
        }
        if let Some(parent) = self.parent {
            tracer.edge(CellRef::Environment(parent));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(i: u32) -> Symbol {
        Symbol::Index(i)
    }

    fn new_object(registry: &ShapeRegistry) -> JsObject {
        JsObject::new(registry.root(), ClassTag::Object, None)
    }

    #[test]
    fn test_add_and_get_own() {
        let registry = ShapeRegistry::new();
        let mut obj = new_object(&registry);
        obj.add_property(
            &registry,
            sym(1),
            PropertyAttributes::plain_data(),
            PropertySlot::Data(Value::from_i32(10)),
        );

        let own = obj.get_own(sym(1)).unwrap();
        assert_eq!(own.slot, 0);
        assert!(matches!(own.value, PropertySlot::Data(v) if v == Value::from_i32(10)));
        assert!(obj.get_own(sym(2)).is_none());
    }

    #[test]
    fn test_property_order_is_insertion_order() {
        let registry = ShapeRegistry::new();
        let mut obj = new_object(&registry);
        for key in [7, 3, 5] {
            obj.add_property(
                &registry,
                sym(key),
                PropertyAttributes::plain_data(),
                PropertySlot::Data(Value::from_i32(key as i32)),
            );
        }
        assert_eq!(obj.own_keys(), vec![sym(7), sym(3), sym(5)]);
    }

    #[test]
    fn test_delete_preserves_remaining_order() {
        let registry = ShapeRegistry::new();
        let mut obj = new_object(&registry);
        for key in [1, 2, 3] {
            obj.add_property(
                &registry,
                sym(key),
                PropertyAttributes::plain_data(),
                PropertySlot::Data(Value::from_i32(key as i32)),
            );
        }
        assert!(obj.delete(&registry, sym(2)));
        assert_eq!(obj.own_keys(), vec![sym(1), sym(3)]);
        let own = obj.get_own(sym(3)).unwrap();
        assert!(matches!(own.value, PropertySlot::Data(v) if v == Value::from_i32(3)));
    }

    #[test]
    fn test_define_rejects_on_frozen_property() {
        let registry = ShapeRegistry::new();
        let mut obj = new_object(&registry);
        assert!(obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor::data_with(Value::from_i32(1), false, false, false),
        ));

        // not configurable, not writable: value change rejected
        assert!(!obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor {
                value: Some(Value::from_i32(2)),
                ..Default::default()
            },
        ));
        // same value is allowed
        assert!(obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor {
                value: Some(Value::from_i32(1)),
                ..Default::default()
            },
        ));
        // flipping configurable back on is rejected
        assert!(!obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor {
                configurable: Some(true),
                ..Default::default()
            },
        ));
    }

    #[test]
    fn test_define_rejects_kind_flip_when_not_configurable() {
        let registry = ShapeRegistry::new();
        let mut obj = new_object(&registry);
        obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor::data_with(Value::from_i32(1), true, true, false),
        );
        assert!(!obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor::accessor(Some(Value::UNDEFINED), None),
        ));
    }

    #[test]
    fn test_define_on_non_extensible_rejects_new_keys() {
        let registry = ShapeRegistry::new();
        let mut obj = new_object(&registry);
        obj.prevent_extensions();
        assert!(!obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor::data(Value::from_i32(1)),
        ));
    }

    #[test]
    fn test_accessor_roundtrip() {
        let registry = ShapeRegistry::new();
        let mut obj = new_object(&registry);
        let getter = Value::from_object(ObjectHandle(5));
        assert!(obj.define_own_property(
            &registry,
            sym(1),
            &PropertyDescriptor::accessor(Some(getter), None),
        ));
        let own = obj.get_own(sym(1)).unwrap();
        assert!(own.attributes.is_accessor());
        assert!(matches!(own.value, PropertySlot::Accessor { get: Some(g), .. } if g == getter));
    }

    #[test]
    fn test_shared_shapes_between_objects() {
        let registry = ShapeRegistry::new();
        let mut a = new_object(&registry);
        let mut b = new_object(&registry);
        for obj in [&mut a, &mut b] {
            obj.add_property(
                &registry,
                sym(1),
                PropertyAttributes::plain_data(),
                PropertySlot::Data(Value::UNDEFINED),
            );
            obj.add_property(
                &registry,
                sym(2),
                PropertyAttributes::plain_data(),
                PropertySlot::Data(Value::UNDEFINED),
            );
        }
        assert_eq!(a.shape_id(), b.shape_id());

        // divergence forks
        a.add_property(
            &registry,
            sym(3),
            PropertyAttributes::plain_data(),
            PropertySlot::Data(Value::UNDEFINED),
        );
        assert_ne!(a.shape_id(), b.shape_id());
    }
}
