//! Class metadata: flattened attribute layouts, pointer maps and method tables.
//!
//! Layouts are computed once per concrete class when it is defined. A child
//! class starts from a copy of its parent's flattened attributes and method
//! table, so offsets valid for the parent stay valid for every subclass.

use std::fmt;

use serde::Serialize;

use super::Runtime;
use super::header::{Address, INLINE_SLOTS, OVERFLOW_BLOCK_SLOTS, Word};
use super::trap::Trap;

/// Dense identifier of a class; stored in every object header.
pub type ClassId = u32;

/// A compiled method body. Receives the receiver and the call arguments.
pub type MethodFn = fn(&mut Runtime, Address, &[Word]) -> Result<Word, Trap>;

/// Whether an attribute slot holds a reference the collector must trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Primitive,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub name: String,
    pub kind: AttributeKind,
}

#[derive(Clone)]
pub struct MethodDefinition {
    pub name: String,
    pub entry: MethodFn,
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Input to [`ClassRegistry::define`].
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: String,
    pub parent: Option<ClassId>,
    pub attributes: Vec<AttributeDefinition>,
    pub methods: Vec<MethodDefinition>,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            attributes: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: ClassId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeDefinition {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn method(mut self, name: impl Into<String>, entry: MethodFn) -> Self {
        self.methods.push(MethodDefinition {
            name: name.into(),
            entry,
        });
        self
    }
}

// =============================================================================
// SlotDescriptor - inline or overflow addressing of an attribute
// =============================================================================

/// Where a flattened attribute lives within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotDescriptor {
    /// Inline slot `N` of the object itself.
    Inline(u32),
    /// Slot `slot` of the `block`-th overflow block in the chain.
    Overflow { block: u32, slot: u32 },
}

impl SlotDescriptor {
    /// Address the attribute with flattened index `index`.
    pub fn for_index(index: u32) -> Self {
        let index = index as usize;
        if index < INLINE_SLOTS {
            SlotDescriptor::Inline(index as u32)
        } else {
            let extra = index - INLINE_SLOTS;
            SlotDescriptor::Overflow {
                block: (extra / OVERFLOW_BLOCK_SLOTS) as u32,
                slot: (extra % OVERFLOW_BLOCK_SLOTS) as u32,
            }
        }
    }

    /// The flattened attribute index this descriptor addresses, or `None`
    /// when it names a slot past the inline area or past its overflow block.
    pub fn index(self) -> Option<u32> {
        match self {
            SlotDescriptor::Inline(n) => ((n as usize) < INLINE_SLOTS).then_some(n),
            SlotDescriptor::Overflow { block, slot } => {
                if slot as usize >= OVERFLOW_BLOCK_SLOTS {
                    return None;
                }
                u32::try_from(Self::nominal(block, slot)).ok()
            }
        }
    }

    /// Best-effort flattened index for diagnostics, saturating at `u32::MAX`.
    pub fn nominal_index(self) -> u32 {
        match self {
            SlotDescriptor::Inline(n) => n,
            SlotDescriptor::Overflow { block, slot } => {
                Self::nominal(block, slot).min(u32::MAX as u64) as u32
            }
        }
    }

    fn nominal(block: u32, slot: u32) -> u64 {
        INLINE_SLOTS as u64 + block as u64 * OVERFLOW_BLOCK_SLOTS as u64 + slot as u64
    }
}

// =============================================================================
// PointerMap - which attribute slots hold references
// =============================================================================

/// A bitset over flattened attribute indices. Set bits are reference slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerMap {
    words: Vec<u64>,
    len: usize,
}

impl PointerMap {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn from_attributes(attributes: &[AttributeDefinition]) -> Self {
        let mut map = Self::new(attributes.len());
        for (i, attribute) in attributes.iter().enumerate() {
            if attribute.kind == AttributeKind::Reference {
                map.set(i);
            }
        }
        map
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len, "pointer map index out of range");
        self.words[index / 64] |= 1 << (index % 64);
    }

    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Indices of reference slots within `range`, ascending.
    pub fn iter_set_in(
        &self,
        range: std::ops::Range<usize>,
    ) -> impl Iterator<Item = usize> + '_ {
        range.filter(move |&i| self.is_set(i))
    }
}

// =============================================================================
// MethodTable
// =============================================================================

#[derive(Clone)]
pub struct MethodEntry {
    pub name: String,
    /// Class whose definition supplied this entry point.
    pub owner: ClassId,
    pub entry: MethodFn,
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Virtual method slots of one concrete class.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    entries: Vec<MethodEntry>,
}

impl MethodTable {
    pub fn get(&self, slot: u32) -> Option<&MethodEntry> {
        self.entries.get(slot as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slot_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| i as u32)
    }

    pub fn entries(&self) -> &[MethodEntry] {
        &self.entries
    }

    /// Replace the slot of a same-named method, or append a new slot.
    fn bind(&mut self, entry: MethodEntry) {
        match self.slot_of(&entry.name) {
            Some(slot) => self.entries[slot as usize] = entry,
            None => self.entries.push(entry),
        }
    }
}

// =============================================================================
// ClassInfo / ClassRegistry
// =============================================================================

/// The resolved description of one concrete class.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: String,
    pub parent: Option<ClassId>,
    /// Flattened attributes: inherited first, then own, in declaration order.
    pub attributes: Vec<AttributeDefinition>,
    pub pointer_map: PointerMap,
    pub method_table: MethodTable,
}

impl ClassInfo {
    pub fn attribute_count(&self) -> u32 {
        self.attributes.len() as u32
    }

    pub fn has_overflow(&self) -> bool {
        self.attributes.len() > INLINE_SLOTS
    }

    /// Resolve an attribute name. A child attribute hides a parent attribute
    /// of the same name.
    pub fn attribute_slot(&self, name: &str) -> Option<SlotDescriptor> {
        self.attributes
            .iter()
            .rposition(|a| a.name == name)
            .map(|i| SlotDescriptor::for_index(i as u32))
    }

    pub fn method_slot(&self, name: &str) -> Option<u32> {
        self.method_table.slot_of(name)
    }

    pub fn is_reference_slot(&self, index: u32) -> bool {
        self.pointer_map.is_set(index as usize)
    }
}

/// All classes known to the runtime, indexed by [`ClassId`].
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassInfo>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a class and compute its layout and method table.
    pub fn define(&mut self, definition: ClassDefinition) -> Result<ClassId, Trap> {
        let id = self.classes.len() as ClassId;

        let (mut attributes, mut method_table) = match definition.parent {
            Some(parent) => {
                let parent = self.get(parent)?;
                (parent.attributes.clone(), parent.method_table.clone())
            }
            None => (Vec::new(), MethodTable::default()),
        };

        attributes.extend(definition.attributes);
        for method in definition.methods {
            method_table.bind(MethodEntry {
                name: method.name,
                owner: id,
                entry: method.entry,
            });
        }

        let info = ClassInfo {
            id,
            name: definition.name,
            parent: definition.parent,
            pointer_map: PointerMap::from_attributes(&attributes),
            attributes,
            method_table,
        };
        log::debug!(
            "defined class {} '{}' ({} attributes, {} methods)",
            id,
            info.name,
            info.attributes.len(),
            info.method_table.len()
        );
        self.classes.push(info);
        Ok(id)
    }

    pub fn get(&self, id: ClassId) -> Result<&ClassInfo, Trap> {
        self.classes.get(id as usize).ok_or(Trap::UnknownClass(id))
    }

    pub fn by_name(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Whether `class` is `ancestor` or one of its subclasses.
    pub fn is_subclass_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.classes.get(id as usize).and_then(|c| c.parent);
        }
        false
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(_: &mut Runtime, _: Address, _: &[Word]) -> Result<Word, Trap> {
        Ok(1)
    }

    fn two(_: &mut Runtime, _: Address, _: &[Word]) -> Result<Word, Trap> {
        Ok(2)
    }

    #[test]
    fn test_slot_descriptor_addressing() {
        assert_eq!(SlotDescriptor::for_index(0), SlotDescriptor::Inline(0));
        assert_eq!(SlotDescriptor::for_index(31), SlotDescriptor::Inline(31));
        assert_eq!(
            SlotDescriptor::for_index(32),
            SlotDescriptor::Overflow { block: 0, slot: 0 }
        );
        assert_eq!(
            SlotDescriptor::for_index(64),
            SlotDescriptor::Overflow { block: 1, slot: 0 }
        );
        for i in [0, 5, 31, 32, 33, 63, 64, 200] {
            assert_eq!(SlotDescriptor::for_index(i).index(), Some(i));
        }
    }

    #[test]
    fn test_malformed_slot_descriptors() {
        assert_eq!(SlotDescriptor::Inline(32).index(), None);
        assert_eq!(SlotDescriptor::Overflow { block: 0, slot: 32 }.index(), None);
        assert_eq!(SlotDescriptor::Overflow { block: u32::MAX, slot: 0 }.index(), None);
        assert_eq!(SlotDescriptor::Inline(40).nominal_index(), 40);
        assert_eq!(
            SlotDescriptor::Overflow { block: u32::MAX, slot: 31 }.nominal_index(),
            u32::MAX
        );
    }

    #[test]
    fn test_pointer_map() {
        let mut map = PointerMap::new(70);
        map.set(0);
        map.set(64);
        map.set(69);
        assert!(map.is_set(0));
        assert!(map.is_set(64));
        assert!(!map.is_set(1));
        assert!(!map.is_set(70));
        assert_eq!(map.count_ones(), 3);
        assert_eq!(map.iter_set_in(0..65).collect::<Vec<_>>(), vec![0, 64]);
    }

    #[test]
    fn test_flattened_attributes_are_appended() {
        let mut registry = ClassRegistry::new();
        let parent = registry
            .define(
                ClassDefinition::new("Parent")
                    .attribute("x", AttributeKind::Primitive)
                    .attribute("next", AttributeKind::Reference),
            )
            .unwrap();
        let child = registry
            .define(
                ClassDefinition::new("Child")
                    .extends(parent)
                    .attribute("y", AttributeKind::Reference),
            )
            .unwrap();

        let p = registry.get(parent).unwrap();
        let c = registry.get(child).unwrap();
        assert_eq!(c.attribute_count(), 3);
        assert_eq!(p.attribute_slot("x"), c.attribute_slot("x"));
        assert_eq!(p.attribute_slot("next"), c.attribute_slot("next"));
        assert_eq!(c.attribute_slot("y"), Some(SlotDescriptor::Inline(2)));
        assert!(!c.is_reference_slot(0));
        assert!(c.is_reference_slot(1));
        assert!(c.is_reference_slot(2));
    }

    #[test]
    fn test_method_override_keeps_slot() {
        let mut registry = ClassRegistry::new();
        let parent = registry
            .define(
                ClassDefinition::new("Parent")
                    .method("isParent", one)
                    .method("describe", one),
            )
            .unwrap();
        let child = registry
            .define(
                ClassDefinition::new("Child")
                    .extends(parent)
                    .method("isParent", two)
                    .method("extra", two),
            )
            .unwrap();

        let p = registry.get(parent).unwrap();
        let c = registry.get(child).unwrap();
        assert_eq!(p.method_slot("isParent"), Some(0));
        assert_eq!(c.method_slot("isParent"), Some(0));
        assert_eq!(c.method_slot("describe"), Some(1));
        assert_eq!(c.method_slot("extra"), Some(2));
        assert_eq!(c.method_table.get(0).unwrap().owner, child);
        assert_eq!(c.method_table.get(1).unwrap().owner, parent);
        assert_eq!(p.method_table.len(), 2);
    }

    #[test]
    fn test_overflow_classes() {
        let mut registry = ClassRegistry::new();
        let mut definition = ClassDefinition::new("Wide");
        for i in 1..=33 {
            definition = definition.attribute(format!("x{}", i), AttributeKind::Primitive);
        }
        let id = registry.define(definition).unwrap();
        let class = registry.get(id).unwrap();
        assert!(class.has_overflow());
        assert_eq!(class.attribute_slot("x1"), Some(SlotDescriptor::Inline(0)));
        assert_eq!(class.attribute_slot("x32"), Some(SlotDescriptor::Inline(31)));
        assert_eq!(
            class.attribute_slot("x33"),
            Some(SlotDescriptor::Overflow { block: 0, slot: 0 })
        );
    }

    #[test]
    fn test_unknown_parent() {
        let mut registry = ClassRegistry::new();
        assert_eq!(
            registry
                .define(ClassDefinition::new("Orphan").extends(7))
                .unwrap_err(),
            Trap::UnknownClass(7)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subclass_relation() {
        let mut registry = ClassRegistry::new();
        let a = registry.define(ClassDefinition::new("A")).unwrap();
        let b = registry.define(ClassDefinition::new("B").extends(a)).unwrap();
        let c = registry.define(ClassDefinition::new("C")).unwrap();
        assert!(registry.is_subclass_of(b, a));
        assert!(registry.is_subclass_of(a, a));
        assert!(!registry.is_subclass_of(a, b));
        assert!(!registry.is_subclass_of(c, a));
        assert_eq!(registry.by_name("B").map(|c| c.id), Some(b));
    }
}
