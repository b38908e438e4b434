//! Built-in programs that drive the runtime the way compiled code does.
//!
//! Every workload keeps its long-lived data reachable from global slot 0 and
//! its temporaries on the shadow stack, then checks the values it reads back.

use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::runtime::{
    Address, AttributeKind, ClassDefinition, ClassId, Element, ElementType, GcStats, HeapSummary,
    Runtime, SlotDescriptor, Trap, Word,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Allocate short-lived objects; the live set stays bounded.
    Churn,
    /// Keep every allocated object reachable from one reference array.
    Retain,
    /// Append to and drain a singly linked list through dispatched methods.
    LinkedList,
    /// Call an overridden method through parent- and child-typed references.
    Polymorphism,
    /// Exercise a class with more attributes than fit inline.
    WideClass,
}

impl Workload {
    pub const ALL: [Workload; 5] = [
        Workload::Churn,
        Workload::Retain,
        Workload::LinkedList,
        Workload::Polymorphism,
        Workload::WideClass,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Workload::Churn => "churn",
            Workload::Retain => "retain",
            Workload::LinkedList => "linked-list",
            Workload::Polymorphism => "polymorphism",
            Workload::WideClass => "wide-class",
        }
    }

    pub fn default_size(self) -> u32 {
        match self {
            Workload::Churn | Workload::Retain => 100_000,
            Workload::LinkedList => 10_000,
            Workload::Polymorphism => 1_000,
            Workload::WideClass => 100,
        }
    }

    fn execute(self, rt: &mut Runtime, size: u32) -> Result<bool, Trap> {
        match self {
            Workload::Churn => churn(rt, size),
            Workload::Retain => retain(rt, size),
            Workload::LinkedList => linked_list(rt, size),
            Workload::Polymorphism => polymorphism(rt, size),
            Workload::WideClass => wide_class(rt, size),
        }
    }
}

/// What a finished workload observed.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub workload: &'static str,
    pub size: u32,
    pub passed: bool,
    pub heap: HeapSummary,
    pub gc: GcStats,
}

/// Run `workload` on a fresh runtime. The runtime is returned so callers can
/// inspect what the workload left reachable.
pub fn run(workload: Workload, size: u32, config: RuntimeConfig) -> Result<(Runtime, WorkloadReport), Trap> {
    let mut rt = Runtime::new(config)?;
    log::info!("running workload '{}' (size {})", workload.name(), size);
    let passed = workload.execute(&mut rt, size)?;
    let report = WorkloadReport {
        workload: workload.name(),
        size,
        passed,
        heap: rt.inspector().summary(),
        gc: rt.stats().clone(),
    };
    Ok((rt, report))
}

/// Register global slot 0 as a root and store `value` there.
fn retain_global(rt: &mut Runtime, value: Address) -> Result<(), Trap> {
    let global = rt.global_location(0)?;
    rt.register_root(global)?;
    rt.store_reference(global, value)
}

fn define_integer(rt: &mut Runtime) -> Result<ClassId, Trap> {
    rt.define_class(ClassDefinition::new("Integer").attribute("value", AttributeKind::Primitive))
}

// =============================================================================
// churn / retain
// =============================================================================

fn churn(rt: &mut Runtime, iterations: u32) -> Result<bool, Trap> {
    let integer = define_integer(rt)?;
    let mut correct = true;

    rt.push_frame(1)?;
    for i in 0..iterations {
        let boxed = rt.allocate_object(integer)?;
        rt.shadow_store(0, boxed)?;
        rt.set_attribute_at(boxed, 0, i as Word)?;
        correct &= rt.get_attribute_at(boxed, 0)? == i as Word;
    }
    rt.pop_frame()?;
    Ok(correct)
}

fn retain(rt: &mut Runtime, size: u32) -> Result<bool, Trap> {
    let integer = define_integer(rt)?;
    let array = rt.allocate_array(ElementType::Reference, size as i64)?;
    retain_global(rt, array)?;

    for i in 0..size {
        let boxed = rt.allocate_object(integer)?;
        rt.set_attribute_at(boxed, 0, i as Word)?;
        rt.set_element(array, i as i64, Element::Reference(boxed))?;
    }

    let mut correct = true;
    for i in 0..size {
        let boxed = match rt.get_element(array, i as i64)? {
            Element::Reference(r) => r,
            _ => return Ok(false),
        };
        correct &= rt.get_attribute_at(boxed, 0)? == i as Word;
    }
    Ok(correct)
}

// =============================================================================
// linked list
// =============================================================================

const LIST_SIZE: SlotDescriptor = SlotDescriptor::Inline(0);
const LIST_FIRST: SlotDescriptor = SlotDescriptor::Inline(1);
const LIST_LAST: SlotDescriptor = SlotDescriptor::Inline(2);
const NODE_VALUE: SlotDescriptor = SlotDescriptor::Inline(0);
const NODE_NEXT: SlotDescriptor = SlotDescriptor::Inline(1);

fn list_append(rt: &mut Runtime, this: Address, args: &[Word]) -> Result<Word, Trap> {
    let node_class = rt
        .classes()
        .by_name("LinkedListNode")
        .map(|c| c.id)
        .ok_or(Trap::UnknownClass(u32::MAX))?;
    let node = rt.allocate_object(node_class)?;
    rt.set_attribute(node, NODE_VALUE, args.first().copied().unwrap_or(0))?;

    let size = rt.get_attribute(this, LIST_SIZE)?;
    if size == 0 {
        rt.set_attribute(this, LIST_FIRST, node as Word)?;
    } else {
        let last = rt.get_reference(this, LIST_LAST)?;
        rt.set_attribute(last, NODE_NEXT, node as Word)?;
    }
    rt.set_attribute(this, LIST_LAST, node as Word)?;
    rt.set_attribute(this, LIST_SIZE, size + 1)?;
    Ok(0)
}

fn list_pop_first(rt: &mut Runtime, this: Address, _args: &[Word]) -> Result<Word, Trap> {
    let first = rt.get_reference(this, LIST_FIRST)?;
    let value = rt.get_attribute(first, NODE_VALUE)?;
    let next = rt.get_attribute(first, NODE_NEXT)?;
    rt.set_attribute(this, LIST_FIRST, next)?;
    let size = rt.get_attribute(this, LIST_SIZE)?;
    rt.set_attribute(this, LIST_SIZE, size.wrapping_sub(1))?;
    Ok(value)
}

fn linked_list(rt: &mut Runtime, length: u32) -> Result<bool, Trap> {
    rt.define_class(
        ClassDefinition::new("LinkedListNode")
            .attribute("value", AttributeKind::Primitive)
            .attribute("next", AttributeKind::Reference),
    )?;
    let list_class = rt.define_class(
        ClassDefinition::new("LinkedList")
            .attribute("size", AttributeKind::Primitive)
            .attribute("first", AttributeKind::Reference)
            .attribute("last", AttributeKind::Reference)
            .method("append", list_append)
            .method("popFirstElement", list_pop_first),
    )?;
    let class = rt.class(list_class)?;
    let (append, pop) = match (class.method_slot("append"), class.method_slot("popFirstElement")) {
        (Some(append), Some(pop)) => (append, pop),
        _ => return Err(Trap::UnknownMethodSlot { class: list_class, slot: u32::MAX }),
    };

    let list = rt.allocate_object(list_class)?;
    retain_global(rt, list)?;

    for i in 0..length {
        rt.dispatch(list, append, &[i as Word])?;
    }
    let mut correct = true;
    for i in 0..length {
        correct &= rt.dispatch(list, pop, &[])? == i as Word;
    }
    Ok(correct && rt.get_attribute(list, LIST_SIZE)? == 0)
}

// =============================================================================
// polymorphism
// =============================================================================

fn parent_is_parent(_: &mut Runtime, _: Address, _: &[Word]) -> Result<Word, Trap> {
    Ok(1)
}

fn child_is_parent(_: &mut Runtime, _: Address, _: &[Word]) -> Result<Word, Trap> {
    Ok(0)
}

fn polymorphism(rt: &mut Runtime, rounds: u32) -> Result<bool, Trap> {
    let parent = rt.define_class(
        ClassDefinition::new("Parent")
            .attribute("id", AttributeKind::Primitive)
            .method("isParent", parent_is_parent),
    )?;
    let child = rt.define_class(
        ClassDefinition::new("Child")
            .extends(parent)
            .attribute("extra", AttributeKind::Primitive)
            .method("isParent", child_is_parent),
    )?;
    // the slot is resolved against the static (parent) type
    let slot = rt
        .class(parent)?
        .method_slot("isParent")
        .ok_or(Trap::UnknownMethodSlot { class: parent, slot: 0 })?;

    let mut correct = true;
    rt.push_frame(2)?;
    for _ in 0..rounds {
        let p = rt.allocate_object(parent)?;
        rt.shadow_store(0, p)?;
        let c = rt.allocate_object(child)?;
        rt.shadow_store(1, c)?;

        correct &= rt.dispatch(p, slot, &[])? == 1;
        correct &= rt.dispatch(c, slot, &[])? == 0;
        // same receiver viewed through the parent type
        let as_parent = rt.shadow_load(1)?;
        correct &= rt.dispatch(as_parent, slot, &[])? == 0;
    }
    rt.pop_frame()?;
    Ok(correct)
}

// =============================================================================
// wide class
// =============================================================================

fn wide_class(rt: &mut Runtime, count: u32) -> Result<bool, Trap> {
    let mut definition = ClassDefinition::new("ClassWith33Attributes");
    for i in 1..=33 {
        definition = definition.attribute(format!("x{}", i), AttributeKind::Primitive);
    }
    let class = rt.define_class(definition)?;
    let info = rt.class(class)?;
    let (x1, x32, x33) = match (
        info.attribute_slot("x1"),
        info.attribute_slot("x32"),
        info.attribute_slot("x33"),
    ) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => return Ok(false),
    };

    let holder = rt.allocate_array(ElementType::Reference, count as i64)?;
    retain_global(rt, holder)?;

    for i in 0..count {
        let object = rt.allocate_object(class)?;
        rt.set_element(holder, i as i64, Element::Reference(object))?;
        let base = i as Word * 3;
        rt.set_attribute(object, x1, base + 1)?;
        rt.set_attribute(object, x32, base + 32)?;
        rt.set_attribute(object, x33, base + 33)?;
    }

    // force at least one collection so the overflow chains must survive it
    rt.collect();

    let mut correct = true;
    for i in 0..count {
        let Element::Reference(object) = rt.get_element(holder, i as i64)? else {
            return Ok(false);
        };
        let base = i as Word * 3;
        correct &= rt.get_attribute(object, x1)? == base + 1;
        correct &= rt.get_attribute(object, x32)? == base + 32;
        correct &= rt.get_attribute(object, x33)? == base + 33;
    }
    Ok(correct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_workload_passes_small() {
        for workload in Workload::ALL {
            let (_, report) = run(workload, 64, RuntimeConfig::default()).unwrap();
            assert!(report.passed, "{} failed", workload.name());
        }
    }

    #[test]
    fn test_churn_does_not_grow() {
        let (rt, report) = run(Workload::Churn, 100_000, RuntimeConfig::default()).unwrap();
        assert!(report.passed);
        assert_eq!(rt.heap_pages(), 1);
        assert!(report.gc.cycles > 0);
        assert_eq!(report.gc.heap_growths, 0);
    }

    #[test]
    fn test_retain_grows() {
        let (rt, report) = run(Workload::Retain, 100_000, RuntimeConfig::default()).unwrap();
        assert!(report.passed);
        assert!(rt.heap_pages() > 1);
        assert!(report.gc.heap_growths > 0);
    }

    #[test]
    fn test_retain_without_room_traps() {
        let config = RuntimeConfig {
            max_pages: 4,
            ..RuntimeConfig::default()
        };
        let err = run(Workload::Retain, 100_000, config).unwrap_err();
        assert!(matches!(err, Trap::OutOfMemory { .. }));
    }

    #[test]
    fn test_linked_list_survives_collections() {
        let config = RuntimeConfig {
            max_pages: 8,
            ..RuntimeConfig::default()
        };
        let (_, report) = run(Workload::LinkedList, 5_000, config).unwrap();
        assert!(report.passed);
    }
}
