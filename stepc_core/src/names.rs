//! Unique name allocation for states, variables and heap slots.
//!
//! All three allocators are owned by a single compilation and driven purely
//! by traversal order, so repeated compilations of the same AST produce
//! identical names.

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

/// ASL caps state names at 80 bytes; hints are cut to 75 to leave room for
/// the collision suffix.
const MAX_NAME_LEN: usize = 75;

/// Allocator for globally unique ASL state names.
///
/// Each request truncates the hint to 75 characters; on collision the
/// smallest unused ` N` suffix is appended. Both the truncated form and every
/// suffixed form are registered so later requests cannot re-collide.
#[derive(Debug, Default)]
pub struct StateNames {
    used: HashSet<String>,
}

impl StateNames {
    pub fn new() -> Self {
        StateNames::default()
    }

    /// A unique state name derived from `hint`.
    pub fn unique(&mut self, hint: &str) -> String {
        let base: String = hint.chars().take(MAX_NAME_LEN).collect();
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base} {n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Allocator for unique variable names.
///
/// The first declaration of an identifier keeps it verbatim; shadowing
/// declarations get `__1`, `__2`, ... The caller memoizes the result per
/// declaration through its scope environment, which keeps the mapping stable
/// for the lifetime of the declaration.
#[derive(Debug, Default)]
pub struct VarNames {
    used: HashSet<String>,
}

impl VarNames {
    pub fn new() -> Self {
        VarNames::default()
    }

    /// A unique variable name derived from `ident`.
    pub fn unique(&mut self, ident: &str) -> String {
        if self.used.insert(ident.to_string()) {
            return ident.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{ident}__{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Reserve a name that must never be handed out (the context slot, the
    /// hidden for-in item slots).
    pub fn reserve(&mut self, ident: &str) {
        self.used.insert(ident.to_string());
    }
}

/// Allocator for synthetic sub-state labels.
///
/// Deferred-successor rewiring writes a label into arbitrarily deep
/// content, where a colliding label in an intermediate scope would capture
/// the jump; every such label therefore carries a number from this
/// allocator. One instance is owned per compilation, like the other
/// allocators; the handle is a cheap clone so graph composition helpers can
/// draw from the same counter without borrowing the whole compiler. The
/// labels never reach the output document (only leaf states are named).
#[derive(Debug, Clone, Default)]
pub struct ChainLabels {
    next: Rc<Cell<usize>>,
}

impl ChainLabels {
    pub fn new() -> Self {
        ChainLabels::default()
    }

    fn bump(&self) -> usize {
        let n = self.next.get();
        self.next.set(n + 1);
        n
    }

    /// A chaining label for joined sub-states. Zero-padded so that sibling
    /// order in the state map always matches allocation order.
    pub fn chain(&self) -> String {
        format!("j{:08}", self.bump())
    }

    /// A capture-proof label derived from a readable base.
    pub fn synthetic(&self, base: &str) -> String {
        format!("{base}_{}", self.bump())
    }
}

/// Monotonic allocator for compiler scratch locations `$.heap{n}`.
///
/// Slots are never recycled; a fresh slot is a fresh address.
#[derive(Debug, Default)]
pub struct HeapSlots {
    next: usize,
}

impl HeapSlots {
    pub fn new() -> Self {
        HeapSlots::default()
    }

    /// The next unused heap path, e.g. `$.heap3`.
    pub fn fresh(&mut self) -> String {
        let slot = format!("$.heap{}", self.next);
        self.next += 1;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_suffix_on_collision() {
        let mut names = StateNames::new();
        assert_eq!(names.unique("return x"), "return x");
        assert_eq!(names.unique("return x"), "return x 1");
        assert_eq!(names.unique("return x"), "return x 2");
        assert_eq!(names.unique("other"), "other");
    }

    #[test]
    fn state_names_truncate_to_75() {
        let mut names = StateNames::new();
        let long = "x".repeat(200);
        let name = names.unique(&long);
        assert_eq!(name.len(), 75);
        // The truncated form is registered, so a second long hint collides.
        assert_eq!(names.unique(&long), format!("{name} 1"));
    }

    #[test]
    fn suffixed_forms_are_memoized() {
        let mut names = StateNames::new();
        assert_eq!(names.unique("a"), "a");
        assert_eq!(names.unique("a 1"), "a 1");
        // "a" collides with both registered forms.
        assert_eq!(names.unique("a"), "a 2");
    }

    #[test]
    fn var_names_shadow_with_double_underscore() {
        let mut names = VarNames::new();
        assert_eq!(names.unique("x"), "x");
        assert_eq!(names.unique("x"), "x__1");
        assert_eq!(names.unique("x"), "x__2");
        assert_eq!(names.unique("y"), "y");
    }

    #[test]
    fn heap_slots_are_monotonic() {
        let mut heap = HeapSlots::new();
        assert_eq!(heap.fresh(), "$.heap0");
        assert_eq!(heap.fresh(), "$.heap1");
        assert_eq!(heap.fresh(), "$.heap2");
    }

    #[test]
    fn chain_labels_share_one_counter_across_clones() {
        let labels = ChainLabels::new();
        let handle = labels.clone();
        assert_eq!(labels.chain(), "j00000000");
        assert_eq!(handle.synthetic("check"), "check_1");
        assert_eq!(labels.chain(), "j00000002");
    }
}
