//! Variables: the only mutable state an expression tree reads.
//!
//! A [`ScalarVariable`] carries a bound value and an "in respect to" flag.
//! An [`IndexedVariable`] models a vector of independent scalars without
//! materialising one node per slot: it wraps a fixed array and a shared
//! [`Index`] holding two cursors, the slot `eval` reads and the slot a
//! derivative is taken against.
//!
//! Handles are reference counted, so every atom built from a variable sees
//! the same flag and cursors. Code that temporarily repurposes a shared
//! indexed variable takes a [`CursorGuard`], which puts the cursors and flag
//! back when dropped.

use core::cell::Cell;
use core::fmt;
use std::rc::Rc;

use crate::atoms::Atom;
use crate::error::{NetError, Result};

#[derive(Debug)]
struct ScalarState {
    name: String,
    value: Cell<Option<f64>>,
    in_respect_to: Cell<bool>,
}

/// A named scalar with an optional bound value.
///
/// Cloning yields another handle to the same variable.
#[derive(Debug, Clone)]
pub struct ScalarVariable(Rc<ScalarState>);

impl ScalarVariable {
    /// Creates an unbound variable that is not differentiated against.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Rc::new(ScalarState {
            name: name.into(),
            value: Cell::new(None),
            in_respect_to: Cell::new(false),
        }))
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Binds a value for subsequent evaluations.
    pub fn bind(&self, value: f64) {
        self.0.value.set(Some(value));
    }

    /// Removes the bound value.
    pub fn unbind(&self) {
        self.0.value.set(None);
    }

    /// Currently bound value, if any.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.0.value.get()
    }

    #[must_use]
    pub fn is_in_respect_to(&self) -> bool {
        self.0.in_respect_to.get()
    }

    /// Flags (or unflags) this variable as the one derivatives are taken against.
    pub fn set_in_respect_to(&self, flag: bool) {
        self.0.in_respect_to.set(flag);
    }

    /// Leaf atom reading this variable.
    #[must_use]
    pub fn atom(&self) -> Atom {
        Atom::Variable(self.clone())
    }

    /// Whether both handles point at the same variable.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn eval(&self) -> Result<f64> {
        self.value().ok_or_else(|| NetError::UnboundVariable {
            name: self.0.name.clone(),
        })
    }
}

#[derive(Debug, Default)]
struct Cursor {
    current: Cell<usize>,
    target: Cell<Option<usize>>,
}

/// Shared cursor pair consulted by indexed atoms.
///
/// Term builders passed to a reduction receive an `Index`; every atom built
/// with [`IndexedVariable::at`] on that index follows the reduction's loop.
#[derive(Debug, Clone)]
pub struct Index {
    cursor: Rc<Cursor>,
    pinned: bool,
}

impl Index {
    fn fresh() -> Self {
        Self {
            cursor: Rc::new(Cursor::default()),
            pinned: false,
        }
    }

    /// Slot that reads resolve to.
    ///
    /// A pinned index always reads the with-respect-to slot when one is set.
    #[must_use]
    pub fn current(&self) -> usize {
        if self.pinned {
            if let Some(target) = self.cursor.target.get() {
                return target;
            }
        }
        self.cursor.current.get()
    }

    /// Slot derivatives are taken against; `None` means "whatever is current".
    #[must_use]
    pub fn target(&self) -> Option<usize> {
        self.cursor.target.get()
    }

    /// View of the same cursors whose current slot follows the target slot.
    #[must_use]
    pub fn pinned(&self) -> Self {
        Self {
            cursor: Rc::clone(&self.cursor),
            pinned: true,
        }
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

#[derive(Debug)]
struct IndexedState {
    name: String,
    values: Vec<f64>,
    in_respect_to: Cell<bool>,
    index: Index,
}

/// Array-backed variable with a movable read cursor.
///
/// Cloning yields another handle sharing values, flag and cursors.
#[derive(Debug, Clone)]
pub struct IndexedVariable(Rc<IndexedState>);

impl IndexedVariable {
    /// Wraps `values`; both cursors start at "slot 0, no target".
    pub fn new(name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        Self(Rc::new(IndexedState {
            name: name.into(),
            values: values.into(),
            in_respect_to: Cell::new(false),
            index: Index::fresh(),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.0.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values.is_empty()
    }

    /// This variable's own cursor pair.
    #[must_use]
    pub fn index(&self) -> Index {
        self.0.index.clone()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.0.index.cursor.current.get()
    }

    pub fn set_current_index(&self, slot: usize) {
        self.0.index.cursor.current.set(slot);
    }

    #[must_use]
    pub fn target_index(&self) -> Option<usize> {
        self.0.index.cursor.target.get()
    }

    /// Restricts derivatives to a single slot, or lifts the restriction.
    pub fn set_target_index(&self, slot: Option<usize>) {
        self.0.index.cursor.target.set(slot);
    }

    #[must_use]
    pub fn is_in_respect_to(&self) -> bool {
        self.0.in_respect_to.get()
    }

    pub fn set_in_respect_to(&self, flag: bool) {
        self.0.in_respect_to.set(flag);
    }

    /// Atom reading this variable at its own cursor.
    #[must_use]
    pub fn current(&self) -> Atom {
        self.at(&self.0.index)
    }

    /// Atom reading this variable at `index`, which may belong to another
    /// variable (e.g. the one a reduction iterates over).
    #[must_use]
    pub fn at(&self, index: &Index) -> Atom {
        Atom::Indexed(IndexedRef {
            var: self.clone(),
            index: index.clone(),
        })
    }

    /// Saves cursors and flag; they are restored when the guard drops.
    #[must_use]
    pub fn scope(&self) -> CursorGuard {
        CursorGuard {
            var: self.clone(),
            current: self.current_index(),
            target: self.target_index(),
            in_respect_to: self.is_in_respect_to(),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Restores an [`IndexedVariable`]'s cursors and flag on drop.
#[must_use = "the cursors are restored as soon as the guard is dropped"]
pub struct CursorGuard {
    var: IndexedVariable,
    current: usize,
    target: Option<usize>,
    in_respect_to: bool,
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.var.set_current_index(self.current);
        self.var.set_target_index(self.target);
        self.var.set_in_respect_to(self.in_respect_to);
    }
}

/// Leaf atom: one slot of an [`IndexedVariable`], selected through an [`Index`].
#[derive(Debug, Clone)]
pub struct IndexedRef {
    var: IndexedVariable,
    index: Index,
}

impl IndexedRef {
    #[must_use]
    pub fn variable(&self) -> &IndexedVariable {
        &self.var
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    pub(crate) fn eval(&self) -> Result<f64> {
        let slot = self.index.current();
        self.var
            .values()
            .get(slot)
            .copied()
            .ok_or_else(|| NetError::IndexOutOfBounds {
                name: self.var.name().to_owned(),
                index: slot,
                len: self.var.len(),
            })
    }

    /// True when the slot being read is the one being differentiated against.
    pub(crate) fn is_seeded(&self) -> bool {
        if !self.var.is_in_respect_to() {
            return false;
        }
        match self.index.target() {
            None => true,
            Some(target) => self.index.current() == target,
        }
    }
}

impl fmt::Display for IndexedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.var.name(), self.index.current())
    }
}
