//! Mutable ref cells returned by `use_ref`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A mutable cell that survives re-renders.
///
/// Every render of the same component position gets the same cell back.
/// Writing to a ref never schedules a render. The cell is cleared when its
/// component leaves the tree.
pub struct Ref<T> {
    cell: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Ref<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(Some(value))),
        }
    }

    pub fn set(&self, value: T) {
        *self.cell.borrow_mut() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.cell.borrow_mut().take()
    }

    /// Run `f` on the current value, `None` once the cell was cleared.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.cell.borrow().as_ref().map(f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.cell.borrow_mut().as_mut().map(f)
    }

    pub fn is_cleared(&self) -> bool {
        self.cell.borrow().is_none()
    }

    /// True if both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn clear(&self) {
        self.cell.borrow_mut().take();
    }
}

impl<T: Clone> Ref<T> {
    pub fn get(&self) -> Option<T> {
        self.cell.borrow().clone()
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&self.cell.borrow()).finish()
    }
}

/// Type-erased ref stored in a hook slot.
pub(crate) trait RefSlot {
    fn clear(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: 'static> RefSlot for Ref<T> {
    fn clear(&self) {
        Ref::clear(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
