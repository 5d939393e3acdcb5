use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Byte buffer shared between cells.
///
/// Every holder keeps the buffer alive; it is freed with the last one.
/// Destroying a cell drops that cell's handles only.
#[derive(Debug, Clone, Default)]
pub struct DataBlock(Rc<RefCell<Vec<u8>>>);

impl DataBlock {
    /// Zero-filled block of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self(Rc::new(RefCell::new(vec![0; len])))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn bytes(&self) -> Ref<'_, Vec<u8>> {
        self.0.borrow()
    }

    pub fn bytes_mut(&self) -> RefMut<'_, Vec<u8>> {
        self.0.borrow_mut()
    }

    /// Number of live handles to this block.
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn same_block(&self, other: &DataBlock) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
