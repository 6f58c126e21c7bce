//! The value stack: an ordered list of values with its top at the front.
//!
//! One type serves two roles. Each call frame keeps one as its operand
//! stack (pending expression operands and call arguments), and scripts
//! hold shared ones as Sequence values.

use std::collections::VecDeque;

use crate::error::ValueError;
use crate::value::Value;

/// Ordered list of values. Index 0 is the top.
#[derive(Debug, Clone, Default)]
pub struct ValueStack {
    items: VecDeque<Value>,
}

impl ValueStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a stack whose top is the first value yielded.
    pub fn from_top_down(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            items: values.into_iter().collect(),
        }
    }

    /// Number of values held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the stack holds no values.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Push onto the top.
    pub fn push_front(&mut self, value: Value) {
        self.items.push_front(value);
    }

    /// Append at the bottom.
    pub fn push_back(&mut self, value: Value) {
        self.items.push_back(value);
    }

    /// Remove and return the top value.
    pub fn pop_front(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    /// The top value.
    pub fn front(&self) -> Option<&Value> {
        self.items.front()
    }

    /// The bottom value.
    pub fn back(&self) -> Option<&Value> {
        self.items.back()
    }

    /// Read the value `index` places below the top.
    pub fn get(&self, index: i32) -> Result<&Value, ValueError> {
        let slot = self.slot(index)?;
        Ok(&self.items[slot])
    }

    /// Replace the value `index` places below the top.
    pub fn set(&mut self, index: i32, value: Value) -> Result<(), ValueError> {
        let slot = self.slot(index)?;
        self.items[slot] = value;
        Ok(())
    }

    /// Remove the first value equal to `needle`. Returns whether one was found.
    pub fn delete_first_equal(&mut self, needle: &Value) -> bool {
        match self.items.iter().position(|v| v == needle) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove every value equal to `needle`. Returns how many were removed.
    pub fn delete_all_equal(&mut self, needle: &Value) -> usize {
        let before = self.items.len();
        self.items.retain(|v| v != needle);
        before - self.items.len()
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Values from top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    /// Remove every value, top first.
    pub fn drain(&mut self) -> impl Iterator<Item = Value> + '_ {
        self.items.drain(..)
    }

    fn slot(&self, index: i32) -> Result<usize, ValueError> {
        let len = self.items.len();
        match usize::try_from(index) {
            Ok(slot) if slot < len => Ok(slot),
            _ => Err(ValueError::IndexOutOfRange {
                index: index as i64,
                len,
            }),
        }
    }
}

impl FromIterator<Value> for ValueStack {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::from_top_down(iter)
    }
}
