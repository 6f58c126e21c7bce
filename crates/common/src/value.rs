//! Runtime value representation.
//!
//! Scalars and strings are copied on assignment. Arrays and Sequences are
//! shared: cloning a [`Value`] holding one clones the handle, so every holder
//! observes the same contents and the last holder to go away frees them.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::ValueError;
use crate::kind::ValueKind;
use crate::stack::ValueStack;

/// Resolves external handles to display names for [`Value::to_text`].
pub trait NameResolver {
    /// Display name of a resource handle.
    fn resource_name(&self, _id: u32) -> Option<String> {
        None
    }

    /// Display name of an object type.
    fn object_type_name(&self, _id: u32) -> Option<String> {
        None
    }
}

/// A resolver that knows no names. Handles render as their kind name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNames;

impl NameResolver for NoNames {}

/// Shared handle to a Sequence.
#[derive(Clone, Default)]
pub struct SequenceRef(Rc<RefCell<ValueStack>>);

impl SequenceRef {
    /// Wrap a stack in a fresh shared handle.
    pub fn new(stack: ValueStack) -> Self {
        Self(Rc::new(RefCell::new(stack)))
    }

    pub fn borrow(&self) -> Ref<'_, ValueStack> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, ValueStack> {
        self.0.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Read the element `index` places below the top.
    pub fn get(&self, index: i32) -> Result<Value, ValueError> {
        self.0.borrow().get(index).cloned()
    }

    /// Replace the element `index` places below the top.
    pub fn set(&self, index: i32, value: Value) -> Result<(), ValueError> {
        self.0.borrow_mut().set(index, value)
    }

    /// A new, unshared Sequence holding copies of this one's elements.
    pub fn deep_copy(&self) -> Self {
        Self::new(self.0.borrow().clone())
    }

    /// Returns true if both handles refer to the same Sequence.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this Sequence.
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Address-based identity, stable while any handle is alive.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for SequenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents may contain this Sequence again.
        f.debug_struct("SequenceRef")
            .field("len", &self.len())
            .field("holders", &self.holders())
            .finish()
    }
}

/// Shared handle to a fixed-size Array.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<RefCell<Vec<Value>>>);

impl ArrayRef {
    /// An array of `size` Nothing values.
    pub fn with_size(size: usize) -> Self {
        Self::from_values(vec![Value::Nothing; size])
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(values)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Read the element at `index`.
    pub fn get(&self, index: i32) -> Result<Value, ValueError> {
        let items = self.0.borrow();
        let slot = array_slot(index, items.len())?;
        Ok(items[slot].clone())
    }

    /// Replace the element at `index`.
    pub fn set(&self, index: i32, value: Value) -> Result<(), ValueError> {
        let mut items = self.0.borrow_mut();
        let slot = array_slot(index, items.len())?;
        items[slot] = value;
        Ok(())
    }

    /// Copies of all elements, in index order.
    pub fn values(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this Array.
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Address-based identity, stable while any handle is alive.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayRef")
            .field("len", &self.len())
            .field("holders", &self.holders())
            .finish()
    }
}

// Containers can nest arbitrarily deep. The last holder empties them into a
// work list instead of letting the default drop recurse.
impl Drop for SequenceRef {
    fn drop(&mut self) {
        if Rc::strong_count(&self.0) != 1 {
            return;
        }
        if let Ok(mut items) = self.0.try_borrow_mut() {
            let pending: Vec<Value> = items.drain().collect();
            drop(items);
            release(pending);
        }
    }
}

impl Drop for ArrayRef {
    fn drop(&mut self) {
        if Rc::strong_count(&self.0) != 1 {
            return;
        }
        if let Ok(mut items) = self.0.try_borrow_mut() {
            let pending = std::mem::take(&mut *items);
            drop(items);
            release(pending);
        }
    }
}

fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match &value {
            Value::Sequence(seq) if seq.holders() == 1 => {
                if let Ok(mut items) = seq.0.try_borrow_mut() {
                    pending.extend(items.drain());
                }
            }
            Value::Array(arr) if arr.holders() == 1 => {
                if let Ok(mut items) = arr.0.try_borrow_mut() {
                    pending.append(&mut items);
                }
            }
            _ => {}
        }
    }
}

fn array_slot(index: i32, len: usize) -> Result<usize, ValueError> {
    match usize::try_from(index) {
        Ok(slot) if slot < len => Ok(slot),
        _ => Err(ValueError::IndexOutOfRange {
            index: index as i64,
            len,
        }),
    }
}

/// A script value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value.
    #[default]
    Nothing,
    /// Signed 32-bit integer.
    Int(i32),
    /// Reference to a user function by id.
    Function(u32),
    /// Owned text.
    Str(String),
    /// Reference to a built-in by id.
    Builtin(u32),
    /// Handle into the external resource table.
    Resource(u32),
    /// Shared ordered sequence.
    Sequence(SequenceRef),
    /// Reference to an object type.
    ObjectType(u32),
    /// Externally owned animation.
    Animation(u32),
    /// Externally owned costume.
    Costume(u32),
    /// Shared fixed-size array.
    Array(ArrayRef),
}

// Values of different kinds are never equal. Containers compare by
// identity, everything else by content.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Resource(a), Value::Resource(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a.ptr_eq(b),
            (Value::ObjectType(a), Value::ObjectType(b)) => a == b,
            (Value::Animation(a), Value::Animation(b)) => a == b,
            (Value::Costume(a), Value::Costume(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(b as i32)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl Value {
    /// A new Sequence value whose top is the first element yielded.
    pub fn sequence(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Sequence(SequenceRef::new(ValueStack::from_top_down(values)))
    }

    /// A new Array value of `size` Nothing elements.
    pub fn array(size: usize) -> Self {
        Value::Array(ArrayRef::with_size(size))
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nothing => ValueKind::Nothing,
            Value::Int(_) => ValueKind::Int,
            Value::Function(_) => ValueKind::Function,
            Value::Str(_) => ValueKind::Str,
            Value::Builtin(_) => ValueKind::Builtin,
            Value::Resource(_) => ValueKind::Resource,
            Value::Sequence(_) => ValueKind::Sequence,
            Value::ObjectType(_) => ValueKind::ObjectType,
            Value::Animation(_) => ValueKind::Animation,
            Value::Costume(_) => ValueKind::Costume,
            Value::Array(_) => ValueKind::Array,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    /// The integer held, or a type mismatch.
    pub fn as_int(&self) -> Result<i32, ValueError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(other.mismatch(ValueKind::Int)),
        }
    }

    /// The string held, or a type mismatch.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch(ValueKind::Str)),
        }
    }

    /// The Sequence held, or a type mismatch.
    pub fn as_sequence(&self) -> Result<&SequenceRef, ValueError> {
        match self {
            Value::Sequence(s) => Ok(s),
            other => Err(other.mismatch(ValueKind::Sequence)),
        }
    }

    /// The function id held, or a type mismatch.
    pub fn as_function(&self) -> Result<u32, ValueError> {
        match self {
            Value::Function(id) => Ok(*id),
            other => Err(other.mismatch(ValueKind::Function)),
        }
    }

    /// The object type id held, or a type mismatch.
    pub fn as_object_type(&self) -> Result<u32, ValueError> {
        match self {
            Value::ObjectType(id) => Ok(*id),
            other => Err(other.mismatch(ValueKind::ObjectType)),
        }
    }

    /// A type mismatch error reporting this value's kind as the one found.
    pub fn mismatch(&self, expected: ValueKind) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// Truthiness as scripts see it.
    ///
    /// Nothing is false, integers are true when non-zero, strings and
    /// containers are true when non-empty. References and handles are
    /// always true.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Nothing => false,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Sequence(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            _ => true,
        }
    }

    /// Render as display text.
    ///
    /// Sequences render as `ARRAY:` and Arrays as `FAST:`, each followed by
    /// a space and the text of every element. A container met again while
    /// it is already being rendered shows as `...`.
    pub fn to_text<R: NameResolver + ?Sized>(&self, names: &R) -> String {
        let mut out = String::new();
        let mut open = HashSet::new();
        let mut work = vec![TextStep::Value(self.clone())];
        while let Some(step) = work.pop() {
            let value = match step {
                TextStep::Value(value) => value,
                TextStep::Item(value) => {
                    out.push(' ');
                    value
                }
                TextStep::Close(id) => {
                    open.remove(&id);
                    continue;
                }
            };
            let (id, label, items) = match &value {
                Value::Sequence(seq) => {
                    let items: Vec<Value> = seq.borrow().iter().cloned().collect();
                    (seq.identity(), "ARRAY:", items)
                }
                Value::Array(arr) => (arr.identity(), "FAST:", arr.values()),
                other => {
                    other.write_scalar(names, &mut out);
                    continue;
                }
            };
            if !open.insert(id) {
                out.push_str("...");
                continue;
            }
            out.push_str(label);
            work.push(TextStep::Close(id));
            work.extend(items.into_iter().rev().map(TextStep::Item));
        }
        out
    }

    fn write_scalar<R: NameResolver + ?Sized>(&self, names: &R, out: &mut String) {
        match self {
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::Str(s) => out.push_str(s),
            Value::Resource(id) => match names.resource_name(*id) {
                Some(name) => out.push_str(&name),
                None => out.push_str(self.kind().name()),
            },
            Value::ObjectType(id) => match names.object_type_name(*id) {
                Some(name) => out.push_str(&name),
                None => out.push_str(self.kind().name()),
            },
            other => out.push_str(other.kind().name()),
        }
    }
}

/// Pending work while rendering nested containers.
enum TextStep {
    Value(Value),
    /// A container element, preceded by a space.
    Item(Value),
    /// Leave the container with this identity.
    Close(usize),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text(&NoNames))
    }
}
