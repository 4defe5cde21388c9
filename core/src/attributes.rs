/*
 * attributes.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Graticola, a non-blocking HTTP server framework.
 *
 * Graticola is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Graticola is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Graticola.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Index-addressed scratch state for connections and filter contexts.
//!
//! Attributes are registered once through the process-wide builder, which
//! assigns dense indices; lookup afterwards is a plain array access on the
//! holder. Holders are mutated only from the owning reactor thread.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::{Mutex, OnceLock};

static REGISTRY: OnceLock<Mutex<Vec<String>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<String>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Process-wide attribute id allocator. Ids are assigned monotonically on
/// first registration; the same name registered twice yields the same id.
pub struct AttributeBuilder;

impl AttributeBuilder {
    pub fn attribute<T: Any + Send>(name: impl Into<String>) -> Attribute<T> {
        let name = name.into();
        let mut names = registry().lock().unwrap();
        let index = match names.iter().position(|n| *n == name) {
            Some(i) => i,
            None => {
                names.push(name.clone());
                names.len() - 1
            }
        };
        Attribute {
            index,
            name,
            _marker: PhantomData,
        }
    }

    /// Resolve an id back to its registered name.
    pub fn name_of(index: usize) -> Option<String> {
        registry().lock().unwrap().get(index).cloned()
    }
}

/// Typed handle for one registered attribute slot.
pub struct Attribute<T> {
    index: usize,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send> Attribute<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get<'a>(&self, holder: &'a AttributeHolder) -> Option<&'a T> {
        holder.get(self.index).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<'a>(&self, holder: &'a mut AttributeHolder) -> Option<&'a mut T> {
        holder
            .get_raw_mut(self.index)
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn set(&self, holder: &mut AttributeHolder, value: T) {
        holder.set(self.index, Box::new(value));
    }

    pub fn remove(&self, holder: &mut AttributeHolder) -> Option<T> {
        holder
            .remove(self.index)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }
}

/// Dense slot array addressed by attribute id.
#[derive(Default)]
pub struct AttributeHolder {
    slots: Vec<Option<Box<dyn Any + Send>>>,
}

impl AttributeHolder {
    pub fn new() -> Self {
        AttributeHolder::default()
    }

    /// Out-of-range indices read as absent.
    pub fn get(&self, index: usize) -> Option<&(dyn Any + Send)> {
        self.slots
            .get(index)
            .and_then(|s| s.as_ref())
            .map(|b| b.as_ref())
    }

    fn get_raw_mut(&mut self, index: usize) -> Option<&mut Box<dyn Any + Send>> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    /// Grows the array as needed.
    pub fn set(&mut self, index: usize, value: Box<dyn Any + Send>) {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(value);
    }

    /// Writes `None` at the slot without shrinking.
    pub fn remove(&mut self, index: usize) -> Option<Box<dyn Any + Send>> {
        self.slots.get_mut(index).and_then(|s| s.take())
    }

    /// Truncate to length zero.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of all populated slots, resolved through the builder registry.
    pub fn attribute_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .filter_map(|(i, _)| AttributeBuilder::name_of(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_index() {
        let a: Attribute<u32> = AttributeBuilder::attribute("test.same-name");
        let b: Attribute<u32> = AttributeBuilder::attribute("test.same-name");
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn set_get_remove() {
        let attr: Attribute<String> = AttributeBuilder::attribute("test.set-get");
        let mut holder = AttributeHolder::new();
        assert!(attr.get(&holder).is_none());
        attr.set(&mut holder, "value".to_string());
        assert_eq!(attr.get(&holder).map(String::as_str), Some("value"));
        assert_eq!(attr.remove(&mut holder), Some("value".to_string()));
        assert!(attr.get(&holder).is_none());
        // Removal does not shrink.
        assert!(holder.len() > attr.index());
    }

    #[test]
    fn out_of_range_get_is_none() {
        let holder = AttributeHolder::new();
        assert!(holder.get(999).is_none());
    }

    #[test]
    fn clear_truncates() {
        let attr: Attribute<u64> = AttributeBuilder::attribute("test.clear");
        let mut holder = AttributeHolder::new();
        attr.set(&mut holder, 7);
        holder.clear();
        assert_eq!(holder.len(), 0);
        assert!(attr.get(&holder).is_none());
    }

    #[test]
    fn names_resolve_through_builder() {
        let attr: Attribute<bool> = AttributeBuilder::attribute("test.names");
        let mut holder = AttributeHolder::new();
        attr.set(&mut holder, true);
        let names = holder.attribute_names();
        assert!(names.contains(&"test.names".to_string()));
    }
}
