#![forbid(unsafe_code)]

//! Name-keyed property records with automatic unwrapping of cells.
//!
//! An [`Entangled`] record maps property names to typed slots. A slot holds
//! one of:
//!
//! - a plain value ([`define_value`](Entangled::define_value));
//! - an [`Observable`] that is read and written *through*
//!   ([`define_cell`](Entangled::define_cell) with `unwrap = true`);
//! - a read-only [`Computed`] view
//!   ([`define_derived`](Entangled::define_derived)).
//!
//! A cell defined with `unwrap = false` is stored as a plain value of type
//! `Observable<T>`, so `get::<Observable<T>>` hands back the cell itself.
//! [`cell`](Entangled::cell) retrieves the underlying cell for either form,
//! which is how watchers observe a property's cell instead of its current
//! value.
//!
//! Freezing a record fixes its set of keys. Writes through cells keep
//! working; plain values become immutable.
//!
//! # Example
//!
//! ```
//! use tangle_runtime::entangled::Entangled;
//! use tangle_runtime::reactive::Observable;
//!
//! let name = Observable::new(String::from("ada"));
//! let mut props = Entangled::new();
//! props.define_cell("name", name.clone(), true).unwrap();
//! props.set("name", String::from("grace")).unwrap();
//! assert_eq!(name.get(), "grace");
//! assert!(props.cell::<String>("name").unwrap().ptr_eq(&name));
//! ```

use std::any::{Any, type_name};
use std::fmt;

use crate::error::{Error, Result};
use crate::reactive::{Computed, Observable};

enum Slot<T> {
    Value(T),
    Cell(Observable<T>),
    Derived(Computed<T>),
}

/// A record of named, typed properties.
#[derive(Default)]
pub struct Entangled {
    props: Vec<(String, Box<dyn Any>)>,
    frozen: bool,
}

impl Entangled {
    /// An empty, unfrozen record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a plain value property.
    pub fn define_value<T: Clone + PartialEq + 'static>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<()> {
        self.define(key.into(), Box::new(Slot::Value(value)))
    }

    /// Define a cell-backed property.
    ///
    /// With `unwrap`, reads and writes go through the cell. Without it the
    /// cell itself is the property value.
    pub fn define_cell<T: Clone + PartialEq + 'static>(
        &mut self,
        key: impl Into<String>,
        cell: Observable<T>,
        unwrap: bool,
    ) -> Result<()> {
        let slot: Box<dyn Any> = if unwrap {
            Box::new(Slot::Cell(cell))
        } else {
            Box::new(Slot::Value(cell))
        };
        self.define(key.into(), slot)
    }

    /// Define a read-only derived property.
    pub fn define_derived<T: Clone + PartialEq + 'static>(
        &mut self,
        key: impl Into<String>,
        computed: Computed<T>,
    ) -> Result<()> {
        self.define(key.into(), Box::new(Slot::Derived(computed)))
    }

    fn define(&mut self, key: String, slot: Box<dyn Any>) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen { key });
        }
        if self.contains(&key) {
            return Err(Error::DuplicateProperty { key });
        }
        self.props.push((key, slot));
        Ok(())
    }

    fn raw(&self, key: &str) -> Result<&dyn Any> {
        self.props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, slot)| slot.as_ref())
            .ok_or_else(|| Error::unknown(key))
    }

    fn slot<T: 'static>(&self, key: &str) -> Result<&Slot<T>> {
        self.raw(key)?
            .downcast_ref::<Slot<T>>()
            .ok_or_else(|| Error::TypeMismatch {
                key: key.to_owned(),
                expected: type_name::<T>(),
            })
    }

    /// Current value of a property, unwrapping cells and derived views.
    pub fn get<T: Clone + PartialEq + 'static>(&self, key: &str) -> Result<T> {
        Ok(match self.slot::<T>(key)? {
            Slot::Value(value) => value.clone(),
            Slot::Cell(cell) => cell.get(),
            Slot::Derived(computed) => computed.get(),
        })
    }

    /// Write a property. Returns whether the stored value changed.
    ///
    /// Cell-backed properties write through the cell (and notify its
    /// observers). Derived properties are read-only. Plain values cannot be
    /// changed once the record is frozen.
    pub fn set<T: Clone + PartialEq + 'static>(&mut self, key: &str, value: T) -> Result<bool> {
        let frozen = self.frozen;
        let slot = self
            .props
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, slot)| slot)
            .ok_or_else(|| Error::unknown(key))?;
        let slot = slot
            .downcast_mut::<Slot<T>>()
            .ok_or_else(|| Error::TypeMismatch {
                key: key.to_owned(),
                expected: type_name::<T>(),
            })?;
        match slot {
            Slot::Cell(cell) => Ok(cell.set(value)),
            Slot::Derived(_) => Err(Error::ReadOnly {
                key: key.to_owned(),
            }),
            Slot::Value(_) if frozen => Err(Error::Frozen {
                key: key.to_owned(),
            }),
            Slot::Value(current) => {
                if *current == value {
                    return Ok(false);
                }
                *current = value;
                Ok(true)
            }
        }
    }

    /// The cell behind a property, whether or not it is unwrapped.
    pub fn cell<T: Clone + PartialEq + 'static>(&self, key: &str) -> Result<Observable<T>> {
        let raw = self.raw(key)?;
        if let Some(Slot::Cell(cell)) = raw.downcast_ref::<Slot<T>>() {
            return Ok(cell.clone());
        }
        if let Some(Slot::Value(cell)) = raw.downcast_ref::<Slot<Observable<T>>>() {
            return Ok(cell.clone());
        }
        Err(Error::TypeMismatch {
            key: key.to_owned(),
            expected: type_name::<Observable<T>>(),
        })
    }

    /// Every property holding a `T`, in definition order, with its current
    /// value.
    #[must_use]
    pub fn values<T: Clone + PartialEq + 'static>(&self) -> Vec<(String, T)> {
        self.props
            .iter()
            .filter_map(|(key, slot)| {
                let value = match slot.downcast_ref::<Slot<T>>()? {
                    Slot::Value(value) => value.clone(),
                    Slot::Cell(cell) => cell.get(),
                    Slot::Derived(computed) => computed.get(),
                };
                Some((key.clone(), value))
            })
            .collect()
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen {
                key: key.to_owned(),
            });
        }
        let index = self
            .props
            .iter()
            .position(|(k, _)| k == key)
            .ok_or_else(|| Error::unknown(key))?;
        self.props.remove(index);
        Ok(())
    }

    /// Fix the set of keys.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.props.iter().any(|(k, _)| k == key)
    }

    /// Property names in definition order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.props.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.props.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

impl fmt::Debug for Entangled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entangled")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .field("frozen", &self.frozen)
            .finish()
    }
}
