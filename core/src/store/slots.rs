// switchyard/src/store/slots.rs

//! A bounded slot table (arena + free list) addressed by generation-tagged handles.
//!
//! Slots are reused after removal, but every removal bumps the slot's generation, so
//! a stale handle to a recycled slot never resolves to the new occupant.

use crate::error::{WorkflowError, WorkflowResult};
use std::fmt;
use std::str::FromStr;

/// Identifies a registered session. Rendered as `index.generation` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
  index: u32,
  generation: u32,
}

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.index, self.generation)
  }
}

impl FromStr for SessionId {
  type Err = WorkflowError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let not_found = || WorkflowError::SessionNotFound { id: s.to_string() };
    let (index, generation) = s.split_once('.').ok_or_else(not_found)?;
    Ok(SessionId {
      index: index.parse().map_err(|_| not_found())?,
      generation: generation.parse().map_err(|_| not_found())?,
    })
  }
}

struct Slot<T> {
  generation: u32,
  value: Option<T>,
}

pub(crate) struct SlotTable<T> {
  slots: Vec<Slot<T>>,
  free: Vec<u32>,
  capacity: usize,
  live: usize,
}

impl<T> SlotTable<T> {
  pub(crate) fn with_capacity(capacity: usize) -> Self {
    SlotTable {
      slots: Vec::new(),
      free: Vec::new(),
      capacity,
      live: 0,
    }
  }

  pub(crate) fn insert(&mut self, value: T) -> WorkflowResult<SessionId> {
    let index = match self.free.pop() {
      Some(index) => index,
      None => {
        if self.slots.len() >= self.capacity || self.slots.len() >= u32::MAX as usize {
          return Err(WorkflowError::StoreFull { capacity: self.capacity });
        }
        self.slots.push(Slot {
          generation: 0,
          value: None,
        });
        (self.slots.len() - 1) as u32
      }
    };
    let slot = &mut self.slots[index as usize];
    slot.value = Some(value);
    self.live += 1;
    Ok(SessionId {
      index,
      generation: slot.generation,
    })
  }

  pub(crate) fn get(&self, id: SessionId) -> Option<&T> {
    self
      .slots
      .get(id.index as usize)
      .filter(|slot| slot.generation == id.generation)
      .and_then(|slot| slot.value.as_ref())
  }

  pub(crate) fn remove(&mut self, id: SessionId) -> Option<T> {
    let slot = self.slots.get_mut(id.index as usize)?;
    if slot.generation != id.generation {
      return None;
    }
    let value = slot.value.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.index);
    self.live -= 1;
    Some(value)
  }

  pub(crate) fn len(&self) -> usize {
    self.live
  }

  pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
    self.slots.iter().filter_map(|slot| slot.value.as_ref())
  }
}
