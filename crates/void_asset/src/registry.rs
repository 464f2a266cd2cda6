//! Asset Registry - static catalogue of loadable units
//!
//! Descriptors are registered once during setup and never mutated. A
//! descriptor may be replaced until the queue seals it by starting a task
//! for its id; after that the registration is fixed.

use crate::handle::{AssetId, AssetKind, AssetPriority};
use crate::loader::AssetProducer;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Descriptor not found
    #[error("Asset descriptor not found: {0}")]
    NotFound(AssetId),

    /// A task already ran for this id, so it can no longer be replaced
    #[error("Asset descriptor {0} is in use and cannot be replaced")]
    DescriptorInUse(AssetId),

    /// Registering would close a dependency loop
    #[error("Dependency cycle: {}", format_cycle(.0))]
    DependencyCycle(Vec<AssetId>),
}

fn format_cycle(path: &[AssetId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A loadable unit
#[derive(Clone)]
pub struct AssetDescriptor {
    /// Unique identity
    pub id: AssetId,
    /// Resource kind
    pub kind: AssetKind,
    /// Queue ordering class
    pub priority: AssetPriority,
    /// Relative cost unit used for progress weighting
    pub estimated_size: u64,
    /// Descriptors that must load first
    pub dependencies: Vec<AssetId>,
    /// Async factory
    pub producer: Arc<dyn AssetProducer>,
}

impl AssetDescriptor {
    /// Create a new descriptor with medium priority and unit size
    pub fn new(id: impl Into<AssetId>, kind: AssetKind, producer: impl AssetProducer + 'static) -> Self {
        Self {
            id: id.into(),
            kind,
            priority: AssetPriority::default(),
            estimated_size: 1,
            dependencies: Vec::new(),
            producer: Arc::new(producer),
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: AssetPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the estimated size
    pub fn with_size(mut self, estimated_size: u64) -> Self {
        self.estimated_size = estimated_size;
        self
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dep: impl Into<AssetId>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }
}

impl fmt::Debug for AssetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("estimated_size", &self.estimated_size)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

struct RegistryEntry {
    descriptor: Arc<AssetDescriptor>,
    /// Registration order, used for FIFO ties within a priority class
    seq: u64,
    /// Set once a task has run for this id
    sealed: bool,
}

/// Catalogue of all registered descriptors
#[derive(Default)]
pub struct AssetRegistry {
    entries: HashMap<AssetId, RegistryEntry>,
    order: Vec<AssetId>,
    next_seq: u64,
}

impl AssetRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a descriptor
    pub fn register(&mut self, descriptor: AssetDescriptor) -> Result<(), RegistryError> {
        if let Some(entry) = self.entries.get(&descriptor.id) {
            if entry.sealed {
                return Err(RegistryError::DescriptorInUse(descriptor.id));
            }
        }

        if let Some(cycle) = self.find_cycle(&descriptor) {
            return Err(RegistryError::DependencyCycle(cycle));
        }

        let id = descriptor.id.clone();
        let descriptor = Arc::new(descriptor);
        match self.entries.get_mut(&id) {
            Some(entry) => {
                log::debug!("Replacing asset descriptor {}", id);
                entry.descriptor = descriptor;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(id.clone(), RegistryEntry { descriptor, seq, sealed: false });
                self.order.push(id);
            }
        }
        Ok(())
    }

    /// Get a descriptor
    pub fn get(&self, id: &AssetId) -> Result<Arc<AssetDescriptor>, RegistryError> {
        self.entries
            .get(id)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Registration sequence number of a descriptor
    pub fn sequence(&self, id: &AssetId) -> Option<u64> {
        self.entries.get(id).map(|e| e.seq)
    }

    /// Check if a descriptor is registered
    pub fn contains(&self, id: &AssetId) -> bool {
        self.entries.contains_key(id)
    }

    /// Iterate all descriptors in registration order
    ///
    /// The iterator is lazy and can be cloned to restart it.
    pub fn all(&self) -> impl Iterator<Item = &Arc<AssetDescriptor>> + Clone + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.entries.get(id).map(|e| &e.descriptor))
    }

    /// Remove a descriptor that no task has run for yet
    pub fn unregister(&mut self, id: &AssetId) -> Result<Arc<AssetDescriptor>, RegistryError> {
        match self.entries.get(id) {
            None => return Err(RegistryError::NotFound(id.clone())),
            Some(entry) if entry.sealed => return Err(RegistryError::DescriptorInUse(id.clone())),
            Some(_) => {}
        }
        self.order.retain(|x| x != id);
        self.entries
            .remove(id)
            .map(|e| e.descriptor)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Remove a descriptor regardless of whether a task ran for it
    ///
    /// Used when the owning scene is removed; tasks already holding the
    /// descriptor keep their copy.
    pub fn remove(&mut self, id: &AssetId) -> Option<Arc<AssetDescriptor>> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|x| x != id);
        Some(entry.descriptor)
    }

    /// Mark a descriptor as used by a task
    pub fn seal(&mut self, id: &AssetId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.sealed = true;
        }
    }

    /// Check if a task has run for a descriptor
    pub fn is_sealed(&self, id: &AssetId) -> bool {
        self.entries.get(id).map(|e| e.sealed).unwrap_or(false)
    }

    /// Sum of estimated sizes over every descriptor
    pub fn total_weight(&self) -> u64 {
        self.all().map(|d| d.estimated_size).sum()
    }

    /// Get number of registered descriptors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find_cycle(&self, candidate: &AssetDescriptor) -> Option<Vec<AssetId>> {
        let mut visited = HashSet::new();
        for dep in &candidate.dependencies {
            let mut path = vec![candidate.id.clone()];
            if self.reaches(dep, &candidate.id, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    // Depth-first walk over registered dependencies. The candidate's own
    // (possibly stale) entry is never expanded because reaching it ends the walk.
    fn reaches(
        &self,
        from: &AssetId,
        target: &AssetId,
        visited: &mut HashSet<AssetId>,
        path: &mut Vec<AssetId>,
    ) -> bool {
        path.push(from.clone());
        if from == target {
            return true;
        }
        if visited.insert(from.clone()) {
            if let Some(entry) = self.entries.get(from) {
                for dep in &entry.descriptor.dependencies {
                    if self.reaches(dep, target, visited, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }
}

impl fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("descriptors", &self.order)
            .finish()
    }
}
