//! Realm bookkeeping for a single test execution.
//!
//! Realms live in a [`RealmArena`] owned by one execution. Handles are
//! index + generation pairs, so a handle that outlives its realm is detected
//! instead of silently aliasing a newer realm in the same slot.

use crate::fault::GcZeal;
use core_types::{ThrownError, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors from realm operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealmError {
    #[error("realm handle {0} is stale")]
    StaleHandle(RealmHandle),

    #[error("realm {0} already has an observer")]
    ObserverAlreadyAttached(RealmHandle),

    #[error("observer for realm {0} is no longer attached")]
    ObserverDetached(RealmHandle),

    #[error("value cannot cross from realm {from} to realm {to}: {reason}")]
    BoundaryViolation {
        from: RealmHandle,
        to: RealmHandle,
        reason: &'static str,
    },

    #[error("unknown isolation `{0}` (expected fresh-global, fresh-compartment or same-zone)")]
    UnknownIsolation(String),
}

/// Generational handle into a [`RealmArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealmHandle {
    index: u32,
    generation: u32,
}

impl RealmHandle {
    /// Slot index, used as the realm id on the wire
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RealmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Handle to the observer attached to a realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    realm: RealmHandle,
}

impl ObserverHandle {
    pub fn realm(&self) -> RealmHandle {
        self.realm
    }
}

/// Memory-management grouping shared by realms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub u32);

/// Object-identity boundary within a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompartmentId(pub u32);

/// Directive-level isolation choice (`realm=...`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationKind {
    FreshGlobal,
    FreshCompartment,
    SameZone,
}

impl IsolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationKind::FreshGlobal => "fresh-global",
            IsolationKind::FreshCompartment => "fresh-compartment",
            IsolationKind::SameZone => "same-zone",
        }
    }
}

impl FromStr for IsolationKind {
    type Err = RealmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh-global" => Ok(IsolationKind::FreshGlobal),
            "fresh-compartment" => Ok(IsolationKind::FreshCompartment),
            "same-zone" => Ok(IsolationKind::SameZone),
            other => Err(RealmError::UnknownIsolation(other.to_string())),
        }
    }
}

/// How a new realm relates to existing ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// New global sharing the default zone and compartment
    FreshGlobal,
    /// New zone with its own compartment
    FreshCompartment,
    /// New compartment in the zone of an existing realm
    SameZoneAs(RealmHandle),
}

impl Isolation {
    fn kind(self) -> IsolationKind {
        match self {
            Isolation::FreshGlobal => IsolationKind::FreshGlobal,
            Isolation::FreshCompartment => IsolationKind::FreshCompartment,
            Isolation::SameZoneAs(_) => IsolationKind::SameZone,
        }
    }
}

/// Options for [`RealmArena::create_realm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealmOptions {
    pub isolation: Isolation,
    pub gc_zeal: Option<GcZeal>,
}

impl RealmOptions {
    pub fn new(isolation: Isolation) -> Self {
        Self {
            isolation,
            gc_zeal: None,
        }
    }

    pub fn with_gc_zeal(mut self, gc_zeal: Option<GcZeal>) -> Self {
        self.gc_zeal = gc_zeal;
        self
    }
}

/// Observable event inside an observed realm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TraceEvent {
    CallEntry { function: String },
    CallExit { function: String },
    ExceptionThrown(ThrownError),
    ScriptLoad { url: String },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::CallEntry { function } => write!(f, "enter {}", function),
            TraceEvent::CallExit { function } => write!(f, "exit {}", function),
            TraceEvent::ExceptionThrown(error) => write!(f, "throw {}", error),
            TraceEvent::ScriptLoad { url } => write!(f, "load {}", url),
        }
    }
}

/// Finite, ordered trace collected from an observer.
///
/// Cheap to clone; replaying it any number of times yields the same events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace(Arc<[TraceEvent]>);

impl Trace {
    pub fn events(&self) -> &[TraceEvent] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Feed every event, in order, to `visit`.
    pub fn replay<F: FnMut(&TraceEvent)>(&self, mut visit: F) {
        for event in self.0.iter() {
            visit(event);
        }
    }
}

impl From<Vec<TraceEvent>> for Trace {
    fn from(events: Vec<TraceEvent>) -> Self {
        Trace(events.into())
    }
}

/// A value crossing realm boundaries
#[derive(Debug, Clone, PartialEq)]
pub enum CrossValue {
    /// Primitive; identical in every realm
    Primitive(Value),
    /// Object owned by `owner`
    Object { owner: RealmHandle, id: u64 },
    /// Cross-compartment wrapper held by `holder` for an object of `owner`
    Wrapper {
        holder: RealmHandle,
        owner: RealmHandle,
        id: u64,
    },
}

/// Realm layout sent to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmSpec {
    pub id: u32,
    pub isolation: IsolationKind,
    pub zone: ZoneId,
    pub compartment: CompartmentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc_zeal: Option<String>,
    #[serde(default)]
    pub observed: bool,
}

#[derive(Debug)]
struct RealmEntry {
    options: RealmOptions,
    zone: ZoneId,
    compartment: CompartmentId,
    observer: Option<Vec<TraceEvent>>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<RealmEntry>,
}

const DEFAULT_ZONE: ZoneId = ZoneId(0);
const DEFAULT_COMPARTMENT: CompartmentId = CompartmentId(0);

/// Owner of every realm created during one test execution
#[derive(Debug, Default)]
pub struct RealmArena {
    slots: Vec<Slot>,
    next_zone: u32,
    next_compartment: u32,
}

impl RealmArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_zone: DEFAULT_ZONE.0 + 1,
            next_compartment: DEFAULT_COMPARTMENT.0 + 1,
        }
    }

    /// Create a realm.
    pub fn create_realm(&mut self, options: RealmOptions) -> Result<RealmHandle, RealmError> {
        let (zone, compartment) = match options.isolation {
            Isolation::FreshGlobal => (DEFAULT_ZONE, DEFAULT_COMPARTMENT),
            Isolation::FreshCompartment => (self.fresh_zone(), self.fresh_compartment()),
            Isolation::SameZoneAs(anchor) => (self.entry(anchor)?.zone, self.fresh_compartment()),
        };
        let entry = RealmEntry {
            options,
            zone,
            compartment,
            observer: None,
        };

        let index = match self.slots.iter().position(|s| s.entry.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.entry = Some(entry);
        Ok(RealmHandle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    fn fresh_zone(&mut self) -> ZoneId {
        let zone = ZoneId(self.next_zone);
        self.next_zone += 1;
        zone
    }

    fn fresh_compartment(&mut self) -> CompartmentId {
        let compartment = CompartmentId(self.next_compartment);
        self.next_compartment += 1;
        compartment
    }

    fn entry(&self, handle: RealmHandle) -> Result<&RealmEntry, RealmError> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
            .ok_or(RealmError::StaleHandle(handle))
    }

    fn entry_mut(&mut self, handle: RealmHandle) -> Result<&mut RealmEntry, RealmError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
            .ok_or(RealmError::StaleHandle(handle))
    }

    /// Whether `handle` refers to a live realm
    pub fn is_live(&self, handle: RealmHandle) -> bool {
        self.entry(handle).is_ok()
    }

    /// Live handle for a wire id
    pub fn handle_for(&self, id: u32) -> Option<RealmHandle> {
        let slot = self.slots.get(id as usize)?;
        slot.entry.as_ref().map(|_| RealmHandle {
            index: id,
            generation: slot.generation,
        })
    }

    /// Number of live realms
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zone(&self, handle: RealmHandle) -> Result<ZoneId, RealmError> {
        Ok(self.entry(handle)?.zone)
    }

    pub fn compartment(&self, handle: RealmHandle) -> Result<CompartmentId, RealmError> {
        Ok(self.entry(handle)?.compartment)
    }

    /// Attach the realm's single observer.
    pub fn attach_observer(&mut self, realm: RealmHandle) -> Result<ObserverHandle, RealmError> {
        let entry = self.entry_mut(realm)?;
        if entry.observer.is_some() {
            return Err(RealmError::ObserverAlreadyAttached(realm));
        }
        entry.observer = Some(Vec::new());
        Ok(ObserverHandle { realm })
    }

    /// Buffer an event; returns false when the realm has no observer.
    pub fn record(&mut self, realm: RealmHandle, event: TraceEvent) -> Result<bool, RealmError> {
        match &mut self.entry_mut(realm)?.observer {
            Some(events) => {
                events.push(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Snapshot of every event recorded since the observer attached.
    pub fn collect(&self, observer: ObserverHandle) -> Result<Trace, RealmError> {
        let entry = self.entry(observer.realm)?;
        match &entry.observer {
            Some(events) => Ok(Trace::from(events.clone())),
            None => Err(RealmError::ObserverDetached(observer.realm)),
        }
    }

    /// Destroy a realm and its observer. Stale handles are ignored.
    pub fn destroy_realm(&mut self, realm: RealmHandle) -> bool {
        match self.slots.get_mut(realm.index as usize) {
            Some(slot) if slot.generation == realm.generation && slot.entry.is_some() => {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            _ => false,
        }
    }

    /// Destroy every live realm.
    pub fn teardown(&mut self) {
        for slot in &mut self.slots {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }

    /// Move a value from one realm to another.
    pub fn transfer(
        &self,
        value: CrossValue,
        from: RealmHandle,
        to: RealmHandle,
    ) -> Result<CrossValue, RealmError> {
        let source = self.entry(from)?;
        let target = self.entry(to)?;
        let violation = |reason| RealmError::BoundaryViolation { from, to, reason };

        match value {
            CrossValue::Primitive(_) => Ok(value),
            CrossValue::Object { owner, id } => {
                if owner != from {
                    return Err(violation("object is not owned by the source realm"));
                }
                if source.compartment == target.compartment {
                    Ok(value)
                } else {
                    Ok(CrossValue::Wrapper {
                        holder: to,
                        owner,
                        id,
                    })
                }
            }
            CrossValue::Wrapper { holder, owner, id } => {
                if holder != from {
                    return Err(violation("wrapper is not held by the source realm"));
                }
                let owner_compartment = self.entry(owner)?.compartment;
                if owner_compartment == target.compartment {
                    Ok(CrossValue::Object { owner, id })
                } else {
                    Err(violation("wrapper can only return to its owner's compartment"))
                }
            }
        }
    }

    /// Layout of the live realms, ordered by id
    pub fn specs(&self) -> Vec<RealmSpec> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry.as_ref().map(|entry| RealmSpec {
                    id: index as u32,
                    isolation: entry.options.isolation.kind(),
                    zone: entry.zone,
                    compartment: entry.compartment,
                    gc_zeal: entry.options.gc_zeal.map(|z| z.to_env_value()),
                    observed: entry.observer.is_some(),
                })
            })
            .collect()
    }
}
