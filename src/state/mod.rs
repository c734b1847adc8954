//! Per-processor named, typed, permission-gated shared state variables and
//! remotely invocable methods.
//!
//! Scalar values are stored behind an atomic-friendly string cell so reads
//! and writes from the graph manager are lock-free; composite values (and
//! method dispatch) take a short-lived mutex, which is acceptable since
//! control traffic is low-rate (`spec.md` §4.C).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{FalconError, Result};

/// Read/write permission for a shared state, independently settable for
/// the owning processor ("internal") and for external control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// No access.
    None,
    /// Read-only access.
    Read,
    /// Read and write access.
    Write,
}

impl Permission {
    fn allows_read(self) -> bool {
        self >= Permission::Read
    }

    fn allows_write(self) -> bool {
        self == Permission::Write
    }
}

/// A typed value, stored in its canonical string form for lock-free
/// transport, alongside a fast-path numeric cache used when the value is
/// scalar.
struct StateCell {
    description: String,
    units: String,
    internal_perm: Permission,
    external_perm: Permission,
    numeric: AtomicU64, // bit pattern of an f64, used for scalar fast path
    text: Mutex<String>, // canonical string form, source of truth
}

/// A processor's named, permission-gated state variables and its method
/// registry. Owned by the processor, referenced by the Graph Manager for
/// `update` / `retrieve` / `apply` control commands.
#[derive(Default)]
pub struct SharedStateRegistry {
    states: HashMap<String, StateCell>,
    methods: Vec<String>,
}

impl SharedStateRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new named state with an initial f64 value and both
    /// permission levels. Called during `create_ports`.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        initial: f64,
        description: impl Into<String>,
        units: impl Into<String>,
        internal_perm: Permission,
        external_perm: Permission,
    ) {
        let name = name.into();
        self.states.insert(
            name,
            StateCell {
                description: description.into(),
                units: units.into(),
                internal_perm,
                external_perm,
                numeric: AtomicU64::new(initial.to_bits()),
                text: Mutex::new(initial.to_string()),
            },
        );
    }

    /// Declare an invocable method name. Called during `create_ports`.
    pub fn declare_method(&mut self, name: impl Into<String>) {
        self.methods.push(name.into());
    }

    /// Names of every declared state.
    pub fn state_names(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Read a state's current value as an f64, for use by the owning
    /// processor (always allowed regardless of permission, matching the
    /// original's direct member access).
    pub fn read_internal(&self, name: &str) -> Result<f64> {
        let cell = self.get_cell(name)?;
        Ok(f64::from_bits(cell.numeric.load(Ordering::Acquire)))
    }

    /// Write a state's value, for use by the owning processor.
    pub fn write_internal(&self, name: &str, value: f64) -> Result<()> {
        let cell = self.get_cell(name)?;
        cell.numeric.store(value.to_bits(), Ordering::Release);
        *cell.text.lock() = value.to_string();
        Ok(())
    }

    /// External read: allowed iff external permission is READ or WRITE.
    /// Returns the canonical string form.
    pub fn read_external(&self, processor: &str, name: &str) -> Result<String> {
        let cell = self.get_cell_named(processor, name)?;
        if !cell.external_perm.allows_read() {
            return Err(FalconError::shared_state(processor, name, "external read not permitted"));
        }
        Ok(cell.text.lock().clone())
    }

    /// External write: allowed iff external permission is WRITE. Parses the
    /// string into an f64; conversion failure is a warning-level error, not
    /// fatal to the batch it's part of.
    pub fn write_external(&self, processor: &str, name: &str, value: &str) -> Result<()> {
        let cell = self.get_cell_named(processor, name)?;
        if !cell.external_perm.allows_write() {
            return Err(FalconError::shared_state(processor, name, "external write not permitted"));
        }
        let parsed: f64 = value
            .parse()
            .map_err(|_| FalconError::shared_state(processor, name, format!("cannot parse \"{value}\" as number")))?;
        cell.numeric.store(parsed.to_bits(), Ordering::Release);
        *cell.text.lock() = value.to_string();
        Ok(())
    }

    /// Whether `name` is an invocable method.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m == name)
    }

    /// Description text for a declared state, for YAML export.
    pub fn describe(&self, name: &str) -> Result<(String, String)> {
        let cell = self.get_cell(name)?;
        Ok((cell.description.clone(), cell.units.clone()))
    }

    fn get_cell(&self, name: &str) -> Result<&StateCell> {
        self.states
            .get(name)
            .ok_or_else(|| FalconError::shared_state("<self>", name, "no such state"))
    }

    fn get_cell_named(&self, processor: &str, name: &str) -> Result<&StateCell> {
        self.states.get(name).ok_or_else(|| FalconError::shared_state(processor, name, "no such state"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SharedStateRegistry {
        let mut reg = SharedStateRegistry::new();
        reg.declare("threshold", 6.0, "detection threshold", "z-score", Permission::Write, Permission::Write);
        reg.declare("counter", 0.0, "read-only counter", "count", Permission::Write, Permission::Read);
        reg
    }

    #[test]
    fn internal_write_then_external_read_round_trips() {
        let reg = registry();
        reg.write_internal("counter", 42.0).unwrap();
        assert_eq!(reg.read_external("p", "counter").unwrap(), "42");
    }

    #[test]
    fn external_write_rejected_without_permission() {
        let reg = registry();
        assert!(reg.write_external("p", "counter", "1").is_err());
    }

    #[test]
    fn external_write_allowed_with_permission() {
        let reg = registry();
        reg.write_external("p", "threshold", "7.5").unwrap();
        assert_eq!(reg.read_internal("threshold").unwrap(), 7.5);
    }

    #[test]
    fn bad_conversion_is_rejected_not_fatal_to_caller() {
        let reg = registry();
        let result = reg.write_external("p", "threshold", "not-a-number");
        assert!(result.is_err());
        // registry still usable afterwards
        assert!(reg.read_external("p", "threshold").is_ok());
    }

    #[test]
    fn unknown_state_is_an_error() {
        let reg = registry();
        assert!(reg.read_external("p", "missing").is_err());
    }
}
