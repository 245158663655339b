//! Published-procedure registry.
//!
//! Maps procedure names to callables and remembers registration order -
//! the handshake reply carries the names as an ordered sequence.

use std::collections::HashMap;

use crate::error::{Result, WireError};
use crate::peer::READY;
use crate::value::Callback;

/// Registry of procedures an agent publishes to its peers.
#[derive(Default)]
pub struct ProcedureRegistry {
    /// Names in registration order.
    order: Vec<String>,
    /// Callables by name.
    procs: HashMap<String, Callback>,
}

impl ProcedureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a procedure, replacing any previous one under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error for the reserved name `"ready"`.
    pub fn insert(&mut self, name: impl Into<String>, procedure: Callback) -> Result<()> {
        let name = name.into();
        if name == READY {
            return Err(WireError::Protocol(format!(
                "procedure name {name:?} is reserved"
            )));
        }
        if !self.procs.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.procs.insert(name, procedure);
        Ok(())
    }

    /// Look up a published procedure.
    pub fn get(&self, name: &str) -> Option<&Callback> {
        self.procs.get(name)
    }

    /// Published names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of published procedures.
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    /// Whether nothing is published.
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut registry = ProcedureRegistry::new();
        registry.insert("echo", Callback::new(|_| {})).unwrap();

        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_keep_registration_order() {
        let mut registry = ProcedureRegistry::new();
        registry.insert("zeta", Callback::new(|_| {})).unwrap();
        registry.insert("alpha", Callback::new(|_| {})).unwrap();
        registry.insert("mid", Callback::new(|_| {})).unwrap();

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut registry = ProcedureRegistry::new();
        registry.insert("a", Callback::new(|_| {})).unwrap();
        registry.insert("b", Callback::new(|_| {})).unwrap();
        registry.insert("a", Callback::new(|_| {})).unwrap();

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ready_is_reserved() {
        let mut registry = ProcedureRegistry::new();
        let result = registry.insert(READY, Callback::new(|_| {}));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
