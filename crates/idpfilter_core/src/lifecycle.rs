//! Initialize-before-use, destroy-once component lifecycle.
//!
//! Configured components are built, initialized once, and then shared
//! read-only. The lifecycle tracks that progression and owns the
//! component's identifier and log prefix, both frozen at initialization.

use crate::error::{CoreError, CoreResult};
use crate::id::ComponentId;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a configured component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// Built but not yet initialized; still modifiable
    Uninitialized,
    /// Initialized and ready for use; no longer modifiable
    Initialized,
    /// Destroyed; unusable forever
    Destroyed,
}

/// Identity and lifecycle bookkeeping embedded in every component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    label: &'static str,
    id: Option<ComponentId>,
    log_prefix: String,
    state: ComponentState,
}

impl Lifecycle {
    /// Create an uninitialized lifecycle for a component of the given kind
    #[must_use]
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            id: None,
            log_prefix: String::new(),
            state: ComponentState::Uninitialized,
        }
    }

    /// Create an already initialized, anonymous lifecycle.
    ///
    /// Used for the built-in sentinel components, which need no setup.
    #[must_use]
    pub const fn initialized(label: &'static str) -> Self {
        Self {
            label,
            id: None,
            log_prefix: String::new(),
            state: ComponentState::Initialized,
        }
    }

    /// Component kind label, e.g. `"Attribute Rule"`
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Configured identifier, if any
    #[must_use]
    pub fn id(&self) -> Option<&ComponentId> {
        self.id.as_ref()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// Whether `initialize()` has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state == ComponentState::Initialized
    }

    /// Whether `destroy()` has been called
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state == ComponentState::Destroyed
    }

    /// Set the identifier. Only allowed before initialization.
    ///
    /// # Errors
    ///
    /// Returns error if the component is initialized or destroyed
    pub fn set_id(&mut self, id: ComponentId) -> CoreResult<()> {
        self.ensure_modifiable()?;
        self.id = Some(id);
        Ok(())
    }

    /// Prefix for log lines, fixed at initialization
    #[must_use]
    pub fn log_prefix(&self) -> &str {
        if self.log_prefix.is_empty() {
            self.label
        } else {
            &self.log_prefix
        }
    }

    /// Human-readable name used in error values
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.id {
            Some(id) => format!("{} '{}'", self.label, id),
            None => self.label.to_string(),
        }
    }

    /// Check whether initialization work is still needed.
    ///
    /// Returns `Ok(false)` when already initialized, so repeated
    /// initialization is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the component has been destroyed
    pub fn needs_initialize(&self) -> CoreResult<bool> {
        match self.state {
            ComponentState::Uninitialized => Ok(true),
            ComponentState::Initialized => Ok(false),
            ComponentState::Destroyed => Err(CoreError::Destroyed {
                component: self.describe(),
            }),
        }
    }

    /// Mark initialization complete and freeze the log prefix
    pub fn mark_initialized(&mut self) {
        if self.state == ComponentState::Uninitialized {
            self.log_prefix = format!("{}:", self.describe());
            self.state = ComponentState::Initialized;
        }
    }

    /// Destroy the component. Idempotent.
    pub fn destroy(&mut self) {
        self.state = ComponentState::Destroyed;
    }

    /// Fail unless the component is initialized and not destroyed
    ///
    /// # Errors
    ///
    /// Returns `Uninitialized` or `Destroyed`
    pub fn ensure_usable(&self) -> CoreResult<()> {
        match self.state {
            ComponentState::Initialized => Ok(()),
            ComponentState::Uninitialized => Err(CoreError::Uninitialized {
                component: self.describe(),
            }),
            ComponentState::Destroyed => Err(CoreError::Destroyed {
                component: self.describe(),
            }),
        }
    }

    /// Fail unless the component is still being configured
    ///
    /// # Errors
    ///
    /// Returns `Unmodifiable` or `Destroyed`
    pub fn ensure_modifiable(&self) -> CoreResult<()> {
        match self.state {
            ComponentState::Uninitialized => Ok(()),
            ComponentState::Initialized => Err(CoreError::Unmodifiable {
                component: self.describe(),
            }),
            ComponentState::Destroyed => Err(CoreError::Destroyed {
                component: self.describe(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_new() {
        let lc = Lifecycle::new("Matcher");
        assert_eq!(lc.state(), ComponentState::Uninitialized);
        assert!(lc.ensure_usable().is_err());
        assert!(lc.ensure_modifiable().is_ok());
    }

    #[test]
    fn test_lifecycle_initialize() {
        let mut lc = Lifecycle::new("Matcher");
        lc.set_id(ComponentId::new("m1").unwrap()).unwrap();
        assert!(lc.needs_initialize().unwrap());
        lc.mark_initialized();
        assert!(lc.is_initialized());
        assert!(!lc.needs_initialize().unwrap());
        assert_eq!(lc.log_prefix(), "Matcher 'm1':");
        assert!(lc.ensure_usable().is_ok());
    }

    #[test]
    fn test_lifecycle_frozen_after_init() {
        let mut lc = Lifecycle::new("Matcher");
        lc.mark_initialized();
        let err = lc.set_id(ComponentId::new("late").unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::Unmodifiable { .. }));
    }

    #[test]
    fn test_lifecycle_destroy() {
        let mut lc = Lifecycle::new("Matcher");
        lc.mark_initialized();
        lc.destroy();
        assert!(matches!(lc.ensure_usable(), Err(CoreError::Destroyed { .. })));
        assert!(matches!(lc.needs_initialize(), Err(CoreError::Destroyed { .. })));
    }

    #[test]
    fn test_lifecycle_destroyed_cannot_reinitialize() {
        let mut lc = Lifecycle::new("Rule");
        lc.destroy();
        lc.mark_initialized();
        assert!(lc.is_destroyed());
    }

    #[test]
    fn test_initialized_sentinel() {
        let lc = Lifecycle::initialized("Matches All");
        assert!(lc.ensure_usable().is_ok());
        assert_eq!(lc.log_prefix(), "Matches All");
    }
}
