//! Pseudo-command registry
//!
//! `%name` lines never reach the device. The controller looks the name up
//! here and runs the handler on its dispatch thread, which holds back any
//! further streaming until the handler returns.

use std::sync::Arc;

use gcodelink_core::Result;
use gcodelink_gcode::{WAIT_FOR_IDLE, WAIT_FOR_LAST_COMMAND};

use super::controller::Controller;

/// Handler run for a pseudo-command
pub type PseudoCommandHandler = Arc<dyn Fn(&Controller) -> Result<()> + Send + Sync>;

/// Ordered name -> handler table
#[derive(Clone, Default)]
pub struct PseudoCommandRegistry {
    handlers: Vec<(String, PseudoCommandHandler)>,
}

impl PseudoCommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `wait_for_idle` and `wait_for_last_command`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(WAIT_FOR_IDLE, |controller: &Controller| {
            controller.wait_for_idle(Some(controller.config().wait_timeout))
        });
        registry.register(WAIT_FOR_LAST_COMMAND, |controller: &Controller| {
            controller.wait_for_last_command()
        });
        registry
    }

    /// Register a handler; a second registration under the same name
    /// replaces the first but keeps its position
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Controller) -> Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let handler: PseudoCommandHandler = Arc::new(handler);
        match self.handlers.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((name, handler)),
        }
    }

    /// Look up a handler by exact name
    pub fn get(&self, name: &str) -> Option<PseudoCommandHandler> {
        self.handlers
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, handler)| handler.clone())
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl std::fmt::Debug for PseudoCommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoCommandRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_come_first() {
        let mut registry = PseudoCommandRegistry::with_builtins();
        registry.register("beep", |_: &Controller| Ok(()));
        assert_eq!(
            registry.names(),
            vec!["wait_for_idle", "wait_for_last_command", "beep"]
        );
        assert!(registry.get("beep").is_some());
        assert!(registry.get("%beep").is_none());
    }

    #[test]
    fn test_reregistration_keeps_position() {
        let mut registry = PseudoCommandRegistry::with_builtins();
        registry.register("wait_for_idle", |_: &Controller| Ok(()));
        assert_eq!(
            registry.names(),
            vec!["wait_for_idle", "wait_for_last_command"]
        );
    }
}
