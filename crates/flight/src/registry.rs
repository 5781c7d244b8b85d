//! Immutable flight-kind registry built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::flight::{Flight, FlightBuildError, FlightFactory, FlightKind, FnFactory};
use crate::map::FlightMap;

/// Collects factories before freezing them into a [`FlightRegistry`].
#[derive(Default)]
pub struct FlightRegistryBuilder {
    factories: HashMap<FlightKind, Arc<dyn FlightFactory>>,
    duplicates: Vec<FlightKind>,
}

impl FlightRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, factory: impl FlightFactory + 'static) -> Self {
        let kind = factory.kind();
        if self.factories.insert(kind.clone(), Arc::new(factory)).is_some() {
            self.duplicates.push(kind);
        }
        self
    }

    /// Register a closure as the factory for `kind`.
    pub fn register_fn<F>(self, kind: FlightKind, build: F) -> Self
    where
        F: Fn(&FlightMap) -> Result<Flight, FlightBuildError> + Send + Sync + 'static,
    {
        self.register(FnFactory { kind, build })
    }

    /// Freeze the registry. Registering a kind twice is rejected.
    pub fn build(self) -> Result<FlightRegistry, FlightBuildError> {
        if let Some(kind) = self.duplicates.into_iter().next() {
            return Err(FlightBuildError::DuplicateKind(kind));
        }
        Ok(FlightRegistry {
            factories: self.factories,
        })
    }
}

/// Read-only table from flight kind to factory.
///
/// Shared by reference between the executor (to rebuild flights from records)
/// and the job service (to validate submissions).
#[derive(Clone)]
pub struct FlightRegistry {
    factories: HashMap<FlightKind, Arc<dyn FlightFactory>>,
}

impl FlightRegistry {
    pub fn builder() -> FlightRegistryBuilder {
        FlightRegistryBuilder::new()
    }

    pub fn contains(&self, kind: &FlightKind) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &FlightKind> {
        self.factories.keys()
    }

    /// Build a flight of `kind` from `input`.
    pub fn build(&self, kind: &FlightKind, input: &FlightMap) -> Result<Flight, FlightBuildError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| FlightBuildError::UnknownKind(kind.clone()))?;
        let flight = factory.build(input)?;
        if flight.kind() != kind {
            return Err(FlightBuildError::Invalid(format!(
                "factory for {kind} built a {} flight",
                flight.kind()
            )));
        }
        Ok(flight)
    }
}

impl core::fmt::Debug for FlightRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().map(FlightKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("FlightRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: FlightKind = FlightKind::from_static("demo.flight");

    #[test]
    fn builds_registered_kinds() {
        let registry = FlightRegistry::builder()
            .register_fn(DEMO, |_input| Ok(Flight::new(DEMO)))
            .build()
            .unwrap();

        let flight = registry.build(&DEMO, &FlightMap::new()).unwrap();
        assert_eq!(flight.kind(), &DEMO);
        assert!(flight.is_empty());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let registry = FlightRegistry::builder().build().unwrap();
        assert!(matches!(
            registry.build(&DEMO, &FlightMap::new()),
            Err(FlightBuildError::UnknownKind(_))
        ));
    }

    #[test]
    fn duplicate_registration_fails_at_build() {
        let result = FlightRegistry::builder()
            .register_fn(DEMO, |_| Ok(Flight::new(DEMO)))
            .register_fn(DEMO, |_| Ok(Flight::new(DEMO)))
            .build();

        assert!(matches!(result, Err(FlightBuildError::DuplicateKind(k)) if k == DEMO));
    }

    #[test]
    fn factory_input_errors_propagate() {
        let registry = FlightRegistry::builder()
            .register_fn(DEMO, |input| {
                let _: String = input.get_required("workspace_id")?;
                Ok(Flight::new(DEMO))
            })
            .build()
            .unwrap();

        assert!(matches!(
            registry.build(&DEMO, &FlightMap::new()),
            Err(FlightBuildError::Input(_))
        ));
    }
}
