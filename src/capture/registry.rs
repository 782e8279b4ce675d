//! Process-wide input driver registry
//!
//! Built-in drivers are registered exactly once, on first use. Creating any
//! number of pipelines never re-registers them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::{debug, info};

use super::device::InputDriver;
use super::synthetic::TestPatternDriver;
use super::v4l2::V4l2Driver;

static REGISTRY: Lazy<RwLock<HashMap<&'static str, Arc<dyn InputDriver>>>> = Lazy::new(|| {
    let mut drivers: HashMap<&'static str, Arc<dyn InputDriver>> = HashMap::new();

    #[allow(unused_mut)]
    let mut builtins: Vec<Arc<dyn InputDriver>> =
        vec![Arc::new(TestPatternDriver), Arc::new(V4l2Driver)];
    #[cfg(feature = "gstreamer-pipeline")]
    builtins.push(Arc::new(super::gst_capture::GstDriver));

    for driver in builtins {
        insert(&mut drivers, driver);
    }

    info!("Registered {} input driver names", drivers.len());
    RwLock::new(drivers)
});

fn insert(drivers: &mut HashMap<&'static str, Arc<dyn InputDriver>>, driver: Arc<dyn InputDriver>) {
    for alias in driver.aliases() {
        drivers.insert(alias, Arc::clone(&driver));
    }
    drivers.insert(driver.name(), driver);
}

/// Register built-in drivers. Safe to call any number of times.
pub fn init() {
    Lazy::force(&REGISTRY);
}

/// Add a driver under its name and aliases. Returns false if the name is taken.
pub fn register(driver: Arc<dyn InputDriver>) -> bool {
    let mut drivers = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if drivers.contains_key(driver.name()) {
        return false;
    }
    debug!("Registering input driver {}", driver.name());
    insert(&mut drivers, driver);
    true
}

pub fn find(name: &str) -> Option<Arc<dyn InputDriver>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .copied()
        .collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic;

    #[test]
    fn builtins_resolve_by_name_and_alias() {
        init();
        init();
        assert!(find(synthetic::DRIVER_NAME).is_some());
        assert!(find("v4l2").is_some());
        assert!(find("video4linux2").is_some());
        assert!(find("dshow").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        assert!(!register(Arc::new(TestPatternDriver)));
        assert_eq!(
            names()
                .iter()
                .filter(|n| **n == synthetic::DRIVER_NAME)
                .count(),
            1
        );
    }
}
