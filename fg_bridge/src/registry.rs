//! ABOUTME: In-memory map of managed cameras to their analysis switch
//! ABOUTME: Shared between the bus loop and the pipeline without string-keyed lookups

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Cloneable handle over the set of managed cameras and whether analysis is enabled for each
#[derive(Debug, Clone, Default)]
pub struct CameraRegistry {
    switches: Arc<RwLock<HashMap<String, bool>>>,
}

impl CameraRegistry {
    /// Every camera starts enabled
    pub fn new<I, S>(cameras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let switches = cameras.into_iter().map(|c| (c.into(), true)).collect();
        Self {
            switches: Arc::new(RwLock::new(switches)),
        }
    }

    pub fn is_managed(&self, camera: &str) -> bool {
        match self.switches.read() {
            Ok(switches) => switches.contains_key(camera),
            Err(poisoned) => poisoned.into_inner().contains_key(camera),
        }
    }

    /// False for unknown cameras as well as disabled ones
    pub fn is_enabled(&self, camera: &str) -> bool {
        let lookup = |switches: &HashMap<String, bool>| switches.get(camera).copied().unwrap_or(false);
        match self.switches.read() {
            Ok(switches) => lookup(&*switches),
            Err(poisoned) => lookup(&*poisoned.into_inner()),
        }
    }

    /// Flip the switch for a managed camera. Returns false if the camera is not managed.
    pub fn set_enabled(&self, camera: &str, enabled: bool) -> bool {
        let mut switches = match self.switches.write() {
            Ok(switches) => switches,
            Err(poisoned) => poisoned.into_inner(),
        };

        match switches.get_mut(camera) {
            Some(flag) => {
                *flag = enabled;
                debug!(camera = %camera, enabled, "Analysis switch updated");
                true
            }
            None => {
                warn!(camera = %camera, "Ignoring switch change for unmanaged camera");
                false
            }
        }
    }

    /// Managed camera ids in sorted order
    pub fn cameras(&self) -> Vec<String> {
        self.snapshot().into_keys().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        let copy = |switches: &HashMap<String, bool>| -> BTreeMap<String, bool> {
            switches
                .iter()
                .map(|(camera, enabled)| (camera.clone(), *enabled))
                .collect()
        };
        match self.switches.read() {
            Ok(switches) => copy(&*switches),
            Err(poisoned) => copy(&*poisoned.into_inner()),
        }
    }
}
