//! Refreshable format provider backed by device profiles

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};
use fwpcm_core::domain::audio::{FormatError, FormatProvider};
use fwpcm_core::domain::config::{self, DeviceProfile};
use fwpcm_core::domain::mode::StreamFormats;

/// Mode tables shared between the device and whoever refreshes them
#[derive(Debug)]
pub struct SharedFormats {
    formats: RwLock<StreamFormats>,
    fail_queries: AtomicBool,
    queries: AtomicUsize,
}

impl SharedFormats {
    pub fn new(formats: StreamFormats) -> Self {
        Self {
            formats: RwLock::new(formats),
            fail_queries: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self::new(profile.formats.clone())
    }

    /// Swap in new tables; later opens see them
    pub fn replace(&self, formats: StreamFormats) {
        *self.formats.write().unwrap_or_else(PoisonError::into_inner) = formats;
        debug!("Packet formats replaced");
    }

    /// Re-read a profile file and swap in its tables
    pub async fn reload<P: AsRef<Path>>(&self, path: P) -> config::Result<DeviceProfile> {
        let profile = DeviceProfile::load_from_file(path).await?;
        self.replace(profile.formats.clone());
        info!(name = %profile.name, "Packet formats reloaded");
        Ok(profile)
    }

    /// Make every query fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.fail_queries.store(failing, Ordering::SeqCst);
    }

    /// Number of cache refreshes served
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl FormatProvider for SharedFormats {
    fn cache_packet_formats(&self) -> Result<StreamFormats, FormatError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(FormatError::QueryFailed(
                "simulated format read failure".to_string(),
            ));
        }

        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .formats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
