//! Test doubles shared by the unit tests of this crate.

use crate::error::LaunchError;
use crate::launcher::ServiceLauncher;
use async_trait::async_trait;
use fleet_protocol::Service;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Launcher that records requests instead of contacting a node.
#[derive(Debug, Default)]
pub(crate) struct RecordingLauncher {
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    fail_starts: AtomicBool,
}

impl RecordingLauncher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceLauncher for RecordingLauncher {
    async fn start(&self, service: &Service) -> Result<(), LaunchError> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(LaunchError::Rejected("start disabled in test".to_string()));
        }
        self.started.lock().unwrap().push(service.name.clone());
        Ok(())
    }

    async fn stop(&self, service: &Service) -> Result<(), LaunchError> {
        self.stopped.lock().unwrap().push(service.name.clone());
        Ok(())
    }
}
