//! Seams to the media server hosting the rating code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the server is rescanning its library. Ratings are
/// unreliable mid-scan, so every rating read and write checks this first.
pub trait ScanGate {
    fn is_scanning(&self) -> bool;
}

/// Atomic scan flag the server flips around a library scan.
#[derive(Debug, Default)]
pub struct ScanFlag(AtomicBool);

impl ScanFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scanning: bool) {
        self.0.store(scanning, Ordering::SeqCst);
    }
}

impl ScanGate for ScanFlag {
    fn is_scanning(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolves which virtual library (library view) a client has selected.
pub trait LibraryViews {
    fn library_for_client(&self, client: &str) -> Option<String>;
}

/// Map-backed library views.
#[derive(Debug, Default, Clone)]
pub struct StaticLibraryViews {
    by_client: HashMap<String, String>,
}

impl StaticLibraryViews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, client: &str, library: &str) {
        self.by_client.insert(client.to_string(), library.to_string());
    }
}

impl LibraryViews for StaticLibraryViews {
    fn library_for_client(&self, client: &str) -> Option<String> {
        self.by_client.get(client).cloned()
    }
}
