//! GStreamer initialization
//!
//! GStreamer is initialized at most once per process. The outcome is cached
//! so every backend created afterwards sees the same result.

use std::sync::OnceLock;

use serde::Serialize;

use crate::error::{BackendError, BackendResult};

static GSTREAMER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize GStreamer. Must succeed before any pipeline is built.
pub fn init() -> BackendResult<()> {
    GSTREAMER_INIT
        .get_or_init(|| match gstreamer::init() {
            Ok(()) => {
                log::info!("GStreamer initialized successfully");
                log_gstreamer_version();
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to initialize GStreamer: {}", e);
                Err(e.to_string())
            }
        })
        .clone()
        .map_err(BackendError::GstCore)
}

/// Whether GStreamer could be initialized
pub fn is_gstreamer_available() -> bool {
    init().is_ok()
}

/// Whether an element factory is installed
pub fn element_available(name: &str) -> bool {
    gstreamer::ElementFactory::find(name).is_some()
}

fn log_gstreamer_version() {
    let (major, minor, micro, nano) = gstreamer::version();
    log::info!("GStreamer version: {}.{}.{}.{}", major, minor, micro, nano);
}

/// GStreamer environment diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct GStreamerInfo {
    pub initialized: bool,
    pub version: Option<String>,
    pub plugin_path: Option<String>,
    /// Elements used by recording pipelines that are not installed
    pub missing_elements: Vec<String>,
}

pub fn get_gstreamer_info() -> GStreamerInfo {
    let initialized = is_gstreamer_available();
    let version = initialized.then(|| {
        let (major, minor, micro, _) = gstreamer::version();
        format!("{}.{}.{}", major, minor, micro)
    });
    let missing_elements = if initialized {
        crate::backend::gst::pipeline_elements()
            .into_iter()
            .filter(|name| !element_available(name))
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    GStreamerInfo {
        initialized,
        version,
        plugin_path: std::env::var("GST_PLUGIN_PATH").ok(),
        missing_elements,
    }
}
