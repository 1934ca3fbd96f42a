//! Native pipeline description.
//!
//! Kept outside the `gstreamer` feature gate so the launch line can be checked
//! without the GStreamer libraries installed.

use crate::config::RelayConfig;

/// Jitter buffer latency of `rtspsrc`, in milliseconds.
pub const RTSP_LATENCY_MS: u32 = 100;

/// Builds the `gst-launch` style description of the relay pipeline.
///
/// ```text
/// rtspsrc ! rtpjitterbuffer ! rtph264depay ! h264parse ! mpegtsmux ! srtsink
/// ```
pub fn pipeline_description(relay: &RelayConfig) -> String {
    format!(
        "rtspsrc location=\"{url}\" latency={RTSP_LATENCY_MS} \
         ! rtpjitterbuffer \
         ! rtph264depay \
         ! h264parse \
         ! mpegtsmux alignment=7 \
         ! srtsink uri=\"{uri}\"",
        url = relay.source.url,
        uri = relay.sink.srt_uri(),
    )
}
