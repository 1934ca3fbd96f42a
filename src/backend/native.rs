//! # Native GStreamer backend.
//!
//! One pipeline object per handle, built from [`pipeline_description`]. Bus
//! messages are read by a watcher task and translated into backend events:
//!
//! | bus message                    | event                        |
//! |--------------------------------|------------------------------|
//! | `Error`                        | `Error { endpoint }`         |
//! | `Warning`                      | `Warning`                    |
//! | `Info`                         | `Info`                       |
//! | `Eos`                          | `EndOfStream`                |
//! | pipeline `StateChanged→Playing`| `Playing`                    |
//!
//! The endpoint of an error is derived from the posting element (or its
//! nearest ancestor): `rtspsrc` → source, `srtsink` → sink.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use gstreamer as gst;
use gstreamer::prelude::*;
use tokio_util::sync::CancellationToken;

use super::{pipeline_description, Backend, BackendEvent, BackendKind, Endpoint};
use crate::config::RelayConfig;
use crate::core::EventSink;
use crate::error::BackendError;

/// Returns `true` when GStreamer initializes and the SRT sink element exists.
pub(crate) fn srt_plugin_available() -> bool {
    if let Err(e) = gst::init() {
        tracing::debug!(error = %e, "gstreamer init failed");
        return false;
    }
    gst::ElementFactory::find("srtsink").is_some()
}

/// Backend handle backed by one GStreamer pipeline.
pub struct NativeBackend {
    pipeline: gst::Pipeline,
    sink: Option<EventSink>,
    watcher: Option<CancellationToken>,
    stopped: bool,
}

impl NativeBackend {
    /// Parses the relay pipeline; the pipeline stays in `Null` until started.
    pub fn new(relay: &RelayConfig) -> Result<Self, BackendError> {
        gst::init().map_err(|e| BackendError::Build {
            reason: format!("gstreamer init: {e}"),
        })?;
        let description = pipeline_description(relay);
        let element = gst::parse::launch(&description).map_err(|e| BackendError::Build {
            reason: e.to_string(),
        })?;
        let pipeline = element
            .downcast::<gst::Pipeline>()
            .map_err(|_| BackendError::Build {
                reason: "launch description did not produce a pipeline".into(),
            })?;
        Ok(Self {
            pipeline,
            sink: None,
            watcher: None,
            stopped: false,
        })
    }
}

#[async_trait]
impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn subscribe(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    async fn start(&mut self) -> Result<(), BackendError> {
        let bus = self.pipeline.bus().ok_or_else(|| BackendError::Start {
            reason: "pipeline has no bus".into(),
        })?;
        let token = CancellationToken::new();
        if let Some(sink) = self.sink.clone() {
            tokio::spawn(watch_bus(bus, self.pipeline.clone(), sink, token.clone()));
        }
        self.watcher = Some(token);

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| BackendError::Start {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn stop(&mut self, grace: Duration) -> Result<(), BackendError> {
        if let Some(token) = self.watcher.take() {
            token.cancel();
        }
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let pipeline = self.pipeline.clone();
        let teardown = tokio::task::spawn_blocking(move || pipeline.set_state(gst::State::Null));
        match tokio::time::timeout(grace, teardown).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(e))) => Err(BackendError::Stop {
                reason: e.to_string(),
            }),
            Ok(Err(join)) => Err(BackendError::Stop {
                reason: join.to_string(),
            }),
            Err(_elapsed) => Err(BackendError::StopTimeout { grace }),
        }
    }

    async fn is_alive(&mut self) -> bool {
        !self.stopped && self.pipeline.current_state() == gst::State::Playing
    }
}

async fn watch_bus(bus: gst::Bus, pipeline: gst::Pipeline, sink: EventSink, token: CancellationToken) {
    let mut messages = bus.stream();
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = messages.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if let Some(event) = translate(&msg, &pipeline) {
            if !sink.emit(event) {
                break;
            }
        }
    }
}

fn translate(msg: &gst::Message, pipeline: &gst::Pipeline) -> Option<BackendEvent> {
    use gst::MessageView;

    match msg.view() {
        MessageView::Error(err) => {
            let mut message = err.error().to_string();
            if let Some(debug) = err.debug() {
                message.push_str(&format!(" ({debug})"));
            }
            Some(BackendEvent::Error {
                message,
                endpoint: msg.src().and_then(endpoint_of),
            })
        }
        MessageView::Warning(w) => Some(BackendEvent::Warning {
            message: w.error().to_string(),
        }),
        MessageView::Info(i) => Some(BackendEvent::Info {
            message: i.error().to_string(),
        }),
        MessageView::Eos(_) => Some(BackendEvent::EndOfStream),
        MessageView::StateChanged(sc) => {
            let from_pipeline = msg
                .src()
                .is_some_and(|src| src == pipeline.upcast_ref::<gst::Object>());
            (from_pipeline && sc.current() == gst::State::Playing).then_some(BackendEvent::Playing)
        }
        _ => None,
    }
}

/// Walks from the posting object up through its ancestors.
fn endpoint_of(src: &gst::Object) -> Option<Endpoint> {
    let mut current = Some(src.clone());
    while let Some(obj) = current {
        let endpoint = obj
            .downcast_ref::<gst::Element>()
            .and_then(|e| e.factory())
            .and_then(|f| factory_endpoint(f.name().as_str()));
        if endpoint.is_some() {
            return endpoint;
        }
        current = obj.parent();
    }
    None
}

fn factory_endpoint(factory: &str) -> Option<Endpoint> {
    match factory {
        "rtspsrc" => Some(Endpoint::Source),
        "srtsink" | "srtclientsink" => Some(Endpoint::Sink),
        _ => None,
    }
}
