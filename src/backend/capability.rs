//! # Capability probe.
//!
//! Decides once, before the supervisor is built, which backend variant runs the
//! relay.
//!
//! ```text
//! BackendChoice::Auto
//!   ├─ gstreamer feature compiled in, gst::init() ok, "srtsink" registered → Native
//!   └─ otherwise                                                           → Process
//! ```
//!
//! The process variant additionally needs its executable; [`locate_tool`] checks
//! `PATH` (or an explicit path) with `which`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::BackendKind;
use crate::error::BackendError;

/// Backend requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// Prefer native, fall back to the external process.
    #[default]
    Auto,
    /// Always use the native pipeline.
    Native,
    /// Always use the external process.
    Process,
}

impl BackendChoice {
    /// Returns a short stable label.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendChoice::Auto => "auto",
            BackendChoice::Native => "native",
            BackendChoice::Process => "process",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "native" | "gstreamer" | "gst" => Ok(BackendChoice::Native),
            "process" | "ffmpeg" => Ok(BackendChoice::Process),
            other => Err(format!(
                "unknown backend `{other}` (expected auto, native or process)"
            )),
        }
    }
}

/// Returns `true` when the native pipeline can carry SRT on this host.
pub fn native_available() -> bool {
    #[cfg(feature = "gstreamer")]
    {
        super::native::srt_plugin_available()
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        false
    }
}

/// Maps the operator's choice to a concrete variant.
pub fn resolve_backend(choice: BackendChoice) -> BackendKind {
    match choice {
        BackendChoice::Native => BackendKind::Native,
        BackendChoice::Process => BackendKind::Process,
        BackendChoice::Auto => {
            if native_available() {
                BackendKind::Native
            } else {
                tracing::info!("srtsink not available, falling back to the ffmpeg process backend");
                BackendKind::Process
            }
        }
    }
}

/// Resolves an executable name or path to an absolute path.
pub fn locate_tool(program: &Path) -> Result<PathBuf, BackendError> {
    which::which(program).map_err(|e| BackendError::ToolMissing {
        tool: program.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice() {
        assert_eq!("auto".parse::<BackendChoice>(), Ok(BackendChoice::Auto));
        assert_eq!("GStreamer".parse::<BackendChoice>(), Ok(BackendChoice::Native));
        assert_eq!(" ffmpeg ".parse::<BackendChoice>(), Ok(BackendChoice::Process));
        assert!("vlc".parse::<BackendChoice>().is_err());
    }

    #[test]
    fn test_explicit_choice_is_honored() {
        assert_eq!(resolve_backend(BackendChoice::Native), BackendKind::Native);
        assert_eq!(resolve_backend(BackendChoice::Process), BackendKind::Process);
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn test_auto_without_native_falls_back() {
        assert!(!native_available());
        assert_eq!(resolve_backend(BackendChoice::Auto), BackendKind::Process);
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_tool() {
        assert!(locate_tool(Path::new("sh")).unwrap().is_absolute());
        let err = locate_tool(Path::new("relayvisor-no-such-tool")).unwrap_err();
        assert!(matches!(err, BackendError::ToolMissing { .. }));
    }
}
