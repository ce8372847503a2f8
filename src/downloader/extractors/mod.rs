// Extractor module - everything that talks to yt-dlp
//
// Two launch modes share one implementation:
// - CLI mode: native `yt-dlp` binary (default)
// - Python mode: `python3 -m yt_dlp`

mod cli;
pub mod diagnostics;
mod traits;

pub use cli::{YtDlpExtractor, DEFAULT_ADMISSION_TIMEOUT, DEFAULT_MAX_PROCESSES};
pub use diagnostics::{diagnose_error, FailureReason};
pub use traits::{
    ExtractorMode, Manifest, ManifestFormat, MediaExtractor, MediaProcess, MediaSelection,
    OutputTarget,
};
