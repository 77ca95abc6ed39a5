//! Explicit configuration threaded through the binary-file and CC-extraction
//! entry points, replacing the modelled C library's global
//! `display_assembling_error` toggle and per-project `cc_mode` field
//! (Design Note §9, "Global mutable state").

/// Policy gate for connected-component extraction (§4.I.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CcMode {
    /// Extract every non-primary connected component into a new function,
    /// synthesising a name even without debug info.
    #[default]
    Always,
    /// Only extract a connected component when debug info resolves a name
    /// for it; otherwise defer it (§4.I step 2).
    DebugOnly,
}

/// Project-wide configuration passed into [`crate::binfile::BinFile`] and
/// [`crate::cfg::extract`].
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cc_mode: CcMode,
}

impl Config {
    pub fn new(cc_mode: CcMode) -> Self {
        Config { cc_mode }
    }
}
