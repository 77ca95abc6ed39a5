//! §4.G — the patching session: a copy-on-write wrapper over a
//! [`crate::binfile::BinFile`] supporting the finalise/reorder/write
//! lifecycle.

mod session;

pub use session::{PatchSession, PatchState};
