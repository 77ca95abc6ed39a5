//! §4.F — the format driver interface: the sole boundary to ELF/PE/Mach-O
//! specific code. Represented as a trait object (`Box<dyn FormatDriver>`)
//! per Design Note §9 ("capability set"), rather than the modelled C
//! library's function-pointer vtable.

use crate::error::Result;
use crate::interval::Interval;
use crate::label::LabelId;
use crate::section::SectionId;
use crate::segment::SegmentId;

/// Object file format a [`crate::binfile::BinFile`] was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Elf,
    Pe,
    MachO,
}

/// File-level object kind (§3 "Binary file", `type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Relocatable,
    Executable,
    SharedLibrary,
    Core,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    SystemV,
    Gnu,
    Windows,
    Darwin,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// A free interval in the patched file's address space, reported by the
/// driver for `finalise`/`try_move_section_to_interval` to place moved or
/// newly added sections into (§4.F "compute empty spaces in file").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptySpace {
    pub interval: Interval,
}

/// Outcome of a format-specific attempt to relocate a section, feeding
/// §4.G's `try_move_section_to_interval` step 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The driver placed the section; here is the sub-interval consumed.
    Placed(Interval),
    /// The driver has no format-specific opinion; fall back to the
    /// generic alignment-padding placement (§4.G step 3).
    Fallback,
    /// The driver knows the section cannot be placed at all.
    Impossible,
}

/// Default section names a driver supplies for freshly added sections
/// (§4.F "The default names for code / fixed-code / data sections").
pub struct DefaultSectionNames {
    pub code: &'static str,
    pub fixed_code: &'static str,
    pub data: &'static str,
}

/// The format-specific capability set a [`crate::binfile::BinFile`] is
/// constructed with. Every format backend (ELF/PE/Mach-O) implements this;
/// the core crate only ever calls through the trait object.
pub trait FormatDriver {
    /// Parses debug info (DWARF or equivalent) ahead of CC extraction.
    /// Out of scope to implement here; drivers that don't support it
    /// return `Ok(())` having done nothing.
    fn parse_debug_info(&mut self) -> Result<()>;

    /// Adds labels for imported/external functions discovered while
    /// parsing (PLT stubs, import-table thunks, ...).
    fn add_external_function_labels(&mut self) -> Result<()>;

    /// Synthesises a label name for an external function the driver
    /// resolves but the file doesn't otherwise name.
    fn generate_external_label_name(&self, addr: u64) -> String;

    fn print_binary(&self) -> String;
    fn print_external_functions(&self) -> String;

    /// Free intervals in the file's address space available for moved or
    /// newly added sections (§4.F).
    fn compute_empty_spaces(&self) -> Vec<EmptySpace>;

    fn first_loaded_address(&self) -> Option<u64>;
    fn last_loaded_address(&self) -> Option<u64>;

    /// §4.G step 2 of `try_move_section_to_interval`: format-specific
    /// placement logic (e.g. PE section alignment quirks, Mach-O segment
    /// constraints). Return [`MoveOutcome::Fallback`] to defer to the
    /// generic alignment-padding placement.
    fn try_move_section_to_interval(&self, scn: SectionId, interval: Interval) -> MoveOutcome;

    /// §4.G "Copy-on-write": format-specific metadata to stamp onto a
    /// freshly allocated patched-copy skeleton.
    fn init_patched_copy(&mut self) -> Result<()>;

    fn add_section(&mut self, scn: SectionId) -> Result<()>;
    fn add_segment(&mut self, seg: SegmentId) -> Result<()>;
    fn add_external_library(&mut self, name: &str) -> Result<()>;
    fn rename_external_library(&mut self, old: &str, new: &str) -> Result<()>;
    fn add_external_function(&mut self, name: &str, addr: u64) -> Result<()>;
    fn add_label(&mut self, label: LabelId) -> Result<()>;

    /// §4.G `finalise`: places moved sections (flagged by the session as
    /// needing relocation) into the empty-space intervals it returns from
    /// [`FormatDriver::compute_empty_spaces`].
    fn finalise(&mut self, free_spaces: &[EmptySpace]) -> Result<()>;

    fn write(&mut self, out: &mut dyn std::io::Write) -> Result<()>;
    fn write_original(&mut self, out: &mut dyn std::io::Write) -> Result<()>;

    fn default_section_names(&self) -> DefaultSectionNames;
}

/// **[AMBIENT]** Stands in for the DWARF-backed function-name resolver the
/// CC extractor calls into (`asmfile_has_dbg_function` in the modelled
/// source). A second, orthogonal capability from [`FormatDriver`] — debug
/// info parsing is format-agnostic enough (DWARF works the same over ELF,
/// PE/PDB, or Mach-O) that it gets its own trait rather than living on the
/// format vtable.
pub trait DebugInfo {
    /// Returns the demangled name of the function whose debug-info range
    /// covers `[start, end]` (or just `start` if `end` is `None`), if any.
    fn name_covering(&self, start: u64, end: Option<u64>) -> Option<String>;
}

/// A `DebugInfo` that never resolves anything, for drivers/tests with no
/// debug info available.
pub struct NoDebugInfo;

impl DebugInfo for NoDebugInfo {
    fn name_covering(&self, _start: u64, _end: Option<u64>) -> Option<String> {
        None
    }
}
