//! An in-memory model of a binary object file (ELF/PE/Mach-O, via an
//! injected [`driver::FormatDriver`]) plus a copy-on-write patching session
//! and a connected-component function extractor.
//!
//! The format-specific decoders, a disassembler, and DWARF parsing are
//! deliberately out of scope: this crate only models the graph of sections,
//! segments, entries, labels, relocations and pointers, and the operations
//! that mutate it safely.

pub mod config;
pub mod error;
pub mod pointer;
pub mod interval;
pub mod entry;
pub mod label;
pub mod section;
pub mod segment;
pub mod driver;
pub mod binfile;
pub mod patch;
pub mod cfg;

pub use config::{CcMode, Config};
pub use error::{Error, ErrorCode, Result};
pub use pointer::{Pointer, PointerType, Target};
pub use interval::Interval;
pub use entry::{Content, Entry};
pub use label::{Label, LabelType};
pub use section::{Section, SectionType};
pub use segment::Segment;
pub use driver::FormatDriver;
pub use binfile::BinFile;
pub use patch::PatchSession;
pub use cfg::{extract_function, Block, BlockId, CallGraphNodeId, Component, Function, FunctionId, IdGen, Loop, LoopId};
