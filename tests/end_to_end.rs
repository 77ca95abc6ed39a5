//! Integration coverage for the end-to-end scenarios of §8: a minimal
//! in-memory [`FormatDriver`] test double standing in for a real
//! ELF/PE/Mach-O backend, exercising the patching session and the CC
//! extractor through the crate's public API only.

use objforge::driver::{
    Abi, Arch, ByteOrder, DefaultSectionNames, DebugInfo, EmptySpace, FileType, Format, FormatDriver, MoveOutcome,
};
use objforge::{
    extract_function, BinFile, Block, CcMode, Component, Config, Content, Entry, Function, FunctionId, IdGen, Label,
    LabelType, PatchSession, Section, SectionId, SectionType, Target,
};

#[derive(Default)]
struct StubDriver {
    free_spaces: Vec<EmptySpace>,
}

impl FormatDriver for StubDriver {
    fn parse_debug_info(&mut self) -> objforge::Result<()> {
        Ok(())
    }
    fn add_external_function_labels(&mut self) -> objforge::Result<()> {
        Ok(())
    }
    fn generate_external_label_name(&self, addr: u64) -> String {
        format!("ext_{addr:x}")
    }
    fn print_binary(&self) -> String {
        String::new()
    }
    fn print_external_functions(&self) -> String {
        String::new()
    }
    fn compute_empty_spaces(&self) -> Vec<EmptySpace> {
        self.free_spaces.clone()
    }
    fn first_loaded_address(&self) -> Option<u64> {
        None
    }
    fn last_loaded_address(&self) -> Option<u64> {
        None
    }
    fn try_move_section_to_interval(
        &self,
        _scn: SectionId,
        _interval: objforge::Interval,
    ) -> MoveOutcome {
        MoveOutcome::Fallback
    }
    fn init_patched_copy(&mut self) -> objforge::Result<()> {
        Ok(())
    }
    fn add_section(&mut self, _scn: SectionId) -> objforge::Result<()> {
        Ok(())
    }
    fn add_segment(&mut self, _seg: objforge::segment::SegmentId) -> objforge::Result<()> {
        Ok(())
    }
    fn add_external_library(&mut self, _name: &str) -> objforge::Result<()> {
        Ok(())
    }
    fn rename_external_library(&mut self, _old: &str, _new: &str) -> objforge::Result<()> {
        Ok(())
    }
    fn add_external_function(&mut self, _name: &str, _addr: u64) -> objforge::Result<()> {
        Ok(())
    }
    fn add_label(&mut self, _label: objforge::label::LabelId) -> objforge::Result<()> {
        Ok(())
    }
    fn finalise(&mut self, _free_spaces: &[EmptySpace]) -> objforge::Result<()> {
        Ok(())
    }
    fn write(&mut self, _out: &mut dyn std::io::Write) -> objforge::Result<()> {
        Ok(())
    }
    fn write_original(&mut self, _out: &mut dyn std::io::Write) -> objforge::Result<()> {
        Ok(())
    }
    fn default_section_names(&self) -> DefaultSectionNames {
        DefaultSectionNames { code: ".text", fixed_code: ".init", data: ".data" }
    }
}

struct NoDebug;
impl DebugInfo for NoDebug {
    fn name_covering(&self, _start: u64, _end: Option<u64>) -> Option<String> {
        None
    }
}

struct OneShotDebug(&'static str);
impl DebugInfo for OneShotDebug {
    fn name_covering(&self, _start: u64, _end: Option<u64>) -> Option<String> {
        Some(self.0.to_string())
    }
}

fn three_section_file(free_spaces: Vec<EmptySpace>) -> BinFile {
    let mut bf = BinFile::new(
        "fixture.bin",
        Format::Elf,
        FileType::Executable,
        8,
        Arch::X86_64,
        Abi::SystemV,
        ByteOrder::Little,
        Box::new(StubDriver { free_spaces }),
    );
    for addr in [0x1000u64, 0x2000, 0x3000] {
        let mut scn = Section::new(format!("s{addr:x}"), SectionType::Data);
        scn.attrs_mut().loaded = true;
        scn.set_address(addr);
        scn.set_size(0x100);
        bf.add_section(scn);
    }
    bf.finalise_load().expect("finalise_load should succeed on a fresh fixture");
    bf
}

/// §8 scenario 1: adding a code section to a patching session places it in
/// the free interval the driver reports and flags it `exec|loaded|patch-reordered`.
#[test]
fn add_one_code_section_lands_in_the_free_interval() {
    let bf = three_section_file(vec![EmptySpace { interval: objforge::Interval::new(0x8000, 256) }]);
    let mut session = PatchSession::init_copy(bf);

    let scn = session.add_code_scn("x", 128).unwrap();
    session.finalise().unwrap();

    assert_eq!(session.section_address(scn), Some(0x8000));
    assert_eq!(session.section_size(scn), Some(128));
    let attrs = session.section_attrs(scn).unwrap();
    assert!(attrs.exec);
    assert!(attrs.loaded);
    assert!(attrs.patch_reordered);
}

/// §8 scenario 4: a relocation added at an absolute address targets
/// whichever entry's range contains it, with the right `offset_in_target`.
#[test]
fn add_relocation_targets_the_covering_entry() {
    let mut bf = three_section_file(vec![]);
    let d = SectionId(0);
    let rel_scn = bf.add_section(Section::new(".rel", SectionType::Reloc));
    bf.section_mut(d).unwrap().set_address(0x4000);
    let e0 = Entry::new(Content::Raw(vec![0u8; 0x10]), 0x10);
    bf.section_mut(d).unwrap().add_entry(e0, 0, None);
    bf.finalise_load().unwrap();

    let label = bf.add_label(Label::new("sym", 0, Target::Unset, LabelType::Variable));
    let relocs_before = bf.relocs().len();
    let mut session = PatchSession::init_copy(bf);

    let reloc_id = session.add_relocation(rel_scn, label, 0x4008, 7).unwrap();
    let entry = session.get_entry_readonly(reloc_id).unwrap();
    match entry.content() {
        Content::Relocation { pointer, reloc_type, .. } => {
            assert_eq!(*reloc_type, 7);
            assert_eq!(pointer.offset_in_target(), 8);
        }
        other => panic!("expected a relocation entry, got {other:?}"),
    }
    assert_eq!(session.relocs().count(), relocs_before + 1);
}

/// §8 scenario 5: a secondary component whose entry instruction resolves
/// to an OpenMP-region debug name is split into `<parent>#omp#region#1`,
/// carrying every transplanted block plus the new virtual entry.
#[test]
fn cc_extraction_splits_openmp_region_into_a_new_function() {
    let mut f = Function::new(0, 0, "foo", objforge::CallGraphNodeId(0));
    let b0 = f.push_block(Block::new(0, 0x1000, 0x1008));
    let b1 = f.push_block(Block::new(1, 0x1008, 0x1010));
    let b2 = f.push_block(Block::new(2, 0x2000, 0x2008));
    f.block_mut(b0).unwrap().add_successor(b1);
    f.block_mut(b1).unwrap().add_predecessor(b0);
    f.set_components(vec![Component::new(vec![b0]), Component::new(vec![b2])]);

    let mut functions = vec![f];
    let mut file = three_section_file(vec![]);
    let config = Config::new(CcMode::Always);
    let debug = OneShotDebug("__par_region_entry");
    let mut ids = IdGen::new();

    let created =
        extract_function(&mut functions, FunctionId(0), &mut file, &config, &debug, &mut ids).unwrap();

    assert_eq!(created.len(), 1);
    let new_fn = &functions[created[0].0 as usize];
    assert_eq!(new_fn.name(), "foo#omp#region#1");
    assert_eq!(new_fn.original_function(), Some(FunctionId(0)));
    assert_eq!(new_fn.block_count(), 2);
    assert!(functions[0].block(b2).is_none());
    assert_eq!(functions[0].components().len(), 1);
}

/// §8 scenario 6: under `debug-only` mode with no debug name, the
/// candidate component is deferred rather than extracted, and `entries` is
/// backfilled from every remaining component's blocks.
#[test]
fn cc_extraction_defers_without_debug_name_in_debug_only_mode() {
    let mut f = Function::new(0, 0, "foo", objforge::CallGraphNodeId(0));
    let b0 = f.push_block(Block::new(0, 0x1000, 0x1008));
    let b1 = f.push_block(Block::new(1, 0x1008, 0x1010));
    let b2 = f.push_block(Block::new(2, 0x2000, 0x2008));
    f.block_mut(b0).unwrap().add_successor(b1);
    f.block_mut(b1).unwrap().add_predecessor(b0);
    f.set_components(vec![Component::new(vec![b0]), Component::new(vec![b2])]);

    let mut functions = vec![f];
    let mut file = three_section_file(vec![]);
    let config = Config::new(CcMode::DebugOnly);
    let debug = NoDebug;
    let mut ids = IdGen::new();

    let created =
        extract_function(&mut functions, FunctionId(0), &mut file, &config, &debug, &mut ids).unwrap();

    assert!(created.is_empty());
    assert_eq!(functions[0].components().len(), 2);
    assert!(functions[0].block(b2).is_some());
    assert_eq!(functions[0].entries().len(), 3);
}
