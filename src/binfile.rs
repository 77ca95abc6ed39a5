//! §4.E — the binary-file aggregate: owner of sections, segments, labels,
//! relocations, the external-library table, and the two cross-reference
//! multi-maps that let a mutation find everything that points at it.

use std::collections::HashMap;

use crate::driver::{Abi, Arch, ByteOrder, FileType, Format, FormatDriver};
use crate::entry::{Content, Entry, EntryId};
use crate::error::{Error, ErrorCode, Result};
use crate::label::{Label, LabelId, LabelType};
use crate::pointer::{Pointer, PointerType, Target};
use crate::section::{Section, SectionId, SectionType};
use crate::segment::{Segment, SegmentId};

/// Key for the two §4.E cross-reference multi-maps. Pointers whose target
/// isn't resolved yet are bucketed under `Unlinked` until the §4.E.linking
/// pass (run from `finalise_load`) re-keys them onto the entry they
/// actually point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DataRefKey {
    Entry(EntryId),
    Unlinked,
}

/// Where a reference-construction call should resolve its address from
/// (§4.E "add internal reference by address or by offset-into-section").
#[derive(Debug, Clone, Copy)]
pub enum RefLocation {
    Address(u64),
    SectionOffset(SectionId, u64),
}

/// Delegate that populates a freshly constructed [`BinFile`] from an
/// on-disk image. Format-specific parsing is out of scope for this crate
/// (§1); this trait is the seam a real ELF/PE/Mach-O reader plugs into.
pub trait Loader {
    fn load(&mut self, bf: &mut BinFile) -> Result<()>;
}

/// `{filename, format, type, word_size, arch, abi, byte_order, patch_state,
/// sections[], loaded_sections[], code_sections[], label_sections[],
/// segments[], labels[], labels_by_section[], relocs[], ext_libs[],
/// archive_members[], driver, last_error}` (§3 "Binary file"). `creator`
/// and `entry_copies` from the distilled spec live on
/// [`crate::patch::PatchSession`] instead — they only exist while a
/// patching session is open, and a session already owns both the original
/// and the patched `BinFile` directly, which is a stronger invariant than a
/// weak back-reference field (Open Question, recorded in DESIGN.md).
pub struct BinFile {
    filename: String,
    format: Format,
    file_type: FileType,
    word_size: u8,
    arch: Arch,
    abi: Abi,
    byte_order: ByteOrder,
    sections: Vec<Section>,
    loaded_sections: Vec<SectionId>,
    code_sections: Vec<SectionId>,
    label_sections: Vec<SectionId>,
    segments: Vec<Segment>,
    labels: Vec<Label>,
    labels_by_section: HashMap<SectionId, Vec<LabelId>>,
    variable_anchors: std::collections::HashSet<LabelId>,
    relocs: Vec<EntryId>,
    ext_libs: Vec<String>,
    archive_members: Vec<BinFile>,
    data_refs: HashMap<DataRefKey, Vec<EntryId>>,
    section_refs: HashMap<SectionId, Vec<EntryId>>,
    driver: Box<dyn FormatDriver>,
    last_error: Option<ErrorCode>,
}

impl BinFile {
    pub fn new(
        filename: impl Into<String>,
        format: Format,
        file_type: FileType,
        word_size: u8,
        arch: Arch,
        abi: Abi,
        byte_order: ByteOrder,
        driver: Box<dyn FormatDriver>,
    ) -> Self {
        BinFile {
            filename: filename.into(),
            format,
            file_type,
            word_size,
            arch,
            abi,
            byte_order,
            sections: Vec::new(),
            loaded_sections: Vec::new(),
            code_sections: Vec::new(),
            label_sections: Vec::new(),
            segments: Vec::new(),
            labels: Vec::new(),
            labels_by_section: HashMap::new(),
            variable_anchors: std::collections::HashSet::new(),
            relocs: Vec::new(),
            ext_libs: Vec::new(),
            archive_members: Vec::new(),
            data_refs: HashMap::new(),
            section_refs: HashMap::new(),
            driver,
            last_error: None,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn word_size(&self) -> u8 {
        self.word_size
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn driver(&self) -> &dyn FormatDriver {
        self.driver.as_ref()
    }

    pub fn driver_mut(&mut self) -> &mut dyn FormatDriver {
        self.driver.as_mut()
    }

    pub fn last_error(&self) -> Option<ErrorCode> {
        self.last_error
    }

    /// Matches the modelled library's `get_last_error_code` (§7): reads and
    /// clears the latch.
    pub fn take_last_error(&mut self) -> Option<ErrorCode> {
        self.last_error.take()
    }

    fn fail(&mut self, code: ErrorCode, msg: impl Into<String>) -> Error {
        self.last_error = Some(code);
        Error::code(code, msg)
    }

    /// §4.E `parse(loader)`.
    pub fn parse(&mut self, loader: &mut dyn Loader) -> Result<()> {
        loader.load(self)
    }

    // ---- section / segment access -----------------------------------

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(id.0 as usize)
    }

    pub fn section_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        self.sections.get_mut(id.0 as usize)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section_by_name(&self, name: &str) -> Option<(SectionId, &Section)> {
        self.sections
            .iter()
            .enumerate()
            .find(|(_, s)| s.name() == name)
            .map(|(i, s)| (SectionId(i as u32), s))
    }

    /// Sections whose `[address, end_address)` overlaps `[start, end)`
    /// (§4.E "by address range").
    pub fn sections_in_range(&self, start: u64, end: u64) -> Vec<SectionId> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.address() < end && s.address() + s.size() > start)
            .map(|(i, _)| SectionId(i as u32))
            .collect()
    }

    pub fn loaded_sections(&self) -> &[SectionId] {
        &self.loaded_sections
    }

    pub fn code_sections(&self) -> &[SectionId] {
        &self.code_sections
    }

    pub fn label_sections(&self) -> &[SectionId] {
        &self.label_sections
    }

    pub fn add_section(&mut self, section: Section) -> SectionId {
        let is_loaded = section.attrs().loaded;
        let is_code = section.ty() == SectionType::Code;
        let is_label_like = matches!(section.ty(), SectionType::Label | SectionType::String);
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(section);
        if is_loaded {
            self.loaded_sections.push(id);
        }
        if is_code {
            self.code_sections.push(id);
        }
        if is_label_like {
            self.label_sections.push(id);
        }
        let _ = self.driver.add_section(id);
        id
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0 as usize)
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.segments.get_mut(id.0 as usize)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn add_segment(&mut self, segment: Segment) -> SegmentId {
        let id = SegmentId(self.segments.len() as u32);
        self.segments.push(segment);
        let _ = self.driver.add_segment(id);
        id
    }

    // ---- label management --------------------------------------------

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label(&self, id: LabelId) -> Option<&Label> {
        self.labels.get(id.0 as usize)
    }

    /// §4.E "add label (maintaining per-section ordered arrays)".
    pub fn add_label(&mut self, label: Label) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        if let Some(scn) = label.section() {
            self.labels_by_section.entry(scn).or_default().push(id);
        }
        self.labels.push(label);
        id
    }

    /// §4.E "update labels (sort, classify, link to entries)": sorts each
    /// section's label array by `(address, name)` and marks *variable
    /// anchors* — the first labelled address in a section, and every
    /// subsequent label whose address strictly increases (§4.E step 1).
    pub fn update_labels(&mut self) {
        self.variable_anchors.clear();
        let labels = &self.labels;
        for ids in self.labels_by_section.values_mut() {
            ids.sort_by(|&a, &b| {
                let la = &labels[a.0 as usize];
                let lb = &labels[b.0 as usize];
                la.address().cmp(&lb.address()).then_with(|| la.name().cmp(lb.name()))
            });
        }
        for ids in self.labels_by_section.values() {
            let mut last_anchor_addr: Option<u64> = None;
            for &id in ids {
                let l = &labels[id.0 as usize];
                if l.name().is_empty() {
                    continue;
                }
                let is_anchor = match last_anchor_addr {
                    None => true,
                    Some(prev) => l.address() > prev,
                };
                if is_anchor {
                    self.variable_anchors.insert(id);
                    last_anchor_addr = Some(l.address());
                }
            }
        }
    }

    /// §4.E "lookup by address (binary search)" over every label in the
    /// file, regardless of section.
    pub fn label_by_address(&self, addr: u64) -> Option<(LabelId, &Label)> {
        let mut sorted: Vec<(LabelId, &Label)> =
            self.labels.iter().enumerate().map(|(i, l)| (LabelId(i as u32), l)).collect();
        sorted.sort_by_key(|(_, l)| l.address());
        let idx = sorted.partition_point(|(_, l)| l.address() < addr);
        sorted.get(idx).filter(|(_, l)| l.address() == addr).copied()
    }

    /// §4.E "Label → entry attachment": for every entry in `scn`, attaches
    /// the innermost variable-anchor label at or below the entry's address,
    /// plus (per §4.E step 2) any exact-address label that isn't
    /// function-typed, so an instruction label never gets rebound to data.
    /// Per §4.C "link label (bi-directional if addresses match)" — mirroring
    /// `la_binfile.c`'s `label_set_target_to_data` alongside `data_link_label`
    /// — a label whose address equals the entry's also gets its `target` set
    /// back to that entry.
    pub fn attach_labels_to_entries(&mut self, scn: SectionId) {
        let Some(label_ids) = self.labels_by_section.get(&scn).cloned() else {
            return;
        };
        let anchors: Vec<(LabelId, u64)> = label_ids
            .iter()
            .filter(|id| self.variable_anchors.contains(id))
            .map(|&id| (id, self.labels[id.0 as usize].address()))
            .collect();
        let exact: HashMap<u64, Vec<(LabelId, LabelType)>> = label_ids.iter().fold(
            HashMap::new(),
            |mut m: HashMap<u64, Vec<(LabelId, LabelType)>>, &id| {
                let l = &self.labels[id.0 as usize];
                m.entry(l.address()).or_default().push((id, l.label_type()));
                m
            },
        );
        let Some(entry_addrs) = self
            .section(scn)
            .map(|s| (0..s.num_entries()).map(|i| s.entry(i).unwrap().address()).collect::<Vec<_>>())
        else {
            return;
        };

        // (label, entry index, label's own address) for every link to
        // establish; collected up front so the loop below can freely
        // borrow `self.labels` and `self.sections` one at a time.
        let mut links: Vec<(LabelId, usize, u64)> = Vec::new();
        for (idx, &entry_addr) in entry_addrs.iter().enumerate() {
            let anchor = anchors
                .iter()
                .filter(|&&(_, addr)| addr <= entry_addr)
                .max_by_key(|&&(_, addr)| addr);
            if let Some(&(label_id, label_addr)) = anchor {
                let is_variable = matches!(
                    self.labels.get(label_id.0 as usize).map(|l| l.label_type()),
                    Some(LabelType::Variable)
                );
                if is_variable {
                    links.push((label_id, idx, label_addr));
                }
            }
            if let Some(exact_here) = exact.get(&entry_addr) {
                for &(label_id, ty) in exact_here {
                    if !ty.is_function_like() {
                        links.push((label_id, idx, entry_addr));
                    }
                }
            }
        }

        for (label_id, idx, label_addr) in links {
            let entry_id = EntryId::new(scn, idx as u32);
            if let Some(section) = self.section_mut(scn) {
                section.link_entry_label(idx, label_id, label_addr, scn);
            }
            if label_addr == entry_addrs[idx] {
                if let Some(label) = self.labels.get_mut(label_id.0 as usize) {
                    label.set_target(Target::Data(entry_id));
                }
            }
        }
    }

    // ---- external library table ---------------------------------------

    pub fn ext_libs(&self) -> &[String] {
        &self.ext_libs
    }

    pub fn add_ext_lib(&mut self, name: impl Into<String>) {
        self.ext_libs.push(name.into());
    }

    pub fn relocs(&self) -> &[EntryId] {
        &self.relocs
    }

    // ---- cross-reference indexes ---------------------------------------

    pub fn refs_to_data(&self, target: EntryId) -> &[EntryId] {
        self.data_refs.get(&DataRefKey::Entry(target)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn refs_to_section(&self, target: SectionId) -> &[EntryId] {
        self.section_refs.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    fn index_pointer(&mut self, referencing: EntryId, target: Target) {
        match target {
            Target::Data(data) => {
                self.data_refs.entry(DataRefKey::Entry(data)).or_default().push(referencing);
            }
            Target::Section(scn) => {
                self.section_refs.entry(scn).or_default().push(referencing);
            }
            Target::Unset => {
                self.data_refs.entry(DataRefKey::Unlinked).or_default().push(referencing);
            }
            // An instruction target is already fully resolved (the
            // instruction address *is* the target, no entry lookup
            // needed) — it has no place in either entry-keyed multi-map.
            Target::Instruction(_) => {}
        }
    }

    fn deindex_unlinked(&mut self, referencing: EntryId) {
        if let Some(bucket) = self.data_refs.get_mut(&DataRefKey::Unlinked) {
            bucket.retain(|&e| e != referencing);
        }
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.section(id.section).and_then(|s| s.entry(id.index as usize))
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.section_mut(id.section).and_then(|s| s.entry_mut(id.index as usize))
    }

    /// Finds the loaded-section entry whose range covers `addr`, returning
    /// its id plus `addr`'s offset into it.
    pub fn entry_at_address(&self, addr: u64) -> Option<(EntryId, u64)> {
        for &scn_id in &self.loaded_sections {
            let scn = self.section(scn_id)?;
            if !scn.attrs().loaded || addr < scn.address() {
                continue;
            }
            if let Some((idx, entry)) = scn.entry_by_address(addr) {
                return Some((EntryId::new(scn_id, idx as u32), addr - entry.address()));
            }
        }
        None
    }

    /// §4.E "add internal reference by address or by offset-into-section":
    /// appends a new `Content::Pointer` entry to `in_section`, resolving its
    /// target by looking up whichever entry or section owns `loc`'s address.
    pub fn add_internal_reference(
        &mut self,
        in_section: SectionId,
        loc: RefLocation,
        pointer_type: PointerType,
    ) -> Result<EntryId> {
        let addr = self.resolve_location(loc)?;
        let (target, offset_in_target) = match self.entry_at_address(addr) {
            Some((eid, off)) => (Target::Data(eid), off),
            None => (Target::Unset, 0),
        };
        let mut pointer = Pointer::new(pointer_type);
        pointer.set_address(addr);
        pointer.set_target(target);
        pointer.set_offset_in_target(offset_in_target);
        let entry = Entry::new(Content::Pointer(pointer), self.word_size as u64);
        let index = {
            let scn = self
                .section_mut(in_section)
                .ok_or_else(|| Error::code(ErrorCode::SectionNotFound, "add_internal_reference"))?;
            let index = scn.num_entries();
            scn.add_entry(entry, index, None);
            index
        };
        let entry_id = EntryId::new(in_section, index as u32);
        self.index_pointer(entry_id, target);
        Ok(entry_id)
    }

    /// §4.E "add relocation (label + target address or offset,
    /// relocation-type)"; §8 scenario 4.
    pub fn add_reloc(
        &mut self,
        rel_scn: SectionId,
        label: LabelId,
        loc: RefLocation,
        reloc_type: u32,
    ) -> Result<EntryId> {
        let addr = self.resolve_location(loc)?;
        let (target, offset_in_target) = match self.entry_at_address(addr) {
            Some((eid, off)) => (Target::Data(eid), off),
            None => (Target::Unset, 0),
        };
        let mut pointer = Pointer::new(PointerType::Absolute);
        pointer.set_address(addr);
        pointer.set_target(target);
        pointer.set_offset_in_target(offset_in_target);
        let entry = Entry::new(
            Content::Relocation { label, reloc_type, pointer },
            self.word_size as u64,
        );
        let index = {
            let scn = self
                .section_mut(rel_scn)
                .ok_or_else(|| Error::code(ErrorCode::SectionNotFound, "add_reloc"))?;
            let index = scn.num_entries();
            scn.add_entry(entry, index, None);
            index
        };
        let entry_id = EntryId::new(rel_scn, index as u32);
        self.relocs.push(entry_id);
        self.index_pointer(entry_id, target);
        Ok(entry_id)
    }

    /// §4.E "add pointer target": (re)targets an already-constructed
    /// pointer-bearing entry, re-keying the cross-reference multi-maps.
    pub fn add_pointer_target(
        &mut self,
        entry_id: EntryId,
        target: Target,
        offset_in_target: u64,
    ) -> Result<()> {
        self.deindex_unlinked(entry_id);
        let entry = self
            .entry_mut(entry_id)
            .ok_or_else(|| Error::code(ErrorCode::LabelMissing, "add_pointer_target"))?;
        let ptr = entry
            .pointer_mut()
            .ok_or_else(|| Error::code(ErrorCode::IncorrectDataType, "entry carries no pointer"))?;
        ptr.set_target(target);
        ptr.set_offset_in_target(offset_in_target);
        self.index_pointer(entry_id, target);
        Ok(())
    }

    fn resolve_location(&mut self, loc: RefLocation) -> Result<u64> {
        match loc {
            RefLocation::Address(addr) => Ok(addr),
            RefLocation::SectionOffset(scn, offset) => {
                let scn = self
                    .section(scn)
                    .ok_or_else(|| self.fail(ErrorCode::SectionNotFound, "offset-into-section"))?;
                Ok(scn.address() + offset)
            }
        }
    }

    // ---- finalise-load --------------------------------------------------

    /// §4.E/§5 "`finalise_load` must follow all `load_*` calls": sorts
    /// `loaded_sections` and `segments` by address, attaches labels to
    /// entries, and links every unlinked pointer (§4.E.linking). Recurses
    /// into archive members first (§SPEC_FULL 4.E supplement).
    pub fn finalise_load(&mut self) -> Result<()> {
        log::debug!("binfile: finalising load of {} ({} archive member(s))", self.filename, self.archive_members.len());
        for member in &mut self.archive_members {
            member.finalise_load()?;
        }
        self.loaded_sections.sort_by_key(|&id| self.sections[id.0 as usize].address());
        self.segments.sort_by_key(|s| s.address());
        self.update_labels();
        let label_scns: Vec<SectionId> = self
            .sections
            .iter()
            .enumerate()
            .map(|(i, _)| SectionId(i as u32))
            .collect();
        for scn in label_scns {
            self.attach_labels_to_entries(scn);
        }
        self.link_unlinked_pointers()?;
        Ok(())
    }

    /// §4.E "Linking of unlinked pointers": walks the unlinked bucket in
    /// address order against the address-sorted loaded sections, resolving
    /// each pointer to the entry whose range contains it.
    fn link_unlinked_pointers(&mut self) -> Result<()> {
        let mut unlinked: Vec<(EntryId, u64)> = self
            .data_refs
            .remove(&DataRefKey::Unlinked)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|eid| self.entry(eid).and_then(|e| e.pointer()).map(|p| (eid, p.address())))
            .collect();
        unlinked.sort_by_key(|&(_, addr)| addr);

        let mut resolved: Vec<(EntryId, Target, u64)> = Vec::new();
        let mut still_unresolved: Vec<EntryId> = Vec::new();
        let mut cursor = 0usize;

        for &scn_id in &self.loaded_sections.clone() {
            let scn_addr = self.sections[scn_id.0 as usize].address();
            while cursor < unlinked.len() && unlinked[cursor].1 < scn_addr {
                still_unresolved.push(unlinked[cursor].0);
                cursor += 1;
            }
            let scn = &self.sections[scn_id.0 as usize];
            let mut j = cursor;
            while j < unlinked.len() {
                let (ref_id, addr) = unlinked[j];
                if addr >= scn_addr + scn.size() {
                    break;
                }
                match scn.entry_by_address(addr) {
                    Some((idx, entry)) if addr < entry.end_address() => {
                        let target_id = EntryId::new(scn_id, idx as u32);
                        resolved.push((ref_id, Target::Data(target_id), addr - entry.address()));
                    }
                    _ => still_unresolved.push(ref_id),
                }
                j += 1;
            }
            cursor = j;
        }
        still_unresolved.extend(unlinked[cursor..].iter().map(|&(id, _)| id));

        for (ref_id, target, offset_in_target) in resolved {
            if let Some(e) = self.entry_mut(ref_id) {
                if let Some(p) = e.pointer_mut() {
                    p.set_target(target);
                    p.set_offset_in_target(offset_in_target);
                }
            }
            self.index_pointer(ref_id, target);
        }
        if !still_unresolved.is_empty() {
            self.data_refs.insert(DataRefKey::Unlinked, still_unresolved);
        }
        Ok(())
    }

    pub fn archive_members(&self) -> &[BinFile] {
        &self.archive_members
    }

    pub fn add_archive_member(&mut self, member: BinFile) {
        self.archive_members.push(member);
    }
}

/// A `BinFile` backed by a no-op driver, for tests elsewhere in the crate
/// (e.g. [`crate::cfg::extract`]) that need one to call `add_label` on but
/// have no interest in section/segment content.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::driver::{DefaultSectionNames, EmptySpace, MoveOutcome};
    use crate::interval::Interval;

    struct NullDriver;
    impl FormatDriver for NullDriver {
        fn parse_debug_info(&mut self) -> Result<()> {
            Ok(())
        }
        fn add_external_function_labels(&mut self) -> Result<()> {
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
            Vec::new()
        }
        fn first_loaded_address(&self) -> Option<u64> {
            None
        }
        fn last_loaded_address(&self) -> Option<u64> {
            None
        }
        fn try_move_section_to_interval(&self, _: SectionId, _: Interval) -> MoveOutcome {
            MoveOutcome::Fallback
        }
        fn init_patched_copy(&mut self) -> Result<()> {
            Ok(())
        }
        fn add_section(&mut self, _: SectionId) -> Result<()> {
            Ok(())
        }
        fn add_segment(&mut self, _: SegmentId) -> Result<()> {
            Ok(())
        }
        fn add_external_library(&mut self, _: &str) -> Result<()> {
            Ok(())
        }
        fn rename_external_library(&mut self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn add_external_function(&mut self, _: &str, _: u64) -> Result<()> {
            Ok(())
        }
        fn add_label(&mut self, _: LabelId) -> Result<()> {
            Ok(())
        }
        fn finalise(&mut self, _: &[EmptySpace]) -> Result<()> {
            Ok(())
        }
        fn write(&mut self, _: &mut dyn std::io::Write) -> Result<()> {
            Ok(())
        }
        fn write_original(&mut self, _: &mut dyn std::io::Write) -> Result<()> {
            Ok(())
        }
        fn default_section_names(&self) -> DefaultSectionNames {
            DefaultSectionNames { code: ".text", fixed_code: ".init", data: ".data" }
        }
    }

    pub(crate) fn new_test_binfile() -> BinFile {
        BinFile::new(
            "test.bin",
            Format::Elf,
            FileType::Executable,
            8,
            Arch::X86_64,
            Abi::SystemV,
            ByteOrder::Little,
            Box::new(NullDriver),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binfile::tests_support::new_test_binfile as new_file;
    use crate::entry::Reference;

    fn loaded_data_section(bf: &mut BinFile, addr: u64, bytes: &[&[u8]]) -> SectionId {
        let mut scn = Section::new("data", SectionType::Data);
        scn.attrs_mut().loaded = true;
        scn.set_address(addr);
        let id = bf.add_section(scn);
        for (i, chunk) in bytes.iter().enumerate() {
            let entry = Entry::new(Content::Raw(chunk.to_vec()), chunk.len() as u64);
            bf.section_mut(id).unwrap().add_entry(entry, i, None);
        }
        bf.section_mut(id).unwrap().set_size(bytes.iter().map(|b| b.len() as u64).sum());
        id
    }

    #[test]
    fn add_reloc_links_to_overlapping_entry() {
        let mut bf = new_file();
        let data_scn = loaded_data_section(&mut bf, 0x4000, &[&[0u8; 0x10]]);
        let rel_scn_id = bf.add_section(Section::new(".rel", SectionType::Reloc));
        let label = bf.add_label(Label::new("sym", 0, Target::Unset, LabelType::Variable));

        let reloc_id = bf
            .add_reloc(rel_scn_id, label, RefLocation::Address(0x4008), 7)
            .unwrap();

        let entry = bf.entry(reloc_id).unwrap();
        match entry.content() {
            Content::Relocation { pointer, reloc_type, .. } => {
                assert_eq!(*reloc_type, 7);
                assert_eq!(pointer.offset_in_target(), 0x8);
                assert!(matches!(pointer.target(), Target::Data(d) if d.section == data_scn));
            }
            _ => panic!("expected relocation content"),
        }
        assert_eq!(bf.relocs().len(), 1);
    }

    #[test]
    fn unlinked_pointer_resolves_during_finalise_load() {
        let mut bf = new_file();
        let ref_scn_id = bf.add_section(Section::new(".refs", SectionType::Refs));
        // Target section is added *after* the pointer, forcing the
        // pointer to start out unlinked.
        let mut ptr = Pointer::new(PointerType::Absolute);
        ptr.set_address(0x5004);
        let entry = Entry::new(Content::Pointer(ptr), 8);
        bf.section_mut(ref_scn_id).unwrap().add_entry(entry, 0, None);
        let ref_id = EntryId::new(ref_scn_id, 0);
        bf.index_pointer(ref_id, Target::Unset);

        let data_scn = loaded_data_section(&mut bf, 0x5000, &[&[0u8; 0x10]]);
        bf.finalise_load().unwrap();

        let entry = bf.entry(ref_id).unwrap();
        let p = entry.pointer().unwrap();
        assert!(matches!(p.target(), Target::Data(d) if d.section == data_scn));
        assert_eq!(p.offset_in_target(), 4);
        assert!(bf.data_refs.get(&DataRefKey::Unlinked).map(|v| v.is_empty()).unwrap_or(true));
    }

    #[test]
    fn loaded_sections_sorted_by_address_after_finalise() {
        let mut bf = new_file();
        loaded_data_section(&mut bf, 0x9000, &[&[0u8; 4]]);
        loaded_data_section(&mut bf, 0x1000, &[&[0u8; 4]]);
        bf.finalise_load().unwrap();
        let addrs: Vec<u64> =
            bf.loaded_sections().iter().map(|&id| bf.section(id).unwrap().address()).collect();
        assert_eq!(addrs, vec![0x1000, 0x9000]);
    }

    /// §4.C "link label (bi-directional if addresses match)": a variable
    /// label sitting at an entry's exact address gets linked entry -> label
    /// (`Entry::reference`) *and* label -> entry (`Label::target`).
    #[test]
    fn attach_labels_to_entries_links_both_directions_on_exact_address_match() {
        let mut bf = new_file();
        let data_scn = loaded_data_section(&mut bf, 0x5000, &[&[0u8; 0x10]]);
        let label_id = bf.add_label(Label::new("g_var", 0x5000, Target::Unset, LabelType::Variable));
        bf.labels_by_section.entry(data_scn).or_default().push(label_id);

        bf.finalise_load().unwrap();

        let entry_id = EntryId::new(data_scn, 0);
        let entry = bf.entry(entry_id).unwrap();
        assert!(matches!(entry.reference(), Some(Reference::Label(id)) if id == label_id));

        let label = bf.label(label_id).unwrap();
        assert_eq!(label.target(), Target::Data(entry_id));
    }
}
