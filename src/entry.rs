//! §4.C — the data entry store.

use crate::label::LabelId;
use crate::pointer::Pointer;
use crate::section::SectionId;

/// Stable cross-reference to an [`Entry`]: entries themselves live in a
/// per-section `Vec` (§4.D), so a [`crate::binfile::BinFile`]-wide handle is
/// the pair `(owning section, index within it)` rather than a single flat
/// arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub section: SectionId,
    pub index: u32,
}

impl EntryId {
    pub fn new(section: SectionId, index: u32) -> Self {
        EntryId { section, index }
    }
}

pub const ENTRY_ID_ERROR: u32 = u32::MAX;

/// What an entry's bytes represent (§3 "Data entry", `content`).
#[derive(Debug, Clone)]
pub enum Content {
    Raw(Vec<u8>),
    String(String),
    /// An immediate value, stored pre-serialised at its natural width.
    Value(u64),
    Pointer(Pointer),
    Label(LabelId),
    /// A relocation: the label it's expressed against, a format-specific
    /// relocation-type code, and the pointer describing where it applies
    /// (§8 scenario 4: "its pointer targets E0 with offset-in-target = 0x8").
    Relocation { label: LabelId, reloc_type: u32, pointer: Pointer },
    /// Size-only placeholder (zerodata, padding).
    Nil,
}

/// Whichever object locates this entry in the file: a label, or the
/// section it lives in directly (§3 "Data entry", `reference`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Label(LabelId),
    Section(SectionId),
}

/// `{address, size, reference, content, type, local_ownership_flag}`
/// (§3 "Data entry"). Lifecycle: created by the format driver during load,
/// or lazily during patching (§4.G); destroyed with the owning section if
/// locally owned, else with the owning label/file.
#[derive(Debug, Clone)]
pub struct Entry {
    address: u64,
    size: u64,
    reference: Option<Reference>,
    content: Content,
    locally_owned: bool,
}

impl Entry {
    pub fn new(content: Content, size: u64) -> Self {
        Entry { address: 0, size, reference: None, content, locally_owned: true }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    pub fn end_address(&self) -> u64 {
        self.address + self.size
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut Content {
        &mut self.content
    }

    pub fn set_content(&mut self, content: Content) {
        self.content = content;
    }

    pub fn reference(&self) -> Option<Reference> {
        self.reference
    }

    pub fn set_section(&mut self, scn: SectionId) {
        self.reference = Some(Reference::Section(scn));
    }

    /// Attaches a label to this entry (the entry -> label half of §4.C
    /// "link label"). The reverse half — pointing the label's `target`
    /// back at this entry when the addresses match — is established by
    /// the caller ([`crate::binfile::BinFile::attach_labels_to_entries`]),
    /// which is the only place holding both the label and entry arenas at
    /// once; `label_address` is accepted here only so callers can pass it
    /// straight through without recomputing it.
    pub fn link_label(&mut self, label_id: LabelId, label_address: u64) {
        self.reference = Some(Reference::Label(label_id));
        let _ = label_address;
    }

    pub fn locally_owned(&self) -> bool {
        self.locally_owned
    }

    pub fn set_locally_owned(&mut self, owned: bool) {
        self.locally_owned = owned;
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// The pointer carried by this entry, whether it's a plain
    /// `Content::Pointer` or the pointer embedded in a `Content::Relocation`
    /// (§4.G `dup_refs` needs to rewire either uniformly).
    pub fn pointer(&self) -> Option<&Pointer> {
        match &self.content {
            Content::Pointer(p) => Some(p),
            Content::Relocation { pointer, .. } => Some(pointer),
            _ => None,
        }
    }

    pub fn pointer_mut(&mut self) -> Option<&mut Pointer> {
        match &mut self.content {
            Content::Pointer(p) => Some(p),
            Content::Relocation { pointer, .. } => Some(pointer),
            _ => None,
        }
    }

    /// §4.C `to_bytes`: flat byte representation for raw/string/value/
    /// pointer/nil content; label and relocation entries require
    /// format-specific encoding, which is out of scope, so they return
    /// `None` ("return unset").
    pub fn to_bytes(&self, ptr_width: usize, endian: scroll::Endian) -> Option<Vec<u8>> {
        match &self.content {
            Content::Raw(bytes) => Some(bytes.clone()),
            Content::String(s) => {
                let mut v = s.as_bytes().to_vec();
                v.push(0);
                Some(v)
            }
            Content::Value(v) => {
                let width = self.size as usize;
                use scroll::Pwrite;
                let mut buf = vec![0u8; width.max(1)];
                match width {
                    1 => buf.pwrite_with(*v as u8, 0, endian).ok()?,
                    2 => buf.pwrite_with(*v as u16, 0, endian).ok()?,
                    4 => buf.pwrite_with(*v as u32, 0, endian).ok()?,
                    8 => buf.pwrite_with(*v, 0, endian).ok()?,
                    _ => return None,
                };
                Some(buf)
            }
            Content::Pointer(p) => p.serialise(ptr_width, endian).ok(),
            Content::Nil => Some(Vec::new()),
            Content::Label(_) | Content::Relocation { .. } => None,
        }
    }

    /// Sort key for `compare_by_address` (§4.C ordering); per the Open
    /// Question in §9, an entry with no address assigned yet sorts before
    /// every addressed entry.
    pub fn address_sort_key(&self) -> u64 {
        self.address
    }
}

/// Comparator used for binary search over address-sorted entry arrays
/// (§4.C `compare_by_address`). Entries that have not yet been assigned an
/// address (represented by the caller passing `None`) sort strictly before
/// any addressed entry (§9 open question).
pub fn compare_by_address(a: Option<u64>, b: Option<u64>) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_preserves_type_size_addr_content() {
        let mut e = Entry::new(Content::Raw(vec![1, 2, 3]), 3);
        e.set_address(0x1000);
        let dup = e.duplicate();
        assert_eq!(dup.address(), e.address());
        assert_eq!(dup.size(), e.size());
        match (dup.content(), e.content()) {
            (Content::Raw(a), Content::Raw(b)) => assert_eq!(a, b),
            _ => panic!("content variant changed"),
        }
    }

    #[test]
    fn to_bytes_raw() {
        let e = Entry::new(Content::Raw(vec![0xde, 0xad]), 2);
        assert_eq!(e.to_bytes(8, scroll::Endian::Little), Some(vec![0xde, 0xad]));
    }

    #[test]
    fn to_bytes_label_is_unset() {
        let e = Entry::new(Content::Label(LabelId(0)), 0);
        assert_eq!(e.to_bytes(8, scroll::Endian::Little), None);
    }

    #[test]
    fn unset_address_sorts_before_addressed() {
        assert_eq!(compare_by_address(None, Some(5)), std::cmp::Ordering::Less);
    }
}
