//! Labels (§3 "Label"), shared between the section/segment model (§4.D) and
//! the binary-file aggregate's label management (§4.E).

use crate::pointer::Target;
use crate::section::SectionId;

/// Arena index of a [`Label`] within a [`crate::binfile::BinFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelId(pub u32);

/// Ordered so that `Function > ExternalFunction > Generic > PatchSection >
/// NonFunction > Variable > External > NonVariable > Dummy > Other`
/// (§3). The derived `Ord` follows declaration order, matching that
/// qualification ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LabelType {
    Function,
    ExternalFunction,
    Generic,
    PatchSection,
    NonFunction,
    Variable,
    External,
    NonVariable,
    Dummy,
    Other,
}

impl LabelType {
    pub fn is_function_like(self) -> bool {
        matches!(self, LabelType::Function | LabelType::ExternalFunction)
    }
}

/// `{name, address, target, target_type, section, label_type}` (§3).
#[derive(Debug, Clone)]
pub struct Label {
    name: String,
    address: u64,
    target: Target,
    section: Option<SectionId>,
    label_type: LabelType,
    /// The original's `fct_t.demname`: the debug-resolved name the CC
    /// extractor found for this function, distinct from `name` once a
    /// `ccid` suffix has been appended (§4.I.1). `None` for labels no
    /// extractor ever named, or where no debug info resolved a name.
    demangled_name: Option<String>,
}

impl Label {
    pub fn new(name: impl Into<String>, address: u64, target: Target, label_type: LabelType) -> Self {
        Label { name: name.into(), address, target, section: None, label_type, demangled_name: None }
    }

    pub fn demangled_name(&self) -> Option<&str> {
        self.demangled_name.as_deref()
    }

    pub fn set_demangled_name(&mut self, name: impl Into<String>) {
        self.demangled_name = Some(name.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// §4.C "link label (bi-directional if addresses match)": points this
    /// label's `target` back at the data entry it was just attached to,
    /// mirroring `la_binfile.c`'s `label_set_target_to_data`. Called from
    /// `BinFile::attach_labels_to_entries`, which owns both the label and
    /// entry arenas and so is the only place that can establish both
    /// halves of the link.
    pub fn set_target(&mut self, target: Target) {
        self.target = target;
    }

    pub fn label_type(&self) -> LabelType {
        self.label_type
    }

    pub fn set_label_type(&mut self, t: LabelType) {
        self.label_type = t;
    }

    pub fn section(&self) -> Option<SectionId> {
        self.section
    }

    /// Switches the label's owning section — used when duplicating a label
    /// attached to an entry being promoted into a patched copy (§4.G
    /// "lazy duplication rules").
    pub fn set_section(&mut self, scn: SectionId) {
        self.section = Some(scn);
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }
}

/// Sort key for the per-section label ordering pass of §4.E
/// ("sort ... by address then name"): `(address, name)`.
pub fn sort_key(label: &Label) -> (u64, &str) {
    (label.address, label.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_type_orders_function_highest() {
        assert!(LabelType::Function < LabelType::Variable);
        assert!(LabelType::Variable < LabelType::Other);
    }
}
