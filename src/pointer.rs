//! §4.A — the pointer / reference model.
//!
//! A semantic link between a byte location and a target (instruction, data
//! entry, or section). Targets are stored as arena indices rather than raw
//! pointers (Design Note §9, "tagged sum type"), so a `Pointer` is `Copy`.

use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::section::SectionId;
use scroll::{Endian, Pwrite};

/// Opaque handle to an instruction, resolved externally (disassembly is out
/// of scope); the crate only ever stores and compares the address.
pub type InsnId = u64;

/// What a pointer resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Instruction(InsnId),
    Data(EntryId),
    Section(SectionId),
    Unset,
}

impl Target {
    pub fn is_set(&self) -> bool {
        !matches!(self, Target::Unset)
    }
}

/// How the pointer's stored value relates to its destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerType {
    /// `offset` *is* the destination address.
    Absolute,
    /// destination = `(relative_origin or containing element).address + offset + offset_in_target`.
    Relative,
    /// Only `target` is meaningful; there is no destination address.
    NoAddress,
}

/// A semantic link `{addr, offset, target, offset_in_target, pointer_type,
/// relative_origin}` (§3 "Pointer").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    addr: u64,
    offset: i64,
    offset_in_target: u64,
    pointer_type: PointerType,
    target: Target,
    /// Address this pointer's offset is relative to, when `pointer_type` is
    /// `Relative` and the origin isn't simply the containing element.
    relative_origin: Option<u64>,
}

impl Pointer {
    pub const ADDRESS_ERROR: i64 = -1;
    pub const OFFSET_ERROR: u64 = u64::MAX;

    pub fn new(pointer_type: PointerType) -> Self {
        Pointer {
            addr: 0,
            offset: 0,
            offset_in_target: 0,
            pointer_type,
            target: Target::Unset,
            relative_origin: None,
        }
    }

    pub fn duplicate(&self) -> Self {
        *self
    }

    pub fn address(&self) -> u64 {
        self.addr
    }

    pub fn set_address(&mut self, addr: u64) {
        self.addr = addr;
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: i64) {
        self.offset = offset;
    }

    pub fn offset_in_target(&self) -> u64 {
        self.offset_in_target
    }

    pub fn set_offset_in_target(&mut self, offset_in_target: u64) {
        self.offset_in_target = offset_in_target;
    }

    pub fn pointer_type(&self) -> PointerType {
        self.pointer_type
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn has_target(&self) -> bool {
        self.target.is_set()
    }

    pub fn set_target(&mut self, target: Target) {
        self.target = target;
    }

    pub fn set_relative_origin(&mut self, origin: Option<u64>) {
        self.relative_origin = origin;
    }

    pub fn relative_origin(&self) -> Option<u64> {
        self.relative_origin
    }

    /// §4.A `update_address_from_target`: recompute `addr`/`offset` from a
    /// resolved target's address. `containing_element_address` stands in
    /// for "the address of the element this pointer is embedded in" when no
    /// explicit relative origin was set.
    pub fn update_address_from_target(
        &mut self,
        target_address: Option<u64>,
        containing_element_address: u64,
    ) {
        let Some(target_addr) = target_address else {
            return;
        };
        match self.pointer_type {
            PointerType::Absolute => {
                self.addr = target_addr;
            }
            PointerType::Relative => {
                let origin = self.relative_origin.unwrap_or(containing_element_address);
                self.offset = target_addr as i64 - origin as i64;
            }
            PointerType::NoAddress => {}
        }
    }

    /// The destination address, given the resolved target's own address.
    /// §8 invariant: `get_target_address(p) == target.address + offset_in_target`.
    pub fn target_address(&self, target_address: u64) -> u64 {
        target_address.wrapping_add(self.offset_in_target)
    }

    /// §4.A `serialise`: raw bytes of `addr` (absolute) or `offset`
    /// (relative) encoded over `width` bytes, in the given byte order.
    pub fn serialise(&self, width: usize, endian: Endian) -> Result<Vec<u8>> {
        let value: u64 = match self.pointer_type {
            PointerType::Absolute => self.addr,
            PointerType::Relative => self.offset as u64,
            PointerType::NoAddress => {
                return Err(Error::code(
                    crate::error::ErrorCode::IncorrectDataType,
                    "no-address pointer carries no serialisable value",
                ))
            }
        };
        if width < 8 && (value >> (width * 8)) != 0 {
            return Err(Error::Overflow { value, width });
        }
        let mut buf = vec![0u8; width];
        match width {
            1 => buf.pwrite_with(value as u8, 0, endian)?,
            2 => buf.pwrite_with(value as u16, 0, endian)?,
            4 => buf.pwrite_with(value as u32, 0, endian)?,
            8 => buf.pwrite_with(value, 0, endian)?,
            _ => {
                return Err(Error::code(
                    crate::error::ErrorCode::IncorrectDataType,
                    format!("unsupported pointer width {width}"),
                ))
            }
        };
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_update_from_target() {
        let mut p = Pointer::new(PointerType::Absolute);
        p.set_target(Target::Data(EntryId::new(crate::section::SectionId(0), 3)));
        p.update_address_from_target(Some(0x4000), 0x1000);
        assert_eq!(p.address(), 0x4000);
    }

    #[test]
    fn relative_update_uses_containing_element_when_no_origin() {
        let mut p = Pointer::new(PointerType::Relative);
        p.set_target(Target::Data(EntryId::new(crate::section::SectionId(0), 1)));
        p.update_address_from_target(Some(0x2010), 0x2000);
        assert_eq!(p.offset(), 0x10);
    }

    #[test]
    fn relative_update_uses_explicit_origin() {
        let mut p = Pointer::new(PointerType::Relative);
        p.set_relative_origin(Some(0x3000));
        p.update_address_from_target(Some(0x3050), 0x9999);
        assert_eq!(p.offset(), 0x50);
    }

    #[test]
    fn unset_target_leaves_pointer_unchanged() {
        let mut p = Pointer::new(PointerType::Absolute);
        p.set_address(0x55);
        p.update_address_from_target(None, 0x1000);
        assert_eq!(p.address(), 0x55);
    }

    #[test]
    fn serialise_rejects_overflow() {
        let mut p = Pointer::new(PointerType::Absolute);
        p.set_address(0x1_0000_0000);
        assert!(p.serialise(4, Endian::Little).is_err());
    }

    #[test]
    fn serialise_absolute_little_endian() {
        let mut p = Pointer::new(PointerType::Absolute);
        p.set_address(0x0102);
        let bytes = p.serialise(2, Endian::Little).unwrap();
        assert_eq!(bytes, vec![0x02, 0x01]);
    }
}
