// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Byte-level memory with per-byte initialization and pointer provenance.

use crate::c_decls::ast::POINTER_SIZE;
use harness_metadata::DefectKind;
use std::collections::BTreeMap;

pub type AllocId = usize;

/// Addresses below this are reported as null dereferences.
const NULL_PAGE: i64 = 4096;

/// Largest single object, in bytes.
pub const MAX_ALLOCATION: u64 = 16 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AllocKind {
    Heap,
    Stack,
    Global,
}

#[derive(Debug, Clone)]
struct Allocation {
    bytes: Vec<Option<u8>>,
    /// Offsets where a pointer was stored, and the allocation it points into
    provenance: BTreeMap<u64, AllocId>,
    kind: AllocKind,
    live: bool,
    label: String,
}

/// An address: an offset into an allocation, or a plain integer address when `alloc` is
/// `None` (the null pointer is `{ alloc: None, offset: 0 }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub alloc: Option<AllocId>,
    pub offset: i64,
}

impl Pointer {
    pub const NULL: Pointer = Pointer { alloc: None, offset: 0 };

    pub fn is_null(&self) -> bool {
        *self == Pointer::NULL
    }

    pub fn offset_by(self, bytes: i64) -> Pointer {
        Pointer { alloc: self.alloc, offset: self.offset.wrapping_add(bytes) }
    }
}

/// A memory access that went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryError {
    pub kind: DefectKind,
    pub message: String,
}

impl MemoryError {
    fn new(kind: DefectKind, message: String) -> Self {
        MemoryError { kind, message }
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;

#[derive(Debug, Default)]
pub struct Memory {
    allocations: Vec<Allocation>,
}

impl Memory {
    /// Create a live allocation. Returns `None` for objects larger than [`MAX_ALLOCATION`].
    pub fn allocate(
        &mut self,
        kind: AllocKind,
        size: u64,
        zeroed: bool,
        label: &str,
    ) -> Option<Pointer> {
        if size > MAX_ALLOCATION {
            return None;
        }
        let fill = if zeroed { Some(0) } else { None };
        self.allocations.push(Allocation {
            bytes: vec![fill; size as usize],
            provenance: BTreeMap::new(),
            kind,
            live: true,
            label: label.to_string(),
        });
        Some(Pointer { alloc: Some(self.allocations.len() - 1), offset: 0 })
    }

    /// End the lifetime of a stack allocation.
    pub fn kill(&mut self, id: AllocId) {
        if let Some(alloc) = self.allocations.get_mut(id) {
            alloc.live = false;
        }
    }

    /// Release a heap block. Freeing null does nothing.
    pub fn free(&mut self, ptr: Pointer) -> MemoryResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let Some(id) = ptr.alloc else {
            return Err(MemoryError::new(
                DefectKind::InvalidFree,
                format!("free of non-heap address {:#x}", ptr.offset),
            ));
        };
        let alloc = &mut self.allocations[id];
        if alloc.kind != AllocKind::Heap {
            return Err(MemoryError::new(
                DefectKind::InvalidFree,
                format!("free of {} memory `{}`", alloc.kind, alloc.label),
            ));
        }
        if !alloc.live {
            return Err(MemoryError::new(
                DefectKind::DoubleFree,
                format!("`{}` was already freed", alloc.label),
            ));
        }
        if ptr.offset != 0 {
            return Err(MemoryError::new(
                DefectKind::InvalidFree,
                format!("free of `{}` at offset {}", alloc.label, ptr.offset),
            ));
        }
        alloc.live = false;
        Ok(())
    }

    /// Size of the live heap block `ptr` points to the start of.
    pub fn block_size(&self, ptr: Pointer) -> MemoryResult<u64> {
        self.check_access(ptr, 0)?;
        let id = ptr.alloc.unwrap_or_default();
        Ok(self.allocations[id].bytes.len() as u64)
    }

    fn check_access(&self, ptr: Pointer, size: u64) -> MemoryResult<()> {
        let Some(id) = ptr.alloc else {
            let kind = if (0..NULL_PAGE).contains(&ptr.offset) {
                DefectKind::NullDereference
            } else {
                DefectKind::OutOfBounds
            };
            return Err(MemoryError::new(kind, format!("access to address {:#x}", ptr.offset)));
        };
        let alloc = &self.allocations[id];
        if !alloc.live {
            let what = if alloc.kind == AllocKind::Stack { "out of scope" } else { "freed" };
            return Err(MemoryError::new(
                DefectKind::UseAfterFree,
                format!("access to {what} {} memory `{}`", alloc.kind, alloc.label),
            ));
        }
        let len = alloc.bytes.len() as i64;
        if ptr.offset < 0 || ptr.offset.saturating_add(size as i64) > len {
            return Err(MemoryError::new(
                DefectKind::OutOfBounds,
                format!(
                    "access of {size} bytes at offset {} of `{}` ({len} bytes)",
                    ptr.offset, alloc.label
                ),
            ));
        }
        Ok(())
    }

    /// Read a little-endian integer. Reading pointer bytes yields their address.
    pub fn read_int(&self, ptr: Pointer, size: u64) -> MemoryResult<i128> {
        self.check_access(ptr, size)?;
        let id = ptr.alloc.unwrap_or_default();
        let alloc = &self.allocations[id];
        let start = ptr.offset as u64;
        if let Some(target) = alloc.provenance.get(&start).copied() {
            if size == POINTER_SIZE {
                let offset = self.raw_int(ptr, size)? as i64;
                return Ok(address_of(Pointer { alloc: Some(target), offset }));
            }
        }
        self.raw_int(ptr, size)
    }

    fn raw_int(&self, ptr: Pointer, size: u64) -> MemoryResult<i128> {
        let id = ptr.alloc.unwrap_or_default();
        let alloc = &self.allocations[id];
        let start = ptr.offset as usize;
        let mut value: u128 = 0;
        for (i, byte) in alloc.bytes[start..start + size as usize].iter().enumerate() {
            let Some(byte) = byte else {
                return Err(MemoryError::new(
                    DefectKind::UninitializedRead,
                    format!(
                        "read of uninitialized byte at offset {} of `{}`",
                        start + i,
                        alloc.label
                    ),
                ));
            };
            value |= u128::from(*byte) << (8 * i);
        }
        Ok(value as i128)
    }

    /// Write the low `size` bytes of `value`, little-endian.
    pub fn write_int(&mut self, ptr: Pointer, size: u64, value: i128) -> MemoryResult<()> {
        self.check_access(ptr, size)?;
        let id = ptr.alloc.unwrap_or_default();
        let alloc = &mut self.allocations[id];
        let start = ptr.offset as u64;
        let end = start + size;
        alloc.provenance.retain(|offset, _| *offset + POINTER_SIZE <= start || *offset >= end);
        for i in 0..size {
            alloc.bytes[(start + i) as usize] = Some((value >> (8 * i)) as u8);
        }
        Ok(())
    }

    pub fn read_pointer(&self, ptr: Pointer) -> MemoryResult<Pointer> {
        let size = POINTER_SIZE;
        self.check_access(ptr, size)?;
        let raw = self.raw_int(ptr, size)? as i64;
        let id = ptr.alloc.unwrap_or_default();
        Ok(match self.allocations[id].provenance.get(&(ptr.offset as u64)) {
            Some(target) => Pointer { alloc: Some(*target), offset: raw },
            None => self.pointer_from_address(raw),
        })
    }

    pub fn write_pointer(&mut self, ptr: Pointer, value: Pointer) -> MemoryResult<()> {
        let size = POINTER_SIZE;
        match value.alloc {
            Some(target) => {
                self.write_int(ptr, size, i128::from(value.offset))?;
                let id = ptr.alloc.unwrap_or_default();
                self.allocations[id].provenance.insert(ptr.offset as u64, target);
            }
            None => self.write_int(ptr, size, i128::from(value.offset))?,
        }
        Ok(())
    }

    /// Turn an integer back into a pointer, recovering provenance from addresses produced by
    /// [`address_of`].
    pub fn pointer_from_address(&self, address: i64) -> Pointer {
        let high = (address as u64) >> 32;
        if high > 0 && (high as usize) <= self.allocations.len() {
            let id = high as usize - 1;
            Pointer { alloc: Some(id), offset: address & 0xffff_ffff }
        } else {
            Pointer { alloc: None, offset: address }
        }
    }

    /// Copy bytes and provenance.
    pub fn copy(&mut self, dst: Pointer, src: Pointer, size: u64) -> MemoryResult<()> {
        if size == 0 {
            return Ok(());
        }
        self.check_access(src, size)?;
        self.check_access(dst, size)?;
        let src_alloc = &self.allocations[src.alloc.unwrap_or_default()];
        let start = src.offset as u64;
        let bytes: Vec<Option<u8>> =
            src_alloc.bytes[start as usize..(start + size) as usize].to_vec();
        let provenance: Vec<(u64, AllocId)> = src_alloc
            .provenance
            .range(start..start + size)
            .map(|(offset, target)| (offset - start, *target))
            .collect();
        let dst_alloc = &mut self.allocations[dst.alloc.unwrap_or_default()];
        let dst_start = dst.offset as u64;
        dst_alloc.provenance.retain(|offset, _| *offset < dst_start || *offset >= dst_start + size);
        for (i, byte) in bytes.into_iter().enumerate() {
            dst_alloc.bytes[dst_start as usize + i] = byte;
        }
        for (offset, target) in provenance {
            dst_alloc.provenance.insert(dst_start + offset, target);
        }
        Ok(())
    }
}

/// The integer value of a pointer. Allocation `n` lives at `(n + 1) << 32`.
pub fn address_of(ptr: Pointer) -> i128 {
    match ptr.alloc {
        Some(id) => (((id as i128) + 1) << 32) + i128::from(ptr.offset),
        None => i128::from(ptr.offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_int_round_trip_and_uninit() {
        let mut memory = Memory::default();
        let p = memory.allocate(AllocKind::Stack, 8, false, "x").unwrap();
        assert_eq!(memory.read_int(p, 4).unwrap_err().kind, DefectKind::UninitializedRead);
        memory.write_int(p, 4, -2).unwrap();
        assert_eq!(memory.read_int(p, 4).unwrap(), 0xffff_fffe);
        let upper = memory.read_int(p.offset_by(4), 4);
        assert_eq!(upper.unwrap_err().kind, DefectKind::UninitializedRead);
        assert_eq!(memory.read_int(p.offset_by(6), 4).unwrap_err().kind, DefectKind::OutOfBounds);
    }

    #[test]
    fn check_free_defects() {
        let mut memory = Memory::default();
        let heap = memory.allocate(AllocKind::Heap, 4, true, "block").unwrap();
        let stack = memory.allocate(AllocKind::Stack, 4, true, "local").unwrap();
        assert_eq!(memory.free(heap.offset_by(1)).unwrap_err().kind, DefectKind::InvalidFree);
        assert_eq!(memory.free(stack).unwrap_err().kind, DefectKind::InvalidFree);
        memory.free(heap).unwrap();
        assert_eq!(memory.free(heap).unwrap_err().kind, DefectKind::DoubleFree);
        assert_eq!(memory.read_int(heap, 4).unwrap_err().kind, DefectKind::UseAfterFree);
        memory.free(Pointer::NULL).unwrap();
    }

    #[test]
    fn check_allocation_limit() {
        let mut memory = Memory::default();
        assert!(memory.allocate(AllocKind::Heap, MAX_ALLOCATION, false, "big").is_some());
        assert!(memory.allocate(AllocKind::Stack, MAX_ALLOCATION + 1, false, "huge").is_none());
        assert!(memory.allocate(AllocKind::Heap, u64::MAX, true, "huge").is_none());
    }

    #[test]
    fn check_null_and_wild_pointers() {
        let memory = Memory::default();
        let null = memory.read_int(Pointer::NULL, 4);
        assert_eq!(null.unwrap_err().kind, DefectKind::NullDereference);
        let wild = Pointer { alloc: None, offset: 0x1234_5678 };
        assert_eq!(memory.read_int(wild, 4).unwrap_err().kind, DefectKind::OutOfBounds);
    }

    #[test]
    fn check_pointer_provenance() {
        let mut memory = Memory::default();
        let target = memory.allocate(AllocKind::Heap, 16, true, "target").unwrap();
        let slot = memory.allocate(AllocKind::Stack, 8, false, "slot").unwrap();
        memory.write_pointer(slot, target.offset_by(4)).unwrap();
        assert_eq!(memory.read_pointer(slot).unwrap(), target.offset_by(4));
        let address = memory.read_int(slot, 8).unwrap();
        assert_eq!(address, address_of(target) + 4);
        assert_eq!(memory.pointer_from_address(address as i64), target.offset_by(4));

        // Overwriting part of a pointer drops its provenance.
        memory.write_int(slot.offset_by(4), 4, 0).unwrap();
        assert_eq!(memory.read_pointer(slot).unwrap().alloc, None);
    }
}
