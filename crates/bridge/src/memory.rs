//! Memory View - typed, bounds-checked access to guest linear memory
//!
//! The guest reports four base pointers at startup (event, diff, fetch,
//! string). Everything the bridge reads or writes goes through a `Region`
//! at one of those pointers, or through an explicit `(ptr, len)` pair the
//! guest handed over. All integers are little-endian.
//!
//! Nothing here panics on a bad pointer: out-of-range access is an error
//! the caller turns into a no-op.

use std::borrow::Cow;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const EVENT_BUFFER_SIZE: u32 = 256;
pub const DIFF_BUFFER_SIZE: u32 = 4096;
pub const FETCH_BUFFER_SIZE: u32 = 16384;
pub const STRING_BUFFER_SIZE: u32 = 4096;

/// Fixed-capacity shared region inside guest memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub ptr: u32,
    pub capacity: u32,
}

impl Region {
    pub const fn new(ptr: u32, capacity: u32) -> Self {
        Self { ptr, capacity }
    }

    /// Absolute range of `len` bytes at `offset` into the region, if it fits
    pub fn span(&self, offset: u32, len: u32) -> Option<(u32, u32)> {
        let end = offset.checked_add(len)?;
        if end > self.capacity {
            return None;
        }
        Some((self.ptr.checked_add(offset)?, len))
    }
}

/// Capacities of the four shared buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferCapacities {
    pub event: u32,
    pub diff: u32,
    pub fetch: u32,
    pub string: u32,
}

impl Default for BufferCapacities {
    fn default() -> Self {
        Self {
            event: EVENT_BUFFER_SIZE,
            diff: DIFF_BUFFER_SIZE,
            fetch: FETCH_BUFFER_SIZE,
            string: STRING_BUFFER_SIZE,
        }
    }
}

/// Where the four shared buffers live in guest memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLayout {
    pub event: Region,
    pub diff: Region,
    pub fetch: Region,
    pub string: Region,
}

impl BufferLayout {
    pub fn new(pointers: [u32; 4], capacities: BufferCapacities) -> Self {
        let [event, diff, fetch, string] = pointers;
        Self {
            event: Region::new(event, capacities.event),
            diff: Region::new(diff, capacities.diff),
            fetch: Region::new(fetch, capacities.fetch),
            string: Region::new(string, capacities.string),
        }
    }

    /// Check every region fits in a memory of `size` bytes
    pub fn validate(&self, size: usize) -> Result<()> {
        for (name, region) in [
            ("event", self.event),
            ("diff", self.diff),
            ("fetch", self.fetch),
            ("string", self.string),
        ] {
            let end = region.ptr as u64 + region.capacity as u64;
            if end > size as u64 {
                return Err(BridgeError::BadBuffer {
                    name,
                    ptr: region.ptr,
                    capacity: region.capacity,
                    size,
                });
            }
        }
        Ok(())
    }
}

fn checked_range(ptr: u32, len: u32, size: usize) -> Result<Range<usize>> {
    let start = ptr as usize;
    start
        .checked_add(len as usize)
        .filter(|end| *end <= size)
        .map(|end| start..end)
        .ok_or(BridgeError::OutOfBounds { ptr, len, size })
}

/// Read-only view over guest memory
#[derive(Debug, Clone, Copy)]
pub struct MemoryView<'a> {
    memory: &'a [u8],
}

impl<'a> MemoryView<'a> {
    pub fn new(memory: &'a [u8]) -> Self {
        Self { memory }
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub fn bytes(&self, ptr: u32, len: u32) -> Result<&'a [u8]> {
        let range = checked_range(ptr, len, self.memory.len())?;
        Ok(&self.memory[range])
    }

    pub fn read_u8(&self, ptr: u32) -> Result<u8> {
        Ok(self.bytes(ptr, 1)?[0])
    }

    pub fn read_u32(&self, ptr: u32) -> Result<u32> {
        let raw = self.bytes(ptr, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// UTF-8 string at `(ptr, len)`; invalid sequences become U+FFFD
    pub fn string(&self, ptr: u32, len: u32) -> Result<Cow<'a, str>> {
        Ok(String::from_utf8_lossy(self.bytes(ptr, len)?))
    }

    /// Bytes at `offset` inside a region; must stay within its capacity
    pub fn region_bytes(&self, region: Region, offset: u32, len: u32) -> Result<&'a [u8]> {
        let (ptr, len) = region.span(offset, len).ok_or(BridgeError::OutOfBounds {
            ptr: region.ptr.saturating_add(offset),
            len,
            size: self.memory.len(),
        })?;
        self.bytes(ptr, len)
    }

    pub fn region_string(&self, region: Region, offset: u32, len: u32) -> Result<Cow<'a, str>> {
        Ok(String::from_utf8_lossy(self.region_bytes(region, offset, len)?))
    }

    pub fn region_u8(&self, region: Region, offset: u32) -> Result<u8> {
        Ok(self.region_bytes(region, offset, 1)?[0])
    }

    pub fn region_u32(&self, region: Region, offset: u32) -> Result<u32> {
        let raw = self.region_bytes(region, offset, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

/// Mutable view over guest memory
#[derive(Debug)]
pub struct MemoryViewMut<'a> {
    memory: &'a mut [u8],
}

impl<'a> MemoryViewMut<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    pub fn view(&self) -> MemoryView<'_> {
        MemoryView::new(self.memory)
    }

    pub fn write_bytes(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        let range = checked_range(ptr, data.len() as u32, self.memory.len())?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }

    pub fn write_u8(&mut self, ptr: u32, value: u8) -> Result<()> {
        self.write_bytes(ptr, &[value])
    }

    pub fn write_u32(&mut self, ptr: u32, value: u32) -> Result<()> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    /// Write inside a region; must stay within its capacity
    pub fn write_region(&mut self, region: Region, offset: u32, data: &[u8]) -> Result<()> {
        let (ptr, _) = region
            .span(offset, data.len() as u32)
            .ok_or(BridgeError::OutOfBounds {
                ptr: region.ptr.saturating_add(offset),
                len: data.len() as u32,
                size: self.memory.len(),
            })?;
        self.write_bytes(ptr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_reads_and_writes() {
        let mut memory = vec![0u8; 64];
        let mut view = MemoryViewMut::new(&mut memory);
        view.write_u32(8, 0xDEADBEEF).unwrap();
        view.write_u8(12, 7).unwrap();

        assert_eq!(memory[8..12], [0xEF, 0xBE, 0xAD, 0xDE]);
        let view = MemoryView::new(&memory);
        assert_eq!(view.read_u32(8).unwrap(), 0xDEADBEEF);
        assert_eq!(view.read_u8(12).unwrap(), 7);
    }

    #[test]
    fn test_out_of_bounds_is_an_error_not_a_panic() {
        let memory = vec![0u8; 16];
        let view = MemoryView::new(&memory);

        assert!(view.read_u32(13).is_err());
        assert!(view.bytes(u32::MAX, 2).is_err());
        assert!(view.bytes(16, 0).is_ok());
    }

    #[test]
    fn test_region_capacity_is_enforced() {
        let memory = vec![b'a'; 64];
        let region = Region::new(16, 8);
        let view = MemoryView::new(&memory);

        assert_eq!(view.region_string(region, 0, 8).unwrap(), "aaaaaaaa");
        assert!(view.region_bytes(region, 4, 5).is_err());
        assert!(view.region_bytes(region, u32::MAX, 2).is_err());
    }

    #[test]
    fn test_lossy_utf8() {
        let memory = [0x68, 0x69, 0xFF];
        let view = MemoryView::new(&memory);
        assert_eq!(view.string(0, 3).unwrap(), "hi\u{FFFD}");
    }

    #[test]
    fn test_layout_validation() {
        let layout = BufferLayout::new([0, 256, 4352, 20736], BufferCapacities::default());
        assert!(layout.validate(24832).is_ok());
        assert!(layout.validate(24831).is_err());
    }
}
