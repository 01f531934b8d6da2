use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Rid;

/// Fixed-width byte codec for keys and values stored on hash table pages.
///
/// Implementations must write exactly [`ENCODED_SIZE`](Self::ENCODED_SIZE)
/// bytes so bucket slot offsets stay computable from the type alone. The
/// page layout is self-contained: nothing encoded here may reference
/// process memory.
pub trait Storable: Clone + PartialEq + Send + Sync + 'static {
    const ENCODED_SIZE: usize;

    fn write_to(&self, buf: &mut [u8]);
    fn read_from(buf: &[u8]) -> Self;
}

impl Storable for i32 {
    const ENCODED_SIZE: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl Storable for u32 {
    const ENCODED_SIZE: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl Storable for u64 {
    const ENCODED_SIZE: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl Storable for Rid {
    const ENCODED_SIZE: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot_num);
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_u32(&buf[0..4]),
            slot_num: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_round_trip() {
        let rid = Rid::new(77, 3);
        let mut buf = [0u8; 8];
        rid.write_to(&mut buf);
        assert_eq!(Rid::read_from(&buf), rid);
    }

    #[test]
    fn test_i32_round_trip() {
        let mut buf = [0u8; 4];
        (-123i32).write_to(&mut buf);
        assert_eq!(i32::read_from(&buf), -123);
    }
}
