//! Frame compiler (spec §4.2): turns a logical send (payload + opcode +
//! fin + rsv1) into a fully serialized wire frame. Masking direction is
//! role-driven (spec §9's open question): servers write unmasked frames,
//! clients always mask, generalizing the teacher's client-only
//! `write_frame_client` / server-only `write_frame_server` split in
//! `write.rs` into one function parameterized by an optional mask key.

use crate::frame::OpCode;
use crate::pipeline::FrameDescriptor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates a fresh masking key. Need not be cryptographically strong
/// (spec §4.2) — it only needs to look random on the wire.
pub fn random_mask_key() -> [u8; 4] {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    [rng.random::<u8>(), rng.random::<u8>(), rng.random::<u8>(), rng.random::<u8>()]
}

/// Serializes `descriptor` onto the wire, masking with `mask` when present.
pub fn compile_frame(descriptor: &FrameDescriptor, mask: Option<[u8; 4]>) -> Vec<u8> {
    let payload = &descriptor.msg;
    let len = payload.len();

    let mut out = Vec::with_capacity(len + 14);

    let mut first_byte = (descriptor.fin as u8) << 7 | descriptor.opcode.as_u8();
    if descriptor.rsv1 {
        first_byte |= 0b0100_0000;
    }
    out.push(first_byte);

    let mask_bit: u8 = if mask.is_some() { 0b1000_0000 } else { 0 };
    if len <= 125 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, byte)| byte ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }

    out
}

/// Inverse of [`compile_frame`] at the descriptor level, used by the
/// round-trip test in spec §8 ("`compile(decompose(F)) == F` modulo mask
/// key"). Only needs to undo framing, not re-implement the parser.
#[cfg(test)]
fn decompose(bytes: &[u8]) -> (FrameDescriptor, Option<[u8; 4]>) {
    let fin = bytes[0] & 0b1000_0000 != 0;
    let rsv1 = bytes[0] & 0b0100_0000 != 0;
    let opcode = OpCode::from_byte(bytes[0] & 0x0F).unwrap();
    let masked = bytes[1] & 0b1000_0000 != 0;
    let len7 = (bytes[1] & 0b0111_1111) as usize;
    let mut idx = 2;
    let len = if len7 == 126 {
        let l = u16::from_be_bytes([bytes[idx], bytes[idx + 1]]) as usize;
        idx += 2;
        l
    } else if len7 == 127 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[idx..idx + 8]);
        idx += 8;
        u64::from_be_bytes(arr) as usize
    } else {
        len7
    };
    let mask = if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&bytes[idx..idx + 4]);
        idx += 4;
        Some(key)
    } else {
        None
    };
    let mut payload = bytes[idx..idx + len].to_vec();
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }
    (FrameDescriptor { msg: payload, rsv1, fin, opcode }, mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_unmasked_frame_roundtrips() {
        let descriptor =
            FrameDescriptor { msg: b"Hello".to_vec(), rsv1: false, fin: true, opcode: OpCode::Text };
        let wire = compile_frame(&descriptor, None);
        let (decoded, mask) = decompose(&wire);
        assert!(mask.is_none());
        assert_eq!(decoded.msg, descriptor.msg);
        assert_eq!(decoded.fin, descriptor.fin);
        assert_eq!(decoded.opcode, descriptor.opcode);
    }

    #[test]
    fn masked_frame_roundtrips() {
        let descriptor =
            FrameDescriptor { msg: b"Hello".to_vec(), rsv1: false, fin: true, opcode: OpCode::Text };
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let wire = compile_frame(&descriptor, Some(key));
        let (decoded, mask) = decompose(&wire);
        assert_eq!(mask, Some(key));
        assert_eq!(decoded.msg, descriptor.msg);
    }

    #[test]
    fn long_frame_uses_16_bit_length() {
        let payload = vec![0u8; 1000];
        let descriptor =
            FrameDescriptor { msg: payload.clone(), rsv1: false, fin: true, opcode: OpCode::Binary };
        let wire = compile_frame(&descriptor, None);
        assert_eq!(wire[1], 126);
        let (decoded, _) = decompose(&wire);
        assert_eq!(decoded.msg, payload);
    }

    #[test]
    fn known_wire_frame_matches_spec_example() {
        // TEXT, "Hello", mask 37 fa 21 3d — spec §8 scenario 1.
        let descriptor =
            FrameDescriptor { msg: b"Hello".to_vec(), rsv1: false, fin: true, opcode: OpCode::Text };
        let wire = compile_frame(&descriptor, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(wire, vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }
}
