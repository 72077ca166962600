//! SGTIN-96 EPC to GTIN-14 decoding

use crate::domain::catalog::{EpcDecoder, EpcError};

const EPC_HEX_LEN: usize = 24;
const SGTIN96_HEADER: u8 = 0x30;
const MAX_PARTITION: u8 = 6;
const GTIN_BODY_DIGITS: usize = 13;

/// Bits after header, filter and partition
const PREFIX_OFFSET: u32 = 14;
/// Company prefix plus item reference always span 44 bits
const GTIN_BITS: u32 = 44;
const SERIAL_BITS: u32 = 96 - PREFIX_OFFSET - GTIN_BITS;

/// Company prefix bit width per partition
const COMPANY_PREFIX_BITS: [u32; 7] = [40, 37, 34, 30, 27, 24, 20];
/// Company prefix decimal digits per partition
const COMPANY_PREFIX_DIGITS: [usize; 7] = [12, 11, 10, 9, 8, 7, 6];

/// GS1 SGTIN-96 decoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Sgtin96Decoder;

impl EpcDecoder for Sgtin96Decoder {
    fn decode(&self, epc: &str) -> Result<String, EpcError> {
        gtin14_from_epc(epc)
    }
}

/// Decode a 96-bit SGTIN EPC hex string into its GTIN-14
pub fn gtin14_from_epc(epc: &str) -> Result<String, EpcError> {
    if epc.len() != EPC_HEX_LEN {
        return Err(EpcError::Length(epc.len()));
    }
    let bytes = hex::decode(epc).map_err(|_| EpcError::Hex)?;
    if bytes[0] != SGTIN96_HEADER {
        return Err(EpcError::Header(bytes[0]));
    }

    let partition = (bytes[1] & 0x1C) >> 2;
    if partition > MAX_PARTITION {
        return Err(EpcError::Partition(partition));
    }
    let p = partition as usize;

    let bits = bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b));
    let cp_bits = COMPANY_PREFIX_BITS[p];
    let ir_bits = GTIN_BITS - cp_bits;

    let company_prefix = field(bits, SERIAL_BITS + ir_bits, cp_bits);
    let item_reference = field(bits, SERIAL_BITS, ir_bits);

    let cp_digits = COMPANY_PREFIX_DIGITS[p];
    let ir_digits = GTIN_BODY_DIGITS - cp_digits;
    if company_prefix >= 10u64.pow(cp_digits as u32) {
        return Err(EpcError::CompanyPrefix(company_prefix));
    }
    if item_reference >= 10u64.pow(ir_digits as u32) {
        return Err(EpcError::ItemReference(item_reference));
    }

    // Indicator digit leads, then the company prefix, then the rest of the item reference
    let cp_str = format!("{:0width$}", company_prefix, width = cp_digits);
    let ir_str = format!("{:0width$}", item_reference, width = ir_digits);
    let mut gtin = String::with_capacity(GTIN_BODY_DIGITS + 1);
    gtin.push_str(&ir_str[..1]);
    gtin.push_str(&cp_str);
    gtin.push_str(&ir_str[1..]);
    gtin.push(check_digit(&gtin));
    Ok(gtin)
}

#[inline]
fn field(bits: u128, shift: u32, width: u32) -> u64 {
    ((bits >> shift) & ((1u128 << width) - 1)) as u64
}

fn check_digit(body: &str) -> char {
    let (mut odds, mut evens) = (0i32, 0i32);
    for (i, d) in body.bytes().map(|b| i32::from(b - b'0')).enumerate() {
        if i % 2 == 0 {
            odds += d;
        } else {
            evens += d;
        }
    }
    let check = (-3 * odds - evens).rem_euclid(10);
    char::from(b'0' + check as u8)
}
