//! Wire encoding (SPEC_FULL §3.1 ambient component): a small varint-tagged
//! format for the manifest header and the "authenticable clone" of an item's
//! metadata. Decoding is bounds-checked throughout — a truncated or
//! oversized length prefix is `InvalidData`, never a panic or an
//! out-of-bounds slice, mirroring the bounds discipline the old
//! `decode_wire` enforced on a fixed-layout ciphertext.

use std::io::Read;

use crate::error::{PackageError, Result};
use crate::model::{ItemType, Manifest, ManifestCryptoSchemeTag, ManifestHeader, PayloadItem};

/// Upper bound on any single length-prefixed field this format decodes.
/// Exists purely to stop a corrupt length prefix from driving an
/// unbounded allocation (SPEC_FULL §7 "invalid data must not panic").
const MAX_FIELD_LEN: u64 = 64 * 1024 * 1024;

pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

pub fn read_varint(input: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *input.get(*pos).ok_or(PackageError::EndOfStream)?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(PackageError::invalid_data("varint too long"));
        }
    }
}

pub fn write_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub fn read_length_prefixed<'a>(input: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len = read_varint(input, pos)?;
    if len > MAX_FIELD_LEN {
        return Err(PackageError::invalid_data("length-prefixed field exceeds maximum"));
    }
    let len = len as usize;
    let end = pos.checked_add(len).ok_or_else(|| PackageError::invalid_data("length overflow"))?;
    let slice = input.get(*pos..end).ok_or(PackageError::EndOfStream)?;
    *pos = end;
    Ok(slice)
}

fn item_type_tag(t: ItemType) -> u8 {
    match t {
        ItemType::File => 0,
        ItemType::Directory => 1,
        ItemType::UnicodeString => 2,
        ItemType::Binary => 3,
        ItemType::KeyAction => 4,
    }
}

/// The bytes of an item that feed its own MAC (SPEC_FULL §4.2 C2): every
/// field the manifest carries for this item *except* the pre-key, the MAC
/// key, and the verified output itself — absorbing the tag into its own
/// computation would be circular.
pub fn authenticable_clone(item: &PayloadItem) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&item.id.0);
    out.push(item_type_tag(item.item_type));
    write_length_prefixed(&mut out, item.path.as_bytes());
    write_varint(&mut out, item.external_length);
    write_varint(&mut out, item.internal_length);
    write_varint(&mut out, item.cipher.key_size_bits as u64);
    write_length_prefixed(&mut out, &item.cipher.iv);
    write_varint(&mut out, item.auth.output_size as u64);
    write_length_prefixed(&mut out, &item.auth.salt);
    write_length_prefixed(&mut out, &item.auth.nonce);
    out
}

fn manifest_scheme_tag(scheme: ManifestCryptoSchemeTag) -> u8 {
    match scheme {
        ManifestCryptoSchemeTag::SymmetricOnly => 0,
        ManifestCryptoSchemeTag::Um1Hybrid => 1,
        ManifestCryptoSchemeTag::JpakeHybrid => 2,
    }
}

fn manifest_scheme_from_tag(tag: u8) -> Result<ManifestCryptoSchemeTag> {
    match tag {
        0 => Ok(ManifestCryptoSchemeTag::SymmetricOnly),
        1 => Ok(ManifestCryptoSchemeTag::Um1Hybrid),
        2 => Ok(ManifestCryptoSchemeTag::JpakeHybrid),
        other => Err(PackageError::invalid_data(format!("unknown manifest scheme tag {other}"))),
    }
}

/// Encodes a `ManifestHeader` (SPEC_FULL §6 record 1): varint format version,
/// one scheme-tag byte, then the scheme's own opaque configuration bytes
/// length-prefixed. Written ahead of the manifest ciphertext so a reader can
/// pick the right `ManifestBinder` constructor before it has the manifest
/// working key.
pub fn write_manifest_header(header: &ManifestHeader) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, header.version as u64);
    out.push(manifest_scheme_tag(header.scheme));
    write_length_prefixed(&mut out, &header.scheme_config);
    out
}

pub fn read_manifest_header(input: &[u8], pos: &mut usize) -> Result<ManifestHeader> {
    let version = read_varint(input, pos)?;
    if version > u16::MAX as u64 {
        return Err(PackageError::invalid_data("manifest format version out of range"));
    }
    let tag = *input.get(*pos).ok_or(PackageError::EndOfStream)?;
    *pos += 1;
    let scheme = manifest_scheme_from_tag(tag)?;
    let scheme_config = read_length_prefixed(input, pos)?.to_vec();
    Ok(ManifestHeader { version: version as u16, scheme, scheme_config })
}

/// Streaming counterpart of `read_varint`, for callers (`PackageReader::from_stream`)
/// that own a generic `R: Read` rather than an in-memory slice.
pub fn read_varint_from<R: Read>(source: &mut R) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        source.read_exact(&mut byte)?;
        let byte = byte[0];
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(PackageError::invalid_data("varint too long"));
        }
    }
}

pub fn read_length_prefixed_from<R: Read>(source: &mut R) -> Result<Vec<u8>> {
    let len = read_varint_from(source)?;
    if len > MAX_FIELD_LEN {
        return Err(PackageError::invalid_data("length-prefixed field exceeds maximum"));
    }
    let mut buf = vec![0u8; len as usize];
    source.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_manifest_header_from<R: Read>(source: &mut R) -> Result<ManifestHeader> {
    let version = read_varint_from(source)?;
    if version > u16::MAX as u64 {
        return Err(PackageError::invalid_data("manifest format version out of range"));
    }
    let mut tag = [0u8; 1];
    source.read_exact(&mut tag)?;
    let scheme = manifest_scheme_from_tag(tag[0])?;
    let scheme_config = read_length_prefixed_from(source)?;
    Ok(ManifestHeader { version: version as u16, scheme, scheme_config })
}

/// The manifest's own internal fields only (SPEC_FULL §3.1) — `bincode` over
/// the `serde` derives on `Manifest`/`PayloadItem`, kept separate from the
/// hand-rolled header/framing format so `deserialise(serialise(m)) == m`
/// (SPEC_FULL §8) can rely on a derived `PartialEq` instead of a bespoke
/// field-by-field comparison.
pub fn serialize_manifest_body(manifest: &Manifest) -> Result<Vec<u8>> {
    bincode::serialize(manifest).map_err(|e| PackageError::invalid_data(format!("manifest encoding failed: {e}")))
}

pub fn deserialize_manifest_body(bytes: &[u8]) -> Result<Manifest> {
    bincode::deserialize(bytes).map_err(|e| PackageError::invalid_data(format!("manifest decoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn truncated_length_prefix_is_end_of_stream() {
        let buf = vec![0x80, 0x80];
        let mut pos = 0;
        assert!(matches!(read_varint(&buf, &mut pos), Err(PackageError::EndOfStream)));
    }

    #[test]
    fn oversized_length_prefix_is_invalid_data_not_a_panic() {
        let mut buf = Vec::new();
        write_varint(&mut buf, MAX_FIELD_LEN + 1);
        let mut pos = 0;
        assert!(matches!(read_length_prefixed(&buf, &mut pos), Err(PackageError::InvalidData(_))));
    }

    #[test]
    fn manifest_header_round_trips_through_the_hand_rolled_codec() {
        let header = ManifestHeader {
            version: crate::model::MANIFEST_FORMAT_VERSION,
            scheme: ManifestCryptoSchemeTag::Um1Hybrid,
            scheme_config: vec![1, 2, 3, 4, 5],
        };
        let encoded = write_manifest_header(&header);
        let mut pos = 0;
        let decoded = read_manifest_header(&encoded, &mut pos).unwrap();
        assert_eq!(pos, encoded.len());
        assert_eq!(decoded.version, header.version);
        assert_eq!(decoded.scheme, header.scheme);
        assert_eq!(decoded.scheme_config, header.scheme_config);

        let mut cursor = std::io::Cursor::new(encoded);
        let streamed = read_manifest_header_from(&mut cursor).unwrap();
        assert_eq!(streamed.scheme_config, header.scheme_config);
    }

    #[test]
    fn manifest_body_round_trips_structurally_equal() {
        use crate::model::{CsprngCipherName, CsprngConfiguration, LayoutScheme, PayloadLayoutConfiguration};

        let layout = PayloadLayoutConfiguration {
            scheme: LayoutScheme::Simple,
            csprng: CsprngConfiguration { cipher: CsprngCipherName::Salsa20, key: vec![1u8; 32], nonce: vec![2u8; 8] },
        };
        let manifest = Manifest::new(layout);
        let encoded = serialize_manifest_body(&manifest).unwrap();
        let decoded = deserialize_manifest_body(&encoded).unwrap();
        assert_eq!(decoded, manifest);
    }
}
