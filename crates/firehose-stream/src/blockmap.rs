use std::collections::HashMap;

/// A minimal reader for the content-addressed archive embedded in a
/// commit's `blocks` field: a CARv1-shaped sequence of
/// `varint(len) || cid || block bytes` entries, the first of which is a
/// header we don't need. No general multiformats/CAR crate is in this
/// project's dependency set, so only the subset this firehose actually
/// emits is supported: CIDv1, dag-cbor (codec `0x71`), sha2-256 multihash
/// (code `0x12`, 32-byte digest).
pub struct BlockMap {
    blocks: HashMap<Vec<u8>, Vec<u8>>,
}

impl BlockMap {
    pub fn parse(bytes: &[u8]) -> Self {
        let mut blocks = HashMap::new();
        let mut pos = 0;
        let Some((header_len, consumed)) = read_varint(&bytes[pos..]) else {
            return Self { blocks };
        };
        pos += consumed + header_len as usize;

        while pos < bytes.len() {
            let Some((entry_len, consumed)) = read_varint(&bytes[pos..]) else {
                break;
            };
            pos += consumed;
            let entry_end = pos + entry_len as usize;
            if entry_end > bytes.len() {
                break;
            }
            let entry = &bytes[pos..entry_end];
            if let Some((cid, block)) = split_cid(entry) {
                blocks.insert(cid, block.to_vec());
            }
            pos = entry_end;
        }

        Self { blocks }
    }

    pub fn get(&self, cid: &[u8]) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Splits a CARv1 block entry into its leading CID and trailing block
/// bytes. CIDv1 is `varint(version=1) || varint(codec) || multihash`,
/// where multihash is `varint(hash fn) || varint(digest len) || digest`.
fn split_cid(entry: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let mut pos = 0;
    let (version, n) = read_varint(&entry[pos..])?;
    if version != 1 {
        return None;
    }
    pos += n;
    let (_codec, n) = read_varint(&entry[pos..])?;
    pos += n;
    let (_hash_fn, n) = read_varint(&entry[pos..])?;
    pos += n;
    let (digest_len, n) = read_varint(&entry[pos..])?;
    pos += n;
    let digest_len = digest_len as usize;
    if pos + digest_len > entry.len() {
        return None;
    }
    let cid_end = pos + digest_len;
    Some((entry[..cid_end].to_vec(), &entry[cid_end..]))
}

/// Unsigned LEB128, as used throughout multiformats. Returns `(value,
/// bytes consumed)`.
fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(mut v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if v == 0 {
                break;
            }
        }
        out
    }

    fn fake_cid(digest: &[u8]) -> Vec<u8> {
        let mut out = varint(1); // version
        out.extend(varint(0x71)); // dag-cbor
        out.extend(varint(0x12)); // sha2-256
        out.extend(varint(digest.len() as u64));
        out.extend_from_slice(digest);
        out
    }

    #[test]
    fn parses_single_block() {
        let header = varint(1);
        let header_entry = [varint(header.len() as u64), header].concat();

        let cid = fake_cid(&[1u8; 32]);
        let block_data = b"hello".to_vec();
        let mut entry = cid.clone();
        entry.extend_from_slice(&block_data);
        let block_entry = [varint(entry.len() as u64), entry].concat();

        let bytes = [header_entry, block_entry].concat();
        let map = BlockMap::parse(&bytes);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&cid), Some(block_data.as_slice()));
    }
}
