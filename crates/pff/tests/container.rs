//! End-to-end tests over synthesized in-memory containers.
//!
//! The builder below writes the 32-bit (and minimal 64-bit) on-disk layout
//! field for field, with its own independent CRC and signature
//! implementations, so a checksum bug in the reader cannot cancel out a
//! matching bug in the tests.

use std::io::Cursor;

use outlook_pff::{
    encode, ContentType, NdbCryptMethod, NdbVersion, Pff, PffError, PffOptions, PffReader,
    RecoveryFlags, UnallocatedBlockKind,
};

const AMAP_PAGE: usize = 0x4400;
const PMAP_PAGE: usize = 0x4600;
const NBT_PAGE: usize = 0x4800;
const BBT_PAGE: usize = 0x4A00;
const DATA_AREA: usize = 0x4C00;
const FREE_AREA: usize = 0x4E00;
const FILE_SIZE: usize = 0x5000;

const NBT_BP: u32 = 0xB4;
const BBT_BP: u32 = 0xB8;

/// Reference CRC-32 (reflected 0xEDB88320, zero seed, final complement),
/// independent of the implementation under test.
/// Route `tracing` diagnostics from the reader into the test output;
/// `RUST_LOG=warn` shows the corruption events the tolerant paths emit.
fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0_u32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

fn sig(offset: u32, back_pointer: u32) -> u16 {
    let value = offset ^ back_pointer;
    (value >> 16) as u16 ^ value as u16
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn block_span(stored_size: usize) -> usize {
    let size = stored_size + 12;
    let size = size.max(64);
    size.div_ceil(64) * 64
}

/// One 32-bit test container.
struct Container {
    crypt: u8,
    amap_valid: bool,
    /// `(nid, data, sub_node, parent)`
    nbt: Vec<(u32, u32, u32, u32)>,
    /// `(bid, file_offset, stored_size)`
    bbt: Vec<(u32, u32, u16)>,
    /// `(bid, file_offset, stored bytes)`
    blocks: Vec<(u32, usize, Vec<u8>)>,
    /// Raw pre-built pages copied verbatim.
    planted: Vec<(usize, [u8; 512])>,
    allocated_end: usize,
    file_size: usize,
}

impl Container {
    fn new() -> Self {
        Self {
            crypt: 0,
            amap_valid: true,
            nbt: Vec::new(),
            bbt: Vec::new(),
            blocks: Vec::new(),
            planted: Vec::new(),
            allocated_end: FREE_AREA,
            file_size: FILE_SIZE,
        }
    }

    fn build(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.file_size];

        let mut nbt = self.nbt.clone();
        nbt.sort_by_key(|entry| entry.0);
        let nbt_entries: Vec<[u8; 16]> = nbt
            .iter()
            .map(|(nid, data, sub, parent)| {
                let mut entry = [0_u8; 16];
                put_u32(&mut entry, 0, *nid);
                put_u32(&mut entry, 4, *data);
                put_u32(&mut entry, 8, *sub);
                put_u32(&mut entry, 12, *parent);
                entry
            })
            .collect();
        let nbt_entries: Vec<&[u8]> = nbt_entries.iter().map(|entry| entry.as_slice()).collect();
        write_ansi_leaf_page(&mut buf, NBT_PAGE, 0x81, NBT_BP, 16, 31, &nbt_entries);

        let mut bbt = self.bbt.clone();
        bbt.sort_by_key(|entry| entry.0 & !1);
        let bbt_entries: Vec<[u8; 12]> = bbt
            .iter()
            .map(|(bid, ib, cb)| {
                let mut entry = [0_u8; 12];
                put_u32(&mut entry, 0, *bid);
                put_u32(&mut entry, 4, *ib);
                put_u16(&mut entry, 8, *cb);
                put_u16(&mut entry, 10, 1);
                entry
            })
            .collect();
        let bbt_entries: Vec<&[u8]> = bbt_entries.iter().map(|entry| entry.as_slice()).collect();
        write_ansi_leaf_page(&mut buf, BBT_PAGE, 0x80, BBT_BP, 12, 41, &bbt_entries);

        for (bid, offset, stored) in &self.blocks {
            write_ansi_block(&mut buf, *offset, *bid, stored);
        }

        for (offset, page) in &self.planted {
            buf[*offset..*offset + 512].copy_from_slice(page);
        }

        self.write_amap(&mut buf);
        self.write_pmap(&mut buf);
        self.write_header(&mut buf);
        buf
    }

    fn write_amap(&self, buf: &mut [u8]) {
        let mut page = [0_u8; 512];
        // dwPadding at [0..4], then 496 bytes of bits.
        let mut offset = AMAP_PAGE;
        while offset < self.allocated_end {
            let bit = (offset - AMAP_PAGE) / 64;
            page[4 + bit / 8] |= 0x80 >> (bit % 8);
            offset += 64;
        }
        finish_ansi_page(&mut page, 0x84, AMAP_PAGE as u32, AMAP_PAGE);
        buf[AMAP_PAGE..AMAP_PAGE + 512].copy_from_slice(&page);
    }

    fn write_pmap(&self, buf: &mut [u8]) {
        let mut page = [0_u8; 512];
        for bit in page.iter_mut().take(500).skip(4) {
            *bit = 0xFF;
        }
        finish_ansi_page(&mut page, 0x83, PMAP_PAGE as u32, PMAP_PAGE);
        buf[PMAP_PAGE..PMAP_PAGE + 512].copy_from_slice(&page);
    }

    fn write_header(&self, buf: &mut [u8]) {
        let mut crc_data = [0_u8; 504];
        crc_data[0..2].copy_from_slice(b"SM");
        put_u16(&mut crc_data, 2, 15); // wVer
        put_u16(&mut crc_data, 4, 19); // wVerClient
        crc_data[6] = 1;
        crc_data[7] = 1;

        // root
        let root = 156;
        put_u32(&mut crc_data, root + 4, self.file_size as u32);
        put_u32(&mut crc_data, root + 8, AMAP_PAGE as u32);
        put_u32(&mut crc_data, root + 20, NBT_BP);
        put_u32(&mut crc_data, root + 24, NBT_PAGE as u32);
        put_u32(&mut crc_data, root + 28, BBT_BP);
        put_u32(&mut crc_data, root + 32, BBT_PAGE as u32);
        crc_data[root + 36] = if self.amap_valid { 0x02 } else { 0x00 };

        crc_data[452] = 0x80; // bSentinel
        crc_data[453] = self.crypt;

        buf[0..4].copy_from_slice(b"!BDN");
        put_u32(buf, 4, crc32(&crc_data[..471]));
        buf[8..512].copy_from_slice(&crc_data);
    }

    fn open(&self) -> Result<Pff, PffError> {
        open_bytes(self.build())
    }
}

fn open_bytes(bytes: Vec<u8>) -> Result<Pff, PffError> {
    let reader: Box<dyn PffReader> = Box::new(Cursor::new(bytes));
    Pff::read_from(reader, PffOptions::default())
}

fn finish_ansi_page(page: &mut [u8; 512], page_type: u8, back_pointer: u32, offset: usize) {
    page[500] = page_type;
    page[501] = page_type;
    put_u16(page, 502, sig(offset as u32, back_pointer));
    put_u32(page, 504, back_pointer);
    let crc = crc32(&page[..500]);
    put_u32(page, 508, crc);
}

fn write_ansi_leaf_page(
    buf: &mut [u8],
    offset: usize,
    page_type: u8,
    back_pointer: u32,
    entry_size: u8,
    max_entries: u8,
    entries: &[&[u8]],
) {
    let page = build_ansi_page(
        offset,
        page_type,
        back_pointer,
        entry_size,
        max_entries,
        0,
        entries,
    );
    buf[offset..offset + 512].copy_from_slice(&page);
}

fn build_ansi_page(
    offset: usize,
    page_type: u8,
    back_pointer: u32,
    entry_size: u8,
    max_entries: u8,
    level: u8,
    entries: &[&[u8]],
) -> [u8; 512] {
    let mut page = [0_u8; 512];
    for (index, entry) in entries.iter().enumerate() {
        let at = index * usize::from(entry_size);
        page[at..at + entry.len()].copy_from_slice(entry);
    }
    page[496] = entries.len() as u8;
    page[497] = max_entries;
    page[498] = entry_size;
    page[499] = level;
    finish_ansi_page(&mut page, page_type, back_pointer, offset);
    page
}

fn write_ansi_block(buf: &mut [u8], offset: usize, bid: u32, stored: &[u8]) {
    let span = block_span(stored.len());
    buf[offset..offset + stored.len()].copy_from_slice(stored);
    let trailer = offset + span - 12;
    put_u16(buf, trailer, stored.len() as u16);
    put_u16(buf, trailer + 2, sig(offset as u32, bid));
    put_u32(buf, trailer + 4, bid);
    put_u32(buf, trailer + 8, crc32(stored));
}

/// An array descriptor payload: `level` with `total` declared bytes over
/// the given child identifiers.
fn array_payload(level: u8, total: u32, entries: &[u32]) -> Vec<u8> {
    let mut data = vec![0_u8; 8 + entries.len() * 4];
    data[0] = 0x01;
    data[1] = level;
    put_u16(&mut data, 2, entries.len() as u16);
    put_u32(&mut data, 4, total);
    for (index, entry) in entries.iter().enumerate() {
        put_u32(&mut data, 8 + index * 4, *entry);
    }
    data
}

fn table_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0_u8; len];
    data[0] = 0x0C;
    data[1] = 0x00;
    data[2] = 0xEC;
    data[3] = 0x6C;
    data
}

#[test]
fn test_minimal_container_root_folder() -> anyhow::Result<()> {
    init_logging();
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let pff = container.open()?;

    assert_eq!(pff.version(), NdbVersion::Ansi);
    assert_eq!(pff.content_type(), ContentType::PersonalStore);
    assert_eq!(pff.crypt_method(), NdbCryptMethod::None);
    assert_eq!(pff.size() as usize, FILE_SIZE);

    let root_folder = pff.root_folder().expect("root folder subtree");
    assert_eq!(root_folder.identifier(), 0x122);
    assert_eq!(root_folder.identifier() & 0x1F, 0x02);
    assert_eq!(u32::from(root_folder.parent()), 0x122);

    assert!(pff.children(&root_folder)?.is_empty());
    let top_level = pff.children(&pff.root_item())?;
    assert_eq!(top_level.len(), 1);
    assert_eq!(top_level[0].identifier(), 0x122);

    assert_eq!(pff.number_of_orphans(), 0);
    assert!(!pff.is_corrupted());
    Ok(())
}

#[test]
fn test_data_stream_returns_plaintext_unchanged() {
    let payload = table_payload(64);
    let mut container = Container::new();
    container.nbt.push((0x122, 0x68, 0, 0x122));
    container.bbt.push((0x68, DATA_AREA as u32, 64));
    container.blocks.push((0x68, DATA_AREA, payload.clone()));
    let pff = container.open().unwrap();

    pff.set_codepage(1252).unwrap();
    assert_eq!(pff.codepage(), 1252);

    let root_folder = pff.root_folder().unwrap();
    let stream = pff.data_stream(&root_folder).unwrap();
    assert_eq!(stream.total_size(), 64);

    let mut head = [0_u8; 4];
    assert_eq!(stream.read(0, &mut head).unwrap(), 4);
    assert_eq!(head, [0x0C, 0x00, 0xEC, 0x6C]);

    // Reads are idempotent.
    let mut again = [0_u8; 4];
    assert_eq!(stream.read(0, &mut again).unwrap(), 4);
    assert_eq!(head, again);
    assert_eq!(stream.read_to_end().unwrap(), payload);

    assert!(!pff.forced_decryption());
    assert!(!pff.is_corrupted());
}

#[test]
fn test_misdeclared_encryption_triggers_sticky_heuristic() {
    init_logging();
    let plaintext = table_payload(64);
    let mut stored = plaintext.clone();
    // The compressible codec is self-inverse, so decoding the plaintext
    // produces the stored form a non-compliant writer would have left.
    encode::decrypt(NdbCryptMethod::Compressible, 0x68, &mut stored).unwrap();
    assert_ne!(stored, plaintext);

    let mut container = Container::new();
    container.crypt = 0x00; // declared None
    container.nbt.push((0x122, 0x68, 0, 0x122));
    container.bbt.push((0x68, DATA_AREA as u32, 64));
    container.blocks.push((0x68, DATA_AREA, stored));
    let pff = container.open().unwrap();

    let root_folder = pff.root_folder().unwrap();
    let stream = pff.data_stream(&root_folder).unwrap();
    let mut head = [0_u8; 4];
    assert_eq!(stream.read(0, &mut head).unwrap(), 4);

    assert_eq!(head[2], 0xEC);
    assert!([0x6C, 0x7C, 0x8C, 0x9C, 0xA5, 0xAC, 0xBC, 0xCC].contains(&head[3]));
    assert_eq!(stream.read_to_end().unwrap(), plaintext);

    assert!(pff.forced_decryption());
    assert!(pff.is_corrupted());
}

#[test]
fn test_declared_compressible_encryption_round_trips() {
    let plaintext = table_payload(64);
    let mut stored = plaintext.clone();
    encode::decrypt(NdbCryptMethod::Compressible, 0x68, &mut stored).unwrap();

    let mut container = Container::new();
    container.crypt = 0x01;
    container.nbt.push((0x122, 0x68, 0, 0x122));
    container.bbt.push((0x68, DATA_AREA as u32, 64));
    container.blocks.push((0x68, DATA_AREA, stored));
    let pff = container.open().unwrap();

    assert_eq!(pff.crypt_method(), NdbCryptMethod::Compressible);
    let stream = pff.data_stream(&pff.root_folder().unwrap()).unwrap();
    assert_eq!(stream.read_to_end().unwrap(), plaintext);
    assert!(!pff.forced_decryption());
}

#[test]
fn test_two_level_array_size_mismatch_returns_no_data() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0x69, 0, 0x122));

    // Outer array declares 3000 bytes over two level-1 children; the first
    // child declares 1500 but its leaf blocks only total 1400.
    let outer = array_payload(2, 3000, &[0x6B, 0x6D]);
    let child_one = array_payload(1, 1500, &[0x70, 0x72]);
    let child_two = array_payload(1, 1500, &[0x74, 0x76]);

    container.bbt.push((0x69, DATA_AREA as u32, outer.len() as u16));
    container
        .bbt
        .push((0x6B, (DATA_AREA + 64) as u32, child_one.len() as u16));
    container
        .bbt
        .push((0x6D, (DATA_AREA + 128) as u32, child_two.len() as u16));
    container.bbt.push((0x70, 0x4D00, 700));
    container.bbt.push((0x72, 0x4D00, 700));
    container.bbt.push((0x74, 0x4D00, 750));
    container.bbt.push((0x76, 0x4D00, 750));

    container.blocks.push((0x69, DATA_AREA, outer));
    container.blocks.push((0x6B, DATA_AREA + 64, child_one));
    container.blocks.push((0x6D, DATA_AREA + 128, child_two));

    let pff = container.open().unwrap();
    let root_folder = pff.root_folder().unwrap();
    let err = pff.data_stream(&root_folder).unwrap_err();
    assert!(matches!(err, PffError::Corrupted(..)));
}

#[test]
fn test_multi_block_payload_concatenates_in_order() {
    let mut first = vec![0_u8; 64];
    let mut second = vec![0_u8; 32];
    first[0] = 0x0C;
    first[2] = 0xEC;
    first[3] = 0x6C;
    for (index, byte) in second.iter_mut().enumerate() {
        *byte = index as u8;
    }

    let mut container = Container::new();
    container.nbt.push((0x122, 0x69, 0, 0x122));
    let array = array_payload(1, 96, &[0x70, 0x72]);
    container.bbt.push((0x69, DATA_AREA as u32, array.len() as u16));
    container.bbt.push((0x70, (DATA_AREA + 64) as u32, 64));
    container.bbt.push((0x72, (DATA_AREA + 192) as u32, 32));
    container.blocks.push((0x69, DATA_AREA, array));
    container.blocks.push((0x70, DATA_AREA + 64, first.clone()));
    container.blocks.push((0x72, DATA_AREA + 192, second.clone()));

    let pff = container.open().unwrap();
    let stream = pff.data_stream(&pff.root_folder().unwrap()).unwrap();
    assert_eq!(stream.total_size(), 96);

    let mut all = first;
    all.extend_from_slice(&second);
    assert_eq!(stream.read_to_end().unwrap(), all);

    // A read spanning the block boundary.
    let mut window = [0_u8; 8];
    assert_eq!(stream.read(60, &mut window).unwrap(), 8);
    assert_eq!(&window[..4], &all[60..64]);
    assert_eq!(&window[4..], &all[64..68]);
}

#[test]
fn test_local_descriptor_stream() {
    let payload = b"attachment payload, raw bytes...".to_vec();

    // A one-leaf sub-node tree mapping 0x8025 to a data block.
    let mut tree = vec![0_u8; 16];
    tree[0] = 0x02; // sub-node block signature
    tree[1] = 0x00; // leaf
    put_u16(&mut tree, 2, 1);
    put_u32(&mut tree, 4, 0x8025);
    put_u32(&mut tree, 8, 0x7E);
    put_u32(&mut tree, 12, 0);

    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0x7B, 0x122));
    container.bbt.push((0x7B, DATA_AREA as u32, tree.len() as u16));
    container
        .bbt
        .push((0x7E, (DATA_AREA + 64) as u32, payload.len() as u16));
    container.blocks.push((0x7B, DATA_AREA, tree));
    container
        .blocks
        .push((0x7E, DATA_AREA + 64, payload.clone()));
    let pff = container.open().unwrap();

    let root_folder = pff.root_folder().unwrap();
    let stream = pff
        .local_descriptor_stream(&root_folder, 0x8025)
        .unwrap()
        .expect("local descriptor");
    assert_eq!(stream.total_size(), payload.len() as u64);
    assert_eq!(stream.read_to_end().unwrap(), payload);

    // A clean miss in the sub-node tree is not an error.
    assert!(pff
        .local_descriptor_stream(&root_folder, 0x9999)
        .unwrap()
        .is_none());
    assert!(!pff.forced_decryption());
    assert!(!pff.is_corrupted());
}

#[test]
fn test_missing_parent_goes_to_orphan_list_once() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    container.nbt.push((0x2062, 0, 0, 0x9999));
    let pff = container.open().unwrap();

    assert_eq!(pff.number_of_orphans(), 1);
    let orphan = pff.orphan(0).expect("orphan item");
    assert_eq!(orphan.identifier(), 0x2062);
    assert!(pff.orphan(1).is_none());
    // Orphans are recoverable damage.
    assert!(pff.is_corrupted());
}

#[test]
fn test_out_of_order_parent_is_linked_after_one_lookup() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    // The child sorts before its parent, so the parent is resolved through
    // a direct index lookup during the walk.
    container.nbt.push((0x1022, 0, 0, 0x2042));
    container.nbt.push((0x2042, 0, 0, 0x122));
    let pff = container.open().unwrap();

    assert_eq!(pff.number_of_orphans(), 0);
    let parent = pff.item_by_identifier(0x2042).unwrap();
    let children = pff.children(&parent).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].identifier(), 0x1022);
    assert!(!pff.is_corrupted());
}

#[test]
fn test_recovery_finds_unlinked_descriptor() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));

    // A dead descriptors-index leaf page in unallocated space.
    let mut entry = [0_u8; 16];
    put_u32(&mut entry, 0, 0x8082);
    put_u32(&mut entry, 12, 0x122);
    let planted = build_ansi_page(FREE_AREA, 0x81, 0x1234, 16, 31, 0, &[&entry]);
    container.planted.push((FREE_AREA, planted));

    let pff = container.open().unwrap();
    let before: Vec<u32> = pff
        .children(&pff.root_item())
        .unwrap()
        .iter()
        .map(|item| item.identifier())
        .collect();
    assert_eq!(pff.number_of_recovered_items(), 0);

    let recovered = pff.recover_items(RecoveryFlags::default()).unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(pff.number_of_recovered_items(), 1);

    let item = pff.recovered_item(0).expect("recovered item");
    assert_eq!(item.identifier(), 0x8082);
    assert!(item.is_recovered());
    assert!(pff.recovered_item(1).is_none());

    // The main tree is untouched.
    let after: Vec<u32> = pff
        .children(&pff.root_item())
        .unwrap()
        .iter()
        .map(|item| item.identifier())
        .collect();
    assert_eq!(before, after);
    assert_eq!(pff.number_of_orphans(), 0);
    assert!(pff.ambiguous_recovered_offsets().is_empty());
}

#[test]
fn test_recovery_skips_live_descriptors() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));

    // A stale copy of the live root folder leaf must not be recovered.
    let mut entry = [0_u8; 16];
    put_u32(&mut entry, 0, 0x122);
    put_u32(&mut entry, 12, 0x122);
    let planted = build_ansi_page(FREE_AREA, 0x81, 0x1234, 16, 31, 0, &[&entry]);
    container.planted.push((FREE_AREA, planted));

    let pff = container.open().unwrap();
    assert_eq!(pff.recover_items(RecoveryFlags::default()).unwrap(), 0);
}

#[test]
fn test_unallocated_ranges() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let pff = container.open().unwrap();

    assert_eq!(
        pff.number_of_unallocated_blocks(UnallocatedBlockKind::Data)
            .unwrap(),
        1
    );
    assert_eq!(
        pff.unallocated_block(UnallocatedBlockKind::Data, 0).unwrap(),
        Some((FREE_AREA as u64, (FILE_SIZE - FREE_AREA) as u64))
    );
    assert_eq!(
        pff.number_of_unallocated_blocks(UnallocatedBlockKind::Page)
            .unwrap(),
        0
    );
}

#[test]
fn test_file_smaller_than_header_is_corrupted() {
    let container = Container::new();
    let bytes = container.build()[..100].to_vec();
    let err = open_bytes(bytes).unwrap_err();
    assert!(matches!(err, PffError::Corrupted(..)));

    let err = open_bytes(b"!BDN".to_vec()).unwrap_err();
    assert!(matches!(err, PffError::Corrupted(..)));
}

#[test]
fn test_bad_magic_is_not_a_container() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let mut bytes = container.build();
    bytes[0] = b'X';
    let err = open_bytes(bytes).unwrap_err();
    assert!(matches!(err, PffError::Corrupted(..)));
}

#[test]
fn test_unknown_version_is_unsupported() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let mut bytes = container.build();
    // wVer at offset 0x0A.
    bytes[0x0A] = 99;
    let err = open_bytes(bytes).unwrap_err();
    assert!(matches!(err, PffError::Unsupported(..)));
}

#[test]
fn test_entry_count_above_maximum_is_corrupted() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let mut bytes = container.build();
    // Forge cEnt above cEntMax on the descriptors index page.
    bytes[NBT_PAGE + 496] = 40;
    let err = open_bytes(bytes).unwrap_err();
    assert!(matches!(err, PffError::Corrupted(..)));
}

#[test]
fn test_zero_data_size_is_an_empty_stream() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0x68, 0, 0x122));
    container.bbt.push((0x68, DATA_AREA as u32, 0));
    let pff = container.open().unwrap();

    let stream = pff.data_stream(&pff.root_folder().unwrap()).unwrap();
    assert_eq!(stream.total_size(), 0);
    let mut buf = [0_u8; 16];
    assert_eq!(stream.read(0, &mut buf).unwrap(), 0);
    assert!(stream.read_to_end().unwrap().is_empty());
}

#[test]
fn test_index_cycle_hits_depth_limit() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let mut bytes = container.build();

    // Replace the descriptors index root with a branch page whose only
    // child is itself.
    let mut entry = [0_u8; 12];
    put_u32(&mut entry, 0, 0);
    put_u32(&mut entry, 4, NBT_BP);
    put_u32(&mut entry, 8, NBT_PAGE as u32);
    let cycle = build_ansi_page(NBT_PAGE, 0x81, NBT_BP, 12, 41, 1, &[&entry]);
    bytes[NBT_PAGE..NBT_PAGE + 512].copy_from_slice(&cycle);

    let err = open_bytes(bytes).unwrap_err();
    assert!(matches!(err, PffError::Corrupted(..)));
}

#[test]
fn test_data_array_cycle_hits_depth_limit() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0x69, 0, 0x122));
    // A level-2 array whose only child is itself.
    let array = array_payload(2, 3000, &[0x69]);
    container.bbt.push((0x69, DATA_AREA as u32, array.len() as u16));
    container.blocks.push((0x69, DATA_AREA, array));
    let pff = container.open().unwrap();

    let err = pff.data_stream(&pff.root_folder().unwrap()).unwrap_err();
    assert!(matches!(err, PffError::Corrupted(..)));
}

#[test]
fn test_abort_cancels_and_clears() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0x68, 0, 0x122));
    container.bbt.push((0x68, DATA_AREA as u32, 64));
    container
        .blocks
        .push((0x68, DATA_AREA, table_payload(64)));
    let pff = container.open().unwrap();

    let stream = pff.data_stream(&pff.root_folder().unwrap()).unwrap();
    let mut buf = [0_u8; 4];

    pff.signal_abort();
    assert!(matches!(
        stream.read(0, &mut buf),
        Err(PffError::Cancelled)
    ));

    // The flag clears on observation; the next call starts fresh.
    assert_eq!(stream.read(0, &mut buf).unwrap(), 4);

    let handle = pff.abort_handle();
    handle.signal();
    assert!(matches!(
        pff.recover_items(RecoveryFlags::default()),
        Err(PffError::Cancelled)
    ));
    assert!(pff.recover_items(RecoveryFlags::default()).is_ok());
}

#[test]
fn test_codepage_validation() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let pff = container.open().unwrap();

    pff.set_codepage(932).unwrap();
    assert_eq!(pff.codepage(), 932);
    assert!(matches!(
        pff.set_codepage(65001),
        Err(PffError::Argument(..))
    ));
    assert_eq!(pff.codepage(), 932);
}

#[test]
fn test_item_lookup_miss_is_not_an_error() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let pff = container.open().unwrap();

    assert!(pff.item_by_identifier(0x4242).is_none());
    assert!(pff.data_stream_by_identifier(0x4242).unwrap().is_none());
}

#[test]
fn test_close_is_idempotent() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0, 0, 0x122));
    let pff = container.open().unwrap();

    pff.close();
    pff.close();
    let root_folder = pff.root_folder().unwrap();
    assert!(matches!(
        pff.data_stream(&root_folder),
        Err(PffError::Argument(..))
    ));
}

#[test]
fn test_read_range_recording() {
    let mut container = Container::new();
    container.nbt.push((0x122, 0x68, 0, 0x122));
    container.bbt.push((0x68, DATA_AREA as u32, 64));
    container
        .blocks
        .push((0x68, DATA_AREA, table_payload(64)));
    let pff = container.open().unwrap();

    pff.record_read_ranges(true);
    let stream = pff.data_stream(&pff.root_folder().unwrap()).unwrap();
    let mut buf = [0_u8; 4];
    stream.read(0, &mut buf).unwrap();
    let ranges = pff.read_ranges();
    assert!(ranges.iter().any(|(offset, _)| *offset == DATA_AREA as u64));
    pff.record_read_ranges(false);
    assert!(pff.read_ranges().is_empty());
}

mod unicode {
    use super::*;

    const NBT_PAGE: usize = 0x4800;
    const BBT_PAGE: usize = 0x4A00;
    const FILE_SIZE: usize = 0x5000;
    const NBT_BP: u64 = 0xB4;
    const BBT_BP: u64 = 0xB8;

    fn finish_unicode_page(page: &mut [u8; 512], page_type: u8, back_pointer: u64, offset: usize) {
        page[496] = page_type;
        page[497] = page_type;
        put_u16(page, 498, sig(offset as u32, back_pointer as u32));
        let crc = crc32(&page[..496]);
        put_u32(page, 500, crc);
        put_u64(page, 504, back_pointer);
    }

    fn build_header(buf: &mut [u8], version: u16, file_size: usize) {
        let mut crc_data = [0_u8; 516];
        crc_data[0..2].copy_from_slice(b"SM");
        put_u16(&mut crc_data, 2, version);
        put_u16(&mut crc_data, 4, 19);
        crc_data[6] = 1;
        crc_data[7] = 1;

        let root = 172;
        put_u64(&mut crc_data, root + 4, file_size as u64);
        put_u64(&mut crc_data, root + 12, 0x4400);
        put_u64(&mut crc_data, root + 36, NBT_BP);
        put_u64(&mut crc_data, root + 44, NBT_PAGE as u64);
        put_u64(&mut crc_data, root + 52, BBT_BP);
        put_u64(&mut crc_data, root + 60, BBT_PAGE as u64);
        crc_data[root + 68] = 0x02;

        crc_data[504] = 0x80;
        crc_data[505] = 0x00;

        buf[0..4].copy_from_slice(b"!BDN");
        put_u32(buf, 4, crc32(&crc_data[..471]));
        buf[8..524].copy_from_slice(&crc_data);
        put_u32(buf, 524, crc32(&crc_data));
    }

    #[test]
    fn test_minimal_unicode_container() {
        let mut buf = vec![0_u8; FILE_SIZE];

        // Descriptors index: one leaf with the self-parented root folder.
        let mut page = [0_u8; 512];
        put_u64(&mut page, 0, 0x122);
        put_u64(&mut page, 8, 0);
        put_u64(&mut page, 16, 0);
        put_u32(&mut page, 24, 0x122);
        page[488] = 1; // cEnt
        page[489] = 15; // cEntMax
        page[490] = 32; // cbEnt
        page[491] = 0; // cLevel
        finish_unicode_page(&mut page, 0x81, NBT_BP, NBT_PAGE);
        buf[NBT_PAGE..NBT_PAGE + 512].copy_from_slice(&page);

        // Offsets index: an empty leaf.
        let mut page = [0_u8; 512];
        page[489] = 20;
        page[490] = 24;
        finish_unicode_page(&mut page, 0x80, BBT_BP, BBT_PAGE);
        buf[BBT_PAGE..BBT_PAGE + 512].copy_from_slice(&page);

        build_header(&mut buf, 23, FILE_SIZE);

        let pff = open_bytes(buf).unwrap();
        assert_eq!(pff.version(), NdbVersion::Unicode);
        let root_folder = pff.root_folder().expect("root folder subtree");
        assert_eq!(root_folder.identifier(), 0x122);
        assert!(!pff.is_corrupted());
    }

    #[test]
    fn test_minimal_unicode_4k_container() {
        const PAGE_SIZE: usize = 4096;
        const NBT_PAGE_4K: usize = 0x5000;
        const BBT_PAGE_4K: usize = 0x6000;
        const FILE_SIZE_4K: usize = 0x8000;

        fn finish_4k_page(page: &mut [u8; PAGE_SIZE], page_type: u8, back_pointer: u64, offset: usize) {
            page[4080] = page_type;
            page[4081] = page_type;
            put_u16(page, 4082, sig(offset as u32, back_pointer as u32));
            let crc = crc32(&page[..4080]);
            put_u32(page, 4084, crc);
            put_u64(page, 4088, back_pointer);
        }

        let mut buf = vec![0_u8; FILE_SIZE_4K];

        let mut page = [0_u8; PAGE_SIZE];
        put_u64(&mut page, 0, 0x122);
        put_u32(&mut page, 24, 0x122);
        page[4056] = 1;
        page[4057] = 126;
        page[4058] = 32;
        page[4059] = 0;
        finish_4k_page(&mut page, 0x81, 0xB4, NBT_PAGE_4K);
        buf[NBT_PAGE_4K..NBT_PAGE_4K + PAGE_SIZE].copy_from_slice(&page);

        let mut page = [0_u8; PAGE_SIZE];
        page[4057] = 126;
        page[4058] = 24;
        finish_4k_page(&mut page, 0x80, 0xB8, BBT_PAGE_4K);
        buf[BBT_PAGE_4K..BBT_PAGE_4K + PAGE_SIZE].copy_from_slice(&page);

        // The 4K header shares the 64-bit layout.
        let mut crc_data = [0_u8; 516];
        crc_data[0..2].copy_from_slice(b"SM");
        put_u16(&mut crc_data, 2, 36);
        put_u16(&mut crc_data, 4, 19);
        crc_data[6] = 1;
        crc_data[7] = 1;
        let root = 172;
        put_u64(&mut crc_data, root + 4, FILE_SIZE_4K as u64);
        put_u64(&mut crc_data, root + 12, 0x4400);
        put_u64(&mut crc_data, root + 36, 0xB4);
        put_u64(&mut crc_data, root + 44, NBT_PAGE_4K as u64);
        put_u64(&mut crc_data, root + 52, 0xB8);
        put_u64(&mut crc_data, root + 60, BBT_PAGE_4K as u64);
        crc_data[root + 68] = 0x02;
        crc_data[504] = 0x80;
        crc_data[505] = 0x00;
        buf[0..4].copy_from_slice(b"!BDN");
        put_u32(&mut buf, 4, crc32(&crc_data[..471]));
        buf[8..524].copy_from_slice(&crc_data);
        put_u32(&mut buf, 524, crc32(&crc_data));

        let pff = open_bytes(buf).unwrap();
        assert_eq!(pff.version(), NdbVersion::Unicode4k);
        let root_folder = pff.root_folder().expect("root folder subtree");
        assert_eq!(root_folder.identifier(), 0x122);
        assert!(!pff.is_corrupted());
    }
}
