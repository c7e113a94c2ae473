//! Read-only FAT12 driver.
//!
//! Mounts by sanity-checking the boot parameter block, caching the
//! whole FAT, and synthesizing a sector list per inode: the root
//! directory's region directly, every other file or directory by
//! walking its cluster chain through the cached FAT. No write support;
//! none of the invariants below assume one.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::blockdev::{self, BlockHandle, BLOCK_SIZE};
use super::{DirEntry, Inode, InodeKind, Superblock};
use crate::error::{KernelError, KernelResult};

const ATTR_RO: u8 = 0x01;
const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLID: u8 = 0x08;
const ATTR_DIR: u8 = 0x10;
const ATTR_LFN: u8 = ATTR_RO | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLID;

const DIR_ENTRY_SIZE: usize = 32;
const END_OF_CHAIN: u32 = 0xFF7;

#[derive(Clone, Copy)]
struct Bpb {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    n_fats: u8,
    root_entries: u16,
    sectors_per_fat: u16,
    signature: u8,
}

fn parse_bpb(sector: &[u8; BLOCK_SIZE]) -> Bpb {
    Bpb {
        bytes_per_sector: u16::from_le_bytes([sector[11], sector[12]]),
        sectors_per_cluster: sector[13],
        reserved_sectors: u16::from_le_bytes([sector[14], sector[15]]),
        n_fats: sector[16],
        root_entries: u16::from_le_bytes([sector[17], sector[18]]),
        sectors_per_fat: u16::from_le_bytes([sector[22], sector[23]]),
        signature: sector[38],
    }
}

/// No real magic number exists for FAT12; these three checks are the
/// original driver's best-effort guess.
fn check_fat_magically(bpb: &Bpb) -> bool {
    bpb.n_fats <= 10 && bpb.bytes_per_sector == 512 && matches!(bpb.signature, 0x28 | 0x29)
}

struct FatState {
    handle: BlockHandle,
    bpb: Bpb,
    fat_cache: Vec<u8>,
    data_start: u32,
    media_changed: bool,
}

fn check_media_changed(state: &Mutex<FatState>) -> KernelResult<()> {
    let mut s = state.lock();
    if s.media_changed {
        return Err(KernelError::Inconsistent);
    }
    if blockdev::media_changed(s.handle) {
        println!("[FAT] media changed");
        s.media_changed = true;
        return Err(KernelError::Inconsistent);
    }
    Ok(())
}

fn cluster_start_sector(state: &FatState, cluster: u32) -> u32 {
    state.data_start + (cluster - 2) * state.bpb.sectors_per_cluster as u32
}

/// Isolates the 12-bit entry for `cluster` from the cached FAT. `None`
/// means the cluster number fell outside the cache entirely.
fn read_fat_entry(state: &FatState, cluster: u32) -> Option<u32> {
    if cluster >= state.bpb.sectors_per_fat as u32 * BLOCK_SIZE as u32 {
        return None;
    }
    decode_fat12_entry(&state.fat_cache, cluster)
}

/// Unpacks cluster `cluster`'s 12-bit entry from a raw FAT byte cache: two
/// clusters share every three bytes, the even one in the low nibble pair
/// and the odd one in the high.
fn decode_fat12_entry(fat_cache: &[u8], cluster: u32) -> Option<u32> {
    let fat_offset = (cluster + cluster / 2) as usize;
    if fat_offset + 1 >= fat_cache.len() {
        return None;
    }
    let raw = u16::from_le_bytes([fat_cache[fat_offset], fat_cache[fat_offset + 1]]);
    let entry = if cluster % 2 == 0 { raw & 0xFFF } else { raw >> 4 };
    Some(entry as u32)
}

/// Walks the cluster chain from `start_cluster`, expanding each visited
/// cluster into its `sectors_per_cluster` sectors.
fn follow_sector_chain(state: &FatState, start_cluster: u32) -> Vec<u32> {
    let mut sectors = Vec::new();
    let mut cluster = start_cluster;
    loop {
        let start_sector = cluster_start_sector(state, cluster);
        for i in 0..state.bpb.sectors_per_cluster as u32 {
            sectors.push(start_sector + i);
        }
        match read_fat_entry(state, cluster) {
            Some(next) => cluster = next,
            None => break,
        }
        if cluster >= END_OF_CHAIN || cluster == 0 {
            break;
        }
    }
    sectors
}

fn nblocks(size: u32) -> usize {
    size.div_ceil(BLOCK_SIZE as u32) as usize
}

/// Builds a name from the 8.3 fields: trailing padding spaces drop out,
/// a non-blank extension gets a `.` separator.
fn name_from_short(entry: &[u8]) -> String {
    let mut name = String::new();
    for &b in &entry[0..8] {
        if b != b' ' {
            name.push(b as char);
        }
    }
    if entry[8..11].iter().any(|&b| b != b' ') {
        name.push('.');
        for &b in &entry[8..11] {
            if b != b' ' {
                name.push(b as char);
            }
        }
    }
    name
}

struct FatInode {
    state: Arc<Mutex<FatState>>,
    sector_list: Vec<u32>,
    size: u32,
    kind: InodeKind,
}

impl Inode for FatInode {
    fn kind(&self) -> InodeKind {
        self.kind
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn dup(&self) -> Box<dyn Inode> {
        Box::new(FatInode {
            state: self.state.clone(),
            sector_list: self.sector_list.clone(),
            size: self.size,
            kind: self.kind,
        })
    }

    fn read(&self, buf: &mut [u8], mut offset: u32) -> KernelResult<usize> {
        if self.kind != InodeKind::File {
            return Err(KernelError::WrongType);
        }
        check_media_changed(&self.state)?;
        let handle = self.state.lock().handle;

        let n = buf.len();
        let n_blocks = nblocks(self.size);
        let mut bytes_read = 0usize;

        while ((offset / BLOCK_SIZE as u32) as usize) < n_blocks && bytes_read < n {
            let block = (offset / BLOCK_SIZE as u32) as usize;
            let sector = *self.sector_list.get(block).ok_or(KernelError::Inconsistent)?;
            let data = blockdev::read(handle, sector)?;

            let int_offset = (offset % BLOCK_SIZE as u32) as usize;
            let mut to_copy = BLOCK_SIZE - int_offset;
            to_copy = to_copy.min(n - bytes_read);
            to_copy = to_copy.min((self.size - offset) as usize);

            buf[bytes_read..bytes_read + to_copy].copy_from_slice(&data[int_offset..int_offset + to_copy]);
            bytes_read += to_copy;
            offset += to_copy as u32;
        }
        Ok(bytes_read)
    }

    fn readdir(&self, buf: &mut [DirEntry], offset: u32) -> KernelResult<usize> {
        if self.kind != InodeKind::Dir {
            return Err(KernelError::WrongType);
        }
        check_media_changed(&self.state)?;
        let handle = self.state.lock().handle;

        let mut dirs_read = 0usize;
        let mut dirs_skipped = 0u32;
        'sectors: for &sector in &self.sector_list {
            let data = blockdev::read(handle, sector)?;
            for j in 0..(BLOCK_SIZE / DIR_ENTRY_SIZE) {
                let entry = &data[j * DIR_ENTRY_SIZE..(j + 1) * DIR_ENTRY_SIZE];
                if entry[0] == 0x00 {
                    break 'sectors;
                }
                if entry[0] == 0xE5 {
                    continue;
                }
                let attrs = entry[11];
                if attrs == ATTR_LFN || attrs & ATTR_VOLID != 0 {
                    continue;
                }
                let name = name_from_short(entry);
                if name == "." || name == ".." {
                    continue;
                }

                if dirs_skipped < offset {
                    dirs_skipped += 1;
                    continue;
                }
                let size = u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]);
                buf[dirs_read] = DirEntry { name, size, is_dir: attrs & ATTR_DIR != 0 };
                dirs_read += 1;
                if dirs_read >= buf.len() {
                    break 'sectors;
                }
            }
        }
        Ok(dirs_read)
    }

    fn lookup(&self, name: &str) -> KernelResult<Box<dyn Inode>> {
        if self.kind != InodeKind::Dir {
            return Err(KernelError::WrongType);
        }
        check_media_changed(&self.state)?;
        let handle = self.state.lock().handle;

        for &sector in &self.sector_list {
            let data = blockdev::read(handle, sector)?;
            for j in 0..(BLOCK_SIZE / DIR_ENTRY_SIZE) {
                let entry = &data[j * DIR_ENTRY_SIZE..(j + 1) * DIR_ENTRY_SIZE];
                if entry[0] == 0x00 {
                    return Err(KernelError::NoEnt);
                }
                if entry[0] == 0xE5 {
                    continue;
                }
                let attrs = entry[11];
                if attrs == ATTR_LFN || attrs & ATTR_VOLID != 0 {
                    continue;
                }
                let entry_name = name_from_short(entry);
                if entry_name == "." || entry_name == ".." || entry_name != name {
                    continue;
                }

                let is_dir = attrs & ATTR_DIR != 0;
                let cluster = u16::from_le_bytes([entry[26], entry[27]]) as u32;
                let size = u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]);
                let sector_list = follow_sector_chain(&self.state.lock(), cluster);
                if !is_dir && sector_list.len() != nblocks(size) {
                    return Err(KernelError::Inconsistent);
                }

                return Ok(Box::new(FatInode {
                    state: self.state.clone(),
                    size: if is_dir { sector_list.len() as u32 * BLOCK_SIZE as u32 } else { size },
                    kind: if is_dir { InodeKind::Dir } else { InodeKind::File },
                    sector_list,
                }));
            }
        }
        Err(KernelError::NoEnt)
    }
}

fn mount(dev: &str) -> KernelResult<Superblock> {
    println!("[FAT] mounting device {dev}");
    let handle = blockdev::get_handle(dev)?;

    let sector0 = blockdev::read(handle, 0).inspect_err(|_| blockdev::release_handle(handle))?;
    let bpb = parse_bpb(&sector0);
    if !check_fat_magically(&bpb) {
        blockdev::release_handle(handle);
        return Err(KernelError::Inconsistent);
    }

    let fat_start = bpb.reserved_sectors as u32;
    let mut fat_cache = vec![0u8; bpb.sectors_per_fat as usize * BLOCK_SIZE];
    for i in 0..bpb.sectors_per_fat as u32 {
        let data = match blockdev::read(handle, fat_start + i) {
            Ok(d) => d,
            Err(e) => {
                blockdev::release_handle(handle);
                return Err(e);
            }
        };
        let off = i as usize * BLOCK_SIZE;
        fat_cache[off..off + BLOCK_SIZE].copy_from_slice(&data);
    }

    let root_start = bpb.reserved_sectors as u32 + bpb.n_fats as u32 * bpb.sectors_per_fat as u32;
    let root_dir_bytes = bpb.root_entries as u32 * DIR_ENTRY_SIZE as u32;
    let root_sectors = root_dir_bytes.div_ceil(BLOCK_SIZE as u32);
    let data_start = root_start + root_sectors;

    let state = Arc::new(Mutex::new(FatState {
        handle,
        bpb,
        fat_cache,
        data_start,
        media_changed: false,
    }));

    let root = Box::new(FatInode {
        state: state.clone(),
        sector_list: (root_start..root_start + root_sectors).collect(),
        size: root_sectors * BLOCK_SIZE as u32,
        kind: InodeKind::Dir,
    });

    let unmount_state = state;
    Ok(Superblock::new(root, move || {
        let handle = unmount_state.lock().handle;
        blockdev::release_handle(handle);
    }))
}

pub fn init() {
    if let Err(e) = super::register_fs_type("fat", mount) {
        println!("[FAT] unable to register fs type: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fat12_entry_splits_even_and_odd_clusters_from_shared_bytes() {
        let mut fat_cache = vec![0u8; 8];
        fat_cache[3] = 0x34;
        fat_cache[4] = 0x12;

        assert_eq!(decode_fat12_entry(&fat_cache, 2), Some(0x234));
        assert_eq!(decode_fat12_entry(&fat_cache, 3), Some(0x123));
    }

    #[test]
    fn decode_fat12_entry_rejects_clusters_past_the_cache() {
        let fat_cache = vec![0u8; 4];
        assert_eq!(decode_fat12_entry(&fat_cache, 10), None);
    }

    #[test]
    fn name_from_short_trims_padding_and_joins_extension() {
        let entry = b"FOO     TXT";
        assert_eq!(name_from_short(entry), "FOO.TXT");
    }

    #[test]
    fn name_from_short_drops_separator_for_blank_extension() {
        let entry = b"BAR        ";
        assert_eq!(name_from_short(entry), "BAR");
    }
}
