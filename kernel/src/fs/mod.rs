//! Virtual filesystem layer.
//!
//! A fixed array of mount-point slots, each holding a [`Superblock`]
//! produced by a registered filesystem driver's mount function. Every
//! node in a mounted tree is a boxed [`Inode`] trait object; path
//! resolution walks `lookup` calls from a mount's root, grounded on the
//! original integer-handle-over-inode-pointer design.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

pub mod blockdev;
pub mod fat;
pub mod path;

const MAX_MOUNT_POINTS: usize = 16;

/// Node kind, checked against a caller's requested open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Dir,
}

/// One synthesized directory entry, returned by [`Inode::readdir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub is_dir: bool,
}

/// A filesystem node. Methods take `&self`: a driver wanting mutable
/// state (an I/O buffer, a media-changed flag) keeps it behind its own
/// lock rather than relying on exclusive access to the inode, since the
/// same mount's root is shared by every open performed against it.
pub trait Inode: Send {
    fn kind(&self) -> InodeKind;
    fn size(&self) -> u32;

    /// Duplicates this inode's view, independent of the original's
    /// lifetime. Used to open the bare root of a mount point without
    /// removing it from the mount table.
    fn dup(&self) -> Box<dyn Inode>;

    fn read(&self, _buf: &mut [u8], _offset: u32) -> KernelResult<usize> {
        Err(KernelError::WrongType)
    }

    fn readdir(&self, _buf: &mut [DirEntry], _offset: u32) -> KernelResult<usize> {
        Err(KernelError::WrongType)
    }

    fn lookup(&self, _name: &str) -> KernelResult<Box<dyn Inode>> {
        Err(KernelError::WrongType)
    }
}

/// Result of a filesystem driver's mount function: a root inode plus
/// whatever teardown the driver needs when the mount point is released.
pub struct Superblock {
    root: Box<dyn Inode>,
    unmount_fn: Box<dyn FnOnce() + Send>,
}

impl Superblock {
    pub fn new(root: Box<dyn Inode>, unmount_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            root,
            unmount_fn: Box::new(unmount_fn),
        }
    }

    fn unmount(self) {
        (self.unmount_fn)();
    }
}

pub type MountFn = fn(dev: &str) -> KernelResult<Superblock>;

struct MountPoint {
    superblock: Superblock,
}

static MOUNTS: Mutex<Vec<Option<MountPoint>>> = Mutex::new(Vec::new());
static FS_TYPES: Mutex<Vec<(&'static str, MountFn)>> = Mutex::new(Vec::new());

/// An open file: a resolved inode, independent of the path used to
/// reach it. Dropping it releases whatever the driver allocated to
/// build it (e.g. a FAT cluster-chain sector list).
pub struct File {
    inode: Box<dyn Inode>,
}

impl File {
    pub fn kind(&self) -> InodeKind {
        self.inode.kind()
    }

    pub fn size(&self) -> u32 {
        self.inode.size()
    }
}

pub fn init() {
    MOUNTS.lock().resize_with(MAX_MOUNT_POINTS, || None);
    fat::init();
}

/// Records a filesystem driver under `name`. Fails if the name is
/// already taken.
pub fn register_fs_type(name: &'static str, mount: MountFn) -> KernelResult<()> {
    let mut types = FS_TYPES.lock();
    if types.iter().any(|(n, _)| *n == name) {
        return Err(KernelError::Busy);
    }
    types.push((name, mount));
    Ok(())
}

fn mount_point_index(mp: &str) -> KernelResult<usize> {
    if mp == "/" {
        return Ok(0);
    }
    mp.parse::<usize>().map_err(|_| KernelError::InvalidRequest)
}

/// Looks up `fs_name`'s driver, runs its mount function against `dev`,
/// and installs the resulting superblock at mount point `mp`.
pub fn mount(dev: &str, mp: &str, fs_name: &str) -> KernelResult<()> {
    let idx = mount_point_index(mp)?;
    let mount_fn = {
        let types = FS_TYPES.lock();
        types
            .iter()
            .find(|(name, _)| *name == fs_name)
            .map(|(_, f)| *f)
            .ok_or(KernelError::NoFs)?
    };

    let superblock = mount_fn(dev)?;

    let mut mounts = MOUNTS.lock();
    let slot = mounts.get_mut(idx).ok_or(KernelError::NoMountPoint)?;
    if slot.is_some() {
        return Err(KernelError::Busy);
    }
    *slot = Some(MountPoint { superblock });
    println!("[VFS] mounted {fs_name} on {dev} at {idx}");
    Ok(())
}

/// Runs the mounted filesystem's `unmount` and frees the mount point
/// slot.
pub fn unmount(mp: u32) -> KernelResult<()> {
    let mut mounts = MOUNTS.lock();
    let slot = mounts.get_mut(mp as usize).ok_or(KernelError::NoMountPoint)?;
    let mount_point = slot.take().ok_or(KernelError::NoMountPoint)?;
    mount_point.superblock.unmount();
    Ok(())
}

fn open_opts(path: &str, want_dir: bool) -> KernelResult<File> {
    let canonical = path::canonicalize(path)?;
    let mounts = MOUNTS.lock();
    let mount_point = mounts
        .get(canonical.mount_point as usize)
        .and_then(|slot| slot.as_ref())
        .ok_or(KernelError::NoMountPoint)?;

    let mut cur = mount_point.superblock.root.dup();
    for seg in &canonical.segments {
        if cur.kind() != InodeKind::Dir {
            return Err(KernelError::WrongType);
        }
        cur = cur.lookup(seg)?;
    }

    let expected = if want_dir { InodeKind::Dir } else { InodeKind::File };
    if cur.kind() != expected {
        return Err(KernelError::WrongType);
    }
    Ok(File { inode: cur })
}

/// Resolves `path` and opens it as a file. `path` must already be
/// canonical (`<mp>:/a/b`); relative resolution against a process's cwd
/// happens one layer up, in the syscall handler.
pub fn vfs_open(path: &str) -> KernelResult<File> {
    open_opts(path, false)
}

/// As [`vfs_open`], but requires the resolved node to be a directory.
pub fn vfs_opendir(path: &str) -> KernelResult<File> {
    open_opts(path, true)
}

pub fn vfs_close(_file: File) {}

pub fn vfs_read(file: &File, buf: &mut [u8], offset: u32) -> KernelResult<usize> {
    file.inode.read(buf, offset)
}

pub fn vfs_readdir(file: &File, buf: &mut [DirEntry], offset: u32) -> KernelResult<usize> {
    file.inode.readdir(buf, offset)
}
