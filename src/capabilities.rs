//! Capability flags the server advertises once, at mount time (§4.2 step
//! 1). Absence of a flag for a given hook makes that hook return
//! `NotSupported` without ever contacting the server.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u64 {
        const SYNC = 1 << 0;
        const READ_FS_STAT = 1 << 1;
        const WRITE_FS_STAT = 1 << 2;
        const READ_VNODE = 1 << 3;
        const WRITE_VNODE = 1 << 4;
        const REMOVE_VNODE = 1 << 5;
        const LOOKUP = 1 << 6;
        const GET_VNODE_NAME = 1 << 7;
        const READ_STAT = 1 << 8;
        const WRITE_STAT = 1 << 9;
        const ACCESS = 1 << 10;
        const FSYNC = 1 << 11;

        const CREATE = 1 << 12;
        const OPEN = 1 << 13;
        const CLOSE = 1 << 14;
        const FREE_COOKIE = 1 << 15;
        const READ = 1 << 16;
        const WRITE = 1 << 17;
        const IOCTL = 1 << 18;
        const SET_FLAGS = 1 << 19;
        const SELECT = 1 << 20;
        const DESELECT = 1 << 21;

        const CREATE_SYMLINK = 1 << 22;
        const READ_SYMLINK = 1 << 23;
        const LINK = 1 << 24;
        const UNLINK = 1 << 25;
        const RENAME = 1 << 26;

        const CREATE_DIR = 1 << 27;
        const REMOVE_DIR = 1 << 28;
        const OPEN_DIR = 1 << 29;
        const CLOSE_DIR = 1 << 30;
        const FREE_DIR_COOKIE = 1 << 31;
        const READ_DIR = 1 << 32;
        const REWIND_DIR = 1 << 33;

        const OPEN_ATTR_DIR = 1 << 34;
        const CLOSE_ATTR_DIR = 1 << 35;
        const FREE_ATTR_DIR_COOKIE = 1 << 36;
        const READ_ATTR_DIR = 1 << 37;
        const REWIND_ATTR_DIR = 1 << 38;
        const CREATE_ATTR = 1 << 39;
        const OPEN_ATTR = 1 << 40;
        const CLOSE_ATTR = 1 << 41;
        const FREE_ATTR_COOKIE = 1 << 42;
        const READ_ATTR = 1 << 43;
        const WRITE_ATTR = 1 << 44;
        const READ_ATTR_STAT = 1 << 45;
        const WRITE_ATTR_STAT = 1 << 46;
        const RENAME_ATTR = 1 << 47;
        const REMOVE_ATTR = 1 << 48;

        const OPEN_INDEX_DIR = 1 << 49;
        const CLOSE_INDEX_DIR = 1 << 50;
        const FREE_INDEX_DIR_COOKIE = 1 << 51;
        const READ_INDEX_DIR = 1 << 52;
        const REWIND_INDEX_DIR = 1 << 53;
        const CREATE_INDEX = 1 << 54;
        const REMOVE_INDEX = 1 << 55;
        const READ_INDEX_STAT = 1 << 56;

        const OPEN_QUERY = 1 << 57;
        const CLOSE_QUERY = 1 << 58;
        const FREE_QUERY_COOKIE = 1 << 59;
        const READ_QUERY = 1 << 60;
        const REWIND_QUERY = 1 << 61;
    }
}

impl Default for Capabilities {
    /// A server that hasn't sent a capability set yet is assumed to speak
    /// every operation; the set narrows once the real handshake value
    /// arrives at mount time.
    fn default() -> Self {
        Capabilities::all()
    }
}
