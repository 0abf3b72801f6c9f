//! The wire's type tag space.
//!
//! Every exchange opens with a 4-byte tag (§6). A reply carries the same
//! tag as the request that produced it, since each exchange is self-ordered
//! by port ownership; there is no separate "reply tag" space.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Tag {
    // Handshake / lifecycle
    FsConnect = 1,
    MountVolume = 2,
    UnmountVolume = 3,
    ReceiptAck = 4,
    NoRequest = 5,

    // Forward: vnode / volume level
    Sync = 10,
    ReadFsStat = 11,
    WriteFsStat = 12,
    ReadVnode = 13,
    WriteVnode = 14,
    RemoveVnode = 15,
    Lookup = 16,
    GetVnodeName = 17,
    ReadStat = 18,
    WriteStat = 19,
    Access = 20,
    FSync = 21,

    // Forward: files
    Create = 30,
    Open = 31,
    Close = 32,
    FreeCookie = 33,
    Read = 34,
    Write = 35,
    IoCtl = 36,
    SetFlags = 37,
    Select = 38,
    Deselect = 39,

    // Forward: links
    CreateSymlink = 40,
    ReadSymlink = 41,
    Link = 42,
    Unlink = 43,
    Rename = 44,

    // Forward: directories
    CreateDir = 50,
    RemoveDir = 51,
    OpenDir = 52,
    CloseDir = 53,
    FreeDirCookie = 54,
    ReadDir = 55,
    RewindDir = 56,

    // Forward: attributes
    OpenAttrDir = 60,
    CloseAttrDir = 61,
    FreeAttrDirCookie = 62,
    ReadAttrDir = 63,
    RewindAttrDir = 64,
    CreateAttr = 65,
    OpenAttr = 66,
    CloseAttr = 67,
    FreeAttrCookie = 68,
    ReadAttr = 69,
    WriteAttr = 70,
    ReadAttrStat = 71,
    WriteAttrStat = 72,
    RenameAttr = 73,
    RemoveAttr = 74,

    // Forward: indices
    OpenIndexDir = 80,
    CloseIndexDir = 81,
    FreeIndexDirCookie = 82,
    ReadIndexDir = 83,
    RewindIndexDir = 84,
    CreateIndex = 85,
    RemoveIndex = 86,
    ReadIndexStat = 87,

    // Forward: queries
    OpenQuery = 90,
    CloseQuery = 91,
    FreeQueryCookie = 92,
    ReadQuery = 93,
    RewindQuery = 94,

    // Reverse (server-originated)
    GetVnode = 100,
    PutVnode = 101,
    NewVnode = 102,
    PublishVnode = 103,
    RemoveVnodeReverse = 104,
    UnremoveVnode = 105,
    IsVnodeRemoved = 106,
    NotifyListener = 107,
    NotifySelectEvent = 108,
    SendNotification = 109,
}

impl Tag {
    /// Replies to these tags carry a variable-size payload copied from the
    /// shared region, and therefore require a receipt-ack (§4.2 step 8).
    pub fn reply_carries_data(self) -> bool {
        matches!(
            self,
            Tag::Read
                | Tag::ReadSymlink
                | Tag::ReadDir
                | Tag::ReadAttr
                | Tag::ReadAttrDir
                | Tag::ReadQuery
                | Tag::ReadIndexDir
                | Tag::GetVnodeName
        )
    }
}
