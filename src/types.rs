use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IpcError, Result};

/// 搜索选项位掩码
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFlags(pub u32);

impl SearchFlags {
    pub const NONE: Self = Self(0);
    pub const MATCH_CASE: Self = Self(0x0000_0001);
    pub const MATCH_WHOLE_WORD: Self = Self(0x0000_0002);
    pub const MATCH_PATH: Self = Self(0x0000_0004);
    pub const REGEX: Self = Self(0x0000_0008);
    pub const MATCH_ACCENTS: Self = Self(0x0000_0010);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SearchFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SearchFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 可请求的结果字段，声明顺序即行内数据的固定排列顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum RequestField {
    FileName = 0x0000_0001,
    Path = 0x0000_0002,
    FullPathAndFileName = 0x0000_0004,
    Extension = 0x0000_0008,
    Size = 0x0000_0010,
    DateCreated = 0x0000_0020,
    DateModified = 0x0000_0040,
    DateAccessed = 0x0000_0080,
    Attributes = 0x0000_0100,
    FileListFileName = 0x0000_0200,
    RunCount = 0x0000_0400,
    DateRun = 0x0000_0800,
    DateRecentlyChanged = 0x0000_1000,
    HighlightedFileName = 0x0000_2000,
    HighlightedPath = 0x0000_4000,
    HighlightedFullPathAndFileName = 0x0000_8000,
}

impl RequestField {
    /// 按线上排列顺序列出全部已知字段
    pub const ALL: [RequestField; 16] = [
        RequestField::FileName,
        RequestField::Path,
        RequestField::FullPathAndFileName,
        RequestField::Extension,
        RequestField::Size,
        RequestField::DateCreated,
        RequestField::DateModified,
        RequestField::DateAccessed,
        RequestField::Attributes,
        RequestField::FileListFileName,
        RequestField::RunCount,
        RequestField::DateRun,
        RequestField::DateRecentlyChanged,
        RequestField::HighlightedFileName,
        RequestField::HighlightedPath,
        RequestField::HighlightedFullPathAndFileName,
    ];

    pub const fn bit(self) -> u32 {
        self as u32
    }

    pub fn from_bit(bit: u32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.bit() == bit)
            .ok_or(IpcError::UnknownField { bit })
    }

    pub fn field_type(self) -> FieldType {
        FieldType::of(self)
    }
}

/// 字段在线上的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// u32 长度 + UTF-16 文本 + 结尾的 0
    Text,
    /// u64
    Size,
    /// u64 FILETIME
    Date,
    /// u32
    Dword,
}

impl FieldType {
    pub fn of(field: RequestField) -> Self {
        use RequestField::*;
        match field {
            FileName | Path | FullPathAndFileName | Extension | FileListFileName => FieldType::Text,
            HighlightedFileName | HighlightedPath | HighlightedFullPathAndFileName => {
                FieldType::Text
            }
            Size => FieldType::Size,
            DateCreated | DateModified | DateAccessed | DateRun | DateRecentlyChanged => {
                FieldType::Date
            }
            Attributes | RunCount => FieldType::Dword,
        }
    }

    /// 按原始位查类型；表外的位一律返回 `UnknownField`
    pub fn of_bit(bit: u32) -> Result<Self> {
        RequestField::from_bit(bit).map(Self::of)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Size => "size",
            FieldType::Date => "date",
            FieldType::Dword => "dword",
        }
    }
}

/// 请求字段位掩码
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFlags(pub u32);

impl RequestFlags {
    pub const NONE: Self = Self(0);
    pub const FILE_NAME: Self = Self(RequestField::FileName.bit());
    pub const PATH: Self = Self(RequestField::Path.bit());
    pub const FULL_PATH_AND_FILE_NAME: Self = Self(RequestField::FullPathAndFileName.bit());
    pub const EXTENSION: Self = Self(RequestField::Extension.bit());
    pub const SIZE: Self = Self(RequestField::Size.bit());
    pub const DATE_CREATED: Self = Self(RequestField::DateCreated.bit());
    pub const DATE_MODIFIED: Self = Self(RequestField::DateModified.bit());
    pub const DATE_ACCESSED: Self = Self(RequestField::DateAccessed.bit());
    pub const ATTRIBUTES: Self = Self(RequestField::Attributes.bit());
    pub const FILE_LIST_FILE_NAME: Self = Self(RequestField::FileListFileName.bit());
    pub const RUN_COUNT: Self = Self(RequestField::RunCount.bit());
    pub const DATE_RUN: Self = Self(RequestField::DateRun.bit());
    pub const DATE_RECENTLY_CHANGED: Self = Self(RequestField::DateRecentlyChanged.bit());
    pub const HIGHLIGHTED_FILE_NAME: Self = Self(RequestField::HighlightedFileName.bit());
    pub const HIGHLIGHTED_PATH: Self = Self(RequestField::HighlightedPath.bit());
    pub const HIGHLIGHTED_FULL_PATH_AND_FILE_NAME: Self =
        Self(RequestField::HighlightedFullPathAndFileName.bit());

    /// 本库认识的全部位
    pub const KNOWN: Self = Self(0x0000_FFFF);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn has(self, field: RequestField) -> bool {
        self.0 & field.bit() != 0
    }

    /// 本库不认识的位（更新版本的 Everything 可能返回）
    pub const fn unknown_bits(self) -> u32 {
        self.0 & !Self::KNOWN.0
    }

    /// 按线上顺序遍历已置位的已知字段
    pub fn fields(self) -> impl Iterator<Item = RequestField> {
        RequestField::ALL.into_iter().filter(move |f| self.has(*f))
    }
}

impl From<RequestField> for RequestFlags {
    fn from(field: RequestField) -> Self {
        Self(field.bit())
    }
}

impl FromIterator<RequestField> for RequestFlags {
    fn from_iter<I: IntoIterator<Item = RequestField>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::NONE, |acc, f| acc | RequestFlags::from(f))
    }
}

impl BitOr for RequestFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RequestFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 排序方式，奇数升序、偶数降序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Sort {
    #[default]
    NameAscending = 1,
    NameDescending = 2,
    PathAscending = 3,
    PathDescending = 4,
    SizeAscending = 5,
    SizeDescending = 6,
    ExtensionAscending = 7,
    ExtensionDescending = 8,
    TypeNameAscending = 9,
    TypeNameDescending = 10,
    DateCreatedAscending = 11,
    DateCreatedDescending = 12,
    DateModifiedAscending = 13,
    DateModifiedDescending = 14,
    AttributesAscending = 15,
    AttributesDescending = 16,
    FileListFilenameAscending = 17,
    FileListFilenameDescending = 18,
    RunCountAscending = 19,
    RunCountDescending = 20,
    DateRecentlyChangedAscending = 21,
    DateRecentlyChangedDescending = 22,
    DateAccessedAscending = 23,
    DateAccessedDescending = 24,
    DateRunAscending = 25,
    DateRunDescending = 26,
}

impl Sort {
    /// 性能最好的排序
    pub const DEFAULT: Sort = Sort::NameAscending;

    pub const fn value(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        use Sort::*;
        const TABLE: [Sort; 26] = [
            NameAscending,
            NameDescending,
            PathAscending,
            PathDescending,
            SizeAscending,
            SizeDescending,
            ExtensionAscending,
            ExtensionDescending,
            TypeNameAscending,
            TypeNameDescending,
            DateCreatedAscending,
            DateCreatedDescending,
            DateModifiedAscending,
            DateModifiedDescending,
            AttributesAscending,
            AttributesDescending,
            FileListFilenameAscending,
            FileListFilenameDescending,
            RunCountAscending,
            RunCountDescending,
            DateRecentlyChangedAscending,
            DateRecentlyChangedDescending,
            DateAccessedAscending,
            DateAccessedDescending,
            DateRunAscending,
            DateRunDescending,
        ];
        let index = value.checked_sub(1)? as usize;
        TABLE.get(index).copied()
    }

    pub const fn is_ascending(self) -> bool {
        self as u32 % 2 == 1
    }
}

/// 一次查询请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub search: String,
    pub search_flags: SearchFlags,
    pub request_flags: RequestFlags,
    pub sort: Sort,
    /// 对端会原样回显；0 不是保留值
    pub id: u32,
    pub offset: u32,
    /// `u32::MAX` 表示不限
    pub max_results: u32,
}

impl QueryRequest {
    pub const UNLIMITED: u32 = u32::MAX;

    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            search_flags: SearchFlags::NONE,
            request_flags: RequestFlags::FILE_NAME | RequestFlags::PATH,
            sort: Sort::DEFAULT,
            id: 0,
            offset: 0,
            max_results: Self::UNLIMITED,
        }
    }

    pub fn search_flags(mut self, flags: SearchFlags) -> Self {
        self.search_flags = flags;
        self
    }

    pub fn request(mut self, flags: RequestFlags) -> Self {
        self.request_flags = flags;
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn window(mut self, offset: u32, max_results: u32) -> Self {
        self.offset = offset;
        self.max_results = max_results;
        self
    }
}

/// Everything 的目标平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetMachine {
    X86,
    X64,
    Arm,
    Arm64,
    Unknown(u32),
}

impl From<u32> for TargetMachine {
    fn from(value: u32) -> Self {
        match value {
            1 => TargetMachine::X86,
            2 => TargetMachine::X64,
            3 => TargetMachine::Arm,
            4 => TargetMachine::Arm64,
            other => TargetMachine::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub build: u32,
    pub target_machine: TargetMachine,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.revision, self.build
        )
    }
}

/// 可查询是否已建立索引的信息类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum InfoKind {
    FileSize = 1,
    FolderSize = 2,
    DateCreated = 3,
    DateModified = 4,
    DateAccessed = 5,
    Attributes = 6,
}

impl InfoKind {
    pub const ALL: [InfoKind; 6] = [
        InfoKind::FileSize,
        InfoKind::FolderSize,
        InfoKind::DateCreated,
        InfoKind::DateModified,
        InfoKind::DateAccessed,
        InfoKind::Attributes,
    ];
}

/// Windows FILETIME：自 1601-01-01 起的 100ns 计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FileTime(pub u64);

impl FileTime {
    /// 1601 到 1970 的 100ns 间隔数
    const UNIX_EPOCH_OFFSET: u64 = 116_444_736_000_000_000;

    /// Everything 用全 1 表示未知日期
    pub const UNKNOWN: FileTime = FileTime(u64::MAX);

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if self == Self::UNKNOWN {
            return None;
        }
        // 1970 之前的日期是负的 Unix 时间
        let since_unix = i128::from(self.0) - i128::from(Self::UNIX_EPOCH_OFFSET);
        let secs = since_unix.div_euclid(10_000_000) as i64;
        let nanos = (since_unix.rem_euclid(10_000_000) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}
