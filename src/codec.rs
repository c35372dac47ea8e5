//! Everything IPC 线上格式（QUERY2 请求 / LIST2 回复）
//!
//! 请求: `[reply_hwnd:4][id:4][search_flags:4][offset:4][max_results:4][request_flags:4][sort:4][search:UTF-16][0:2]`
//!
//! 回复: `[totitems:4][numitems:4][offset:4][request_flags:4][sort:4]`，随后是 `numitems` 个
//! `[flags:4][data_offset:4]` 行描述，`data_offset` 相对缓冲区起点。行内字段按
//! [`RequestField`] 的固定顺序紧密排列，只能从行首顺序扫描。
//!
//! 所有整数均为小端。

use std::sync::Arc;

use crate::error::{IpcError, Result};
use crate::types::{
    FieldType, FileTime, QueryRequest, RequestField, RequestFlags, SearchFlags, Sort,
};

pub const QUERY_HEADER_SIZE: usize = 28;
pub const REPLY_HEADER_SIZE: usize = 20;
pub const ROW_DESCRIPTOR_SIZE: usize = 8;

/// 发送查询时 COPYDATASTRUCT.dwData 的取值 (EVERYTHING_IPC_COPYDATA_QUERY2W)
pub const COPYDATA_QUERY2W: usize = 18;

/// 带边界检查的只读游标
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        if pos > buf.len() {
            return Err(IpcError::Truncated {
                needed: pos,
                have: buf.len(),
            });
        }
        Ok(Self { buf, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(IpcError::Truncated {
                needed: self.pos.saturating_add(len),
                have: self.buf.len(),
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_utf16(&mut self, units: usize) -> Result<Vec<u16>> {
        let len = units.checked_mul(2).ok_or(IpcError::Truncated {
            needed: usize::MAX,
            have: self.buf.len(),
        })?;
        let bytes = self.take(len)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_text(out: &mut Vec<u8>, units: &[u16]) {
    put_u32(out, units.len() as u32);
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
}

/// 将查询编码为 QUERY2 请求体
pub fn encode_query(request: &QueryRequest, reply_endpoint: u32) -> Vec<u8> {
    let units: Vec<u16> = request.search.encode_utf16().collect();
    let mut out = Vec::with_capacity(QUERY_HEADER_SIZE + (units.len() + 1) * 2);
    put_u32(&mut out, reply_endpoint);
    put_u32(&mut out, request.id);
    put_u32(&mut out, request.search_flags.bits());
    put_u32(&mut out, request.offset);
    put_u32(&mut out, request.max_results);
    put_u32(&mut out, request.request_flags.bits());
    put_u32(&mut out, request.sort.value());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// 对端视角的解码，返回 (回复端点, 请求)
pub fn decode_query(buf: &[u8]) -> Result<(u32, QueryRequest)> {
    let mut cur = Cursor::new(buf);
    let reply_endpoint = cur.read_u32()?;
    let id = cur.read_u32()?;
    let search_flags = SearchFlags(cur.read_u32()?);
    let offset = cur.read_u32()?;
    let max_results = cur.read_u32()?;
    let request_flags = RequestFlags(cur.read_u32()?);
    let sort = Sort::from_u32(cur.read_u32()?).unwrap_or_default();

    let mut units = Vec::new();
    while cur.remaining() >= 2 {
        match cur.read_u16()? {
            0 => break,
            unit => units.push(unit),
        }
    }

    Ok((
        reply_endpoint,
        QueryRequest {
            search: String::from_utf16_lossy(&units),
            search_flags,
            request_flags,
            sort,
            id,
            offset,
            max_results,
        },
    ))
}

/// 只读出请求头里的查询 id
pub fn query_id(buf: &[u8]) -> Result<u32> {
    Cursor::at(buf, 4)?.read_u32()
}

/// 单个字段的值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(Vec<u16>),
    Size(u64),
    Date(FileTime),
    Dword(u32),
}

impl FieldValue {
    pub fn text(s: &str) -> Self {
        FieldValue::Text(s.encode_utf16().collect())
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Size(_) => FieldType::Size,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Dword(_) => FieldType::Dword,
        }
    }

    /// 文本按 UTF-16 有损转换，其他类型转十进制
    pub fn to_string_lossy(&self) -> String {
        match self {
            FieldValue::Text(units) => String::from_utf16_lossy(units),
            FieldValue::Size(v) => v.to_string(),
            FieldValue::Date(t) => t.0.to_string(),
            FieldValue::Dword(v) => v.to_string(),
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            FieldValue::Text(units) => put_text(out, units),
            FieldValue::Size(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Date(t) => out.extend_from_slice(&t.0.to_le_bytes()),
            FieldValue::Dword(v) => put_u32(out, *v),
        }
    }
}

fn read_field(cur: &mut Cursor<'_>, ty: FieldType) -> Result<FieldValue> {
    Ok(match ty {
        FieldType::Text => {
            let units = cur.read_u32()? as usize;
            let text = cur.read_utf16(units)?;
            // 长度不含结尾的 0，但数据里有
            cur.skip(2)?;
            FieldValue::Text(text)
        }
        FieldType::Size => FieldValue::Size(cur.read_u64()?),
        FieldType::Date => FieldValue::Date(FileTime(cur.read_u64()?)),
        FieldType::Dword => FieldValue::Dword(cur.read_u32()?),
    })
}

fn skip_field(cur: &mut Cursor<'_>, ty: FieldType) -> Result<()> {
    match ty {
        FieldType::Text => {
            let units = cur.read_u32()? as usize;
            let len = units
                .checked_add(1)
                .and_then(|n| n.checked_mul(2))
                .ok_or(IpcError::Truncated {
                    needed: usize::MAX,
                    have: cur.remaining(),
                })?;
            cur.skip(len)
        }
        FieldType::Size | FieldType::Date => cur.skip(8),
        FieldType::Dword => cur.skip(4),
    }
}

/// 一次查询的回复
///
/// 缓冲区只接收一次，之后不可变；克隆只增加引用计数。
#[derive(Debug, Clone)]
pub struct ResultSet {
    id: u32,
    buf: Arc<[u8]>,
    found_num: u32,
    available_num: u32,
    offset: u32,
    request_flags: RequestFlags,
    sort: u32,
}

impl ResultSet {
    /// 解析回复头并校验行描述表在缓冲区内；字段数据按需读取
    pub fn from_reply(id: u32, buf: impl Into<Arc<[u8]>>) -> Result<Self> {
        let buf: Arc<[u8]> = buf.into();
        let mut cur = Cursor::new(&buf);
        let found_num = cur.read_u32()?;
        let available_num = cur.read_u32()?;
        let offset = cur.read_u32()?;
        let request_flags = RequestFlags(cur.read_u32()?);
        let sort = cur.read_u32()?;

        let table_len = (available_num as usize)
            .checked_mul(ROW_DESCRIPTOR_SIZE)
            .ok_or(IpcError::Truncated {
                needed: usize::MAX,
                have: buf.len(),
            })?;
        cur.skip(table_len)?;

        Ok(Self {
            id,
            found_num,
            available_num,
            offset,
            request_flags,
            sort,
            buf,
        })
    }

    /// 回复携带的关联 ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 匹配总数
    pub fn found_num(&self) -> u32 {
        self.found_num
    }

    /// 实际返回的行数
    pub fn available_num(&self) -> u32 {
        self.available_num
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// 对端实际返回的字段，可能与请求不同
    pub fn request_flags(&self) -> RequestFlags {
        self.request_flags
    }

    /// 对端实际使用的排序，可能与请求不同
    pub fn sort(&self) -> Option<Sort> {
        Sort::from_u32(self.sort)
    }

    pub fn sort_raw(&self) -> u32 {
        self.sort
    }

    pub fn len(&self) -> usize {
        self.available_num as usize
    }

    pub fn is_empty(&self) -> bool {
        self.available_num == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn get(&self, index: usize) -> Result<Item<'_>> {
        if index >= self.len() {
            return Err(IpcError::RowOutOfRange {
                index,
                len: self.len(),
            });
        }
        let mut cur = Cursor::at(&self.buf, REPLY_HEADER_SIZE + index * ROW_DESCRIPTOR_SIZE)?;
        let _flags = cur.read_u32()?;
        let data_offset = cur.read_u32()? as usize;
        Ok(Item {
            set: self,
            offset: data_offset,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Item<'_>>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// 结果中的一行，只是缓冲区中的一个偏移
#[derive(Debug, Clone, Copy)]
pub struct Item<'a> {
    set: &'a ResultSet,
    offset: usize,
}

impl<'a> Item<'a> {
    pub fn data_offset(&self) -> usize {
        self.offset
    }

    /// 从行首按固定顺序跳到目标字段
    fn seek(&self, field: RequestField) -> Result<Cursor<'a>> {
        let flags = self.set.request_flags;
        if !flags.has(field) {
            return Err(IpcError::FieldNotReturned { field });
        }
        let mut cur = Cursor::at(&self.set.buf, self.offset)?;
        for f in flags.fields() {
            if f == field {
                return Ok(cur);
            }
            skip_field(&mut cur, f.field_type())?;
        }
        Err(IpcError::FieldNotReturned { field })
    }

    pub fn get(&self, field: RequestField) -> Result<FieldValue> {
        let mut cur = self.seek(field)?;
        read_field(&mut cur, field.field_type())
    }

    /// 按原始位读取；表外的位直接报错，不会继续解析
    pub fn get_bit(&self, bit: u32) -> Result<FieldValue> {
        let field = RequestField::from_bit(bit)?;
        self.get(field)
    }

    pub fn get_utf16(&self, field: RequestField) -> Result<Vec<u16>> {
        match self.get(field)? {
            FieldValue::Text(units) => Ok(units),
            _ => Err(IpcError::FieldType {
                field,
                expected: FieldType::Text.name(),
            }),
        }
    }

    pub fn get_str(&self, field: RequestField) -> Result<String> {
        self.get_utf16(field)
            .map(|units| String::from_utf16_lossy(&units))
    }

    pub fn get_size(&self, field: RequestField) -> Result<u64> {
        match self.get(field)? {
            FieldValue::Size(v) => Ok(v),
            _ => Err(IpcError::FieldType {
                field,
                expected: FieldType::Size.name(),
            }),
        }
    }

    pub fn get_date(&self, field: RequestField) -> Result<FileTime> {
        match self.get(field)? {
            FieldValue::Date(t) => Ok(t),
            _ => Err(IpcError::FieldType {
                field,
                expected: FieldType::Date.name(),
            }),
        }
    }

    pub fn get_dword(&self, field: RequestField) -> Result<u32> {
        match self.get(field)? {
            FieldValue::Dword(v) => Ok(v),
            _ => Err(IpcError::FieldType {
                field,
                expected: FieldType::Dword.name(),
            }),
        }
    }

    /// 一次扫描读出本行全部已知字段
    pub fn fields(&self) -> Fields<'a> {
        Fields {
            cursor: Cursor::at(&self.set.buf, self.offset),
            pending: self.set.request_flags.fields().collect::<Vec<_>>().into_iter(),
        }
    }
}

/// [`Item::fields`] 的迭代器，遇到错误后停止
pub struct Fields<'a> {
    cursor: Result<Cursor<'a>>,
    pending: std::vec::IntoIter<RequestField>,
}

impl Iterator for Fields<'_> {
    type Item = Result<(RequestField, FieldValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        let field = self.pending.next()?;
        let cur = match &mut self.cursor {
            Ok(cur) => cur,
            Err(e) => {
                let e = e.clone();
                self.pending = Vec::new().into_iter();
                return Some(Err(e));
            }
        };
        match read_field(cur, field.field_type()) {
            Ok(value) => Some(Ok((field, value))),
            Err(e) => {
                self.pending = Vec::new().into_iter();
                Some(Err(e))
            }
        }
    }
}

/// 构造回复缓冲区（对端视角），供回环对端和测试使用
#[derive(Debug, Clone, Default)]
pub struct ReplyBuilder {
    request_flags: RequestFlags,
    sort: u32,
    offset: u32,
    found: Option<u32>,
    rows: Vec<Vec<FieldValue>>,
}

impl ReplyBuilder {
    pub fn new(request_flags: RequestFlags) -> Self {
        Self {
            request_flags,
            sort: Sort::DEFAULT.value(),
            ..Default::default()
        }
    }

    pub fn sort(mut self, sort: u32) -> Self {
        self.sort = sort;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// 匹配总数，默认等于行数
    pub fn found(mut self, found: u32) -> Self {
        self.found = Some(found);
        self
    }

    /// 追加一行，值必须按字段固定顺序给出
    pub fn row(mut self, values: Vec<FieldValue>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let available = self.rows.len() as u32;
        let table_end = REPLY_HEADER_SIZE + self.rows.len() * ROW_DESCRIPTOR_SIZE;

        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            offsets.push((table_end + data.len()) as u32);
            for value in row {
                value.encode_into(&mut data);
            }
        }

        let mut out = Vec::with_capacity(table_end + data.len());
        put_u32(&mut out, self.found.unwrap_or(available));
        put_u32(&mut out, available);
        put_u32(&mut out, self.offset);
        put_u32(&mut out, self.request_flags.bits());
        put_u32(&mut out, self.sort);
        for offset in offsets {
            put_u32(&mut out, 0);
            put_u32(&mut out, offset);
        }
        out.extend_from_slice(&data);
        out
    }
}
