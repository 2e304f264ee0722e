//! Minimal class-file header reader.
//!
//! Walks the constant pool just far enough to resolve `this_class` and
//! `super_class`. Nothing else in the class file is decoded.

use crate::error::{IndexError, Result};

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

pub const OBJECT_CLASS: &str = "java.lang.Object";

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

#[derive(Debug, Clone, Copy)]
enum Constant<'a> {
    Utf8(&'a [u8]),
    Class(u16),
    Other,
    /// Second slot of a Long or Double.
    Unusable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    /// Binary name with `.` separators.
    pub name: String,
    /// `None` only for `java.lang.Object` itself.
    pub super_name: Option<String>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    class: &'a str,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(IndexError::class_format(
                self.class,
                format!("truncated at offset {}", self.pos),
            ));
        };
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Parses the header of `data`. `class` names the class being loaded and is
/// only used in error messages.
pub fn read_header(class: &str, data: &[u8]) -> Result<ClassHeader> {
    let mut cur = Cursor { data, pos: 0, class };
    let magic = cur.u32()?;
    if magic != CLASS_MAGIC {
        return Err(IndexError::class_format(class, format!("bad magic {magic:#010x}")));
    }
    let _minor = cur.u16()?;
    let _major = cur.u16()?;

    let count = cur.u16()?;
    let mut pool = Vec::with_capacity(usize::from(count));
    pool.push(Constant::Unusable);
    let mut idx = 1u16;
    while idx < count {
        let tag = cur.u8()?;
        let constant = match tag {
            TAG_UTF8 => {
                let len = cur.u16()?;
                Constant::Utf8(cur.take(usize::from(len))?)
            }
            TAG_CLASS => Constant::Class(cur.u16()?),
            TAG_STRING | TAG_METHOD_TYPE | TAG_MODULE | TAG_PACKAGE => {
                cur.take(2)?;
                Constant::Other
            }
            TAG_METHOD_HANDLE => {
                cur.take(3)?;
                Constant::Other
            }
            TAG_INTEGER
            | TAG_FLOAT
            | TAG_FIELDREF
            | TAG_METHODREF
            | TAG_INTERFACE_METHODREF
            | TAG_NAME_AND_TYPE
            | TAG_DYNAMIC
            | TAG_INVOKE_DYNAMIC => {
                cur.take(4)?;
                Constant::Other
            }
            TAG_LONG | TAG_DOUBLE => {
                cur.take(8)?;
                pool.push(Constant::Other);
                idx += 1;
                Constant::Unusable
            }
            other => {
                return Err(IndexError::class_format(
                    class,
                    format!("unknown constant pool tag {other} at index {idx}"),
                ));
            }
        };
        pool.push(constant);
        idx += 1;
    }

    let _access = cur.u16()?;
    let this_class = cur.u16()?;
    let super_class = cur.u16()?;

    let name = class_name(class, &pool, this_class)?;
    let super_name = match super_class {
        0 if name == OBJECT_CLASS => None,
        0 => {
            return Err(IndexError::class_format(class, "missing super class"));
        }
        idx => Some(class_name(class, &pool, idx)?),
    };
    Ok(ClassHeader { name, super_name })
}

/// Convenience wrapper returning only the super-class binary name.
pub fn super_class_name(class: &str, data: &[u8]) -> Result<Option<String>> {
    read_header(class, data).map(|h| h.super_name)
}

fn class_name(class: &str, pool: &[Constant<'_>], idx: u16) -> Result<String> {
    let Some(Constant::Class(name_idx)) = pool.get(usize::from(idx)) else {
        return Err(IndexError::class_format(
            class,
            format!("constant {idx} is not a class reference"),
        ));
    };
    let Some(Constant::Utf8(bytes)) = pool.get(usize::from(*name_idx)) else {
        return Err(IndexError::class_format(
            class,
            format!("constant {name_idx} is not a UTF-8 entry"),
        ));
    };
    let internal = std::str::from_utf8(bytes)
        .map_err(|e| IndexError::class_format(class, format!("class name is not UTF-8: {e}")))?;
    Ok(internal.replace('/', "."))
}
