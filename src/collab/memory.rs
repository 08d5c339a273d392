/*!
 * In-Memory Collaborators
 * Blackboard value model, a map-backed blackboard and sparse host memory
 */

use super::{Blackboard, MemoryAccess};
use crate::core::errors::{CollabError, CollabResult};
use crate::core::{Pid, Vid};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};

/// Blackboard data type codes as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum BbType {
    Byte = 0,
    UByte = 1,
    Word = 2,
    UWord = 3,
    DWord = 4,
    UDWord = 5,
    Float = 6,
    Double = 7,
    QWord = 34,
    UQWord = 35,
}

impl BbType {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => BbType::Byte,
            1 => BbType::UByte,
            2 => BbType::Word,
            3 => BbType::UWord,
            4 => BbType::DWord,
            5 => BbType::UDWord,
            6 => BbType::Float,
            7 => BbType::Double,
            34 => BbType::QWord,
            35 => BbType::UQWord,
            _ => return None,
        })
    }

    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Bytes occupied in a snapshot
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            BbType::Byte | BbType::UByte => 1,
            BbType::Word | BbType::UWord => 2,
            BbType::DWord | BbType::UDWord | BbType::Float => 4,
            BbType::Double | BbType::QWord | BbType::UQWord => 8,
        }
    }

    #[inline]
    const fn is_float(self) -> bool {
        matches!(self, BbType::Float | BbType::Double)
    }

    fn range(self) -> (i128, i128) {
        match self {
            BbType::Byte => (i8::MIN as i128, i8::MAX as i128),
            BbType::UByte => (0, u8::MAX as i128),
            BbType::Word => (i16::MIN as i128, i16::MAX as i128),
            BbType::UWord => (0, u16::MAX as i128),
            BbType::DWord => (i32::MIN as i128, i32::MAX as i128),
            BbType::UDWord => (0, u32::MAX as i128),
            BbType::QWord => (i64::MIN as i128, i64::MAX as i128),
            BbType::UQWord => (0, u64::MAX as i128),
            BbType::Float | BbType::Double => (i128::MIN, i128::MAX),
        }
    }
}

/// A typed blackboard value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BbValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
    I64(i64),
    U64(u64),
}

impl BbValue {
    pub fn zero(ty: BbType) -> Self {
        BbValue::from_f64(ty, 0.0)
    }

    pub fn ty(&self) -> BbType {
        match self {
            BbValue::I8(_) => BbType::Byte,
            BbValue::U8(_) => BbType::UByte,
            BbValue::I16(_) => BbType::Word,
            BbValue::U16(_) => BbType::UWord,
            BbValue::I32(_) => BbType::DWord,
            BbValue::U32(_) => BbType::UDWord,
            BbValue::F32(_) => BbType::Float,
            BbValue::F64(_) => BbType::Double,
            BbValue::I64(_) => BbType::QWord,
            BbValue::U64(_) => BbType::UQWord,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            BbValue::I8(v) => v as f64,
            BbValue::U8(v) => v as f64,
            BbValue::I16(v) => v as f64,
            BbValue::U16(v) => v as f64,
            BbValue::I32(v) => v as f64,
            BbValue::U32(v) => v as f64,
            BbValue::F32(v) => v as f64,
            BbValue::F64(v) => v,
            BbValue::I64(v) => v as f64,
            BbValue::U64(v) => v as f64,
        }
    }

    fn as_i128(&self) -> i128 {
        match *self {
            BbValue::I8(v) => v as i128,
            BbValue::U8(v) => v as i128,
            BbValue::I16(v) => v as i128,
            BbValue::U16(v) => v as i128,
            BbValue::I32(v) => v as i128,
            BbValue::U32(v) => v as i128,
            BbValue::F32(v) => v.round() as i128,
            BbValue::F64(v) => v.round() as i128,
            BbValue::I64(v) => v as i128,
            BbValue::U64(v) => v as i128,
        }
    }

    /// Build a value of `ty` from a double, saturating to its range
    pub fn from_f64(ty: BbType, v: f64) -> Self {
        match ty {
            BbType::Float => BbValue::F32(v as f32),
            BbType::Double => BbValue::F64(v),
            _ => BbValue::from_i128(ty, v.round() as i128),
        }
    }

    fn from_i128(ty: BbType, v: i128) -> Self {
        let (lo, hi) = ty.range();
        let v = v.clamp(lo, hi);
        match ty {
            BbType::Byte => BbValue::I8(v as i8),
            BbType::UByte => BbValue::U8(v as u8),
            BbType::Word => BbValue::I16(v as i16),
            BbType::UWord => BbValue::U16(v as u16),
            BbType::DWord => BbValue::I32(v as i32),
            BbType::UDWord => BbValue::U32(v as u32),
            BbType::QWord => BbValue::I64(v as i64),
            BbType::UQWord => BbValue::U64(v as u64),
            BbType::Float => BbValue::F32(v as f32),
            BbType::Double => BbValue::F64(v as f64),
        }
    }

    /// Convert to `ty` with saturation; identity when the type already matches
    pub fn convert(self, ty: BbType) -> Self {
        if self.ty() == ty {
            self
        } else if ty.is_float() {
            BbValue::from_f64(ty, self.as_f64())
        } else {
            BbValue::from_i128(ty, self.as_i128())
        }
    }

    /// Append little-endian bytes
    pub fn write_le(&self, out: &mut Vec<u8>) {
        match *self {
            BbValue::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::U8(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            BbValue::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    /// Decode `ty.size()` little-endian bytes
    pub fn read_le(ty: BbType, bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..ty.size())?;
        Some(match ty {
            BbType::Byte => BbValue::I8(i8::from_le_bytes([b[0]])),
            BbType::UByte => BbValue::U8(b[0]),
            BbType::Word => BbValue::I16(i16::from_le_bytes(b.try_into().ok()?)),
            BbType::UWord => BbValue::U16(u16::from_le_bytes(b.try_into().ok()?)),
            BbType::DWord => BbValue::I32(i32::from_le_bytes(b.try_into().ok()?)),
            BbType::UDWord => BbValue::U32(u32::from_le_bytes(b.try_into().ok()?)),
            BbType::Float => BbValue::F32(f32::from_le_bytes(b.try_into().ok()?)),
            BbType::Double => BbValue::F64(f64::from_le_bytes(b.try_into().ok()?)),
            BbType::QWord => BbValue::I64(i64::from_le_bytes(b.try_into().ok()?)),
            BbType::UQWord => BbValue::U64(u64::from_le_bytes(b.try_into().ok()?)),
        })
    }
}

// ============================================================================
// Map-backed Blackboard
// ============================================================================

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    ty: BbType,
    #[allow(dead_code)]
    unit: String,
    value: BbValue,
    users: Vec<Pid>,
}

#[derive(Debug, Default)]
struct BoardInner {
    vars: HashMap<Vid, Variable>,
    by_name: HashMap<String, Vid>,
}

/// Blackboard kept entirely in process memory
#[derive(Debug)]
pub struct MemoryBlackboard {
    inner: RwLock<BoardInner>,
    next_vid: AtomicI32,
}

impl MemoryBlackboard {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BoardInner::default()),
            next_vid: AtomicI32::new(1),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Vid> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_user(inner: &mut BoardInner, pid: Pid, vid: Vid) -> bool {
        let remove = match inner.vars.get_mut(&vid) {
            Some(var) => {
                var.users.retain(|p| *p != pid);
                var.users.is_empty()
            }
            None => return false,
        };
        if remove {
            if let Some(var) = inner.vars.remove(&vid) {
                inner.by_name.remove(&var.name);
            }
        }
        true
    }
}

impl Default for MemoryBlackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Blackboard for MemoryBlackboard {
    fn add_variable(&self, pid: Pid, name: &str, ty: BbType, unit: &str) -> CollabResult<Vid> {
        let mut inner = self.inner.write();
        if let Some(&vid) = inner.by_name.get(name) {
            let var = inner
                .vars
                .get_mut(&vid)
                .ok_or(CollabError::VariableNotFound(vid.0))?;
            if var.ty != ty {
                return Err(CollabError::TypeMismatch(name.into()));
            }
            if !var.users.contains(&pid) {
                var.users.push(pid);
            }
            return Ok(vid);
        }
        let vid = Vid(self.next_vid.fetch_add(1, Ordering::Relaxed));
        inner.vars.insert(
            vid,
            Variable {
                name: name.to_string(),
                ty,
                unit: unit.to_string(),
                value: BbValue::zero(ty),
                users: vec![pid],
            },
        );
        inner.by_name.insert(name.to_string(), vid);
        Ok(vid)
    }

    fn attach_variable(&self, pid: Pid, name: &str) -> CollabResult<(Vid, BbType)> {
        let mut inner = self.inner.write();
        let vid = *inner
            .by_name
            .get(name)
            .ok_or_else(|| CollabError::Rejected(format!("no variable named {}", name)))?;
        let var = inner
            .vars
            .get_mut(&vid)
            .ok_or(CollabError::VariableNotFound(vid.0))?;
        if !var.users.contains(&pid) {
            var.users.push(pid);
        }
        Ok((vid, var.ty))
    }

    fn remove_variable(&self, pid: Pid, vid: Vid) -> CollabResult<()> {
        let mut inner = self.inner.write();
        if Self::drop_user(&mut inner, pid, vid) {
            Ok(())
        } else {
            Err(CollabError::VariableNotFound(vid.0))
        }
    }

    fn read(&self, vid: Vid) -> CollabResult<BbValue> {
        self.inner
            .read()
            .vars
            .get(&vid)
            .map(|v| v.value)
            .ok_or(CollabError::VariableNotFound(vid.0))
    }

    fn write(&self, _pid: Pid, vid: Vid, value: BbValue) -> CollabResult<()> {
        let mut inner = self.inner.write();
        let var = inner
            .vars
            .get_mut(&vid)
            .ok_or(CollabError::VariableNotFound(vid.0))?;
        var.value = value.convert(var.ty);
        Ok(())
    }

    fn name_of(&self, vid: Vid) -> Option<String> {
        self.inner.read().vars.get(&vid).map(|v| v.name.clone())
    }

    fn remove_all_for_process(&self, pid: Pid) -> usize {
        let mut inner = self.inner.write();
        let owned: Vec<Vid> = inner
            .vars
            .iter()
            .filter(|(_, v)| v.users.contains(&pid))
            .map(|(vid, _)| *vid)
            .collect();
        for vid in &owned {
            Self::drop_user(&mut inner, pid, *vid);
        }
        owned.len()
    }
}

// ============================================================================
// Sparse Host Memory
// ============================================================================

/// Byte-addressed memory; unwritten bytes read as zero
#[derive(Debug, Default)]
pub struct SparseMemory {
    bytes: Mutex<BTreeMap<u64, u8>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryAccess for SparseMemory {
    fn read(&self, _pid: Pid, address: u64, len: usize) -> CollabResult<Vec<u8>> {
        let bytes = self.bytes.lock();
        Ok((0..len as u64)
            .map(|i| bytes.get(&address.wrapping_add(i)).copied().unwrap_or(0))
            .collect())
    }

    fn write(&self, _pid: Pid, address: u64, data: &[u8]) -> CollabResult<()> {
        let mut bytes = self.bytes.lock();
        for (i, b) in data.iter().enumerate() {
            bytes.insert(address.wrapping_add(i as u64), *b);
        }
        Ok(())
    }
}
