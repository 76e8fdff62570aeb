//! Schema descriptors and the registry
//!
//! A schema entry describes one fixed-layout payload struct: its id, name,
//! and ordered field table. Descriptors are declared as `static`s by the
//! embedder and registered by reference; the registry never copies them.

use crate::{
    config::{MAX_FIELDS, MAX_PAYLOAD, MAX_SCHEMA_ENTRIES},
    error::{BtlmError, Result},
};

/// Field type tags. Values are part of the wire format.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8 = 0,
    U16 = 1,
    U32 = 2,
    U64 = 3,
    I8 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    F32 = 8,
    F64 = 9,
    Bool = 10,
    Bytes = 11,
    /// u8 storage, labels carried in schema metadata
    Enum = 12,
    /// u8/u16/u32 storage, bit sub-fields carried in schema metadata
    Bitfield = 13,
}

impl FieldType {
    /// Storage size in bytes of one element for fixed-width types.
    /// `Bytes` has no intrinsic size and returns 0.
    pub const fn fixed_size(self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 | FieldType::Bool | FieldType::Enum => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
            FieldType::U64 | FieldType::I64 | FieldType::F64 => 8,
            FieldType::Bitfield => 1,
            FieldType::Bytes => 0,
        }
    }
}

/// Ordered label list for an [`FieldType::Enum`] field. The stored value is
/// an index into `labels`.
#[derive(Debug)]
pub struct EnumDef {
    pub labels: &'static [&'static str],
}

/// One named bit group inside a bitfield: `start` is 0-based from the LSB,
/// `width` is 1 for a flag and >1 for a multi-bit group.
#[derive(Debug)]
pub struct BitDef {
    pub name: &'static str,
    pub start: u8,
    pub width: u8,
}

/// Bit layout for a [`FieldType::Bitfield`] field.
#[derive(Debug)]
pub struct BitfieldDef {
    pub bits: &'static [BitDef],
}

/// One field of a payload struct.
#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    /// Byte offset within the payload
    pub offset: u16,
    /// Total byte size of the field (whole array for array fields)
    pub size: u16,
    pub ty: FieldType,
    /// 1 for scalars, element count for arrays
    pub count: u8,
    pub enum_def: Option<&'static EnumDef>,
    pub bitfield_def: Option<&'static BitfieldDef>,
}

impl FieldDef {
    pub const fn scalar(name: &'static str, offset: u16, size: u16, ty: FieldType) -> Self {
        Self {
            name,
            offset,
            size,
            ty,
            count: 1,
            enum_def: None,
            bitfield_def: None,
        }
    }

    pub const fn array(
        name: &'static str,
        offset: u16,
        size: u16,
        ty: FieldType,
        count: u8,
    ) -> Self {
        Self {
            name,
            offset,
            size,
            ty,
            count,
            enum_def: None,
            bitfield_def: None,
        }
    }

    pub const fn enumeration(
        name: &'static str,
        offset: u16,
        size: u16,
        def: &'static EnumDef,
    ) -> Self {
        Self {
            name,
            offset,
            size,
            ty: FieldType::Enum,
            count: 1,
            enum_def: Some(def),
            bitfield_def: None,
        }
    }

    pub const fn bitfield(
        name: &'static str,
        offset: u16,
        size: u16,
        def: &'static BitfieldDef,
    ) -> Self {
        Self {
            name,
            offset,
            size,
            ty: FieldType::Bitfield,
            count: 1,
            enum_def: None,
            bitfield_def: Some(def),
        }
    }
}

/// Descriptor for one event layout. Declared `static` by the embedder and
/// registered by reference; must outlive the context.
#[derive(Debug)]
pub struct SchemaEntry {
    /// Numeric id, `< MAX_SCHEMA_ENTRIES`
    pub id: u16,
    pub name: &'static str,
    pub description: &'static str,
    /// Exact payload size logged under this id
    pub payload_size: u16,
    pub fields: &'static [FieldDef],
}

/// Declare a [`FieldDef`] against a `#[repr(C)]` struct member, deriving the
/// offset with `core::mem::offset_of!`.
///
/// ```
/// use btlm::{field, FieldType, FieldDef};
///
/// #[repr(C)]
/// struct Sample { counter: u64, value: f32 }
///
/// static FIELDS: &[FieldDef] = &[
///     field!(Sample, counter, U64),
///     field!(Sample, value, F32),
/// ];
/// ```
#[macro_export]
macro_rules! field {
    ($owner:ty, $member:ident, $ty:ident) => {
        $crate::FieldDef::scalar(
            stringify!($member),
            ::core::mem::offset_of!($owner, $member) as u16,
            $crate::FieldType::$ty.fixed_size() as u16,
            $crate::FieldType::$ty,
        )
    };
    ($owner:ty, $member:ident, $ty:ident, $count:expr) => {
        $crate::FieldDef::array(
            stringify!($member),
            ::core::mem::offset_of!($owner, $member) as u16,
            ($crate::FieldType::$ty.fixed_size() * $count) as u16,
            $crate::FieldType::$ty,
            $count as u8,
        )
    };
    ($owner:ty, $member:ident, enum $def:expr) => {
        $crate::FieldDef::enumeration(
            stringify!($member),
            ::core::mem::offset_of!($owner, $member) as u16,
            1,
            $def,
        )
    };
    ($owner:ty, $member:ident, bits($storage:ident) $def:expr) => {
        $crate::FieldDef::bitfield(
            stringify!($member),
            ::core::mem::offset_of!($owner, $member) as u16,
            $crate::FieldType::$storage.fixed_size() as u16,
            $def,
        )
    };
}

/// Table of registered descriptors, keyed by id.
pub(crate) struct SchemaRegistry {
    entries: [Option<&'static SchemaEntry>; MAX_SCHEMA_ENTRIES],
    /// Largest registered id + 1
    count: u16,
}

impl SchemaRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: [None; MAX_SCHEMA_ENTRIES],
            count: 0,
        }
    }

    /// Validate and store a descriptor. Registering an id twice replaces the
    /// previous descriptor.
    pub(crate) fn register(&mut self, entry: &'static SchemaEntry) -> Result<()> {
        if entry.id as usize >= MAX_SCHEMA_ENTRIES {
            return Err(BtlmError::invalid_schema_id(entry.id, MAX_SCHEMA_ENTRIES));
        }
        if entry.payload_size as usize > MAX_PAYLOAD {
            return Err(BtlmError::payload_too_large(
                entry.payload_size as usize,
                MAX_PAYLOAD,
            ));
        }
        if entry.fields.len() > MAX_FIELDS {
            return Err(BtlmError::invalid_argument(
                "fields",
                format!("field table exceeds {} entries", MAX_FIELDS),
            ));
        }
        for f in entry.fields {
            if f.offset as usize + f.size as usize > entry.payload_size as usize {
                return Err(BtlmError::invalid_argument(
                    "fields",
                    format!("field '{}' extends past the payload", f.name),
                ));
            }
        }

        self.entries[entry.id as usize] = Some(entry);
        if entry.id >= self.count {
            self.count = entry.id + 1;
        }
        Ok(())
    }

    pub(crate) fn get(&self, id: u16) -> Option<&'static SchemaEntry> {
        self.entries.get(id as usize).copied().flatten()
    }

    /// Registered descriptors in ascending id order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &'static SchemaEntry> + '_ {
        self.entries[..self.count as usize]
            .iter()
            .filter_map(|e| *e)
    }
}
