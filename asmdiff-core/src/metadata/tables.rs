//! The `#~` table stream: schema, index widths and cell access.
//!
//! Every table up to `GenericParamConstraint` carries its full column
//! schema so that row sizes, and therefore the offsets of later tables,
//! can be computed even for tables the reader never decodes.

use crate::error::MetadataError;

use super::heaps::Cursor;

pub(crate) const MODULE: usize = 0x00;
pub(crate) const TYPE_REF: usize = 0x01;
pub(crate) const TYPE_DEF: usize = 0x02;
pub(crate) const FIELD: usize = 0x04;
pub(crate) const METHOD_DEF: usize = 0x06;
pub(crate) const PARAM: usize = 0x08;
pub(crate) const INTERFACE_IMPL: usize = 0x09;
pub(crate) const MEMBER_REF: usize = 0x0A;
pub(crate) const DECL_SECURITY: usize = 0x0E;
pub(crate) const STAND_ALONE_SIG: usize = 0x11;
pub(crate) const EVENT: usize = 0x14;
pub(crate) const PROPERTY_MAP: usize = 0x15;
pub(crate) const PROPERTY_PTR: usize = 0x16;
pub(crate) const PROPERTY: usize = 0x17;
pub(crate) const METHOD_SEMANTICS: usize = 0x18;
pub(crate) const MODULE_REF: usize = 0x1A;
pub(crate) const TYPE_SPEC: usize = 0x1B;
pub(crate) const ASSEMBLY: usize = 0x20;
pub(crate) const ASSEMBLY_REF: usize = 0x23;
pub(crate) const FILE: usize = 0x26;
pub(crate) const EXPORTED_TYPE: usize = 0x27;
pub(crate) const MANIFEST_RESOURCE: usize = 0x28;
pub(crate) const NESTED_CLASS: usize = 0x29;
pub(crate) const GENERIC_PARAM: usize = 0x2A;
pub(crate) const METHOD_SPEC: usize = 0x2B;
pub(crate) const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;

/// Number of tables with a known schema.
pub(crate) const TABLE_COUNT: usize = 0x2D;

const HEAP_STRINGS_WIDE: u8 = 0x01;
const HEAP_GUID_WIDE: u8 = 0x02;
const HEAP_BLOB_WIDE: u8 = 0x04;
const HEAP_EXTRA_DATA: u8 = 0x40;

/// Marks a tag value with no table behind it.
const NONE: usize = usize::MAX;

/// Coded index kinds (ECMA-335 II.24.2.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Coded {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl Coded {
    /// Tables addressed by each tag value, in tag order.
    pub(crate) fn tables(self) -> &'static [usize] {
        match self {
            Coded::TypeDefOrRef => &[TYPE_DEF, TYPE_REF, TYPE_SPEC],
            Coded::HasConstant => &[FIELD, PARAM, PROPERTY],
            Coded::HasCustomAttribute => &[
                METHOD_DEF,
                FIELD,
                TYPE_REF,
                TYPE_DEF,
                PARAM,
                INTERFACE_IMPL,
                MEMBER_REF,
                MODULE,
                DECL_SECURITY,
                PROPERTY,
                EVENT,
                STAND_ALONE_SIG,
                MODULE_REF,
                TYPE_SPEC,
                ASSEMBLY,
                ASSEMBLY_REF,
                FILE,
                EXPORTED_TYPE,
                MANIFEST_RESOURCE,
                GENERIC_PARAM,
                GENERIC_PARAM_CONSTRAINT,
                METHOD_SPEC,
            ],
            Coded::HasFieldMarshal => &[FIELD, PARAM],
            Coded::HasDeclSecurity => &[TYPE_DEF, METHOD_DEF, ASSEMBLY],
            Coded::MemberRefParent => &[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC],
            Coded::HasSemantics => &[EVENT, PROPERTY],
            Coded::MethodDefOrRef => &[METHOD_DEF, MEMBER_REF],
            Coded::MemberForwarded => &[FIELD, METHOD_DEF],
            Coded::Implementation => &[FILE, ASSEMBLY_REF, EXPORTED_TYPE],
            Coded::CustomAttributeType => &[NONE, NONE, METHOD_DEF, MEMBER_REF, NONE],
            Coded::ResolutionScope => &[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF],
            Coded::TypeOrMethodDef => &[TYPE_DEF, METHOD_DEF],
        }
    }

    pub(crate) fn tag_bits(self) -> u32 {
        match self {
            Coded::HasFieldMarshal
            | Coded::HasSemantics
            | Coded::MethodDefOrRef
            | Coded::MemberForwarded
            | Coded::TypeOrMethodDef => 1,
            Coded::TypeDefOrRef
            | Coded::HasConstant
            | Coded::HasDeclSecurity
            | Coded::Implementation
            | Coded::ResolutionScope => 2,
            Coded::MemberRefParent | Coded::CustomAttributeType => 3,
            Coded::HasCustomAttribute => 5,
        }
    }

    /// Split a coded value into `(table, zero-based row)`. Null rows and
    /// unused tags decode to `None`.
    pub(crate) fn decode(self, value: u32) -> Option<(usize, usize)> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;
        let table = *self.tables().get(tag)?;
        if table == NONE || row == 0 {
            return None;
        }
        Some((table, row as usize - 1))
    }

    /// Build a coded value from a table and a one-based row.
    #[cfg(any(test, feature = "test-support"))]
    pub(crate) fn encode(self, table: usize, row: u32) -> u32 {
        let tag = self
            .tables()
            .iter()
            .position(|t| *t == table)
            .unwrap_or_default() as u32;
        (row << self.tag_bits()) | tag
    }
}

/// A column type.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Col {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(usize),
    Coded(Coded),
}

use Col::{Blob, Guid, Index, Str, U16, U32};

const fn coded(kind: Coded) -> Col {
    Col::Coded(kind)
}

pub(crate) const SCHEMA: [&[Col]; TABLE_COUNT] = [
    // 0x00 Module
    &[U16, Str, Guid, Guid, Guid],
    // 0x01 TypeRef
    &[coded(Coded::ResolutionScope), Str, Str],
    // 0x02 TypeDef
    &[U32, Str, Str, coded(Coded::TypeDefOrRef), Index(FIELD), Index(METHOD_DEF)],
    // 0x03 FieldPtr
    &[Index(FIELD)],
    // 0x04 Field
    &[U16, Str, Blob],
    // 0x05 MethodPtr
    &[Index(METHOD_DEF)],
    // 0x06 MethodDef
    &[U32, U16, U16, Str, Blob, Index(PARAM)],
    // 0x07 ParamPtr
    &[Index(PARAM)],
    // 0x08 Param
    &[U16, U16, Str],
    // 0x09 InterfaceImpl
    &[Index(TYPE_DEF), coded(Coded::TypeDefOrRef)],
    // 0x0A MemberRef
    &[coded(Coded::MemberRefParent), Str, Blob],
    // 0x0B Constant
    &[U16, coded(Coded::HasConstant), Blob],
    // 0x0C CustomAttribute
    &[coded(Coded::HasCustomAttribute), coded(Coded::CustomAttributeType), Blob],
    // 0x0D FieldMarshal
    &[coded(Coded::HasFieldMarshal), Blob],
    // 0x0E DeclSecurity
    &[U16, coded(Coded::HasDeclSecurity), Blob],
    // 0x0F ClassLayout
    &[U16, U32, Index(TYPE_DEF)],
    // 0x10 FieldLayout
    &[U32, Index(FIELD)],
    // 0x11 StandAloneSig
    &[Blob],
    // 0x12 EventMap
    &[Index(TYPE_DEF), Index(EVENT)],
    // 0x13 EventPtr
    &[Index(EVENT)],
    // 0x14 Event
    &[U16, Str, coded(Coded::TypeDefOrRef)],
    // 0x15 PropertyMap
    &[Index(TYPE_DEF), Index(PROPERTY)],
    // 0x16 PropertyPtr
    &[Index(PROPERTY)],
    // 0x17 Property
    &[U16, Str, Blob],
    // 0x18 MethodSemantics
    &[U16, Index(METHOD_DEF), coded(Coded::HasSemantics)],
    // 0x19 MethodImpl
    &[Index(TYPE_DEF), coded(Coded::MethodDefOrRef), coded(Coded::MethodDefOrRef)],
    // 0x1A ModuleRef
    &[Str],
    // 0x1B TypeSpec
    &[Blob],
    // 0x1C ImplMap
    &[U16, coded(Coded::MemberForwarded), Str, Index(MODULE_REF)],
    // 0x1D FieldRVA
    &[U32, Index(FIELD)],
    // 0x1E EncLog
    &[U32, U32],
    // 0x1F EncMap
    &[U32],
    // 0x20 Assembly
    &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
    // 0x21 AssemblyProcessor
    &[U32],
    // 0x22 AssemblyOS
    &[U32, U32, U32],
    // 0x23 AssemblyRef
    &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
    // 0x24 AssemblyRefProcessor
    &[U32, Index(ASSEMBLY_REF)],
    // 0x25 AssemblyRefOS
    &[U32, U32, U32, Index(ASSEMBLY_REF)],
    // 0x26 File
    &[U32, Str, Blob],
    // 0x27 ExportedType
    &[U32, U32, Str, Str, coded(Coded::Implementation)],
    // 0x28 ManifestResource
    &[U32, U32, Str, coded(Coded::Implementation)],
    // 0x29 NestedClass
    &[Index(TYPE_DEF), Index(TYPE_DEF)],
    // 0x2A GenericParam
    &[U16, U16, coded(Coded::TypeOrMethodDef), Str],
    // 0x2B MethodSpec
    &[coded(Coded::MethodDefOrRef), Blob],
    // 0x2C GenericParamConstraint
    &[Index(GENERIC_PARAM), coded(Coded::TypeDefOrRef)],
];

/// Column widths derived from row counts and heap-size flags.
#[derive(Clone, Debug)]
pub(crate) struct Widths {
    rows: [u32; 64],
    heap_sizes: u8,
}

impl Widths {
    pub(crate) fn new(rows: [u32; 64], heap_sizes: u8) -> Self {
        Self { rows, heap_sizes }
    }

    pub(crate) fn column(&self, col: Col) -> usize {
        match col {
            Col::U16 => 2,
            Col::U32 => 4,
            Col::Str => self.heap(HEAP_STRINGS_WIDE),
            Col::Guid => self.heap(HEAP_GUID_WIDE),
            Col::Blob => self.heap(HEAP_BLOB_WIDE),
            Col::Index(table) => {
                if self.rows[table] < 0x1_0000 {
                    2
                } else {
                    4
                }
            }
            Col::Coded(kind) => {
                let max = kind
                    .tables()
                    .iter()
                    .filter(|t| **t != NONE)
                    .map(|t| self.rows[*t])
                    .max()
                    .unwrap_or(0);
                if max < (1u32 << (16 - kind.tag_bits())) {
                    2
                } else {
                    4
                }
            }
        }
    }

    fn heap(&self, flag: u8) -> usize {
        if self.heap_sizes & flag != 0 {
            4
        } else {
            2
        }
    }
}

#[derive(Clone, Debug, Default)]
struct TableLayout {
    offset: usize,
    row_size: usize,
    /// `(offset within row, width)` per column.
    columns: Vec<(usize, usize)>,
}

/// A parsed table stream. Cells are read lazily from the borrowed bytes.
pub(crate) struct TableStream<'a> {
    data: &'a [u8],
    rows: [u32; 64],
    layouts: Vec<TableLayout>,
}

impl<'a> TableStream<'a> {
    pub(crate) fn parse(data: &'a [u8]) -> Result<Self, MetadataError> {
        let mut cursor = Cursor::new(data, "table stream header");
        cursor.skip(4)?; // reserved
        let major = cursor.u8()?;
        let _minor = cursor.u8()?;
        if major > 2 {
            return Err(MetadataError::UnsupportedTableStream {
                message: format!("schema version {major}"),
            });
        }
        let heap_sizes = cursor.u8()?;
        cursor.skip(1)?;
        let valid = cursor.u64()?;
        let _sorted = cursor.u64()?;

        let mut rows = [0u32; 64];
        for (table, count) in rows.iter_mut().enumerate() {
            if valid & (1u64 << table) != 0 {
                *count = cursor.u32()?;
            }
        }
        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            cursor.skip(4)?;
        }

        let widths = Widths::new(rows, heap_sizes);
        let mut offset = cursor.position();
        let mut layouts = Vec::with_capacity(TABLE_COUNT);
        for (table, schema) in SCHEMA.iter().enumerate() {
            let mut columns = Vec::with_capacity(schema.len());
            let mut row_size = 0;
            for col in schema.iter() {
                let width = widths.column(*col);
                columns.push((row_size, width));
                row_size += width;
            }
            layouts.push(TableLayout {
                offset,
                row_size,
                columns,
            });
            offset += row_size * rows[table] as usize;
        }
        if offset > data.len() {
            return Err(MetadataError::Truncated {
                what: "table stream",
                offset,
            });
        }

        Ok(Self {
            data,
            rows,
            layouts,
        })
    }

    pub(crate) fn rows(&self, table: usize) -> usize {
        self.rows[table] as usize
    }

    /// Read column `col` of zero-based `row` in `table`.
    pub(crate) fn cell(&self, table: usize, row: usize, col: usize) -> Result<u32, MetadataError> {
        let layout = &self.layouts[table];
        let (col_offset, width) = layout.columns[col];
        let at = layout.offset + row * layout.row_size + col_offset;
        let mut cursor = Cursor::new(self.data.get(at..).unwrap_or_default(), "table row");
        match width {
            2 => cursor.u16().map(u32::from),
            _ => cursor.u32(),
        }
    }
}
