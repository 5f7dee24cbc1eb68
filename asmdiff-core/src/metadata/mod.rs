//! ECMA-335 metadata reader.
//!
//! Decodes just enough of a CLI image to enumerate its types, their base
//! types and interfaces, and their properties with accessor visibility.
//! Everything is copied out of the image, so a [`Metadata`] does not borrow
//! the bytes it was parsed from.

#[cfg(any(test, feature = "test-support"))]
pub mod builder;
mod heaps;
mod pe;
pub mod signature;
mod tables;

use std::fmt;

use crate::error::MetadataError;

use heaps::{BlobHeap, Cursor, StringHeap};
use tables::{Coded, TableStream};

pub use signature::TypeSig;

/// `BSJB`, little-endian.
const METADATA_SIGNATURE: u32 = 0x424A_5342;

const MEMBER_ACCESS_MASK: u16 = 0x0007;
const MEMBER_ACCESS_PUBLIC: u16 = 0x0006;
const METHOD_STATIC: u16 = 0x0010;

const SEMANTICS_SETTER: u16 = 0x0001;
const SEMANTICS_GETTER: u16 = 0x0002;

const TYPE_INTERFACE: u32 = 0x0000_0020;

/// Maximum length of a nesting or scope chain before it is treated as cyclic.
const MAX_NESTING: usize = 64;

/// A `TypeDefOrRef` token with zero-based rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeDefOrRef {
    TypeDef(usize),
    TypeRef(usize),
    TypeSpec(usize),
}

impl TypeDefOrRef {
    fn from_coded(value: u32) -> Option<Self> {
        match Coded::TypeDefOrRef.decode(value)? {
            (tables::TYPE_DEF, row) => Some(TypeDefOrRef::TypeDef(row)),
            (tables::TYPE_REF, row) => Some(TypeDefOrRef::TypeRef(row)),
            (tables::TYPE_SPEC, row) => Some(TypeDefOrRef::TypeSpec(row)),
            _ => None,
        }
    }
}

/// Where a TypeRef points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionScope {
    /// Defined in this module.
    Module,
    /// Defined in another module of the same assembly.
    ModuleRef,
    /// Defined in a referenced assembly (zero-based AssemblyRef row).
    AssemblyRef(usize),
    /// Nested inside another TypeRef.
    TypeRef(usize),
    /// Null scope: resolved through the ExportedType table, which this
    /// reader does not follow.
    Unknown,
}

/// Assembly name and version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssemblyIdentity {
    pub name: String,
    pub version: [u16; 4],
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, build, revision] = self.version;
        write!(f, "{}, Version={major}.{minor}.{build}.{revision}", self.name)
    }
}

#[derive(Clone, Debug)]
pub struct TypeRefRow {
    pub scope: ResolutionScope,
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default)]
pub struct TypeDefRow {
    pub flags: u32,
    pub name: String,
    pub namespace: String,
    pub extends: Option<TypeDefOrRef>,
    /// Zero-based Property rows in declaration order.
    pub properties: Vec<usize>,
    pub interfaces: Vec<TypeDefOrRef>,
    /// Zero-based TypeDef row of the enclosing type.
    pub enclosing: Option<usize>,
}

impl TypeDefRow {
    pub fn is_interface(&self) -> bool {
        self.flags & TYPE_INTERFACE != 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct PropertyRow {
    pub name: String,
    pub signature: Vec<u8>,
    /// At least one getter or setter is public.
    pub is_public: bool,
    /// An accessor is static.
    pub is_static: bool,
}

/// The decoded metadata of one module.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    pub assembly: Option<AssemblyIdentity>,
    pub module_name: String,
    pub assembly_refs: Vec<AssemblyIdentity>,
    pub type_refs: Vec<TypeRefRow>,
    pub type_defs: Vec<TypeDefRow>,
    pub properties: Vec<PropertyRow>,
    pub type_specs: Vec<Vec<u8>>,
}

impl Metadata {
    /// Parse a PE image (`MZ`) or a standalone metadata image (`BSJB`).
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let root = if bytes.starts_with(&METADATA_SIGNATURE.to_le_bytes()) {
            bytes
        } else if bytes.starts_with(b"MZ") {
            pe::metadata_root(bytes)?
        } else {
            return Err(MetadataError::BadSignature);
        };

        let streams = read_streams(root)?;
        let find = |names: &[&str]| {
            streams
                .iter()
                .find(|(name, _)| names.iter().any(|n| n.as_bytes() == *name))
                .map(|(_, data)| *data)
        };

        let strings = StringHeap::new(find(&["#Strings"]).ok_or(MetadataError::MissingStream {
            name: "#Strings",
        })?);
        let blobs = BlobHeap::new(find(&["#Blob"]).unwrap_or_default());
        let table_data = find(&["#~", "#-"]).ok_or(MetadataError::MissingStream { name: "#~" })?;
        let tables = TableStream::parse(table_data)?;

        Decoder {
            tables: &tables,
            strings: &strings,
            blobs: &blobs,
        }
        .decode()
    }

    /// The assembly's simple name, or the module name without extension for
    /// modules that carry no Assembly row.
    pub fn assembly_name(&self) -> &str {
        match &self.assembly {
            Some(identity) => &identity.name,
            None => self
                .module_name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(&self.module_name),
        }
    }

    /// `true` for the `<Module>` pseudo-type holding global members.
    pub fn is_module_type(&self, index: usize) -> bool {
        self.type_defs
            .get(index)
            .map(|t| t.name == "<Module>" && t.namespace.is_empty())
            .unwrap_or(false)
    }

    /// `Namespace.Outer+Inner` for a TypeDef row.
    pub fn type_def_full_name(&self, index: usize) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = index;
        for _ in 0..MAX_NESTING {
            let row = self.type_defs.get(current)?;
            match row.enclosing {
                Some(outer) => {
                    parts.push(row.name.as_str());
                    current = outer;
                }
                None => return Some(join_nested(&row.namespace, &row.name, &parts)),
            }
        }
        None
    }

    /// `Namespace.Outer+Inner` for a TypeRef row.
    pub fn type_ref_full_name(&self, index: usize) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = index;
        for _ in 0..MAX_NESTING {
            let row = self.type_refs.get(current)?;
            match row.scope {
                ResolutionScope::TypeRef(outer) => {
                    parts.push(row.name.as_str());
                    current = outer;
                }
                _ => return Some(join_nested(&row.namespace, &row.name, &parts)),
            }
        }
        None
    }

    /// Name of the assembly a TypeRef points into. References scoped to this
    /// module resolve to this assembly; unknown scopes yield `None`.
    pub fn type_ref_assembly(&self, index: usize) -> Option<&str> {
        let mut current = index;
        for _ in 0..MAX_NESTING {
            match self.type_refs.get(current)?.scope {
                ResolutionScope::TypeRef(outer) => current = outer,
                ResolutionScope::AssemblyRef(a) => {
                    return self.assembly_refs.get(a).map(|r| r.name.as_str())
                }
                ResolutionScope::Module | ResolutionScope::ModuleRef => {
                    return Some(self.assembly_name())
                }
                ResolutionScope::Unknown => return None,
            }
        }
        None
    }

    /// Find a TypeDef by full name.
    pub fn find_type_def(&self, full_name: &str) -> Option<usize> {
        (0..self.type_defs.len()).find(|i| self.type_def_full_name(*i).as_deref() == Some(full_name))
    }
}

fn join_nested(namespace: &str, outermost: &str, inner: &[&str]) -> String {
    let mut name = if namespace.is_empty() {
        outermost.to_string()
    } else {
        format!("{namespace}.{outermost}")
    };
    for part in inner.iter().rev() {
        name.push('+');
        name.push_str(part);
    }
    name
}

/// Parse the metadata root and return `(name, data)` per stream.
fn read_streams(root: &[u8]) -> Result<Vec<(&[u8], &[u8])>, MetadataError> {
    let mut cursor = Cursor::new(root, "metadata root");
    if cursor.u32()? != METADATA_SIGNATURE {
        return Err(MetadataError::BadSignature);
    }
    cursor.skip(8)?; // major, minor, reserved
    let version_len = cursor.u32()? as usize;
    cursor.skip(version_len)?;
    cursor.skip(2)?; // flags
    let count = cursor.u16()?;

    let mut streams = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = cursor.u32()? as usize;
        let size = cursor.u32()? as usize;
        let name = cursor.cstr()?;
        cursor.align4()?;
        let data = root
            .get(offset..offset.saturating_add(size))
            .ok_or(MetadataError::Truncated {
                what: "metadata stream",
                offset,
            })?;
        streams.push((name, data));
    }
    Ok(streams)
}

struct Decoder<'a, 'b> {
    tables: &'b TableStream<'a>,
    strings: &'b StringHeap<'a>,
    blobs: &'b BlobHeap<'a>,
}

impl Decoder<'_, '_> {
    fn cell(&self, table: usize, row: usize, col: usize) -> Result<u32, MetadataError> {
        self.tables.cell(table, row, col)
    }

    fn string(&self, table: usize, row: usize, col: usize) -> Result<String, MetadataError> {
        self.strings.get(self.cell(table, row, col)?)
    }

    fn blob(&self, table: usize, row: usize, col: usize) -> Result<Vec<u8>, MetadataError> {
        Ok(self.blobs.get(self.cell(table, row, col)?)?.to_vec())
    }

    fn decode(&self) -> Result<Metadata, MetadataError> {
        use tables::*;

        let module_name = if self.tables.rows(MODULE) > 0 {
            self.string(MODULE, 0, 1)?
        } else {
            String::new()
        };

        let assembly = if self.tables.rows(ASSEMBLY) > 0 {
            Some(self.identity(ASSEMBLY, 0, 1, 7)?)
        } else {
            None
        };

        let assembly_refs = (0..self.tables.rows(ASSEMBLY_REF))
            .map(|row| self.identity(ASSEMBLY_REF, row, 0, 6))
            .collect::<Result<Vec<_>, _>>()?;

        let type_refs = (0..self.tables.rows(TYPE_REF))
            .map(|row| -> Result<TypeRefRow, MetadataError> {
                let scope = match Coded::ResolutionScope.decode(self.cell(TYPE_REF, row, 0)?) {
                    Some((MODULE, _)) => ResolutionScope::Module,
                    Some((MODULE_REF, _)) => ResolutionScope::ModuleRef,
                    Some((ASSEMBLY_REF, r)) => ResolutionScope::AssemblyRef(r),
                    Some((TYPE_REF, r)) => ResolutionScope::TypeRef(r),
                    _ => ResolutionScope::Unknown,
                };
                Ok(TypeRefRow {
                    scope,
                    name: self.string(TYPE_REF, row, 1)?,
                    namespace: self.string(TYPE_REF, row, 2)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut type_defs = (0..self.tables.rows(TYPE_DEF))
            .map(|row| -> Result<TypeDefRow, MetadataError> {
                Ok(TypeDefRow {
                    flags: self.cell(TYPE_DEF, row, 0)?,
                    name: self.string(TYPE_DEF, row, 1)?,
                    namespace: self.string(TYPE_DEF, row, 2)?,
                    extends: TypeDefOrRef::from_coded(self.cell(TYPE_DEF, row, 3)?),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut properties = (0..self.tables.rows(PROPERTY))
            .map(|row| -> Result<PropertyRow, MetadataError> {
                Ok(PropertyRow {
                    name: self.string(PROPERTY, row, 1)?,
                    signature: self.blob(PROPERTY, row, 2)?,
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.assign_properties(&mut type_defs, properties.len())?;
        self.mark_accessors(&mut properties)?;

        for row in 0..self.tables.rows(INTERFACE_IMPL) {
            let class = self.cell(INTERFACE_IMPL, row, 0)? as usize;
            let interface = TypeDefOrRef::from_coded(self.cell(INTERFACE_IMPL, row, 1)?);
            if let (Some(owner), Some(interface)) =
                (class.checked_sub(1).and_then(|c| type_defs.get_mut(c)), interface)
            {
                owner.interfaces.push(interface);
            }
        }

        for row in 0..self.tables.rows(NESTED_CLASS) {
            let nested = self.cell(NESTED_CLASS, row, 0)? as usize;
            let enclosing = self.cell(NESTED_CLASS, row, 1)? as usize;
            if let (Some(inner), Some(outer)) = (
                nested.checked_sub(1).and_then(|n| type_defs.get_mut(n)),
                enclosing.checked_sub(1),
            ) {
                inner.enclosing = Some(outer);
            }
        }

        let type_specs = (0..self.tables.rows(TYPE_SPEC))
            .map(|row| self.blob(TYPE_SPEC, row, 0))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Metadata {
            assembly,
            module_name,
            assembly_refs,
            type_refs,
            type_defs,
            properties,
            type_specs,
        })
    }

    /// Read `(version x4, name)` starting at the given columns.
    fn identity(
        &self,
        table: usize,
        row: usize,
        version_col: usize,
        name_col: usize,
    ) -> Result<AssemblyIdentity, MetadataError> {
        let mut version = [0u16; 4];
        for (i, part) in version.iter_mut().enumerate() {
            *part = self.cell(table, row, version_col + i)? as u16;
        }
        Ok(AssemblyIdentity {
            name: self.string(table, row, name_col)?,
            version,
        })
    }

    /// Distribute property runs from the PropertyMap table onto their owners.
    fn assign_properties(
        &self,
        type_defs: &mut [TypeDefRow],
        property_count: usize,
    ) -> Result<(), MetadataError> {
        use tables::{PROPERTY_MAP, PROPERTY_PTR};

        let map_rows = self.tables.rows(PROPERTY_MAP);
        let indirect = self.tables.rows(PROPERTY_PTR) > 0;
        let run_end = if indirect {
            self.tables.rows(PROPERTY_PTR)
        } else {
            property_count
        };

        for row in 0..map_rows {
            let parent = self.cell(PROPERTY_MAP, row, 0)? as usize;
            let start = (self.cell(PROPERTY_MAP, row, 1)? as usize).max(1) - 1;
            let end = if row + 1 < map_rows {
                (self.cell(PROPERTY_MAP, row + 1, 1)? as usize).max(1) - 1
            } else {
                run_end
            };
            let Some(owner) = parent.checked_sub(1).and_then(|p| type_defs.get_mut(p)) else {
                continue;
            };
            for slot in start..end.min(run_end) {
                let property = if indirect {
                    (self.cell(PROPERTY_PTR, slot, 0)? as usize).saturating_sub(1)
                } else {
                    slot
                };
                if property < property_count {
                    owner.properties.push(property);
                }
            }
        }
        Ok(())
    }

    /// Derive property visibility from getter and setter flags.
    fn mark_accessors(&self, properties: &mut [PropertyRow]) -> Result<(), MetadataError> {
        use tables::{METHOD_DEF, METHOD_SEMANTICS, PROPERTY};

        for row in 0..self.tables.rows(METHOD_SEMANTICS) {
            let semantics = self.cell(METHOD_SEMANTICS, row, 0)? as u16;
            if semantics & (SEMANTICS_GETTER | SEMANTICS_SETTER) == 0 {
                continue;
            }
            let method = self.cell(METHOD_SEMANTICS, row, 1)? as usize;
            let Some((PROPERTY, property)) =
                Coded::HasSemantics.decode(self.cell(METHOD_SEMANTICS, row, 2)?)
            else {
                continue;
            };
            let Some(method_row) = method.checked_sub(1) else {
                continue;
            };
            if method_row >= self.tables.rows(METHOD_DEF) {
                continue;
            }
            let flags = self.cell(METHOD_DEF, method_row, 2)? as u16;
            if let Some(target) = properties.get_mut(property) {
                target.is_public |= flags & MEMBER_ACCESS_MASK == MEMBER_ACCESS_PUBLIC;
                target.is_static |= flags & METHOD_STATIC != 0;
            }
        }
        Ok(())
    }
}
