//! Writer for standalone (`BSJB`) metadata images.
//!
//! Produces the smallest table set the reader needs to enumerate types and
//! properties: Module, TypeRef, TypeDef, MethodDef (property getters),
//! InterfaceImpl, PropertyMap, Property, MethodSemantics, TypeSpec,
//! Assembly, AssemblyRef and NestedClass. Useful for fixtures that must not
//! depend on a .NET toolchain. Only built with the `test-support` feature.
//!
//! ```
//! use asmdiff_core::metadata::builder::{MetadataBuilder, SigType};
//! use asmdiff_core::metadata::Metadata;
//!
//! let mut builder = MetadataBuilder::new("Shop");
//! let order = builder.add_type("Shop", "Order");
//! builder.property(order, "Total", SigType::R8);
//!
//! let metadata = Metadata::parse(&builder.build()).unwrap();
//! assert_eq!(metadata.assembly_name(), "Shop");
//! ```

use std::collections::HashMap;

use super::heaps::write_compressed;
use super::tables::{
    Coded, Widths, ASSEMBLY, ASSEMBLY_REF, INTERFACE_IMPL, METHOD_DEF, METHOD_SEMANTICS, MODULE,
    NESTED_CLASS, PROPERTY, PROPERTY_MAP, SCHEMA, TABLE_COUNT, TYPE_DEF, TYPE_REF, TYPE_SPEC,
};

const TYPE_PUBLIC: u32 = 0x0000_0001;
const TYPE_NESTED_PUBLIC: u32 = 0x0000_0002;
const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;
const TYPE_INTERFACE: u32 = 0x0000_0020;
const TYPE_ABSTRACT: u32 = 0x0000_0080;
const TYPE_BEFORE_FIELD_INIT: u32 = 0x0010_0000;

const METHOD_PRIVATE: u16 = 0x0001;
const METHOD_PUBLIC: u16 = 0x0006;
const METHOD_STATIC: u16 = 0x0010;
const METHOD_HIDE_BY_SIG: u16 = 0x0080;
const METHOD_SPECIAL_NAME: u16 = 0x0800;

const SEMANTICS_GETTER: u32 = 0x0002;
const HASH_ALGORITHM_SHA1: u32 = 0x8004;
const RUNTIME_VERSION: &[u8] = b"v4.0.30319";
const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

/// Handle to a type added to, or referenced by, the image under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeToken {
    /// A type defined in this image.
    Def(usize),
    /// A type in a referenced assembly.
    Ref(usize),
    /// A generic instantiation created with [`MetadataBuilder::generic_instance`].
    Spec(usize),
}

impl TypeToken {
    fn table_row(self) -> (usize, u32) {
        match self {
            // Row 1 is `<Module>`.
            TypeToken::Def(i) => (TYPE_DEF, i as u32 + 2),
            TypeToken::Ref(i) => (TYPE_REF, i as u32 + 1),
            TypeToken::Spec(i) => (TYPE_SPEC, i as u32 + 1),
        }
    }

    fn encode_sig(self, out: &mut Vec<u8>) {
        let (table, row) = self.table_row();
        let tag = match table {
            TYPE_DEF => 0,
            TYPE_REF => 1,
            _ => 2,
        };
        write_compressed(out, (row << 2) | tag);
    }
}

/// Property and generic argument types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigType {
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Object,
    IntPtr,
    Class(TypeToken),
    ValueType(TypeToken),
    SzArray(Box<SigType>),
    Array { element: Box<SigType>, rank: u32 },
    Pointer(Box<SigType>),
    GenericInst {
        base: TypeToken,
        value_type: bool,
        args: Vec<SigType>,
    },
    Var(u32),
    MVar(u32),
}

impl SigType {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            SigType::Bool => out.push(0x02),
            SigType::Char => out.push(0x03),
            SigType::I1 => out.push(0x04),
            SigType::U1 => out.push(0x05),
            SigType::I2 => out.push(0x06),
            SigType::U2 => out.push(0x07),
            SigType::I4 => out.push(0x08),
            SigType::U4 => out.push(0x09),
            SigType::I8 => out.push(0x0A),
            SigType::U8 => out.push(0x0B),
            SigType::R4 => out.push(0x0C),
            SigType::R8 => out.push(0x0D),
            SigType::String => out.push(0x0E),
            SigType::Object => out.push(0x1C),
            SigType::IntPtr => out.push(0x18),
            SigType::Class(token) => {
                out.push(0x12);
                token.encode_sig(out);
            }
            SigType::ValueType(token) => {
                out.push(0x11);
                token.encode_sig(out);
            }
            SigType::SzArray(element) => {
                out.push(0x1D);
                element.encode(out);
            }
            SigType::Array { element, rank } => {
                out.push(0x14);
                element.encode(out);
                write_compressed(out, *rank);
                write_compressed(out, 0);
                write_compressed(out, 0);
            }
            SigType::Pointer(element) => {
                out.push(0x0F);
                element.encode(out);
            }
            SigType::GenericInst {
                base,
                value_type,
                args,
            } => {
                out.push(0x15);
                out.push(if *value_type { 0x11 } else { 0x12 });
                base.encode_sig(out);
                write_compressed(out, args.len() as u32);
                for arg in args {
                    arg.encode(out);
                }
            }
            SigType::Var(n) => {
                out.push(0x13);
                write_compressed(out, *n);
            }
            SigType::MVar(n) => {
                out.push(0x1E);
                write_compressed(out, *n);
            }
        }
    }
}

#[derive(Debug)]
struct PropertyEntry {
    name: String,
    sig: SigType,
    access: u16,
    is_static: bool,
}

#[derive(Debug)]
struct TypeEntry {
    namespace: String,
    name: String,
    flags: u32,
    extends: Option<TypeToken>,
    interfaces: Vec<TypeToken>,
    properties: Vec<PropertyEntry>,
    enclosing: Option<usize>,
}

#[derive(Debug)]
struct TypeRefEntry {
    assembly_ref: usize,
    namespace: String,
    name: String,
}

/// Builds a metadata image in memory.
#[derive(Debug)]
pub struct MetadataBuilder {
    assembly: String,
    version: [u16; 4],
    assembly_refs: Vec<String>,
    type_refs: Vec<TypeRefEntry>,
    types: Vec<TypeEntry>,
    type_specs: Vec<SigType>,
}

impl MetadataBuilder {
    pub fn new(assembly: impl Into<String>) -> Self {
        Self {
            assembly: assembly.into(),
            version: [1, 0, 0, 0],
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            types: Vec::new(),
            type_specs: Vec::new(),
        }
    }

    pub fn version(&mut self, version: [u16; 4]) -> &mut Self {
        self.version = version;
        self
    }

    /// Reference another assembly; returns its handle for [`type_ref`](Self::type_ref).
    pub fn assembly_ref(&mut self, name: impl Into<String>) -> usize {
        self.assembly_refs.push(name.into());
        self.assembly_refs.len() - 1
    }

    pub fn type_ref(
        &mut self,
        assembly_ref: usize,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> TypeToken {
        self.type_refs.push(TypeRefEntry {
            assembly_ref,
            namespace: namespace.into(),
            name: name.into(),
        });
        TypeToken::Ref(self.type_refs.len() - 1)
    }

    /// Define a public class.
    pub fn add_type(&mut self, namespace: impl Into<String>, name: impl Into<String>) -> TypeToken {
        self.define(namespace.into(), name.into(), TYPE_PUBLIC | TYPE_BEFORE_FIELD_INIT)
    }

    /// Define a public interface.
    pub fn add_interface(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> TypeToken {
        self.define(
            namespace.into(),
            name.into(),
            TYPE_PUBLIC | TYPE_INTERFACE | TYPE_ABSTRACT,
        )
    }

    fn define(&mut self, namespace: String, name: String, flags: u32) -> TypeToken {
        self.types.push(TypeEntry {
            namespace,
            name,
            flags,
            extends: None,
            interfaces: Vec::new(),
            properties: Vec::new(),
            enclosing: None,
        });
        TypeToken::Def(self.types.len() - 1)
    }

    /// Instantiate a generic type for use as a base type or interface.
    pub fn generic_instance(&mut self, base: TypeToken, args: Vec<SigType>) -> TypeToken {
        self.type_specs.push(SigType::GenericInst {
            base,
            value_type: false,
            args,
        });
        TypeToken::Spec(self.type_specs.len() - 1)
    }

    fn entry(&mut self, ty: TypeToken) -> Option<&mut TypeEntry> {
        match ty {
            TypeToken::Def(i) => self.types.get_mut(i),
            _ => None,
        }
    }

    pub fn extends(&mut self, ty: TypeToken, base: TypeToken) {
        if let Some(entry) = self.entry(ty) {
            entry.extends = Some(base);
        }
    }

    pub fn implements(&mut self, ty: TypeToken, interface: TypeToken) {
        if let Some(entry) = self.entry(ty) {
            entry.interfaces.push(interface);
        }
    }

    /// Make `ty` a public nested type of `outer`.
    pub fn nested_in(&mut self, ty: TypeToken, outer: TypeToken) {
        let TypeToken::Def(outer) = outer else {
            return;
        };
        if let Some(entry) = self.entry(ty) {
            entry.enclosing = Some(outer);
            entry.flags = (entry.flags & !TYPE_VISIBILITY_MASK) | TYPE_NESTED_PUBLIC;
        }
    }

    /// Instance property with a public getter.
    pub fn property(&mut self, ty: TypeToken, name: impl Into<String>, sig: SigType) {
        self.add_property(ty, name.into(), sig, METHOD_PUBLIC, false);
    }

    /// Instance property whose getter is private.
    pub fn private_property(&mut self, ty: TypeToken, name: impl Into<String>, sig: SigType) {
        self.add_property(ty, name.into(), sig, METHOD_PRIVATE, false);
    }

    /// Static property with a public getter.
    pub fn static_property(&mut self, ty: TypeToken, name: impl Into<String>, sig: SigType) {
        self.add_property(ty, name.into(), sig, METHOD_PUBLIC, true);
    }

    fn add_property(&mut self, ty: TypeToken, name: String, sig: SigType, access: u16, is_static: bool) {
        if let Some(entry) = self.entry(ty) {
            entry.properties.push(PropertyEntry {
                name,
                sig,
                access,
                is_static,
            });
        }
    }

    /// Serialize the image.
    pub fn build(&self) -> Vec<u8> {
        let mut heaps = Heaps::new();
        let mut tables: Vec<Vec<Vec<u32>>> = vec![Vec::new(); TABLE_COUNT];

        let module_name = format!("{}.dll", self.assembly);
        tables[MODULE].push(vec![0, heaps.string(&module_name), 1, 0, 0]);

        for entry in &self.type_refs {
            let scope = Coded::ResolutionScope.encode(ASSEMBLY_REF, entry.assembly_ref as u32 + 1);
            tables[TYPE_REF].push(vec![
                scope,
                heaps.string(&entry.name),
                heaps.string(&entry.namespace),
            ]);
        }

        tables[TYPE_DEF].push(vec![0, heaps.string("<Module>"), heaps.string(""), 0, 1, 1]);

        let mut method_row = 1u32;
        let mut property_row = 1u32;
        for (index, entry) in self.types.iter().enumerate() {
            let type_row = index as u32 + 2;
            let extends = entry
                .extends
                .map(|base| {
                    let (table, row) = base.table_row();
                    Coded::TypeDefOrRef.encode(table, row)
                })
                .unwrap_or(0);
            tables[TYPE_DEF].push(vec![
                entry.flags,
                heaps.string(&entry.name),
                heaps.string(&entry.namespace),
                extends,
                1,
                method_row,
            ]);

            for interface in &entry.interfaces {
                let (table, row) = interface.table_row();
                tables[INTERFACE_IMPL].push(vec![type_row, Coded::TypeDefOrRef.encode(table, row)]);
            }

            if !entry.properties.is_empty() {
                tables[PROPERTY_MAP].push(vec![type_row, property_row]);
            }
            for property in &entry.properties {
                let mut type_sig = Vec::new();
                property.sig.encode(&mut type_sig);

                let has_this = if property.is_static { 0x00 } else { 0x20 };
                let mut property_sig = vec![0x08 | has_this, 0x00];
                property_sig.extend_from_slice(&type_sig);
                let mut method_sig = vec![has_this, 0x00];
                method_sig.extend_from_slice(&type_sig);

                let mut flags = property.access | METHOD_HIDE_BY_SIG | METHOD_SPECIAL_NAME;
                if property.is_static {
                    flags |= METHOD_STATIC;
                }
                tables[METHOD_DEF].push(vec![
                    0,
                    0,
                    u32::from(flags),
                    heaps.string(&format!("get_{}", property.name)),
                    heaps.blob(&method_sig),
                    1,
                ]);
                tables[PROPERTY].push(vec![0, heaps.string(&property.name), heaps.blob(&property_sig)]);
                tables[METHOD_SEMANTICS].push(vec![
                    SEMANTICS_GETTER,
                    method_row,
                    Coded::HasSemantics.encode(PROPERTY, property_row),
                ]);
                method_row += 1;
                property_row += 1;
            }
        }

        for spec in &self.type_specs {
            let mut blob = Vec::new();
            spec.encode(&mut blob);
            tables[TYPE_SPEC].push(vec![heaps.blob(&blob)]);
        }

        let [major, minor, build, revision] = self.version;
        tables[ASSEMBLY].push(vec![
            HASH_ALGORITHM_SHA1,
            u32::from(major),
            u32::from(minor),
            u32::from(build),
            u32::from(revision),
            0,
            0,
            heaps.string(&self.assembly),
            0,
        ]);

        for name in &self.assembly_refs {
            tables[ASSEMBLY_REF].push(vec![4, 0, 0, 0, 0, 0, heaps.string(name), 0, 0]);
        }

        for (index, entry) in self.types.iter().enumerate() {
            if let Some(outer) = entry.enclosing {
                tables[NESTED_CLASS].push(vec![index as u32 + 2, outer as u32 + 2]);
            }
        }

        let table_stream = encode_tables(&tables, &heaps);
        encode_root(&[
            ("#~", table_stream),
            ("#Strings", heaps.strings),
            ("#GUID", vec![0u8; 16]),
            ("#Blob", heaps.blobs),
        ])
    }
}

struct Heaps {
    strings: Vec<u8>,
    interned: HashMap<String, u32>,
    blobs: Vec<u8>,
}

impl Heaps {
    fn new() -> Self {
        Self {
            strings: vec![0],
            interned: HashMap::new(),
            blobs: vec![0],
        }
    }

    fn string(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.interned.get(value) {
            return *offset;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        self.interned.insert(value.to_string(), offset);
        offset
    }

    fn blob(&mut self, value: &[u8]) -> u32 {
        let offset = self.blobs.len() as u32;
        write_compressed(&mut self.blobs, value.len() as u32);
        self.blobs.extend_from_slice(value);
        offset
    }

    fn size_flags(&self) -> u8 {
        let mut flags = 0;
        if self.strings.len() > 0xFFFF {
            flags |= 0x01;
        }
        if self.blobs.len() > 0xFFFF {
            flags |= 0x04;
        }
        flags
    }
}

fn encode_tables(tables: &[Vec<Vec<u32>>], heaps: &Heaps) -> Vec<u8> {
    let mut rows = [0u32; 64];
    let mut valid = 0u64;
    for (id, table) in tables.iter().enumerate() {
        rows[id] = table.len() as u32;
        if !table.is_empty() {
            valid |= 1 << id;
        }
    }
    let heap_sizes = heaps.size_flags();
    let widths = Widths::new(rows, heap_sizes);

    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&[2, 0, heap_sizes, 1]);
    out.extend_from_slice(&valid.to_le_bytes());
    out.extend_from_slice(&(SORTED_TABLES & valid).to_le_bytes());
    for count in rows.iter().filter(|c| **c > 0) {
        out.extend_from_slice(&count.to_le_bytes());
    }
    for (id, table) in tables.iter().enumerate() {
        for row in table {
            for (col, value) in SCHEMA[id].iter().zip(row) {
                match widths.column(*col) {
                    2 => out.extend_from_slice(&(*value as u16).to_le_bytes()),
                    _ => out.extend_from_slice(&value.to_le_bytes()),
                }
            }
        }
    }
    pad4(&mut out);
    out
}

fn encode_root(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut version = RUNTIME_VERSION.to_vec();
    version.push(0);
    pad4(&mut version);

    let headers_len: usize = streams
        .iter()
        .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
        .sum();
    let mut offset = 16 + version.len() + 4 + headers_len;

    let mut out = Vec::new();
    out.extend_from_slice(&0x424A_5342u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(version.len() as u32).to_le_bytes());
    out.extend_from_slice(&version);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(streams.len() as u16).to_le_bytes());

    let mut bodies = Vec::new();
    for (name, data) in streams {
        let mut body = data.clone();
        pad4(&mut body);
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        let mut padded_name = name.as_bytes().to_vec();
        padded_name.push(0);
        pad4(&mut padded_name);
        out.extend_from_slice(&padded_name);
        offset += body.len();
        bodies.push(body);
    }
    for body in bodies {
        out.extend_from_slice(&body);
    }
    out
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}
