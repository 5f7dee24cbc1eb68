//! Type signatures (ECMA-335 II.23.2) and their rendering as type names.

use super::heaps::read_compressed;
use super::{Metadata, TypeDefOrRef};

const ELEMENT_TYPE_VOID: u8 = 0x01;
const ELEMENT_TYPE_PTR: u8 = 0x0F;
const ELEMENT_TYPE_BYREF: u8 = 0x10;
const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_VAR: u8 = 0x13;
const ELEMENT_TYPE_ARRAY: u8 = 0x14;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
const ELEMENT_TYPE_TYPEDBYREF: u8 = 0x16;
const ELEMENT_TYPE_I: u8 = 0x18;
const ELEMENT_TYPE_U: u8 = 0x19;
const ELEMENT_TYPE_FNPTR: u8 = 0x1B;
const ELEMENT_TYPE_OBJECT: u8 = 0x1C;
const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
const ELEMENT_TYPE_MVAR: u8 = 0x1E;
const ELEMENT_TYPE_CMOD_REQD: u8 = 0x1F;
const ELEMENT_TYPE_CMOD_OPT: u8 = 0x20;
const ELEMENT_TYPE_SENTINEL: u8 = 0x41;
const ELEMENT_TYPE_PINNED: u8 = 0x45;

const SIG_PROPERTY: u8 = 0x08;
const SIG_HASTHIS: u8 = 0x20;

/// Nesting bound for signatures and TypeSpec indirection.
const MAX_DEPTH: usize = 32;

/// Highest array rank the runtime accepts.
const MAX_ARRAY_RANK: u32 = 32;

/// A decoded type signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeSig {
    /// Built-in type, carried as its `System.*` full name.
    Primitive(&'static str),
    /// `CLASS` or `VALUETYPE` token.
    Named(TypeDefOrRef),
    SzArray(Box<TypeSig>),
    Array { element: Box<TypeSig>, rank: u32 },
    Pointer(Box<TypeSig>),
    ByRef(Box<TypeSig>),
    GenericInst { base: TypeDefOrRef, args: Vec<TypeSig> },
    /// Generic parameter of the enclosing type.
    Var(u32),
    /// Generic parameter of a method.
    MVar(u32),
    FnPtr,
}

fn primitive(code: u8) -> Option<&'static str> {
    Some(match code {
        ELEMENT_TYPE_VOID => "System.Void",
        0x02 => "System.Boolean",
        0x03 => "System.Char",
        0x04 => "System.SByte",
        0x05 => "System.Byte",
        0x06 => "System.Int16",
        0x07 => "System.UInt16",
        0x08 => "System.Int32",
        0x09 => "System.UInt32",
        0x0A => "System.Int64",
        0x0B => "System.UInt64",
        0x0C => "System.Single",
        0x0D => "System.Double",
        0x0E => "System.String",
        ELEMENT_TYPE_TYPEDBYREF => "System.TypedReference",
        ELEMENT_TYPE_I => "System.IntPtr",
        ELEMENT_TYPE_U => "System.UIntPtr",
        ELEMENT_TYPE_OBJECT => "System.Object",
        _ => return None,
    })
}

struct SigReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SigReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn byte(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn compressed(&mut self) -> Option<u32> {
        read_compressed(self.data, &mut self.pos)
    }

    fn type_def_or_ref(&mut self) -> Option<TypeDefOrRef> {
        let value = self.compressed()?;
        let row = (value >> 2) as usize;
        if row == 0 {
            return None;
        }
        match value & 0x3 {
            0 => Some(TypeDefOrRef::TypeDef(row - 1)),
            1 => Some(TypeDefOrRef::TypeRef(row - 1)),
            2 => Some(TypeDefOrRef::TypeSpec(row - 1)),
            _ => None,
        }
    }

    fn skip_custom_mods(&mut self) -> Option<()> {
        while matches!(
            self.peek(),
            Some(ELEMENT_TYPE_CMOD_REQD | ELEMENT_TYPE_CMOD_OPT)
        ) {
            self.pos += 1;
            self.type_def_or_ref()?;
        }
        Some(())
    }

    fn type_sig(&mut self, depth: usize) -> Option<TypeSig> {
        if depth > MAX_DEPTH {
            return None;
        }
        self.skip_custom_mods()?;
        let code = self.byte()?;
        if let Some(name) = primitive(code) {
            return Some(TypeSig::Primitive(name));
        }
        match code {
            ELEMENT_TYPE_PTR => Some(TypeSig::Pointer(Box::new(self.type_sig(depth + 1)?))),
            ELEMENT_TYPE_BYREF => Some(TypeSig::ByRef(Box::new(self.type_sig(depth + 1)?))),
            ELEMENT_TYPE_VALUETYPE | ELEMENT_TYPE_CLASS => {
                Some(TypeSig::Named(self.type_def_or_ref()?))
            }
            ELEMENT_TYPE_VAR => Some(TypeSig::Var(self.compressed()?)),
            ELEMENT_TYPE_MVAR => Some(TypeSig::MVar(self.compressed()?)),
            ELEMENT_TYPE_SZARRAY => Some(TypeSig::SzArray(Box::new(self.type_sig(depth + 1)?))),
            ELEMENT_TYPE_ARRAY => {
                let element = self.type_sig(depth + 1)?;
                let rank = self.compressed()?;
                if rank > MAX_ARRAY_RANK {
                    return None;
                }
                let sizes = self.compressed()?;
                for _ in 0..sizes {
                    self.compressed()?;
                }
                let bounds = self.compressed()?;
                for _ in 0..bounds {
                    self.compressed()?;
                }
                Some(TypeSig::Array {
                    element: Box::new(element),
                    rank,
                })
            }
            ELEMENT_TYPE_GENERICINST => {
                let kind = self.byte()?;
                if kind != ELEMENT_TYPE_CLASS && kind != ELEMENT_TYPE_VALUETYPE {
                    return None;
                }
                let base = self.type_def_or_ref()?;
                let count = self.compressed()?;
                let args = (0..count)
                    .map(|_| self.type_sig(depth + 1))
                    .collect::<Option<Vec<_>>>()?;
                Some(TypeSig::GenericInst { base, args })
            }
            // The method signature behind a function pointer is never rendered.
            ELEMENT_TYPE_FNPTR => Some(TypeSig::FnPtr),
            ELEMENT_TYPE_PINNED | ELEMENT_TYPE_SENTINEL => self.type_sig(depth + 1),
            _ => None,
        }
    }
}

/// Decode the type carried by a property signature blob.
pub fn decode_property_type(blob: &[u8]) -> Option<TypeSig> {
    let mut reader = SigReader::new(blob);
    let header = reader.byte()?;
    if header & !SIG_HASTHIS != SIG_PROPERTY {
        return None;
    }
    let _params = reader.compressed()?;
    reader.type_sig(0)
}

/// Decode a TypeSpec blob.
pub fn decode_type_spec(blob: &[u8]) -> Option<TypeSig> {
    SigReader::new(blob).type_sig(0)
}

impl TypeSig {
    /// Render as a reflection-style full name without assembly
    /// qualification. `generic_args` substitutes `Var(n)`; `None` marks an
    /// argument that could not be rendered. Returns `None` when any part of
    /// the type is unresolvable.
    pub fn render(&self, metadata: &Metadata, generic_args: &[Option<String>]) -> Option<String> {
        self.render_at(metadata, generic_args, 0)
    }

    fn render_at(
        &self,
        metadata: &Metadata,
        generic_args: &[Option<String>],
        depth: usize,
    ) -> Option<String> {
        if depth > MAX_DEPTH {
            return None;
        }
        let next = depth + 1;
        match self {
            TypeSig::Primitive(name) => Some((*name).to_string()),
            TypeSig::Named(token) => render_token(metadata, *token, generic_args, next),
            TypeSig::SzArray(element) => {
                Some(format!("{}[]", element.render_at(metadata, generic_args, next)?))
            }
            TypeSig::Array { element, rank } => {
                if *rank > MAX_ARRAY_RANK {
                    return None;
                }
                let element = element.render_at(metadata, generic_args, next)?;
                if *rank <= 1 {
                    Some(format!("{element}[*]"))
                } else {
                    Some(format!("{element}[{}]", ",".repeat(*rank as usize - 1)))
                }
            }
            TypeSig::Pointer(element) => {
                Some(format!("{}*", element.render_at(metadata, generic_args, next)?))
            }
            TypeSig::ByRef(element) => {
                Some(format!("{}&", element.render_at(metadata, generic_args, next)?))
            }
            TypeSig::GenericInst { base, args } => {
                let base = render_token(metadata, *base, generic_args, next)?;
                let args = args
                    .iter()
                    .map(|arg| arg.render_at(metadata, generic_args, next))
                    .collect::<Option<Vec<_>>>()?;
                let inner: Vec<String> = args.iter().map(|a| format!("[{a}]")).collect();
                Some(format!("{base}[{}]", inner.join(",")))
            }
            TypeSig::Var(index) => generic_args.get(*index as usize).cloned().flatten(),
            TypeSig::MVar(_) | TypeSig::FnPtr => None,
        }
    }
}

fn render_token(
    metadata: &Metadata,
    token: TypeDefOrRef,
    generic_args: &[Option<String>],
    depth: usize,
) -> Option<String> {
    match token {
        TypeDefOrRef::TypeDef(index) => metadata.type_def_full_name(index),
        TypeDefOrRef::TypeRef(index) => metadata.type_ref_full_name(index),
        TypeDefOrRef::TypeSpec(index) => {
            let blob = metadata.type_specs.get(index)?;
            decode_type_spec(blob)?.render_at(metadata, generic_args, depth)
        }
    }
}
