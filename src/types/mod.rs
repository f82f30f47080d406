//! Type descriptors - canonical native layouts as first-class values
//!
//! Design: descriptors are interned handles. Each one carries a registry-wide
//! unique [`TypeId`] and equality is id comparison, never structural. Two
//! struct descriptors built from identical member lists are different types.
//!
//! Architecture:
//! - `mod.rs` - kinds, descriptors, registry, field resolution
//! - `builder.rs` - alternating type/name sequences into struct descriptors

mod builder;


pub use builder::{LayoutItem, StructBuilder};

use crate::abi::AbiEngine;
use crate::error::{FfiError, FfiResult};
use crate::logging::log_type_created;
use core::fmt;
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Native type kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeKind {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    LongDouble,
    Pointer,
    Struct,
    Complex,
    Array,
}

impl TypeKind {
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::U8 | Self::I16 | Self::U16 | Self::I32 | Self::U32 | Self::I64 | Self::U64
        )
    }

    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64 | Self::LongDouble)
    }

    /// Kinds whose identity is the descriptor instance rather than the kind
    #[inline]
    pub const fn is_aggregate(self) -> bool {
        matches!(self, Self::Struct | Self::Complex | Self::Array)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::I8 => "int8",
            Self::U8 => "uint8",
            Self::I16 => "int16",
            Self::U16 => "uint16",
            Self::I32 => "int32",
            Self::U32 => "uint32",
            Self::I64 => "int64",
            Self::U64 => "uint64",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::LongDouble => "long double",
            Self::Pointer => "pointer",
            Self::Struct => "struct",
            Self::Complex => "complex",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar kinds with a canonical, startup-created descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Primitive {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    LongDouble,
    Pointer,
}

impl Primitive {
    pub const ALL: [Primitive; 13] = [
        Self::Void,
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::LongDouble,
        Self::Pointer,
    ];

    pub const fn kind(self) -> TypeKind {
        match self {
            Self::Void => TypeKind::Void,
            Self::I8 => TypeKind::I8,
            Self::U8 => TypeKind::U8,
            Self::I16 => TypeKind::I16,
            Self::U16 => TypeKind::U16,
            Self::I32 => TypeKind::I32,
            Self::U32 => TypeKind::U32,
            Self::I64 => TypeKind::I64,
            Self::U64 => TypeKind::U64,
            Self::F32 => TypeKind::F32,
            Self::F64 => TypeKind::F64,
            Self::LongDouble => TypeKind::LongDouble,
            Self::Pointer => TypeKind::Pointer,
        }
    }

    /// Integer primitive of the given byte width
    pub const fn integer(size: usize, signed: bool) -> Self {
        match (size, signed) {
            (1, true) => Self::I8,
            (1, false) => Self::U8,
            (2, true) => Self::I16,
            (2, false) => Self::U16,
            (4, true) => Self::I32,
            (4, false) => Self::U32,
            (_, true) => Self::I64,
            (_, false) => Self::U64,
        }
    }
}

/// Registry-unique descriptor identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Struct member with its engine-computed offset
#[derive(Debug)]
pub struct Member {
    pub descriptor: TypeDescriptor,
    pub name: Option<String>,
    pub offset: usize,
}

#[derive(Debug)]
enum Shape {
    Scalar,
    Struct {
        members: Vec<Member>,
        names: HashMap<String, usize>,
    },
    Complex {
        component: TypeDescriptor,
    },
    Array {
        element: TypeDescriptor,
        len: usize,
    },
}

#[derive(Debug)]
struct TypeData {
    id: TypeId,
    registry: u32,
    kind: TypeKind,
    size: usize,
    align: usize,
    shape: Shape,
}

/// Immutable, identity-compared native type descriptor
///
/// Cloning shares the same descriptor instance.
#[derive(Clone)]
pub struct TypeDescriptor(Rc<TypeData>);

impl TypeDescriptor {
    #[inline]
    pub fn id(&self) -> TypeId {
        self.0.id
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.0.kind
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.0.size
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.0.align
    }

    /// Same descriptor instance
    #[inline]
    pub fn is_same(&self, other: &TypeDescriptor) -> bool {
        self.0.id == other.0.id && self.0.registry == other.0.registry
    }

    #[inline]
    pub fn is_struct(&self) -> bool {
        self.0.kind == TypeKind::Struct
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.0.kind == TypeKind::Array
    }

    /// Struct members in declaration order
    pub fn members(&self) -> Option<&[Member]> {
        match &self.0.shape {
            Shape::Struct { members, .. } => Some(members),
            _ => None,
        }
    }

    /// Element type and length of an array descriptor
    pub fn array_parts(&self) -> Option<(&TypeDescriptor, usize)> {
        match &self.0.shape {
            Shape::Array { element, len } => Some((element, *len)),
            _ => None,
        }
    }

    /// Component type of a complex descriptor
    pub fn component(&self) -> Option<&TypeDescriptor> {
        match &self.0.shape {
            Shape::Complex { component } => Some(component),
            _ => None,
        }
    }

    fn registry(&self) -> u32 {
        self.0.registry
    }

    fn member_index(&self, key: &FieldKey<'_>) -> FfiResult<usize> {
        let Shape::Struct { members, names } = &self.0.shape else {
            return Err(FfiError::not_a_struct(key.to_string()));
        };

        match *key {
            FieldKey::Index(i) if i >= 1 && i <= members.len() => Ok(i - 1),
            FieldKey::Index(_) => Err(FfiError::no_field(key.to_string())),
            FieldKey::Name(name) => names
                .get(name)
                .copied()
                .ok_or_else(|| FfiError::no_field(name)),
        }
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.0.id.0)
            .field("kind", &self.0.kind)
            .field("size", &self.0.size)
            .field("align", &self.0.align)
            .finish()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.shape {
            Shape::Array { element, len } => write!(f, "{}[{}]", element, len),
            Shape::Complex { component } => write!(f, "complex {}", component),
            Shape::Struct { .. } => write!(f, "struct#{}", self.0.id.0),
            Shape::Scalar => f.write_str(self.0.kind.name()),
        }
    }
}

/// Field selector: 1-based position or member name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for FieldKey<'_> {
    fn from(index: usize) -> Self {
        FieldKey::Index(index)
    }
}

impl<'a> From<&'a str> for FieldKey<'a> {
    fn from(name: &'a str) -> Self {
        FieldKey::Name(name)
    }
}

impl fmt::Display for FieldKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{}", i),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Resolve a chain of field keys to the final member and its cumulative offset
pub fn field_of(descriptor: &TypeDescriptor, keys: &[FieldKey<'_>]) -> FfiResult<(TypeDescriptor, usize)> {
    let mut current = descriptor.clone();
    let mut offset = 0;

    for key in keys {
        let index = current.member_index(key)?;
        let next = match &current.0.shape {
            Shape::Struct { members, .. } => {
                offset += members[index].offset;
                members[index].descriptor.clone()
            }
            _ => return Err(FfiError::not_a_struct(key.to_string())),
        };
        current = next;
    }

    Ok((current, offset))
}

static NEXT_REGISTRY: AtomicU32 = AtomicU32::new(1);

/// Owner of every descriptor handed out to scripts
///
/// Primitive and complex descriptors are created once at construction and
/// shared. Struct and array descriptors are created on demand and never
/// mutated afterwards.
pub struct TypeRegistry {
    engine: Rc<dyn AbiEngine>,
    tag: u32,
    next_id: Cell<u32>,
    primitives: Vec<TypeDescriptor>,
    complex: Vec<TypeDescriptor>,
    default_int: Primitive,
}

impl TypeRegistry {
    pub fn new(engine: Rc<dyn AbiEngine>) -> Self {
        Self::with_default_int(engine, Primitive::integer(core::mem::size_of::<libc::c_int>(), true))
    }

    /// Registry whose variadic integer default is `default_int`
    pub fn with_default_int(engine: Rc<dyn AbiEngine>, default_int: Primitive) -> Self {
        let mut registry = Self {
            engine,
            tag: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            next_id: Cell::new(0),
            primitives: Vec::with_capacity(Primitive::ALL.len()),
            complex: Vec::with_capacity(3),
            default_int,
        };

        for primitive in Primitive::ALL {
            let (size, align) = registry.engine.primitive_layout(primitive);
            let descriptor = registry.make(primitive.kind(), size, align, Shape::Scalar);
            registry.primitives.push(descriptor);
        }

        for component in [Primitive::F32, Primitive::F64, Primitive::LongDouble] {
            let component = registry.primitive(component);
            let descriptor = registry.make(
                TypeKind::Complex,
                component.size() * 2,
                component.align(),
                Shape::Complex { component },
            );
            registry.complex.push(descriptor);
        }

        registry
    }

    #[inline]
    pub fn engine(&self) -> &Rc<dyn AbiEngine> {
        &self.engine
    }

    /// Canonical descriptor for a primitive kind
    #[inline]
    pub fn primitive(&self, primitive: Primitive) -> TypeDescriptor {
        self.primitives[primitive as usize].clone()
    }

    /// Default descriptor for integer arguments in a variadic tail
    #[inline]
    pub fn default_int(&self) -> TypeDescriptor {
        self.primitive(self.default_int)
    }

    /// Canonical complex descriptor over a floating-point component
    pub fn complex(&self, component: Primitive) -> FfiResult<TypeDescriptor> {
        match component {
            Primitive::F32 => Ok(self.complex[0].clone()),
            Primitive::F64 => Ok(self.complex[1].clone()),
            Primitive::LongDouble => Ok(self.complex[2].clone()),
            other => Err(FfiError::Layout(format!(
                "complex component must be floating point, got {}",
                other.kind()
            ))),
        }
    }

    /// Resolve a C type name (`int`, `ulong`, `uint16`, ...) using host widths
    pub fn named(&self, name: &str) -> Option<TypeDescriptor> {
        use core::mem::size_of;

        let char_signed = (libc::c_char::MIN as i32) < 0;
        let primitive = match name {
            "void" => Primitive::Void,
            "int" => Primitive::integer(size_of::<libc::c_int>(), true),
            "uint" => Primitive::integer(size_of::<libc::c_uint>(), false),
            "short" => Primitive::integer(size_of::<libc::c_short>(), true),
            "ushort" => Primitive::integer(size_of::<libc::c_ushort>(), false),
            "long" => Primitive::integer(size_of::<libc::c_long>(), true),
            "ulong" => Primitive::integer(size_of::<libc::c_ulong>(), false),
            "char" => Primitive::integer(1, char_signed),
            "uchar" => Primitive::U8,
            "schar" => Primitive::I8,
            "longlong" => Primitive::integer(size_of::<libc::c_longlong>(), true),
            "ulonglong" => Primitive::integer(size_of::<libc::c_ulonglong>(), false),
            "size_t" => Primitive::integer(size_of::<libc::size_t>(), false),
            "int8" => Primitive::I8,
            "uint8" => Primitive::U8,
            "int16" => Primitive::I16,
            "uint16" => Primitive::U16,
            "int32" => Primitive::I32,
            "uint32" => Primitive::U32,
            "int64" => Primitive::I64,
            "uint64" => Primitive::U64,
            "float" => Primitive::F32,
            "double" => Primitive::F64,
            "longdouble" => Primitive::LongDouble,
            "pointer" => Primitive::Pointer,
            _ => return None,
        };
        Some(self.primitive(primitive))
    }

    /// Build a struct descriptor; offsets come from the ABI engine
    pub fn struct_of(&self, members: &[(TypeDescriptor, Option<&str>)]) -> FfiResult<TypeDescriptor> {
        if members.is_empty() {
            return Err(FfiError::Layout("struct must have at least one member".into()));
        }

        let mut names = HashMap::new();
        for (position, (descriptor, name)) in members.iter().enumerate() {
            self.check_member(descriptor, position)?;
            if let Some(name) = name {
                if names.insert((*name).to_string(), position).is_some() {
                    return Err(FfiError::Layout(format!("duplicate member name '{}'", name)));
                }
            }
        }

        let descriptors: Vec<TypeDescriptor> = members.iter().map(|(d, _)| d.clone()).collect();
        let layout = self
            .engine
            .compute_layout(&descriptors)
            .map_err(|err| FfiError::Layout(err.to_string()))?;

        if layout.offsets.len() != members.len() {
            return Err(FfiError::Layout(format!(
                "engine returned {} offsets for {} members",
                layout.offsets.len(),
                members.len()
            )));
        }

        let members = members
            .iter()
            .zip(&layout.offsets)
            .map(|((descriptor, name), &offset)| Member {
                descriptor: descriptor.clone(),
                name: name.map(str::to_string),
                offset,
            })
            .collect();

        Ok(self.make(
            TypeKind::Struct,
            layout.size,
            layout.align,
            Shape::Struct { members, names },
        ))
    }

    /// Unnamed struct of `len` copies of `element`, the way to embed an array in a struct
    pub fn fixed_array_struct(&self, element: &TypeDescriptor, len: usize) -> FfiResult<TypeDescriptor> {
        if len == 0 {
            return Err(FfiError::Layout("expect a positive size".into()));
        }
        let members: Vec<(TypeDescriptor, Option<&str>)> = (0..len).map(|_| (element.clone(), None)).collect();
        self.struct_of(&members)
    }

    /// Array descriptor of `len` elements; arrays of arrays are rejected
    pub fn array_of(&self, element: &TypeDescriptor, len: usize) -> FfiResult<TypeDescriptor> {
        self.check_owned(element)?;
        if element.is_array() {
            return Err(FfiError::Layout("nested array is not supported".into()));
        }
        if element.kind() == TypeKind::Void {
            return Err(FfiError::Layout("array of void".into()));
        }
        if len == 0 {
            return Err(FfiError::Layout("expect a positive size".into()));
        }
        let size = element
            .size()
            .checked_mul(len)
            .ok_or_else(|| FfiError::Layout(format!("array of {} x {} overflows", len, element)))?;

        Ok(self.make(
            TypeKind::Array,
            size,
            element.align(),
            Shape::Array { element: element.clone(), len },
        ))
    }

    /// Struct descriptors created so far plus the canonical ones
    #[inline]
    pub fn descriptor_count(&self) -> u32 {
        self.next_id.get()
    }

    fn check_member(&self, descriptor: &TypeDescriptor, position: usize) -> FfiResult<()> {
        self.check_owned(descriptor)?;
        match descriptor.kind() {
            TypeKind::Void => Err(FfiError::Layout(format!("member {} is void", position + 1))),
            TypeKind::Array => Err(FfiError::Layout(format!(
                "member {} is an array; wrap it as a fixed-size struct",
                position + 1
            ))),
            _ => Ok(()),
        }
    }

    fn check_owned(&self, descriptor: &TypeDescriptor) -> FfiResult<()> {
        if descriptor.registry() != self.tag {
            return Err(FfiError::Layout(format!(
                "descriptor {} belongs to another registry",
                descriptor
            )));
        }
        Ok(())
    }

    fn make(&self, kind: TypeKind, size: usize, align: usize, shape: Shape) -> TypeDescriptor {
        let id = TypeId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        if kind.is_aggregate() {
            log_type_created(kind.name(), id.0, size, align);
        }

        TypeDescriptor(Rc::new(TypeData {
            id,
            registry: self.tag,
            kind,
            size,
            align,
            shape,
        }))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("engine", &self.engine.name())
            .field("descriptors", &self.next_id.get())
            .finish()
    }
}
