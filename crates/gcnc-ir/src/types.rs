//! Interned structural types shared by both IR levels.
//!
//! Compound types live in a per-program [`TypeTable`] and are deduplicated by
//! structural equality; the scalar types are pre-interned at fixed handles so
//! they behave like global singletons (`TypeTable::FLOAT32` is the same
//! handle in every program).

use crate::arena::{Handle, UniqueArena};

/// A structural type, referenced by handle everywhere else.
pub type Type = Handle<TypeInfo>;

/// Storage class of a pointer.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum StorageClass {
    /// Per-invocation storage: function locals and shader I/O staging.
    Invocation,
    /// Uniform (wave-constant) buffer storage.
    Uniform,
}

/// The concrete shape of a type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TypeInfo {
    Void,
    Bool,
    /// Integer with a bit width of 16, 32 or 64.
    Int { width: u8 },
    /// IEEE float with a bit width of 16, 32 or 64.
    Float { width: u8 },
    /// Fixed-size vector of a scalar element type.
    Vector { element: Type, size: u8 },
    /// Pointer to a pointee in a storage class.
    Pointer { pointee: Type, class: StorageClass },
}

/// Per-program type interning table.
#[derive(Clone, Debug)]
pub struct TypeTable {
    types: UniqueArena<TypeInfo>,
}

impl TypeTable {
    pub const VOID: Type = Handle::new(0);
    pub const BOOL: Type = Handle::new(1);
    pub const INT16: Type = Handle::new(2);
    pub const INT32: Type = Handle::new(3);
    pub const INT64: Type = Handle::new(4);
    pub const FLOAT16: Type = Handle::new(5);
    pub const FLOAT32: Type = Handle::new(6);
    pub const FLOAT64: Type = Handle::new(7);

    pub fn new() -> Self {
        let mut types = UniqueArena::new();
        // Interning order pins the associated-constant handles above.
        types.insert(TypeInfo::Void);
        types.insert(TypeInfo::Bool);
        for width in [16u8, 32, 64] {
            types.insert(TypeInfo::Int { width });
        }
        for width in [16u8, 32, 64] {
            types.insert(TypeInfo::Float { width });
        }
        Self { types }
    }

    /// The integer type of the given bit width, if supported.
    pub fn int(width: u32) -> Option<Type> {
        match width {
            16 => Some(Self::INT16),
            32 => Some(Self::INT32),
            64 => Some(Self::INT64),
            _ => None,
        }
    }

    /// The float type of the given bit width, if supported.
    pub fn float(width: u32) -> Option<Type> {
        match width {
            16 => Some(Self::FLOAT16),
            32 => Some(Self::FLOAT32),
            64 => Some(Self::FLOAT64),
            _ => None,
        }
    }

    /// Interns a vector type.
    pub fn vector(&mut self, element: Type, size: u8) -> Type {
        self.types.insert(TypeInfo::Vector { element, size })
    }

    /// Interns a pointer type.
    pub fn pointer(&mut self, pointee: Type, class: StorageClass) -> Type {
        self.types.insert(TypeInfo::Pointer { pointee, class })
    }

    pub fn info(&self, ty: Type) -> &TypeInfo {
        &self.types[ty]
    }

    /// Whether values of this type are composed of addressable elements.
    pub fn is_composite(&self, ty: Type) -> bool {
        matches!(self.types[ty], TypeInfo::Vector { .. })
    }

    /// Number of elements of a composite type.
    pub fn composite_count(&self, ty: Type) -> Option<usize> {
        match self.types[ty] {
            TypeInfo::Vector { size, .. } => Some(size as usize),
            _ => None,
        }
    }

    /// Element type of a composite at the given index.
    pub fn element(&self, ty: Type, _index: usize) -> Option<Type> {
        match self.types[ty] {
            TypeInfo::Vector { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Pointee type of a pointer.
    pub fn pointee(&self, ty: Type) -> Option<Type> {
        match self.types[ty] {
            TypeInfo::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    /// Storage class of a pointer.
    pub fn storage_class(&self, ty: Type) -> Option<StorageClass> {
        match self.types[ty] {
            TypeInfo::Pointer { class, .. } => Some(class),
            _ => None,
        }
    }

    pub fn is_bool(&self, ty: Type) -> bool {
        ty == Self::BOOL
    }

    pub fn is_void(&self, ty: Type) -> bool {
        ty == Self::VOID
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}
