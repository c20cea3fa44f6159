//! Constant pool for bytecode arrays

use serde::{Deserialize, Serialize};

/// Descriptor of a nested function referenced by `CreateClosure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFunctionInfo {
    /// Function name (empty for anonymous)
    pub name: String,
    /// Index of the compiled function in its script
    pub literal_id: u32,
    /// Declared parameter count, receiver excluded
    pub formal_parameter_count: u32,
}

/// Kind of scope a context is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Function-level scope
    Function,
    /// Block scope with heap-allocated bindings
    Block,
    /// Catch clause scope
    Catch,
}

/// Descriptor of a heap-backed scope referenced by context creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Scope kind
    pub kind: ScopeKind,
    /// Number of context slots
    pub slot_count: u32,
    /// Names of the context-allocated bindings, in slot order
    pub names: Vec<String>,
}

/// Kind of a batched global declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalDeclarationKind {
    /// `var name`
    Variable,
    /// `function name() {}` with its shared function literal id
    Function {
        /// Literal id of the declared function
        literal_id: u32,
    },
}

/// One entry of a `DeclareGlobals` batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDeclaration {
    /// Binding name
    pub name: String,
    /// Declaration kind
    pub kind: GlobalDeclarationKind,
}

/// A constant value in the constant pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// 64-bit floating point number
    Number(#[serde(with = "number_bits")] f64),
    /// String value (UTF-16 code units)
    String(Vec<u16>),
    /// Relative jump delta used by `Jump*Constant` and jump tables
    JumpOffset(i32),
    /// Nested function descriptor
    SharedFunction(SharedFunctionInfo),
    /// Scope descriptor for context creation
    Scope(ScopeInfo),
    /// Object literal boilerplate: property names in definition order
    ObjectBoilerplate(Vec<Vec<u16>>),
    /// Array literal boilerplate: element count
    ArrayBoilerplate(u32),
    /// Batch of global declarations
    GlobalDeclarations(Vec<GlobalDeclaration>),
    /// Discarded reservation
    Hole,
    /// Outstanding reservation, never present in a finalized pool
    Reserved,
}

impl Constant {
    /// Create a number constant
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string constant from UTF-16 units
    #[inline]
    pub fn string(units: impl Into<Vec<u16>>) -> Self {
        Self::String(units.into())
    }

    /// Create a string constant from UTF-8 text
    #[inline]
    pub fn string_from_str(s: &str) -> Self {
        Self::String(s.encode_utf16().collect())
    }

    /// Check if this is a number
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// Check if this is a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Get as number if this is a number constant
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string if this is a string constant
    #[inline]
    pub fn as_string(&self) -> Option<&[u16]> {
        match self {
            Self::String(s) => Some(s.as_slice()),
            _ => None,
        }
    }

    /// Get the jump delta if this is a jump offset
    #[inline]
    pub fn as_jump_offset(&self) -> Option<i32> {
        match self {
            Self::JumpOffset(delta) => Some(*delta),
            _ => None,
        }
    }

    /// Whether two constants may share one pool entry.
    ///
    /// Numbers compare by bit pattern so `0.0` and `-0.0` stay apart.
    /// Reservations and holes never merge.
    fn same_entry(&self, other: &Constant) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Hole | Self::Reserved, _) | (_, Self::Hole | Self::Reserved) => false,
            _ => self == other,
        }
    }

    /// Short rendering for the disassembler
    pub fn preview(&self) -> String {
        match self {
            Self::Number(n) => format!("<Number {}>", n),
            Self::String(units) => format!("<String \"{}\">", String::from_utf16_lossy(units)),
            Self::JumpOffset(delta) => format!("<JumpOffset {}>", delta),
            Self::SharedFunction(info) => {
                format!("<SharedFunctionInfo {}#{}>", info.name, info.literal_id)
            }
            Self::Scope(info) => format!("<ScopeInfo {:?}[{}]>", info.kind, info.slot_count),
            Self::ObjectBoilerplate(names) => format!("<ObjectBoilerplate[{}]>", names.len()),
            Self::ArrayBoilerplate(len) => format!("<ArrayBoilerplate[{}]>", len),
            Self::GlobalDeclarations(decls) => format!("<GlobalDeclarations[{}]>", decls.len()),
            Self::Hole => "<Hole>".to_string(),
            Self::Reserved => "<Reserved>".to_string(),
        }
    }
}

// JSON has no NaN or infinities; numbers travel as their bit pattern.
mod number_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

/// Constant pool with deduplication and jump reservations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: Vec<Constant>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self {
            constants: Vec::new(),
        }
    }

    /// Create constant pool with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            constants: Vec::with_capacity(capacity),
        }
    }

    /// Add a constant to the pool, returns its index
    ///
    /// Deduplicates identical constants to save space.
    pub fn add(&mut self, constant: Constant) -> u32 {
        if let Some(idx) = self.constants.iter().position(|c| c.same_entry(&constant)) {
            return idx as u32;
        }

        let idx = self.constants.len() as u32;
        self.constants.push(constant);
        idx
    }

    /// Add a constant without deduplication
    pub fn push(&mut self, constant: Constant) -> u32 {
        let idx = self.constants.len() as u32;
        self.constants.push(constant);
        idx
    }

    /// Add a number constant
    #[inline]
    pub fn add_number(&mut self, n: f64) -> u32 {
        self.add(Constant::number(n))
    }

    /// Add a string constant from UTF-8 text
    #[inline]
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.add(Constant::string_from_str(s))
    }

    /// Add a UTF-16 string constant
    #[inline]
    pub fn add_string_units(&mut self, units: Vec<u16>) -> u32 {
        self.add(Constant::string(units))
    }

    /// Reserve one entry to be committed or discarded later
    pub fn reserve(&mut self) -> u32 {
        self.push(Constant::Reserved)
    }

    /// Reserve `count` consecutive entries, returns the first index
    pub fn reserve_range(&mut self, count: u32) -> u32 {
        let start = self.constants.len() as u32;
        for _ in 0..count {
            self.constants.push(Constant::Reserved);
        }
        start
    }

    /// Fill a reserved entry.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not an outstanding reservation.
    pub fn commit_reserved(&mut self, index: u32, constant: Constant) {
        let slot = &mut self.constants[index as usize];
        assert!(
            matches!(slot, Constant::Reserved),
            "constant pool entry {} is not reserved",
            index
        );
        *slot = constant;
    }

    /// Give back a reserved entry.
    ///
    /// Trailing entries are popped; anything below stays as a [`Constant::Hole`]
    /// so indices already encoded elsewhere keep their meaning.
    pub fn discard_reserved(&mut self, index: u32) {
        let slot = &mut self.constants[index as usize];
        assert!(
            matches!(slot, Constant::Reserved),
            "constant pool entry {} is not reserved",
            index
        );
        *slot = Constant::Hole;
        while matches!(self.constants.last(), Some(Constant::Hole)) {
            self.constants.pop();
        }
    }

    /// Number of outstanding reservations
    pub fn reserved_count(&self) -> usize {
        self.constants
            .iter()
            .filter(|c| matches!(c, Constant::Reserved))
            .count()
    }

    /// Get a constant by index
    #[inline]
    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Number of constants in the pool
    #[inline]
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Check if the pool is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate over constants
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }
}

impl From<Vec<Constant>> for ConstantPool {
    fn from(constants: Vec<Constant>) -> Self {
        Self { constants }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool_dedup() {
        let mut pool = ConstantPool::new();

        let idx1 = pool.add_string("hello");
        let idx2 = pool.add_string("world");
        let idx3 = pool.add_string("hello"); // duplicate

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(idx3, 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_signed_zero_kept_apart() {
        let mut pool = ConstantPool::new();
        let pos = pool.add_number(0.0);
        let neg = pool.add_number(-0.0);
        assert_ne!(pos, neg);
        assert_eq!(pool.add_number(-0.0), neg);
    }

    #[test]
    fn test_non_finite_numbers_serialize() {
        let pool = ConstantPool::from(vec![Constant::Number(f64::NAN), Constant::Number(f64::NEG_INFINITY)]);
        let json = serde_json::to_string(&pool).unwrap();
        let restored: ConstantPool = serde_json::from_str(&json).unwrap();
        assert!(restored.get(0).and_then(Constant::as_number).unwrap().is_nan());
        assert_eq!(restored.get(1).and_then(Constant::as_number), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn test_reservation_commit() {
        let mut pool = ConstantPool::new();
        pool.add_string("a");
        let r = pool.reserve();
        assert_eq!(pool.reserved_count(), 1);
        pool.commit_reserved(r, Constant::JumpOffset(300));
        assert_eq!(pool.get(r).and_then(Constant::as_jump_offset), Some(300));
        assert_eq!(pool.reserved_count(), 0);
    }

    #[test]
    fn test_reservation_discard() {
        let mut pool = ConstantPool::new();
        let inner = pool.reserve();
        let trailing = pool.reserve();

        pool.discard_reserved(inner);
        assert_eq!(pool.get(inner), Some(&Constant::Hole));
        assert_eq!(pool.len(), 2);

        // Popping the last reservation also drops the hole below it
        pool.discard_reserved(trailing);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_reservations_never_dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.reserve();
        let b = pool.reserve();
        assert_ne!(a, b);
        let range = pool.reserve_range(3);
        assert_eq!(range, 2);
        assert_eq!(pool.reserved_count(), 5);
    }

    #[test]
    #[should_panic(expected = "not reserved")]
    fn test_commit_unreserved_panics() {
        let mut pool = ConstantPool::new();
        let idx = pool.add_number(1.0);
        pool.commit_reserved(idx, Constant::JumpOffset(1));
    }
}
