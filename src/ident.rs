//! Compact identity handles for functions, source files, and object files.
//!
//! The original pipeline keys everything by `(name, source_file)` string
//! tuples, rehashing and recloning them at every step. We intern the
//! strings once and pass around small `Copy` handles instead; see the
//! "tuple keys" re-architecture note in `SPEC_FULL.md` §9.

use fnv::FnvHashMap;
use std::fmt;

/// An interned string handle. Equality and hashing are by index, not content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sym(u32);

/// Interns strings and hands out stable `Sym` handles for them.
#[derive(Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: FnvHashMap<Box<str>, Sym>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Sym {
        if let Some(&sym) = self.lookup.get(s) {
            return sym;
        }
        let sym = Sym(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, sym);
        sym
    }

    pub fn resolve(&self, sym: Sym) -> &str {
        &self.strings[sym.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Sym {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Builds a `Sym` from a previously observed index, e.g. one returned by
    /// `index()` and round-tripped through a generic graph algorithm that
    /// only deals in `usize`.
    pub fn from_index(i: usize) -> Sym {
        Sym(i as u32)
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sym({})", self.0)
    }
}

/// The identity of a function: a name paired with the source file it was
/// declared in. Names alone are not unique (static functions, weak symbols).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    pub name: Sym,
    pub source_file: Sym,
}

/// Dense index-based handle for a function node in the call graph, distinct
/// from `FunctionKey` so graph algorithms can use it as a plain array index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct FunctionId(pub u32);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Maps between `FunctionId` and the `(name, source_file)` pair it stands
/// for, backed by a shared `Interner` for the component strings.
#[derive(Default)]
pub struct FunctionTable {
    pub interner: Interner,
    keys: Vec<FunctionKey>,
    lookup: FnvHashMap<FunctionKey, FunctionId>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, name: &str, source_file: &str) -> FunctionId {
        let key = FunctionKey {
            name: self.interner.intern(name),
            source_file: self.interner.intern(source_file),
        };
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = FunctionId(self.keys.len() as u32);
        self.keys.push(key);
        self.lookup.insert(key, id);
        id
    }

    pub fn lookup(&self, name: &str, source_file: &str) -> Option<FunctionId> {
        let key = FunctionKey {
            name: *self.interner.lookup.get(name)?,
            source_file: *self.interner.lookup.get(source_file)?,
        };
        self.lookup.get(&key).copied()
    }

    pub fn name(&self, id: FunctionId) -> &str {
        self.interner.resolve(self.keys[id.index()].name)
    }

    pub fn source_file(&self, id: FunctionId) -> &str {
        self.interner.resolve(self.keys[id.index()].source_file)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = FunctionId> + '_ {
        (0..self.keys.len()).map(|i| FunctionId(i as u32))
    }
}
