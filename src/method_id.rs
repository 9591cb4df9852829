//! Canonical method identifiers.
//!
//! A [`MethodId`] is the stable key every other subsystem indexes by:
//! `CallGraph` nodes, `CoverageIndex` entries, `TestRegistry` lookups, and
//! `ChangeResolver` output are all expressed in terms of `MethodId`, never
//! source locations.

use std::fmt;

/// Canonical, stable identifier for a method: `Namespace.Type.Method(ParamType,...)`.
///
/// Nested types are joined with `+` (`Outer+Inner`), generics render as
/// `Name<T1,T2>`, and overloads are disambiguated by their ordered
/// parameter type list. Comparison is case-sensitive and exact — two
/// `MethodId`s are equal iff their canonical strings are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct MethodId(String);

impl MethodId {
    /// Wraps an already-canonical string without reformatting it.
    ///
    /// Callers that assemble an id from parts should prefer
    /// [`MethodId::build`]; this constructor exists for ids read back from
    /// persisted state (history logs, serialized indices) where the string
    /// is already known to be canonical.
    pub fn new(canonical: impl Into<String>) -> Self {
        Self(canonical.into())
    }

    /// Builds a canonical id from its structural parts.
    ///
    /// `declaring_type` may already contain `+`-joined nesting and
    /// `<...>` generics; `method_name` may itself carry `<T>` for a
    /// generic method. Parameter types are rendered in declaration order,
    /// comma-separated, with no spaces.
    pub fn build(
        namespace: &str,
        declaring_type: &str,
        method_name: &str,
        param_types: &[String],
    ) -> Self {
        let params = param_types.join(",");
        let qualified_type = if namespace.is_empty() {
            declaring_type.to_string()
        } else {
            format!("{namespace}.{declaring_type}")
        };
        Self(format!("{qualified_type}.{method_name}({params})"))
    }

    /// A synthetic id for a lambda body at `line` within `enclosing`.
    ///
    /// Emits `u → λ_n` where `λ_n` is a synthetic id for the lambda body.
    /// The line number keeps synthetic ids stable across rebuilds of
    /// identical source and unique within one enclosing method.
    pub fn synthetic_lambda(enclosing: &MethodId, line: u32) -> Self {
        Self(format!("{}::λ@{}", enclosing.0, line))
    }

    /// Collapses a generic instantiation to its open-generic form.
    ///
    /// Collapses all instantiations of a generic method to the
    /// open-generic id (`Foo<T>`). Best-effort textual collapse: any
    /// `<...>` segment in the method-name component is replaced by
    /// re-deriving arity-matched placeholder names `T1..Tn`.
    pub fn open_generic(&self) -> MethodId {
        let Some(open) = self.0.find('<') else {
            return self.clone();
        };
        let Some(close) = self.0[open..].find('>') else {
            return self.clone();
        };
        let close = open + close;
        let arity = self.0[open + 1..close]
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .count();
        let placeholders: Vec<String> = (1..=arity).map(|i| format!("T{i}")).collect();
        let mut rebuilt = String::with_capacity(self.0.len());
        rebuilt.push_str(&self.0[..open + 1]);
        rebuilt.push_str(&placeholders.join(","));
        rebuilt.push_str(&self.0[close..]);
        MethodId(rebuilt)
    }

    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the declaring type, i.e. everything before the last `.` that
    /// precedes the method name's opening parenthesis.
    ///
    /// Best-effort: the grammar has no escaping, so a method name that
    /// itself contained a literal `.` would be ambiguous; this never
    /// happens for attribute-derived method names in practice.
    pub fn declaring_type(&self) -> Option<&str> {
        let paren = self.0.find('(')?;
        let head = &self.0[..paren];
        let dot = head.rfind('.')?;
        Some(&self.0[..dot])
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MethodId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MethodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
