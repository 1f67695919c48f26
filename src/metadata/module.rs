//! The module being woven: its method definitions and the metadata it references.
//!
//! [`ModuleDef`] splits into the methods it defines and the [`ImportTables`] holding every
//! type, member, string and local signature the module's code refers to. Keeping the two
//! apart lets the weaver rewrite one method body while importing new references into the
//! same module.
//!
//! # Token interning
//!
//! Imports are deduplicated: importing the same type, member or string twice yields the same
//! token. Rows are 1-based and assigned in import order.
//!
//! ```rust
//! use cilweave::metadata::{ModuleDef, MemberRef, TypeSig};
//!
//! let mut module = ModuleDef::new("Demo.dll");
//! let first = module.import_member(MemberRef::method(
//!     "System.Console", "WriteLine", vec![TypeSig::String], TypeSig::Void, false,
//! ));
//! let second = module.import_member(MemberRef::method(
//!     "System.Console", "WriteLine", vec![TypeSig::String], TypeSig::Void, false,
//! ));
//! assert_eq!(first.token, second.token);
//! ```

use crate::{
    metadata::{
        method::MethodDef,
        token::{
            Token, TABLE_CUSTOM_ATTRIBUTE, TABLE_MEMBER_REF, TABLE_METHOD_DEF,
            TABLE_STANDALONE_SIG, TABLE_TYPE_REF, TABLE_TYPE_SPEC, TABLE_USER_STRING,
        },
        typesig::TypeSig,
    },
    Result,
};

/// A reference to a method, usable as a call operand.
///
/// Members defined by the module itself carry their `MethodDef` token, imported members a
/// `MemberRef` token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Token of the referenced member, null until imported.
    pub token: Token,
    /// Fully qualified name of the declaring type.
    pub declaring_type: String,
    /// Simple name.
    pub name: String,
    /// Parameter types, excluding `this`.
    pub params: Vec<TypeSig>,
    /// Return type.
    pub returns: TypeSig,
    /// Whether the member takes `this`.
    pub has_this: bool,
}

impl MemberRef {
    /// An unimported reference to a method.
    #[must_use]
    pub fn method(
        declaring_type: &str,
        name: &str,
        params: Vec<TypeSig>,
        returns: TypeSig,
        has_this: bool,
    ) -> Self {
        MemberRef {
            token: Token::default(),
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            params,
            returns,
            has_this,
        }
    }

    /// An unimported reference to an instance constructor.
    #[must_use]
    pub fn constructor(declaring_type: &str, params: Vec<TypeSig>) -> Self {
        Self::method(declaring_type, ".ctor", params, TypeSig::Void, true)
    }

    /// Returns `true` for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    /// The fully qualified name, in the same notation as [`MethodDef::full_name`].
    #[must_use]
    pub fn full_name(&self) -> String {
        let params: Vec<String> = self.params.iter().map(TypeSig::full_name).collect();
        format!(
            "{} {}::{}({})",
            self.returns.full_name(),
            self.declaring_type,
            self.name,
            params.join(",")
        )
    }

    fn same_member(&self, other: &MemberRef) -> bool {
        self.declaring_type == other.declaring_type
            && self.name == other.name
            && self.params == other.params
            && self.has_this == other.has_this
    }
}

/// Maps the symbolic operands of an instruction stream to metadata tokens.
///
/// Implemented by [`ImportTables`]; the body encoder calls it for every type, member,
/// string and local-signature operand it writes.
pub trait TokenResolver {
    /// Token of a `TypeRef` or `TypeSpec` row for `sig`
    ///
    /// # Errors
    /// Returns an error if the type cannot be referenced by a token
    fn type_token(&mut self, sig: &TypeSig) -> Result<Token>;

    /// Token of the member `member` refers to
    ///
    /// # Errors
    /// Returns an error if the member cannot be referenced by a token
    fn member_token(&mut self, member: &MemberRef) -> Result<Token>;

    /// User string token of `value`
    ///
    /// # Errors
    /// Returns an error if the string cannot be interned
    fn string_token(&mut self, value: &str) -> Result<Token>;

    /// `StandAloneSig` token of a local variable signature
    ///
    /// # Errors
    /// Returns an error if the signature cannot be interned
    fn locals_token(&mut self, locals: &[TypeSig]) -> Result<Token>;
}

/// Everything a module references: types, members, user strings and local signatures.
#[derive(Debug, Clone, Default)]
pub struct ImportTables {
    type_refs: Vec<String>,
    type_specs: Vec<TypeSig>,
    member_refs: Vec<MemberRef>,
    user_strings: Vec<String>,
    standalone_sigs: Vec<Vec<TypeSig>>,
}

fn row_token(table: u8, index: usize) -> Token {
    #[allow(clippy::cast_possible_truncation)]
    Token::from_parts(table, index as u32 + 1)
}

impl ImportTables {
    /// Token of a referenced type, by fully qualified name.
    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<Token> {
        self.type_refs
            .iter()
            .position(|candidate| candidate == name)
            .map(|index| row_token(TABLE_TYPE_REF, index))
    }

    /// A referenced member, by declaring type, name and parameter count.
    #[must_use]
    pub fn find_member(&self, declaring_type: &str, name: &str, param_count: usize) -> Option<&MemberRef> {
        self.member_refs.iter().find(|member| {
            member.declaring_type == declaring_type
                && member.name == name
                && member.params.len() == param_count
        })
    }

    /// Interns a type reference; named types become `TypeRef` rows, constructed types
    /// `TypeSpec` rows
    pub fn import_type(&mut self, sig: &TypeSig) -> Token {
        match sig {
            TypeSig::GenericParam(_)
            | TypeSig::GenericInst(..)
            | TypeSig::SzArray(_)
            | TypeSig::ByRef(_) => {
                if let Some(index) = self.type_specs.iter().position(|s| s == sig) {
                    return row_token(TABLE_TYPE_SPEC, index);
                }
                self.type_specs.push(sig.clone());
                row_token(TABLE_TYPE_SPEC, self.type_specs.len() - 1)
            }
            named => {
                let name = named.full_name();
                if let Some(token) = self.find_type(&name) {
                    return token;
                }
                self.type_refs.push(name);
                row_token(TABLE_TYPE_REF, self.type_refs.len() - 1)
            }
        }
    }

    /// Interns a member reference and returns it with its token set.
    pub fn import_member(&mut self, member: MemberRef) -> MemberRef {
        if let Some(existing) = self.member_refs.iter().find(|m| m.same_member(&member)) {
            return existing.clone();
        }

        let mut member = member;
        member.token = row_token(TABLE_MEMBER_REF, self.member_refs.len());
        self.member_refs.push(member.clone());
        member
    }

    /// Interns a user string.
    pub fn import_string(&mut self, value: &str) -> Token {
        if let Some(index) = self.user_strings.iter().position(|s| s == value) {
            return row_token(TABLE_USER_STRING, index);
        }
        self.user_strings.push(value.to_string());
        row_token(TABLE_USER_STRING, self.user_strings.len() - 1)
    }

    /// Interns a local variable signature.
    pub fn import_locals(&mut self, locals: &[TypeSig]) -> Token {
        if let Some(index) = self.standalone_sigs.iter().position(|s| s == locals) {
            return row_token(TABLE_STANDALONE_SIG, index);
        }
        self.standalone_sigs.push(locals.to_vec());
        row_token(TABLE_STANDALONE_SIG, self.standalone_sigs.len() - 1)
    }

    /// All referenced members, in row order.
    #[must_use]
    pub fn member_refs(&self) -> &[MemberRef] {
        &self.member_refs
    }

    /// All referenced type names, in row order.
    #[must_use]
    pub fn type_refs(&self) -> &[String] {
        &self.type_refs
    }
}

impl TokenResolver for ImportTables {
    fn type_token(&mut self, sig: &TypeSig) -> Result<Token> {
        if sig.is_void() {
            return Err(malformed_error!("System.Void cannot be used as a type operand"));
        }
        Ok(self.import_type(sig))
    }

    fn member_token(&mut self, member: &MemberRef) -> Result<Token> {
        if !member.token.is_null() {
            return Ok(member.token);
        }
        Ok(self.import_member(member.clone()).token)
    }

    fn string_token(&mut self, value: &str) -> Result<Token> {
        Ok(self.import_string(value))
    }

    fn locals_token(&mut self, locals: &[TypeSig]) -> Result<Token> {
        Ok(self.import_locals(locals))
    }
}

/// A module: the methods it defines and the metadata they reference.
#[derive(Debug, Clone, Default)]
pub struct ModuleDef {
    /// Module name.
    pub name: String,
    /// Defined methods, in `MethodDef` row order.
    pub methods: Vec<MethodDef>,
    /// Referenced metadata.
    pub imports: ImportTables,
    attribute_rows: u32,
}

impl ModuleDef {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: &str) -> Self {
        ModuleDef {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Adds a method, assigning its `MethodDef` token and the tokens of attribute
    /// occurrences that have none yet.
    pub fn add_method(&mut self, mut method: MethodDef) -> Token {
        let token = row_token(TABLE_METHOD_DEF, self.methods.len());
        method.token = token;

        let params = method.params.iter_mut().flat_map(|p| p.custom_attributes.iter_mut());
        for attribute in method.custom_attributes.iter_mut().chain(params) {
            if attribute.token.is_null() {
                self.attribute_rows += 1;
                attribute.token = Token::from_parts(TABLE_CUSTOM_ATTRIBUTE, self.attribute_rows);
            }
            attribute.ctor = self.imports.import_member(attribute.ctor.clone());
        }

        self.methods.push(method);
        token
    }

    /// A defined method, by token.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.token == token)
    }

    /// A defined method, by token.
    pub fn method_mut(&mut self, token: Token) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|m| m.token == token)
    }

    /// A defined method together with the module's imports, so the method can be rewritten
    /// while new references are imported
    pub fn split_method_mut(&mut self, token: Token) -> Option<(&mut MethodDef, &mut ImportTables)> {
        let method = self.methods.iter_mut().find(|m| m.token == token)?;
        Some((method, &mut self.imports))
    }

    /// A defined method, by declaring type and name.
    #[must_use]
    pub fn method_by_name(&self, declaring_type: &str, name: &str) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.declaring_type == declaring_type && m.name == name)
    }

    /// See [`ImportTables::find_type`].
    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<Token> {
        self.imports.find_type(name)
    }

    /// See [`ImportTables::find_member`].
    #[must_use]
    pub fn find_member(&self, declaring_type: &str, name: &str, param_count: usize) -> Option<&MemberRef> {
        self.imports.find_member(declaring_type, name, param_count)
    }

    /// See [`ImportTables::import_type`].
    pub fn import_type(&mut self, sig: &TypeSig) -> Token {
        self.imports.import_type(sig)
    }

    /// See [`ImportTables::import_member`].
    pub fn import_member(&mut self, member: MemberRef) -> MemberRef {
        self.imports.import_member(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::TABLE_TYPE_SPEC;

    #[test]
    fn test_import_type_deduplicates() {
        let mut imports = ImportTables::default();
        let int32 = imports.import_type(&TypeSig::I4);
        let again = imports.import_type(&TypeSig::class("System.Int32"));
        assert_eq!(int32, again);
        assert_eq!(int32.table(), TABLE_TYPE_REF);
        assert_eq!(imports.find_type("System.Int32"), Some(int32));

        let generic = imports.import_type(&TypeSig::GenericParam("T".to_string()));
        assert_eq!(generic.table(), TABLE_TYPE_SPEC);
        assert_eq!(generic.row(), 1);
    }

    #[test]
    fn test_find_member_by_arity() {
        let mut imports = ImportTables::default();
        imports.import_member(MemberRef::method(
            "System.Math",
            "Max",
            vec![TypeSig::I4, TypeSig::I4],
            TypeSig::I4,
            false,
        ));

        assert!(imports.find_member("System.Math", "Max", 2).is_some());
        assert!(imports.find_member("System.Math", "Max", 1).is_none());
    }

    #[test]
    fn test_resolver_keeps_existing_tokens() -> Result<()> {
        let mut imports = ImportTables::default();
        let mut member = MemberRef::constructor("Demo.Marker", vec![]);
        member.token = Token::from_parts(TABLE_METHOD_DEF, 7);

        assert_eq!(imports.member_token(&member)?, member.token);
        assert!(imports.member_refs().is_empty());
        assert!(imports.type_token(&TypeSig::Void).is_err());
        Ok(())
    }

    #[test]
    fn test_add_method_assigns_tokens() {
        let mut module = ModuleDef::new("Demo.dll");
        let first = module.add_method(crate::test::calculator_compute());
        let second = module.add_method(crate::test::calculator_compute());

        assert_eq!(first.row(), 1);
        assert_eq!(second.row(), 2);

        let method = module.method(first).map(|m| m.custom_attributes.len());
        assert_eq!(method, Some(1));
        let attribute = &module.methods[0].custom_attributes[0];
        assert_eq!(attribute.token.table(), TABLE_CUSTOM_ATTRIBUTE);
        assert!(!attribute.ctor.token.is_null());
    }
}
