//! The metadata the weaver reads and writes.
//!
//! This is not a metadata reader: modules are supplied already decoded, as a [`ModuleDef`]
//! holding the methods it defines and the types, members and strings it references.
//!
//! # Key Components
//!
//! - [`token`] - [`Token`] and table identifiers
//! - [`typesig`] - [`TypeSig`], the static types of parameters, locals and results
//! - [`method`] - [`MethodDef`] with its parameters and flag sets
//! - [`attributes`] - [`CustomAttribute`] occurrences and their arguments
//! - [`module`] - [`ModuleDef`], [`ImportTables`], [`MemberRef`] and [`TokenResolver`]
//! - [`builder`] - [`MethodBuilder`] for assembling method definitions

pub mod attributes;
pub mod builder;
pub mod method;
pub mod module;
pub mod token;
pub mod typesig;

pub use attributes::{AttributeArgument, CustomAttribute, NamedArgument};
pub use builder::MethodBuilder;
pub use method::{
    GenericParamDef, MethodAccessFlags, MethodDef, MethodImplCodeType, MethodImplOptions,
    MethodModifiers, ParamDef,
};
pub use module::{ImportTables, MemberRef, ModuleDef, TokenResolver};
pub use token::Token;
pub use typesig::TypeSig;
