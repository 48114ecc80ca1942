//! Assumptions a compiled method made about the class hierarchy. The code cache only
//! records them and asks a caller-supplied predicate whether a change invalidates them.

use crate::util::{KlassRef, MethodRef, ObjectReference};
use strum_macros::{EnumIter, IntoStaticStr};

/// The kinds of assumption a compiler records.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DependencyType {
    /// The method (argument 0) is not redefined.
    EvolMethod,
    /// The class has no subclasses.
    LeafType,
    /// The abstract class has exactly one concrete subtype (argument 1).
    AbstractWithUniqueConcreteSubtype,
    /// The abstract class has no concrete subtype.
    AbstractWithNoConcreteSubtype,
    /// The concrete class has no concrete subtype other than itself.
    ConcreteWithNoConcreteSubtype,
    /// The method (argument 1) has a unique implementation below the class.
    UniqueConcreteMethod,
    /// The abstract class has at most the two concrete subtypes given.
    AbstractWithExclusiveConcreteSubtypes2,
    /// The two methods given are the only implementations below the class.
    ExclusiveConcreteMethods2,
    /// No subclass of the class has a finalizer.
    NoFinalizableSubclasses,
    /// The call site object (argument 0) still targets the method handle (argument 1).
    CallSiteTargetValue,
}

impl DependencyType {
    /// The number of arguments a dependency of this type carries.
    pub fn arg_count(self) -> usize {
        match self {
            DependencyType::EvolMethod
            | DependencyType::LeafType
            | DependencyType::AbstractWithNoConcreteSubtype
            | DependencyType::ConcreteWithNoConcreteSubtype
            | DependencyType::NoFinalizableSubclasses => 1,
            DependencyType::AbstractWithUniqueConcreteSubtype
            | DependencyType::UniqueConcreteMethod
            | DependencyType::CallSiteTargetValue => 2,
            DependencyType::AbstractWithExclusiveConcreteSubtypes2
            | DependencyType::ExclusiveConcreteMethods2 => 3,
        }
    }

    /// Does the first argument name the class whose hierarchy the assumption is about?
    pub fn has_context_type(self) -> bool {
        !matches!(
            self,
            DependencyType::EvolMethod | DependencyType::CallSiteTargetValue
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DepArgument {
    Klass(KlassRef),
    Method(MethodRef),
    Object(ObjectReference),
}

/// One recorded assumption.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dependency {
    dep_type: DependencyType,
    args: Vec<DepArgument>,
}

impl Dependency {
    /// # Panics
    /// Panics if the number of arguments does not fit the type, or if a type with a context
    /// class does not start with a class argument.
    pub fn new(dep_type: DependencyType, args: Vec<DepArgument>) -> Self {
        assert_eq!(
            args.len(),
            dep_type.arg_count(),
            "{:?} takes {} arguments",
            dep_type,
            dep_type.arg_count()
        );
        assert!(
            !dep_type.has_context_type() || matches!(args[0], DepArgument::Klass(_)),
            "{:?} needs a context class as its first argument",
            dep_type
        );
        Dependency { dep_type, args }
    }

    pub fn evol_method(method: MethodRef) -> Self {
        Dependency::new(DependencyType::EvolMethod, vec![DepArgument::Method(method)])
    }

    pub fn leaf_type(klass: KlassRef) -> Self {
        Dependency::new(DependencyType::LeafType, vec![DepArgument::Klass(klass)])
    }

    pub fn unique_concrete_method(context: KlassRef, method: MethodRef) -> Self {
        Dependency::new(
            DependencyType::UniqueConcreteMethod,
            vec![DepArgument::Klass(context), DepArgument::Method(method)],
        )
    }

    pub fn dep_type(&self) -> DependencyType {
        self.dep_type
    }

    pub fn args(&self) -> &[DepArgument] {
        &self.args
    }

    /// The class whose subclasses the assumption is about. Changes to the hierarchy below
    /// this class are the only ones that can invalidate it.
    pub fn context_type(&self) -> Option<KlassRef> {
        if !self.dep_type.has_context_type() {
            return None;
        }
        match self.args[0] {
            DepArgument::Klass(klass) => Some(klass),
            _ => None,
        }
    }

    /// The method argument at `index`, if that argument is a method.
    pub fn method_argument(&self, index: usize) -> Option<MethodRef> {
        match self.args.get(index) {
            Some(DepArgument::Method(m)) => Some(*m),
            _ => None,
        }
    }

    /// Bytes this dependency takes in a compact encoding: one word for the type and one per
    /// argument.
    pub fn size_in_bytes(&self) -> usize {
        (1 + self.args.len()) * crate::util::constants::BYTES_IN_WORD
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name: &'static str = self.dep_type.into();
        write!(f, "{}(", name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match arg {
                DepArgument::Klass(k) => write!(f, "{:?}", k)?,
                DepArgument::Method(m) => write!(f, "{:?}", m)?,
                DepArgument::Object(o) => write!(f, "{}", o)?,
            }
        }
        write!(f, ")")
    }
}
