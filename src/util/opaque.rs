use crate::util::Address;
use std::fmt;
use std::num::NonZeroUsize;

macro_rules! opaque_metadata_ref {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq)]
        pub struct $name(NonZeroUsize);

        impl $name {
            /// Wrap the address of the VM-side metadata. Returns `None` for zero.
            pub fn from_address(addr: Address) -> Option<Self> {
                NonZeroUsize::new(addr.as_usize()).map($name)
            }

            /// Build an identity from a raw non-zero word. Mostly for bindings and tests.
            ///
            /// # Panics
            /// Panics if `raw` is zero.
            pub fn from_raw(raw: usize) -> Self {
                let raw = NonZeroUsize::new(raw);
                $name(raw.expect(concat!(stringify!($name), " must not be zero")))
            }

            /// The address of the VM-side metadata.
            pub fn to_address(self) -> Address {
                unsafe { Address::from_usize(self.0.get()) }
            }

        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

opaque_metadata_ref!(
    /// Identity of a VM class (klass). The code cache only compares klasses and asks the
    /// VM's object model whether they are still loaded.
    KlassRef
);

opaque_metadata_ref!(
    /// Identity of a VM method. Compiled methods, OSR lists and the installed-code table
    /// are keyed by it.
    MethodRef
);

impl MethodRef {
    /// The raw word a compiled method stores its method in, zero once cleared.
    pub(crate) fn to_word(self) -> usize {
        self.0.get()
    }

    pub(crate) fn from_word(word: usize) -> Option<Self> {
        NonZeroUsize::new(word).map(MethodRef)
    }
}
