use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_MBYTE};
use std::default::Default;

/// The default size of the address range reserved for the code heap.
pub const DEFAULT_RESERVED_CODE_CACHE_SIZE: usize = 32 * BYTES_IN_MBYTE;
/// The default size committed when the code heap is created.
pub const DEFAULT_INITIAL_CODE_CACHE_SIZE: usize = 160 * BYTES_IN_KBYTE;
/// The default amount committed each time the code heap grows.
pub const DEFAULT_CODE_CACHE_EXPANSION_SIZE: usize = 32 * BYTES_IN_KBYTE;
/// The default allocation granule of the code heap.
pub const DEFAULT_CODE_CACHE_SEGMENT_SIZE: usize = 64;
/// Free space below which the cache is considered full for compilation purposes.
pub const DEFAULT_CODE_CACHE_MINIMUM_FREE_SPACE: usize = 500 * BYTES_IN_KBYTE;
/// The default capacity of one per-exception-type handler cache.
pub const DEFAULT_EXCEPTION_CACHE_SIZE: usize = 16;

/// The prefix of environment variables that set options, e.g. `CODECACHE_EXCEPTION_CACHE_SIZE=32`.
pub const ENV_VAR_PREFIX: &str = "CODECACHE_";

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Code cache options. Options are read from environment variables with the
        /// `CODECACHE_` prefix when the default value is created, and can be changed by
        /// name before a [`crate::CodeCache`] is built from them.
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Set an option by its snake case name. The value is parsed and validated.
            /// Returns false, and keeps the old value, if the value cannot be parsed or is invalid.
            ///
            /// # Panics
            /// Panics if there is no option of the given name.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_from_str()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. The old value is kept.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Can't parse value. The old value is kept.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }

            /// Is `s` the name of an option?
            pub fn is_option(s: &str) -> bool {
                matches!(s, $(stringify!($name))|*)
            }

            /// Create options with the built-in defaults, ignoring environment variables.
            pub fn builtin_defaults() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            /// Read options from environment variables starting with [`ENV_VAR_PREFIX`].
            /// Unknown keys are ignored.
            pub fn read_env_var_settings(&mut self) {
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_VAR_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        if Self::is_option(lowercase) {
                            self.set_from_str(lowercase, &val);
                        }
                    }
                }
            }
        }
    ]
}

options! {
    /// The size of the address range reserved for the code heap. The heap never grows beyond it.
    reserved_code_cache_size:      usize [|v: &usize| *v > 0] = DEFAULT_RESERVED_CODE_CACHE_SIZE,
    /// The size committed when the code heap is created.
    initial_code_cache_size:       usize [|v: &usize| *v > 0] = DEFAULT_INITIAL_CODE_CACHE_SIZE,
    /// The amount committed each time an allocation does not fit.
    code_cache_expansion_size:     usize [|v: &usize| *v > 0] = DEFAULT_CODE_CACHE_EXPANSION_SIZE,
    /// The allocation granule of the code heap.
    code_cache_segment_size:       usize [|v: &usize| v.is_power_of_two() && *v >= 16] = DEFAULT_CODE_CACHE_SEGMENT_SIZE,
    /// The smallest free block (in segments) the heap keeps after splitting.
    code_cache_min_block_length:   usize [|v: &usize| *v > 0] = 1,
    /// Free space below which the cache reports itself as full to the compiler.
    code_cache_minimum_free_space: usize [always_valid] = DEFAULT_CODE_CACHE_MINIMUM_FREE_SPACE,
    /// The capacity of one per-exception-type handler cache.
    exception_cache_size:          usize [|v: &usize| *v > 0] = DEFAULT_EXCEPTION_CACHE_SIZE,
    /// Speculatively disconnect old compiled code when the cache fills up.
    use_code_cache_flushing:       bool  [always_valid] = false,
    /// Run the consistency check in the GC prologue and epilogue.
    verify_code_cache_often:       bool  [always_valid] = false,
    /// Allow compiled code to embed references to objects that may be scavenged.
    scavenge_roots_in_code:        bool  [always_valid] = true,
    /// Commit the code heap with execute permission.
    code_cache_exec_permission:    bool  [always_valid] = true,
}

impl Options {
    /// Set options in bulk from a string of whitespace separated `key=value` pairs.
    /// Returns false if any pair is malformed, unknown or invalid. Valid pairs are still applied.
    pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
        let mut all_ok = true;
        for opt in options.split_ascii_whitespace() {
            let kv: Vec<&str> = opt.splitn(2, '=').collect();
            if kv.len() != 2 || !Self::is_option(kv[0]) {
                warn!("Ignoring malformed or unknown option {:?}", opt);
                all_ok = false;
                continue;
            }
            if !self.set_from_str(kv[0], kv[1]) {
                all_ok = false;
            }
        }
        all_ok
    }

    /// Check relations between options that no single validator can see.
    pub fn is_consistent(&self) -> bool {
        self.initial_code_cache_size <= self.reserved_code_cache_size
    }
}

impl Default for Options {
    fn default() -> Self {
        let mut options = Options::builtin_defaults();
        // If we have env vars that start with CODECACHE_ and match any option (such as CODECACHE_EXCEPTION_CACHE_SIZE),
        // we set the option to its value (if it is a valid value). Otherwise, use the default value.
        options.read_env_var_settings();
        options
    }
}
