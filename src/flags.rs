//! Small bitflag helpers used for the lifter's flag bytes (`LiftFlags`,
//! `CallFlags`). Kept minimal rather than pulling in a flags crate: each
//! flag set here is a handful of bits queried by name, not combined or
//! iterated, so a macro-generated wrapper over the raw integer is enough.

#[macro_export]
macro_rules! flag_bit {
    ($flag_name:ident $fun_name:ident $comment:literal) => {
        #[doc = $comment]
        pub fn $fun_name(&self) -> bool {
            self.0 & $flag_name != 0
        }
    };
}

#[macro_export]
macro_rules! flag_set {
    ($struct_name:ident, $($flag_name:ident $flag_fun_name:ident $flag_doc:literal),* $(,)?) => {
        #[derive(Clone, Copy, Eq, PartialEq, Hash, Default)]
        pub struct $struct_name(pub u32);

        impl $struct_name {
            pub const EMPTY: Self = Self(0);

            pub fn from_raw(value: u32) -> Self {
                Self(value)
            }

            pub fn into_raw(self) -> u32 {
                self.0
            }

            pub fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            $(
                $crate::flag_bit!($flag_name $flag_fun_name $flag_doc);
            )*
        }

        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, stringify!($struct_name))?;
                f.debug_list()
                    $(.entries(if self.$flag_fun_name() { Some(stringify!($flag_name)) } else { None }))*
                    .finish()
            }
        }
    };
}
