// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A macro to declare typed bit-flag sets (buffer usages, queue capabilities, ...).

/// Declares a `Copy` bit-flag set with named constants and the usual set operators.
///
/// Besides the declared constants the generated type gets `EMPTY`, `ALL` (the union of
/// every declared flag), raw-bit conversions and a `Debug` impl listing flag names.
#[macro_export]
#[doc(hidden)]
macro_rules! prism_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// The empty set.
            pub const EMPTY: Self = Self { bits: 0 };

            /// Every declared flag.
            pub const ALL: Self = Self { bits: 0 $(| $flag_value)* };

            /// Builds a set from raw bits, returning `None` if an undeclared bit is set.
            pub const fn from_bits(bits: $ty) -> Option<Self> {
                if bits & !Self::ALL.bits == 0 {
                    Some(Self { bits })
                } else {
                    None
                }
            }

            /// Builds a set from raw bits, dropping undeclared bits.
            pub const fn from_bits_truncate(bits: $ty) -> Self {
                Self { bits: bits & Self::ALL.bits }
            }

            /// The raw bits of the set.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// `true` when no flag is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// `true` when every flag of `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// `true` when `self` and `other` share at least one flag.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Sets the flags of `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Clears the flags of `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            /// Returns a copy with the flags of `other` set.
            #[must_use]
            pub const fn with(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }

            /// Returns a copy with the flags of `other` cleared.
            #[must_use]
            pub const fn without(self, other: Self) -> Self {
                Self { bits: self.bits & !other.bits }
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                self.with(other)
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.insert(other);
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }
        }

        impl core::ops::Sub for $name {
            type Output = Self;
            fn sub(self, other: Self) -> Self {
                self.without(other)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if self.bits == 0 {
                    return write!(f, "{}(EMPTY)", stringify!($name));
                }
                write!(f, "{}(", stringify!($name))?;
                let mut remaining = self.bits;
                let mut separator = "";
                $(
                    if $flag_value != 0 && (remaining & $flag_value) == $flag_value {
                        write!(f, "{}{}", separator, stringify!($flag_name))?;
                        remaining &= !$flag_value;
                        separator = " | ";
                    }
                )*
                let _ = separator;
                let _ = remaining;
                write!(f, ")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::prism_bitflags;

    prism_bitflags! {
        /// Flags used only by these tests.
        pub struct Caps: u16 {
            const READ = 1 << 0;
            const WRITE = 1 << 1;
            const EXEC = 1 << 2;
        }
    }

    #[test]
    fn test_empty_and_all() {
        assert!(Caps::EMPTY.is_empty());
        assert_eq!(Caps::default(), Caps::EMPTY);
        assert_eq!(Caps::ALL.bits(), 0b111);
        assert_eq!(format!("{:?}", Caps::EMPTY), "Caps(EMPTY)");
    }

    #[test]
    fn test_from_bits_rejects_unknown() {
        assert_eq!(Caps::from_bits(0b011), Some(Caps::READ | Caps::WRITE));
        assert_eq!(Caps::from_bits(0b1000), None);
        assert_eq!(Caps::from_bits_truncate(0b1001), Caps::READ);
    }

    #[test]
    fn test_set_operations() {
        let mut caps = Caps::READ;
        caps |= Caps::EXEC;
        assert!(caps.contains(Caps::READ | Caps::EXEC));
        assert!(!caps.contains(Caps::WRITE));
        assert!(caps.intersects(Caps::WRITE | Caps::EXEC));

        caps.remove(Caps::READ);
        assert_eq!(caps, Caps::EXEC);
        assert_eq!((Caps::ALL - Caps::WRITE), Caps::READ | Caps::EXEC);
        assert_eq!(Caps::ALL & Caps::WRITE, Caps::WRITE);
    }

    #[test]
    fn test_debug_lists_names() {
        assert_eq!(format!("{:?}", Caps::READ | Caps::EXEC), "Caps(READ | EXEC)");
    }
}
