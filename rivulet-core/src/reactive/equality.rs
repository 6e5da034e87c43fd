//! Default equality for store values.
//!
//! Stores suppress writes and derivations that produce a value "the same"
//! as the current one. Sameness is value equality for owned data, pointer
//! identity for shared handles (`Arc`), and for floats it follows the
//! same-value rule: `NaN` equals itself and `0.0` differs from `-0.0`.
//!
//! Implement [`SameValue`] for your own types, or use
//! [`same_value_by_eq!`](crate::same_value_by_eq) to derive it from
//! `PartialEq`.

use std::sync::Arc;

/// Equality used by stores to decide whether a value changed.
pub trait SameValue {
    /// Returns `true` if `self` and `other` should be treated as unchanged.
    fn same_value(&self, other: &Self) -> bool;
}

/// Implement [`SameValue`] in terms of `PartialEq` for the listed types.
#[macro_export]
macro_rules! same_value_by_eq {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::reactive::SameValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )+
    };
}

same_value_by_eq!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    String,
    &'static str,
    serde_json::Value,
);

macro_rules! same_value_float {
    ($($ty:ty),+) => {
        $(
            impl SameValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    if self.is_nan() && other.is_nan() {
                        return true;
                    }
                    // Bitwise comparison keeps 0.0 and -0.0 apart.
                    self.to_bits() == other.to_bits()
                }
            }
        )+
    };
}

same_value_float!(f32, f64);

impl<T: ?Sized> SameValue for Arc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

macro_rules! same_value_tuple {
    ($(($($name:ident : $idx:tt),+)),+) => {
        $(
            impl<$($name: SameValue),+> SameValue for ($($name,)+) {
                fn same_value(&self, other: &Self) -> bool {
                    $(self.$idx.same_value(&other.$idx))&&+
                }
            }
        )+
    };
}

same_value_tuple!(
    (A: 0),
    (A: 0, B: 1),
    (A: 0, B: 1, C: 2),
    (A: 0, B: 1, C: 2, D: 3)
);
