//! Source lists for derived stores.
//!
//! A derived store is built from a tuple of stores (of possibly different
//! value types) or a `Vec` of stores of one type. The calculation receives
//! the current values in the same shape: `(a, b)` for a pair of sources,
//! `Vec<T>` for a vector.

use super::node::Upstream;
use super::store::Store;
use super::subscriber::StoreId;

/// An ordered list of source stores.
pub trait Sources: Send + Sync + 'static {
    /// The values handed to the calculation.
    type Values;

    #[doc(hidden)]
    fn upstream(&self) -> Vec<Upstream>;

    /// Read the cached source values.
    ///
    /// Fails with the ID of the first source that has no value yet.
    fn values(&self) -> Result<Self::Values, StoreId>;
}

macro_rules! tuple_sources {
    ($(($($name:ident),+)),+) => {
        $(
            #[allow(non_snake_case)]
            impl<$($name: Store),+> Sources for ($($name,)+) {
                type Values = ($(<$name as Store>::Value,)+);

                fn upstream(&self) -> Vec<Upstream> {
                    let ($($name,)+) = self;
                    vec![$($name.upstream()),+]
                }

                fn values(&self) -> Result<Self::Values, StoreId> {
                    let ($($name,)+) = self;
                    Ok(($($name.peek().ok_or_else(|| $name.id())?,)+))
                }
            }
        )+
    };
}

tuple_sources!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F)
);

impl<S: Store> Sources for Vec<S> {
    type Values = Vec<S::Value>;

    fn upstream(&self) -> Vec<Upstream> {
        self.iter().map(Store::upstream).collect()
    }

    fn values(&self) -> Result<Self::Values, StoreId> {
        self.iter()
            .map(|source| source.peek().ok_or_else(|| source.id()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Atom, StoreKind};

    #[test]
    fn tuple_values_keep_their_types() {
        let count = Atom::new(2);
        let label = Atom::new(String::from("items"));
        let sources = (count.clone(), label.clone());

        assert_eq!(sources.values(), Ok((2, String::from("items"))));

        let kinds: Vec<StoreKind> = sources.upstream().iter().map(Upstream::kind).collect();
        assert_eq!(kinds, vec![StoreKind::Atom, StoreKind::Atom]);
    }

    #[test]
    fn vec_values_follow_source_order() {
        let sources = vec![Atom::new(1), Atom::new(2), Atom::new(3)];
        assert_eq!(sources.values(), Ok(vec![1, 2, 3]));
        assert_eq!(sources.upstream().len(), 3);
    }
}
