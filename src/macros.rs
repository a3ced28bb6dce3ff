#[macro_export]
macro_rules! assert_almost_eq {
    ($a:expr, $b:expr, $prec:expr $(,)?) => {
        if !$crate::numeric::almost_eq($a, $b, $prec) {
            panic!(
                "assertion failed: `abs(left - right) < {:e}`, (left: `{}`, right: `{}`)",
                $prec, $a, $b
            );
        }
    };
}

/// Defines a fixed-size table indexed by a `strum` enum, replacing lookups of
/// compartment or counter arrays by name.
#[macro_export]
macro_rules! define_indexed_table {
    ($table:ident, $key:ty) => {
        #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $table<T> {
            values: Vec<T>,
        }

        impl<T> $table<T> {
            /// Builds a table by evaluating `f` once per key, in declaration order.
            pub fn from_fn(mut f: impl FnMut($key) -> T) -> Self {
                use strum::IntoEnumIterator;
                Self {
                    values: <$key>::iter().map(&mut f).collect(),
                }
            }

            pub fn iter(&self) -> impl Iterator<Item = ($key, &T)> + '_ {
                use strum::IntoEnumIterator;
                <$key>::iter().zip(self.values.iter())
            }

            pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
                self.values.iter()
            }

            pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
                self.values.iter_mut()
            }

            /// Whether every key has an entry. Deserialized tables may fall short.
            pub fn is_complete(&self) -> bool {
                self.values.len() == <$key as strum::EnumCount>::COUNT
            }
        }

        impl<T> std::ops::Index<$key> for $table<T> {
            type Output = T;
            fn index(&self, key: $key) -> &T {
                &self.values[key as usize]
            }
        }

        impl<T> std::ops::IndexMut<$key> for $table<T> {
            fn index_mut(&mut self, key: $key) -> &mut T {
                &mut self.values[key as usize]
            }
        }
    };
}
