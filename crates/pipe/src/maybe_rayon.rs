/// Row parallelism that degrades to plain iterators.
///
/// With the `parallel` feature this is rayon's prelude. Without it,
/// `into_par_iter()` is provided for every `IntoIterator` and simply calls
/// `into_iter()`, so chains like `.into_par_iter().flat_map(..).collect()`
/// compile unchanged against `std::iter::Iterator`.
#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    pub trait IntoParallelIterator {
        type Iter;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;

        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;
