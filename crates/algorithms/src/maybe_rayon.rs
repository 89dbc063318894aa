/// Compatibility layer for rayon/sequential execution.
///
/// With the `parallel` feature this re-exports rayon's parallel iterators.
/// Without it, `into_par_iter()` falls back to `into_iter()` so row kernels
/// and per-band loops compile unchanged.
#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`.
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }

    /// Sequential stand-in for `rayon::prelude::IntoParallelRefIterator`.
    pub trait IntoParallelRefIterator<'a> {
        type Iter;
        fn par_iter(&'a self) -> Self::Iter;
    }

    impl<'a, T: 'a> IntoParallelRefIterator<'a> for [T] {
        type Iter = std::slice::Iter<'a, T>;
        fn par_iter(&'a self) -> Self::Iter {
            self.iter()
        }
    }

    impl<'a, T: 'a> IntoParallelRefIterator<'a> for Vec<T> {
        type Iter = std::slice::Iter<'a, T>;
        fn par_iter(&'a self) -> Self::Iter {
            self.iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;

use fcpg_core::{Raster, RasterElement, Result};
use ndarray::Array2;

/// Build a raster on `template`'s grid by evaluating `cell(row, col)`
/// for every cell, one row per task.
pub(crate) fn map_cells<T, U, F>(template: &Raster<T>, nodata: Option<U>, cell: F) -> Result<Raster<U>>
where
    T: RasterElement,
    U: RasterElement,
    F: Fn(usize, usize) -> U + Sync + Send,
{
    let (rows, cols) = template.shape();
    let data: Vec<U> = (0..rows)
        .into_par_iter()
        .flat_map(|row| (0..cols).map(|col| cell(row, col)).collect::<Vec<_>>())
        .collect();
    let array = Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| fcpg_core::Error::Other(e.to_string()))?;
    template.with_data(array, nodata)
}
