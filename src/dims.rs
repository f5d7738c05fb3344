//! Buffer and work-item extents in one, two, or three dimensions.

use std::fmt;

/// The extents of a buffer (and of the work to be enqueued over it).
///
/// The two-dimensional case dominates in practice; one- and
/// three-dimensional buffers appear at the edges (lookup tables, volumes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dims {
    One(usize),
    Two(usize, usize),
    Three(usize, usize, usize),
}

impl Dims {
    /// Returns the number of dimensions defined (1, 2 or 3).
    pub fn dim_count(&self) -> u8 {
        match *self {
            Dims::One(..) => 1,
            Dims::Two(..) => 2,
            Dims::Three(..) => 3,
        }
    }

    /// Returns the total number of elements (product of the extents).
    pub fn len(&self) -> usize {
        match *self {
            Dims::One(x) => x,
            Dims::Two(x, y) => x * y,
            Dims::Three(x, y, z) => x * y * z,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the size in bytes of a buffer of 32-bit floats with these
    /// extents.
    pub fn byte_size(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    /// Returns the extents padded with `1`s out to three dimensions.
    pub fn to_lens(&self) -> [usize; 3] {
        match *self {
            Dims::One(x) => [x, 1, 1],
            Dims::Two(x, y) => [x, y, 1],
            Dims::Three(x, y, z) => [x, y, z],
        }
    }

    /// Returns the extent along the fastest-varying axis (the row width).
    pub fn width(&self) -> usize {
        self.to_lens()[0]
    }

    pub fn height(&self) -> usize {
        self.to_lens()[1]
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Dims::One(x) => write!(f, "[{}]", x),
            Dims::Two(x, y) => write!(f, "[{}, {}]", x, y),
            Dims::Three(x, y, z) => write!(f, "[{}, {}, {}]", x, y, z),
        }
    }
}

impl From<usize> for Dims {
    fn from(x: usize) -> Dims {
        Dims::One(x)
    }
}

impl From<(usize, usize)> for Dims {
    fn from((x, y): (usize, usize)) -> Dims {
        Dims::Two(x, y)
    }
}

impl From<(usize, usize, usize)> for Dims {
    fn from((x, y, z): (usize, usize, usize)) -> Dims {
        Dims::Three(x, y, z)
    }
}

impl From<Dims> for ocl::SpatialDims {
    fn from(dims: Dims) -> ocl::SpatialDims {
        match dims {
            Dims::One(x) => ocl::SpatialDims::One(x),
            Dims::Two(x, y) => ocl::SpatialDims::Two(x, y),
            Dims::Three(x, y, z) => ocl::SpatialDims::Three(x, y, z),
        }
    }
}
