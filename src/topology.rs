//! Process topology queries.
//!
//! The core never discovers the Cartesian layout itself; it is handed a
//! neighbour graph. `None` neighbours mark physical boundaries, where the
//! caller applies the face boundary condition instead of exchanging.

/// Mesh faces in the order used by every boundary-code table:
/// `[Xright, Xleft, Yright, Yleft, Zright, Zleft]`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Face {
    XRight = 0,
    XLeft = 1,
    YRight = 2,
    YLeft = 3,
    ZRight = 4,
    ZLeft = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::XRight,
        Face::XLeft,
        Face::YRight,
        Face::YLeft,
        Face::ZRight,
        Face::ZLeft,
    ];

    pub fn axis(self) -> usize {
        (self as usize) / 2
    }

    pub fn is_right(self) -> bool {
        (self as usize) % 2 == 0
    }
}

pub trait Topology {
    fn rank(&self) -> i32;
    fn nprocs(&self) -> i32;
    /// Neighbour owning the subdomain across `face`, or `None` at a
    /// physical boundary.
    fn neighbor(&self, face: Face) -> Option<i32>;

    fn xleft_neighbor(&self) -> Option<i32> {
        self.neighbor(Face::XLeft)
    }
    fn xright_neighbor(&self) -> Option<i32> {
        self.neighbor(Face::XRight)
    }
    fn yleft_neighbor(&self) -> Option<i32> {
        self.neighbor(Face::YLeft)
    }
    fn yright_neighbor(&self) -> Option<i32> {
        self.neighbor(Face::YRight)
    }
    fn zleft_neighbor(&self) -> Option<i32> {
        self.neighbor(Face::ZLeft)
    }
    fn zright_neighbor(&self) -> Option<i32> {
        self.neighbor(Face::ZRight)
    }
}

/// Row-major Cartesian decomposition: rank = (ix * npy + iy) * npz + iz.
pub struct CartTopology {
    rank: i32,
    dims: [i32; 3],
    coords: [i32; 3],
    periodic: [bool; 3],
}

impl CartTopology {
    pub fn new(rank: i32, dims: [i32; 3], periodic: [bool; 3]) -> CartTopology {
        let iz = rank % dims[2];
        let iy = (rank / dims[2]) % dims[1];
        let ix = rank / (dims[1] * dims[2]);
        CartTopology {
            rank,
            dims,
            coords: [ix, iy, iz],
            periodic,
        }
    }

    /// Single-process box, periodic where requested.
    pub fn single(periodic: [bool; 3]) -> CartTopology {
        CartTopology::new(0, [1, 1, 1], periodic)
    }

    fn rank_of(&self, coords: [i32; 3]) -> i32 {
        (coords[0] * self.dims[1] + coords[1]) * self.dims[2] + coords[2]
    }
}

impl Topology for CartTopology {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn nprocs(&self) -> i32 {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    fn neighbor(&self, face: Face) -> Option<i32> {
        let axis = face.axis();
        let step = if face.is_right() { 1 } else { -1 };
        let mut coords = self.coords;
        coords[axis] += step;
        if coords[axis] < 0 || coords[axis] >= self.dims[axis] {
            if self.periodic[axis] {
                coords[axis] = (coords[axis] + self.dims[axis]) % self.dims[axis];
            } else {
                return None;
            }
        }
        Some(self.rank_of(coords))
    }
}
