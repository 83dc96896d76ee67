//! Macro-particle records and per-species storage.
//!
//! A species stores its particles either as parallel arrays (SoA) or as
//! an array of 64-byte records (AoS); exactly one layout at a time. The
//! record layout doubles as the wire format of the migration blocks:
//! eight doubles `[u, v, w, q, x, y, z, tag]`.

use std::cmp::Ordering;
use std::fmt;

use memoffset::offset_of;
use mpi::datatype::UserDatatype;
use mpi::traits::*;

/// One macro-particle, aligned to a cache line so blocks of records can
/// be scattered with vector stores.
#[derive(Copy, Clone)]
#[repr(C, align(64))]
pub struct SpeciesParticle {
    pub u: f64,
    pub v: f64,
    pub w: f64,
    pub q: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Particle identity tag; also the slot the optional end-of-stream
    /// flag element reuses on the wire.
    pub t: f64,
}

impl SpeciesParticle {
    pub fn new(u: f64, v: f64, w: f64, q: f64, x: f64, y: f64, z: f64, t: f64) -> SpeciesParticle {
        SpeciesParticle {
            u,
            v,
            w,
            q,
            x,
            y,
            z,
            t,
        }
    }

    pub fn position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    pub fn velocity(&self) -> (f64, f64, f64) {
        (self.u, self.v, self.w)
    }
}

impl fmt::Debug for SpeciesParticle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[pcl: x = ({}, {}, {}), u = ({}, {}, {}), q = {}]",
            self.x, self.y, self.z, self.u, self.v, self.w, self.q
        )
    }
}

impl PartialEq for SpeciesParticle {
    fn eq(&self, other: &Self) -> bool {
        self.t == other.t
    }
}

impl PartialOrd for SpeciesParticle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.t.partial_cmp(&other.t)
    }
}

unsafe impl Equivalence for SpeciesParticle {
    type Out = UserDatatype;
    fn equivalent_datatype() -> Self::Out {
        let blocklengths = [1; 8];
        let displacements = [
            offset_of!(SpeciesParticle, u) as mpi::Address,
            offset_of!(SpeciesParticle, v) as mpi::Address,
            offset_of!(SpeciesParticle, w) as mpi::Address,
            offset_of!(SpeciesParticle, q) as mpi::Address,
            offset_of!(SpeciesParticle, x) as mpi::Address,
            offset_of!(SpeciesParticle, y) as mpi::Address,
            offset_of!(SpeciesParticle, z) as mpi::Address,
            offset_of!(SpeciesParticle, t) as mpi::Address,
        ];
        let mpi_double = f64::equivalent_datatype();
        let types: [&dyn Datatype; 8] = [&mpi_double; 8];
        UserDatatype::structured(8, &blocklengths, &displacements, &types)
    }
}

/// Parallel-array storage for one species.
#[derive(Default)]
pub struct ParticleArrays {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub w: Vec<f64>,
    pub q: Vec<f64>,
    pub t: Vec<f64>,
}

impl ParticleArrays {
    pub fn with_capacity(n: usize) -> ParticleArrays {
        ParticleArrays {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            u: Vec::with_capacity(n),
            v: Vec::with_capacity(n),
            w: Vec::with_capacity(n),
            q: Vec::with_capacity(n),
            t: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn push(&mut self, p: SpeciesParticle) {
        self.x.push(p.x);
        self.y.push(p.y);
        self.z.push(p.z);
        self.u.push(p.u);
        self.v.push(p.v);
        self.w.push(p.w);
        self.q.push(p.q);
        self.t.push(p.t);
    }

    pub fn get(&self, i: usize) -> SpeciesParticle {
        SpeciesParticle::new(
            self.u[i], self.v[i], self.w[i], self.q[i], self.x[i], self.y[i], self.z[i], self.t[i],
        )
    }
}

/// Tagged particle layout for one species; the moment gatherer has one
/// kernel per variant.
pub enum ParticleStore {
    SoA(ParticleArrays),
    AoS(Vec<SpeciesParticle>),
}

impl ParticleStore {
    pub fn len(&self) -> usize {
        match self {
            ParticleStore::SoA(arrays) => arrays.len(),
            ParticleStore::AoS(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, p: SpeciesParticle) {
        match self {
            ParticleStore::SoA(arrays) => arrays.push(p),
            ParticleStore::AoS(records) => records.push(p),
        }
    }

    pub fn get(&self, i: usize) -> SpeciesParticle {
        match self {
            ParticleStore::SoA(arrays) => arrays.get(i),
            ParticleStore::AoS(records) => records[i],
        }
    }

    /// Convert in place to the other layout, preserving order.
    pub fn convert(&mut self) {
        match self {
            ParticleStore::SoA(arrays) => {
                let mut records = Vec::with_capacity(arrays.len());
                for i in 0..arrays.len() {
                    records.push(arrays.get(i));
                }
                *self = ParticleStore::AoS(records);
            }
            ParticleStore::AoS(records) => {
                let mut arrays = ParticleArrays::with_capacity(records.len());
                for &p in records.iter() {
                    arrays.push(p);
                }
                *self = ParticleStore::SoA(arrays);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_one_cache_line() {
        assert_eq!(std::mem::size_of::<SpeciesParticle>(), 64);
        assert_eq!(std::mem::align_of::<SpeciesParticle>(), 64);
    }

    #[test]
    fn layout_conversion_round_trips() {
        let mut store = ParticleStore::AoS(
            (0..17)
                .map(|i| {
                    SpeciesParticle::new(
                        i as f64,
                        -(i as f64),
                        0.5,
                        1.0,
                        0.1 * i as f64,
                        0.2,
                        0.3,
                        i as f64,
                    )
                })
                .collect(),
        );
        store.convert();
        assert!(matches!(store, ParticleStore::SoA(_)));
        store.convert();
        assert_eq!(store.len(), 17);
        let p = store.get(7);
        assert_eq!(p.u, 7.0);
        assert_eq!(p.t, 7.0);
    }
}
