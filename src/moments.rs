//! Particle-to-grid gathering of the ten velocity moments.
//!
//! The dominant cost of a cycle. Each rayon worker accumulates into its
//! own full-size `[nxn, nyn, nzn, 10]` scratch block over a disjoint
//! particle range; the blocks are then reduced in parallel over mesh
//! slabs into the species arrays. No locks, no atomics: the species
//! arrays are written only during the reduction, where every task owns a
//! disjoint slab of node indices.

use ndarray::{Array4, Axis, Zip};
use rayon::prelude::*;

use crate::field::FieldState;
use crate::grid::StaggeredGrid;
use crate::halo::Halo;
use crate::particle::{ParticleArrays, ParticleStore, SpeciesParticle};
use crate::topology::{Face, Topology};

const NUM_MOMENTS: usize = 10;

/// Scatter one particle into a thread-private moment block with
/// cloud-in-cell weights. The particle must lie inside the ghost-padded
/// subdomain; delivery there is the migration stage's contract.
#[inline]
#[allow(clippy::too_many_arguments)]
fn deposit(
    moments: &mut Array4<f64>,
    grid: &StaggeredGrid,
    x: f64,
    y: f64,
    z: f64,
    u: f64,
    v: f64,
    w: f64,
    q: f64,
) {
    let velmoments = [
        1.0,
        u,
        v,
        w,
        u * u,
        u * v,
        u * w,
        v * v,
        v * w,
        w * w,
    ];

    let ix = 2 + ((x - grid.x_start) * grid.inv_dx).floor() as isize;
    let iy = 2 + ((y - grid.y_start) * grid.inv_dy).floor() as isize;
    let iz = 2 + ((z - grid.z_start) * grid.inv_dz).floor() as isize;
    debug_assert!(ix >= 1 && (ix as usize) < grid.nxn, "particle x out of subdomain");
    debug_assert!(iy >= 1 && (iy as usize) < grid.nyn, "particle y out of subdomain");
    debug_assert!(iz >= 1 && (iz as usize) < grid.nzn, "particle z out of subdomain");
    let (ix, iy, iz) = (ix as usize, iy as usize, iz as usize);

    let xi0 = x - grid.x_n(ix - 1);
    let eta0 = y - grid.y_n(iy - 1);
    let zeta0 = z - grid.z_n(iz - 1);
    let xi1 = grid.x_n(ix) - x;
    let eta1 = grid.y_n(iy) - y;
    let zeta1 = grid.z_n(iz) - z;

    let qi = q * grid.inv_vol;
    let weight0 = qi * xi0;
    let weight1 = qi * xi1;
    let weight00 = weight0 * eta0;
    let weight01 = weight0 * eta1;
    let weight10 = weight1 * eta0;
    let weight11 = weight1 * eta1;
    let weights = [
        weight00 * zeta0, // 000
        weight00 * zeta1, // 001
        weight01 * zeta0, // 010
        weight01 * zeta1, // 011
        weight10 * zeta0, // 100
        weight10 * zeta1, // 101
        weight11 * zeta0, // 110
        weight11 * zeta1, // 111
    ];
    let corners = [
        (ix, iy, iz),
        (ix, iy, iz - 1),
        (ix, iy - 1, iz),
        (ix, iy - 1, iz - 1),
        (ix - 1, iy, iz),
        (ix - 1, iy, iz - 1),
        (ix - 1, iy - 1, iz),
        (ix - 1, iy - 1, iz - 1),
    ];

    for (c, &(ci, cj, ck)) in corners.iter().enumerate() {
        for (m, &vm) in velmoments.iter().enumerate() {
            moments[[ci, cj, ck, m]] += vm * weights[c];
        }
    }
}

fn chunk_len(nop: usize) -> usize {
    let nthreads = rayon::current_num_threads();
    // chunk length cannot be zero
    if nop > nthreads {
        nop / nthreads
    } else {
        nop.max(1)
    }
}

fn accumulate_soa(grid: &StaggeredGrid, p: &ParticleArrays) -> Vec<Array4<f64>> {
    let len = chunk_len(p.len());
    let dims = (grid.nxn, grid.nyn, grid.nzn, NUM_MOMENTS);
    p.x.par_chunks(len)
        .enumerate()
        .map(|(ci, xs)| {
            let base = ci * len;
            let mut moments = Array4::zeros(dims);
            for (off, &x) in xs.iter().enumerate() {
                let i = base + off;
                deposit(
                    &mut moments,
                    grid,
                    x,
                    p.y[i],
                    p.z[i],
                    p.u[i],
                    p.v[i],
                    p.w[i],
                    p.q[i],
                );
            }
            moments
        })
        .collect()
}

fn accumulate_aos(grid: &StaggeredGrid, pcls: &[SpeciesParticle]) -> Vec<Array4<f64>> {
    let len = chunk_len(pcls.len());
    let dims = (grid.nxn, grid.nyn, grid.nzn, NUM_MOMENTS);
    pcls.par_chunks(len)
        .map(|chunk| {
            let mut moments = Array4::zeros(dims);
            for pcl in chunk {
                deposit(
                    &mut moments,
                    grid,
                    pcl.x,
                    pcl.y,
                    pcl.z,
                    pcl.u,
                    pcl.v,
                    pcl.w,
                    pcl.q,
                );
            }
            moments
        })
        .collect()
}

/// Sum the per-thread blocks into the species arrays. Parallel over mesh
/// slabs; the species axis stays serial.
fn reduce_moments(field: &mut FieldState, is: usize, partials: &[Array4<f64>], inv_vol: f64) {
    let ax = Axis(0);
    let targets: [(&mut Array4<f64>, usize); NUM_MOMENTS] = [
        (&mut field.rhons, 0),
        (&mut field.jxs, 1),
        (&mut field.jys, 2),
        (&mut field.jzs, 3),
        (&mut field.pxxsn, 4),
        (&mut field.pxysn, 5),
        (&mut field.pxzsn, 6),
        (&mut field.pyysn, 7),
        (&mut field.pyzsn, 8),
        (&mut field.pzzsn, 9),
    ];
    for (target, slot) in targets {
        let mut out = target.index_axis_mut(ax, is);
        Zip::indexed(&mut out).par_for_each(|(i, j, k), r| {
            let mut sum = 0.0;
            for block in partials {
                sum += block[[i, j, k, slot]];
            }
            *r += inv_vol * sum;
        });
    }
}

/// Gather all ten moments of species `is` onto the nodes. Dispatches on
/// the particle layout; both kernels produce identical moments for the
/// same particle multiset.
pub fn sum_moments(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    store: &ParticleStore,
    is: usize,
) {
    if store.is_empty() {
        return;
    }
    let partials = match store {
        ParticleStore::SoA(arrays) => accumulate_soa(grid, arrays),
        ParticleStore::AoS(records) => accumulate_aos(grid, records),
    };
    reduce_moments(field, is, &partials, grid.inv_vol);
}

/// Double the first interior moment layer on faces with no neighbour, so
/// the boundary-node integrals account for the half cell outside the
/// wall.
pub fn adjust_non_periodic_densities<T: Topology>(field: &mut FieldState, topo: &T, is: usize) {
    use ndarray::s;
    let ax = Axis(0);
    let targets: [&mut Array4<f64>; NUM_MOMENTS] = [
        &mut field.rhons,
        &mut field.jxs,
        &mut field.jys,
        &mut field.jzs,
        &mut field.pxxsn,
        &mut field.pxysn,
        &mut field.pxzsn,
        &mut field.pyysn,
        &mut field.pyzsn,
        &mut field.pzzsn,
    ];
    for target in targets {
        let mut arr = target.index_axis_mut(ax, is);
        let (nxn, nyn, nzn) = (arr.shape()[0], arr.shape()[1], arr.shape()[2]);
        if topo.neighbor(Face::XLeft).is_none() {
            arr.slice_mut(s![1, 1..nyn - 1, 1..nzn - 1])
                .map_inplace(|v| *v += *v);
        }
        if topo.neighbor(Face::XRight).is_none() {
            arr.slice_mut(s![nxn - 2, 1..nyn - 1, 1..nzn - 1])
                .map_inplace(|v| *v += *v);
        }
        if topo.neighbor(Face::YLeft).is_none() {
            arr.slice_mut(s![1..nxn - 1, 1, 1..nzn - 1])
                .map_inplace(|v| *v += *v);
        }
        if topo.neighbor(Face::YRight).is_none() {
            arr.slice_mut(s![1..nxn - 1, nyn - 2, 1..nzn - 1])
                .map_inplace(|v| *v += *v);
        }
        if topo.neighbor(Face::ZLeft).is_none() {
            arr.slice_mut(s![1..nxn - 1, 1..nyn - 1, 1])
                .map_inplace(|v| *v += *v);
        }
        if topo.neighbor(Face::ZRight).is_none() {
            arr.slice_mut(s![1..nxn - 1, 1..nyn - 1, nzn - 2])
                .map_inplace(|v| *v += *v);
        }
    }
}

/// Additive halo exchange of all ten moment arrays for one species,
/// followed by the non-periodic fix-up and a ghost overwrite.
pub fn communicate_ghost_p2g<H: Halo, T: Topology>(
    field: &mut FieldState,
    halo: &H,
    topo: &T,
    is: usize,
) {
    let ax = Axis(0);
    {
        let targets: [&mut Array4<f64>; NUM_MOMENTS] = [
            &mut field.rhons,
            &mut field.jxs,
            &mut field.jys,
            &mut field.jzs,
            &mut field.pxxsn,
            &mut field.pxysn,
            &mut field.pxzsn,
            &mut field.pyysn,
            &mut field.pyzsn,
            &mut field.pzzsn,
        ];
        for target in targets {
            halo.interp_add(target.index_axis_mut(ax, is));
        }
    }
    adjust_non_periodic_densities(field, topo, is);
    let targets: [&mut Array4<f64>; NUM_MOMENTS] = [
        &mut field.rhons,
        &mut field.jxs,
        &mut field.jys,
        &mut field.jzs,
        &mut field.pxxsn,
        &mut field.pxysn,
        &mut field.pxzsn,
        &mut field.pyysn,
        &mut field.pyzsn,
        &mut field.pzzsn,
    ];
    for target in targets {
        halo.node_p(target.index_axis_mut(ax, is));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::halo::LocalHalo;
    use crate::topology::CartTopology;

    fn setup(nc: usize) -> (StaggeredGrid, FieldState) {
        let d = 1.0 / nc as f64;
        let grid = StaggeredGrid::new([nc, nc, nc], [d, d, d], [0.0; 3]);
        let cfg = Config::periodic(vec![1.0], vec![0.1], 1.0, 0.1, 1.0, [1.0; 3]);
        let field = FieldState::new(&grid, cfg.ns);
        (grid, field)
    }

    /// One particle at a cell center spreads exactly an eighth of
    /// `invVOL` to each of its eight corner nodes.
    #[test]
    fn single_particle_eighth_weights() {
        let (grid, mut field) = setup(4);
        let store = ParticleStore::AoS(vec![SpeciesParticle::new(
            0.0, 0.0, 0.0, 1.0, 0.375, 0.375, 0.375, 0.0,
        )]);
        sum_moments(&mut field, &grid, &store, 0);
        // particle sits at the center of cell (1,1,1) counted from the
        // subdomain corner: its cell spans nodes 2..3 in each direction
        let expect = grid.inv_vol / 8.0;
        for &i in &[2usize, 3] {
            for &j in &[2usize, 3] {
                for &k in &[2usize, 3] {
                    let got = field.rhons[[0, i, j, k]];
                    assert!(
                        (got - expect).abs() < 1e-12 * expect.abs(),
                        "corner ({},{},{}) got {} expected {}",
                        i,
                        j,
                        k,
                        got,
                        expect
                    );
                }
            }
        }
        // nothing anywhere else
        let total: f64 = field.rhons.sum();
        assert!((total - grid.inv_vol).abs() < 1e-12 * grid.inv_vol);
    }

    /// The eight node contributions of a particle sum to `q * invVOL`
    /// wherever it sits in its cell.
    #[test]
    fn trilinear_partition_of_unity() {
        let (grid, mut field) = setup(4);
        let q = 0.7;
        let store = ParticleStore::AoS(vec![SpeciesParticle::new(
            0.0, 0.0, 0.0, q, 0.31, 0.12, 0.618, 0.0,
        )]);
        sum_moments(&mut field, &grid, &store, 0);
        let total: f64 = field.rhons.sum();
        assert!((total - q * grid.inv_vol).abs() < 1e-12 * grid.inv_vol);
    }

    /// Total gathered charge equals total particle charge after the halo
    /// addition, summing each physical node once.
    #[test]
    fn charge_conservation_periodic() {
        let (grid, mut field) = setup(4);
        let topo = CartTopology::single([true; 3]);
        let halo = LocalHalo::periodic();
        // particles scattered through the box, some near faces
        let mut pcls = Vec::new();
        let mut total_q = 0.0;
        for n in 0..64 {
            let f = n as f64;
            let x = (0.013 + 0.977 * (f * 0.111).fract()).fract();
            let y = (0.71 + 0.613 * (f * 0.237).fract()).fract();
            let z = (0.429 + 0.331 * (f * 0.379).fract()).fract();
            let q = 0.5 + 0.01 * f;
            total_q += q;
            pcls.push(SpeciesParticle::new(0.1, 0.2, 0.3, q, x, y, z, f));
        }
        let store = ParticleStore::AoS(pcls);
        sum_moments(&mut field, &grid, &store, 0);
        communicate_ghost_p2g(&mut field, &halo, &topo, 0);

        let vol = grid.dx * grid.dy * grid.dz;
        let mut sum = 0.0;
        for i in 1..grid.nxn - 2 {
            for j in 1..grid.nyn - 2 {
                for k in 1..grid.nzn - 2 {
                    sum += field.rhons[[0, i, j, k]] * vol;
                }
            }
        }
        assert!(
            (sum - total_q).abs() < 1e-12 * total_q,
            "gathered {} expected {}",
            sum,
            total_q
        );
    }

    /// Both layout kernels agree bitwise on dyadic inputs.
    #[test]
    fn soa_and_aos_share_an_oracle() {
        let (grid, mut field_a) = setup(4);
        let (_, mut field_b) = setup(4);
        let mut records = Vec::new();
        for n in 0..32 {
            let f = n as f64;
            records.push(SpeciesParticle::new(
                0.5 + f * 0.125,
                -0.25,
                f * 0.0625,
                1.0,
                0.125 + 0.015625 * f,
                0.25,
                0.5,
                f,
            ));
        }
        let aos = ParticleStore::AoS(records.clone());
        let mut soa = ParticleStore::AoS(records);
        soa.convert();

        sum_moments(&mut field_a, &grid, &aos, 0);
        sum_moments(&mut field_b, &grid, &soa, 0);

        for (a, b) in field_a.rhons.iter().zip(field_b.rhons.iter()) {
            assert_eq!(a, b);
        }
        for (a, b) in field_a.pxysn.iter().zip(field_b.pxysn.iter()) {
            assert_eq!(a, b);
        }
    }

    /// Gathering a union of particle sets equals the sum of gathering the
    /// parts, bitwise, for dyadic inputs under a single-chunk schedule.
    #[test]
    fn moment_linearity() {
        let (grid, mut field_union) = setup(4);
        let (_, mut field_parts) = setup(4);
        let a: Vec<SpeciesParticle> = (0..4)
            .map(|n| {
                SpeciesParticle::new(1.0, 0.5, 0.25, 1.0, 0.125 * (n as f64 + 1.0), 0.25, 0.5, 0.0)
            })
            .collect();
        let b: Vec<SpeciesParticle> = (0..4)
            .map(|n| {
                SpeciesParticle::new(-0.5, 2.0, 0.0, 1.0, 0.625, 0.125 * (n as f64 + 1.0), 0.25, 0.0)
            })
            .collect();
        let mut both = a.clone();
        both.extend_from_slice(&b);

        sum_moments(&mut field_union, &grid, &ParticleStore::AoS(both), 0);
        sum_moments(&mut field_parts, &grid, &ParticleStore::AoS(a), 0);
        sum_moments(&mut field_parts, &grid, &ParticleStore::AoS(b), 0);

        for (u, p) in field_union.jxs.iter().zip(field_parts.jxs.iter()) {
            assert_eq!(u, p);
        }
    }

    /// Walls double the first interior layer.
    #[test]
    fn wall_doubling() {
        let (grid, mut field) = setup(4);
        let topo = CartTopology::single([false; 3]);
        let halo = LocalHalo::bounded();
        // a particle resting exactly on the x-left wall plane
        let store = ParticleStore::AoS(vec![SpeciesParticle::new(
            0.0, 0.0, 0.0, 1.0, 0.0, 0.375, 0.375, 0.0,
        )]);
        sum_moments(&mut field, &grid, &store, 0);
        let before = field.rhons[[0, 1, 2, 2]];
        communicate_ghost_p2g(&mut field, &halo, &topo, 0);
        let after = field.rhons[[0, 1, 2, 2]];
        assert!((after - 2.0 * before).abs() < 1e-14 * before.abs());
        let _ = grid;
    }
}
