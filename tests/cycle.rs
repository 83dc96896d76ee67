//! End-to-end cycle scenarios on a single-rank periodic or bounded box.

use ndarray::Array3;

use garnet::config::{Case, Config};
use garnet::field::maxwell::{calculate_b, calculate_e, calculate_hat_functions};
use garnet::field::FieldState;
use garnet::grid::StaggeredGrid;
use garnet::halo::LocalHalo;
use garnet::moments::{communicate_ghost_p2g, sum_moments};
use garnet::particle::{ParticleStore, SpeciesParticle};
use garnet::solver::NoReduce;
use garnet::topology::CartTopology;

fn cubic_grid(nc: usize, length: f64) -> StaggeredGrid {
    let d = length / nc as f64;
    StaggeredGrid::new([nc, nc, nc], [d, d, d], [0.0; 3])
}

/// One full field cycle: moments, hats, E, B, pack.
fn advance_cycle(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    cfg: &Config,
    halo: &LocalHalo,
    topo: &CartTopology,
    species: &[ParticleStore],
) {
    field.set_zero_densities();
    for (is, store) in species.iter().enumerate() {
        sum_moments(field, grid, store, is);
        communicate_ghost_p2g(field, halo, topo, is);
    }
    field.sum_over_species();
    field.sum_over_species_j();
    field.interp_densities_n2c(grid);
    calculate_hat_functions(field, grid, cfg, halo);
    calculate_e(field, grid, cfg, halo, topo, &NoReduce);
    calculate_b(field, grid, cfg, halo, topo);
    field.set_field_for_pcls();
}

fn max_abs(f: &Array3<f64>) -> f64 {
    f.iter().fold(0.0, |m, v| m.max(v.abs()))
}

/// A quiet two-species plasma in a uniform magnetic field must stay
/// quiet: E remains zero and B keeps its initial value over many cycles.
#[test]
fn drift_free_equilibrium() {
    let nc = 4;
    let grid = cubic_grid(nc, 1.0);
    let four_pi = 4.0 * std::f64::consts::PI;
    let mut cfg = Config::periodic(
        vec![-1.0, 1.0],
        vec![1.0 / four_pi, -1.0 / four_pi],
        1.0,
        0.05,
        1.0,
        [1.0; 3],
    );
    cfg.b0 = [0.0, 0.0, 1.0];
    cfg.poisson_correction = true;
    let topo = CartTopology::single([true; 3]);
    let halo = LocalHalo::periodic();

    let mut field = FieldState::new(&grid, cfg.ns);
    field.init_uniform(&grid, &cfg);

    // co-located cold particle pairs with opposite charge
    let vol = grid.dx * grid.dy * grid.dz;
    let mut plus = Vec::new();
    let mut minus = Vec::new();
    let mut tag = 0.0;
    for cx in 0..nc {
        for cy in 0..nc {
            for cz in 0..nc {
                let x = grid.x_start + (cx as f64 + 0.5) * grid.dx;
                let y = grid.y_start + (cy as f64 + 0.5) * grid.dy;
                let z = grid.z_start + (cz as f64 + 0.5) * grid.dz;
                let q = vol / four_pi;
                plus.push(SpeciesParticle::new(0.0, 0.0, 0.0, q, x, y, z, tag));
                minus.push(SpeciesParticle::new(0.0, 0.0, 0.0, -q, x, y, z, tag));
                tag += 1.0;
            }
        }
    }
    let species = vec![ParticleStore::AoS(plus), ParticleStore::AoS(minus)];

    for _ in 0..10 {
        advance_cycle(&mut field, &grid, &cfg, &halo, &topo, &species);
    }

    assert!(max_abs(&field.ex) <= 1e-8, "Ex grew to {}", max_abs(&field.ex));
    assert!(max_abs(&field.ey) <= 1e-8);
    assert!(max_abs(&field.ez) <= 1e-8);
    assert!(max_abs(&field.bxn) <= 1e-10);
    assert!(max_abs(&field.byn) <= 1e-10);
    let bz_dev = field
        .bzn
        .iter()
        .fold(0.0f64, |m, v| m.max((v - 1.0).abs()));
    assert!(bz_dev <= 1e-10, "Bz drifted by {}", bz_dev);
}

/// Divergence cleaning: a solenoidal-violating seed field with zero
/// charge loses its divergence by at least six orders of magnitude in a
/// single cycle.
#[test]
fn divergence_cleaning_scrubs_div_e() {
    let nc = 8;
    let grid = cubic_grid(nc, 1.0);
    let mut cfg = Config::periodic(vec![-1.0], vec![0.0], 1.0, 0.05, 1.0, [1.0; 3]);
    cfg.poisson_correction = true;
    cfg.cg_tol = 1e-14;
    cfg.gmres_tol = 1e-12;
    let topo = CartTopology::single([true; 3]);
    let halo = LocalHalo::periodic();

    let mut field = FieldState::new(&grid, cfg.ns);
    let tau = 2.0 * std::f64::consts::PI;
    for i in 0..grid.nxn {
        for j in 0..grid.nyn {
            for k in 0..grid.nzn {
                field.ex[[i, j, k]] = (tau * grid.x_n(i)).sin();
            }
        }
    }

    let mut div = grid.center_array();
    grid.div_n2c(&mut div, field.ex.view(), field.ey.view(), field.ez.view());
    let before = max_abs(&div);
    assert!(before > 1.0, "seed divergence too small: {}", before);

    // no particles: the moments stay zero and rhoc = 0
    calculate_e(&mut field, &grid, &cfg, &halo, &topo, &NoReduce);

    grid.div_n2c(&mut div, field.ex.view(), field.ey.view(), field.ez.view());
    let after = max_abs(&div);
    assert!(
        after * 1.0e6 <= before,
        "divergence only dropped from {} to {}",
        before,
        after
    );
}

/// Perfect-conductor walls: a face that starts with no normal electric
/// field keeps none through an implicit solve, even when the tangential
/// field is finite.
#[test]
fn perfect_conductor_face_stays_clean() {
    let nc = 4;
    let grid = cubic_grid(nc, 1.0);
    let cfg = Config::new(
        vec![-1.0],
        vec![0.0],
        1.0,
        0.05,
        1.0,
        1.0,
        [0.0, 0.0, 1.0],
        [1.0; 3],
        [1; 6],
        [0; 6],
        1e-12,
        1e-12,
        false,
        Case::Default,
    )
    .unwrap();
    let topo = CartTopology::single([false; 3]);
    let halo = LocalHalo::bounded();

    let mut field = FieldState::new(&grid, cfg.ns);
    field.init_uniform(&grid, &cfg);
    field.rhons.fill(0.0);
    field.ey.fill(0.01);

    calculate_e(&mut field, &grid, &cfg, &halo, &topo, &NoReduce);

    let mut worst = 0.0f64;
    for j in 1..grid.nyn - 1 {
        for k in 1..grid.nzn - 1 {
            worst = worst.max(field.ex[[1, j, k]].abs());
        }
    }
    assert!(worst <= 1e-8, "Ex on the conductor face grew to {}", worst);
}

/// The packed mover view tracks the fields produced by the cycle.
#[test]
fn packed_fields_follow_the_cycle() {
    let grid = cubic_grid(4, 1.0);
    let mut cfg = Config::periodic(vec![-1.0], vec![0.0], 1.0, 0.05, 1.0, [1.0; 3]);
    cfg.b0 = [0.25, 0.0, 0.0];
    let topo = CartTopology::single([true; 3]);
    let halo = LocalHalo::periodic();
    let mut field = FieldState::new(&grid, cfg.ns);
    field.init_uniform(&grid, &cfg);

    advance_cycle(&mut field, &grid, &cfg, &halo, &topo, &[]);

    let view = field.field_for_pcls();
    for i in 1..grid.nxn - 1 {
        for j in 1..grid.nyn - 1 {
            for k in 1..grid.nzn - 1 {
                assert!((view[[i, j, k, 0]] - field.bxn[[i, j, k]]).abs() < 1e-15);
                assert!((view[[i, j, k, 4]] - field.ex[[i, j, k]]).abs() < 1e-15);
            }
        }
    }
}
