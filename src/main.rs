use std::error::Error;
use std::path::PathBuf;

use indicatif::FormattedDuration;
use log::info;
use mpi::traits::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

mod setup;
use setup::{Deck, InputError, RunControl};

use garnet::config::Config;
use garnet::field::maxwell::{calculate_b, calculate_e, calculate_hat_functions};
use garnet::field::FieldState;
use garnet::grid::StaggeredGrid;
use garnet::halo::{Halo, LocalHalo, MpiHalo};
use garnet::moments::{communicate_ghost_p2g, sum_moments};
use garnet::particle::{ParticleArrays, ParticleStore, SpeciesParticle};
use garnet::solver::{GlobalReduce, MpiReduce, NoReduce};
use garnet::topology::{CartTopology, Topology};

fn ettc(start: std::time::Instant, current: usize, total: usize) -> std::time::Duration {
    let rt = start.elapsed().as_secs_f64();
    let ettc = rt * ((total - current) as f64) / (current as f64);
    std::time::Duration::from_secs_f64(ettc)
}

/// Load a uniform Maxwellian plasma on the owned cells: `npc` particles
/// per cell, charge chosen so the cell-averaged density matches the
/// configured background.
fn load_species(
    grid: &StaggeredGrid,
    cfg: &Config,
    control: &RunControl,
    is: usize,
    rng: &mut ChaCha8Rng,
) -> ParticleStore {
    let npc = control.npc;
    let vol = grid.dx * grid.dy * grid.dz;
    let q = cfg.rho_init[is] * vol / npc as f64;
    let vth = control.vth[is];
    let owned = [grid.nxc - 2, grid.nyc - 2, grid.nzc - 2];

    let mut arrays = ParticleArrays::with_capacity(npc * owned[0] * owned[1] * owned[2]);
    let mut tag = 0.0;
    for cx in 0..owned[0] {
        for cy in 0..owned[1] {
            for cz in 0..owned[2] {
                for _ in 0..npc {
                    let x = grid.x_start + (cx as f64 + rng.gen::<f64>()) * grid.dx;
                    let y = grid.y_start + (cy as f64 + rng.gen::<f64>()) * grid.dy;
                    let z = grid.z_start + (cz as f64 + rng.gen::<f64>()) * grid.dz;
                    let u = vth * rng.sample::<f64, _>(StandardNormal);
                    let v = vth * rng.sample::<f64, _>(StandardNormal);
                    let w = vth * rng.sample::<f64, _>(StandardNormal);
                    arrays.push(SpeciesParticle::new(u, v, w, q, x, y, z, tag));
                    tag += 1.0;
                }
            }
        }
    }
    ParticleStore::SoA(arrays)
}

#[allow(clippy::too_many_arguments)]
fn run_cycles<H: Halo, T: Topology, R: GlobalReduce>(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    cfg: &Config,
    halo: &H,
    topo: &T,
    reduce: &R,
    species: &[ParticleStore],
    ncycles: usize,
) {
    let runtime = std::time::Instant::now();
    for cycle in 0..ncycles {
        field.set_zero_densities();
        for (is, store) in species.iter().enumerate() {
            sum_moments(field, grid, store, is);
            communicate_ghost_p2g(field, halo, topo, is);
        }
        field.sum_over_species();
        field.sum_over_species_j();
        field.interp_densities_n2c(grid);

        calculate_hat_functions(field, grid, cfg, halo);
        let report = calculate_e(field, grid, cfg, halo, topo, reduce);
        calculate_b(field, grid, cfg, halo, topo);
        field.set_field_for_pcls();

        // the mover and the migration drain plug in here, consuming the
        // packed field view and the block channels

        if topo.rank() == 0 {
            info!(
                "cycle {: >4}: field solve {} iterations, residual {:.3e}, RT = {}, ETTC = {}",
                cycle,
                report.maxwell.iterations,
                report.maxwell.final_residual,
                FormattedDuration(runtime.elapsed()),
                FormattedDuration(ettc(runtime, cycle + 1, ncycles)),
            );
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let universe = mpi::initialize().ok_or("MPI initialization failed")?;
    let world = universe.world();
    let rank = world.rank();

    let args: Vec<String> = std::env::args().collect();
    let path = args
        .get(1)
        .ok_or(InputError::InvalidInputFile("no file supplied"))?;
    let path = PathBuf::from(path);

    let deck = Deck::from_file(&path)?;
    let (cfg, control) = deck.build()?;

    let nprocs = control.nprocs;
    if world.size() != nprocs[0] * nprocs[1] * nprocs[2] {
        return Err(Box::new(InputError::InvalidInputFile(
            "process count does not match the npx*npy*npz decomposition",
        )));
    }
    let topo = CartTopology::new(rank, nprocs, control.periodic);

    // local mesh: an even slab of the global box per process
    let owned = [
        control.ncells[0] / nprocs[0] as usize,
        control.ncells[1] / nprocs[1] as usize,
        control.ncells[2] / nprocs[2] as usize,
    ];
    let spacing = [
        cfg.lx / control.ncells[0] as f64,
        cfg.ly / control.ncells[1] as f64,
        cfg.lz / control.ncells[2] as f64,
    ];
    let coords = [
        rank / (nprocs[1] * nprocs[2]),
        (rank / nprocs[2]) % nprocs[1],
        rank % nprocs[2],
    ];
    let origin = [
        coords[0] as f64 * owned[0] as f64 * spacing[0],
        coords[1] as f64 * owned[1] as f64 * spacing[1],
        coords[2] as f64 * owned[2] as f64 * spacing[2],
    ];
    let grid = StaggeredGrid::new(owned, spacing, origin);

    let mut field = FieldState::new(&grid, cfg.ns);
    field.init_uniform(&grid, &cfg);
    field.update_inj_fields(&cfg, &topo);

    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);
    let species: Vec<ParticleStore> = (0..cfg.ns)
        .map(|is| load_species(&grid, &cfg, &control, is, &mut rng))
        .collect();

    if rank == 0 {
        info!(
            "running on {} ranks with {} threads per rank, {} cells, {} species",
            world.size(),
            rayon::current_num_threads(),
            control.ncells[0] * control.ncells[1] * control.ncells[2],
            cfg.ns
        );
    }

    if world.size() > 1 {
        let halo = MpiHalo::new(&world, &topo);
        let reduce = MpiReduce(&world);
        run_cycles(
            &mut field,
            &grid,
            &cfg,
            &halo,
            &topo,
            &reduce,
            &species,
            control.ncycles,
        );
    } else {
        let halo = LocalHalo {
            periodic: control.periodic,
        };
        run_cycles(
            &mut field,
            &grid,
            &cfg,
            &halo,
            &topo,
            &NoReduce,
            &species,
            control.ncycles,
        );
    }

    if rank == 0 {
        info!("run complete");
    }
    Ok(())
}
