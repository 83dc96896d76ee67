//! Field and moment storage for one subdomain.
//!
//! `FieldState` owns every mesh array of the run: the electromagnetic
//! fields on their staggerings, the hat sources, the per-species moments,
//! the open-boundary injection templates, the packed per-particle field
//! view, and the scratch arrays the implicit operator reuses between
//! Krylov iterations.

pub mod bc;
pub mod maxwell;

use ndarray::{Array3, Array4, Axis, Zip};

use crate::config::Config;
use crate::grid::{smooth_inplace, CenterScratch, NodeScratch, StaggeredGrid};
use crate::halo::Halo;
use crate::topology::{Face, Topology};

/// Slots per node in the packed mover view: B in 0..3, pad, E in 4..7,
/// pad, so every node's fields fill one 64-byte line.
pub const FIELD_PCLS_STRIDE: usize = 8;
const B_SLOT: usize = 0;
const E_SLOT: usize = 4;

/// Constant injection values for one open face.
#[derive(Copy, Clone, Default)]
pub struct InjTemplate {
    pub e: [f64; 3],
    pub b: [f64; 3],
}

#[allow(clippy::too_many_arguments)]
pub struct FieldState {
    // electric field on nodes, and its implicit theta-advanced value
    pub ex: Array3<f64>,
    pub ey: Array3<f64>,
    pub ez: Array3<f64>,
    pub exth: Array3<f64>,
    pub eyth: Array3<f64>,
    pub ezth: Array3<f64>,

    // magnetic field on nodes and centers, plus the static external part
    pub bxn: Array3<f64>,
    pub byn: Array3<f64>,
    pub bzn: Array3<f64>,
    pub bxc: Array3<f64>,
    pub byc: Array3<f64>,
    pub bzc: Array3<f64>,
    pub bx_ext: Array3<f64>,
    pub by_ext: Array3<f64>,
    pub bz_ext: Array3<f64>,

    // charge and current sources
    pub rhon: Array3<f64>,
    pub rhoc: Array3<f64>,
    pub rhoh: Array3<f64>,
    pub phi: Array3<f64>,
    pub jx: Array3<f64>,
    pub jy: Array3<f64>,
    pub jz: Array3<f64>,
    pub jxh: Array3<f64>,
    pub jyh: Array3<f64>,
    pub jzh: Array3<f64>,
    pub jx_ext: Array3<f64>,
    pub jy_ext: Array3<f64>,
    pub jz_ext: Array3<f64>,

    // per-species moments on nodes (leading species axis)
    pub rhons: Array4<f64>,
    pub rhocs: Array4<f64>,
    pub jxs: Array4<f64>,
    pub jys: Array4<f64>,
    pub jzs: Array4<f64>,
    pub pxxsn: Array4<f64>,
    pub pxysn: Array4<f64>,
    pub pxzsn: Array4<f64>,
    pub pyysn: Array4<f64>,
    pub pyzsn: Array4<f64>,
    pub pzzsn: Array4<f64>,

    /// Packed `(B+B_ext, pad, E, pad)` per node for the mover.
    pub field_for_pcls: Array4<f64>,

    /// Injection templates for open faces, indexed by [`Face`].
    pub inj: [InjTemplate; 6],

    // scratch owned here so the Krylov operator never allocates
    pub temp_xc: Array3<f64>,
    pub temp_yc: Array3<f64>,
    pub temp_zc: Array3<f64>,
    pub temp_xn: Array3<f64>,
    pub temp_yn: Array3<f64>,
    pub temp_zn: Array3<f64>,
    pub temp_c: Array3<f64>,
    pub temp_x: Array3<f64>,
    pub temp_y: Array3<f64>,
    pub temp_z: Array3<f64>,
    pub temp2_x: Array3<f64>,
    pub temp2_y: Array3<f64>,
    pub temp2_z: Array3<f64>,
    pub image_x: Array3<f64>,
    pub image_y: Array3<f64>,
    pub image_z: Array3<f64>,
    pub dx_im: Array3<f64>,
    pub dy_im: Array3<f64>,
    pub dz_im: Array3<f64>,
    pub vect_x: Array3<f64>,
    pub vect_y: Array3<f64>,
    pub vect_z: Array3<f64>,
    pub div_c: Array3<f64>,
    pub lap_scratch: CenterScratch,
    pub poisson_scratch: NodeScratch,
    pub poisson_in: Array3<f64>,
    pub poisson_out: Array3<f64>,
    pub smooth_tmp_n: Array3<f64>,
    pub smooth_tmp_c: Array3<f64>,
}

impl FieldState {
    pub fn new(grid: &StaggeredGrid, ns: usize) -> FieldState {
        let (nxn, nyn, nzn) = grid.node_dims();
        FieldState {
            ex: grid.node_array(),
            ey: grid.node_array(),
            ez: grid.node_array(),
            exth: grid.node_array(),
            eyth: grid.node_array(),
            ezth: grid.node_array(),
            bxn: grid.node_array(),
            byn: grid.node_array(),
            bzn: grid.node_array(),
            bxc: grid.center_array(),
            byc: grid.center_array(),
            bzc: grid.center_array(),
            bx_ext: grid.node_array(),
            by_ext: grid.node_array(),
            bz_ext: grid.node_array(),
            rhon: grid.node_array(),
            rhoc: grid.center_array(),
            rhoh: grid.center_array(),
            phi: grid.center_array(),
            jx: grid.node_array(),
            jy: grid.node_array(),
            jz: grid.node_array(),
            jxh: grid.node_array(),
            jyh: grid.node_array(),
            jzh: grid.node_array(),
            jx_ext: grid.node_array(),
            jy_ext: grid.node_array(),
            jz_ext: grid.node_array(),
            rhons: grid.species_node_array(ns),
            rhocs: grid.species_center_array(ns),
            jxs: grid.species_node_array(ns),
            jys: grid.species_node_array(ns),
            jzs: grid.species_node_array(ns),
            pxxsn: grid.species_node_array(ns),
            pxysn: grid.species_node_array(ns),
            pxzsn: grid.species_node_array(ns),
            pyysn: grid.species_node_array(ns),
            pyzsn: grid.species_node_array(ns),
            pzzsn: grid.species_node_array(ns),
            field_for_pcls: Array4::zeros((nxn, nyn, nzn, FIELD_PCLS_STRIDE)),
            inj: [InjTemplate::default(); 6],
            temp_xc: grid.center_array(),
            temp_yc: grid.center_array(),
            temp_zc: grid.center_array(),
            temp_xn: grid.node_array(),
            temp_yn: grid.node_array(),
            temp_zn: grid.node_array(),
            temp_c: grid.center_array(),
            temp_x: grid.node_array(),
            temp_y: grid.node_array(),
            temp_z: grid.node_array(),
            temp2_x: grid.node_array(),
            temp2_y: grid.node_array(),
            temp2_z: grid.node_array(),
            image_x: grid.node_array(),
            image_y: grid.node_array(),
            image_z: grid.node_array(),
            dx_im: grid.node_array(),
            dy_im: grid.node_array(),
            dz_im: grid.node_array(),
            vect_x: grid.node_array(),
            vect_y: grid.node_array(),
            vect_z: grid.node_array(),
            div_c: grid.center_array(),
            lap_scratch: grid.center_scratch(),
            poisson_scratch: grid.node_scratch(),
            poisson_in: grid.center_array(),
            poisson_out: grid.center_array(),
            smooth_tmp_n: grid.node_array(),
            smooth_tmp_c: grid.center_array(),
        }
    }

    pub fn ns(&self) -> usize {
        self.rhons.shape()[0]
    }

    /// Uniform initial state: `B = B0` everywhere, `E = 0`, each species
    /// at its configured background density.
    pub fn init_uniform(&mut self, grid: &StaggeredGrid, cfg: &Config) {
        self.ex.fill(0.0);
        self.ey.fill(0.0);
        self.ez.fill(0.0);
        self.bxn.fill(cfg.b0[0]);
        self.byn.fill(cfg.b0[1]);
        self.bzn.fill(cfg.b0[2]);
        grid.interp_n2c(&mut self.bxc, self.bxn.view());
        grid.interp_n2c(&mut self.byc, self.byn.view());
        grid.interp_n2c(&mut self.bzc, self.bzn.view());
        for is in 0..self.ns() {
            self.rhons
                .index_axis_mut(Axis(0), is)
                .fill(cfg.rho_init[is]);
            grid.interp_n2c_species(&mut self.rhocs, is, self.rhons.view());
        }
    }

    /// Restart interop: overwrite the node electric field.
    pub fn set_e(&mut self, ex: Array3<f64>, ey: Array3<f64>, ez: Array3<f64>) {
        self.ex = ex;
        self.ey = ey;
        self.ez = ez;
    }

    /// Restart interop: overwrite the node magnetic field and rebuild the
    /// center values.
    pub fn set_b(&mut self, grid: &StaggeredGrid, bx: Array3<f64>, by: Array3<f64>, bz: Array3<f64>) {
        self.bxn = bx;
        self.byn = by;
        self.bzn = bz;
        grid.interp_n2c(&mut self.bxc, self.bxn.view());
        grid.interp_n2c(&mut self.byc, self.byn.view());
        grid.interp_n2c(&mut self.bzc, self.bzn.view());
    }

    pub fn set_zero_primary_moments(&mut self) {
        for arr in [
            &mut self.rhons,
            &mut self.jxs,
            &mut self.jys,
            &mut self.jzs,
            &mut self.pxxsn,
            &mut self.pxysn,
            &mut self.pxzsn,
            &mut self.pyysn,
            &mut self.pyzsn,
            &mut self.pzzsn,
        ] {
            arr.fill(0.0);
        }
    }

    pub fn set_zero_derived_moments(&mut self) {
        for arr in [
            &mut self.jx,
            &mut self.jy,
            &mut self.jz,
            &mut self.jxh,
            &mut self.jyh,
            &mut self.jzh,
            &mut self.rhon,
        ] {
            arr.fill(0.0);
        }
        self.rhoc.fill(0.0);
        self.rhoh.fill(0.0);
    }

    pub fn set_zero_densities(&mut self) {
        self.set_zero_derived_moments();
        self.set_zero_primary_moments();
    }

    /// Sum the species charge densities into `rhon`.
    pub fn sum_over_species(&mut self) {
        for is in 0..self.ns() {
            let src = self.rhons.index_axis(Axis(0), is);
            Zip::from(&mut self.rhon).and(&src).for_each(|r, s| *r += s);
        }
    }

    /// Sum the species currents into `J`.
    pub fn sum_over_species_j(&mut self) {
        for is in 0..self.ns() {
            Zip::from(&mut self.jx)
                .and(&self.jxs.index_axis(Axis(0), is))
                .for_each(|r, s| *r += s);
            Zip::from(&mut self.jy)
                .and(&self.jys.index_axis(Axis(0), is))
                .for_each(|r, s| *r += s);
            Zip::from(&mut self.jz)
                .and(&self.jzs.index_axis(Axis(0), is))
                .for_each(|r, s| *r += s);
        }
    }

    /// Interpolate the summed node charge density to centers.
    pub fn interp_densities_n2c(&mut self, grid: &StaggeredGrid) {
        grid.interp_n2c(&mut self.rhoc, self.rhon.view());
    }

    /// Refresh the injection templates on every open physical face from
    /// the background field and the boundary drift.
    pub fn update_inj_fields<T: Topology>(&mut self, cfg: &Config, topo: &T) {
        let (u0, v0, w0) = (cfg.u0[0], cfg.u0[1], cfg.u0[2]);
        let e = [
            w0 * cfg.b0[1] - v0 * cfg.b0[2],
            u0 * cfg.b0[2] - w0 * cfg.b0[0],
            v0 * cfg.b0[0] - u0 * cfg.b0[1],
        ];
        for face in Face::ALL {
            if topo.neighbor(face).is_none() {
                self.inj[face as usize] = InjTemplate { e, b: cfg.b0 };
            }
        }
    }

    /// Pack `(B + B_ext, E)` into the per-particle layout. Runs parallel
    /// over nodes; always called after the field update so the mover sees
    /// the newest E and B (the pad slots are never written).
    pub fn set_field_for_pcls(&mut self) {
        let packed = &mut self.field_for_pcls;
        let bxn = &self.bxn;
        let byn = &self.byn;
        let bzn = &self.bzn;
        let bx_ext = &self.bx_ext;
        let by_ext = &self.by_ext;
        let bz_ext = &self.bz_ext;
        let ex = &self.ex;
        let ey = &self.ey;
        let ez = &self.ez;
        Zip::indexed(packed.lanes_mut(Axis(3))).par_for_each(|(i, j, k), mut lane| {
            lane[B_SLOT] = bxn[[i, j, k]] + bx_ext[[i, j, k]];
            lane[B_SLOT + 1] = byn[[i, j, k]] + by_ext[[i, j, k]];
            lane[B_SLOT + 2] = bzn[[i, j, k]] + bz_ext[[i, j, k]];
            lane[E_SLOT] = ex[[i, j, k]];
            lane[E_SLOT + 1] = ey[[i, j, k]];
            lane[E_SLOT + 2] = ez[[i, j, k]];
        });
    }

    /// Read-only mover view of the packed fields.
    pub fn field_for_pcls(&self) -> ndarray::ArrayView4<f64> {
        self.field_for_pcls.view()
    }

    /// Six sweeps of the binomial-style smoother on a center array. The
    /// strength argument gates the pass; the sweep weights alternate.
    pub fn smooth_center<H: Halo>(&mut self, value: f64, which: CenterField, halo: &H) {
        if value == 1.0 {
            return;
        }
        let f = match which {
            CenterField::RhoC => &mut self.rhoc,
            CenterField::RhoH => &mut self.rhoh,
        };
        for pass in 1..=6 {
            halo.center_bc_p(f.view_mut());
            smooth_inplace(f, &mut self.smooth_tmp_c, pass);
        }
    }

    /// Six sweeps on a node array.
    pub fn smooth_node<H: Halo>(&mut self, value: f64, which: NodeField, halo: &H) {
        if value == 1.0 {
            return;
        }
        let f = match which {
            NodeField::Jxh => &mut self.jxh,
            NodeField::Jyh => &mut self.jyh,
            NodeField::Jzh => &mut self.jzh,
        };
        for pass in 1..=6 {
            halo.node_p(f.view_mut());
            smooth_inplace(f, &mut self.smooth_tmp_n, pass);
        }
    }

    /// Smooth the electric field (all three components, six sweeps) with
    /// the per-component ghost codes.
    pub fn smooth_e<H: Halo>(&mut self, value: f64, halo: &H, cfg: &Config) {
        if value == 1.0 {
            return;
        }
        for pass in 1..=6 {
            halo.node_bc(self.ex.view_mut(), &cfg.bc_ex);
            halo.node_bc(self.ey.view_mut(), &cfg.bc_ey);
            halo.node_bc(self.ez.view_mut(), &cfg.bc_ez);
            smooth_inplace(&mut self.ex, &mut self.smooth_tmp_n, pass);
            smooth_inplace(&mut self.ey, &mut self.smooth_tmp_n, pass);
            smooth_inplace(&mut self.ez, &mut self.smooth_tmp_n, pass);
        }
    }
}

/// Center arrays addressable by the smoother.
#[derive(Copy, Clone)]
pub enum CenterField {
    RhoC,
    RhoH,
}

/// Node arrays addressable by the smoother.
#[derive(Copy, Clone)]
pub enum NodeField {
    Jxh,
    Jyh,
    Jzh,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::grid::StaggeredGrid;

    fn small() -> (StaggeredGrid, Config, FieldState) {
        let grid = StaggeredGrid::new([4, 4, 4], [0.25; 3], [0.0; 3]);
        let cfg = Config::periodic(
            vec![-1.0, 1.0],
            vec![0.1, -0.1],
            1.0,
            0.1,
            1.0,
            [1.0, 1.0, 1.0],
        );
        let field = FieldState::new(&grid, cfg.ns);
        (grid, cfg, field)
    }

    #[test]
    fn packed_view_reflects_latest_fields() {
        let (grid, cfg, mut field) = small();
        field.init_uniform(&grid, &cfg);
        field.ex.fill(0.5);
        field.bzn.fill(2.0);
        field.bz_ext.fill(0.25);
        field.set_field_for_pcls();
        let view = field.field_for_pcls();
        assert_eq!(view[[2, 2, 2, 0]], 0.0);
        assert_eq!(view[[2, 2, 2, 2]], 2.25);
        assert_eq!(view[[2, 2, 2, 4]], 0.5);
        // pad slots untouched
        assert_eq!(view[[2, 2, 2, 3]], 0.0);
        assert_eq!(view[[2, 2, 2, 7]], 0.0);
        assert_eq!(view.shape(), &[grid.nxn, grid.nyn, grid.nzn, 8]);
    }

    #[test]
    fn species_sum_accumulates() {
        let (grid, cfg, mut field) = small();
        field.init_uniform(&grid, &cfg);
        field.sum_over_species();
        // equal and opposite densities cancel
        assert!(field.rhon.iter().all(|v| v.abs() < 1e-15));
        field.interp_densities_n2c(&grid);
        assert!(field.rhoc.iter().all(|v| v.abs() < 1e-15));
    }

    #[test]
    fn zeroing_clears_everything_additive() {
        let (_, _, mut field) = small();
        field.rhons.fill(3.0);
        field.jxh.fill(1.0);
        field.rhoc.fill(2.0);
        field.set_zero_densities();
        assert!(field.rhons.iter().all(|v| *v == 0.0));
        assert!(field.jxh.iter().all(|v| *v == 0.0));
        assert!(field.rhoc.iter().all(|v| *v == 0.0));
    }
}
