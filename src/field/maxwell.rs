//! The implicit Maxwell solve and its supporting kernels.
//!
//! `calculate_e` runs the whole field update: optional conjugate-gradient
//! divergence cleaning, the GMRES solve over the matrix-free
//! [`MaxwellImageOp`], the theta decentering, smoothing, and the boundary
//! overlays. `calculate_b` then advances B from Faraday's law.

use log::{info, warn};
use ndarray::{s, Zip};

use crate::config::{Case, Config};
use crate::field::bc::perfect_conductor_source;
use crate::field::{CenterField, FieldState, NodeField};
use crate::grid::StaggeredGrid;
use crate::halo::Halo;
use crate::solver::{cg, gmres, GlobalReduce, LinearOperator, SolveReport};
use crate::topology::{Face, Topology};

/// What the field update reports back to the cycle driver.
pub struct FieldSolveReport {
    pub poisson: Option<SolveReport>,
    pub maxwell: SolveReport,
}

fn pack_nodes(out: &mut [f64], x: &ndarray::Array3<f64>, y: &ndarray::Array3<f64>, z: &ndarray::Array3<f64>) {
    let (nx, ny, nz) = x.dim();
    let mut n = 0;
    for f in [x, y, z] {
        for i in 1..nx - 1 {
            for j in 1..ny - 1 {
                for k in 1..nz - 1 {
                    out[n] = f[[i, j, k]];
                    n += 1;
                }
            }
        }
    }
}

fn unpack_nodes(x: &mut ndarray::Array3<f64>, y: &mut ndarray::Array3<f64>, z: &mut ndarray::Array3<f64>, v: &[f64]) {
    let (nx, ny, nz) = x.dim();
    let mut n = 0;
    for f in [x, y, z] {
        for i in 1..nx - 1 {
            for j in 1..ny - 1 {
                for k in 1..nz - 1 {
                    f[[i, j, k]] = v[n];
                    n += 1;
                }
            }
        }
    }
}

fn pack_centers(out: &mut [f64], f: &ndarray::Array3<f64>) {
    let (nx, ny, nz) = f.dim();
    let mut n = 0;
    for i in 1..nx - 1 {
        for j in 1..ny - 1 {
            for k in 1..nz - 1 {
                out[n] = f[[i, j, k]];
                n += 1;
            }
        }
    }
}

fn unpack_centers(f: &mut ndarray::Array3<f64>, v: &[f64]) {
    let (nx, ny, nz) = f.dim();
    let mut n = 0;
    for i in 1..nx - 1 {
        for j in 1..ny - 1 {
            for k in 1..nz - 1 {
                f[[i, j, k]] = v[n];
                n += 1;
            }
        }
    }
}

pub fn node_dof(grid: &StaggeredGrid) -> usize {
    3 * (grid.nxn - 2) * (grid.nyn - 2) * (grid.nzn - 2)
}

pub fn center_dof(grid: &StaggeredGrid) -> usize {
    (grid.nxc - 2) * (grid.nyc - 2) * (grid.nzc - 2)
}

impl FieldState {
    /// Accumulate the single-species rotation tensor applied to the
    /// scratch vector `temp_*n` into the hat current.
    fn pi_dot_accumulate(&mut self, cfg: &Config, is: usize) {
        let beta = cfg.beta(is);
        let jxh = &mut self.jxh;
        let jyh = &mut self.jyh;
        let jzh = &mut self.jzh;
        let bxn = &self.bxn;
        let byn = &self.byn;
        let bzn = &self.bzn;
        let bx_ext = &self.bx_ext;
        let by_ext = &self.by_ext;
        let bz_ext = &self.bz_ext;
        let vx = &self.temp_xn;
        let vy = &self.temp_yn;
        let vz = &self.temp_zn;
        Zip::indexed(jxh.slice_mut(s![1..-1, 1..-1, 1..-1]))
            .and(jyh.slice_mut(s![1..-1, 1..-1, 1..-1]))
            .and(jzh.slice_mut(s![1..-1, 1..-1, 1..-1]))
            .par_for_each(|(i0, j0, k0), ox, oy, oz| {
                let (i, j, k) = (i0 + 1, j0 + 1, k0 + 1);
                let omcx = beta * (bxn[[i, j, k]] + bx_ext[[i, j, k]]);
                let omcy = beta * (byn[[i, j, k]] + by_ext[[i, j, k]]);
                let omcz = beta * (bzn[[i, j, k]] + bz_ext[[i, j, k]]);
                let edotb = vx[[i, j, k]] * omcx + vy[[i, j, k]] * omcy + vz[[i, j, k]] * omcz;
                let denom = 1.0 / (1.0 + omcx * omcx + omcy * omcy + omcz * omcz);
                *ox += (vx[[i, j, k]] + (vy[[i, j, k]] * omcz - vz[[i, j, k]] * omcy + edotb * omcx))
                    * denom;
                *oy += (vy[[i, j, k]] + (vz[[i, j, k]] * omcx - vx[[i, j, k]] * omcz + edotb * omcy))
                    * denom;
                *oz += (vz[[i, j, k]] + (vx[[i, j, k]] * omcy - vy[[i, j, k]] * omcx + edotb * omcz))
                    * denom;
            });
    }

    /// The implicit susceptibility applied to the trial field: the
    /// species-summed rotation tensor weighted by the local density.
    fn mu_dot(&mut self, cfg: &Config) {
        self.dx_im.fill(0.0);
        self.dy_im.fill(0.0);
        self.dz_im.fill(0.0);
        for is in 0..self.ns() {
            let beta = cfg.beta(is);
            let scale = cfg.four_pi / 2.0 * cfg.delt * cfg.dt / cfg.c * cfg.qom[is];
            let dx_im = &mut self.dx_im;
            let dy_im = &mut self.dy_im;
            let dz_im = &mut self.dz_im;
            let bxn = &self.bxn;
            let byn = &self.byn;
            let bzn = &self.bzn;
            let bx_ext = &self.bx_ext;
            let by_ext = &self.by_ext;
            let bz_ext = &self.bz_ext;
            let rhons = &self.rhons;
            let vx = &self.vect_x;
            let vy = &self.vect_y;
            let vz = &self.vect_z;
            Zip::indexed(dx_im.slice_mut(s![1..-1, 1..-1, 1..-1]))
                .and(dy_im.slice_mut(s![1..-1, 1..-1, 1..-1]))
                .and(dz_im.slice_mut(s![1..-1, 1..-1, 1..-1]))
                .par_for_each(|(i0, j0, k0), ox, oy, oz| {
                    let (i, j, k) = (i0 + 1, j0 + 1, k0 + 1);
                    let omcx = beta * (bxn[[i, j, k]] + bx_ext[[i, j, k]]);
                    let omcy = beta * (byn[[i, j, k]] + by_ext[[i, j, k]]);
                    let omcz = beta * (bzn[[i, j, k]] + bz_ext[[i, j, k]]);
                    let edotb =
                        vx[[i, j, k]] * omcx + vy[[i, j, k]] * omcy + vz[[i, j, k]] * omcz;
                    let denom = scale * rhons[[is, i, j, k]]
                        / (1.0 + omcx * omcx + omcy * omcy + omcz * omcz);
                    *ox += (vx[[i, j, k]]
                        + (vy[[i, j, k]] * omcz - vz[[i, j, k]] * omcy + edotb * omcx))
                        * denom;
                    *oy += (vy[[i, j, k]]
                        + (vz[[i, j, k]] * omcx - vx[[i, j, k]] * omcz + edotb * omcy))
                        * denom;
                    *oz += (vz[[i, j, k]]
                        + (vx[[i, j, k]] * omcy - vy[[i, j, k]] * omcx + edotb * omcz))
                        * denom;
                });
        }
    }
}

/// Build the hat sources from the gathered moments: the species pressure
/// divergence enters the hat current through the rotation tensor, and the
/// hat charge closes the continuity equation at the implicit time level.
pub fn calculate_hat_functions<H: Halo>(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    cfg: &Config,
    halo: &H,
) {
    field.smooth_center(cfg.smooth, CenterField::RhoC, halo);

    for is in 0..cfg.ns {
        grid.div_symm_tensor_n2c(
            &mut field.temp_xc,
            &mut field.temp_yc,
            &mut field.temp_zc,
            field.pxxsn.view(),
            field.pxysn.view(),
            field.pxzsn.view(),
            field.pyysn.view(),
            field.pyzsn.view(),
            field.pzzsn.view(),
            is,
        );
        let scale = -cfg.dt / 2.0;
        field.temp_xc.mapv_inplace(|v| v * scale);
        field.temp_yc.mapv_inplace(|v| v * scale);
        field.temp_zc.mapv_inplace(|v| v * scale);
        halo.center_bc_p(field.temp_xc.view_mut());
        halo.center_bc_p(field.temp_yc.view_mut());
        halo.center_bc_p(field.temp_zc.view_mut());

        grid.interp_c2n(&mut field.temp_xn, field.temp_xc.view());
        grid.interp_c2n(&mut field.temp_yn, field.temp_yc.view());
        grid.interp_c2n(&mut field.temp_zn, field.temp_zc.view());
        Zip::from(&mut field.temp_xn)
            .and(&field.jxs.index_axis(ndarray::Axis(0), is))
            .for_each(|t, j| *t += j);
        Zip::from(&mut field.temp_yn)
            .and(&field.jys.index_axis(ndarray::Axis(0), is))
            .for_each(|t, j| *t += j);
        Zip::from(&mut field.temp_zn)
            .and(&field.jzs.index_axis(ndarray::Axis(0), is))
            .for_each(|t, j| *t += j);

        field.pi_dot_accumulate(cfg, is);
    }

    field.smooth_node(cfg.smooth, NodeField::Jxh, halo);
    field.smooth_node(cfg.smooth, NodeField::Jyh, halo);
    field.smooth_node(cfg.smooth, NodeField::Jzh, halo);

    // rho_hat = rho - dt*theta*div(J_hat)
    grid.div_n2c(
        &mut field.temp_xc,
        field.jxh.view(),
        field.jyh.view(),
        field.jzh.view(),
    );
    let scale = -cfg.dt * cfg.th;
    {
        let rhoh = &mut field.rhoh;
        let rhoc = &field.rhoc;
        let div = &field.temp_xc;
        Zip::from(rhoh)
            .and(rhoc)
            .and(div)
            .for_each(|h, c, d| *h = c + scale * d);
    }
    halo.center_bc_p(field.rhoh.view_mut());
}

/// The right-hand side of the implicit Maxwell system.
pub fn maxwell_source<H: Halo, T: Topology>(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    cfg: &Config,
    halo: &H,
    topo: &T,
    b: &mut [f64],
) {
    for arr in [
        &mut field.temp_x,
        &mut field.temp_y,
        &mut field.temp_z,
        &mut field.temp_xn,
        &mut field.temp_yn,
        &mut field.temp_zn,
        &mut field.temp2_x,
        &mut field.temp2_y,
        &mut field.temp2_z,
    ] {
        arr.fill(0.0);
    }
    field.temp_c.fill(0.0);

    halo.center_bc(field.bxc.view_mut(), &cfg.bc_bx);
    halo.center_bc(field.byc.view_mut(), &cfg.bc_by);
    halo.center_bc(field.bzc.view_mut(), &cfg.bc_bz);

    match cfg.case_kind {
        Case::Gem | Case::GemNoPert => fix_b_gem(field, grid, cfg, topo),
        Case::ForceFree => fix_b_forcefree(field, grid, cfg, topo),
        Case::Default => {}
    }
    field.boundary_conditions_b(cfg, topo);

    grid.curl_c2n(
        &mut field.temp_xn,
        &mut field.temp_yn,
        &mut field.temp_zn,
        field.bxc.view(),
        field.byc.view(),
        field.bzc.view(),
    );

    // delt * (curl B - 4pi/c (J_hat + J_ext))
    let jscale = -cfg.four_pi / cfg.c;
    {
        let t2 = [&mut field.temp2_x, &mut field.temp2_y, &mut field.temp2_z];
        let jh = [&field.jxh, &field.jyh, &field.jzh];
        let jext = [&field.jx_ext, &field.jy_ext, &field.jz_ext];
        let curl = [&field.temp_xn, &field.temp_yn, &field.temp_zn];
        for c in 0..3 {
            Zip::from(&mut *t2[c])
                .and(jh[c])
                .and(jext[c])
                .and(curl[c])
                .for_each(|t, h, e, cb| *t = cfg.delt * (jscale * h + jscale * e + cb));
        }
    }

    halo.center_bc_p(field.rhoh.view_mut());
    grid.grad_c2n(
        &mut field.temp_x,
        &mut field.temp_y,
        &mut field.temp_z,
        field.rhoh.view(),
    );
    let gscale = -cfg.delt * cfg.delt * cfg.four_pi;
    {
        let t = [&mut field.temp_x, &mut field.temp_y, &mut field.temp_z];
        let e = [&field.ex, &field.ey, &field.ez];
        let t2 = [&field.temp2_x, &field.temp2_y, &field.temp2_z];
        for c in 0..3 {
            Zip::from(&mut *t[c])
                .and(e[c])
                .and(t2[c])
                .for_each(|a, ev, tv| *a = gscale * *a + ev + tv);
        }
    }

    for face in Face::ALL {
        if topo.neighbor(face).is_none() && cfg.bc_em[face as usize] == 0 {
            perfect_conductor_source(
                &mut field.temp_x,
                &mut field.temp_y,
                &mut field.temp_z,
                face.axis(),
                face.is_right(),
                cfg,
            );
        }
    }

    pack_nodes(b, &field.temp_x, &field.temp_y, &field.temp_z);
}

/// The matrix-free image of the implicit Maxwell operator, applied at
/// every GMRES inner step.
pub struct MaxwellImageOp<'a, H: Halo, T: Topology> {
    pub field: &'a mut FieldState,
    pub grid: &'a StaggeredGrid,
    pub cfg: &'a Config,
    pub halo: &'a H,
    pub topo: &'a T,
}

impl<'a, H: Halo, T: Topology> LinearOperator for MaxwellImageOp<'a, H, T> {
    fn apply(&mut self, im: &mut [f64], v: &[f64]) {
        let field = &mut *self.field;
        let grid = self.grid;
        let cfg = self.cfg;

        for arr in [
            &mut field.image_x,
            &mut field.image_y,
            &mut field.image_z,
            &mut field.temp_x,
            &mut field.temp_y,
            &mut field.temp_z,
        ] {
            arr.fill(0.0);
        }
        unpack_nodes(
            &mut field.vect_x,
            &mut field.vect_y,
            &mut field.vect_z,
            v,
        );

        grid.lap_n2n(
            &mut field.image_x,
            field.vect_x.view(),
            &mut field.lap_scratch,
            self.halo,
        );
        grid.lap_n2n(
            &mut field.image_y,
            field.vect_y.view(),
            &mut field.lap_scratch,
            self.halo,
        );
        grid.lap_n2n(
            &mut field.image_z,
            field.vect_z.view(),
            &mut field.lap_scratch,
            self.halo,
        );

        field.mu_dot(cfg);
        grid.div_n2c(
            &mut field.div_c,
            field.dx_im.view(),
            field.dy_im.view(),
            field.dz_im.view(),
        );
        self.halo.center_bc_p(field.div_c.view_mut());
        grid.grad_c2n(
            &mut field.temp_x,
            &mut field.temp_y,
            &mut field.temp_z,
            field.div_c.view(),
        );

        // E' + mu.E' - delt^2 (lap E' + grad div(mu.E'))
        let dd = cfg.delt * cfg.delt;
        {
            let image = [&mut field.image_x, &mut field.image_y, &mut field.image_z];
            let graddiv = [&field.temp_x, &field.temp_y, &field.temp_z];
            let d = [&field.dx_im, &field.dy_im, &field.dz_im];
            let vect = [&field.vect_x, &field.vect_y, &field.vect_z];
            for c in 0..3 {
                Zip::from(&mut *image[c])
                    .and(graddiv[c])
                    .and(d[c])
                    .and(vect[c])
                    .for_each(|img, g, dv, vv| *img = -dd * (*img + g) + dv + vv);
            }
        }

        for face in Face::ALL {
            if self.topo.neighbor(face).is_none() && cfg.bc_em[face as usize] == 0 {
                if face.is_right() {
                    field.perfect_conductor_right(face.axis(), cfg);
                } else {
                    field.perfect_conductor_left(face.axis(), cfg);
                }
            }
        }
        field.boundary_conditions_e_image(cfg, self.topo);

        pack_nodes(im, &field.image_x, &field.image_y, &field.image_z);
    }
}

/// The Poisson image used by the divergence-cleaning solve.
pub struct PoissonImageOp<'a, H: Halo> {
    pub field: &'a mut FieldState,
    pub grid: &'a StaggeredGrid,
    pub halo: &'a H,
}

impl<'a, H: Halo> LinearOperator for PoissonImageOp<'a, H> {
    fn apply(&mut self, im: &mut [f64], v: &[f64]) {
        let field = &mut *self.field;
        field.poisson_in.fill(0.0);
        field.poisson_out.fill(0.0);
        unpack_centers(&mut field.poisson_in, v);
        self.grid.lap_c2c_poisson(
            &mut field.poisson_out,
            &mut field.poisson_in,
            &mut field.poisson_scratch,
            self.halo,
        );
        pack_centers(im, &field.poisson_out);
    }
}

/// Solve for the implicit electric field and advance `E` to the new time
/// level.
pub fn calculate_e<H: Halo, T: Topology, R: GlobalReduce>(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    cfg: &Config,
    halo: &H,
    topo: &T,
    reduce: &R,
) -> FieldSolveReport {
    if topo.rank() == 0 {
        info!("field solve: E");
    }

    let mut poisson_report = None;
    if cfg.poisson_correction {
        if topo.rank() == 0 {
            info!("field solve: divergence cleaning");
        }
        let n = center_dof(grid);
        let mut b_poisson = vec![0.0; n];
        let mut x_poisson = vec![0.0; n];

        grid.div_n2c(
            &mut field.div_c,
            field.ex.view(),
            field.ey.view(),
            field.ez.view(),
        );
        {
            let div = &mut field.div_c;
            let rhoc = &field.rhoc;
            Zip::from(div)
                .and(rhoc)
                .for_each(|d, r| *d -= cfg.four_pi * r);
        }
        pack_centers(&mut b_poisson, &field.div_c);

        let report = {
            let mut op = PoissonImageOp {
                field: &mut *field,
                grid,
                halo,
            };
            cg(&mut x_poisson, &b_poisson, &mut op, 3000, cfg.cg_tol, reduce)
        };
        let report = if report.converged() {
            report
        } else {
            if topo.rank() == 0 {
                warn!(
                    "divergence cleaning: CG stalled at {:.3e} after {} iterations, retrying with GMRES",
                    report.final_residual, report.iterations
                );
            }
            x_poisson.iter_mut().for_each(|v| *v = 0.0);
            let mut op = PoissonImageOp {
                field: &mut *field,
                grid,
                halo,
            };
            gmres(
                &mut x_poisson,
                &b_poisson,
                &mut op,
                20,
                200,
                cfg.gmres_tol,
                reduce,
            )
        };
        poisson_report = Some(report);

        unpack_centers(&mut field.phi, &x_poisson);
        halo.center_bc(field.phi.view_mut(), &[2; 6]);
        grid.grad_c2n(
            &mut field.temp_x,
            &mut field.temp_y,
            &mut field.temp_z,
            field.phi.view(),
        );
        Zip::from(&mut field.ex)
            .and(&field.temp_x)
            .for_each(|e, g| *e -= g);
        Zip::from(&mut field.ey)
            .and(&field.temp_y)
            .for_each(|e, g| *e -= g);
        Zip::from(&mut field.ez)
            .and(&field.temp_z)
            .for_each(|e, g| *e -= g);
    }

    let n = node_dof(grid);
    let mut b_krylov = vec![0.0; n];
    let mut x_krylov = vec![0.0; n];
    maxwell_source(field, grid, cfg, halo, topo, &mut b_krylov);
    pack_nodes(&mut x_krylov, &field.ex, &field.ey, &field.ez);

    let maxwell_report = {
        let mut op = MaxwellImageOp {
            field: &mut *field,
            grid,
            cfg,
            halo,
            topo,
        };
        gmres(
            &mut x_krylov,
            &b_krylov,
            &mut op,
            20,
            200,
            cfg.gmres_tol,
            reduce,
        )
    };
    if !maxwell_report.converged() && topo.rank() == 0 {
        warn!(
            "implicit field solve: residual {:.3e} after {} iterations",
            maxwell_report.final_residual, maxwell_report.iterations
        );
    }
    unpack_nodes(&mut field.exth, &mut field.eyth, &mut field.ezth, &x_krylov);

    // E^{n+1} = Eth/theta - (1-theta)/theta E^n
    let a = 1.0 / cfg.th;
    let bb = -(1.0 - cfg.th) / cfg.th;
    Zip::from(&mut field.ex)
        .and(&field.exth)
        .for_each(|e, t| *e = a * t + bb * *e);
    Zip::from(&mut field.ey)
        .and(&field.eyth)
        .for_each(|e, t| *e = a * t + bb * *e);
    Zip::from(&mut field.ez)
        .and(&field.ezth)
        .for_each(|e, t| *e = a * t + bb * *e);

    field.smooth_e(cfg.smooth, halo, cfg);
    field.smooth_e(cfg.smooth, halo, cfg);
    field.smooth_e(cfg.smooth, halo, cfg);

    halo.node_bc(field.exth.view_mut(), &cfg.bc_ex);
    halo.node_bc(field.eyth.view_mut(), &cfg.bc_ey);
    halo.node_bc(field.ezth.view_mut(), &cfg.bc_ez);
    halo.node_bc(field.ex.view_mut(), &cfg.bc_ex);
    halo.node_bc(field.ey.view_mut(), &cfg.bc_ey);
    halo.node_bc(field.ez.view_mut(), &cfg.bc_ez);

    field.boundary_conditions_e(cfg, topo, true);
    field.boundary_conditions_e(cfg, topo, false);

    FieldSolveReport {
        poisson: poisson_report,
        maxwell: maxwell_report,
    }
}

/// Faraday update of the magnetic field from the solved theta field.
pub fn calculate_b<H: Halo, T: Topology>(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    cfg: &Config,
    halo: &H,
    topo: &T,
) {
    if topo.rank() == 0 {
        info!("field solve: B");
    }
    grid.curl_n2c(
        &mut field.temp_xc,
        &mut field.temp_yc,
        &mut field.temp_zc,
        field.exth.view(),
        field.eyth.view(),
        field.ezth.view(),
    );
    let scale = -cfg.c * cfg.dt;
    Zip::from(&mut field.bxc)
        .and(&field.temp_xc)
        .for_each(|b, c| *b += scale * c);
    Zip::from(&mut field.byc)
        .and(&field.temp_yc)
        .for_each(|b, c| *b += scale * c);
    Zip::from(&mut field.bzc)
        .and(&field.temp_zc)
        .for_each(|b, c| *b += scale * c);

    halo.center_bc(field.bxc.view_mut(), &cfg.bc_bx);
    halo.center_bc(field.byc.view_mut(), &cfg.bc_by);
    halo.center_bc(field.bzc.view_mut(), &cfg.bc_bz);

    match cfg.case_kind {
        Case::Gem | Case::GemNoPert => fix_b_gem(field, grid, cfg, topo),
        Case::ForceFree => fix_b_forcefree(field, grid, cfg, topo),
        Case::Default => {}
    }
    field.boundary_conditions_b(cfg, topo);

    grid.interp_c2n(&mut field.bxn, field.bxc.view());
    grid.interp_c2n(&mut field.byn, field.byc.view());
    grid.interp_c2n(&mut field.bzn, field.bzc.view());

    halo.node_bc(field.bxn.view_mut(), &cfg.bc_bx);
    halo.node_bc(field.byn.view_mut(), &cfg.bc_by);
    halo.node_bc(field.bzn.view_mut(), &cfg.bc_bz);
}

/// Hold the reconnection-layer profile on the Y walls.
pub fn fix_b_gem<T: Topology>(field: &mut FieldState, grid: &StaggeredGrid, cfg: &Config, topo: &T) {
    let (nxc, nyc, nzc) = field.bxc.dim();
    if topo.neighbor(Face::YRight).is_none() {
        for i in 0..nxc {
            for k in 0..nzc {
                let profile =
                    cfg.b0[0] * ((grid.y_c(nyc - 1) - cfg.ly / 2.0) / cfg.delta).tanh();
                field.bxc[[i, nyc - 1, k]] = profile;
                field.bxc[[i, nyc - 2, k]] = profile;
                field.bxc[[i, nyc - 3, k]] = profile;
                field.byc[[i, nyc - 1, k]] = cfg.b0[1];
                field.bzc[[i, nyc - 1, k]] = cfg.b0[2];
                field.bzc[[i, nyc - 2, k]] = cfg.b0[2];
                field.bzc[[i, nyc - 3, k]] = cfg.b0[2];
            }
        }
    }
    if topo.neighbor(Face::YLeft).is_none() {
        for i in 0..nxc {
            for k in 0..nzc {
                let profile = cfg.b0[0] * ((grid.y_c(0) - cfg.ly / 2.0) / cfg.delta).tanh();
                field.bxc[[i, 0, k]] = profile;
                field.bxc[[i, 1, k]] = profile;
                field.bxc[[i, 2, k]] = profile;
                field.byc[[i, 0, k]] = cfg.b0[1];
                field.bzc[[i, 0, k]] = cfg.b0[2];
                field.bzc[[i, 1, k]] = cfg.b0[2];
                field.bzc[[i, 2, k]] = cfg.b0[2];
            }
        }
    }
}

/// Hold the force-free sheet profile on the Y walls.
pub fn fix_b_forcefree<T: Topology>(
    field: &mut FieldState,
    grid: &StaggeredGrid,
    cfg: &Config,
    topo: &T,
) {
    let (nxc, nyc, nzc) = field.bxc.dim();
    let sheet = |y: f64| cfg.b0[2] / ((y - cfg.ly / 2.0) / cfg.delta).cosh();
    if topo.neighbor(Face::YRight).is_none() {
        for i in 0..nxc {
            for k in 0..nzc {
                field.bxc[[i, nyc - 1, k]] =
                    cfg.b0[0] * ((grid.y_c(nyc - 1) - cfg.ly / 2.0) / cfg.delta).tanh();
                field.byc[[i, nyc - 1, k]] = cfg.b0[1];
                field.bzc[[i, nyc - 1, k]] = sheet(grid.y_c(nyc - 1));
                field.bzc[[i, nyc - 2, k]] = sheet(grid.y_c(nyc - 2));
                field.bzc[[i, nyc - 3, k]] = sheet(grid.y_c(nyc - 3));
            }
        }
    }
    if topo.neighbor(Face::YLeft).is_none() {
        for i in 0..nxc {
            for k in 0..nzc {
                field.bxc[[i, 0, k]] =
                    cfg.b0[0] * ((grid.y_c(0) - cfg.ly / 2.0) / cfg.delta).tanh();
                field.byc[[i, 0, k]] = cfg.b0[1];
                field.bzc[[i, 0, k]] = sheet(grid.y_c(0));
                field.bzc[[i, 1, k]] = sheet(grid.y_c(1));
                field.bzc[[i, 2, k]] = sheet(grid.y_c(2));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::halo::LocalHalo;
    use crate::solver::NoReduce;
    use crate::topology::CartTopology;

    fn periodic_setup(nc: usize) -> (StaggeredGrid, Config, FieldState) {
        let d = 1.0 / nc as f64;
        let grid = StaggeredGrid::new([nc, nc, nc], [d, d, d], [0.0; 3]);
        let cfg = Config::periodic(
            vec![-1.0, 1.0],
            vec![
                1.0 / (4.0 * std::f64::consts::PI),
                -1.0 / (4.0 * std::f64::consts::PI),
            ],
            1.0,
            0.05,
            1.0,
            [1.0; 3],
        );
        let field = FieldState::new(&grid, cfg.ns);
        (grid, cfg, field)
    }

    /// P5: the Poisson image of the zero vector is zero.
    #[test]
    fn poisson_image_of_zero_is_zero() {
        let (grid, _, mut field) = periodic_setup(4);
        let halo = LocalHalo::periodic();
        let n = center_dof(&grid);
        let v = vec![0.0; n];
        let mut im = vec![1.0; n];
        let mut op = PoissonImageOp {
            field: &mut field,
            grid: &grid,
            halo: &halo,
        };
        op.apply(&mut im, &v);
        assert!(im.iter().all(|x| *x == 0.0));
    }

    /// P6: the Maxwell image is linear on a periodic box (no conductor
    /// faces, so no affine wall term enters).
    #[test]
    fn maxwell_image_is_linear() {
        let (grid, cfg, mut field) = periodic_setup(4);
        let halo = LocalHalo::periodic();
        let topo = CartTopology::single([true; 3]);
        field.init_uniform(&grid, &cfg);
        let n = node_dof(&grid);

        let x: Vec<f64> = (0..n).map(|i| ((i * 31 + 7) % 13) as f64 / 13.0 - 0.5).collect();
        let y: Vec<f64> = (0..n).map(|i| ((i * 17 + 3) % 11) as f64 / 11.0 - 0.5).collect();
        let (alpha, beta) = (0.6, -1.7);
        let combo: Vec<f64> = x
            .iter()
            .zip(y.iter())
            .map(|(a, b)| alpha * a + beta * b)
            .collect();

        let mut op = MaxwellImageOp {
            field: &mut field,
            grid: &grid,
            cfg: &cfg,
            halo: &halo,
            topo: &topo,
        };
        let mut im_x = vec![0.0; n];
        let mut im_y = vec![0.0; n];
        let mut im_combo = vec![0.0; n];
        op.apply(&mut im_x, &x);
        op.apply(&mut im_y, &y);
        op.apply(&mut im_combo, &combo);

        for i in 0..n {
            let expect = alpha * im_x[i] + beta * im_y[i];
            assert!(
                (im_combo[i] - expect).abs() < 1e-11 * (1.0 + expect.abs()),
                "nonlinearity at dof {}: {} vs {}",
                i,
                im_combo[i],
                expect
            );
        }
    }

    /// The hat sources of a cold uniform plasma carry no current, so the
    /// hat charge equals the smoothed charge density.
    #[test]
    fn hat_functions_of_quiet_plasma_vanish() {
        let (grid, cfg, mut field) = periodic_setup(4);
        let halo = LocalHalo::periodic();
        field.init_uniform(&grid, &cfg);
        field.sum_over_species();
        field.interp_densities_n2c(&grid);
        calculate_hat_functions(&mut field, &grid, &cfg, &halo);
        assert!(field.jxh.iter().all(|v| v.abs() < 1e-14));
        assert!(field.jyh.iter().all(|v| v.abs() < 1e-14));
        assert!(field.jzh.iter().all(|v| v.abs() < 1e-14));
        // opposite species cancel: rho and hence rho_hat are zero
        assert!(field.rhoh.iter().all(|v| v.abs() < 1e-13));
    }
}
