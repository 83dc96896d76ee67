//! Local staggered Cartesian mesh and its discrete operators.
//!
//! Cell counts include one ghost layer per face, so a subdomain owning
//! `N` cells along x stores `nxc = N + 2` centers and `nxn = nxc + 1`
//! nodes. Node `i` sits at `x_start + (i-1)*dx`; the proper subdomain is
//! spanned by nodes `1 ..= nxn-2`.
//!
//! Every operator is pure on its inputs and writes a caller-supplied
//! output. Ghost layers are assumed current unless the operator performs
//! its own exchange (the composed Laplacians).

use ndarray::{Array3, Array4, ArrayView3, ArrayView4};

use crate::halo::Halo;

pub struct StaggeredGrid {
    pub nxc: usize,
    pub nyc: usize,
    pub nzc: usize,
    pub nxn: usize,
    pub nyn: usize,
    pub nzn: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub inv_dx: f64,
    pub inv_dy: f64,
    pub inv_dz: f64,
    pub inv_vol: f64,
    pub x_start: f64,
    pub y_start: f64,
    pub z_start: f64,
    pub x_end: f64,
    pub y_end: f64,
    pub z_end: f64,
}

/// Three center-valued scratch arrays for the composed operators.
pub struct CenterScratch {
    pub x: Array3<f64>,
    pub y: Array3<f64>,
    pub z: Array3<f64>,
}

/// Three node-valued scratch arrays for the composed operators.
pub struct NodeScratch {
    pub x: Array3<f64>,
    pub y: Array3<f64>,
    pub z: Array3<f64>,
}

impl StaggeredGrid {
    /// Build the local mesh from the owned cell counts, spacings and the
    /// lower corner of the proper subdomain.
    pub fn new(owned: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> StaggeredGrid {
        let (nx, ny, nz) = (owned[0], owned[1], owned[2]);
        let (dx, dy, dz) = (spacing[0], spacing[1], spacing[2]);
        StaggeredGrid {
            nxc: nx + 2,
            nyc: ny + 2,
            nzc: nz + 2,
            nxn: nx + 3,
            nyn: ny + 3,
            nzn: nz + 3,
            dx,
            dy,
            dz,
            inv_dx: 1.0 / dx,
            inv_dy: 1.0 / dy,
            inv_dz: 1.0 / dz,
            inv_vol: 1.0 / (dx * dy * dz),
            x_start: origin[0],
            y_start: origin[1],
            z_start: origin[2],
            x_end: origin[0] + nx as f64 * dx,
            y_end: origin[1] + ny as f64 * dy,
            z_end: origin[2] + nz as f64 * dz,
        }
    }

    pub fn node_dims(&self) -> (usize, usize, usize) {
        (self.nxn, self.nyn, self.nzn)
    }

    pub fn center_dims(&self) -> (usize, usize, usize) {
        (self.nxc, self.nyc, self.nzc)
    }

    pub fn node_array(&self) -> Array3<f64> {
        Array3::zeros(self.node_dims())
    }

    pub fn center_array(&self) -> Array3<f64> {
        Array3::zeros(self.center_dims())
    }

    pub fn species_node_array(&self, ns: usize) -> Array4<f64> {
        Array4::zeros((ns, self.nxn, self.nyn, self.nzn))
    }

    pub fn species_center_array(&self, ns: usize) -> Array4<f64> {
        Array4::zeros((ns, self.nxc, self.nyc, self.nzc))
    }

    pub fn center_scratch(&self) -> CenterScratch {
        CenterScratch {
            x: self.center_array(),
            y: self.center_array(),
            z: self.center_array(),
        }
    }

    pub fn node_scratch(&self) -> NodeScratch {
        NodeScratch {
            x: self.node_array(),
            y: self.node_array(),
            z: self.node_array(),
        }
    }

    #[inline]
    pub fn x_n(&self, i: usize) -> f64 {
        self.x_start + (i as f64 - 1.0) * self.dx
    }

    #[inline]
    pub fn y_n(&self, j: usize) -> f64 {
        self.y_start + (j as f64 - 1.0) * self.dy
    }

    #[inline]
    pub fn z_n(&self, k: usize) -> f64 {
        self.z_start + (k as f64 - 1.0) * self.dz
    }

    #[inline]
    pub fn x_c(&self, i: usize) -> f64 {
        self.x_start + (i as f64 - 0.5) * self.dx
    }

    #[inline]
    pub fn y_c(&self, j: usize) -> f64 {
        self.y_start + (j as f64 - 0.5) * self.dy
    }

    #[inline]
    pub fn z_c(&self, k: usize) -> f64 {
        self.z_start + (k as f64 - 0.5) * self.dz
    }

    /// Gradient of a center scalar onto node vectors. Parallel over mesh
    /// cells like every operator on the Krylov path.
    pub fn grad_c2n(
        &self,
        grad_x: &mut Array3<f64>,
        grad_y: &mut Array3<f64>,
        grad_z: &mut Array3<f64>,
        s: ArrayView3<f64>,
    ) {
        use ndarray::{s as sl, Zip};
        Zip::indexed(grad_x.slice_mut(sl![1..-1, 1..-1, 1..-1]))
            .and(grad_y.slice_mut(sl![1..-1, 1..-1, 1..-1]))
            .and(grad_z.slice_mut(sl![1..-1, 1..-1, 1..-1]))
            .par_for_each(|(i0, j0, k0), gx, gy, gz| {
                let (i, j, k) = (i0 + 1, j0 + 1, k0 + 1);
                *gx = 0.25
                    * self.inv_dx
                    * (s[[i, j, k]] - s[[i - 1, j, k]] + s[[i, j, k - 1]]
                        - s[[i - 1, j, k - 1]]
                        + s[[i, j - 1, k]]
                        - s[[i - 1, j - 1, k]]
                        + s[[i, j - 1, k - 1]]
                        - s[[i - 1, j - 1, k - 1]]);
                *gy = 0.25
                    * self.inv_dy
                    * (s[[i, j, k]] - s[[i, j - 1, k]] + s[[i, j, k - 1]]
                        - s[[i, j - 1, k - 1]]
                        + s[[i - 1, j, k]]
                        - s[[i - 1, j - 1, k]]
                        + s[[i - 1, j, k - 1]]
                        - s[[i - 1, j - 1, k - 1]]);
                *gz = 0.25
                    * self.inv_dz
                    * (s[[i, j, k]] - s[[i, j, k - 1]] + s[[i - 1, j, k]]
                        - s[[i - 1, j, k - 1]]
                        + s[[i, j - 1, k]]
                        - s[[i, j - 1, k - 1]]
                        + s[[i - 1, j - 1, k]]
                        - s[[i - 1, j - 1, k - 1]]);
            });
    }

    /// Gradient of a node scalar onto center vectors.
    pub fn grad_n2c(
        &self,
        grad_x: &mut Array3<f64>,
        grad_y: &mut Array3<f64>,
        grad_z: &mut Array3<f64>,
        s: ArrayView3<f64>,
    ) {
        use ndarray::{s as sl, Zip};
        Zip::indexed(grad_x.slice_mut(sl![1..-1, 1..-1, 1..-1]))
            .and(grad_y.slice_mut(sl![1..-1, 1..-1, 1..-1]))
            .and(grad_z.slice_mut(sl![1..-1, 1..-1, 1..-1]))
            .par_for_each(|(i0, j0, k0), gx, gy, gz| {
                let (i, j, k) = (i0 + 1, j0 + 1, k0 + 1);
                *gx = 0.25
                    * self.inv_dx
                    * (s[[i + 1, j, k]] - s[[i, j, k]] + s[[i + 1, j, k + 1]]
                        - s[[i, j, k + 1]]
                        + s[[i + 1, j + 1, k]]
                        - s[[i, j + 1, k]]
                        + s[[i + 1, j + 1, k + 1]]
                        - s[[i, j + 1, k + 1]]);
                *gy = 0.25
                    * self.inv_dy
                    * (s[[i, j + 1, k]] - s[[i, j, k]] + s[[i, j + 1, k + 1]]
                        - s[[i, j, k + 1]]
                        + s[[i + 1, j + 1, k]]
                        - s[[i + 1, j, k]]
                        + s[[i + 1, j + 1, k + 1]]
                        - s[[i + 1, j, k + 1]]);
                *gz = 0.25
                    * self.inv_dz
                    * (s[[i, j, k + 1]] - s[[i, j, k]] + s[[i + 1, j, k + 1]]
                        - s[[i + 1, j, k]]
                        + s[[i, j + 1, k + 1]]
                        - s[[i, j + 1, k]]
                        + s[[i + 1, j + 1, k + 1]]
                        - s[[i + 1, j + 1, k]]);
            });
    }

    /// Divergence of a node vector onto a center scalar.
    pub fn div_n2c(
        &self,
        div: &mut Array3<f64>,
        vx: ArrayView3<f64>,
        vy: ArrayView3<f64>,
        vz: ArrayView3<f64>,
    ) {
        use ndarray::{s as sl, Zip};
        Zip::indexed(div.slice_mut(sl![1..-1, 1..-1, 1..-1])).par_for_each(|(i0, j0, k0), d| {
            let (i, j, k) = (i0 + 1, j0 + 1, k0 + 1);
            let comp_x = 0.25
                * self.inv_dx
                * (vx[[i + 1, j, k]] - vx[[i, j, k]] + vx[[i + 1, j, k + 1]]
                    - vx[[i, j, k + 1]]
                    + vx[[i + 1, j + 1, k]]
                    - vx[[i, j + 1, k]]
                    + vx[[i + 1, j + 1, k + 1]]
                    - vx[[i, j + 1, k + 1]]);
            let comp_y = 0.25
                * self.inv_dy
                * (vy[[i, j + 1, k]] - vy[[i, j, k]] + vy[[i, j + 1, k + 1]]
                    - vy[[i, j, k + 1]]
                    + vy[[i + 1, j + 1, k]]
                    - vy[[i + 1, j, k]]
                    + vy[[i + 1, j + 1, k + 1]]
                    - vy[[i + 1, j, k + 1]]);
            let comp_z = 0.25
                * self.inv_dz
                * (vz[[i, j, k + 1]] - vz[[i, j, k]] + vz[[i + 1, j, k + 1]]
                    - vz[[i + 1, j, k]]
                    + vz[[i, j + 1, k + 1]]
                    - vz[[i, j + 1, k]]
                    + vz[[i + 1, j + 1, k + 1]]
                    - vz[[i + 1, j + 1, k]]);
            *d = comp_x + comp_y + comp_z;
        });
    }

    /// Divergence of a center vector onto a node scalar.
    pub fn div_c2n(
        &self,
        div: &mut Array3<f64>,
        vx: ArrayView3<f64>,
        vy: ArrayView3<f64>,
        vz: ArrayView3<f64>,
    ) {
        use ndarray::{s as sl, Zip};
        Zip::indexed(div.slice_mut(sl![1..-1, 1..-1, 1..-1])).par_for_each(|(i0, j0, k0), d| {
            let (i, j, k) = (i0 + 1, j0 + 1, k0 + 1);
            let comp_x = 0.25
                * self.inv_dx
                * (vx[[i, j, k]] - vx[[i - 1, j, k]] + vx[[i, j, k - 1]]
                    - vx[[i - 1, j, k - 1]]
                    + vx[[i, j - 1, k]]
                    - vx[[i - 1, j - 1, k]]
                    + vx[[i, j - 1, k - 1]]
                    - vx[[i - 1, j - 1, k - 1]]);
            let comp_y = 0.25
                * self.inv_dy
                * (vy[[i, j, k]] - vy[[i, j - 1, k]] + vy[[i, j, k - 1]]
                    - vy[[i, j - 1, k - 1]]
                    + vy[[i - 1, j, k]]
                    - vy[[i - 1, j - 1, k]]
                    + vy[[i - 1, j, k - 1]]
                    - vy[[i - 1, j - 1, k - 1]]);
            let comp_z = 0.25
                * self.inv_dz
                * (vz[[i, j, k]] - vz[[i, j, k - 1]] + vz[[i - 1, j, k]]
                    - vz[[i - 1, j, k - 1]]
                    + vz[[i, j - 1, k]]
                    - vz[[i, j - 1, k - 1]]
                    + vz[[i - 1, j - 1, k]]
                    - vz[[i - 1, j - 1, k - 1]]);
            *d = comp_x + comp_y + comp_z;
        });
    }

    /// Curl of a center vector onto node vectors.
    pub fn curl_c2n(
        &self,
        curl_x: &mut Array3<f64>,
        curl_y: &mut Array3<f64>,
        curl_z: &mut Array3<f64>,
        vx: ArrayView3<f64>,
        vy: ArrayView3<f64>,
        vz: ArrayView3<f64>,
    ) {
        for i in 1..self.nxn - 1 {
            for j in 1..self.nyn - 1 {
                for k in 1..self.nzn - 1 {
                    let comp_z_dy = 0.25
                        * self.inv_dy
                        * (vz[[i, j, k]] - vz[[i, j - 1, k]]
                            + vz[[i, j, k - 1]]
                            - vz[[i, j - 1, k - 1]]
                            + vz[[i - 1, j, k]]
                            - vz[[i - 1, j - 1, k]]
                            + vz[[i - 1, j, k - 1]]
                            - vz[[i - 1, j - 1, k - 1]]);
                    let comp_y_dz = 0.25
                        * self.inv_dz
                        * (vy[[i, j, k]] - vy[[i, j, k - 1]]
                            + vy[[i - 1, j, k]]
                            - vy[[i - 1, j, k - 1]]
                            + vy[[i, j - 1, k]]
                            - vy[[i, j - 1, k - 1]]
                            + vy[[i - 1, j - 1, k]]
                            - vy[[i - 1, j - 1, k - 1]]);
                    let comp_x_dz = 0.25
                        * self.inv_dz
                        * (vx[[i, j, k]] - vx[[i, j, k - 1]]
                            + vx[[i - 1, j, k]]
                            - vx[[i - 1, j, k - 1]]
                            + vx[[i, j - 1, k]]
                            - vx[[i, j - 1, k - 1]]
                            + vx[[i - 1, j - 1, k]]
                            - vx[[i - 1, j - 1, k - 1]]);
                    let comp_z_dx = 0.25
                        * self.inv_dx
                        * (vz[[i, j, k]] - vz[[i - 1, j, k]]
                            + vz[[i, j, k - 1]]
                            - vz[[i - 1, j, k - 1]]
                            + vz[[i, j - 1, k]]
                            - vz[[i - 1, j - 1, k]]
                            + vz[[i, j - 1, k - 1]]
                            - vz[[i - 1, j - 1, k - 1]]);
                    let comp_y_dx = 0.25
                        * self.inv_dx
                        * (vy[[i, j, k]] - vy[[i - 1, j, k]]
                            + vy[[i, j, k - 1]]
                            - vy[[i - 1, j, k - 1]]
                            + vy[[i, j - 1, k]]
                            - vy[[i - 1, j - 1, k]]
                            + vy[[i, j - 1, k - 1]]
                            - vy[[i - 1, j - 1, k - 1]]);
                    let comp_x_dy = 0.25
                        * self.inv_dy
                        * (vx[[i, j, k]] - vx[[i, j - 1, k]]
                            + vx[[i, j, k - 1]]
                            - vx[[i, j - 1, k - 1]]
                            + vx[[i - 1, j, k]]
                            - vx[[i - 1, j - 1, k]]
                            + vx[[i - 1, j, k - 1]]
                            - vx[[i - 1, j - 1, k - 1]]);
                    curl_x[[i, j, k]] = comp_z_dy - comp_y_dz;
                    curl_y[[i, j, k]] = comp_x_dz - comp_z_dx;
                    curl_z[[i, j, k]] = comp_y_dx - comp_x_dy;
                }
            }
        }
    }

    /// Curl of a node vector onto center vectors.
    pub fn curl_n2c(
        &self,
        curl_x: &mut Array3<f64>,
        curl_y: &mut Array3<f64>,
        curl_z: &mut Array3<f64>,
        vx: ArrayView3<f64>,
        vy: ArrayView3<f64>,
        vz: ArrayView3<f64>,
    ) {
        for i in 1..self.nxc - 1 {
            for j in 1..self.nyc - 1 {
                for k in 1..self.nzc - 1 {
                    let comp_z_dy = 0.25
                        * self.inv_dy
                        * (vz[[i, j + 1, k]] - vz[[i, j, k]]
                            + vz[[i, j + 1, k + 1]]
                            - vz[[i, j, k + 1]]
                            + vz[[i + 1, j + 1, k]]
                            - vz[[i + 1, j, k]]
                            + vz[[i + 1, j + 1, k + 1]]
                            - vz[[i + 1, j, k + 1]]);
                    let comp_y_dz = 0.25
                        * self.inv_dz
                        * (vy[[i, j, k + 1]] - vy[[i, j, k]]
                            + vy[[i + 1, j, k + 1]]
                            - vy[[i + 1, j, k]]
                            + vy[[i, j + 1, k + 1]]
                            - vy[[i, j + 1, k]]
                            + vy[[i + 1, j + 1, k + 1]]
                            - vy[[i + 1, j + 1, k]]);
                    let comp_x_dz = 0.25
                        * self.inv_dz
                        * (vx[[i, j, k + 1]] - vx[[i, j, k]]
                            + vx[[i + 1, j, k + 1]]
                            - vx[[i + 1, j, k]]
                            + vx[[i, j + 1, k + 1]]
                            - vx[[i, j + 1, k]]
                            + vx[[i + 1, j + 1, k + 1]]
                            - vx[[i + 1, j + 1, k]]);
                    let comp_z_dx = 0.25
                        * self.inv_dx
                        * (vz[[i + 1, j, k]] - vz[[i, j, k]]
                            + vz[[i + 1, j, k + 1]]
                            - vz[[i, j, k + 1]]
                            + vz[[i + 1, j + 1, k]]
                            - vz[[i, j + 1, k]]
                            + vz[[i + 1, j + 1, k + 1]]
                            - vz[[i, j + 1, k + 1]]);
                    let comp_y_dx = 0.25
                        * self.inv_dx
                        * (vy[[i + 1, j, k]] - vy[[i, j, k]]
                            + vy[[i + 1, j, k + 1]]
                            - vy[[i, j, k + 1]]
                            + vy[[i + 1, j + 1, k]]
                            - vy[[i, j + 1, k]]
                            + vy[[i + 1, j + 1, k + 1]]
                            - vy[[i, j + 1, k + 1]]);
                    let comp_x_dy = 0.25
                        * self.inv_dy
                        * (vx[[i, j + 1, k]] - vx[[i, j, k]]
                            + vx[[i, j + 1, k + 1]]
                            - vx[[i, j, k + 1]]
                            + vx[[i + 1, j + 1, k]]
                            - vx[[i + 1, j, k]]
                            + vx[[i + 1, j + 1, k + 1]]
                            - vx[[i + 1, j, k + 1]]);
                    curl_x[[i, j, k]] = comp_z_dy - comp_y_dz;
                    curl_y[[i, j, k]] = comp_x_dz - comp_z_dx;
                    curl_z[[i, j, k]] = comp_y_dx - comp_x_dy;
                }
            }
        }
    }

    /// Node Laplacian as the composition div(grad), with one center ghost
    /// exchange between the two halves.
    pub fn lap_n2n<H: Halo>(
        &self,
        lap: &mut Array3<f64>,
        s: ArrayView3<f64>,
        scratch: &mut CenterScratch,
        halo: &H,
    ) {
        self.grad_n2c(&mut scratch.x, &mut scratch.y, &mut scratch.z, s);
        halo.center_bc_p(scratch.x.view_mut());
        halo.center_bc_p(scratch.y.view_mut());
        halo.center_bc_p(scratch.z.view_mut());
        self.div_c2n(lap, scratch.x.view(), scratch.y.view(), scratch.z.view());
    }

    /// Center Laplacian for the Poisson operator, composed as
    /// div(grad) so divergence cleaning annihilates div E exactly to
    /// solver tolerance. Exchanges the input's ghost layer first.
    pub fn lap_c2c_poisson<H: Halo>(
        &self,
        lap: &mut Array3<f64>,
        s: &mut Array3<f64>,
        scratch: &mut NodeScratch,
        halo: &H,
    ) {
        halo.center_bc_p(s.view_mut());
        self.grad_c2n(&mut scratch.x, &mut scratch.y, &mut scratch.z, s.view());
        self.div_n2c(lap, scratch.x.view(), scratch.y.view(), scratch.z.view());
    }

    /// Interpolate a node scalar to every center (second order).
    pub fn interp_n2c(&self, c: &mut Array3<f64>, n: ArrayView3<f64>) {
        for i in 0..self.nxc {
            for j in 0..self.nyc {
                for k in 0..self.nzc {
                    c[[i, j, k]] = 0.125
                        * (n[[i, j, k]]
                            + n[[i + 1, j, k]]
                            + n[[i, j + 1, k]]
                            + n[[i, j, k + 1]]
                            + n[[i + 1, j + 1, k]]
                            + n[[i + 1, j, k + 1]]
                            + n[[i, j + 1, k + 1]]
                            + n[[i + 1, j + 1, k + 1]]);
                }
            }
        }
    }

    /// Interpolate a center scalar to interior nodes (second order).
    pub fn interp_c2n(&self, n: &mut Array3<f64>, c: ArrayView3<f64>) {
        for i in 1..self.nxn - 1 {
            for j in 1..self.nyn - 1 {
                for k in 1..self.nzn - 1 {
                    n[[i, j, k]] = 0.125
                        * (c[[i, j, k]]
                            + c[[i - 1, j, k]]
                            + c[[i, j - 1, k]]
                            + c[[i, j, k - 1]]
                            + c[[i - 1, j - 1, k]]
                            + c[[i - 1, j, k - 1]]
                            + c[[i, j - 1, k - 1]]
                            + c[[i - 1, j - 1, k - 1]]);
                }
            }
        }
    }

    /// Species overload of [`Self::interp_n2c`].
    pub fn interp_n2c_species(&self, c: &mut Array4<f64>, is: usize, n: ArrayView4<f64>) {
        let n = n.index_axis(ndarray::Axis(0), is);
        let mut c = c.index_axis_mut(ndarray::Axis(0), is);
        for i in 0..self.nxc {
            for j in 0..self.nyc {
                for k in 0..self.nzc {
                    c[[i, j, k]] = 0.125
                        * (n[[i, j, k]]
                            + n[[i + 1, j, k]]
                            + n[[i, j + 1, k]]
                            + n[[i, j, k + 1]]
                            + n[[i + 1, j + 1, k]]
                            + n[[i + 1, j, k + 1]]
                            + n[[i, j + 1, k + 1]]
                            + n[[i + 1, j + 1, k + 1]]);
                }
            }
        }
    }

    /// Divergence of the symmetric species pressure tensor onto center
    /// vectors.
    #[allow(clippy::too_many_arguments)]
    pub fn div_symm_tensor_n2c(
        &self,
        div_x: &mut Array3<f64>,
        div_y: &mut Array3<f64>,
        div_z: &mut Array3<f64>,
        p_xx: ArrayView4<f64>,
        p_xy: ArrayView4<f64>,
        p_xz: ArrayView4<f64>,
        p_yy: ArrayView4<f64>,
        p_yz: ArrayView4<f64>,
        p_zz: ArrayView4<f64>,
        is: usize,
    ) {
        let ax = ndarray::Axis(0);
        let xx = p_xx.index_axis(ax, is);
        let xy = p_xy.index_axis(ax, is);
        let xz = p_xz.index_axis(ax, is);
        let yy = p_yy.index_axis(ax, is);
        let yz = p_yz.index_axis(ax, is);
        let zz = p_zz.index_axis(ax, is);

        // forward-averaged d/dx, d/dy, d/dz of a node field at a center
        let ddx = |f: &ndarray::ArrayView3<f64>, i: usize, j: usize, k: usize| {
            0.25 * self.inv_dx
                * (f[[i + 1, j, k]] - f[[i, j, k]] + f[[i + 1, j, k + 1]] - f[[i, j, k + 1]]
                    + f[[i + 1, j + 1, k]]
                    - f[[i, j + 1, k]]
                    + f[[i + 1, j + 1, k + 1]]
                    - f[[i, j + 1, k + 1]])
        };
        let ddy = |f: &ndarray::ArrayView3<f64>, i: usize, j: usize, k: usize| {
            0.25 * self.inv_dy
                * (f[[i, j + 1, k]] - f[[i, j, k]] + f[[i, j + 1, k + 1]] - f[[i, j, k + 1]]
                    + f[[i + 1, j + 1, k]]
                    - f[[i + 1, j, k]]
                    + f[[i + 1, j + 1, k + 1]]
                    - f[[i + 1, j, k + 1]])
        };
        let ddz = |f: &ndarray::ArrayView3<f64>, i: usize, j: usize, k: usize| {
            0.25 * self.inv_dz
                * (f[[i, j, k + 1]] - f[[i, j, k]] + f[[i + 1, j, k + 1]] - f[[i + 1, j, k]]
                    + f[[i, j + 1, k + 1]]
                    - f[[i, j + 1, k]]
                    + f[[i + 1, j + 1, k + 1]]
                    - f[[i + 1, j + 1, k]])
        };

        for i in 1..self.nxc - 1 {
            for j in 1..self.nyc - 1 {
                for k in 1..self.nzc - 1 {
                    div_x[[i, j, k]] = ddx(&xx, i, j, k) + ddy(&xy, i, j, k) + ddz(&xz, i, j, k);
                    div_y[[i, j, k]] = ddx(&xy, i, j, k) + ddy(&yy, i, j, k) + ddz(&yz, i, j, k);
                    div_z[[i, j, k]] = ddx(&xz, i, j, k) + ddy(&yz, i, j, k) + ddz(&zz, i, j, k);
                }
            }
        }
    }
}

/// Interior smoothing pass shared by field and moment smoothing: the
/// strength argument only gates the sweep; the six passes alternate
/// weights 0 and 0.5 on the centre point.
pub fn smooth_inplace(f: &mut Array3<f64>, tmp: &mut Array3<f64>, pass: usize) {
    let value = if pass % 2 == 1 { 0.0 } else { 0.5 };
    let alpha = (1.0 - value) / 6.0;
    let (nx, ny, nz) = f.dim();
    for i in 1..nx - 1 {
        for j in 1..ny - 1 {
            for k in 1..nz - 1 {
                tmp[[i, j, k]] = value * f[[i, j, k]]
                    + alpha
                        * (f[[i - 1, j, k]]
                            + f[[i + 1, j, k]]
                            + f[[i, j - 1, k]]
                            + f[[i, j + 1, k]]
                            + f[[i, j, k - 1]]
                            + f[[i, j, k + 1]]);
            }
        }
    }
    for i in 1..nx - 1 {
        for j in 1..ny - 1 {
            for k in 1..nz - 1 {
                f[[i, j, k]] = tmp[[i, j, k]];
            }
        }
    }
}

#[allow(clippy::reversed_empty_ranges)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::halo::LocalHalo;
    use ndarray::s;

    fn periodic_fill<F: Fn(f64, f64, f64) -> f64>(
        grid: &StaggeredGrid,
        arr: &mut Array3<f64>,
        node: bool,
        f: F,
    ) {
        let (nx, ny, nz) = arr.dim();
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    let (x, y, z) = if node {
                        (grid.x_n(i), grid.y_n(j), grid.z_n(k))
                    } else {
                        (grid.x_c(i), grid.y_c(j), grid.z_c(k))
                    };
                    arr[[i, j, k]] = f(x, y, z);
                }
            }
        }
    }

    #[test]
    fn node_center_coordinates() {
        let grid = StaggeredGrid::new([4, 4, 4], [0.5, 0.5, 0.5], [0.0, 0.0, 0.0]);
        assert_eq!(grid.nxc, 6);
        assert_eq!(grid.nxn, 7);
        // ghost node sits one spacing outside the subdomain
        assert!((grid.x_n(0) + 0.5).abs() < 1e-15);
        assert!((grid.x_n(1)).abs() < 1e-15);
        assert!((grid.x_n(grid.nxn - 2) - grid.x_end).abs() < 1e-15);
        assert!((grid.x_c(1) - 0.25).abs() < 1e-15);
    }

    #[test]
    fn gradient_of_linear_field_is_exact() {
        let grid = StaggeredGrid::new([4, 4, 4], [0.25, 0.5, 1.0], [0.0, 0.0, 0.0]);
        let mut s = grid.center_array();
        periodic_fill(&grid, &mut s, false, |x, y, z| 2.0 * x - 3.0 * y + 0.5 * z);
        let mut gx = grid.node_array();
        let mut gy = grid.node_array();
        let mut gz = grid.node_array();
        grid.grad_c2n(&mut gx, &mut gy, &mut gz, s.view());
        for i in 1..grid.nxn - 1 {
            for j in 1..grid.nyn - 1 {
                for k in 1..grid.nzn - 1 {
                    assert!((gx[[i, j, k]] - 2.0).abs() < 1e-12);
                    assert!((gy[[i, j, k]] + 3.0).abs() < 1e-12);
                    assert!((gz[[i, j, k]] - 0.5).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn curl_of_uniform_field_vanishes() {
        let grid = StaggeredGrid::new([4, 4, 4], [1.0, 1.0, 1.0], [0.0, 0.0, 0.0]);
        let mut vx = grid.center_array();
        let mut vy = grid.center_array();
        let mut vz = grid.center_array();
        vx.fill(0.3);
        vy.fill(-1.2);
        vz.fill(7.0);
        let mut cx = grid.node_array();
        let mut cy = grid.node_array();
        let mut cz = grid.node_array();
        grid.curl_c2n(&mut cx, &mut cy, &mut cz, vx.view(), vy.view(), vz.view());
        assert!(cx.iter().all(|v| v.abs() < 1e-14));
        assert!(cy.iter().all(|v| v.abs() < 1e-14));
        assert!(cz.iter().all(|v| v.abs() < 1e-14));
    }

    /// Discrete integration by parts: for periodic fields,
    /// sum f div(g) dV + sum g . grad(f) dV vanishes.
    #[test]
    fn grad_div_adjoint_pair() {
        let grid = StaggeredGrid::new([8, 8, 8], [1.0 / 8.0, 1.0 / 8.0, 1.0 / 8.0], [0.0; 3]);
        let halo = LocalHalo::periodic();
        let tau = 2.0 * std::f64::consts::PI;

        let mut f = grid.center_array();
        periodic_fill(&grid, &mut f, false, |x, y, z| {
            (tau * x).sin() + (tau * (y + z)).cos()
        });
        halo.center_bc_p(f.view_mut());

        let mut gx = grid.node_array();
        let mut gy = grid.node_array();
        let mut gz = grid.node_array();
        periodic_fill(&grid, &mut gx, true, |x, y, _| (tau * (x + y)).sin());
        periodic_fill(&grid, &mut gy, true, |_, y, z| (tau * y).cos() * (tau * z).sin());
        periodic_fill(&grid, &mut gz, true, |x, _, z| (tau * (z - x)).cos());
        for g in [&mut gx, &mut gy, &mut gz] {
            halo.node_p(g.view_mut());
        }

        let mut div_g = grid.center_array();
        grid.div_n2c(&mut div_g, gx.view(), gy.view(), gz.view());
        let mut fx = grid.node_array();
        let mut fy = grid.node_array();
        let mut fz = grid.node_array();
        grid.grad_c2n(&mut fx, &mut fy, &mut fz, f.view());

        // one copy of each physical center/node
        let vol = grid.dx * grid.dy * grid.dz;
        let mut lhs = 0.0;
        for i in 1..grid.nxc - 1 {
            for j in 1..grid.nyc - 1 {
                for k in 1..grid.nzc - 1 {
                    lhs += f[[i, j, k]] * div_g[[i, j, k]] * vol;
                }
            }
        }
        let mut rhs = 0.0;
        for i in 1..grid.nxn - 2 {
            for j in 1..grid.nyn - 2 {
                for k in 1..grid.nzn - 2 {
                    rhs += (gx[[i, j, k]] * fx[[i, j, k]]
                        + gy[[i, j, k]] * fy[[i, j, k]]
                        + gz[[i, j, k]] * fz[[i, j, k]])
                        * vol;
                }
            }
        }
        assert!(
            (lhs + rhs).abs() < 1e-10,
            "integration by parts violated: {} vs {}",
            lhs,
            rhs
        );
    }

    #[test]
    fn interp_round_trip_preserves_constants() {
        let grid = StaggeredGrid::new([4, 4, 4], [1.0; 3], [0.0; 3]);
        let mut n = grid.node_array();
        n.fill(3.25);
        let mut c = grid.center_array();
        grid.interp_n2c(&mut c, n.view());
        assert!(c.iter().all(|v| (v - 3.25).abs() < 1e-14));
        let mut back = grid.node_array();
        grid.interp_c2n(&mut back, c.view());
        assert!(back
            .slice(s![1..-1, 1..-1, 1..-1])
            .iter()
            .all(|v| (v - 3.25).abs() < 1e-14));
    }

    #[test]
    fn smoothing_passes_preserve_uniform_fields() {
        let mut f = Array3::from_elem((6, 6, 6), 2.5);
        let mut tmp = Array3::zeros((6, 6, 6));
        for pass in 1..=6 {
            smooth_inplace(&mut f, &mut tmp, pass);
        }
        assert!(f
            .slice(s![1..-1, 1..-1, 1..-1])
            .iter()
            .all(|v| (v - 2.5).abs() < 1e-14));
    }
}
