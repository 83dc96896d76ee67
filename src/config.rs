//! Immutable run configuration.
//!
//! Everything here is fixed for the lifetime of a run: species table,
//! time-centering, boundary-condition codes and the per-component E/B
//! code tables derived from them.

use std::error::Error;
use std::fmt;

/// Boundary-condition codes, one per face, in the face order
/// `[Xright, Xleft, Yright, Yleft, Zright, Zleft]`.
///
/// For the electromagnetic field the face code means
/// 0 = perfect conductor, 1 = magnetic mirror, 2 = open;
/// for the electrostatic potential 0 = periodic, 1 = Dirichlet,
/// 2 = Neumann.
pub type FaceCodes = [i32; 6];

/// Which boundary fix-up the run case requests after the B update.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Case {
    Default,
    Gem,
    GemNoPert,
    ForceFree,
}

pub enum ConfigError {
    BadCode(&'static str, i32),
    BadTheta(f64),
    BadTolerance(&'static str, f64),
    SpeciesMismatch(usize, usize),
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError::*;
        match self {
            BadCode(which, code) => write!(f, "invalid boundary code {} for {}", code, which),
            BadTheta(th) => write!(f, "decentering parameter {} outside [0.5, 1]", th),
            BadTolerance(which, tol) => write!(f, "non-positive tolerance {} = {}", which, tol),
            SpeciesMismatch(ns, got) => {
                write!(f, "expected {} per-species entries, got {}", ns, got)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for ConfigError {}

#[allow(non_snake_case)]
pub struct Config {
    /// Number of particle species.
    pub ns: usize,
    /// Charge-to-mass ratio per species.
    pub qom: Vec<f64>,
    /// Initial uniform charge density per species (used by the driver
    /// and the GEM-style boundary fixes).
    pub rho_init: Vec<f64>,
    /// Time-centering parameter, in [0.5, 1].
    pub th: f64,
    /// Time step.
    pub dt: f64,
    /// Light speed.
    pub c: f64,
    /// Smoothing gate; smoothing passes run only when != 1.
    pub smooth: f64,
    /// 4 pi in the normalization used throughout.
    pub four_pi: f64,
    /// delt = c * th * dt, the implicit length scale.
    pub delt: f64,
    /// Background field.
    pub b0: [f64; 3],
    /// Earth-model perturbation field.
    pub b1: [f64; 3],
    /// Current-sheet half thickness for the GEM-style fixes.
    pub delta: f64,
    /// Boundary drift velocity (enters the conductor source term and
    /// the open-boundary injection templates).
    pub u0: [f64; 3],
    /// Global box lengths.
    pub lx: f64,
    pub ly: f64,
    pub lz: f64,

    pub bc_phi: FaceCodes,
    pub bc_em: FaceCodes,

    // Per-component ghost codes derived from bc_em; the tangential /
    // normal roles are swapped between E and B.
    pub bc_ex: FaceCodes,
    pub bc_ey: FaceCodes,
    pub bc_ez: FaceCodes,
    pub bc_bx: FaceCodes,
    pub bc_by: FaceCodes,
    pub bc_bz: FaceCodes,

    pub cg_tol: f64,
    pub gmres_tol: f64,
    pub poisson_correction: bool,
    pub case_kind: Case,

    /// Preserve the observed Z-right susceptibility row index, which
    /// samples the density at the Y extent. Suspected upstream defect;
    /// kept switchable so tests can document both readings.
    pub zright_rho_y_index: bool,
    /// Record of the suspected tensor-slot mixup in the Z-left conductor
    /// wall. The port always computes the Z tensor; this flag only marks
    /// the site for comparison runs.
    pub compat_zleft_y_slots: bool,
}

impl Config {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        qom: Vec<f64>,
        rho_init: Vec<f64>,
        th: f64,
        dt: f64,
        c: f64,
        smooth: f64,
        b0: [f64; 3],
        lengths: [f64; 3],
        bc_phi: FaceCodes,
        bc_em: FaceCodes,
        cg_tol: f64,
        gmres_tol: f64,
        poisson_correction: bool,
        case_kind: Case,
    ) -> Result<Config, ConfigError> {
        if !(0.5..=1.0).contains(&th) {
            return Err(ConfigError::BadTheta(th));
        }
        if cg_tol <= 0.0 {
            return Err(ConfigError::BadTolerance("cg_tol", cg_tol));
        }
        if gmres_tol <= 0.0 {
            return Err(ConfigError::BadTolerance("gmres_tol", gmres_tol));
        }
        for (which, codes, max) in [("phi", &bc_phi, 2), ("em", &bc_em, 2)] {
            for &code in codes.iter() {
                if code < 0 || code > max {
                    return Err(ConfigError::BadCode(which, code));
                }
            }
        }
        let ns = qom.len();
        if rho_init.len() != ns {
            return Err(ConfigError::SpeciesMismatch(ns, rho_init.len()));
        }

        let four_pi = 16.0 * f64::atan(1.0);
        let delt = c * th * dt;

        // Tangential E and normal B are mirrored odd (code 1) on a perfect
        // conductor; normal E and tangential B even (code 2). A mirror
        // face swaps the roles. One asymmetry is kept as observed
        // upstream: the Ez rows for the Y walls are pinned to the odd
        // mirror for every face code, where the swap rule would give the
        // even mirror on non-conductor walls.
        let mut bc_ex = [0; 6];
        let mut bc_ey = [0; 6];
        let mut bc_ez = [0; 6];
        let mut bc_bx = [0; 6];
        let mut bc_by = [0; 6];
        let mut bc_bz = [0; 6];
        for face in 0..6 {
            let pc = bc_em[face] == 0;
            let (normal_e, tangent_e) = if pc { (2, 1) } else { (1, 2) };
            let (normal_b, tangent_b) = if pc { (1, 2) } else { (2, 1) };
            let axis = face / 2;
            bc_ex[face] = if axis == 0 { normal_e } else { tangent_e };
            bc_ey[face] = if axis == 1 { normal_e } else { tangent_e };
            bc_ez[face] = match axis {
                2 => normal_e,
                1 => 1,
                _ => tangent_e,
            };
            bc_bx[face] = if axis == 0 { normal_b } else { tangent_b };
            bc_by[face] = if axis == 1 { normal_b } else { tangent_b };
            bc_bz[face] = if axis == 2 { normal_b } else { tangent_b };
        }

        Ok(Config {
            ns,
            qom,
            rho_init,
            th,
            dt,
            c,
            smooth,
            four_pi,
            delt,
            b0,
            b1: [0.0; 3],
            delta: 0.5,
            u0: [0.0; 3],
            lx: lengths[0],
            ly: lengths[1],
            lz: lengths[2],
            bc_phi,
            bc_em,
            bc_ex,
            bc_ey,
            bc_ez,
            bc_bx,
            bc_by,
            bc_bz,
            cg_tol,
            gmres_tol,
            poisson_correction,
            case_kind,
            zright_rho_y_index: true,
            compat_zleft_y_slots: false,
        })
    }

    /// All-periodic configuration used by single-box runs and tests.
    pub fn periodic(
        qom: Vec<f64>,
        rho_init: Vec<f64>,
        th: f64,
        dt: f64,
        c: f64,
        lengths: [f64; 3],
    ) -> Config {
        Config::new(
            qom,
            rho_init,
            th,
            dt,
            c,
            1.0,
            [0.0; 3],
            lengths,
            [0; 6],
            [0; 6],
            1.0e-12,
            1.0e-12,
            false,
            Case::Default,
        )
        .expect("periodic defaults are valid")
    }

    pub fn beta(&self, is: usize) -> f64 {
        0.5 * self.qom[is] * self.dt / self.c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_tables_swap_roles() {
        let cfg = Config::periodic(vec![-1.0], vec![0.1], 1.0, 0.1, 1.0, [1.0, 1.0, 1.0]);
        // periodic() forces bc_em = 0 everywhere: perfect conductor tables
        // Face 0 is X-right: Ex is normal there, Ey/Ez tangential.
        assert_eq!(cfg.bc_ex[0], 2);
        assert_eq!(cfg.bc_ey[0], 1);
        assert_eq!(cfg.bc_ez[0], 1);
        // B swaps: Bx odd, By/Bz even.
        assert_eq!(cfg.bc_bx[0], 1);
        assert_eq!(cfg.bc_by[0], 2);
        assert_eq!(cfg.bc_bz[0], 2);
        // Face 4 is Z-right: Ez normal.
        assert_eq!(cfg.bc_ez[4], 2);
        assert_eq!(cfg.bc_bz[4], 1);
    }

    /// On mirror Y walls the swap rule would give Ez the even mirror;
    /// the table keeps the observed odd mirror there instead. The other
    /// tangential component follows the rule.
    #[test]
    fn ez_rows_on_y_walls_stay_odd() {
        let cfg = Config::new(
            vec![-1.0],
            vec![0.1],
            1.0,
            0.1,
            1.0,
            1.0,
            [0.0; 3],
            [1.0; 3],
            [1; 6],
            [1; 6],
            1e-8,
            1e-8,
            false,
            Case::Default,
        )
        .unwrap();
        // face 2 is Y-right, face 3 Y-left: Ex is tangential (even
        // mirror), Ez is pinned odd
        assert_eq!(cfg.bc_ex[2], 2);
        assert_eq!(cfg.bc_ex[3], 2);
        assert_eq!(cfg.bc_ez[2], 1);
        assert_eq!(cfg.bc_ez[3], 1);
        // the X and Z walls follow the swap rule for Ez
        assert_eq!(cfg.bc_ez[0], 2);
        assert_eq!(cfg.bc_ez[4], 1);
    }

    #[test]
    fn rejects_bad_theta() {
        let got = Config::new(
            vec![-1.0],
            vec![0.1],
            0.3,
            0.1,
            1.0,
            1.0,
            [0.0; 3],
            [1.0; 3],
            [0; 6],
            [0; 6],
            1e-8,
            1e-8,
            false,
            Case::Default,
        );
        assert!(got.is_err());
    }

    #[test]
    fn delt_is_c_theta_dt() {
        let cfg = Config::periodic(vec![-1.0], vec![0.1], 0.75, 0.2, 3.0, [1.0; 3]);
        assert!((cfg.delt - 3.0 * 0.75 * 0.2).abs() < 1e-15);
        assert!((cfg.four_pi - 4.0 * std::f64::consts::PI).abs() < 1e-13);
    }
}
