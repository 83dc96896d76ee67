//! Parse the input configuration file.

use std::error::Error;
use std::fmt;
use std::path::Path;

use yaml_rust::{yaml::Yaml, YamlLoader};

use garnet::config::{Case, Config, FaceCodes};

pub enum InputError {
    InvalidInputFile(&'static str),
    CouldNotParse(String, String),
    MissingField(String, String),
}

impl fmt::Debug for InputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InputError::*;
        let help_msg = "Usage: mpirun -n np ./garnet input-file";
        match self {
            InvalidInputFile(s) => write!(f, "invalid input file: {}\n{}", s, help_msg),
            CouldNotParse(section, field) => write!(
                f,
                "unable to parse '{}' in section '{}' of the configuration file",
                field, section
            ),
            MissingField(section, field) => write!(
                f,
                "unable to find '{}' in section '{}' with correct type in configuration file",
                field, section
            ),
        }
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for InputError {}

/// The parsed input deck, queried field by field.
pub struct Deck {
    input: Yaml,
}

/// Everything the driver needs beyond the immutable [`Config`].
pub struct RunControl {
    pub ncells: [usize; 3],
    pub nprocs: [i32; 3],
    pub periodic: [bool; 3],
    pub ncycles: usize,
    pub npc: usize,
    pub vth: Vec<f64>,
}

impl Deck {
    pub fn from_file(path: &Path) -> Result<Deck, InputError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|_e| InputError::InvalidInputFile("unable to read file"))?;
        let input = YamlLoader::load_from_str(&contents)
            .map_err(|_e| InputError::InvalidInputFile("yaml trouble"))?;
        let input = input
            .first()
            .ok_or(InputError::InvalidInputFile("yaml trouble"))?;
        Ok(Deck {
            input: input.clone(),
        })
    }

    fn f64(&self, section: &str, field: &str) -> Result<f64, InputError> {
        match &self.input[section][field] {
            Yaml::Real(s) => s
                .parse::<f64>()
                .map_err(|_| InputError::CouldNotParse(section.to_owned(), field.to_owned())),
            Yaml::Integer(i) => Ok(*i as f64),
            _ => Err(InputError::MissingField(
                section.to_owned(),
                field.to_owned(),
            )),
        }
    }

    fn usize(&self, section: &str, field: &str) -> Result<usize, InputError> {
        match &self.input[section][field] {
            Yaml::Integer(i) if *i >= 0 => Ok(*i as usize),
            _ => Err(InputError::MissingField(
                section.to_owned(),
                field.to_owned(),
            )),
        }
    }

    fn bool(&self, section: &str, field: &str) -> Result<bool, InputError> {
        match &self.input[section][field] {
            Yaml::Boolean(b) => Ok(*b),
            _ => Err(InputError::MissingField(
                section.to_owned(),
                field.to_owned(),
            )),
        }
    }

    fn f64s(&self, section: &str, field: &str) -> Result<Vec<f64>, InputError> {
        match &self.input[section][field] {
            Yaml::Array(array) => array
                .iter()
                .map(|y| match y {
                    Yaml::Real(s) => s.parse::<f64>().map_err(|_| {
                        InputError::CouldNotParse(section.to_owned(), field.to_owned())
                    }),
                    Yaml::Integer(i) => Ok(*i as f64),
                    Yaml::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
                    _ => Err(InputError::CouldNotParse(
                        section.to_owned(),
                        field.to_owned(),
                    )),
                })
                .collect(),
            _ => Err(InputError::MissingField(
                section.to_owned(),
                field.to_owned(),
            )),
        }
    }

    fn codes(&self, section: &str, field: &str) -> Result<FaceCodes, InputError> {
        let v = self.f64s(section, field)?;
        if v.len() != 6 {
            return Err(InputError::CouldNotParse(
                section.to_owned(),
                field.to_owned(),
            ));
        }
        let mut codes = [0; 6];
        for (c, x) in codes.iter_mut().zip(v.iter()) {
            *c = *x as i32;
        }
        Ok(codes)
    }

    fn case(&self) -> Result<Case, InputError> {
        match &self.input["control"]["case"] {
            Yaml::String(s) => match s.as_str() {
                "Default" => Ok(Case::Default),
                "GEM" => Ok(Case::Gem),
                "GEMnoPert" => Ok(Case::GemNoPert),
                "ForceFree" => Ok(Case::ForceFree),
                _ => Err(InputError::CouldNotParse(
                    "control".to_owned(),
                    "case".to_owned(),
                )),
            },
            Yaml::BadValue => Ok(Case::Default),
            _ => Err(InputError::MissingField(
                "control".to_owned(),
                "case".to_owned(),
            )),
        }
    }

    pub fn build(&self) -> Result<(Config, RunControl), Box<dyn Error>> {
        let qom = self.f64s("species", "qom")?;
        let rho_init = self.f64s("species", "rho_init")?;
        let vth = self.f64s("species", "vth")?;
        let npc = self.usize("species", "npc")?;

        let lengths = [
            self.f64("control", "lx")?,
            self.f64("control", "ly")?,
            self.f64("control", "lz")?,
        ];
        let b0v = self.f64s("fields", "b0")?;
        if b0v.len() != 3 {
            return Err(Box::new(InputError::CouldNotParse(
                "fields".to_owned(),
                "b0".to_owned(),
            )));
        }
        let b0 = [b0v[0], b0v[1], b0v[2]];

        let periodic_v = self.f64s("boundaries", "periodic")?;
        let periodic = [
            periodic_v[0] != 0.0,
            periodic_v[1] != 0.0,
            periodic_v[2] != 0.0,
        ];

        let cfg = Config::new(
            qom,
            rho_init,
            self.f64("control", "th")?,
            self.f64("control", "dt")?,
            self.f64("control", "c")?,
            self.f64("control", "smooth")?,
            b0,
            lengths,
            self.codes("boundaries", "bc_phi")?,
            self.codes("boundaries", "bc_em")?,
            self.f64("control", "cg_tol")?,
            self.f64("control", "gmres_tol")?,
            self.bool("control", "poisson_correction")?,
            self.case()?,
        )?;

        let control = RunControl {
            ncells: [
                self.usize("control", "nx")?,
                self.usize("control", "ny")?,
                self.usize("control", "nz")?,
            ],
            nprocs: [
                self.usize("control", "npx")? as i32,
                self.usize("control", "npy")? as i32,
                self.usize("control", "npz")? as i32,
            ],
            periodic,
            ncycles: self.usize("control", "ncycles")?,
            npc,
            vth,
        };
        Ok((cfg, control))
    }
}
