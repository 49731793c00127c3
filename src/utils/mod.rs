pub mod path;
pub mod sos;
