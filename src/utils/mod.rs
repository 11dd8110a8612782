pub mod sos;
