pub mod dl;
pub mod maps;
pub mod mem;
