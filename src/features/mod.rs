pub mod callback;
pub mod probe;
