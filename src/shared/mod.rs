pub mod errors;
pub mod fs_atomic;
pub mod ids;
pub mod time;
