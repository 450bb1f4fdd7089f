pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{count_files, seeded_bytes};
