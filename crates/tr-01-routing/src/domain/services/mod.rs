//! Pure distance services shared by the table and the lookup engine.

mod distance;
mod sorting;

pub use distance::{bucket_index, random_id_in_bucket};
pub use sorting::{find_k_closest, sort_by_distance};
