pub mod capsule;
pub mod curve;
pub mod errors;
pub mod keys;
pub mod kfrag;
pub mod schemes;
pub mod utils;
