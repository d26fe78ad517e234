pub mod garment;
pub mod models;
