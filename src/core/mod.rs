pub mod garment;
