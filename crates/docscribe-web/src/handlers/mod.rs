pub mod index;
pub mod render;
pub mod stream;
