pub mod image;
pub mod section;
