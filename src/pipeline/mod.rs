pub mod annotate;
pub mod compositor;
pub mod decode;
pub mod detector;
pub mod skeleton;
