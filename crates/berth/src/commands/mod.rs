pub mod build;
pub mod down;
pub mod up;
