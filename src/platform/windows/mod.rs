pub(crate) mod com;
pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod monitor;
pub(crate) mod render;
pub(crate) mod shaders;
pub(crate) mod window;
