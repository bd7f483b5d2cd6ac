//! Bidirectional translation between a host DCC scene and the renderer's
//! scene description (XML documents or in-memory scene dictionaries).

pub mod color;
pub mod config;
pub mod export;
pub mod graph;
pub mod host;
pub mod import;
pub mod ior;
pub mod ply;
pub mod props;
pub mod report;
pub mod textures;
