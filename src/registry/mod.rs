//! Collaborators at the edges: the upstream source and the gem file reader

pub mod reader;
pub mod source;
