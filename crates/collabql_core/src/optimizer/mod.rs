//! Split a checked execution graph per party and schedule each part.

pub mod mapper;
pub mod partitioner;
