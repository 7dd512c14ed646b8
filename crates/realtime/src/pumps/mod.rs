//! Per-connection read and write pumps.

pub(crate) mod read;
pub(crate) mod write;

pub(crate) use write::Outbound;
