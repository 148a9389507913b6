pub(crate) mod object;
pub(crate) mod repo;
pub(crate) mod store;

pub(crate) use object::{Object, Tree};
pub(crate) use repo::{Branch, BranchId, CommitMeta, Repository};
pub(crate) use store::WriterError;
