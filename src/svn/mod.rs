pub(crate) mod dump;
pub(crate) mod path;
pub(crate) mod source;
