pub mod load;
pub mod sql;
