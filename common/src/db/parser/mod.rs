pub mod def;
pub mod lef;
