pub mod flow;
pub mod info;
pub mod ir;
pub mod output;
pub mod parse;
pub mod reg;
pub mod regfile;
pub mod simplify;
pub mod stack;
pub mod translate;
pub mod types;
#[cfg(test)]
pub mod test;

#[cfg(test)]
include!(concat!(env!("OUT_DIR"), "/tests.rs"));
