pub mod deploy;

pub mod output;
