pub mod export;
pub mod inventory;
pub mod run;
pub mod status;

#[cfg(test)]
mod fixtures;
