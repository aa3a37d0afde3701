pub mod balance;
pub mod jobs;
