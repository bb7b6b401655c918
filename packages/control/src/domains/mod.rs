pub mod directory;
pub mod jobs;
